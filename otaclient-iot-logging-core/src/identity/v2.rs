//! Greengrass v2 (YAML) device identity parsing, including the optional
//! PKCS#11 block for hardware-backed key material.

use super::pkcs11::Pkcs11Config;
use super::profile::{profile_from_thing_name, ProfileTable};
use super::{DeviceIdentity, KeyRef};
use crate::error::ConfigError;
use serde_yaml::Value;

const PATH: &str = "GREENGRASS_V2_CONFIG";

fn get<'a>(value: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments {
        current = current.get(segment)?;
    }
    Some(current)
}

fn require_str(value: &Value, segments: &[&str]) -> Result<String, ConfigError> {
    get(value, segments)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ConfigError::MissingKey {
            path: PATH.to_string(),
            key: segments.join("."),
        })
}

pub fn parse_v2_config(raw_cfg: &str, profile_table: &ProfileTable) -> Result<DeviceIdentity, ConfigError> {
    let loaded: Value = serde_yaml::from_str(raw_cfg).map_err(|source| ConfigError::Parse {
        path: PATH.to_string(),
        dialect: "Greengrass v2 YAML",
        source: source.into(),
    })?;

    let thing_name = require_str(&loaded, &["system", "thingName"])?;
    let profile = profile_from_thing_name(&thing_name)?;
    let entry = profile_table.lookup(&profile)?;

    // NOTE: the Nucleus/Pkcs11Provider service names are themselves dotted
    // string keys in Greengrass v2 config, not a further level of nesting.
    let cred_endpoint = get(
        &loaded,
        &["services", "aws.greengrass.Nucleus", "configuration", "iotCredEndpoint"],
    )
    .and_then(Value::as_str)
    .map(str::to_string)
    .unwrap_or_else(|| entry.credential_endpoint.clone());

    let pkcs11 = get(
        &loaded,
        &["services", "aws.greengrass.crypto.Pkcs11Provider", "configuration"],
    )
    .map(|cfg| -> Result<Pkcs11Config, ConfigError> {
        let library = require_str(cfg, &["library"])?;
        let user_pin = require_str(cfg, &["userPin"])?;
        let slot = get(cfg, &["slot"])
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .ok_or_else(|| ConfigError::MissingKey {
                path: PATH.to_string(),
                key: "slot".to_string(),
            })?;
        Ok(Pkcs11Config { library, slot, user_pin })
    })
    .transpose()?;

    Ok(DeviceIdentity {
        // v2 lacks account_id in the dialect; take it from the profile table.
        account_id: entry.account_id.clone(),
        ca_path: require_str(&loaded, &["system", "rootCaPath"])?,
        private_key_ref: KeyRef::parse(&require_str(&loaded, &["system", "privateKeyPath"])?),
        certificate_ref: KeyRef::parse(&require_str(&loaded, &["system", "certificateFilePath"])?),
        thing_name,
        profile: entry.profile_name.clone(),
        region: require_str(
            &loaded,
            &["services", "aws.greengrass.Nucleus", "configuration", "awsRegion"],
        )?,
        credential_endpoint: cred_endpoint,
        pkcs11,
    }
    .validate()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn profile_table() -> ProfileTable {
        ProfileTable::parse(
            "profiles:\n  - profile_name: myprofile\n    account_id: \"123456789012\"\n    credential_endpoint: fallback.example.com\n",
            "profiles.yaml",
        )
        .unwrap()
    }

    #[test]
    fn prefers_inline_credential_endpoint_over_profile_table() {
        let raw = r#"
system:
  thingName: myprofile-edge-abc-Core
  rootCaPath: /gg/ca.pem
  privateKeyPath: /gg/private.key
  certificateFilePath: /gg/cert.pem
services:
  aws.greengrass.Nucleus:
    configuration:
      awsRegion: us-east-1
      iotCredEndpoint: inline.example.com
"#;
        let identity = parse_v2_config(raw, &profile_table()).unwrap();
        assert_eq!(identity.credential_endpoint, "inline.example.com");
        assert_eq!(identity.account_id, "123456789012");
        assert!(identity.pkcs11.is_none());
    }

    #[test]
    fn falls_back_to_profile_table_endpoint_when_absent() {
        let raw = r#"
system:
  thingName: myprofile-edge-abc-Core
  rootCaPath: /gg/ca.pem
  privateKeyPath: /gg/private.key
  certificateFilePath: /gg/cert.pem
services:
  aws.greengrass.Nucleus:
    configuration:
      awsRegion: us-east-1
"#;
        let identity = parse_v2_config(raw, &profile_table()).unwrap();
        assert_eq!(identity.credential_endpoint, "fallback.example.com");
    }

    #[test]
    fn parses_pkcs11_block_when_present() {
        let raw = r#"
system:
  thingName: myprofile-edge-abc-Core
  rootCaPath: /gg/ca.pem
  privateKeyPath: "pkcs11:object=key-label;type=private"
  certificateFilePath: /gg/cert.pem
services:
  aws.greengrass.Nucleus:
    configuration:
      awsRegion: us-east-1
  aws.greengrass.crypto.Pkcs11Provider:
    configuration:
      library: /usr/lib/libpkcs11.so
      userPin: "1234"
      slot: 0
"#;
        let identity = parse_v2_config(raw, &profile_table()).unwrap();
        let pkcs11 = identity.pkcs11.unwrap();
        assert_eq!(pkcs11.library, "/usr/lib/libpkcs11.so");
        assert_eq!(pkcs11.user_pin, "1234");
        assert_eq!(pkcs11.slot, 0);
        assert!(identity.private_key_ref.is_pkcs11());
    }
}
