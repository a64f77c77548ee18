//! Greengrass v1 (JSON) device identity parsing. TPM/PKCS#11 is not
//! supported in this dialect.

use super::profile::{profile_from_thing_name, ProfileTable};
use super::{DeviceIdentity, KeyRef};
use crate::error::ConfigError;
use serde_json::Value;

fn regulate_path(raw: &str) -> String {
    raw.strip_prefix("file://").unwrap_or(raw).to_string()
}

fn chain_query<'a>(value: &'a Value, path: &str, segments: &[&str]) -> Result<&'a Value, ConfigError> {
    let mut current = value;
    for segment in segments {
        current = current
            .get(segment)
            .ok_or_else(|| ConfigError::MissingKey {
                path: path.to_string(),
                key: segments.join("."),
            })?;
    }
    Ok(current)
}

fn chain_str(value: &Value, path: &str, segments: &[&str]) -> Result<String, ConfigError> {
    chain_query(value, path, segments)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ConfigError::MissingKey {
            path: path.to_string(),
            key: segments.join("."),
        })
}

/// `arn:partition:service:region:account-id:resource-id`, split on `:` at
/// most 6 times.
struct ThingArn {
    region: String,
    account_id: String,
    resource_id: String,
}

impl ThingArn {
    fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<&str> = raw.splitn(6, ':').collect();
        if parts.len() != 6 || parts[0] != "arn" {
            return None;
        }
        Some(Self {
            region: parts[3].to_string(),
            account_id: parts[4].to_string(),
            resource_id: parts[5].to_string(),
        })
    }

    fn thing_name(&self) -> String {
        self.resource_id
            .strip_prefix("thing/")
            .unwrap_or(&self.resource_id)
            .to_string()
    }
}

pub fn parse_v1_config(raw_cfg: &str, profile_table: &ProfileTable) -> Result<DeviceIdentity, ConfigError> {
    let path = "GREENGRASS_V1_CONFIG";
    let loaded: Value = serde_json::from_str(raw_cfg).map_err(|source| ConfigError::Parse {
        path: path.to_string(),
        dialect: "Greengrass v1 JSON",
        source: source.into(),
    })?;

    let raw_thing_arn = chain_str(&loaded, path, &["coreThing", "thingArn"])?;
    let thing_arn = ThingArn::parse(&raw_thing_arn).ok_or_else(|| ConfigError::Parse {
        path: path.to_string(),
        dialect: "Greengrass v1 JSON",
        source: anyhow::anyhow!("thingArn {raw_thing_arn:?} is not a well-formed ARN"),
    })?;
    let thing_name = thing_arn.thing_name();
    let profile = profile_from_thing_name(&thing_name)?;
    let entry = profile_table.lookup(&profile)?;

    let ca_path = regulate_path(&chain_str(&loaded, path, &["crypto", "caPath"])?);
    let private_key_path = regulate_path(&chain_str(
        &loaded,
        path,
        &["crypto", "principals", "IoTCertificate", "privateKeyPath"],
    )?);
    let certificate_path = regulate_path(&chain_str(
        &loaded,
        path,
        &["crypto", "principals", "IoTCertificate", "certificatePath"],
    )?);

    Ok(DeviceIdentity {
        account_id: thing_arn.account_id,
        ca_path,
        private_key_ref: KeyRef::parse(&private_key_path),
        certificate_ref: KeyRef::parse(&certificate_path),
        thing_name,
        profile: entry.profile_name.clone(),
        region: thing_arn.region,
        credential_endpoint: entry.credential_endpoint.clone(),
        pkcs11: None,
    }
    .validate()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn profile_table() -> ProfileTable {
        ProfileTable::parse(
            "profiles:\n  - profile_name: myprofile\n    account_id: \"123456789012\"\n    credential_endpoint: cred.example.com\n",
            "profiles.yaml",
        )
        .unwrap()
    }

    #[test]
    fn parses_minimal_v1_config() {
        let raw = r#"{
            "coreThing": { "thingArn": "arn:aws:iot:us-east-1:123456789012:thing/myprofile-edge-abc-Core" },
            "crypto": {
                "caPath": "file:///greengrass/ca.pem",
                "principals": {
                    "IoTCertificate": {
                        "privateKeyPath": "file:///greengrass/private.key",
                        "certificatePath": "/greengrass/cert.pem"
                    }
                }
            }
        }"#;
        let identity = parse_v1_config(raw, &profile_table()).unwrap();
        assert_eq!(identity.thing_name, "myprofile-edge-abc-Core");
        assert_eq!(identity.profile, "myprofile");
        assert_eq!(identity.region, "us-east-1");
        assert_eq!(identity.account_id, "123456789012");
        assert_eq!(identity.ca_path, "/greengrass/ca.pem");
        assert_eq!(
            identity.private_key_ref,
            KeyRef::File("/greengrass/private.key".to_string())
        );
        assert!(identity.pkcs11.is_none());
    }
}
