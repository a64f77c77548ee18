//! PKCS#11 URI parsing and the pkcs11 configuration block.

use crate::error::ConfigError;

/// `library`, `slot`, and `userPin` lifted from
/// `services.aws.greengrass.crypto.Pkcs11Provider.configuration`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pkcs11Config {
    pub library: String,
    pub slot: u64,
    pub user_pin: String,
}

/// A parsed `pkcs11:k=v;k=v;...` URI (RFC 7512, partial — only the
/// attributes this server cares about). `object` names the key or
/// certificate label.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pkcs11Uri {
    pub object: String,
    pub pin_value: Option<String>,
    pub token: Option<String>,
    pub type_: Option<String>,
}

/// Parses `pkcs11:k1=v1;k2=v2;...` into the exact key/value mapping.
pub fn parse_pkcs11_uri(uri: &str) -> Result<Pkcs11Uri, ConfigError> {
    let rest = uri.strip_prefix("pkcs11:").ok_or_else(|| ConfigError::InvalidPkcs11Uri {
        uri: uri.to_string(),
        reason: "missing pkcs11: scheme".to_string(),
    })?;

    let mut parsed = Pkcs11Uri::default();
    let mut saw_object = false;
    for pair in rest.split(';') {
        if pair.is_empty() {
            continue;
        }
        let (k, v) = pair.split_once('=').ok_or_else(|| ConfigError::InvalidPkcs11Uri {
            uri: uri.to_string(),
            reason: format!("segment {pair:?} is not key=value"),
        })?;
        match k {
            "object" => {
                parsed.object = v.to_string();
                saw_object = true;
            }
            "pin-value" => parsed.pin_value = Some(v.to_string()),
            "token" => parsed.token = Some(v.to_string()),
            "type" => parsed.type_ = Some(v.to_string()),
            _ => {}
        }
    }

    if !saw_object {
        return Err(ConfigError::InvalidPkcs11Uri {
            uri: uri.to_string(),
            reason: "missing object= segment".to_string(),
        });
    }

    Ok(parsed)
}

/// Splices the pkcs11 config's user pin back into the URI as
/// `pin-value=...`, for consumers that need it inlined. Internal APIs
/// should prefer the structured [`Pkcs11Uri`] form instead.
pub fn with_inlined_pin(uri: &str, user_pin: &str) -> String {
    format!("{uri};pin-value={user_pin}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_exact_key_value_mapping() {
        let parsed = parse_pkcs11_uri("pkcs11:object=my-key;type=private").unwrap();
        assert_eq!(parsed.object, "my-key");
        assert_eq!(parsed.type_.as_deref(), Some("private"));
        assert_eq!(parsed.pin_value, None);
    }

    #[test]
    fn rejects_uri_without_object() {
        assert!(parse_pkcs11_uri("pkcs11:type=cert").is_err());
    }

    #[test]
    fn inlined_pin_is_appended_once() {
        let uri = "pkcs11:object=k;type=cert";
        let with_pin = with_inlined_pin(uri, "1234");
        assert_eq!(with_pin, "pkcs11:object=k;type=cert;pin-value=1234");
    }
}
