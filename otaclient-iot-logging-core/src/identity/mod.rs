//! The identity config loader. Parses the two on-disk device
//! identity dialects (Greengrass v1 JSON, v2 YAML) into a single normalized
//! [`DeviceIdentity`], following a "parse, don't validate" discipline so the
//! rest of the core only ever sees the common record.

pub mod ecu;
pub mod pkcs11;
pub mod profile;
pub mod v1;
pub mod v2;

use crate::error::ConfigError;
use std::path::Path;

pub use ecu::{AllowedEcus, EcuContact, EcuInfo};
pub use pkcs11::{Pkcs11Config, Pkcs11Uri};
pub use profile::ProfileTable;

/// Either a filesystem path or a `pkcs11:` URI. The scheme is what
/// distinguishes the two; no separate tag is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRef {
    File(String),
    Pkcs11(String),
}

impl KeyRef {
    fn parse(raw: &str) -> Self {
        if raw.starts_with("pkcs11:") {
            KeyRef::Pkcs11(raw.to_string())
        } else {
            KeyRef::File(raw.to_string())
        }
    }

    pub fn is_pkcs11(&self) -> bool {
        matches!(self, KeyRef::Pkcs11(_))
    }
}

/// The normalized device identity, immutable after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub account_id: String,
    pub ca_path: String,
    pub private_key_ref: KeyRef,
    pub certificate_ref: KeyRef,
    pub thing_name: String,
    pub profile: String,
    pub region: String,
    pub credential_endpoint: String,
    pub pkcs11: Option<Pkcs11Config>,
}

impl DeviceIdentity {
    /// Invariant: if either key reference uses the `pkcs11:` scheme, a
    /// pkcs11 block (library path, slot, pin) must be present.
    fn validate(self) -> Result<Self, ConfigError> {
        if (self.private_key_ref.is_pkcs11() || self.certificate_ref.is_pkcs11())
            && self.pkcs11.is_none()
        {
            return Err(ConfigError::MissingPkcs11Config {
                field: "private_key_ref/certificate_ref",
            });
        }
        Ok(self)
    }

    pub fn role_alias(&self) -> String {
        format!(
            "{}-autoware-adapter-credentials-iot-secrets-access-role-alias",
            self.profile
        )
    }

    pub fn log_group(&self) -> String {
        format!(
            "/aws/greengrass/edge/{}/{}/{}-edge-otaclient",
            self.region, self.account_id, self.profile
        )
    }

    /// The metrics group is the logs group with a `-metrics` suffix
    /// appended, recognized as a fully distinct remote log group.
    pub fn metrics_log_group(&self) -> String {
        format!("{}-metrics", self.log_group())
    }

    pub fn refresh_url(&self) -> String {
        format!(
            "https://{}/role-aliases/{}/credentials",
            self.credential_endpoint.trim_end_matches('/'),
            self.role_alias()
        )
    }
}

/// The v2 (Greengrass v2, YAML) path takes priority over v1 (JSON) when both
/// are present on disk.
pub fn active_identity_path<'a>(v1_path: &'a Path, v2_path: &'a Path) -> &'a Path {
    if v2_path.is_file() {
        v2_path
    } else {
        v1_path
    }
}

/// Try v2 first (it takes priority if present), falling back to v1.
pub fn load_identity(
    v1_path: &Path,
    v2_path: &Path,
    profile_table: &ProfileTable,
) -> Result<DeviceIdentity, ConfigError> {
    let active_path = active_identity_path(v1_path, v2_path);
    let raw = std::fs::read_to_string(active_path).map_err(|source| ConfigError::Read {
        path: active_path.display().to_string(),
        source,
    })?;

    if active_path == v2_path {
        v2::parse_v2_config(&raw, profile_table)
    } else {
        v1::parse_v1_config(&raw, profile_table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn active_path_prefers_v2_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let v1_path = dir.path().join("config.json");
        let v2_path = dir.path().join("config.yaml");
        std::fs::File::create(&v1_path).unwrap();
        std::fs::File::create(&v2_path).unwrap();

        assert_eq!(active_identity_path(&v1_path, &v2_path), v2_path);
    }

    #[test]
    fn active_path_falls_back_to_v1_when_v2_missing() {
        let dir = tempfile::tempdir().unwrap();
        let v1_path = dir.path().join("config.json");
        let v2_path = dir.path().join("does-not-exist.yaml");
        let mut file = std::fs::File::create(&v1_path).unwrap();
        write!(file, "{{}}").unwrap();

        assert_eq!(active_identity_path(&v1_path, &v2_path), v1_path);
    }
}
