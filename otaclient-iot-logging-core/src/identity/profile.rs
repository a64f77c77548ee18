//! Profile derivation from a thing name, and the small profile-name →
//! `{account_id, credential_endpoint}` lookup table.

use crate::error::ConfigError;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

static THING_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(thing[/:])?(?P<profile>[\w-]+)-edge-(?P<id>[\w-]+)-.*$").unwrap());

/// Schema: `thing/<profile>-edge-<id>-Core`. Failure to match is a fatal
/// configuration error.
pub fn profile_from_thing_name(thing_name: &str) -> Result<String, ConfigError> {
    THING_NAME_PATTERN
        .captures(thing_name)
        .and_then(|caps| caps.name("profile"))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ConfigError::ProfilePattern {
            thing_name: thing_name.to_string(),
        })
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileEntry {
    pub profile_name: String,
    pub account_id: String,
    pub credential_endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawProfileTable {
    profiles: Vec<ProfileEntry>,
}

/// The parsed profile table, keyed by `profile_name`.
#[derive(Debug, Clone)]
pub struct ProfileTable {
    entries: Vec<ProfileEntry>,
    path: String,
}

impl ProfileTable {
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw, &path.display().to_string())
    }

    pub fn parse(raw_yaml: &str, path: &str) -> Result<Self, ConfigError> {
        let table: RawProfileTable =
            serde_yaml::from_str(raw_yaml).map_err(|source| ConfigError::Parse {
                path: path.to_string(),
                dialect: "profile table YAML",
                source: source.into(),
            })?;
        Ok(Self {
            entries: table.profiles,
            path: path.to_string(),
        })
    }

    /// An unknown profile is a fatal configuration error.
    pub fn lookup(&self, profile_name: &str) -> Result<&ProfileEntry, ConfigError> {
        self.entries
            .iter()
            .find(|entry| entry.profile_name == profile_name)
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: profile_name.to_string(),
                path: self.path.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn extracts_profile_from_thing_arn_resource_id() {
        assert_eq!(
            profile_from_thing_name("thing/my-profile-edge-abc123-Core").unwrap(),
            "my-profile"
        );
    }

    #[test]
    fn rejects_names_without_edge_marker() {
        assert!(profile_from_thing_name("not-a-valid-name").is_err());
    }

    #[test]
    fn unknown_profile_is_fatal() {
        let table = ProfileTable::parse(
            "profiles:\n  - profile_name: known\n    account_id: \"123456789012\"\n    credential_endpoint: cred.example.com\n",
            "profiles.yaml",
        )
        .unwrap();
        assert!(table.lookup("unknown").is_err());
        assert_eq!(table.lookup("known").unwrap().account_id, "123456789012");
    }
}
