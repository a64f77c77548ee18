//! ECU allow-list: the optional, read-once-at-startup identifier set used
//! to gate ingress.

use serde::Deserialize;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EcuContact {
    pub ecu_id: String,
    pub ip_addr: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    50051
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EcuInfo {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    pub ecu_id: String,
    #[serde(default)]
    pub secondaries: Vec<EcuContact>,
}

fn default_format_version() -> u32 {
    1
}

impl EcuInfo {
    pub fn ecu_id_set(&self) -> HashSet<String> {
        let mut ids: HashSet<String> = self
            .secondaries
            .iter()
            .map(|c| c.ecu_id.clone())
            .collect();
        ids.insert(self.ecu_id.clone());
        ids
    }
}

/// Best-effort parse: a missing or invalid file is not fatal, it merely
/// disables ECU filtering — all errors are swallowed by the caller logging
/// a warning and returning `None`.
pub fn parse_ecu_info(path: &Path) -> Option<EcuInfo> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_yaml::from_str(&raw).ok()
}

/// `AllowedEcus::None` disables filtering; `AllowedEcus::Some` accepts only
/// the contained identifiers.
#[derive(Debug, Clone)]
pub enum AllowedEcus {
    Unfiltered,
    Filtered(HashSet<String>),
}

impl AllowedEcus {
    pub fn from_ecu_info(info: Option<&EcuInfo>) -> Self {
        match info {
            Some(info) => AllowedEcus::Filtered(info.ecu_id_set()),
            None => AllowedEcus::Unfiltered,
        }
    }

    pub fn is_allowed(&self, ecu_id: &str) -> bool {
        match self {
            AllowedEcus::Unfiltered => true,
            AllowedEcus::Filtered(ids) => ids.contains(ecu_id),
        }
    }
}
