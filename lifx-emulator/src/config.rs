//! The startup configuration shape the core consumes from its collaborators (§6.3): a CLI,
//! YAML loader, or HTTP management plane parses its own on-disk format and hands this crate an
//! already-built [`StartupConfig`]. Parsing YAML/JSON into this shape is the collaborator's job,
//! not this crate's.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ids::DeviceId;

/// One device to create at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub vendor: u32,
    pub product: u32,
    #[serde(default)]
    pub id: Option<DeviceIdConfig>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub firmware_major: Option<u16>,
    #[serde(default)]
    pub firmware_minor: Option<u16>,
    #[serde(default)]
    pub zone_count: Option<u16>,
    #[serde(default)]
    pub tile_count: Option<u8>,
}

/// A device id as written in config: the 12-hex-character form from §3, parsed lazily so a
/// malformed id in a config file is a structured validation error, not a deserialize panic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdConfig(pub String);

impl DeviceIdConfig {
    pub fn parse(&self) -> Result<DeviceId, crate::ids::ParseDeviceIdError> {
        self.0.parse()
    }
}

/// Initial scenario rules to install before the server starts accepting traffic, keyed the same
/// way the management plane's `set_scope` contract is (§6.3).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InitialScenarioConfig {
    #[serde(default)]
    pub global: Option<crate::scenario::ScenarioRuleSet>,
}

/// The complete shape the core needs to start serving: where to bind, where to persist device
/// state, which virtual devices to create, and any scenario rules to preload. Everything about
/// *where this came from* (a YAML file, an HTTP request body, a CLI flag) lives outside this
/// crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    pub persistence_dir: Option<PathBuf>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub initial_scenarios: InitialScenarioConfig,
}

fn default_bind() -> SocketAddr {
    "127.0.0.1:56700".parse().unwrap()
}

impl Default for StartupConfig {
    fn default() -> Self {
        StartupConfig {
            bind: default_bind(),
            persistence_dir: None,
            devices: Vec::new(),
            initial_scenarios: InitialScenarioConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bind_matches_lan_protocol_default_port() {
        assert_eq!(default_bind().port(), 56700);
    }

    #[test]
    fn device_config_round_trips_through_json() {
        let cfg = DeviceConfig {
            vendor: 1,
            product: 31,
            id: Some(DeviceIdConfig("d073d5000001".into())),
            label: Some("Strip".into()),
            firmware_major: None,
            firmware_minor: None,
            zone_count: Some(16),
            tile_count: None,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: DeviceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id.unwrap().parse().unwrap(), cfg.id.unwrap().parse().unwrap());
    }
}
