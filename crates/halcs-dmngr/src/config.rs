use serde::Deserialize;

/// Typed configuration for the `device-manager` process, loaded once from a
/// TOML file and passed explicitly to [`crate::supervisor::Supervisor`]
/// rather than kept as global mutable state.
#[derive(Debug, Clone, Deserialize)]
pub struct DmngrConfig {
    pub broker_endpoint: String,
    pub endpoint_scan_dir: String,
    #[serde(default = "default_scan_pattern")]
    pub endpoint_scan_pattern: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_true")]
    pub respawn_killed_devio: bool,
}

fn default_scan_pattern() -> String {
    "fpga*".to_string()
}

fn default_log_file() -> String {
    "device-manager.log".to_string()
}

fn default_true() -> bool {
    true
}

impl DmngrConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}
