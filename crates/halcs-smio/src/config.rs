use serde::Deserialize;

/// Typed configuration for one `smio-worker` process, loaded once at
/// startup from a TOML file and passed explicitly to the worker
/// constructor rather than kept as global mutable state.
#[derive(Debug, Clone, Deserialize)]
pub struct SmioConfig {
    pub broker_endpoint: String,
    pub service_name: String,
    pub endpoint_name: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default)]
    pub verbose: bool,
}

fn default_log_file() -> String {
    "smio-worker.log".to_string()
}

impl SmioConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}
