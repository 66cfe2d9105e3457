//! Configuration data structures for vhostd.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files.
//! Every section has defaults so that a minimal file only names what differs
//! from a stock nginx installation.
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Where the hosting model is persisted.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON document holding virtual hosts, mappings and the id counter
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/vhostd/vhosts.json"),
        }
    }
}

/// The external serving process.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServingConfig {
    /// Directory the rendered server blocks are written to
    pub config_dir: PathBuf,
    /// Command line run to make the serving process pick up changes
    pub reload_command: Vec<String>,
    /// Bound on writing or removing one server block, e.g. "10s"
    pub apply_timeout: String,
    /// Bound on the reload command, e.g. "30s"
    pub reload_timeout: String,
    /// Port every rendered server block listens on
    pub listen_port: u16,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/etc/nginx/vhostd.d"),
            reload_command: vec!["nginx".to_string(), "-s".to_string(), "reload".to_string()],
            apply_timeout: "10s".to_string(),
            reload_timeout: "30s".to_string(),
            listen_port: 80,
        }
    }
}

impl ServingConfig {
    pub fn apply_timeout(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.apply_timeout)
    }

    pub fn reload_timeout(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.reload_timeout)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Top level configuration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Host holding the reserved primary status
    pub primary_hostname: Option<String>,
    /// Services that `service://` mapping targets may reference
    pub installed_services: Vec<String>,
    pub store: StoreConfig,
    pub serving: ServingConfig,
    pub logging: LoggingConfig,
}

/// Commented configuration written by `vhostd init`.
pub const DEFAULT_CONFIG_TOML: &str = r#"# vhostd configuration
#
# Every key may be overridden from the environment with the VHOSTD prefix and
# "__" between sections, e.g. VHOSTD_SERVING__LISTEN_PORT=8080.

# Host holding the reserved primary status. It cannot be deleted while other
# virtual hosts exist.
# primary_hostname = "example.com"

# Services that service://name:port mapping targets may reference.
installed_services = []

[store]
path = "/var/lib/vhostd/vhosts.json"

[serving]
config_dir = "/etc/nginx/vhostd.d"
reload_command = ["nginx", "-s", "reload"]
apply_timeout = "10s"
reload_timeout = "30s"
listen_port = 80

[logging]
level = "info"
json = false
"#;
