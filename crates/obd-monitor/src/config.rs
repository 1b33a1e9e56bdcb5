//! Monitor configuration
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! `OBD_`-prefixed environment variables (`OBD_CLIENT__COMMAND_TIMEOUT_MS`).

use anyhow::{Context, Result};
use config::{Environment, File, FileFormat};
use obd_protocol::{ClientConfig, DEFAULT_BAUD_RATE};
use obd_telemetry::PollerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file read when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "obd-monitor.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Serial device path; the first discovered port when unset
    pub device: Option<String>,
    pub baud_rate: u32,
    /// Default filter when `RUST_LOG` is unset
    pub log_level: String,
    pub json_logs: bool,
    pub client: ClientConfig,
    pub poller: PollerConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            device: None,
            baud_rate: DEFAULT_BAUD_RATE,
            log_level: "info".to_string(),
            json_logs: false,
            client: ClientConfig::default(),
            poller: PollerConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration.
    ///
    /// An explicitly named file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        config::Config::builder()
            .add_source(
                File::from(path.as_path())
                    .format(FileFormat::Toml)
                    .required(required),
            )
            .add_source(
                Environment::with_prefix("OBD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = MonitorConfig::default();
        assert_eq!(config.baud_rate, 38400);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.client.command_timeout_ms, 2000);
        assert_eq!(config.poller.interval_ms, 1000);
        assert_eq!(config.poller.pids.len(), 12);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let missing = std::env::temp_dir().join("obd-monitor-does-not-exist.toml");
        assert!(MonitorConfig::load(Some(missing.as_path())).is_err());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let path = std::env::temp_dir().join(format!("obd-monitor-test-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "device = \"/dev/rfcomm0\"\n\n[client]\ncommand_timeout_ms = 750\n\n[poller]\ninterval_ms = 250\npids = [\"Rpm\", \"Speed\"]"
        )
        .unwrap();

        let config = MonitorConfig::load(Some(path.as_path())).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.device.as_deref(), Some("/dev/rfcomm0"));
        assert_eq!(config.baud_rate, 38400);
        assert_eq!(config.client.command_timeout_ms, 750);
        assert!(config.client.initialize_adapter);
        assert_eq!(config.poller.interval_ms, 250);
        assert_eq!(config.poller.pids.len(), 2);
    }
}
