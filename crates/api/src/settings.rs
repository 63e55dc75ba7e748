//! Service settings

use alerting::{DispatcherConfig, EngineConfig, TelegramConfig};
use monitor::MonitorConfig;
use serde::{Deserialize, Serialize};
use stabilizer::StabilizerConfig;
use std::path::PathBuf;
use storage::StoreConfig;

/// Settings file used when `DMS_CONFIG` is unset
pub const DEFAULT_CONFIG_FILE: &str = "driver-monitor.toml";

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: String,
    /// JSON-lines frame file replayed through the cycle loop
    pub replay_path: Option<PathBuf>,
    /// Capacity of the WebSocket event channel
    pub event_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            replay_path: None,
            event_capacity: 64,
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub monitor: MonitorConfig,
    pub stabilizer: StabilizerConfig,
    pub storage: StoreConfig,
    pub engine: EngineConfig,
    pub dispatcher: DispatcherConfig,
    pub telegram: TelegramConfig,
}

impl Settings {
    /// Load from the file named by `DMS_CONFIG` (optional) overlaid with
    /// `DMS__SECTION__KEY` environment variables
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = std::env::var("DMS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix("DMS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let settings = Settings::load_from("/nonexistent/driver-monitor.toml").unwrap();
        assert_eq!(settings.server.bind_addr, "0.0.0.0:8000");
        assert_eq!(settings.storage.throttle_ms, 100);
        assert_eq!(settings.dispatcher.history_limit, 50);
        assert_eq!(settings.engine.persistence_ms, 10_000);
    }

    #[test]
    fn test_file_overrides() {
        let dir = std::env::temp_dir().join(format!("dms-settings-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("driver-monitor.toml");
        std::fs::write(
            &path,
            "[monitor]\ntarget_fps = 10.0\n\n\
             [dispatcher.cooldowns]\ndrinking_ms = 5000\n\n\
             [logging]\njson = true\n",
        )
        .unwrap();

        let settings = Settings::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.monitor.target_fps, 10.0);
        assert_eq!(settings.dispatcher.cooldowns.drinking_ms, 5_000);
        assert_eq!(settings.dispatcher.cooldowns.sleepy_ms, 30_000);
        assert!(settings.logging.json);

        std::fs::remove_dir_all(&dir).ok();
    }
}
