//! Persisted monitor settings

use crate::core::buffer::DEFAULT_CAPACITY;
use crate::core::monitor::DEFAULT_THRESHOLD_VOLTS;
use crate::core::parser::ParseMode;
use crate::core::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Monitor configuration persisted between runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Default baud rate for new connections
    pub baud_rate: u32,
    /// Default wire format
    pub parse_mode: ParseMode,
    /// Alert threshold in volts
    pub threshold_volts: f64,
    /// Last used port, preselected in the port selector
    pub last_port: Option<String>,
    /// Chart history length
    pub history_points: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            parse_mode: ParseMode::default(),
            threshold_volts: DEFAULT_THRESHOLD_VOLTS,
            last_port: None,
            history_points: DEFAULT_CAPACITY,
        }
    }
}

impl MonitorConfig {
    /// Load config from the default location, falling back to defaults when
    /// no file exists yet
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = super::config_dir()
            .ok_or("Could not determine config directory")?
            .join("config.toml");
        Self::load_from(&config_path)
    }

    /// Load config from an explicit path
    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let config_path = super::config_dir()
            .ok_or("Could not determine config directory")?
            .join("config.toml");
        self.save_to(&config_path)
    }

    /// Save config to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Build a session configuration for the given port from these defaults
    pub fn session_config(&self, port_name: &str) -> SessionConfig {
        SessionConfig::new(port_name, self.baud_rate)
            .parse_mode(self.parse_mode)
            .threshold_volts(self.threshold_volts)
    }
}
