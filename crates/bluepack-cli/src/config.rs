//! bluepack CLI configuration management
//!
//! Configuration is layered with figment, lowest priority first:
//! - built-in defaults
//! - `bluepack.toml` in the working directory
//! - `~/.bluepack/config.toml`
//! - `BLUEPACK_*` environment variables (`__` separates sections, e.g.
//!   `BLUEPACK_RFCOMM__ADAPTER_NAME=hci1`)
//! - the file given with `--config`
//! - command-line flags

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use bluepack_core::LinkConfig;
use bluepack_rfcomm::RfcommConfig;

const LOCAL_CONFIG_FILE: &str = "bluepack.toml";
const ENV_PREFIX: &str = "BLUEPACK_";

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the bluepack CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Listen, dial and transfer worker settings
    pub link: LinkConfig,

    /// Bluetooth adapter settings
    pub rfcomm: RfcommConfig,

    /// Interactive interface settings
    pub cli: CliConfig,
}

/// CLI-specific configuration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Prompt printed before each input line
    pub prompt: String,

    /// Print connection events while chatting
    pub show_events: bool,

    /// Make the adapter discoverable when listening
    pub make_discoverable: bool,

    /// Default scan duration in seconds
    pub scan_seconds: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            prompt: "bluepack> ".to_string(),
            show_events: true,
            make_discoverable: true,
            scan_seconds: 10,
        }
    }
}

/// Values taken from command-line flags
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub adapter: Option<String>,
}

impl ConfigOverrides {
    fn apply(&self, mut figment: Figment) -> Figment {
        if let Some(adapter) = &self.adapter {
            figment = figment.merge(("rfcomm.adapter_name", adapter.as_str()));
        }
        figment
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from every layer
    pub fn load(explicit: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(LOCAL_CONFIG_FILE));

        if let Some(path) = Self::default_config_path() {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(ConfigError::Loading(format!(
                    "Configuration file {} not found",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        Self::extract(overrides.apply(figment))
    }

    /// Path of the per-user configuration file
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".bluepack").join("config.toml"))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment
            .extract()
            .map_err(|e| ConfigError::Loading(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.link
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.rfcomm.adapter_name.as_deref() == Some("") {
            return Err(ConfigError::Validation(
                "Adapter name must not be empty".to_string(),
            ));
        }

        if self.cli.scan_seconds == 0 {
            return Err(ConfigError::Validation(
                "Scan duration must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to a specific file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::FileSystem(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), toml_string)
            .map_err(|e| ConfigError::FileSystem(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Configuration with every optional setting filled in
    pub fn example() -> Self {
        Self {
            link: LinkConfig::default().with_connect_timeout(Duration::from_secs(15)),
            rfcomm: RfcommConfig::default().with_adapter_name("hci0"),
            cli: CliConfig::default(),
        }
    }

    /// Create example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::example())
            .unwrap_or_else(|_| "# Failed to generate example config".to_string())
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
