//! Application configuration.
//!
//! Loaded from an optional YAML file and environment variables.

use std::time::Duration;

use serde::Deserialize;

use crate::bus::BusConfig;
use crate::registration::{EmptyIdentifier, ServiceIdentifier};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "nameclaim.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "NAMECLAIM_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "NAMECLAIM";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "NAMECLAIM_LOG";

/// Well-known name claimed when none is configured.
pub const DEFAULT_SERVICE_NAME: &str = "com.example.testservice1";
/// How long the name is held before release, in milliseconds.
pub const DEFAULT_HOLD_MS: u64 = 10_000;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service identity and hold period.
    pub service: ServiceConfig,
    /// Bus selection.
    pub bus: BusConfig,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Well-known name to claim.
    pub name: String,
    /// Hold period in milliseconds.
    pub hold_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SERVICE_NAME.to_string(),
            hold_ms: DEFAULT_HOLD_MS,
        }
    }
}

impl ServiceConfig {
    pub fn identifier(&self) -> Result<ServiceIdentifier, EmptyIdentifier> {
        ServiceIdentifier::new(self.name.clone())
    }

    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `nameclaim.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
