//! Configuration Loader
//!
//! Environment-aware layered loading: compiled defaults, `jobflow.toml`, the
//! `jobflow.<env>.toml` overlay, then `JOBFLOW__SECTION__KEY` environment variables.

use super::error::{ConfigResult, ConfigurationError};
use super::EngineConfig;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const BASE_FILE: &str = "jobflow.toml";
const ENV_PREFIX: &str = "JOBFLOW";

/// Loaded configuration together with where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: EngineConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::build(&config_directory, environment)?;
        config.validate()?;

        crate::log_config!(info, "Configuration loaded successfully",
            environment: environment,
            workers: config.executor.workers,
            sla_capacity: config.sla.capacity
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Load a single explicit file on top of the defaults, no environment overlay
    pub fn load_from_file(path: &Path) -> ConfigResult<Arc<ConfigManager>> {
        if !path.is_file() {
            return Err(ConfigurationError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config: EngineConfig = Config::builder()
            .add_source(Config::try_from(&EngineConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;

        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }))
    }

    /// Wrap an already-built configuration
    pub fn from_config(config: EngineConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: PathBuf::from("config"),
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect current environment from `JOBFLOW_ENV`, defaulting to development
    pub fn detect_environment() -> String {
        env::var("JOBFLOW_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn build(config_directory: &Path, environment: &str) -> ConfigResult<EngineConfig> {
        let base = config_directory.join(BASE_FILE);
        let overlay = config_directory.join(format!("jobflow.{environment}.toml"));

        let config = Config::builder()
            .add_source(Config::try_from(&EngineConfig::default())?)
            .add_source(File::from(base).format(FileFormat::Toml).required(false))
            .add_source(File::from(overlay).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
