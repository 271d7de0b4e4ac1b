//! Configuration Loader
//!
//! Layers configuration sources with the `config` crate: built-in defaults,
//! then an optional file (format chosen by extension), then environment
//! variables such as `OUTBOX__POOL__MAX_POOL_SIZE=20`.

use super::error::{ConfigResult, ConfigurationError};
use super::OutboxConfig;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Searched without extension; any format supported by `config` is accepted
const DEFAULT_CONFIG_BASENAME: &str = "config/outbox";
const DEFAULT_ENV_PREFIX: &str = "OUTBOX";

/// Loaded and validated configuration plus the context it was loaded in
#[derive(Debug)]
pub struct ConfigManager {
    config: OutboxConfig,
    environment: String,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_path_with_prefix(None, DEFAULT_ENV_PREFIX)
    }

    /// Load configuration from a specific file; the file must exist
    pub fn load_from_path(path: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_path_with_prefix(Some(path.as_ref()), DEFAULT_ENV_PREFIX)
    }

    /// Load configuration reading environment overrides under a custom prefix
    ///
    /// Useful for tests that must not observe the process-wide `OUTBOX__*`
    /// variables.
    pub fn load_from_path_with_prefix(
        path: Option<&Path>,
        env_prefix: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();

        debug!(
            environment = %environment,
            path = ?path,
            env_prefix = env_prefix,
            "Loading outbox configuration"
        );

        let config = Self::build_config(path, env_prefix)?;
        config.validate()?;

        info!(
            environment = %environment,
            host_address = %config.broker.host_address_redacted(),
            exchange = %config.broker.exchange_name,
            max_pool_size = config.pool.max_pool_size,
            max_retries = config.retry.max_retries,
            "⚙️ Outbox configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            config_path: path.map(Path::to_path_buf),
        }))
    }

    /// Wrap an already constructed configuration after validating it
    pub fn from_config(config: OutboxConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_path: None,
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Detect the current environment from environment variables
    pub fn detect_environment() -> String {
        env::var("OUTBOX_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn build_config(path: Option<&Path>, env_prefix: &str) -> ConfigResult<OutboxConfig> {
        let defaults = config::Config::try_from(&OutboxConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        builder = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigurationError::ConfigFileNotFound {
                        path: path.to_path_buf(),
                    });
                }
                builder.add_source(config::File::from(path.to_path_buf()))
            }
            None => builder
                .add_source(config::File::with_name(DEFAULT_CONFIG_BASENAME).required(false)),
        };

        let settings = builder
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize::<OutboxConfig>()?)
    }
}
