//! Configuration Loader
//!
//! Environment-aware loading: serde defaults, an optional TOML file from
//! `MIGRATOR_CONFIG_PATH` (default `config/migrator.toml`), then
//! `MIGRATOR__SECTION__FIELD` environment overrides.

use super::error::{ConfigResult, ConfigurationError};
use super::MigratorConfig;
use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const CONFIG_PATH_VAR: &str = "MIGRATOR_CONFIG_PATH";
const ENV_PREFIX: &str = "MIGRATOR";
const DEFAULT_CONFIG_PATH: &str = "config/migrator.toml";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: MigratorConfig,
    environment: String,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let path = std::env::var(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from_path(&path)
    }

    /// Load configuration from a specific file; a missing file falls back to defaults
    pub fn load_from_path(path: &Path) -> ConfigResult<Arc<ConfigManager>> {
        let environment = detect_environment();

        debug!(
            "Loading configuration for environment '{}' from: {}",
            environment,
            path.display()
        );

        let settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::LoadFailed {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;

        let config: MigratorConfig = settings.try_deserialize()?;
        config.validate()?;

        info!(
            environment = %environment,
            config_path = %path.display(),
            broker = %redact_url(&config.broker.url),
            store = %config.store.base_url,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            config_path: path.to_path_buf(),
        }))
    }

    /// Parse configuration from an in-memory TOML document
    pub fn from_toml_str(contents: &str) -> ConfigResult<MigratorConfig> {
        let config: MigratorConfig = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

/// Current environment name (`MIGRATOR_ENV`, then `APP_ENV`, default `development`)
pub fn detect_environment() -> String {
    std::env::var("MIGRATOR_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Strip credentials from a connection URL before it is logged
pub fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}***{}", &url[..scheme_end + 3], &url[at..])
        }
        _ => url.to_string(),
    }
}
