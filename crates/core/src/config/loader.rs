//! Configuration file loader for the `.agentflow/` directory.

use crate::config::error::ConfigError;
use crate::config::error::ConfigResult;
use crate::config::models::AppConfig;
use std::path::{Path, PathBuf};

/// Name of the per-project directory holding config and state.
pub const CONFIG_DIR: &str = ".agentflow";

/// Loads configuration from `<root>/.agentflow/config.toml`.
///
/// A missing directory or file yields [`AppConfig::default`]. A relative
/// `storage.data_dir` is resolved against `root`.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read, is not
/// valid TOML, or holds out-of-range values.
///
/// # Example
///
/// ```rust,no_run
/// use af_core::config::loader::load_config;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new(".")).await?;
/// println!("Service at {}", config.service.base_url);
/// # Ok(())
/// # }
/// ```
pub async fn load_config(root: &Path) -> ConfigResult<AppConfig> {
    let config_path = root.join(CONFIG_DIR).join("config.toml");

    let mut config = if config_path.exists() {
        let content = tokio::fs::read_to_string(&config_path)
            .await
            .map_err(|source| ConfigError::FileRead {
                path: config_path.clone(),
                source,
            })?;

        toml::from_str::<AppConfig>(&content).map_err(|source| ConfigError::TomlParse {
            path: config_path.clone(),
            source,
        })?
    } else {
        AppConfig::default()
    };

    validate(&config, &config_path)?;

    config.storage.data_dir = Some(resolve_data_dir(root, config.storage.data_dir.take()));
    Ok(config)
}

fn validate(config: &AppConfig, path: &Path) -> ConfigResult<()> {
    let invalid = |reason: &str| ConfigError::InvalidConfig {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if config.pipeline.max_attempts == 0 {
        return Err(invalid("pipeline.max_attempts must be at least 1"));
    }
    if config.pipeline.history_capacity == 0 {
        return Err(invalid("pipeline.history_capacity must be at least 1"));
    }
    if config.evaluator.poll_interval_ms == 0 {
        return Err(invalid("evaluator.poll_interval_ms must be positive"));
    }
    Ok(())
}

fn resolve_data_dir(root: &Path, configured: Option<PathBuf>) -> PathBuf {
    match configured {
        Some(dir) if dir.is_absolute() => dir,
        Some(dir) => root.join(dir),
        None => root.join(CONFIG_DIR).join("state"),
    }
}
