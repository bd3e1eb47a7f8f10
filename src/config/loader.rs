/// Configuration loading from TOML file with environment overrides
use std::path::Path;
use tracing::debug;

use super::ENV_PREFIX;
use crate::error::{Result, TrackerError};
use crate::types::{AccountConfig, Config};

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let settings = config::Config::builder()
        .add_source(config::File::from(path).format(config::FileFormat::Toml))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| TrackerError::ConfigError(format!("Failed to read config file: {}", e)))?;

    let mut config: Config = settings
        .try_deserialize()
        .map_err(|e| TrackerError::ConfigError(format!("Failed to parse config: {}", e)))?;

    config.base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    validate_config(&config)?;

    debug!(
        "Loaded config from {} ({} accounts)",
        path.display(),
        config.accounts.len()
    );
    Ok(config)
}

/// Every account needs a name and both API credentials
pub fn validate_accounts(accounts: &[AccountConfig]) -> Result<()> {
    let missing: Vec<&str> = accounts
        .iter()
        .filter(|a| a.name.is_empty() || a.api_key.is_empty() || a.api_secret.is_empty())
        .map(|a| if a.name.is_empty() { "<unknown>" } else { a.name.as_str() })
        .collect();

    if !missing.is_empty() {
        return Err(TrackerError::ConfigError(format!(
            "Missing API credentials for accounts: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

fn validate_config(config: &Config) -> Result<()> {
    if config.timeouts.auto_refresh_interval_seconds == 0 {
        return Err(TrackerError::ConfigError(
            "auto_refresh_interval_seconds must be > 0".to_string(),
        ));
    }

    if !config.server.callback_path.starts_with('/') {
        return Err(TrackerError::ConfigError(format!(
            "callback_path must start with '/': {}",
            config.server.callback_path
        )));
    }

    let mut names: Vec<&str> = config.accounts.iter().map(|a| a.name.as_str()).collect();
    names.sort_unstable();
    if names.windows(2).any(|w| w[0] == w[1] && !w[0].is_empty()) {
        return Err(TrackerError::ConfigError(
            "account names must be unique".to_string(),
        ));
    }

    Ok(())
}
