pub mod loader;

pub use loader::{load_config, validate_accounts};

/// Default config location, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Session cache file, stored next to the config file
pub const SESSION_CACHE_FILENAME: &str = ".session_cache.json";

/// Prefix for environment overrides (`PORTFOLIO__TIMEOUTS__AUTO_REFRESH_INTERVAL_SECONDS=30`)
pub const ENV_PREFIX: &str = "PORTFOLIO";
