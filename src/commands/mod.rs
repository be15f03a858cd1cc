pub mod id;
pub mod lock;
pub mod serve;

use anyhow::{Context, Result};
use std::path::Path;

use servbase::config::ServiceConfig;

// Re-export command functions for convenience
pub use id::next_id;
pub use lock::hold_lock;
pub use serve::serve;

/// Config from `path` when given, otherwise from the environment
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    let config = match path {
        Some(path) => ServiceConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ServiceConfig::from_env().context("Failed to load config from environment")?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
