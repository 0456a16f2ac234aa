//! Configuration for the speaches gateway
//!
//! Settings come from the process environment (`SPEACHES_*` keys), plus
//! the HuggingFace cache variables (`HF_HUB_CACHE`, `HF_HUB_OFFLINE`) and
//! a JSON model-alias file loaded once at startup.

pub mod aliases;
pub mod settings;

pub use aliases::ModelAliases;
pub use settings::Settings;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Environment(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("failed to parse alias file {path}: {message}")]
    AliasFile { path: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Environment(err.to_string())
    }
}
