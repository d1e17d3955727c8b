//! Error types for engine setup
//!
//! Nothing on the ingress path returns these: failed syscalls, unknown
//! descriptors and bad samples are dropped where they arrive. Only setup-time
//! operations (configuration, starting the analysis worker) are fallible.

use thiserror::Error;

/// Errors surfaced by configuration and engine lifecycle operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {key} = {value} ({reason})")]
    InvalidConfig {
        key: &'static str,
        value: i64,
        reason: &'static str,
    },

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to render configuration: {0}")]
    ConfigRender(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine already started; {0} must be called before start()")]
    AlreadyStarted(&'static str),

    #[error("Failed to spawn analysis worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

/// Result type for engine setup operations
pub type Result<T> = std::result::Result<T, Error>;
