use thiserror::Error;

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error while encoding or decoding a wire message
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Shelf index beyond the current shelf count
    #[error("Shelf index {index} out of range (count {count})")]
    OutOfRange { index: usize, count: usize },

    /// Link open/read/write failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation requires an open link
    #[error("Link is not open")]
    NotConnected,

    /// Undecodable or structurally invalid telemetry
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Operator command could not be queued
    #[error("Command queue error: {0}")]
    Queue(String),
}

/// Convenient alias over [`Result`] using [`MonitorError`]
pub type Result<T> = std::result::Result<T, MonitorError>;
