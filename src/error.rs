//! Error types for sensorbridge

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// sensorbridge error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration parsed but is not usable
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// A payload could not be serialised or delivered
    #[error("Publish error: {0}")]
    Publish(String),

    /// The device session has already stopped
    #[error("Session closed")]
    SessionClosed,

    /// No configuration entry for the device
    #[error("Unknown device: {0}")]
    UnknownDevice(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Publish(e.to_string())
    }
}
