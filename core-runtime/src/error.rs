use thiserror::Error;

/// Errors raised while setting up the runtime (configuration, logging).
#[derive(Error, Debug)]
pub enum Error {
    /// A tunable is out of range or a setting is malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required host bridge was not provided and no default exists.
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
