use thiserror::Error;

/// Errors reported by the model, stream, and builder layers.
///
/// Contract violations inside the inference core (out-of-range labels,
/// backward before forward) are programming errors and panic instead of
/// returning a variant.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Fatal model or builder configuration error.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Malformed or truncated feature stream.
    #[error("feature stream error: {0}")]
    Stream(String),
    /// Caller-supplied structure is invalid for the requested operation.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
