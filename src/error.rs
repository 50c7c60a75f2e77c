//! Error types for recabac

use thiserror::Error;

/// Result type alias for recabac operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for recabac
///
/// Every failure is file-fatal: there are no retries, and partial outputs
/// are discarded by the caller.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The recoded envelope is malformed or inconsistent
    #[error("Envelope error: {0}")]
    Envelope(String),

    /// The external H.264 decoder reported a failure
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// The recode engine lost sync with the original bitstream
    #[error("Recode error: {0}")]
    Recode(String),

    /// Bad command line usage
    #[error("Usage error: {0}")]
    Usage(String),

    /// Unsupported feature or missing backend
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Create an envelope error
    pub fn envelope<S: Into<String>>(msg: S) -> Self {
        Error::Envelope(msg.into())
    }

    /// Create a decoder error
    pub fn decoder<S: Into<String>>(msg: S) -> Self {
        Error::Decoder(msg.into())
    }

    /// Create a recode error
    pub fn recode<S: Into<String>>(msg: S) -> Self {
        Error::Recode(msg.into())
    }

    /// Create a usage error
    pub fn usage<S: Into<String>>(msg: S) -> Self {
        Error::Usage(msg.into())
    }

    /// Create an unsupported error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::Unsupported(msg.into())
    }
}
