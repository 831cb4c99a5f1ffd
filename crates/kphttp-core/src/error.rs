//! Error types for the KeePassHTTP core library.

use kphttp_crypto::CryptoError;
use thiserror::Error;

/// Result type alias using the core `Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for protocol handling.
///
/// Authentication failures and user cancellations are not errors; they are
/// ordinary protocol outcomes. Everything here is unexpected and ends up in
/// `Response.Error`.
#[derive(Debug, Error)]
pub enum Error {
    /// Cipher or codec failure
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Credential store failure
    #[error("Credential store error: {0}")]
    Store(String),

    /// Approval prompt failure
    #[error("Approval prompt error: {0}")]
    Prompt(String),

    /// A field required by the command was not sent
    #[error("Missing request field: {0}")]
    MissingField(&'static str),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The client sent an incomplete request. Not reported as a bug.
    pub const fn is_client_fault(&self) -> bool {
        matches!(self, Self::MissingField(_))
    }
}
