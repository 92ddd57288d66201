//! Error taxonomy for the Secure-Sync pipeline.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecureSyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("transient network error: {0}")]
    Transient(String),

    #[error("file sink error: {0}")]
    FileSink(String),

    #[error("message formatting error: {0}")]
    MessageFormat(String),
}

pub type Result<T> = std::result::Result<T, SecureSyncError>;
