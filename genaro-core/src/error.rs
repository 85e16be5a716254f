//! Error types for Genaro
//!
//! One variant per failure kind the transfer engine can surface. The
//! `Display` strings are stable and are what callers see in `Fail` events.

use std::sync::Arc;
use thiserror::Error;

/// Result type alias for Genaro operations
pub type Result<T> = std::result::Result<T, GenaroError>;

/// Unified error type for Genaro
#[derive(Error, Debug, Clone)]
pub enum GenaroError {
    // ===== Bridge Errors =====
    #[error("Bridge request error")]
    BridgeRequest,

    #[error("Bridge request authorization error")]
    BridgeAuth,

    #[error("Bridge request pointer error")]
    BridgePointer,

    #[error("Bridge request replace pointer error")]
    BridgeReplacePointer,

    #[error("Bridge request timeout error")]
    BridgeTimeout,

    #[error("Bridge request internal error")]
    BridgeInternal,

    #[error("Bridge rate limit error")]
    BridgeRateLimit,

    #[error("Bucket is not found")]
    BucketNotFound,

    #[error("File is not found")]
    FileNotFound,

    #[error("File already exists")]
    FileAlreadyExists,

    #[error("Unable to receive storage offer")]
    BridgeOffer,

    #[error("Unexpected JSON response")]
    BridgeJson,

    #[error("Bridge file info error")]
    BridgeFileInfo,

    #[error("Bridge frame request error")]
    BridgeFrame,

    // ===== Farmer Errors =====
    #[error("Farmer request error")]
    FarmerRequest,

    #[error("Farmer exhausted error")]
    FarmerExhausted,

    #[error("Farmer request timeout error")]
    FarmerTimeout,

    #[error("Farmer request authorization error")]
    FarmerAuth,

    #[error("Farmer request integrity error")]
    FarmerIntegrity,

    // ===== File Errors =====
    #[error("File integrity error")]
    FileIntegrity,

    #[error("File read error")]
    FileRead,

    #[error("File write error")]
    FileWrite,

    #[error("File encryption error")]
    FileEncryption,

    #[error("File decryption error")]
    FileDecryption,

    #[error("File size error")]
    FileSize,

    #[error("File missing shard error")]
    FileShardMissing,

    #[error("File recover error")]
    FileRecover,

    #[error("File create parity error")]
    FileParity,

    #[error("File unsupported erasure code error: {0}")]
    UnsupportedErasure(String),

    // ===== Control Flow =====
    #[error("File transfer canceled")]
    TransferCanceled,

    // ===== Local Failures =====
    #[error("Algorithm error")]
    Algorithm,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Unknown error")]
    Unknown,
}

impl GenaroError {
    /// User-initiated cancellation, never reported as a failure
    pub fn is_canceled(&self) -> bool {
        matches!(self, GenaroError::TransferCanceled)
    }

    /// Transient bridge conditions worth repeating the same request for.
    /// Farmer failures are handled by replacing the farmer instead.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenaroError::BridgeTimeout | GenaroError::BridgeRateLimit | GenaroError::BridgeInternal
        )
    }

    /// Errors that end an operation immediately, without consulting retry budgets
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GenaroError::BridgeAuth
                | GenaroError::BucketNotFound
                | GenaroError::FileNotFound
                | GenaroError::FileAlreadyExists
                | GenaroError::UnsupportedErasure(_)
                | GenaroError::Algorithm
                | GenaroError::FileIntegrity
        )
    }
}

impl From<std::io::Error> for GenaroError {
    fn from(err: std::io::Error) -> Self {
        GenaroError::Io(Arc::new(err))
    }
}

impl From<reed_solomon_erasure::Error> for GenaroError {
    fn from(err: reed_solomon_erasure::Error) -> Self {
        match err {
            reed_solomon_erasure::Error::TooFewShardsPresent => GenaroError::FileIntegrity,
            _ => GenaroError::FileRecover,
        }
    }
}

impl From<serde_json::Error> for GenaroError {
    fn from(_: serde_json::Error) -> Self {
        GenaroError::BridgeJson
    }
}
