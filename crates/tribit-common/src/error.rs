//! Error types for tribit.

use thiserror::Error;

/// Result type alias using TribitError.
pub type Result<T> = std::result::Result<T, TribitError>;

/// Errors that can occur in tribit operations.
#[derive(Debug, Error)]
pub enum TribitError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    // Page store errors
    #[error("Page not found: {page}")]
    PageNotFound { page: u32 },

    #[error("Page corrupted: {page}, reason: {reason}")]
    PageCorrupted { page: u32, reason: String },

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Invalid page handle: {0}")]
    InvalidHandle(u32),

    // Bitmap errors
    #[error("Bad bitmap signature in root page {page}")]
    BadSignature { page: u32 },

    #[error("Encoding mismatch: bitmap nullable = {nullable}")]
    EncodingMismatch { nullable: bool },

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}
