//! Error types for Peerlink

use thiserror::Error;

/// Result type alias using Peerlink Error
pub type Result<T> = std::result::Result<T, Error>;

/// Peerlink error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Link expired")]
    Expired,

    #[error("Link usage limit exceeded")]
    UsageExceeded,

    #[error("User already approved")]
    AlreadyApproved,

    #[error("Access request already pending")]
    RequestAlreadyPending,

    #[error("Upstream panel unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Malformed upstream response: {0}")]
    MalformedUpstreamResponse(String),

    #[error("Invalid configuration format: {0}")]
    InvalidConfigFormat(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
