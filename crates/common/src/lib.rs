//! Peerlink Common Library
//!
//! Shared error taxonomy, SQLite store and configuration for the Peerlink
//! service.

pub mod config;
pub mod db;
pub mod error;

// Re-export commonly used types
pub use config::{AuthMode, ServiceConfig};
pub use db::Database;
pub use error::{Error, Result};

/// Peerlink version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".peerlink")
}

/// Default database path
pub fn default_db_path() -> std::path::PathBuf {
    default_store_path().join("state.db")
}

/// Current time as epoch milliseconds
pub fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
