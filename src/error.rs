//! Error types for feedcourier
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Feed, Delivery, Config, etc.)
//! - A [`DatabaseError`] sub-enum for persistence failures
//! - A crate-wide [`Result`] alias

use thiserror::Error;

/// Result type alias for feedcourier operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for feedcourier
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "database_path")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Feed fetch or parse error
    #[error("feed error: {0}")]
    Feed(String),

    /// Message rendering error
    #[error("render error: {0}")]
    Render(String),

    /// Delivery failed for every recipient of every entry in a batch
    #[error("delivery error: {0}")]
    Delivery(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Subscription not found
    #[error("subscription not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not starting new work
    #[error("shutdown in progress: not starting new work")]
    ShuttingDown,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}
