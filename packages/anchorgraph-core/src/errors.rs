//! Error types for anchorgraph-core
//!
//! Provides unified error handling across the crate.
//!
//! Recoverable matching misses ("file not found", "no matching function")
//! are *not* errors: they travel as reason strings inside
//! [`MatchRecord`](crate::features::matching::MatchRecord) rows.

use thiserror::Error;

/// Main error type for anchorgraph operations
#[derive(Debug, Error)]
pub enum AnchorError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Match log / storage error
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Control-flow shape the traversal engine does not model (try/catch)
    #[error("Unsupported control construct: {0}")]
    UnsupportedConstruct(String),

    /// Inconsistent answer from the graph store (missing node, dangling edge)
    #[error("Graph query error: {0}")]
    GraphQuery(String),
}

impl AnchorError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        AnchorError::Config(msg.into())
    }

    /// Create a graph query error
    pub fn graph_query(msg: impl Into<String>) -> Self {
        AnchorError::GraphQuery(msg.into())
    }

    /// Create an unsupported-construct error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        AnchorError::UnsupportedConstruct(msg.into())
    }
}

/// Result type alias for anchorgraph operations
pub type Result<T> = std::result::Result<T, AnchorError>;
