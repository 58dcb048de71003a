//! Error types for the engram memory store

use thiserror::Error;

use crate::snapshot::Layer;

/// Errors that can occur in the memory store
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Engine used before `start` completed
    #[error("memory engine is not initialized")]
    NotInitialized,

    /// Caller-supplied input was unusable (empty text, zero limit, ...)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Feature supplier failure; aborts the whole call with no fan-out applied
    #[error("feature extraction failed: {0}")]
    FeatureExtraction(String),

    /// A deadline expired mid-call; `applied` lists the index writes that
    /// completed before expiry (each one atomic on its own)
    #[error("deadline expired; layers applied: {applied:?}")]
    Timeout { applied: Vec<Layer> },

    /// Configuration rejected at startup
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A consolidation pass failed; retried on the next scheduled run
    #[error("consolidation failed: {0}")]
    Consolidation(String),

    /// Snapshot store failure; the engine keeps serving from memory
    #[error("snapshot store error: {0}")]
    Snapshot(#[from] anyhow::Error),

    /// Snapshot blob encode/decode error
    #[error("snapshot codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MemoryError {
    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a feature extraction error
    pub fn feature_extraction(msg: impl Into<String>) -> Self {
        Self::FeatureExtraction(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a consolidation error
    pub fn consolidation(msg: impl Into<String>) -> Self {
        Self::Consolidation(msg.into())
    }
}

/// Result type for memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;
