//! Access-control error model.

use thiserror::Error;

/// Result type used across the engine.
pub type AccessResult<T> = Result<T, AccessError>;

/// Engine-level error.
///
/// Callers receive either a complete permission list or one of these; there is
/// no partial result on failure.
#[derive(Debug, Error)]
pub enum AccessError {
    /// Malformed role, action, scope or identifier.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A requested role or required membership does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Failure reported by the permission store, surfaced unmodified.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AccessError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Permission store operation error.
///
/// These are infrastructure errors raised by a store adapter. The engine never
/// inspects or rewrites them.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid store query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}
