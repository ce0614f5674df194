//! Domain-level error type shared across the workspace.

use crate::types::DbId;

/// Errors produced by domain logic in this crate and its consumers.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Input failed a validation rule.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    /// The operation conflicts with current state (e.g. a sync run is
    /// already in progress).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}
