//! Engine error taxonomy.
//!
//! Validation and authorization errors are surfaced synchronously to the
//! caller and must not partially mutate state. Background passes catch
//! per-item errors, log them, and carry on; see the sweep and deletion
//! processor in `eventline-engine`.

use crate::ids::{EventId, UserId};
use crate::store::RecordStoreError;
use thiserror::Error;

/// Errors surfaced by engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A referenced record is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// A registration already exists for this (event, user) pair.
    #[error("user {user_id} is already registered for event {event_id}")]
    AlreadyRegistered {
        /// The event the duplicate targets.
        event_id: EventId,
        /// The user who already holds a registration.
        user_id: UserId,
    },

    /// Operating on a terminal/already-resolved request, or an illegal
    /// status transition.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Input failed validation (missing mandatory reason, end before start,
    /// non-positive capacity).
    #[error("validation error: {0}")]
    Validation(String),

    /// The acting user lacks the required role.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Lost a capacity race or attempted a duplicate schedule.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The record store failed underneath the operation.
    #[error(transparent)]
    Store(#[from] RecordStoreError),
}

impl EngineError {
    /// Convenience constructor for [`EngineError::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Convenience constructor for [`EngineError::InvalidState`].
    pub fn invalid_state(why: impl Into<String>) -> Self {
        Self::InvalidState(why.into())
    }

    /// Convenience constructor for [`EngineError::Validation`].
    pub fn validation(why: impl Into<String>) -> Self {
        Self::Validation(why.into())
    }
}
