use thiserror::Error;
use uuid::Uuid;

use super::types::MessageState;
use crate::store::StoreError;

/// Errors raised by message creation and lifecycle transitions.
#[derive(Debug, Error)]
pub enum MessageError {
    /// Malformed payload, rejected before queueing and never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Same fingerprint as a stored message but a different payload
    #[error("Duplicate message {hash} conflicts with existing message {existing}")]
    DuplicateConflict { hash: String, existing: Uuid },

    /// The requested transition is not allowed from the current state
    #[error("Invalid transition for message {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: MessageState,
        to: MessageState,
    },

    #[error("Message not found: {0}")]
    NotFound(Uuid),

    /// Persistence failure, propagated to the caller
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MessageError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether repeating the operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, MessageError::Store(StoreError::Unavailable(_)))
    }
}
