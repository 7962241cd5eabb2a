//! Error taxonomy for the sync engine.
//!
//! Transient and conflict errors are handled internally by the store and
//! reconciler (rollback / remote-wins); only validation, authorization,
//! and unknown-reference failures surface to callers for user-visible
//! handling. Send exhaustion surfaces through the message's delivery
//! state rather than an error.

use thiserror::Error;

/// Errors surfaced by the Murmur engine.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The input was rejected before anything mutated (e.g. empty send).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The caller is not permitted to perform this mutation
    /// (e.g. editing another author's message). Rejected locally,
    /// never sent.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The mutation conflicts with remote state (e.g. editing a message
    /// already tombstoned remotely). Remote state wins.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A network-level failure; safe to retry with backoff.
    #[error("transient network error: {0}")]
    Transient(String),

    /// The referenced message is not in the timeline.
    #[error("unknown message: {0}")]
    UnknownMessage(String),

    /// The referenced pending record has already been resolved or discarded.
    #[error("unknown pending record: {0}")]
    UnknownPending(String),

    /// The referenced conversation is not in the client's list.
    #[error("unknown conversation: {0}")]
    UnknownConversation(String),

    /// The conversation handle has been closed; no further mutations.
    #[error("conversation closed")]
    Closed,
}

impl ChatError {
    /// Whether this error should be retried automatically.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
