//! Storage abstraction for Murmur.
//!
//! This module provides a pluggable durable-store layer that abstracts
//! the backing service (a hosted document store in production, a mock
//! for testing). All writes are confirming writes: the engine has
//! already applied the mutation speculatively, and the store's answer
//! decides whether it sticks.
//!
//! # Design
//!
//! The trait is async and request/response-oriented:
//! - `insert_message()` persists a send, keyed by its pending id for
//!   idempotent replay
//! - `update_message()` persists edits, deletes, pins, and reactions as
//!   full-payload writes
//! - `fetch_messages()` / `fetch_conversations()` hydrate state on open
//! - `search_messages()` serves cross-conversation search

mod mock;

pub use mock::MockStorage;

use async_trait::async_trait;
use murmur_types::{ChatError, Conversation, ConversationId, Message, UserId};
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store could not be reached; safe to retry.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The store refused the write; retrying will not help.
    #[error("storage rejected the request: {0}")]
    Rejected(String),

    /// The store connection is gone for good.
    #[error("storage closed")]
    Closed,
}

impl StorageError {
    /// Whether the failed request should be retried automatically.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<StorageError> for ChatError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable(msg) => ChatError::Transient(msg),
            StorageError::Rejected(msg) => ChatError::Conflict(msg),
            StorageError::Closed => ChatError::Closed,
        }
    }
}

/// Durable store for messages and conversation summaries.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Load the full message set for a conversation.
    async fn fetch_messages(&self, conversation: ConversationId)
        -> Result<Vec<Message>, StorageError>;

    /// Persist an outbound send and return the confirmed message.
    ///
    /// The pending id in `message.key` doubles as an idempotency key: a
    /// replayed insert for an already-persisted pending id must return
    /// the original confirmed message, not create a second row.
    async fn insert_message(&self, message: &Message) -> Result<Message, StorageError>;

    /// Persist a mutation of an existing message as a full-payload write.
    async fn update_message(&self, message: &Message) -> Result<(), StorageError>;

    /// Load the conversation summaries visible to a user.
    async fn fetch_conversations(&self, user: UserId) -> Result<Vec<Conversation>, StorageError>;

    /// Persist conversation-level flags (pinned, muted, archived,
    /// read watermark).
    async fn update_conversation(&self, conversation: &Conversation) -> Result<(), StorageError>;

    /// Case-insensitive substring search across all of a user's
    /// conversations, newest first, capped at `limit`.
    async fn search_messages(
        &self,
        user: UserId,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError>;
}
