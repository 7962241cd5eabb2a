//! Mock storage for testing.
//!
//! Allows seeding server-side state, scripting failures, and capturing
//! writes for verification.

use super::{Storage, StorageError};
use async_trait::async_trait;
use murmur_types::{
    Conversation, ConversationId, DeliveryState, Message, MessageId, MessageKey, PendingId,
    UserId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock storage for testing.
///
/// Allows seeding server-side state, scripting failures, and capturing
/// writes for verification.
#[derive(Debug, Default)]
pub struct MockStorage {
    inner: Arc<Mutex<MockStorageInner>>,
}

#[derive(Debug)]
struct MockStorageInner {
    messages: HashMap<ConversationId, Vec<Message>>,
    conversations: Vec<Conversation>,
    inserted_by_pending: HashMap<PendingId, Message>,
    clock: u64,
    insert_delay: Option<std::time::Duration>,
    update_delay: Option<std::time::Duration>,
    fail_inserts: u32,
    fail_next_fetch: Option<String>,
    fail_next_update: Option<String>,
    reject_next_insert: Option<String>,
    insert_attempts: u32,
    updated_messages: Vec<Message>,
    updated_conversations: Vec<Conversation>,
}

impl Default for MockStorageInner {
    fn default() -> Self {
        Self {
            messages: HashMap::new(),
            conversations: Vec::new(),
            inserted_by_pending: HashMap::new(),
            clock: 1_000,
            insert_delay: None,
            update_delay: None,
            fail_inserts: 0,
            fail_next_fetch: None,
            fail_next_update: None,
            reject_next_insert: None,
            insert_attempts: 0,
            updated_messages: Vec::new(),
            updated_conversations: Vec::new(),
        }
    }
}

impl MockStorage {
    /// Create a new mock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a confirmed message into the server-side state.
    pub fn seed_message(&self, message: Message) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .messages
            .entry(message.conversation_id)
            .or_default()
            .push(message);
    }

    /// Seed a conversation summary.
    pub fn seed_conversation(&self, conversation: Conversation) {
        let mut inner = self.inner.lock().unwrap();
        inner.conversations.push(conversation);
    }

    /// Set the server clock used to timestamp confirmed inserts.
    pub fn set_clock(&self, at: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.clock = at;
    }

    /// Delay every insert by the given duration before it is answered.
    /// Simulates a slow or unresponsive backend.
    pub fn delay_inserts(&self, delay: std::time::Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.insert_delay = Some(delay);
    }

    /// Delay every message update by the given duration before it is
    /// answered.
    pub fn delay_updates(&self, delay: std::time::Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.update_delay = Some(delay);
    }

    /// Cause the next `count` insert attempts to fail as transient.
    pub fn fail_next_inserts(&self, count: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_inserts = count;
    }

    /// Cause the next insert attempt to be rejected outright.
    pub fn reject_next_insert(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.reject_next_insert = Some(error.to_string());
    }

    /// Cause the next fetch (messages or conversations) to fail.
    pub fn fail_next_fetch(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_fetch = Some(error.to_string());
    }

    /// Cause the next message or conversation update to fail as transient.
    pub fn fail_next_update(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_update = Some(error.to_string());
    }

    /// Total insert attempts observed, failed ones included.
    pub fn insert_attempts(&self) -> u32 {
        self.inner.lock().unwrap().insert_attempts
    }

    /// Full-payload message writes received, in order.
    pub fn updated_messages(&self) -> Vec<Message> {
        self.inner.lock().unwrap().updated_messages.clone()
    }

    /// Conversation flag writes received, in order.
    pub fn updated_conversations(&self) -> Vec<Conversation> {
        self.inner.lock().unwrap().updated_conversations.clone()
    }

    /// Confirmed messages currently stored for a conversation.
    pub fn stored_messages(&self, conversation: ConversationId) -> Vec<Message> {
        self.inner
            .lock()
            .unwrap()
            .messages
            .get(&conversation)
            .cloned()
            .unwrap_or_default()
    }
}

impl Clone for MockStorage {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn fetch_messages(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<Message>, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_fetch.take() {
            return Err(StorageError::Unavailable(error));
        }
        Ok(inner.messages.get(&conversation).cloned().unwrap_or_default())
    }

    async fn insert_message(&self, message: &Message) -> Result<Message, StorageError> {
        let delay = self.inner.lock().unwrap().insert_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.insert_attempts += 1;

        if let Some(error) = inner.reject_next_insert.take() {
            return Err(StorageError::Rejected(error));
        }
        if inner.fail_inserts > 0 {
            inner.fail_inserts -= 1;
            return Err(StorageError::Unavailable("connection reset".into()));
        }

        let pending_id = match message.key {
            MessageKey::Local(id) => id,
            MessageKey::Durable(_) => {
                return Err(StorageError::Rejected("insert of a durable id".into()))
            }
        };
        // Idempotent replay returns the original confirmed row.
        if let Some(existing) = inner.inserted_by_pending.get(&pending_id) {
            return Ok(existing.clone());
        }

        let mut confirmed = message.clone();
        confirmed.key = MessageKey::Durable(MessageId::new());
        confirmed.created_at = Some(inner.clock);
        confirmed.delivery = DeliveryState::Confirmed;
        inner.clock += 1;

        inner
            .inserted_by_pending
            .insert(pending_id, confirmed.clone());
        inner
            .messages
            .entry(confirmed.conversation_id)
            .or_default()
            .push(confirmed.clone());
        Ok(confirmed)
    }

    async fn update_message(&self, message: &Message) -> Result<(), StorageError> {
        let delay = self.inner.lock().unwrap().update_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_update.take() {
            return Err(StorageError::Unavailable(error));
        }
        if let Some(stored) = inner
            .messages
            .get_mut(&message.conversation_id)
            .and_then(|msgs| msgs.iter_mut().find(|m| m.key == message.key))
        {
            *stored = message.clone();
        }
        inner.updated_messages.push(message.clone());
        Ok(())
    }

    async fn fetch_conversations(
        &self,
        _user: UserId,
    ) -> Result<Vec<Conversation>, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_fetch.take() {
            return Err(StorageError::Unavailable(error));
        }
        Ok(inner.conversations.clone())
    }

    async fn update_conversation(&self, conversation: &Conversation) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_update.take() {
            return Err(StorageError::Unavailable(error));
        }
        if let Some(stored) = inner
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation.id)
        {
            *stored = conversation.clone();
        }
        inner.updated_conversations.push(conversation.clone());
        Ok(())
    }

    async fn search_messages(
        &self,
        _user: UserId,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        let inner = self.inner.lock().unwrap();
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let mut hits: Vec<Message> = inner
            .messages
            .values()
            .flatten()
            .filter(|m| !m.is_deleted() && m.body.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        hits.sort_by_key(|m| std::cmp::Reverse(m.sort_key()));
        hits.truncate(limit);
        Ok(hits)
    }
}
