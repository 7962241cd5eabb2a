//! The canonical ordered message set for one open conversation.
//!
//! The timeline owns every message currently loaded for a conversation and
//! keeps them totally ordered by `(created_at ?? local_sent_at, id)`. It is
//! pure state: all I/O (outbound writes, the event subscription) lives in
//! murmur-client, which drives this module through a single mutation queue.
//!
//! Identity is dual: speculative messages are keyed by a local
//! [`PendingId`] until the reconcile path confirms them, at which point the
//! entry is re-keyed to its durable id and repositioned by the confirmed
//! timestamp.

use murmur_types::{
    truncate_preview, ChatError, ConversationId, DeliveryState, Draft, Message, MessageId,
    MessageKey, PendingId, SortKey, UserId,
};
use std::collections::{btree_map, BTreeMap, HashMap};

/// Window within which consecutive same-author messages are flagged as
/// grouped for rendering (5 minutes).
pub const GROUP_WINDOW_MS: u64 = 300_000;

/// Window within which an identical `(author, body, attachment)` draft is
/// treated as a duplicate re-submission and collapsed onto the existing
/// pending entry.
pub const DUPLICATE_SEND_WINDOW_MS: u64 = 5_000;

/// Snapshot taken before an optimistic edit, used to roll back on failure.
#[derive(Debug, Clone)]
pub struct EditRollback {
    prior_body: String,
    prior_edited_at: Option<u64>,
}

/// Snapshot taken before an optimistic delete, used to roll back on failure.
#[derive(Debug, Clone)]
pub struct DeleteRollback {
    prior_body: String,
    prior_deleted_at: Option<u64>,
}

/// Summary of the message a reply points at, resolved at view time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyPreview {
    /// Author of the replied-to message.
    pub author_id: UserId,
    /// Body prefix of the replied-to message.
    pub preview: String,
}

/// A message plus derived view annotations. These are computed when the
/// sequence is walked, never stored.
#[derive(Debug, Clone)]
pub struct MessageView<'a> {
    /// The message itself.
    pub message: &'a Message,
    /// Same author as the previous message, within [`GROUP_WINDOW_MS`].
    pub grouped: bool,
    /// First message of a new calendar day; render a date separator.
    pub day_start: bool,
    /// Resolved reply summary, if the target is currently loaded.
    pub reply_preview: Option<ReplyPreview>,
}

/// The ordered message set for one conversation.
#[derive(Debug)]
pub struct Timeline {
    conversation_id: ConversationId,
    entries: BTreeMap<SortKey, Message>,
    by_durable: HashMap<MessageId, SortKey>,
    by_pending: HashMap<PendingId, SortKey>,
}

impl Timeline {
    /// Create an empty timeline for one conversation.
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            entries: BTreeMap::new(),
            by_durable: HashMap::new(),
            by_pending: HashMap::new(),
        }
    }

    /// The conversation this timeline belongs to.
    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Number of messages currently loaded.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the timeline is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a message by durable id.
    pub fn get_durable(&self, id: MessageId) -> Option<&Message> {
        self.by_durable.get(&id).and_then(|k| self.entries.get(k))
    }

    /// Look up a message by pending id.
    pub fn get_pending(&self, id: PendingId) -> Option<&Message> {
        self.by_pending.get(&id).and_then(|k| self.entries.get(k))
    }

    /// Look up a message by either identity.
    pub fn get(&self, key: &MessageKey) -> Option<&Message> {
        match key {
            MessageKey::Local(id) => self.get_pending(*id),
            MessageKey::Durable(id) => self.get_durable(*id),
        }
    }

    fn insert_entry(&mut self, message: Message) -> SortKey {
        let key = message.sort_key();
        match message.key {
            MessageKey::Local(id) => {
                self.by_pending.insert(id, key);
            }
            MessageKey::Durable(id) => {
                self.by_durable.insert(id, key);
            }
        }
        self.entries.insert(key, message);
        key
    }

    fn remove_entry(&mut self, key: SortKey) -> Option<Message> {
        let message = self.entries.remove(&key)?;
        match message.key {
            MessageKey::Local(id) => {
                self.by_pending.remove(&id);
            }
            MessageKey::Durable(id) => {
                self.by_durable.remove(&id);
            }
        }
        Some(message)
    }

    fn durable_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        let key = *self.by_durable.get(&id)?;
        self.entries.get_mut(&key)
    }

    fn pending_mut(&mut self, id: PendingId) -> Option<&mut Message> {
        let key = *self.by_pending.get(&id)?;
        self.entries.get_mut(&key)
    }

    /// Insert a speculative message at the tail of the visible order.
    ///
    /// Rejects unsendable drafts before anything mutates. A re-submission
    /// of an identical `(author, body, attachment)` tuple within
    /// [`DUPLICATE_SEND_WINDOW_MS`] collapses onto the existing pending
    /// entry instead of double-rendering.
    pub fn apply_optimistic(
        &mut self,
        author_id: UserId,
        draft: Draft,
        now: u64,
    ) -> Result<PendingId, ChatError> {
        if !draft.is_sendable() {
            return Err(ChatError::Validation(
                "message needs text or an attachment".into(),
            ));
        }

        for key in self.by_pending.values() {
            if let Some(existing) = self.entries.get(key) {
                if existing.delivery == DeliveryState::Pending
                    && existing.author_id == author_id
                    && existing.body == draft.body
                    && existing.attachment == draft.attachment
                    && now.saturating_sub(existing.local_sent_at) <= DUPLICATE_SEND_WINDOW_MS
                {
                    // Safe: every by_pending entry carries a Local key.
                    return Ok(existing.key.pending().expect("pending entry"));
                }
            }
        }

        let message = Message::pending(self.conversation_id, author_id, draft, now);
        let pending_id = message.key.pending().expect("freshly built pending key");
        self.insert_entry(message);
        Ok(pending_id)
    }

    /// Idempotent upsert of a confirmed remote message.
    ///
    /// Returns `true` if the message was new. A repeated Insert for a known
    /// durable id replaces the payload (remote wins) but never clears an
    /// observed tombstone.
    pub fn insert_remote(&mut self, mut message: Message) -> bool {
        let durable = match message.key.durable() {
            Some(id) => id,
            None => return false, // remote payloads always carry durable ids
        };
        message.delivery = DeliveryState::Confirmed;
        if message.created_at.is_none() {
            message.created_at = Some(message.local_sent_at);
        }

        if let Some(old_key) = self.by_durable.get(&durable).copied() {
            if let Some(existing) = self.remove_entry(old_key) {
                if existing.is_deleted() && !message.is_deleted() {
                    message.deleted_at = existing.deleted_at;
                    message.body = existing.body;
                }
            }
            self.insert_entry(message);
            false
        } else {
            self.insert_entry(message);
            true
        }
    }

    /// Resolve a speculative entry into its confirmed counterpart.
    ///
    /// The pending entry is removed and the confirmed message inserted at
    /// the position given by its server timestamp, so the visible count
    /// changes by exactly zero across the transition. If the pending id is
    /// unknown (already confirmed, or discarded at close) this degrades to
    /// a plain idempotent upsert.
    pub fn confirm(&mut self, pending_id: PendingId, confirmed: Message) -> MessageKey {
        if let Some(old_key) = self.by_pending.get(&pending_id).copied() {
            self.remove_entry(old_key);
        }
        let key = confirmed.key;
        self.insert_remote(confirmed);
        key
    }

    /// Flag a speculative message as failed; it stays visible with a
    /// retry/discard affordance and never silently vanishes.
    pub fn fail_pending(&mut self, pending_id: PendingId) -> Result<(), ChatError> {
        let message = self
            .pending_mut(pending_id)
            .ok_or_else(|| ChatError::UnknownPending(pending_id.to_string()))?;
        message.delivery = DeliveryState::Failed;
        Ok(())
    }

    /// Put a failed message back into the pending state for a retry.
    pub fn retry_pending(&mut self, pending_id: PendingId) -> Result<(), ChatError> {
        let message = self
            .pending_mut(pending_id)
            .ok_or_else(|| ChatError::UnknownPending(pending_id.to_string()))?;
        message.delivery = DeliveryState::Pending;
        Ok(())
    }

    /// Remove a speculative message entirely (user chose discard, or the
    /// conversation is being torn down).
    pub fn discard_pending(&mut self, pending_id: PendingId) -> Option<Message> {
        let key = self.by_pending.get(&pending_id).copied()?;
        self.remove_entry(key)
    }

    /// Apply a remote Update by durable id. Remote state wins wholesale.
    ///
    /// Returns `false` if the target is unknown (out-of-order delivery);
    /// the caller buffers the event for replay. An observed tombstone is
    /// never cleared by a later update.
    pub fn apply_update(&mut self, incoming: &Message) -> bool {
        let durable = match incoming.key.durable() {
            Some(id) => id,
            None => return false,
        };
        let message = match self.durable_mut(durable) {
            Some(m) => m,
            None => return false,
        };
        let was_deleted = message.is_deleted();
        if !was_deleted {
            message.body = incoming.body.clone();
        }
        message.edited_at = incoming.edited_at;
        message.pinned = incoming.pinned;
        message.reactions = incoming.reactions.clone();
        if let Some(at) = incoming.deleted_at {
            message.tombstone(at);
        }
        true
    }

    /// Apply a remote Delete by durable id: tombstone, never remove.
    ///
    /// Returns `false` if the target is unknown.
    pub fn apply_delete(&mut self, incoming: &Message) -> bool {
        let durable = match incoming.key.durable() {
            Some(id) => id,
            None => return false,
        };
        let at = incoming.deleted_at.unwrap_or_else(|| incoming.timestamp());
        match self.durable_mut(durable) {
            Some(message) => {
                message.tombstone(at);
                true
            }
            None => false,
        }
    }

    /// Optimistically rewrite a message body. Author-only.
    ///
    /// Returns a rollback snapshot to restore the exact prior body if the
    /// confirming write fails.
    pub fn edit(
        &mut self,
        id: MessageId,
        new_body: &str,
        editor: UserId,
        now: u64,
    ) -> Result<EditRollback, ChatError> {
        if new_body.trim().is_empty() {
            return Err(ChatError::Validation("edit would empty the message".into()));
        }
        let message = self
            .durable_mut(id)
            .ok_or_else(|| ChatError::UnknownMessage(id.to_string()))?;
        if message.author_id != editor {
            return Err(ChatError::NotAuthorized(
                "only the author may edit a message".into(),
            ));
        }
        if message.is_deleted() {
            return Err(ChatError::Conflict("message was deleted remotely".into()));
        }
        let rollback = EditRollback {
            prior_body: std::mem::replace(&mut message.body, new_body.to_string()),
            prior_edited_at: message.edited_at,
        };
        message.edited_at = Some(now);
        Ok(rollback)
    }

    /// Restore the exact pre-edit state after a failed confirmation.
    pub fn revert_edit(&mut self, id: MessageId, rollback: EditRollback) {
        if let Some(message) = self.durable_mut(id) {
            // A remote tombstone observed in the meantime wins over the revert.
            if !message.is_deleted() {
                message.body = rollback.prior_body;
            }
            message.edited_at = rollback.prior_edited_at;
        }
    }

    /// Optimistically tombstone a message. Author-only.
    pub fn delete(
        &mut self,
        id: MessageId,
        requester: UserId,
        now: u64,
    ) -> Result<DeleteRollback, ChatError> {
        let message = self
            .durable_mut(id)
            .ok_or_else(|| ChatError::UnknownMessage(id.to_string()))?;
        if message.author_id != requester {
            return Err(ChatError::NotAuthorized(
                "only the author may delete a message".into(),
            ));
        }
        if message.is_deleted() {
            return Err(ChatError::Conflict("message already deleted".into()));
        }
        let rollback = DeleteRollback {
            prior_body: message.body.clone(),
            prior_deleted_at: message.deleted_at,
        };
        message.tombstone(now);
        Ok(rollback)
    }

    /// Restore the pre-delete state (`deleted_at = None`) after a failed
    /// confirmation.
    pub fn revert_delete(&mut self, id: MessageId, rollback: DeleteRollback) {
        if let Some(message) = self.durable_mut(id) {
            message.deleted_at = rollback.prior_deleted_at;
            message.body = rollback.prior_body;
        }
    }

    /// Optimistically toggle the pin flag. Returns the prior value for
    /// rollback.
    pub fn set_pinned(&mut self, id: MessageId, pinned: bool) -> Result<bool, ChatError> {
        let message = self
            .durable_mut(id)
            .ok_or_else(|| ChatError::UnknownMessage(id.to_string()))?;
        if message.is_deleted() {
            return Err(ChatError::Conflict("message was deleted remotely".into()));
        }
        Ok(std::mem::replace(&mut message.pinned, pinned))
    }

    /// Optimistically toggle a `(emoji, user)` reaction. Returns whether
    /// the reaction is present after the toggle.
    ///
    /// Convergence: a later remote Update overwrites the whole reaction
    /// set, so remote events always win over a stale optimistic toggle.
    pub fn react_toggle(
        &mut self,
        id: MessageId,
        emoji: &str,
        user_id: UserId,
    ) -> Result<bool, ChatError> {
        let message = self
            .durable_mut(id)
            .ok_or_else(|| ChatError::UnknownMessage(id.to_string()))?;
        if message.is_deleted() {
            return Err(ChatError::Conflict("message was deleted remotely".into()));
        }
        Ok(message.toggle_reaction(emoji, user_id))
    }

    /// Rebuild from a full remote fetch (reconnect resync), preserving
    /// local speculative entries that have not been confirmed yet.
    pub fn reset_from(&mut self, remote: Vec<Message>) {
        let locals: Vec<Message> = self
            .by_pending
            .values()
            .filter_map(|k| self.entries.get(k).cloned())
            .collect();
        self.entries.clear();
        self.by_durable.clear();
        self.by_pending.clear();
        for message in remote {
            self.insert_remote(message);
        }
        for local in locals {
            self.insert_entry(local);
        }
    }

    /// The visible sequence in ascending `(timestamp, id)` order, with
    /// grouping and day-boundary annotations derived on the fly.
    pub fn visible(&self) -> VisibleIter<'_> {
        VisibleIter {
            timeline: self,
            inner: self.entries.values(),
            prev: None,
        }
    }

    /// Raw iteration in timeline order, for index maintenance.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.values()
    }
}

/// Restartable ascending walk over the timeline with view annotations.
pub struct VisibleIter<'a> {
    timeline: &'a Timeline,
    inner: btree_map::Values<'a, SortKey, Message>,
    prev: Option<&'a Message>,
}

impl<'a> Iterator for VisibleIter<'a> {
    type Item = MessageView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let message = self.inner.next()?;
        let (grouped, day_start) = match self.prev {
            Some(prev) => (
                prev.author_id == message.author_id
                    && message.timestamp().saturating_sub(prev.timestamp()) < GROUP_WINDOW_MS,
                prev.day() != message.day(),
            ),
            None => (false, true),
        };
        let reply_preview = message.reply_to.and_then(|target| {
            self.timeline.get_durable(target).map(|m| ReplyPreview {
                author_id: m.author_id,
                preview: truncate_preview(&m.body),
            })
        });
        self.prev = Some(message);
        Some(MessageView {
            message,
            grouped,
            day_start,
            reply_preview,
        })
    }
}
