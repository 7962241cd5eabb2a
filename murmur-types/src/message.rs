//! The message domain model.
//!
//! A [`Message`] is totally ordered within its conversation by
//! `(created_at, id)`. Speculative messages have no server timestamp yet
//! and order by their local send time until confirmed, after which they
//! are repositioned by the confirmed timestamp.

use crate::{ConversationId, MessageId, MessageKey, PendingId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Sentinel body that replaces the content of a tombstoned message.
pub const TOMBSTONE_BODY: &str = "Message deleted";

/// Milliseconds in one day, used for date-separator annotations.
pub const DAY_MS: u64 = 86_400_000;

/// Delivery state of a message as seen by the local client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryState {
    /// Applied optimistically, awaiting server confirmation.
    Pending,
    /// Confirmed by the server (or received from a remote participant).
    Confirmed,
    /// The outbound write failed; awaiting user retry or discard.
    Failed,
}

/// A single emoji reaction by a single user.
///
/// The `(emoji, user)` pair is unique per message; re-adding the same pair
/// is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reaction {
    /// The reaction emoji.
    pub emoji: String,
    /// Who reacted.
    pub user_id: UserId,
}

impl Reaction {
    /// Create a reaction.
    pub fn new(emoji: impl Into<String>, user_id: UserId) -> Self {
        Self {
            emoji: emoji.into(),
            user_id,
        }
    }
}

/// A locally composed message before it enters the timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    /// Message text. May be empty only if an attachment is present.
    pub body: String,
    /// Optional opaque attachment URI.
    pub attachment: Option<String>,
    /// Optional durable id of the message being replied to.
    pub reply_to: Option<MessageId>,
}

impl Draft {
    /// A plain text draft.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attachment: None,
            reply_to: None,
        }
    }

    /// Attach an opaque URI.
    pub fn with_attachment(mut self, uri: impl Into<String>) -> Self {
        self.attachment = Some(uri.into());
        self
    }

    /// Mark this draft as a reply.
    pub fn replying_to(mut self, id: MessageId) -> Self {
        self.reply_to = Some(id);
        self
    }

    /// A draft is sendable if it has text or an attachment.
    pub fn is_sendable(&self) -> bool {
        !self.body.trim().is_empty() || self.attachment.is_some()
    }
}

/// Sort key giving the total order of messages within a conversation:
/// timestamp first, message identity as a stable tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SortKey {
    /// Server timestamp when confirmed, local send time otherwise.
    pub timestamp: u64,
    /// 128-bit identity tie-break.
    pub id: u128,
}

/// A message in a conversation timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Authoritative identity: local until confirmed, durable afterwards.
    pub key: MessageKey,
    /// The conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Who sent it.
    pub author_id: UserId,
    /// Message text (the tombstone sentinel once deleted).
    pub body: String,
    /// Optional opaque attachment URI.
    pub attachment: Option<String>,
    /// Server-assigned timestamp in epoch milliseconds. `None` while pending.
    pub created_at: Option<u64>,
    /// Local send time in epoch milliseconds; orders the message until
    /// the server timestamp arrives.
    pub local_sent_at: u64,
    /// When the body was last edited, if ever.
    pub edited_at: Option<u64>,
    /// Tombstone marker. Never cleared once observed remotely.
    pub deleted_at: Option<u64>,
    /// Whether the message is pinned in its conversation.
    pub pinned: bool,
    /// Durable id of the message this one replies to, if any.
    pub reply_to: Option<MessageId>,
    /// Reactions, unique per `(emoji, user)` pair.
    pub reactions: BTreeSet<Reaction>,
    /// Local delivery state.
    pub delivery: DeliveryState,
}

impl Message {
    /// Build a speculative message from a draft, keyed by a fresh
    /// [`PendingId`] and ordered by the local send time.
    pub fn pending(
        conversation_id: ConversationId,
        author_id: UserId,
        draft: Draft,
        now: u64,
    ) -> Self {
        Self {
            key: MessageKey::Local(PendingId::new()),
            conversation_id,
            author_id,
            body: draft.body,
            attachment: draft.attachment,
            created_at: None,
            local_sent_at: now,
            edited_at: None,
            deleted_at: None,
            pinned: false,
            reply_to: draft.reply_to,
            reactions: BTreeSet::new(),
            delivery: DeliveryState::Pending,
        }
    }

    /// The ordering key: `(created_at ?? local_sent_at, id)`.
    pub fn sort_key(&self) -> SortKey {
        SortKey {
            timestamp: self.created_at.unwrap_or(self.local_sent_at),
            id: self.key.as_u128(),
        }
    }

    /// The effective timestamp used for ordering and view annotations.
    pub fn timestamp(&self) -> u64 {
        self.created_at.unwrap_or(self.local_sent_at)
    }

    /// Day index of the effective timestamp, for date separators.
    pub fn day(&self) -> u64 {
        self.timestamp() / DAY_MS
    }

    /// Whether this message has been tombstoned.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Tombstone this message: record the deletion time and replace the
    /// content with the sentinel. Idempotent.
    pub fn tombstone(&mut self, at: u64) {
        if self.deleted_at.is_none() {
            self.deleted_at = Some(at);
        }
        self.body = TOMBSTONE_BODY.to_string();
    }

    /// Toggle a `(emoji, user)` reaction. Returns `true` if the reaction is
    /// present after the toggle.
    pub fn toggle_reaction(&mut self, emoji: &str, user_id: UserId) -> bool {
        let reaction = Reaction::new(emoji, user_id);
        if self.reactions.remove(&reaction) {
            false
        } else {
            self.reactions.insert(reaction);
            true
        }
    }

    /// Whether the given `(emoji, user)` reaction is present.
    pub fn has_reaction(&self, emoji: &str, user_id: UserId) -> bool {
        self.reactions.contains(&Reaction::new(emoji, user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft_message(body: &str, now: u64) -> Message {
        Message::pending(
            ConversationId::new(),
            UserId::new(),
            Draft::text(body),
            now,
        )
    }

    #[test]
    fn empty_draft_is_not_sendable() {
        assert!(!Draft::text("").is_sendable());
        assert!(!Draft::text("   ").is_sendable());
        assert!(Draft::text("hi").is_sendable());
    }

    #[test]
    fn attachment_only_draft_is_sendable() {
        let draft = Draft::text("").with_attachment("blob://abc");
        assert!(draft.is_sendable());
    }

    #[test]
    fn pending_message_orders_by_local_time() {
        let msg = draft_message("hi", 1_000);
        assert_eq!(msg.sort_key().timestamp, 1_000);
        assert_eq!(msg.delivery, DeliveryState::Pending);
        assert!(msg.key.pending().is_some());
    }

    #[test]
    fn confirmed_timestamp_wins_over_local_time() {
        let mut msg = draft_message("hi", 1_000);
        msg.created_at = Some(500);
        assert_eq!(msg.sort_key().timestamp, 500);
    }

    #[test]
    fn sort_key_orders_by_timestamp_then_id() {
        let a = SortKey {
            timestamp: 5,
            id: 99,
        };
        let b = SortKey {
            timestamp: 10,
            id: 1,
        };
        assert!(a < b);
    }

    #[test]
    fn reaction_toggle_is_idempotent_add() {
        let mut msg = draft_message("hi", 0);
        let user = UserId::new();

        assert!(msg.toggle_reaction("🔥", user));
        assert_eq!(msg.reactions.len(), 1);

        // Direct re-insert of the same pair is a no-op
        msg.reactions.insert(Reaction::new("🔥", user));
        assert_eq!(msg.reactions.len(), 1);

        // Third toggle removes it
        assert!(!msg.toggle_reaction("🔥", user));
        assert!(msg.reactions.is_empty());
    }

    #[test]
    fn tombstone_replaces_body_and_is_idempotent() {
        let mut msg = draft_message("secret", 0);
        msg.tombstone(42);
        assert_eq!(msg.deleted_at, Some(42));
        assert_eq!(msg.body, TOMBSTONE_BODY);

        msg.tombstone(99);
        assert_eq!(msg.deleted_at, Some(42)); // first observation sticks
    }

    #[test]
    fn day_boundaries() {
        let mut msg = draft_message("hi", 0);
        msg.created_at = Some(DAY_MS - 1);
        assert_eq!(msg.day(), 0);
        msg.created_at = Some(DAY_MS);
        assert_eq!(msg.day(), 1);
    }
}
