//! Ranked conversation list.
//!
//! Orders conversation summaries for the sidebar: pinned first, then
//! conversations with unread messages, then by most recent activity, with
//! the conversation id as a final deterministic tie-break. Every mutation
//! repositions only the touched conversation; the rest of the order is
//! untouched.

use murmur_types::{Conversation, ConversationId, LastMessage};
use std::cmp::Reverse;
use std::collections::HashMap;

/// Sort key: tuple orders ascending, so pinned/unread are inverted and
/// recency wrapped in `Reverse` to put the hottest conversations first.
type RankKey = (bool, bool, Reverse<u64>, u128);

fn rank_key(conversation: &Conversation) -> RankKey {
    (
        !conversation.pinned,
        conversation.unread_count == 0,
        Reverse(conversation.last_activity()),
        conversation.id.as_u128(),
    )
}

/// Incrementally maintained ranked set of conversation summaries.
#[derive(Debug, Default)]
pub struct ConversationRanker {
    conversations: HashMap<ConversationId, Conversation>,
    // Active (non-archived) conversations in rank order.
    order: Vec<(RankKey, ConversationId)>,
}

impl ConversationRanker {
    /// Create an empty ranker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a conversation summary wholesale.
    pub fn upsert(&mut self, conversation: Conversation) {
        let id = conversation.id;
        self.unposition(id);
        let archived = conversation.archived;
        self.conversations.insert(id, conversation);
        if !archived {
            self.position(id);
        }
    }

    /// Remove a conversation entirely.
    pub fn remove(&mut self, id: ConversationId) -> Option<Conversation> {
        self.unposition(id);
        self.conversations.remove(&id)
    }

    /// Look up one conversation.
    pub fn get(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations.get(&id)
    }

    /// Record incoming activity: refresh the preview if it is newer and,
    /// when `counts_unread` is set, bump the unread count (muted
    /// conversations never accumulate unread).
    ///
    /// Returns `false` if the conversation is unknown.
    pub fn record_activity(
        &mut self,
        id: ConversationId,
        last: LastMessage,
        counts_unread: bool,
    ) -> bool {
        self.mutate(id, |c| {
            let newer = c
                .last_message
                .as_ref()
                .map_or(true, |prev| last.timestamp >= prev.timestamp);
            if newer {
                c.last_message = Some(last);
            }
            if counts_unread && !c.muted {
                c.unread_count = c.unread_count.saturating_add(1);
            }
        })
    }

    /// Reset the unread count and advance the read watermark. The
    /// watermark never moves backwards.
    pub fn mark_read(&mut self, id: ConversationId, now: u64) -> bool {
        self.mutate(id, |c| {
            c.unread_count = 0;
            c.last_read_at = c.last_read_at.max(now);
        })
    }

    /// Pin or unpin a conversation.
    pub fn set_pinned(&mut self, id: ConversationId, pinned: bool) -> bool {
        self.mutate(id, |c| c.pinned = pinned)
    }

    /// Mute or unmute. Muting does not clear an already-accumulated
    /// unread count.
    pub fn set_muted(&mut self, id: ConversationId, muted: bool) -> bool {
        self.mutate(id, |c| c.muted = muted)
    }

    /// Archive or restore. Archived conversations drop out of the ranked
    /// order but keep accumulating state for when they return.
    pub fn set_archived(&mut self, id: ConversationId, archived: bool) -> bool {
        self.mutate(id, |c| c.archived = archived)
    }

    /// Active conversations in rank order.
    pub fn ordered(&self) -> impl Iterator<Item = &Conversation> {
        self.order
            .iter()
            .filter_map(move |(_, id)| self.conversations.get(id))
    }

    /// Archived conversations, most recent activity first.
    pub fn archived(&self) -> Vec<&Conversation> {
        let mut out: Vec<&Conversation> = self
            .conversations
            .values()
            .filter(|c| c.archived)
            .collect();
        out.sort_by_key(|c| (Reverse(c.last_activity()), c.id.as_u128()));
        out
    }

    /// Total number of tracked conversations, archived included.
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    fn mutate(&mut self, id: ConversationId, f: impl FnOnce(&mut Conversation)) -> bool {
        if !self.conversations.contains_key(&id) {
            return false;
        }
        self.unposition(id);
        let archived = {
            // Checked above.
            let conversation = self.conversations.get_mut(&id).expect("present");
            f(conversation);
            conversation.archived
        };
        if !archived {
            self.position(id);
        }
        true
    }

    fn unposition(&mut self, id: ConversationId) {
        self.order.retain(|(_, other)| *other != id);
    }

    fn position(&mut self, id: ConversationId) {
        let key = rank_key(self.conversations.get(&id).expect("positioned after insert"));
        let at = self
            .order
            .binary_search_by(|(other, _)| other.cmp(&key))
            .unwrap_or_else(|i| i);
        self.order.insert(at, (key, id));
    }
}
