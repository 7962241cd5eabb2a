//! Events delivered by the remote push channel.
//!
//! Every variant carries a full [`Message`] payload rather than a diff so
//! that replay stays idempotent: applying the same event twice converges
//! to the same state.

use crate::{ConversationId, Message, MessageId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A remote change to a single message, in server-commit order per
/// conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageEvent {
    /// A message was committed. May confirm a local speculative send.
    Insert(Message),
    /// An existing message changed (body, pin, reactions). Full payload.
    Update(Message),
    /// An existing message was deleted. Treated as a tombstone locally.
    Delete(Message),
}

impl MessageEvent {
    /// The message payload carried by this event.
    pub fn message(&self) -> &Message {
        match self {
            Self::Insert(m) | Self::Update(m) | Self::Delete(m) => m,
        }
    }

    /// Consume the event, yielding its payload.
    pub fn into_message(self) -> Message {
        match self {
            Self::Insert(m) | Self::Update(m) | Self::Delete(m) => m,
        }
    }

    /// The conversation this event belongs to.
    pub fn conversation_id(&self) -> ConversationId {
        self.message().conversation_id
    }

    /// The durable id this event targets, if the payload carries one.
    ///
    /// Events from the server always carry durable ids; this is `None`
    /// only for locally fabricated payloads.
    pub fn target(&self) -> Option<MessageId> {
        self.message().key.durable()
    }
}

/// Scope of a presence snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresenceScope {
    /// Everyone the local user can see.
    Global,
    /// Members of one conversation.
    Conversation(ConversationId),
}

/// A full enumeration of online users for one scope.
///
/// The presence channel only emits full snapshots, never diffs; each
/// snapshot replaces prior state for its scope wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    /// Which scope this snapshot covers.
    pub scope: PresenceScope,
    /// The users currently online in that scope.
    pub online: HashSet<UserId>,
}

impl PresenceSnapshot {
    /// A global snapshot.
    pub fn global(online: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            scope: PresenceScope::Global,
            online: online.into_iter().collect(),
        }
    }

    /// A per-conversation snapshot.
    pub fn conversation(
        id: ConversationId,
        online: impl IntoIterator<Item = UserId>,
    ) -> Self {
        Self {
            scope: PresenceScope::Conversation(id),
            online: online.into_iter().collect(),
        }
    }
}
