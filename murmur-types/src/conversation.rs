//! Conversation summaries for the ranked list.

use crate::{ConversationId, Message, UserId};
use serde::{Deserialize, Serialize};

/// Fixed display label for the self-vault conversation.
pub const SELF_VAULT_LABEL: &str = "Saved messages";

/// Fixed display label for anonymous ephemeral conversations.
pub const ANONYMOUS_LABEL: &str = "Anonymous";

/// Maximum length of the denormalized last-message preview.
pub const PREVIEW_MAX_CHARS: usize = 80;

/// What kind of conversation this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationKind {
    /// One-to-one conversation with a single peer.
    Direct,
    /// Multi-member group.
    Group,
    /// The user's private notes-to-self vault.
    SelfVault,
    /// An ephemeral conversation with an anonymous peer.
    AnonymousEphemeral,
}

/// Denormalized summary of the newest message, for list rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    /// Body prefix, truncated to [`PREVIEW_MAX_CHARS`].
    pub preview: String,
    /// Effective timestamp of the message.
    pub timestamp: u64,
}

impl LastMessage {
    /// Summarize a message for the conversation list.
    pub fn from_message(message: &Message) -> Self {
        Self {
            preview: truncate_preview(&message.body),
            timestamp: message.timestamp(),
        }
    }
}

/// Truncate a body to the preview length on a char boundary.
pub fn truncate_preview(body: &str) -> String {
    body.chars().take(PREVIEW_MAX_CHARS).collect()
}

/// A conversation as it appears in the ranked list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique identifier.
    pub id: ConversationId,
    /// Direct, group, self-vault, or anonymous.
    pub kind: ConversationKind,
    /// Derived display name: the peer's name for direct conversations,
    /// a fixed label for vault and anonymous ones.
    pub display_name: String,
    /// Summary of the newest message, if any.
    pub last_message: Option<LastMessage>,
    /// Messages after the last-read marker not authored by the local user.
    pub unread_count: u32,
    /// Pinned conversations sort first.
    pub pinned: bool,
    /// Muted conversations stay in the list but suppress alerts.
    pub muted: bool,
    /// Archived conversations leave the active ranked list; history is kept.
    pub archived: bool,
    /// Last-read marker in epoch milliseconds.
    pub last_read_at: u64,
}

impl Conversation {
    /// Create a conversation with a derived display name.
    pub fn new(id: ConversationId, kind: ConversationKind, display_name: impl Into<String>) -> Self {
        let display_name = match kind {
            ConversationKind::SelfVault => SELF_VAULT_LABEL.to_string(),
            ConversationKind::AnonymousEphemeral => ANONYMOUS_LABEL.to_string(),
            _ => display_name.into(),
        };
        Self {
            id,
            kind,
            display_name,
            last_message: None,
            unread_count: 0,
            pinned: false,
            muted: false,
            archived: false,
            last_read_at: 0,
        }
    }

    /// A direct conversation displays the peer's name.
    pub fn direct(id: ConversationId, peer_name: impl Into<String>) -> Self {
        Self::new(id, ConversationKind::Direct, peer_name)
    }

    /// Timestamp of the newest message, or zero if none.
    pub fn last_activity(&self) -> u64 {
        self.last_message.as_ref().map_or(0, |m| m.timestamp)
    }

    /// Whether a message should count as unread for the local user.
    pub fn counts_as_unread(&self, message: &Message, self_user: UserId) -> bool {
        message.author_id != self_user && message.timestamp() > self.last_read_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Draft;

    #[test]
    fn self_vault_has_fixed_label() {
        let conv = Conversation::new(ConversationId::new(), ConversationKind::SelfVault, "ignored");
        assert_eq!(conv.display_name, SELF_VAULT_LABEL);
    }

    #[test]
    fn direct_uses_peer_name() {
        let conv = Conversation::direct(ConversationId::new(), "ada");
        assert_eq!(conv.display_name, "ada");
        assert_eq!(conv.kind, ConversationKind::Direct);
    }

    #[test]
    fn preview_truncates_long_bodies() {
        let long = "x".repeat(500);
        assert_eq!(truncate_preview(&long).chars().count(), PREVIEW_MAX_CHARS);
        assert_eq!(truncate_preview("short"), "short");
    }

    #[test]
    fn own_messages_never_count_unread() {
        let me = UserId::new();
        let conv = Conversation::direct(ConversationId::new(), "ada");
        let mut msg = Message::pending(conv.id, me, Draft::text("hi"), 100);
        msg.created_at = Some(100);
        assert!(!conv.counts_as_unread(&msg, me));

        let mut theirs = msg.clone();
        theirs.author_id = UserId::new();
        assert!(conv.counts_as_unread(&theirs, me));
    }

    #[test]
    fn messages_before_read_marker_are_read() {
        let me = UserId::new();
        let mut conv = Conversation::direct(ConversationId::new(), "ada");
        conv.last_read_at = 200;
        let mut msg = Message::pending(conv.id, UserId::new(), Draft::text("old"), 150);
        msg.created_at = Some(150);
        assert!(!conv.counts_as_unread(&msg, me));
    }
}
