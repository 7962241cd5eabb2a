//! Identity types for Murmur.
//!
//! Messages carry exactly one of two identities at any time: a durable
//! [`MessageId`] assigned by the server, or an ephemeral [`PendingId`]
//! generated locally when a send is applied optimistically. The
//! [`MessageKey`] sum type carries whichever is currently authoritative;
//! only the reconcile path is allowed to rewrite a `Local` key into a
//! `Durable` one.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident, $label:literal) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Create a new random id.
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Create an id from raw bytes.
            pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
                uuid::Uuid::from_slice(bytes).ok().map(Self)
            }

            /// Get the inner UUID.
            pub fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }

            /// The id as a 128-bit integer, used for stable tie-breaking.
            pub fn as_u128(&self) -> u128 {
                self.0.as_u128()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), self.0)
            }
        }
    };
}

uuid_id!(
    /// A unique identifier for a user.
    UserId,
    "UserId"
);

uuid_id!(
    /// A unique identifier for a conversation.
    ConversationId,
    "ConversationId"
);

uuid_id!(
    /// A durable, server-assigned message identifier.
    MessageId,
    "MessageId"
);

uuid_id!(
    /// A locally generated, ephemeral identifier for a message that has
    /// been applied optimistically but not yet confirmed by the server.
    ///
    /// Also serves as the idempotency key for the outbound write.
    PendingId,
    "PendingId"
);

/// The authoritative identity of a message: local until confirmed,
/// durable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKey {
    /// Locally generated identity of a not-yet-confirmed message.
    Local(PendingId),
    /// Server-assigned identity of a confirmed message.
    Durable(MessageId),
}

impl MessageKey {
    /// The durable id, if this message has been confirmed.
    pub fn durable(&self) -> Option<MessageId> {
        match self {
            Self::Durable(id) => Some(*id),
            Self::Local(_) => None,
        }
    }

    /// The pending id, if this message is still speculative.
    pub fn pending(&self) -> Option<PendingId> {
        match self {
            Self::Local(id) => Some(*id),
            Self::Durable(_) => None,
        }
    }

    /// The identity as a 128-bit integer, used for stable tie-breaking
    /// within a `(timestamp, id)` sort key.
    pub fn as_u128(&self) -> u128 {
        match self {
            Self::Local(id) => id.as_u128(),
            Self::Durable(id) => id.as_u128(),
        }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(id) => write!(f, "local:{}", id),
            Self::Durable(id) => write!(f, "{}", id),
        }
    }
}
