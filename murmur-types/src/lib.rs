//! # murmur-types
//!
//! Domain model for the Murmur local-first message sync engine.
//!
//! This crate provides the foundational types used across all Murmur crates:
//! - [`UserId`], [`ConversationId`], [`MessageId`], [`PendingId`],
//!   [`MessageKey`] - Identity types
//! - [`Message`], [`Draft`], [`Reaction`] - The message model
//! - [`Conversation`] - Conversation summaries for the ranked list
//! - [`MessageEvent`], [`PresenceSnapshot`] - Remote push-channel events
//! - [`ChatError`] - Error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

mod conversation;
mod error;
mod event;
mod ids;
mod message;

pub use conversation::{
    truncate_preview, Conversation, ConversationKind, LastMessage, ANONYMOUS_LABEL,
    PREVIEW_MAX_CHARS, SELF_VAULT_LABEL,
};
pub use error::ChatError;
pub use event::{MessageEvent, PresenceScope, PresenceSnapshot};
pub use ids::{ConversationId, MessageId, MessageKey, PendingId, UserId};
pub use message::{Draft, DeliveryState, Message, Reaction, SortKey, DAY_MS, TOMBSTONE_BODY};
