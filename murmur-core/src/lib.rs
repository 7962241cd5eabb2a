//! # murmur-core
//!
//! Pure logic for Murmur (no I/O, instant tests).
//!
//! This crate implements the state machines behind the message sync
//! engine: the ordered timeline with optimistic mutations, the
//! send-reconciliation ledger, the ranked conversation list, the
//! in-conversation search index, and the out-of-order event buffer.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (storage writes, the event subscription) is performed by
//! `murmur-client`, which drives these structures from a single mutation
//! queue per conversation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod ranker;
pub mod reconcile;
pub mod search;
pub mod timeline;

pub use buffer::{UpdateBuffer, DEFAULT_UPDATE_BUFFER_CAP};
pub use ranker::ConversationRanker;
pub use reconcile::{
    FailureDisposition, PendingLedger, DEFAULT_MAX_SEND_ATTEMPTS, DEFAULT_RECONCILE_TIMEOUT_MS,
};
pub use search::SearchIndex;
pub use timeline::{
    DeleteRollback, EditRollback, MessageView, ReplyPreview, Timeline, VisibleIter,
    DUPLICATE_SEND_WINDOW_MS, GROUP_WINDOW_MS,
};
