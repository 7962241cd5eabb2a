//! # murmur-client
//!
//! Client engine for the Murmur local-first message sync protocol.
//!
//! This is the main library that applications embed to get optimistic,
//! eventually-consistent chat state.
//!
//! ## Features
//!
//! - **Optimistic UI**: sends, edits, deletes, and reactions apply
//!   locally first and roll back exactly on failure
//! - **Reconciliation**: speculative sends converge with the confirmed
//!   event stream without duplicates or drops
//! - **One writer per conversation**: every mutation flows through a
//!   single actor queue, so there are no interleaving hazards
//! - **Pluggable backends**: [`Storage`] and [`EventBus`] traits with
//!   mock implementations for tests
//!
//! ## Example
//!
//! ```ignore
//! use murmur_client::{ChatClient, ClientConfig, MockEventBus, MockStorage};
//! use murmur_types::Draft;
//!
//! let client = ChatClient::connect(user_id, storage, bus, ClientConfig::new()).await?;
//! let conversation = client.open_conversation(conversation_id).await?;
//!
//! // Optimistic send; confirmation happens in the background.
//! conversation.send(Draft::text("hello")).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod conversation;
pub mod events;
pub mod storage;

pub use client::ChatClient;
pub use config::{ClientConfig, DEFAULT_GLOBAL_SEARCH_LIMIT};
pub use conversation::{ConversationHandle, MessageSnapshot, TimelineSnapshot};
pub use events::{BusError, BusEvent, EventBus, MockEventBus};
pub use storage::{MockStorage, Storage, StorageError};
