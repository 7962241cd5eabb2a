//! Push-channel abstraction for Murmur.
//!
//! The event bus delivers server-confirmed message events and presence
//! snapshots. Per conversation the relay guarantees commit order, but a
//! subscription can drop and recover; the bus surfaces that as a
//! [`BusEvent::Resync`] marker so the engine can refetch instead of
//! trusting a gap-riddled stream.

mod mock;

pub use mock::MockEventBus;

use async_trait::async_trait;
use murmur_types::{ConversationId, MessageEvent, PresenceScope, PresenceSnapshot};
use thiserror::Error;
use tokio::sync::mpsc;

/// Event bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    /// The subscription could not be established.
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    /// The bus is shut down.
    #[error("event bus closed")]
    Closed,
}

/// One delivery on a conversation subscription.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// A confirmed message event, in commit order.
    Event(MessageEvent),
    /// The subscription dropped and recovered; events may have been
    /// missed. Refetch before trusting further deliveries.
    Resync,
}

/// Subscription source for message events and presence.
#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    /// Subscribe to one conversation's message events.
    async fn subscribe(
        &self,
        conversation: ConversationId,
    ) -> Result<mpsc::Receiver<BusEvent>, BusError>;

    /// Subscribe to message events across every conversation the user
    /// can see. Feeds the ranked conversation list.
    async fn subscribe_all(
        &self,
    ) -> Result<mpsc::Receiver<(ConversationId, BusEvent)>, BusError>;

    /// Subscribe to presence snapshots for a scope. Every delivery is a
    /// full snapshot that replaces the previous one.
    async fn subscribe_presence(
        &self,
        scope: PresenceScope,
    ) -> Result<mpsc::Receiver<PresenceSnapshot>, BusError>;
}
