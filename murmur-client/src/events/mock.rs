//! Mock event bus for testing.
//!
//! Lets tests emit message events, resync markers, and presence
//! snapshots to whoever is subscribed.

use super::{BusError, BusEvent, EventBus};
use async_trait::async_trait;
use dashmap::DashMap;
use murmur_types::{ConversationId, MessageEvent, PresenceScope, PresenceSnapshot};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 64;

/// Mock event bus for testing.
#[derive(Debug, Default)]
pub struct MockEventBus {
    conversation_subs: Arc<DashMap<ConversationId, Vec<mpsc::Sender<BusEvent>>>>,
    firehose_subs: Arc<Mutex<Vec<mpsc::Sender<(ConversationId, BusEvent)>>>>,
    presence_subs: Arc<Mutex<Vec<(PresenceScope, mpsc::Sender<PresenceSnapshot>)>>>,
    fail_next_subscribe: Arc<Mutex<Option<String>>>,
}

impl MockEventBus {
    /// Create a new mock bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a message event to the conversation's subscribers and the
    /// firehose.
    pub async fn emit(&self, event: MessageEvent) {
        let conversation = event.conversation_id();
        for sub in self.conversation_senders(conversation) {
            let _ = sub.send(BusEvent::Event(event.clone())).await;
        }
        let firehose: Vec<_> = self.firehose_subs.lock().unwrap().clone();
        for sub in firehose {
            let _ = sub.send((conversation, BusEvent::Event(event.clone()))).await;
        }
    }

    /// Deliver a resync marker to one conversation's subscribers.
    pub async fn emit_resync(&self, conversation: ConversationId) {
        for sub in self.conversation_senders(conversation) {
            let _ = sub.send(BusEvent::Resync).await;
        }
    }

    // Senders are cloned out so no map guard is held across an await.
    fn conversation_senders(&self, conversation: ConversationId) -> Vec<mpsc::Sender<BusEvent>> {
        self.conversation_subs
            .get(&conversation)
            .map(|subs| subs.clone())
            .unwrap_or_default()
    }

    /// Deliver a presence snapshot to matching scope subscribers.
    pub async fn emit_presence(&self, snapshot: PresenceSnapshot) {
        let subs: Vec<_> = self.presence_subs.lock().unwrap().clone();
        for (scope, sub) in subs {
            if scope == snapshot.scope {
                let _ = sub.send(snapshot.clone()).await;
            }
        }
    }

    /// Cause the next subscribe call (any flavor) to fail.
    pub fn fail_next_subscribe(&self, error: &str) {
        *self.fail_next_subscribe.lock().unwrap() = Some(error.to_string());
    }

    /// Number of live subscribers for one conversation.
    pub fn subscriber_count(&self, conversation: ConversationId) -> usize {
        self.conversation_subs
            .get(&conversation)
            .map(|subs| subs.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    fn take_scripted_failure(&self) -> Result<(), BusError> {
        if let Some(error) = self.fail_next_subscribe.lock().unwrap().take() {
            return Err(BusError::SubscribeFailed(error));
        }
        Ok(())
    }
}

impl Clone for MockEventBus {
    fn clone(&self) -> Self {
        Self {
            conversation_subs: Arc::clone(&self.conversation_subs),
            firehose_subs: Arc::clone(&self.firehose_subs),
            presence_subs: Arc::clone(&self.presence_subs),
            fail_next_subscribe: Arc::clone(&self.fail_next_subscribe),
        }
    }
}

#[async_trait]
impl EventBus for MockEventBus {
    async fn subscribe(
        &self,
        conversation: ConversationId,
    ) -> Result<mpsc::Receiver<BusEvent>, BusError> {
        self.take_scripted_failure()?;
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.conversation_subs
            .entry(conversation)
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn subscribe_all(
        &self,
    ) -> Result<mpsc::Receiver<(ConversationId, BusEvent)>, BusError> {
        self.take_scripted_failure()?;
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.firehose_subs.lock().unwrap().push(tx);
        Ok(rx)
    }

    async fn subscribe_presence(
        &self,
        scope: PresenceScope,
    ) -> Result<mpsc::Receiver<PresenceSnapshot>, BusError> {
        self.take_scripted_failure()?;
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.presence_subs.lock().unwrap().push((scope, tx));
        Ok(rx)
    }
}
