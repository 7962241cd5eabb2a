//! ChatClient - the main interface for Murmur.
//!
//! This module provides [`ChatClient`], the primary API for applications
//! embedding the sync engine.
//!
//! # Architecture
//!
//! ChatClient owns the ranked conversation list and presence state, and
//! hands out a [`ConversationHandle`] per open conversation. All logic
//! lives in pure structures from murmur-core; this layer wires them to
//! the [`Storage`] and [`EventBus`] implementations.
//!
//! ```text
//! Application → ChatClient → ConversationHandle (actor per conversation)
//!                    ↓
//!          murmur-core (pure state machines)
//! ```

use crate::conversation::{self, now_ms, ConversationHandle};
use crate::events::{BusError, BusEvent, EventBus};
use crate::storage::Storage;
use crate::ClientConfig;
use dashmap::DashMap;
use murmur_core::ConversationRanker;
use murmur_types::{
    ChatError, Conversation, ConversationId, LastMessage, Message, MessageEvent, PresenceScope,
    PresenceSnapshot, UserId,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The main client engine.
///
/// Maintains the ranked conversation list, global presence, and the set
/// of open conversation sessions.
pub struct ChatClient<S: Storage, B: EventBus> {
    config: ClientConfig,
    user_id: UserId,
    storage: Arc<S>,
    bus: Arc<B>,
    ranker: Arc<Mutex<ConversationRanker>>,
    open: Arc<DashMap<ConversationId, ()>>,
    list_tx: Arc<watch::Sender<Vec<Conversation>>>,
    list_rx: watch::Receiver<Vec<Conversation>>,
    presence_rx: watch::Receiver<HashSet<UserId>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<S: Storage, B: EventBus> ChatClient<S, B> {
    /// Connect the engine: hydrate the conversation list and start the
    /// background listeners for events and presence.
    pub async fn connect(
        user_id: UserId,
        storage: S,
        bus: B,
        config: ClientConfig,
    ) -> Result<Self, ChatError> {
        let storage = Arc::new(storage);
        let bus = Arc::new(bus);

        let mut ranker = ConversationRanker::new();
        for conversation in storage.fetch_conversations(user_id).await? {
            ranker.upsert(conversation);
        }
        let initial: Vec<Conversation> = ranker.ordered().cloned().collect();
        info!(user = %user_id, conversations = initial.len(), "client connected");

        let (list_tx, list_rx) = watch::channel(initial);
        let list_tx = Arc::new(list_tx);
        let ranker = Arc::new(Mutex::new(ranker));
        let open: Arc<DashMap<ConversationId, ()>> = Arc::new(DashMap::new());

        let firehose = bus.subscribe_all().await?;
        let firehose_task = tokio::spawn(run_firehose(
            firehose,
            user_id,
            Arc::clone(&storage),
            Arc::clone(&ranker),
            Arc::clone(&open),
            Arc::clone(&list_tx),
        ));

        let presence = bus.subscribe_presence(PresenceScope::Global).await?;
        let (presence_tx, presence_rx) = watch::channel(HashSet::new());
        let presence_task = tokio::spawn(run_presence(presence, presence_tx));

        Ok(Self {
            config,
            user_id,
            storage,
            bus,
            ranker,
            open,
            list_tx,
            list_rx,
            presence_rx,
            tasks: vec![firehose_task, presence_task],
        })
    }

    /// The local user.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Observe the ranked conversation list.
    pub fn conversations(&self) -> watch::Receiver<Vec<Conversation>> {
        self.list_rx.clone()
    }

    /// Observe the global online set. Each update replaces the previous
    /// set wholesale.
    pub fn presence(&self) -> watch::Receiver<HashSet<UserId>> {
        self.presence_rx.clone()
    }

    /// Raw presence snapshots for one conversation's members.
    pub async fn conversation_presence(
        &self,
        conversation: ConversationId,
    ) -> Result<mpsc::Receiver<PresenceSnapshot>, ChatError> {
        Ok(self
            .bus
            .subscribe_presence(PresenceScope::Conversation(conversation))
            .await?)
    }

    /// Open a conversation: hydrate its timeline, subscribe to its
    /// events, and spawn the session actor. Opening marks the
    /// conversation read.
    pub async fn open_conversation(
        &self,
        conversation: ConversationId,
    ) -> Result<ConversationHandle, ChatError> {
        let bus_rx = self.bus.subscribe(conversation).await?;
        let initial = self.storage.fetch_messages(conversation).await?;
        let handle = conversation::spawn(
            conversation,
            self.user_id,
            Arc::clone(&self.storage),
            bus_rx,
            initial,
            &self.config,
            Arc::clone(&self.open),
        );
        self.mark_read(conversation).await?;
        Ok(handle)
    }

    /// Clear the unread count and persist the read watermark.
    pub async fn mark_read(&self, conversation: ConversationId) -> Result<(), ChatError> {
        self.mutate_conversation(conversation, |ranker| {
            ranker.mark_read(conversation, now_ms())
        })
        .await
    }

    /// Pin or unpin a conversation in the list.
    pub async fn set_conversation_pinned(
        &self,
        conversation: ConversationId,
        pinned: bool,
    ) -> Result<(), ChatError> {
        self.mutate_conversation(conversation, |ranker| {
            ranker.set_pinned(conversation, pinned)
        })
        .await
    }

    /// Mute or unmute a conversation. Muted conversations stop
    /// accumulating unread counts.
    pub async fn set_conversation_muted(
        &self,
        conversation: ConversationId,
        muted: bool,
    ) -> Result<(), ChatError> {
        self.mutate_conversation(conversation, |ranker| {
            ranker.set_muted(conversation, muted)
        })
        .await
    }

    /// Archive or restore a conversation. Archived conversations leave
    /// the active list; their history is kept.
    pub async fn set_conversation_archived(
        &self,
        conversation: ConversationId,
        archived: bool,
    ) -> Result<(), ChatError> {
        self.mutate_conversation(conversation, |ranker| {
            ranker.set_archived(conversation, archived)
        })
        .await
    }

    /// Archived conversations, most recent first.
    pub async fn archived_conversations(&self) -> Vec<Conversation> {
        let ranker = self.ranker.lock().await;
        ranker.archived().into_iter().cloned().collect()
    }

    /// Case-insensitive substring search across every conversation,
    /// newest first, capped at the configured limit.
    pub async fn search_all(&self, query: &str) -> Result<Vec<Message>, ChatError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .storage
            .search_messages(self.user_id, query, self.config.global_search_limit)
            .await?)
    }

    // Optimistic like the message path: the flag applies locally first and
    // is restored from the pre-mutation snapshot if the write fails.
    async fn mutate_conversation(
        &self,
        conversation: ConversationId,
        apply: impl FnOnce(&mut ConversationRanker) -> bool,
    ) -> Result<(), ChatError> {
        let mut ranker = self.ranker.lock().await;
        let prior = ranker.get(conversation).cloned();
        if !apply(&mut ranker) {
            return Err(ChatError::UnknownConversation(conversation.to_string()));
        }
        if let Some(updated) = ranker.get(conversation).cloned() {
            if let Err(error) = self.storage.update_conversation(&updated).await {
                warn!(conversation = %conversation, %error, "flag write failed, rolling back");
                if let Some(prior) = prior {
                    ranker.upsert(prior);
                }
                let _ = self.list_tx.send(ranker.ordered().cloned().collect());
                return Err(error.into());
            }
        }
        let _ = self.list_tx.send(ranker.ordered().cloned().collect());
        Ok(())
    }
}

impl<S: Storage, B: EventBus> Drop for ChatClient<S, B> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl From<BusError> for ChatError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::SubscribeFailed(msg) => ChatError::Transient(msg),
            BusError::Closed => ChatError::Closed,
        }
    }
}

/// Fold the cross-conversation event stream into the ranked list.
///
/// Inserts into open conversations are applied by their actors and read
/// immediately, so here they refresh the preview without counting as
/// unread; inserts elsewhere bump the unread count unless muted.
async fn run_firehose<S: Storage>(
    mut events: mpsc::Receiver<(ConversationId, BusEvent)>,
    user_id: UserId,
    storage: Arc<S>,
    ranker: Arc<Mutex<ConversationRanker>>,
    open: Arc<DashMap<ConversationId, ()>>,
    list_tx: Arc<watch::Sender<Vec<Conversation>>>,
) {
    while let Some((conversation, event)) = events.recv().await {
        let mut ranker = ranker.lock().await;
        match event {
            BusEvent::Event(MessageEvent::Insert(message)) => {
                let own = message.author_id == user_id;
                let is_open = open.contains_key(&conversation);
                let counts = !own
                    && !is_open
                    && ranker
                        .get(conversation)
                        .is_some_and(|c| c.counts_as_unread(&message, user_id));
                ranker.record_activity(
                    conversation,
                    LastMessage::from_message(&message),
                    counts,
                );
                if is_open && !own {
                    ranker.mark_read(conversation, message.timestamp());
                }
            }
            BusEvent::Event(MessageEvent::Update(message)) => {
                // Refreshes the preview only if this is still the newest
                // message; never counts as unread.
                ranker.record_activity(
                    conversation,
                    LastMessage::from_message(&message),
                    false,
                );
            }
            BusEvent::Event(MessageEvent::Delete(mut message)) => {
                let at = message.deleted_at.unwrap_or_else(|| message.timestamp());
                message.tombstone(at);
                ranker.record_activity(
                    conversation,
                    LastMessage::from_message(&message),
                    false,
                );
            }
            BusEvent::Resync => {
                debug!("conversation list resync requested");
                match storage.fetch_conversations(user_id).await {
                    Ok(conversations) => {
                        let mut fresh = ConversationRanker::new();
                        for c in conversations {
                            fresh.upsert(c);
                        }
                        *ranker = fresh;
                    }
                    Err(error) => {
                        warn!(%error, "conversation list refetch failed");
                    }
                }
            }
        }
        let _ = list_tx.send(ranker.ordered().cloned().collect());
    }
}

async fn run_presence(
    mut snapshots: mpsc::Receiver<PresenceSnapshot>,
    presence_tx: watch::Sender<HashSet<UserId>>,
) {
    while let Some(snapshot) = snapshots.recv().await {
        // Full snapshot semantics: replace, never merge.
        let _ = presence_tx.send(snapshot.online);
    }
}
