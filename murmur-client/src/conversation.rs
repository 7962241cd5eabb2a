//! Conversation sessions.
//!
//! Opening a conversation spawns an actor that owns the timeline, the
//! reconcile ledger, the out-of-order buffer, and the search index for
//! that conversation. Every mutation - local commands and remote events
//! alike - flows through the actor's single queue, so there is exactly
//! one writer per conversation and no interleaving hazards.
//!
//! Confirming writes are dispatched as detached tasks; their outcomes
//! come back onto the same queue, keeping rollbacks serialized with
//! everything else. The UI observes the conversation through a `watch`
//! channel of immutable snapshots.

use crate::events::BusEvent;
use crate::storage::{Storage, StorageError};
use crate::ClientConfig;
use dashmap::DashMap;
use murmur_core::{
    DeleteRollback, EditRollback, PendingLedger, ReplyPreview, SearchIndex, Timeline, UpdateBuffer,
};
use murmur_types::{
    ChatError, ConversationId, Draft, Message, MessageEvent, MessageId, MessageKey, PendingId,
    UserId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Current time in epoch milliseconds.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One message as the UI should render it.
#[derive(Debug, Clone)]
pub struct MessageSnapshot {
    /// The message itself.
    pub message: Message,
    /// Same author as the previous message, close enough in time to
    /// render without a repeated header.
    pub grouped: bool,
    /// First message of a new calendar day.
    pub day_start: bool,
    /// Resolved reply summary, if the target is loaded.
    pub reply_preview: Option<ReplyPreview>,
    /// A pending send unacknowledged past the reconcile window. Advisory:
    /// the write is still in flight and may yet confirm.
    pub overdue: bool,
}

/// Immutable view of one conversation, published after every mutation.
#[derive(Debug, Clone)]
pub struct TimelineSnapshot {
    /// Which conversation this is.
    pub conversation_id: ConversationId,
    /// Messages in ascending timeline order.
    pub messages: Vec<MessageSnapshot>,
    /// Hit count of the active in-conversation search.
    pub search_hits: usize,
    /// The hit currently under the search cursor.
    pub search_cursor: Option<MessageKey>,
    /// Set while the engine is out of sync with the server (e.g. a
    /// failed resync fetch); cleared when recovery succeeds.
    pub sync_error: Option<String>,
}

enum Command {
    Send {
        draft: Draft,
        reply: oneshot::Sender<Result<PendingId, ChatError>>,
    },
    Edit {
        id: MessageId,
        body: String,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    Delete {
        id: MessageId,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    ToggleReaction {
        id: MessageId,
        emoji: String,
        reply: oneshot::Sender<Result<bool, ChatError>>,
    },
    SetPinned {
        id: MessageId,
        pinned: bool,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    Retry {
        pending_id: PendingId,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    Discard {
        pending_id: PendingId,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    Search {
        query: String,
        reply: oneshot::Sender<usize>,
    },
    SearchNext {
        reply: oneshot::Sender<Option<MessageKey>>,
    },
    SearchPrev {
        reply: oneshot::Sender<Option<MessageKey>>,
    },
    ClearSearch,
}

enum WriteOutcome {
    SendOk {
        pending_id: PendingId,
        confirmed: Message,
    },
    SendErr {
        pending_id: PendingId,
        error: StorageError,
    },
    EditErr {
        id: MessageId,
        rollback: EditRollback,
    },
    DeleteErr {
        id: MessageId,
        rollback: DeleteRollback,
    },
    PinErr {
        id: MessageId,
        prior: bool,
    },
    ReactErr {
        id: MessageId,
        emoji: String,
    },
}

/// Handle to an open conversation.
///
/// Cloneable; dropping the last clone closes the session, unsubscribes,
/// and discards unconfirmed speculative state.
#[derive(Clone)]
pub struct ConversationHandle {
    conversation_id: ConversationId,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<TimelineSnapshot>,
}

impl ConversationHandle {
    /// Which conversation this handle is for.
    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> TimelineSnapshot {
        self.snapshot.borrow().clone()
    }

    /// A receiver that observes every published snapshot.
    pub fn watch(&self) -> watch::Receiver<TimelineSnapshot> {
        self.snapshot.clone()
    }

    /// Send a message. Applies optimistically and returns the pending id
    /// immediately; confirmation happens in the background.
    pub async fn send(&self, draft: Draft) -> Result<PendingId, ChatError> {
        self.request(|reply| Command::Send { draft, reply }).await?
    }

    /// Edit a message body optimistically. Author-only.
    pub async fn edit(&self, id: MessageId, body: impl Into<String>) -> Result<(), ChatError> {
        let body = body.into();
        self.request(|reply| Command::Edit { id, body, reply }).await?
    }

    /// Delete a message optimistically (tombstone). Author-only.
    pub async fn delete(&self, id: MessageId) -> Result<(), ChatError> {
        self.request(|reply| Command::Delete { id, reply }).await?
    }

    /// Toggle an emoji reaction. Returns whether it is present after.
    pub async fn toggle_reaction(
        &self,
        id: MessageId,
        emoji: impl Into<String>,
    ) -> Result<bool, ChatError> {
        let emoji = emoji.into();
        self.request(|reply| Command::ToggleReaction { id, emoji, reply })
            .await?
    }

    /// Pin or unpin a message.
    pub async fn set_pinned(&self, id: MessageId, pinned: bool) -> Result<(), ChatError> {
        self.request(|reply| Command::SetPinned { id, pinned, reply })
            .await?
    }

    /// Retry a failed send with a fresh attempt budget.
    pub async fn retry(&self, pending_id: PendingId) -> Result<(), ChatError> {
        self.request(|reply| Command::Retry { pending_id, reply })
            .await?
    }

    /// Discard a failed send, removing it from the timeline.
    pub async fn discard(&self, pending_id: PendingId) -> Result<(), ChatError> {
        self.request(|reply| Command::Discard { pending_id, reply })
            .await?
    }

    /// Start or replace the in-conversation search. Returns the hit count.
    pub async fn search(&self, query: impl Into<String>) -> Result<usize, ChatError> {
        let query = query.into();
        self.request(|reply| Command::Search { query, reply }).await
    }

    /// Move the search cursor to the next hit (toward older messages).
    pub async fn search_next(&self) -> Result<Option<MessageKey>, ChatError> {
        self.request(|reply| Command::SearchNext { reply }).await
    }

    /// Move the search cursor to the previous hit (toward newer messages).
    pub async fn search_prev(&self) -> Result<Option<MessageKey>, ChatError> {
        self.request(|reply| Command::SearchPrev { reply }).await
    }

    /// Drop the active search.
    pub async fn clear_search(&self) -> Result<(), ChatError> {
        self.commands
            .send(Command::ClearSearch)
            .await
            .map_err(|_| ChatError::Closed)
    }

    /// Close the session explicitly. Equivalent to dropping the handle.
    pub fn close(self) {}

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, ChatError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| ChatError::Closed)?;
        rx.await.map_err(|_| ChatError::Closed)
    }
}

/// Spawn the actor for one conversation and return its handle.
pub(crate) fn spawn<S: Storage>(
    conversation_id: ConversationId,
    user_id: UserId,
    storage: Arc<S>,
    bus_rx: mpsc::Receiver<BusEvent>,
    initial: Vec<Message>,
    config: &ClientConfig,
    open: Arc<DashMap<ConversationId, ()>>,
) -> ConversationHandle {
    let mut timeline = Timeline::new(conversation_id);
    timeline.reset_from(initial);

    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let (outcome_tx, outcome_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let timeout_ms = config.reconcile_timeout.as_millis() as u64;

    let mut actor = Actor {
        user_id,
        storage,
        timeline,
        ledger: PendingLedger::new(config.max_send_attempts, timeout_ms),
        buffer: UpdateBuffer::new(config.update_buffer_cap),
        search: SearchIndex::new(),
        search_query: None,
        sync_error: None,
        outcome_tx,
        snapshot_tx: None,
        open: Arc::clone(&open),
    };
    let (snapshot_tx, snapshot_rx) = watch::channel(actor.build_snapshot(conversation_id));
    actor.snapshot_tx = Some(snapshot_tx);

    open.insert(conversation_id, ());
    info!(conversation = %conversation_id, "conversation opened");
    tokio::spawn(actor.run(command_rx, bus_rx, outcome_rx, timeout_ms));

    ConversationHandle {
        conversation_id,
        commands: command_tx,
        snapshot: snapshot_rx,
    }
}

struct Actor<S: Storage> {
    user_id: UserId,
    storage: Arc<S>,
    timeline: Timeline,
    ledger: PendingLedger,
    buffer: UpdateBuffer,
    search: SearchIndex,
    search_query: Option<String>,
    sync_error: Option<String>,
    outcome_tx: mpsc::Sender<WriteOutcome>,
    snapshot_tx: Option<watch::Sender<TimelineSnapshot>>,
    open: Arc<DashMap<ConversationId, ()>>,
}

impl<S: Storage> Actor<S> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut bus_rx: mpsc::Receiver<BusEvent>,
        mut outcomes: mpsc::Receiver<WriteOutcome>,
        timeout_ms: u64,
    ) {
        let tick = Duration::from_millis((timeout_ms / 2).clamp(10, 1_000));
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut bus_open = true;

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(outcome) = outcomes.recv() => self.handle_outcome(outcome),
                event = bus_rx.recv(), if bus_open => match event {
                    Some(event) => self.handle_bus(event).await,
                    None => {
                        bus_open = false;
                        self.sync_error = Some("event subscription closed".into());
                        warn!(
                            conversation = %self.timeline.conversation_id(),
                            "event subscription closed"
                        );
                    }
                },
                _ = ticker.tick() => self.check_overdue(),
            }
            self.publish();
        }

        self.open.remove(&self.timeline.conversation_id());
        info!(conversation = %self.timeline.conversation_id(), "conversation closed");
    }

    // The snapshot is published before the reply is released, so a caller
    // that awaits a command always observes its own mutation.
    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send { draft, reply } => {
                let result = self.handle_send(draft);
                self.publish();
                let _ = reply.send(result);
            }
            Command::Edit { id, body, reply } => {
                let result = self.handle_edit(id, body);
                self.publish();
                let _ = reply.send(result);
            }
            Command::Delete { id, reply } => {
                let result = self.handle_delete(id);
                self.publish();
                let _ = reply.send(result);
            }
            Command::ToggleReaction { id, emoji, reply } => {
                let result = self.handle_reaction(id, emoji);
                self.publish();
                let _ = reply.send(result);
            }
            Command::SetPinned { id, pinned, reply } => {
                let result = self.handle_pin(id, pinned);
                self.publish();
                let _ = reply.send(result);
            }
            Command::Retry { pending_id, reply } => {
                let result = self.handle_retry(pending_id);
                self.publish();
                let _ = reply.send(result);
            }
            Command::Discard { pending_id, reply } => {
                let result = self.handle_discard(pending_id);
                self.publish();
                let _ = reply.send(result);
            }
            Command::Search { query, reply } => {
                let count = if query.trim().is_empty() {
                    self.search.clear();
                    self.search_query = None;
                    0
                } else {
                    let count = self.search.set_query(&query, self.timeline.messages());
                    self.search_query = Some(query);
                    count
                };
                self.publish();
                let _ = reply.send(count);
            }
            Command::SearchNext { reply } => {
                let next = self.search.next();
                self.publish();
                let _ = reply.send(next);
            }
            Command::SearchPrev { reply } => {
                let prev = self.search.prev();
                self.publish();
                let _ = reply.send(prev);
            }
            Command::ClearSearch => {
                self.search.clear();
                self.search_query = None;
            }
        }
    }

    fn handle_send(&mut self, draft: Draft) -> Result<PendingId, ChatError> {
        let now = now_ms();
        let pending_id = self.timeline.apply_optimistic(self.user_id, draft, now)?;
        // A duplicate re-submission collapses onto an in-flight send and
        // must not dispatch a second write.
        if !self.ledger.contains(pending_id) {
            if let Some(message) = self.timeline.get_pending(pending_id).cloned() {
                self.ledger.track(
                    pending_id,
                    message.author_id,
                    message.body.clone(),
                    message.attachment.clone(),
                    now,
                );
                self.search.reindex(&message);
                self.dispatch_insert(pending_id, message);
            }
        }
        Ok(pending_id)
    }

    fn handle_edit(&mut self, id: MessageId, body: String) -> Result<(), ChatError> {
        let rollback = self.timeline.edit(id, &body, self.user_id, now_ms())?;
        if let Some(message) = self.timeline.get_durable(id).cloned() {
            self.search.reindex(&message);
            self.dispatch_update(message, WriteOutcome::EditErr { id, rollback });
        }
        Ok(())
    }

    fn handle_delete(&mut self, id: MessageId) -> Result<(), ChatError> {
        let rollback = self.timeline.delete(id, self.user_id, now_ms())?;
        if let Some(message) = self.timeline.get_durable(id).cloned() {
            self.search.reindex(&message);
            self.dispatch_update(message, WriteOutcome::DeleteErr { id, rollback });
        }
        Ok(())
    }

    fn handle_reaction(&mut self, id: MessageId, emoji: String) -> Result<bool, ChatError> {
        let present = self.timeline.react_toggle(id, &emoji, self.user_id)?;
        if let Some(message) = self.timeline.get_durable(id).cloned() {
            self.dispatch_update(message, WriteOutcome::ReactErr { id, emoji });
        }
        Ok(present)
    }

    fn handle_pin(&mut self, id: MessageId, pinned: bool) -> Result<(), ChatError> {
        let prior = self.timeline.set_pinned(id, pinned)?;
        if prior != pinned {
            if let Some(message) = self.timeline.get_durable(id).cloned() {
                self.dispatch_update(message, WriteOutcome::PinErr { id, prior });
            }
        }
        Ok(())
    }

    fn handle_retry(&mut self, pending_id: PendingId) -> Result<(), ChatError> {
        self.timeline.retry_pending(pending_id)?;
        let message = self
            .timeline
            .get_pending(pending_id)
            .cloned()
            .ok_or_else(|| ChatError::UnknownPending(pending_id.to_string()))?;
        self.ledger.retrack(
            pending_id,
            message.author_id,
            message.body.clone(),
            message.attachment.clone(),
            now_ms(),
        );
        self.dispatch_insert(pending_id, message);
        Ok(())
    }

    fn handle_discard(&mut self, pending_id: PendingId) -> Result<(), ChatError> {
        match self.timeline.discard_pending(pending_id) {
            Some(message) => {
                self.ledger.discard(pending_id);
                self.search.remove(message.key);
                Ok(())
            }
            None => Err(ChatError::UnknownPending(pending_id.to_string())),
        }
    }

    fn handle_outcome(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::SendOk {
                pending_id,
                confirmed,
            } => {
                self.ledger.confirm(pending_id);
                self.integrate_insert(confirmed, Some(pending_id));
            }
            WriteOutcome::SendErr { pending_id, error } => {
                self.handle_send_failure(pending_id, error)
            }
            WriteOutcome::EditErr { id, rollback } => {
                warn!(message = %id, "edit write failed, rolling back");
                self.timeline.revert_edit(id, rollback);
                self.reindex_durable(id);
            }
            WriteOutcome::DeleteErr { id, rollback } => {
                warn!(message = %id, "delete write failed, rolling back");
                self.timeline.revert_delete(id, rollback);
                self.reindex_durable(id);
            }
            WriteOutcome::PinErr { id, prior } => {
                warn!(message = %id, "pin write failed, rolling back");
                let _ = self.timeline.set_pinned(id, prior);
            }
            WriteOutcome::ReactErr { id, emoji } => {
                warn!(message = %id, "reaction write failed, rolling back");
                let _ = self.timeline.react_toggle(id, &emoji, self.user_id);
            }
        }
    }

    fn handle_send_failure(&mut self, pending_id: PendingId, error: StorageError) {
        if !error.is_transient() {
            warn!(pending = %pending_id, %error, "send rejected");
            self.ledger.discard(pending_id);
            let _ = self.timeline.fail_pending(pending_id);
            return;
        }
        match self.ledger.record_failure(pending_id, now_ms()) {
            murmur_core::FailureDisposition::Retry { attempt } => {
                debug!(pending = %pending_id, attempt, "retrying send");
                let _ = self.timeline.retry_pending(pending_id);
                if let Some(message) = self.timeline.get_pending(pending_id).cloned() {
                    self.dispatch_insert(pending_id, message);
                }
            }
            murmur_core::FailureDisposition::Exhausted => {
                warn!(pending = %pending_id, "send attempts exhausted");
                let _ = self.timeline.fail_pending(pending_id);
            }
        }
    }

    async fn handle_bus(&mut self, event: BusEvent) {
        match event {
            BusEvent::Event(MessageEvent::Insert(message)) => {
                self.integrate_insert(message, None);
            }
            BusEvent::Event(MessageEvent::Update(message)) => {
                if self.timeline.apply_update(&message) {
                    self.reindex_from(&message);
                } else {
                    self.hold_event(MessageEvent::Update(message));
                }
            }
            BusEvent::Event(MessageEvent::Delete(message)) => {
                if self.timeline.apply_delete(&message) {
                    self.reindex_from(&message);
                } else {
                    self.hold_event(MessageEvent::Delete(message));
                }
            }
            BusEvent::Resync => self.resync().await,
        }
    }

    /// Integrate a confirmed Insert from either the event stream or a
    /// storage ack. Both paths converge here so the ack/event race is
    /// idempotent.
    fn integrate_insert(&mut self, message: Message, known_pending: Option<PendingId>) {
        let matched = match known_pending {
            Some(pid) if self.timeline.get_pending(pid).is_some() => Some(pid),
            Some(_) => None, // already matched by the event stream
            None => self.ledger.match_insert(&message),
        };
        let durable = message.key.durable();

        if let Some(pid) = matched {
            debug!(pending = %pid, "send confirmed");
            self.search.remove(MessageKey::Local(pid));
            self.timeline.confirm(pid, message);
        } else {
            self.timeline.insert_remote(message);
        }

        if let Some(id) = durable {
            for held in self.buffer.take_for(id) {
                debug!(message = %id, "replaying buffered event");
                match held {
                    MessageEvent::Update(m) => {
                        self.timeline.apply_update(&m);
                    }
                    MessageEvent::Delete(m) => {
                        self.timeline.apply_delete(&m);
                    }
                    MessageEvent::Insert(m) => {
                        self.timeline.insert_remote(m);
                    }
                }
            }
            self.reindex_durable(id);
        }
    }

    fn hold_event(&mut self, event: MessageEvent) {
        if let Some(dropped) = self.buffer.hold(event) {
            debug!(
                target = ?dropped.target(),
                "event buffer full, dropped oldest held event"
            );
        }
    }

    async fn resync(&mut self) {
        let conversation = self.timeline.conversation_id();
        match self.storage.fetch_messages(conversation).await {
            Ok(messages) => {
                self.timeline.reset_from(messages);
                self.buffer.clear();
                self.sync_error = None;
                if let Some(query) = self.search_query.clone() {
                    self.search.set_query(&query, self.timeline.messages());
                }
                info!(conversation = %conversation, "resynced after subscription drop");
            }
            Err(error) => {
                warn!(conversation = %conversation, %error, "resync fetch failed");
                self.sync_error = Some(error.to_string());
            }
        }
    }

    // The deadline never fails a send by itself; the record stays Pending
    // and surfaces only as the snapshot's overdue flag.
    fn check_overdue(&mut self) {
        for pending_id in self.ledger.overdue(now_ms()) {
            warn!(pending = %pending_id, "send unacknowledged past deadline");
        }
    }

    fn dispatch_insert(&self, pending_id: PendingId, message: Message) {
        let storage = Arc::clone(&self.storage);
        let outcomes = self.outcome_tx.clone();
        tokio::spawn(async move {
            let outcome = match storage.insert_message(&message).await {
                Ok(confirmed) => WriteOutcome::SendOk {
                    pending_id,
                    confirmed,
                },
                Err(error) => WriteOutcome::SendErr { pending_id, error },
            };
            let _ = outcomes.send(outcome).await;
        });
    }

    fn dispatch_update(&self, message: Message, on_failure: WriteOutcome) {
        let storage = Arc::clone(&self.storage);
        let outcomes = self.outcome_tx.clone();
        tokio::spawn(async move {
            if storage.update_message(&message).await.is_err() {
                let _ = outcomes.send(on_failure).await;
            }
        });
    }

    fn reindex_durable(&mut self, id: MessageId) {
        if let Some(message) = self.timeline.get_durable(id).cloned() {
            self.search.reindex(&message);
        }
    }

    fn reindex_from(&mut self, incoming: &Message) {
        if let Some(id) = incoming.key.durable() {
            self.reindex_durable(id);
        }
    }

    fn build_snapshot(&self, conversation_id: ConversationId) -> TimelineSnapshot {
        TimelineSnapshot {
            conversation_id,
            messages: self
                .timeline
                .visible()
                .map(|view| MessageSnapshot {
                    overdue: view
                        .message
                        .key
                        .pending()
                        .is_some_and(|pid| self.ledger.is_overdue(pid)),
                    message: view.message.clone(),
                    grouped: view.grouped,
                    day_start: view.day_start,
                    reply_preview: view.reply_preview,
                })
                .collect(),
            search_hits: self.search.hit_count(),
            search_cursor: self.search.current(),
            sync_error: self.sync_error.clone(),
        }
    }

    fn publish(&self) {
        if let Some(tx) = &self.snapshot_tx {
            let snapshot = self.build_snapshot(self.timeline.conversation_id());
            let _ = tx.send(snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MockStorage;
    use murmur_types::DeliveryState;

    fn open(
        storage: &MockStorage,
        config: ClientConfig,
    ) -> (ConversationHandle, mpsc::Sender<BusEvent>, UserId, ConversationId) {
        let conversation = ConversationId::new();
        let user = UserId::new();
        let (bus_tx, bus_rx) = mpsc::channel(16);
        let handle = spawn(
            conversation,
            user,
            Arc::new(storage.clone()),
            bus_rx,
            Vec::new(),
            &config,
            Arc::new(DashMap::new()),
        );
        (handle, bus_tx, user, conversation)
    }

    async fn wait_for(
        rx: &mut watch::Receiver<TimelineSnapshot>,
        check: impl Fn(&TimelineSnapshot) -> bool,
    ) -> TimelineSnapshot {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let snap = rx.borrow();
                    if check(&snap) {
                        return snap.clone();
                    }
                }
                rx.changed().await.expect("actor stopped");
            }
        })
        .await
        .expect("snapshot condition not reached")
    }

    fn remote_insert(conversation: ConversationId, author: UserId, body: &str, at: u64) -> Message {
        let mut msg = Message::pending(conversation, author, Draft::text(body), at);
        msg.key = MessageKey::Durable(MessageId::new());
        msg.created_at = Some(at);
        msg
    }

    #[tokio::test]
    async fn send_confirms_through_storage_ack() {
        let storage = MockStorage::new();
        let (handle, _bus, _user, _conv) = open(&storage, ClientConfig::new());
        let mut rx = handle.watch();

        let pending_id = handle.send(Draft::text("hello")).await.unwrap();
        let snap = handle.snapshot();
        assert_eq!(snap.messages.len(), 1);
        assert_eq!(snap.messages[0].message.key, MessageKey::Local(pending_id));

        let snap = wait_for(&mut rx, |s| {
            s.messages.len() == 1 && s.messages[0].message.delivery == DeliveryState::Confirmed
        })
        .await;
        assert!(snap.messages[0].message.key.durable().is_some());
        assert_eq!(snap.messages[0].message.body, "hello");
    }

    #[tokio::test]
    async fn transient_failures_retry_then_confirm() {
        let storage = MockStorage::new();
        storage.fail_next_inserts(2);
        let (handle, _bus, _user, _conv) = open(&storage, ClientConfig::new());
        let mut rx = handle.watch();

        handle.send(Draft::text("flaky")).await.unwrap();
        wait_for(&mut rx, |s| {
            s.messages
                .first()
                .is_some_and(|m| m.message.delivery == DeliveryState::Confirmed)
        })
        .await;
        assert_eq!(storage.insert_attempts(), 3);
    }

    #[tokio::test]
    async fn exhausted_sends_park_as_failed_and_survive() {
        let storage = MockStorage::new();
        storage.fail_next_inserts(10);
        let (handle, _bus, _user, _conv) = open(&storage, ClientConfig::new());
        let mut rx = handle.watch();

        let pending_id = handle.send(Draft::text("doomed")).await.unwrap();
        let snap = wait_for(&mut rx, |s| {
            s.messages
                .first()
                .is_some_and(|m| m.message.delivery == DeliveryState::Failed)
        })
        .await;
        assert_eq!(snap.messages.len(), 1);
        assert_eq!(storage.insert_attempts(), 3);

        // An explicit retry gets a fresh budget and succeeds.
        storage.fail_next_inserts(0);
        handle.retry(pending_id).await.unwrap();
        wait_for(&mut rx, |s| {
            s.messages
                .first()
                .is_some_and(|m| m.message.delivery == DeliveryState::Confirmed)
        })
        .await;
    }

    #[tokio::test]
    async fn rejected_sends_fail_without_retry() {
        let storage = MockStorage::new();
        storage.reject_next_insert("not a member");
        let (handle, _bus, _user, _conv) = open(&storage, ClientConfig::new());
        let mut rx = handle.watch();

        handle.send(Draft::text("nope")).await.unwrap();
        wait_for(&mut rx, |s| {
            s.messages
                .first()
                .is_some_and(|m| m.message.delivery == DeliveryState::Failed)
        })
        .await;
        assert_eq!(storage.insert_attempts(), 1);
    }

    #[tokio::test]
    async fn discard_removes_failed_send() {
        let storage = MockStorage::new();
        storage.reject_next_insert("nope");
        let (handle, _bus, _user, _conv) = open(&storage, ClientConfig::new());
        let mut rx = handle.watch();

        let pending_id = handle.send(Draft::text("gone")).await.unwrap();
        wait_for(&mut rx, |s| {
            s.messages
                .first()
                .is_some_and(|m| m.message.delivery == DeliveryState::Failed)
        })
        .await;

        handle.discard(pending_id).await.unwrap();
        wait_for(&mut rx, |s| s.messages.is_empty()).await;
        assert!(matches!(
            handle.discard(pending_id).await,
            Err(ChatError::UnknownPending(_))
        ));
    }

    #[tokio::test]
    async fn event_confirmation_keeps_count_stable() {
        let storage = MockStorage::new();
        // Storage never answers within the test; confirmation must come
        // from the event stream.
        storage.delay_inserts(Duration::from_secs(60));
        let (handle, bus, user, conversation) = open(&storage, ClientConfig::new());
        let mut rx = handle.watch();

        let pending_id = handle.send(Draft::text("hi")).await.unwrap();
        // The matching Insert arrives from the push channel first.
        let confirmed = remote_insert(conversation, user, "hi", 42);
        bus.send(BusEvent::Event(MessageEvent::Insert(confirmed.clone())))
            .await
            .unwrap();

        let snap = wait_for(&mut rx, |s| {
            s.messages
                .first()
                .is_some_and(|m| m.message.key == confirmed.key)
        })
        .await;
        assert_eq!(snap.messages.len(), 1);
        assert!(snap
            .messages
            .iter()
            .all(|m| m.message.key != MessageKey::Local(pending_id)));
    }

    #[tokio::test]
    async fn update_before_insert_is_buffered_and_replayed() {
        let storage = MockStorage::new();
        let (handle, bus, _user, conversation) = open(&storage, ClientConfig::new());
        let mut rx = handle.watch();

        let author = UserId::new();
        let message = remote_insert(conversation, author, "first draft", 10);
        let mut edited = message.clone();
        edited.body = "final version".into();
        edited.edited_at = Some(20);

        bus.send(BusEvent::Event(MessageEvent::Update(edited)))
            .await
            .unwrap();
        bus.send(BusEvent::Event(MessageEvent::Insert(message)))
            .await
            .unwrap();

        let snap = wait_for(&mut rx, |s| {
            s.messages
                .first()
                .is_some_and(|m| m.message.body == "final version")
        })
        .await;
        assert_eq!(snap.messages.len(), 1);
    }

    #[tokio::test]
    async fn remote_delete_tombstones_in_place() {
        let storage = MockStorage::new();
        let (handle, bus, _user, conversation) = open(&storage, ClientConfig::new());
        let mut rx = handle.watch();

        let message = remote_insert(conversation, UserId::new(), "oops", 10);
        let mut deleted = message.clone();
        deleted.deleted_at = Some(20);

        bus.send(BusEvent::Event(MessageEvent::Insert(message)))
            .await
            .unwrap();
        bus.send(BusEvent::Event(MessageEvent::Delete(deleted)))
            .await
            .unwrap();

        let snap = wait_for(&mut rx, |s| {
            s.messages.first().is_some_and(|m| m.message.is_deleted())
        })
        .await;
        assert_eq!(snap.messages.len(), 1);
        assert_eq!(snap.messages[0].message.body, murmur_types::TOMBSTONE_BODY);
    }

    #[tokio::test]
    async fn edit_rolls_back_when_write_fails() {
        let storage = MockStorage::new();
        let conversation = ConversationId::new();
        let user = UserId::new();
        let seeded = remote_insert(conversation, user, "original", 10);
        let id = seeded.key.durable().unwrap();
        storage.seed_message(seeded.clone());

        let (bus_tx, bus_rx) = mpsc::channel(16);
        let _keep_bus = bus_tx;
        let handle = spawn(
            conversation,
            user,
            Arc::new(storage.clone()),
            bus_rx,
            vec![seeded],
            &ClientConfig::new(),
            Arc::new(DashMap::new()),
        );
        let mut rx = handle.watch();

        storage.delay_updates(Duration::from_millis(100));
        storage.fail_next_update("offline");
        handle.edit(id, "changed").await.unwrap();
        // Optimistic state is visible first, then rolled back exactly.
        assert_eq!(handle.snapshot().messages[0].message.body, "changed");
        wait_for(&mut rx, |s| {
            s.messages
                .first()
                .is_some_and(|m| m.message.body == "original" && m.message.edited_at.is_none())
        })
        .await;
    }

    #[tokio::test]
    async fn resync_refetches_and_clears_error() {
        let storage = MockStorage::new();
        let (handle, bus, _user, conversation) = open(&storage, ClientConfig::new());
        let mut rx = handle.watch();

        storage.seed_message(remote_insert(conversation, UserId::new(), "recovered", 10));
        storage.fail_next_fetch("relay gone");

        bus.send(BusEvent::Resync).await.unwrap();
        wait_for(&mut rx, |s| s.sync_error.is_some()).await;

        bus.send(BusEvent::Resync).await.unwrap();
        let snap = wait_for(&mut rx, |s| {
            s.sync_error.is_none() && s.messages.len() == 1
        })
        .await;
        assert_eq!(snap.messages[0].message.body, "recovered");
    }

    #[tokio::test]
    async fn overdue_sends_stay_pending_until_the_late_ack() {
        let storage = MockStorage::new();
        storage.delay_inserts(Duration::from_millis(300));
        let config =
            ClientConfig::new().with_reconcile_timeout(Duration::from_millis(40));
        let (handle, _bus, _user, _conv) = open(&storage, config);
        let mut rx = handle.watch();

        handle.send(Draft::text("stuck")).await.unwrap();
        // The deadline fires before the ack; the send is flagged overdue
        // but never auto-failed, since the write may simply be delayed.
        let snap = wait_for(&mut rx, |s| {
            s.messages.first().is_some_and(|m| m.overdue)
        })
        .await;
        assert_eq!(snap.messages[0].message.delivery, DeliveryState::Pending);
        // The late ack confirms it and the flag clears.
        let snap = wait_for(&mut rx, |s| {
            s.messages
                .first()
                .is_some_and(|m| m.message.delivery == DeliveryState::Confirmed)
        })
        .await;
        assert!(!snap.messages[0].overdue);
    }

    #[tokio::test]
    async fn search_commands_drive_the_cursor() {
        let storage = MockStorage::new();
        let conversation = ConversationId::new();
        let user = UserId::new();
        let initial = vec![
            remote_insert(conversation, user, "alpha hit", 10),
            remote_insert(conversation, user, "nothing", 20),
            remote_insert(conversation, user, "beta HIT", 30),
        ];
        let newest_key = initial[2].key;

        let (bus_tx, bus_rx) = mpsc::channel(16);
        let _keep_bus = bus_tx;
        let handle = spawn(
            conversation,
            user,
            Arc::new(storage.clone()),
            bus_rx,
            initial,
            &ClientConfig::new(),
            Arc::new(DashMap::new()),
        );

        assert_eq!(handle.search("hit").await.unwrap(), 2);
        assert_eq!(handle.search_next().await.unwrap(), Some(newest_key));
        handle.clear_search().await.unwrap();
        assert_eq!(handle.search_next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn dropping_the_last_handle_releases_the_open_marker() {
        let storage = MockStorage::new();
        let open_set = Arc::new(DashMap::new());
        let conversation = ConversationId::new();
        let (bus_tx, bus_rx) = mpsc::channel(16);
        let handle = spawn(
            conversation,
            UserId::new(),
            Arc::new(storage),
            bus_rx,
            Vec::new(),
            &ClientConfig::new(),
            Arc::clone(&open_set),
        );
        assert!(open_set.contains_key(&conversation));

        let second = handle.clone();
        drop(handle);
        assert!(open_set.contains_key(&conversation));
        second.close();
        drop(bus_tx);

        tokio::time::timeout(Duration::from_secs(2), async {
            while open_set.contains_key(&conversation) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("actor did not release the conversation");
    }
}
