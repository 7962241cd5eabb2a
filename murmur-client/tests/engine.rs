//! End-to-end engine tests: a client wired to mock backends, exercised
//! through the public API the way an application would.

use murmur_client::{ChatClient, ClientConfig, MockEventBus, MockStorage, TimelineSnapshot};
use murmur_types::{
    Conversation, ConversationId, DeliveryState, Draft, Message, MessageEvent, MessageId,
    MessageKey, UserId, TOMBSTONE_BODY,
};
use std::time::Duration;
use tokio::sync::watch;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur_client=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn confirmed(conversation: ConversationId, author: UserId, body: &str, at: u64) -> Message {
    let mut msg = Message::pending(conversation, author, Draft::text(body), at);
    msg.key = MessageKey::Durable(MessageId::new());
    msg.created_at = Some(at);
    msg
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
            rx.changed().await.expect("engine stopped");
        }
    })
    .await
    .expect("snapshot condition not reached")
}

async fn setup() -> (
    MockStorage,
    MockEventBus,
    ChatClient<MockStorage, MockEventBus>,
    ConversationId,
) {
    init_tracing();
    let storage = MockStorage::new();
    let bus = MockEventBus::new();
    let conversation = Conversation::direct(ConversationId::new(), "peer");
    let id = conversation.id;
    storage.seed_conversation(conversation);
    let client = ChatClient::connect(
        UserId::new(),
        storage.clone(),
        bus.clone(),
        ClientConfig::new(),
    )
    .await
    .expect("connect");
    (storage, bus, client, id)
}

#[tokio::test(flavor = "multi_thread")]
async fn timeline_orders_by_timestamp_regardless_of_arrival() {
    let (_storage, bus, client, id) = setup().await;
    let handle = client.open_conversation(id).await.unwrap();
    let mut rx = handle.watch();

    let author = UserId::new();
    // m1 has the later timestamp but arrives first.
    bus.emit(MessageEvent::Insert(confirmed(id, author, "m1", 10)))
        .await;
    bus.emit(MessageEvent::Insert(confirmed(id, author, "m2", 5)))
        .await;

    let snap = wait_for(&mut rx, |s| s.messages.len() == 2).await;
    let bodies: Vec<&str> = snap.messages.iter().map(|m| m.message.body.as_str()).collect();
    assert_eq!(bodies, vec!["m2", "m1"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn optimistic_send_converges_to_exactly_one_message() {
    let (storage, _bus, client, id) = setup().await;
    let handle = client.open_conversation(id).await.unwrap();
    let mut rx = handle.watch();

    handle.send(Draft::text("hello")).await.unwrap();
    // Exactly one message before and after confirmation.
    assert_eq!(handle.snapshot().messages.len(), 1);
    let snap = wait_for(&mut rx, |s| {
        s.messages
            .first()
            .is_some_and(|m| m.message.delivery == DeliveryState::Confirmed)
    })
    .await;
    assert_eq!(snap.messages.len(), 1);
    assert_eq!(storage.stored_messages(id).len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_send_fails_after_three_attempts_and_never_vanishes() {
    let (storage, _bus, client, id) = setup().await;
    storage.fail_next_inserts(10);
    let handle = client.open_conversation(id).await.unwrap();
    let mut rx = handle.watch();

    handle.send(Draft::text("offline")).await.unwrap();
    let snap = wait_for(&mut rx, |s| {
        s.messages
            .first()
            .is_some_and(|m| m.message.delivery == DeliveryState::Failed)
    })
    .await;
    assert_eq!(snap.messages.len(), 1);
    assert_eq!(storage.insert_attempts(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_edit_and_delete_apply_in_place() {
    let (_storage, bus, client, id) = setup().await;
    let handle = client.open_conversation(id).await.unwrap();
    let mut rx = handle.watch();

    let message = confirmed(id, UserId::new(), "draft", 10);
    bus.emit(MessageEvent::Insert(message.clone())).await;

    let mut edited = message.clone();
    edited.body = "polished".into();
    edited.edited_at = Some(20);
    bus.emit(MessageEvent::Update(edited)).await;
    wait_for(&mut rx, |s| {
        s.messages.first().is_some_and(|m| m.message.body == "polished")
    })
    .await;

    let mut deleted = message;
    deleted.deleted_at = Some(30);
    bus.emit(MessageEvent::Delete(deleted)).await;
    let snap = wait_for(&mut rx, |s| {
        s.messages.first().is_some_and(|m| m.message.is_deleted())
    })
    .await;
    assert_eq!(snap.messages.len(), 1); // tombstoned, never removed
    assert_eq!(snap.messages[0].message.body, TOMBSTONE_BODY);
}

#[tokio::test(flavor = "multi_thread")]
async fn reaction_toggle_roundtrip() {
    let (storage, _bus, client, id) = setup().await;
    let seeded = confirmed(id, UserId::new(), "react to me", 10);
    let target = seeded.key.durable().unwrap();
    storage.seed_message(seeded);

    let handle = client.open_conversation(id).await.unwrap();
    assert!(handle.toggle_reaction(target, "🔥").await.unwrap());
    assert!(!handle.toggle_reaction(target, "🔥").await.unwrap());
    let snap = handle.snapshot();
    assert!(snap.messages[0].message.reactions.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn ranked_list_tracks_activity_across_conversations() {
    init_tracing();
    let storage = MockStorage::new();
    let bus = MockEventBus::new();
    let a = Conversation::direct(ConversationId::new(), "a");
    let b = Conversation::direct(ConversationId::new(), "b");
    let (a_id, b_id) = (a.id, b.id);
    storage.seed_conversation(a);
    storage.seed_conversation(b);

    let client = ChatClient::connect(
        UserId::new(),
        storage.clone(),
        bus.clone(),
        ClientConfig::new(),
    )
    .await
    .unwrap();
    let mut list_rx = client.conversations();

    client.set_conversation_pinned(a_id, true).await.unwrap();
    bus.emit(MessageEvent::Insert(confirmed(b_id, UserId::new(), "ping", 99)))
        .await;

    let list = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let list = list_rx.borrow();
                if list.iter().any(|c| c.unread_count == 1) {
                    return list.clone();
                }
            }
            list_rx.changed().await.expect("client stopped");
        }
    })
    .await
    .expect("unread not recorded");

    // Pinned stays above the unread conversation.
    assert_eq!(list[0].id, a_id);
    assert_eq!(list[1].id, b_id);
    assert_eq!(list[1].unread_count, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn resync_recovers_from_subscription_drop() {
    let (storage, bus, client, id) = setup().await;
    let handle = client.open_conversation(id).await.unwrap();
    let mut rx = handle.watch();

    // Missed while disconnected.
    storage.seed_message(confirmed(id, UserId::new(), "missed", 10));
    bus.emit_resync(id).await;

    let snap = wait_for(&mut rx, |s| s.messages.len() == 1).await;
    assert_eq!(snap.messages[0].message.body, "missed");
    assert!(snap.sync_error.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn in_conversation_search_walks_hits() {
    let (storage, _bus, client, id) = setup().await;
    let author = UserId::new();
    storage.seed_message(confirmed(id, author, "first needle", 10));
    storage.seed_message(confirmed(id, author, "chaff", 20));
    storage.seed_message(confirmed(id, author, "second NEEDLE", 30));

    let handle = client.open_conversation(id).await.unwrap();
    assert_eq!(handle.search("needle").await.unwrap(), 2);

    let newest = handle.search_next().await.unwrap().expect("a hit");
    let older = handle.search_next().await.unwrap().expect("a hit");
    assert_ne!(newest, older);
    // Circular: stepping past the oldest wraps to the newest.
    assert_eq!(handle.search_next().await.unwrap(), Some(newest));
}
