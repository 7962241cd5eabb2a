//! Holding buffer for out-of-order remote events.
//!
//! The transport delivers events for one conversation in server-commit
//! order, but an Update or Delete can still reference a message whose
//! Insert this client has not seen yet (e.g. right after a resubscribe).
//! Such events are held here, keyed by their target id, and replayed in
//! arrival order once the Insert lands.
//!
//! The buffer is bounded: beyond the cap the oldest held event is dropped.
//! A later full Insert payload supersedes stale edits, so the drop is an
//! accepted lossy edge case.

use murmur_types::{MessageEvent, MessageId};
use std::collections::VecDeque;

/// Default maximum number of held events.
pub const DEFAULT_UPDATE_BUFFER_CAP: usize = 64;

/// Bounded buffer of Update/Delete events awaiting their Insert.
#[derive(Debug)]
pub struct UpdateBuffer {
    cap: usize,
    held: VecDeque<(MessageId, MessageEvent)>,
}

impl UpdateBuffer {
    /// Create a buffer with the given capacity.
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            held: VecDeque::new(),
        }
    }

    /// Hold an event until its target's Insert arrives.
    ///
    /// Returns the event that was evicted to make room, if the buffer was
    /// at capacity. Events without a durable target are returned
    /// immediately (nothing to wait for).
    pub fn hold(&mut self, event: MessageEvent) -> Option<MessageEvent> {
        let target = match event.target() {
            Some(id) => id,
            None => return Some(event),
        };
        let evicted = if self.held.len() >= self.cap {
            self.held.pop_front().map(|(_, e)| e)
        } else {
            None
        };
        self.held.push_back((target, event));
        evicted
    }

    /// Remove and return all held events targeting the given id, in
    /// arrival order.
    pub fn take_for(&mut self, id: MessageId) -> Vec<MessageEvent> {
        let mut taken = Vec::new();
        let mut remaining = VecDeque::with_capacity(self.held.len());
        for (target, event) in self.held.drain(..) {
            if target == id {
                taken.push(event);
            } else {
                remaining.push_back((target, event));
            }
        }
        self.held = remaining;
        taken
    }

    /// Number of held events.
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Drop everything (e.g. after a full resync).
    pub fn clear(&mut self) {
        self.held.clear();
    }
}

impl Default for UpdateBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATE_BUFFER_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_types::{ConversationId, Draft, Message, MessageKey, UserId};

    fn update_for(id: MessageId, body: &str) -> MessageEvent {
        let mut msg = Message::pending(ConversationId::new(), UserId::new(), Draft::text(body), 0);
        msg.key = MessageKey::Durable(id);
        msg.created_at = Some(0);
        MessageEvent::Update(msg)
    }

    #[test]
    fn holds_and_replays_in_arrival_order() {
        let mut buffer = UpdateBuffer::new(10);
        let id = MessageId::new();

        assert!(buffer.hold(update_for(id, "first")).is_none());
        assert!(buffer.hold(update_for(id, "second")).is_none());
        assert!(buffer.hold(update_for(MessageId::new(), "other")).is_none());

        let taken = buffer.take_for(id);
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].message().body, "first");
        assert_eq!(taken[1].message().body, "second");
        assert_eq!(buffer.len(), 1); // unrelated event stays held
    }

    #[test]
    fn drops_oldest_beyond_cap() {
        let mut buffer = UpdateBuffer::new(2);
        let id = MessageId::new();

        assert!(buffer.hold(update_for(id, "a")).is_none());
        assert!(buffer.hold(update_for(id, "b")).is_none());
        let evicted = buffer.hold(update_for(id, "c")).unwrap();
        assert_eq!(evicted.message().body, "a");

        let taken = buffer.take_for(id);
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].message().body, "b");
    }

    #[test]
    fn event_without_durable_target_is_rejected() {
        let mut buffer = UpdateBuffer::new(2);
        let pending_payload = Message::pending(
            ConversationId::new(),
            UserId::new(),
            Draft::text("x"),
            0,
        );
        let event = MessageEvent::Update(pending_payload);
        assert!(buffer.hold(event).is_some());
        assert!(buffer.is_empty());
    }

    #[test]
    fn take_for_unknown_id_returns_empty() {
        let mut buffer = UpdateBuffer::new(2);
        buffer.hold(update_for(MessageId::new(), "a"));
        assert!(buffer.take_for(MessageId::new()).is_empty());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn clear_removes_all() {
        let mut buffer = UpdateBuffer::new(4);
        buffer.hold(update_for(MessageId::new(), "a"));
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
