//! Reconciliation of speculative sends against the confirmed stream.
//!
//! Every outbound send is tracked here from dispatch until it is either
//! confirmed (by the storage ack or by a matching Insert event, whichever
//! arrives first) or exhausted. The ledger is pure bookkeeping; the actor
//! in murmur-client drives it and applies the resulting timeline edits.

use murmur_types::{Message, PendingId, UserId};

/// Maximum automatic attempts for one outbound send before the message is
/// parked as Failed and handed to the user.
pub const DEFAULT_MAX_SEND_ATTEMPTS: u32 = 3;

/// How long a dispatched send may sit unacknowledged before it is flagged
/// overdue. Advisory: a late ack or matching Insert still confirms it.
pub const DEFAULT_RECONCILE_TIMEOUT_MS: u64 = 10_000;

/// What to do with a send after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Budget remains; dispatch again. Carries the attempt number the
    /// retry will be.
    Retry {
        /// 1-based attempt number of the upcoming retry.
        attempt: u32,
    },
    /// Budget exhausted; park the message as Failed.
    Exhausted,
}

#[derive(Debug, Clone)]
struct PendingRecord {
    pending_id: PendingId,
    author_id: UserId,
    body: String,
    attachment: Option<String>,
    dispatched_at: u64,
    attempts: u32,
    overdue_flagged: bool,
}

/// In-flight sends awaiting confirmation, in dispatch order.
#[derive(Debug, Default)]
pub struct PendingLedger {
    max_attempts: u32,
    timeout_ms: u64,
    records: Vec<PendingRecord>,
}

impl PendingLedger {
    /// Create a ledger with the given retry budget and overdue window.
    pub fn new(max_attempts: u32, timeout_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            timeout_ms,
            records: Vec::new(),
        }
    }

    /// Register a freshly dispatched send (attempt 1).
    pub fn track(
        &mut self,
        pending_id: PendingId,
        author_id: UserId,
        body: String,
        attachment: Option<String>,
        now: u64,
    ) {
        self.records.push(PendingRecord {
            pending_id,
            author_id,
            body,
            attachment,
            dispatched_at: now,
            attempts: 1,
            overdue_flagged: false,
        });
    }

    /// Match a confirmed Insert against the oldest in-flight send with the
    /// same `(author, body, attachment)` tuple, removing it.
    ///
    /// Two identical in-flight sends resolve in dispatch order, so each
    /// Insert claims at most one record.
    pub fn match_insert(&mut self, incoming: &Message) -> Option<PendingId> {
        let pos = self.records.iter().position(|r| {
            r.author_id == incoming.author_id
                && r.body == incoming.body
                && r.attachment == incoming.attachment
        })?;
        Some(self.records.remove(pos).pending_id)
    }

    /// Remove a record confirmed directly by the storage ack.
    pub fn confirm(&mut self, pending_id: PendingId) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.pending_id != pending_id);
        self.records.len() != before
    }

    /// Record a failed attempt. Within budget the record stays tracked
    /// (with a fresh dispatch time) for another attempt; beyond it the
    /// record is removed and the message is the user's to retry or discard.
    pub fn record_failure(&mut self, pending_id: PendingId, now: u64) -> FailureDisposition {
        let Some(record) = self.records.iter_mut().find(|r| r.pending_id == pending_id) else {
            return FailureDisposition::Exhausted;
        };
        if record.attempts >= self.max_attempts {
            self.records.retain(|r| r.pending_id != pending_id);
            return FailureDisposition::Exhausted;
        }
        record.attempts += 1;
        record.dispatched_at = now;
        record.overdue_flagged = false;
        FailureDisposition::Retry {
            attempt: record.attempts,
        }
    }

    /// Re-arm a previously exhausted send after an explicit user retry.
    pub fn retrack(
        &mut self,
        pending_id: PendingId,
        author_id: UserId,
        body: String,
        attachment: Option<String>,
        now: u64,
    ) {
        self.confirm(pending_id); // drop any stale record first
        self.track(pending_id, author_id, body, attachment, now);
    }

    /// Drop a record whose message the user discarded.
    pub fn discard(&mut self, pending_id: PendingId) -> bool {
        self.confirm(pending_id)
    }

    /// Records dispatched longer ago than the overdue window that have not
    /// been flagged yet. Each record is reported once per dispatch; it
    /// stays tracked so a late ack can still confirm it.
    pub fn overdue(&mut self, now: u64) -> Vec<PendingId> {
        let mut out = Vec::new();
        for record in &mut self.records {
            if !record.overdue_flagged
                && now.saturating_sub(record.dispatched_at) >= self.timeout_ms
            {
                record.overdue_flagged = true;
                out.push(record.pending_id);
            }
        }
        out
    }

    /// Whether a pending id is still tracked.
    pub fn contains(&self, pending_id: PendingId) -> bool {
        self.records.iter().any(|r| r.pending_id == pending_id)
    }

    /// Whether a tracked send is currently past its overdue window.
    /// Cleared by a retry (fresh dispatch) and moot once the record
    /// resolves.
    pub fn is_overdue(&self, pending_id: PendingId) -> bool {
        self.records
            .iter()
            .any(|r| r.pending_id == pending_id && r.overdue_flagged)
    }

    /// Number of in-flight sends.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
