//! Client configuration.

use murmur_core::{DEFAULT_MAX_SEND_ATTEMPTS, DEFAULT_RECONCILE_TIMEOUT_MS, DEFAULT_UPDATE_BUFFER_CAP};
use std::time::Duration;

/// Default cap on results returned by a cross-conversation search.
pub const DEFAULT_GLOBAL_SEARCH_LIMIT: usize = 50;

/// Configuration for [`ChatClient`](crate::ChatClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Automatic attempts per outbound send before parking it as Failed.
    pub max_send_attempts: u32,
    /// How long a dispatched send may sit unacknowledged before being
    /// flagged overdue. Advisory: the send stays Pending and a late ack
    /// still confirms it.
    pub reconcile_timeout: Duration,
    /// Cap on buffered out-of-order events per conversation.
    pub update_buffer_cap: usize,
    /// Result cap for cross-conversation search.
    pub global_search_limit: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_send_attempts: DEFAULT_MAX_SEND_ATTEMPTS,
            reconcile_timeout: Duration::from_millis(DEFAULT_RECONCILE_TIMEOUT_MS),
            update_buffer_cap: DEFAULT_UPDATE_BUFFER_CAP,
            global_search_limit: DEFAULT_GLOBAL_SEARCH_LIMIT,
        }
    }
}

impl ClientConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the send retry budget (minimum 1).
    pub fn with_max_send_attempts(mut self, attempts: u32) -> Self {
        self.max_send_attempts = attempts.max(1);
        self
    }

    /// Set the overdue-send window.
    pub fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    /// Set the out-of-order event buffer capacity.
    pub fn with_update_buffer_cap(mut self, cap: usize) -> Self {
        self.update_buffer_cap = cap;
        self
    }

    /// Set the cross-conversation search result cap.
    pub fn with_global_search_limit(mut self, limit: usize) -> Self {
        self.global_search_limit = limit;
        self
    }
}
