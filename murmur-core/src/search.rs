//! In-conversation search over the loaded timeline.
//!
//! Case-insensitive substring match over message bodies, maintained
//! incrementally as messages arrive, change, or are tombstoned. The hit
//! list stays in timeline order and carries a circular cursor: `next`
//! walks toward older hits starting from the most recent, `prev` walks
//! back toward newer ones, both wrapping.

use murmur_types::{Message, MessageKey, SortKey};

/// Incremental substring index for one conversation.
#[derive(Debug, Default)]
pub struct SearchIndex {
    query: Option<String>,
    hits: Vec<(SortKey, MessageKey)>,
    cursor: Option<usize>,
}

impl SearchIndex {
    /// Create an empty index with no active query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a query is currently active.
    pub fn is_active(&self) -> bool {
        self.query.is_some()
    }

    /// Number of current hits.
    pub fn hit_count(&self) -> usize {
        self.hits.len()
    }

    /// Start a search, scanning the given messages (ascending timeline
    /// order not required; hits are sorted here). A blank query clears the
    /// index. Returns the hit count.
    pub fn set_query<'a>(
        &mut self,
        query: &str,
        messages: impl Iterator<Item = &'a Message>,
    ) -> usize {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            self.clear();
            return 0;
        }
        let needle = trimmed.to_lowercase();
        self.hits = messages
            .filter(|m| Self::body_matches(m, &needle))
            .map(|m| (m.sort_key(), m.key))
            .collect();
        self.hits.sort_unstable_by_key(|(key, _)| *key);
        self.query = Some(needle);
        self.cursor = None;
        self.hits.len()
    }

    /// Drop the query and all hits.
    pub fn clear(&mut self) {
        self.query = None;
        self.hits.clear();
        self.cursor = None;
    }

    /// The hit under the cursor, if a step has been taken.
    pub fn current(&self) -> Option<MessageKey> {
        self.cursor.map(|i| self.hits[i].1)
    }

    /// Step to the next hit, toward older messages. The first step lands
    /// on the most recent hit; stepping past the oldest wraps around.
    pub fn next(&mut self) -> Option<MessageKey> {
        if self.hits.is_empty() {
            self.cursor = None;
            return None;
        }
        let last = self.hits.len() - 1;
        let i = match self.cursor {
            None => last,
            Some(0) => last,
            Some(i) => i - 1,
        };
        self.cursor = Some(i);
        Some(self.hits[i].1)
    }

    /// Step to the previous hit, toward newer messages, wrapping from the
    /// newest back to the oldest.
    pub fn prev(&mut self) -> Option<MessageKey> {
        if self.hits.is_empty() {
            self.cursor = None;
            return None;
        }
        let last = self.hits.len() - 1;
        let i = match self.cursor {
            None => last,
            Some(i) if i == last => 0,
            Some(i) => i + 1,
        };
        self.cursor = Some(i);
        Some(self.hits[i].1)
    }

    /// Reconsider one message after any timeline change: inserts join the
    /// hit list if they match, edits can join or leave it, tombstones
    /// always leave it. No-op without an active query.
    pub fn reindex(&mut self, message: &Message) {
        let Some(needle) = self.query.clone() else {
            return;
        };
        if Self::body_matches(message, &needle) {
            self.add(message);
        } else {
            self.remove(message.key);
        }
    }

    /// Drop a hit whose message left the timeline (discarded pending
    /// entry, or a pending hit re-keyed on confirmation).
    pub fn remove(&mut self, key: MessageKey) {
        let Some(at) = self.hits.iter().position(|(_, k)| *k == key) else {
            return;
        };
        self.hits.remove(at);
        self.cursor = match self.cursor {
            Some(_) if self.hits.is_empty() => None,
            Some(i) if i > at => Some(i - 1),
            Some(i) if i == at => Some(i.min(self.hits.len() - 1)),
            other => other,
        };
    }

    fn add(&mut self, message: &Message) {
        let entry = (message.sort_key(), message.key);
        match self.hits.binary_search_by_key(&entry.0, |(k, _)| *k) {
            Ok(at) => self.hits[at] = entry,
            Err(at) => {
                self.hits.insert(at, entry);
                if let Some(i) = self.cursor {
                    if at <= i {
                        self.cursor = Some(i + 1);
                    }
                }
            }
        }
    }

    fn body_matches(message: &Message, needle: &str) -> bool {
        !message.is_deleted() && message.body.to_lowercase().contains(needle)
    }
}
