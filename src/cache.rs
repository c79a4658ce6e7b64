//! Prepared-statement cache.
//!
//! Maps raw SQL text (byte identity, no normalization) to a server-side
//! statement. A statement is parsed anonymously until it has been executed
//! `threshold` times; at the threshold it is promoted to a named server-side
//! prepared statement and Parse is skipped from then on. Capacity is
//! enforced by LRU eviction; evicting or invalidating a promoted entry
//! schedules a protocol-level Close for its server name.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::protocol::types::Oid;

/// A cached statement.
#[derive(Debug, Clone, Default)]
pub struct PreparedEntry {
    /// Server-side statement name; empty until promoted.
    pub server_name: String,
    /// Parameter type OIDs recorded from the promoting Parse.
    pub param_oids: Vec<Oid>,
    /// Result column type OIDs recorded from the promoting Describe.
    pub result_oids: Vec<Oid>,
    /// Number of times this SQL has been executed.
    pub uses: u32,
}

/// Outcome of a cache lookup for one execution.
#[derive(Debug, Clone)]
pub struct Touch {
    /// Name to use for Parse/Bind; `None` keeps the unnamed statement.
    pub server_name: Option<String>,
    /// Whether a Parse message must be sent this round.
    pub must_parse: bool,
}

impl Touch {
    fn anonymous() -> Self {
        Self {
            server_name: None,
            must_parse: true,
        }
    }
}

/// Bounded SQL → [`PreparedEntry`] mapping.
pub struct StatementCache {
    entries: Option<LruCache<String, PreparedEntry>>,
    threshold: u32,
    next_name: u64,
    pending_closes: Vec<String>,
}

impl StatementCache {
    /// `threshold == 0` or `capacity == 0` disables caching entirely.
    pub fn new(threshold: u32, capacity: usize) -> Self {
        let entries = if threshold == 0 {
            None
        } else {
            NonZeroUsize::new(capacity).map(LruCache::new)
        };
        Self {
            entries,
            threshold,
            next_name: 0,
            pending_closes: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record one execution of `sql` and decide how to run it.
    ///
    /// This is the only point that refreshes LRU order: once per execute,
    /// at lookup, never again at bind time.
    pub fn touch(&mut self, sql: &str) -> Touch {
        let threshold = self.threshold;
        let next_name = &mut self.next_name;
        let pending_closes = &mut self.pending_closes;
        let Some(entries) = &mut self.entries else {
            return Touch::anonymous();
        };

        if entries.get(sql).is_none() {
            if entries.len() == usize::from(entries.cap()) {
                if let Some((_, evicted)) = entries.pop_lru() {
                    if !evicted.server_name.is_empty() {
                        pending_closes.push(evicted.server_name);
                    }
                }
            }
            entries.put(sql.to_string(), PreparedEntry::default());
        }

        let Some(entry) = entries.get_mut(sql) else {
            return Touch::anonymous();
        };
        entry.uses = entry.uses.saturating_add(1);

        if entry.uses < threshold {
            Touch::anonymous()
        } else if entry.uses == threshold {
            // promote: the next Parse registers the statement server-side
            *next_name += 1;
            let name = format!("_strand_{next_name}");
            entry.server_name = name.clone();
            Touch {
                server_name: Some(name),
                must_parse: true,
            }
        } else {
            Touch {
                server_name: Some(entry.server_name.clone()),
                must_parse: false,
            }
        }
    }

    /// Record the parameter OIDs sent with the promoting Parse.
    pub fn store_param_oids(&mut self, sql: &str, param_oids: Vec<Oid>) {
        if let Some(entry) = self.entries.as_mut().and_then(|e| e.peek_mut(sql)) {
            entry.param_oids = param_oids;
        }
    }

    /// Record the result column OIDs observed while promoting.
    pub fn store_result_oids(&mut self, sql: &str, result_oids: Vec<Oid>) {
        if let Some(entry) = self.entries.as_mut().and_then(|e| e.peek_mut(sql)) {
            entry.result_oids = result_oids;
        }
    }

    /// The result column OIDs recorded for a promoted statement.
    pub fn result_oids(&self, sql: &str) -> Option<&[Oid]> {
        let entry = self.entries.as_ref()?.peek(sql)?;
        if entry.server_name.is_empty() {
            None
        } else {
            Some(&entry.result_oids)
        }
    }

    /// True when `sql` currently maps to a promoted statement.
    pub fn is_promoted(&self, sql: &str) -> bool {
        self.entries
            .as_ref()
            .and_then(|e| e.peek(sql))
            .is_some_and(|entry| !entry.server_name.is_empty())
    }

    /// Drop an entry.
    ///
    /// With `deallocate` set, a promoted entry's server name is scheduled
    /// for a Close message; pass false when the server already discarded
    /// the statement (invalid statement name).
    pub fn invalidate(&mut self, sql: &str, deallocate: bool) {
        if let Some(entry) = self.entries.as_mut().and_then(|e| e.pop(sql)) {
            tracing::debug!(sql, "invalidating cached statement");
            if deallocate {
                self.schedule_close(entry);
            }
        }
    }

    fn schedule_close(&mut self, entry: PreparedEntry) {
        if !entry.server_name.is_empty() {
            self.pending_closes.push(entry.server_name);
        }
    }

    /// Server names awaiting a Close message, drained by the next execute.
    pub fn take_pending_closes(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending_closes)
    }
}
