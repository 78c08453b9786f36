//! Time-windowed duplicate suppression for decoded symbols

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::recognizer::DecodedRecord;

/// Remembers when each distinct record was last reported.
///
/// Entries are keyed by the whole record. Without eviction the table only
/// ever grows; [`DedupCache::with_eviction`] opts into purging stale keys.
#[derive(Debug)]
pub struct DedupCache {
    timeout: Duration,
    evict_after: Option<Duration>,
    last_seen: HashMap<DecodedRecord, Instant>,
}

impl DedupCache {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            evict_after: None,
            last_seen: HashMap::new(),
        }
    }

    /// Also drop entries not refreshed for `evict_after` (never less than
    /// `timeout`, or live suppressions would be lost).
    pub fn with_eviction(timeout: Duration, evict_after: Duration) -> Self {
        Self {
            evict_after: Some(evict_after.max(timeout)),
            ..Self::new(timeout)
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns true when `record` was recorded less than `timeout` before
    /// `now`; the entry is left untouched in that case. Otherwise stores
    /// `now` for it and returns false.
    pub fn seen(&mut self, record: &DecodedRecord, now: Instant) -> bool {
        if let Some(last) = self.last_seen.get_mut(record) {
            if now.saturating_duration_since(*last) < self.timeout {
                return true;
            }
            *last = now;
            return false;
        }

        self.last_seen.insert(record.clone(), now);
        false
    }

    /// Drop entries older than the eviction age; no-op unless enabled
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let Some(max_age) = self.evict_after else {
            return 0;
        };
        let before = self.last_seen.len();
        self.last_seen
            .retain(|_, last| now.saturating_duration_since(*last) < max_age);
        before - self.last_seen.len()
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}
