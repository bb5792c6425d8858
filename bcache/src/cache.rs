//! Bounded LRU cache engine with timestamp-ordered merge.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::RwLock;
use tracing::trace;

use crate::entry::Entry;
use crate::error::CacheError;
use crate::message::{KeyedEntry, Message, PeerId};

/// A bounded, string-keyed LRU of `Entry` values, protected by its own
/// reader/writer lock. Owned by exactly one `Peer`.
pub struct Cache {
    peer_id: PeerId,
    inner: RwLock<LruCache<String, Entry>>,
    /// Count of entries purged by LRU eviction or read-time expiry/tombstone
    /// checks. Exposed for the `evictions_total` metric.
    evictions: AtomicU64,
}

impl Cache {
    /// Creates a cache with the given LRU capacity. `max_keys` must be
    /// positive.
    pub fn new(peer_id: PeerId, max_keys: i64) -> Result<Self, CacheError> {
        let cap = NonZeroUsize::new(max_keys.max(0) as usize)
            .ok_or(CacheError::InvalidCapacity(max_keys))?;
        Ok(Self {
            peer_id,
            inner: RwLock::new(LruCache::new(cap)),
            evictions: AtomicU64::new(0),
        })
    }

    /// Inserts or overwrites the entry for `key`, making it
    /// most-recently-used. Unconditional — callers are responsible for
    /// checking the ordering rule for remote inputs.
    pub fn set(&self, key: impl Into<String>, entry: Entry) {
        let mut guard = self.inner.write();
        self.put_tracked(&mut guard, key.into(), entry);
    }

    /// Returns `(value, true)` iff `key` is present and currently visible.
    /// An entry found expired or tombstoned at read time is purged.
    pub fn get(&self, key: &str) -> (String, bool) {
        let mut guard = self.inner.write();
        let now = now_ns();
        let stale = match guard.get(key) {
            Some(entry) if entry.is_visible(now) => return (entry.value.clone(), true),
            Some(_) => true,
            None => false,
        };
        if stale {
            trace!(key, "purging expired/tombstoned entry on read");
            guard.pop(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        (String::new(), false)
    }

    /// Inserts into `guard`, counting it as an eviction when the key is new
    /// and the LRU was already at capacity (so this insert displaced the
    /// least-recently-used entry).
    fn put_tracked(&self, guard: &mut LruCache<String, Entry>, key: String, entry: Entry) {
        let displaces = !guard.contains(&key) && guard.len() == guard.cap().get();
        guard.put(key, entry);
        if displaces {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Total entries purged so far by LRU eviction or read-time
    /// expiry/tombstone checks. Monotonically increasing.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Rewrites `key`'s entry with `deleted = delete_ts_ns`, preserving its
    /// value and expiration. Returns `(prev_value, prev_expired, existed)`.
    /// Non-existent keys cause no write.
    pub fn delete(&self, key: &str, delete_ts_ns: i64) -> (String, i64, bool) {
        let mut guard = self.inner.write();
        match guard.peek(key).cloned() {
            Some(cur) => {
                let prev_value = cur.value.clone();
                let prev_expired = cur.expired;
                guard.put(
                    key.to_string(),
                    Entry::new(cur.value, cur.expired, delete_ts_ns),
                );
                (prev_value, prev_expired, true)
            }
            None => (String::new(), 0, false),
        }
    }

    /// Snapshots every currently stored entry (including
    /// tombstoned-but-not-yet-purged ones) into one `Message`.
    pub fn messages(&self) -> Message {
        let guard = self.inner.read();
        let entries = guard
            .iter()
            .map(|(k, e)| (k.clone(), KeyedEntry::new(k.clone(), e.clone())))
            .collect();
        Message::from_entries(self.peer_id, entries)
    }

    /// Merges `msg` and returns a `Message` containing the entries that
    /// were newly learned or updated — the delta to propagate further. An
    /// empty-but-non-empty-input mapping is a valid result, signalling
    /// "received but nothing new".
    pub fn merge_delta(&self, msg: &Message) -> Message {
        let (delta, _changed) = self.merge(msg);
        delta
    }

    /// Same merge as `merge_delta`, but returns `None` if no entry was
    /// changed (distinguishes "nothing new" from "received empty", for
    /// pull-based gossip).
    pub fn merge_new(&self, msg: &Message) -> Option<Message> {
        let (delta, changed) = self.merge(msg);
        if changed == 0 {
            None
        } else {
            Some(delta)
        }
    }

    /// Merge semantics as above, for unicast state transfer. Returns
    /// nothing.
    pub fn merge_complete(&self, msg: &Message) {
        self.merge(msg);
    }

    fn merge(&self, msg: &Message) -> (Message, usize) {
        if msg.entries.is_empty() {
            return (Message::new(self.peer_id), 0);
        }

        let mut guard = self.inner.write();
        let mut accepted: HashMap<String, KeyedEntry> = HashMap::new();
        for (key, keyed) in &msg.entries {
            let incoming = keyed.entry();
            let current = guard.peek(key);
            if Entry::accepts(current, &incoming) {
                self.put_tracked(&mut guard, key.clone(), incoming.clone());
                accepted.insert(key.clone(), keyed.clone());
            } else {
                trace!(key, "rejecting stale/tied gossip entry");
            }
        }
        let changed = accepted.len();
        (Message::from_entries(self.peer_id, accepted), changed)
    }

    /// Current number of stored entries (including tombstones not yet
    /// purged). Exposed for metrics and the `LRU bound` property test.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn now_ns() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_nanos() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_keys: i64) -> Cache {
        Cache::new(1, max_keys).expect("cache construction")
    }

    #[test]
    fn set_then_get_roundtrips() {
        let c = cache(4);
        c.set("k1", Entry::new("v1", 0, 0));
        assert_eq!(c.get("k1"), ("v1".to_string(), true));
    }

    #[test]
    fn missing_key_is_absent() {
        let c = cache(4);
        assert_eq!(c.get("nope"), (String::new(), false));
    }

    #[test]
    fn expired_entry_is_absent_and_purged() {
        let c = cache(4);
        c.set("k1", Entry::new("v1", now_ns() - 1, 0));
        assert_eq!(c.get("k1"), (String::new(), false));
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn zero_expiry_never_expires() {
        let c = cache(4);
        c.set("k1", Entry::new("v1", 0, 0));
        assert_eq!(c.get("k1"), ("v1".to_string(), true));
    }

    #[test]
    fn delete_preserves_value_and_expiry() {
        let c = cache(4);
        c.set("k1", Entry::new("v1", 12345, 0));
        let (prev_value, prev_expired, existed) = c.delete("k1", now_ns() - 1);
        assert_eq!(prev_value, "v1");
        assert_eq!(prev_expired, 12345);
        assert!(existed);
        assert_eq!(c.get("k1"), (String::new(), false));
    }

    #[test]
    fn delete_of_unknown_key_is_noop() {
        let c = cache(4);
        let (_, _, existed) = c.delete("missing", now_ns());
        assert!(!existed);
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let c = cache(2);
        c.set("a", Entry::new("1", 0, 0));
        c.set("b", Entry::new("2", 0, 0));
        c.set("c", Entry::new("3", 0, 0));
        assert_eq!(c.len(), 2);
        assert_eq!(c.get("a"), (String::new(), false));
        assert_eq!(c.get("b").1, true);
        assert_eq!(c.get("c").1, true);
        assert_eq!(c.evictions(), 1);
    }

    #[test]
    fn overwriting_existing_key_is_not_counted_as_eviction() {
        let c = cache(2);
        c.set("a", Entry::new("1", 0, 0));
        c.set("a", Entry::new("2", 0, 0));
        assert_eq!(c.evictions(), 0);
    }

    #[test]
    fn read_time_purge_counts_as_eviction() {
        let c = cache(4);
        c.set("k1", Entry::new("v1", now_ns() - 1, 0));
        assert_eq!(c.get("k1"), (String::new(), false));
        assert_eq!(c.evictions(), 1);
    }

    #[test]
    fn merge_new_key_is_accepted_and_returned_in_delta() {
        let c = cache(4);
        let msg = Message::single(2, "k1", Entry::new("v1", 100, 0));
        let delta = c.merge_delta(&msg);
        assert_eq!(delta.entries.len(), 1);
        assert_eq!(c.get("k1"), ("v1".to_string(), true));
    }

    #[test]
    fn merge_rejects_entry_with_lower_expired() {
        let c = cache(4);
        c.set("k1", Entry::new("v1", 200, 0));
        let msg = Message::single(2, "k1", Entry::new("v2", 100, 0));
        let delta = c.merge_delta(&msg);
        assert!(delta.entries.is_empty());
        assert_eq!(c.get("k1"), ("v1".to_string(), true));
    }

    #[test]
    fn merge_new_returns_none_when_nothing_changed() {
        let c = cache(4);
        c.set("k1", Entry::new("v1", 200, 0));
        let msg = Message::single(2, "k1", Entry::new("v2", 100, 0));
        assert!(c.merge_new(&msg).is_none());
    }

    #[test]
    fn merge_new_returns_some_when_something_changed() {
        let c = cache(4);
        let msg = Message::single(2, "k1", Entry::new("v1", 100, 0));
        assert!(c.merge_new(&msg).is_some());
    }

    #[test]
    fn merge_delta_on_empty_message_is_empty_not_panic() {
        let c = cache(4);
        let msg = Message::new(2);
        let delta = c.merge_delta(&msg);
        assert!(delta.is_empty());
    }

    #[test]
    fn merge_complete_applies_without_returning() {
        let c = cache(4);
        let msg = Message::single(2, "k1", Entry::new("v1", 100, 0));
        c.merge_complete(&msg);
        assert_eq!(c.get("k1"), ("v1".to_string(), true));
    }

    #[test]
    fn messages_snapshots_all_entries_including_tombstones() {
        let c = cache(4);
        c.set("k1", Entry::new("v1", 0, 0));
        c.set("k2", Entry::new("v2", now_ns() + 1_000_000_000, 0));
        c.delete("k2", now_ns() + 2_000_000_000);
        let snapshot = c.messages();
        assert_eq!(snapshot.entries.len(), 2);
    }

    #[test]
    fn invalid_capacity_is_rejected() {
        assert!(Cache::new(1, 0).is_err());
        assert!(Cache::new(1, -5).is_err());
    }
}
