use std::{
    collections::{BTreeMap, HashMap},
    hash::{BuildHasher, Hash},
    num::NonZeroUsize,
    time::Duration,
};

use tokio::time::Instant;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    inserted_seq: u64,
    accessed_seq: u64,
}

/// Result of looking up a key in the table.
pub(super) enum Lookup<V> {
    /// A live entry was found.
    Hit(V),

    /// An entry was found but it had outlived the time-to-live, and has been removed.
    Expired,

    /// No entry exists for the key.
    Missing,
}

/// Counts of entries removed as a side effect of an insert.
#[derive(Debug, Default, Eq, PartialEq)]
pub(super) struct InsertOutcome {
    pub evicted: usize,
    pub expired: usize,
}

/// Bounded, time-expiring entry table with least-recently-used eviction.
///
/// Two ordered indexes sit next to the entry map: `recency` orders keys by their last access (read or write), and
/// `insertion` orders them by when they were inserted. Sequence numbers come from a single monotonic counter, and
/// insertion timestamps never go backwards, so the first key in `insertion` is always the oldest entry.
pub(super) struct Table<K, V, H> {
    capacity: NonZeroUsize,
    time_to_live: Option<Duration>,
    entries: HashMap<K, Entry<V>, H>,
    recency: BTreeMap<u64, K>,
    insertion: BTreeMap<u64, K>,
    next_seq: u64,
}

impl<K, V, H> Table<K, V, H>
where
    K: Eq + Hash + Clone,
    V: Clone,
    H: BuildHasher + Default,
{
    pub fn new(capacity: NonZeroUsize, time_to_live: Option<Duration>) -> Self {
        Self {
            capacity,
            time_to_live,
            entries: HashMap::with_hasher(H::default()),
            recency: BTreeMap::new(),
            insertion: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn is_expired(&self, inserted_at: Instant, now: Instant) -> bool {
        match self.time_to_live {
            Some(ttl) => now.saturating_duration_since(inserted_at) >= ttl,
            None => false,
        }
    }

    pub fn get(&mut self, key: &K, now: Instant) -> Lookup<V> {
        let inserted_at = match self.entries.get(key) {
            Some(entry) => entry.inserted_at,
            None => return Lookup::Missing,
        };

        if self.is_expired(inserted_at, now) {
            self.remove(key);
            return Lookup::Expired;
        }

        let seq = self.next_seq();
        match self.entries.get_mut(key) {
            Some(entry) => {
                self.recency.remove(&entry.accessed_seq);
                entry.accessed_seq = seq;
                self.recency.insert(seq, key.clone());
                Lookup::Hit(entry.value.clone())
            }
            None => Lookup::Missing,
        }
    }

    pub fn insert(&mut self, key: K, value: V, now: Instant) -> InsertOutcome {
        let mut outcome = InsertOutcome::default();

        // Overwriting counts as neither an eviction nor an expiration.
        self.remove(&key);

        outcome.expired = self.purge_expired(now);

        while self.entries.len() >= self.capacity.get() {
            if !self.evict_least_recently_used() {
                break;
            }
            outcome.evicted += 1;
        }

        let seq = self.next_seq();
        self.recency.insert(seq, key.clone());
        self.insertion.insert(seq, key.clone());
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                inserted_seq: seq,
                accessed_seq: seq,
            },
        );

        outcome
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.accessed_seq);
        self.insertion.remove(&entry.inserted_seq);
        Some(entry.value)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let mut purged = 0;
        while let Some((_, oldest_key)) = self.insertion.first_key_value() {
            let expired = match self.entries.get(oldest_key) {
                Some(entry) => self.is_expired(entry.inserted_at, now),
                None => true,
            };
            if !expired {
                break;
            }

            let oldest_key = oldest_key.clone();
            if self.remove(&oldest_key).is_none() {
                // Stale index entry with no backing entry.
                self.insertion.pop_first();
            } else {
                purged += 1;
            }
        }
        purged
    }

    fn evict_least_recently_used(&mut self) -> bool {
        match self.recency.first_key_value() {
            Some((_, key)) => {
                let key = key.clone();
                self.remove(&key).is_some()
            }
            None => false,
        }
    }
}
