//! A bounded, time-expiring cache with single-flight value computation.

use std::{
    collections::HashMap,
    future::Future,
    hash::{BuildHasher, Hash},
    marker::PhantomData,
    num::NonZeroUsize,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use metrics::{counter, gauge, Counter, Gauge};
use snafu::Snafu;
use tokio::{sync::OnceCell, time::Instant};
use tracing::{debug, trace};

use crate::hash::FastBuildHasher;

mod table;
use self::table::{Lookup, Table};

/// A cache error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum CacheError {
    /// The cache identifier was empty.
    #[snafu(display("cache identifier must not be empty"))]
    EmptyIdentifier,
}

#[derive(Clone)]
struct Telemetry {
    current_items: Gauge,
    hits_total: Counter,
    misses_total: Counter,
    items_inserted_total: Counter,
    items_evicted_total: Counter,
    items_expired_total: Counter,
    resolve_errors_total: Counter,
}

impl Telemetry {
    fn new(identifier: &str, enabled: bool) -> Self {
        if !enabled {
            return Self::noop();
        }

        let id = identifier.to_string();
        Self {
            current_items: gauge!("cache_current_items", "cache_id" => id.clone()),
            hits_total: counter!("cache_hits_total", "cache_id" => id.clone()),
            misses_total: counter!("cache_misses_total", "cache_id" => id.clone()),
            items_inserted_total: counter!("cache_items_inserted_total", "cache_id" => id.clone()),
            items_evicted_total: counter!("cache_items_evicted_total", "cache_id" => id.clone()),
            items_expired_total: counter!("cache_items_expired_total", "cache_id" => id.clone()),
            resolve_errors_total: counter!("cache_resolve_errors_total", "cache_id" => id),
        }
    }

    fn noop() -> Self {
        Self {
            current_items: Gauge::noop(),
            hits_total: Counter::noop(),
            misses_total: Counter::noop(),
            items_inserted_total: Counter::noop(),
            items_evicted_total: Counter::noop(),
            items_expired_total: Counter::noop(),
            resolve_errors_total: Counter::noop(),
        }
    }
}

/// Builder for creating a [`Cache`].
pub struct CacheBuilder<K, V, H = FastBuildHasher> {
    identifier: String,
    capacity: NonZeroUsize,
    time_to_live: Option<Duration>,
    telemetry_enabled: bool,
    _key: PhantomData<K>,
    _value: PhantomData<V>,
    _hasher: PhantomData<H>,
}

impl<K, V> CacheBuilder<K, V> {
    /// Creates a new `CacheBuilder` with the given cache identifier.
    ///
    /// The cache identifier is used to label the cache's telemetry. It _should_ be unique, but it is not required to be:
    /// metrics for caches sharing an identifier are aggregated together.
    ///
    /// # Errors
    ///
    /// If the given cache identifier is empty, an error is returned.
    pub fn from_identifier<N: Into<String>>(identifier: N) -> Result<CacheBuilder<K, V>, CacheError> {
        let identifier = identifier.into();
        if identifier.is_empty() {
            return Err(CacheError::EmptyIdentifier);
        }

        Ok(CacheBuilder {
            identifier,
            capacity: NonZeroUsize::MAX,
            time_to_live: None,
            telemetry_enabled: true,
            _key: PhantomData,
            _value: PhantomData,
            _hasher: PhantomData,
        })
    }

    /// Configures a [`CacheBuilder`] that is suitable for tests.
    ///
    /// This configures the builder with an identifier of "noop", unlimited capacity, no expiration, and telemetry
    /// disabled.
    pub fn for_tests() -> CacheBuilder<K, V> {
        CacheBuilder {
            identifier: "noop".to_string(),
            capacity: NonZeroUsize::MAX,
            time_to_live: None,
            telemetry_enabled: false,
            _key: PhantomData,
            _value: PhantomData,
            _hasher: PhantomData,
        }
    }
}

impl<K, V, H> CacheBuilder<K, V, H> {
    /// Sets the maximum number of items held by the cache.
    ///
    /// When the cache is full, inserting a new item evicts the least-recently-used item first. Both reads and writes
    /// count as a use.
    ///
    /// Defaults to unlimited capacity.
    pub fn with_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets how long an item stays valid after it was inserted.
    ///
    /// Unlike time-to-idle, reading an item does not extend its lifetime: an item inserted at time `t` is considered
    /// expired at `t + ttl` regardless of how often it was read. Expired items are removed lazily, when they are next
    /// looked up or when room is needed for a new item.
    ///
    /// If the given value is `None`, expiration is disabled and items are only removed by capacity eviction.
    ///
    /// Defaults to no expiration.
    pub fn with_time_to_live(mut self, time_to_live: Option<Duration>) -> Self {
        self.time_to_live = time_to_live;
        self
    }

    /// Sets whether or not to enable telemetry for this cache.
    ///
    /// Defaults to telemetry enabled.
    pub fn with_telemetry(mut self, enabled: bool) -> Self {
        self.telemetry_enabled = enabled;
        self
    }

    /// Sets the key hasher for the cache.
    ///
    /// Defaults to a fast, non-cryptographic hasher: [`FastBuildHasher`].
    pub fn with_hasher<H2>(self) -> CacheBuilder<K, V, H2> {
        CacheBuilder {
            identifier: self.identifier,
            capacity: self.capacity,
            time_to_live: self.time_to_live,
            telemetry_enabled: self.telemetry_enabled,
            _key: PhantomData,
            _value: PhantomData,
            _hasher: PhantomData,
        }
    }
}

impl<K, V, H> CacheBuilder<K, V, H>
where
    K: Eq + Hash + Clone,
    V: Clone,
    H: BuildHasher + Default,
{
    /// Builds a [`Cache`] from the current configuration.
    pub fn build(self) -> Cache<K, V, H> {
        debug!(
            cache_id = %self.identifier,
            capacity = self.capacity.get(),
            time_to_live = ?self.time_to_live,
            "Building cache."
        );

        Cache {
            inner: Arc::new(Shared {
                state: Mutex::new(State {
                    table: Table::new(self.capacity, self.time_to_live),
                    in_flight: HashMap::with_hasher(H::default()),
                }),
                telemetry: Telemetry::new(&self.identifier, self.telemetry_enabled),
            }),
        }
    }
}

struct State<K, V, H> {
    table: Table<K, V, H>,

    // Keys currently being computed. Waiters for the same key share the cell, so only one of them runs the computation
    // at a time.
    in_flight: HashMap<K, InFlightEntry<V>, H>,
}

struct InFlightEntry<V> {
    cell: Arc<OnceCell<V>>,

    // Callers currently attached to `cell`. Only changed while the state lock is held.
    holders: usize,
}

/// A caller's attachment to an in-flight computation.
///
/// Dropping it, whether the caller finished or was cancelled, detaches the caller. The first caller to detach after the
/// value was computed publishes it to the cache, and the last caller to detach from a cell that never produced a value
/// removes the in-flight marker.
struct InFlight<'a, K, V, H>
where
    K: Eq + Hash + Clone,
    V: Clone,
    H: BuildHasher + Default,
{
    cache: &'a Cache<K, V, H>,
    key: K,
    cell: Arc<OnceCell<V>>,
}

impl<K, V, H> Drop for InFlight<'_, K, V, H>
where
    K: Eq + Hash + Clone,
    V: Clone,
    H: BuildHasher + Default,
{
    fn drop(&mut self) {
        let mut state = self.cache.state();
        let holders = match state.in_flight.get_mut(&self.key) {
            Some(entry) if Arc::ptr_eq(&entry.cell, &self.cell) => {
                entry.holders -= 1;
                entry.holders
            }
            // Already published, and possibly replaced by a newer computation.
            _ => return,
        };

        if let Some(value) = self.cell.get() {
            state.in_flight.remove(&self.key);
            self.cache.insert_locked(&mut state, self.key.clone(), value.clone());
            trace!("Cached newly computed value.");
        } else if holders == 0 {
            state.in_flight.remove(&self.key);
        }
    }
}

struct Shared<K, V, H> {
    state: Mutex<State<K, V, H>>,
    telemetry: Telemetry,
}

/// A bounded, time-expiring concurrent cache.
///
/// Items are bounded by count, evicting the least-recently-used item when full, and optionally expire a fixed duration
/// after insertion. Cloning the cache is cheap, and all clones share the same underlying storage.
///
/// Values are computed on demand via [`get_or_compute`][Cache::get_or_compute], which guarantees that concurrent
/// callers for the same key share a single computation.
pub struct Cache<K, V, H = FastBuildHasher> {
    inner: Arc<Shared<K, V, H>>,
}

impl<K, V, H> Clone for Cache<K, V, H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, H> Cache<K, V, H>
where
    K: Eq + Hash + Clone,
    V: Clone,
    H: BuildHasher + Default,
{
    fn state(&self) -> MutexGuard<'_, State<K, V, H>> {
        // The state is only ever mutated through `Table`, whose operations leave it consistent even if a panic
        // unwinds through a caller, so a poisoned lock is safe to reuse.
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of items currently in the cache.
    ///
    /// Expired items which have not yet been removed are included.
    pub fn len(&self) -> usize {
        self.state().table.len()
    }

    /// Inserts an item into the cache with the given key and value.
    ///
    /// If an item with the same key already exists, it is overwritten. If the cache is full, the least-recently-used
    /// item is evicted to make room for the new item.
    pub fn insert(&self, key: K, value: V) {
        let mut state = self.state();
        self.insert_locked(&mut state, key, value);
    }

    fn insert_locked(&self, state: &mut State<K, V, H>, key: K, value: V) {
        let outcome = state.table.insert(key, value, Instant::now());

        let telemetry = &self.inner.telemetry;
        telemetry.items_inserted_total.increment(1);
        telemetry.items_evicted_total.increment(outcome.evicted as u64);
        telemetry.items_expired_total.increment(outcome.expired as u64);
        telemetry.current_items.set(state.table.len() as f64);
    }

    /// Gets a live item from the cache by its key.
    ///
    /// If the item is found and has not expired, it is cloned and `Some(value)` is returned. Otherwise, `None` is
    /// returned.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.state();
        self.get_locked(&mut state, key)
    }

    fn get_locked(&self, state: &mut State<K, V, H>, key: &K) -> Option<V> {
        let telemetry = &self.inner.telemetry;
        match state.table.get(key, Instant::now()) {
            Lookup::Hit(value) => {
                telemetry.hits_total.increment(1);
                Some(value)
            }
            Lookup::Expired => {
                telemetry.items_expired_total.increment(1);
                telemetry.misses_total.increment(1);
                telemetry.current_items.set(state.table.len() as f64);
                None
            }
            Lookup::Missing => {
                telemetry.misses_total.increment(1);
                None
            }
        }
    }

    /// Removes an item from the cache by its key.
    pub fn remove(&self, key: &K) {
        let mut state = self.state();
        state.table.remove(key);
        self.inner.telemetry.current_items.set(state.table.len() as f64);
    }

    /// Gets a live item from the cache, or computes and caches it if missing or expired.
    ///
    /// When a live item exists, it is returned without calling `compute`. Otherwise, `compute` is run and a successful
    /// result is stored in the cache before being returned.
    ///
    /// Concurrent calls for the same key share a single computation: the first caller runs `compute` while the others
    /// wait for it to finish, then all of them observe the same value. The cache lock is not held while `compute`
    /// runs, so calls for different keys never wait on each other.
    ///
    /// # Errors
    ///
    /// If `compute` fails, its error is returned to the caller that ran it, and nothing is cached. Callers that were
    /// waiting on the same key take over and retry the computation themselves, one at a time, and any later call
    /// retries as well.
    ///
    /// # Cancellation
    ///
    /// Dropping the returned future is safe. If it was running `compute`, a waiting caller takes over.
    pub async fn get_or_compute<F, Fut, E>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let in_flight = {
            let mut state = self.state();
            if let Some(value) = self.get_locked(&mut state, &key) {
                return Ok(value);
            }

            let entry = state.in_flight.entry(key.clone()).or_insert_with(|| InFlightEntry {
                cell: Arc::default(),
                holders: 0,
            });
            entry.holders += 1;

            InFlight {
                cache: self,
                cell: Arc::clone(&entry.cell),
                key,
            }
        };

        let result = in_flight.cell.get_or_try_init(compute).await.cloned();
        if result.is_err() {
            self.inner.telemetry.resolve_errors_total.increment(1);
        }

        // Detaching publishes a computed value, or releases the key if nobody else is waiting on it.
        drop(in_flight);

        result
    }
}
