//! In-memory request cache with TTL expiry, LRU capacity eviction and
//! coalescing of concurrent loads for the same key.
//!
//! Expiry is checked lazily on access; there is no background sweeper. A
//! pending load is shared between every caller that asks for the key before
//! it settles, so the loader runs once. A failed load removes its placeholder
//! so the next `resolve` runs the loader again.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use log::debug;

use crate::error::AppError;

pub mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_MAX_ENTRIES: usize = 512;

/// Lifetime applied to a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Never,
    After(Duration),
}

impl Ttl {
    fn deadline(self, now: Instant) -> Option<Instant> {
        match self {
            Ttl::Never => None,
            Ttl::After(ttl) => now.checked_add(ttl),
        }
    }
}

impl From<Duration> for Ttl {
    fn from(ttl: Duration) -> Self {
        Ttl::After(ttl)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Capacity,
    Expired,
    Manual,
    Clear,
    /// A pending placeholder undone because its loader failed.
    Failed,
}

/// Removal notice handed to the eviction hook.
#[derive(Debug, Clone)]
pub struct Eviction<V> {
    pub key: String,
    pub reason: EvictionReason,
    pub value: Option<V>,
    pub pending: bool,
    pub expires_at: Option<Instant>,
}

impl<V> Eviction<V> {
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }
}

pub type EvictionHook<V> = Arc<dyn Fn(&Eviction<V>) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub revalidations: u64,
    pub evictions: u64,
    pub stale: u64,
    pub errors: u64,
    pub size: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheOptions {
    pub default_ttl: Ttl,
    /// `None` disables capacity eviction.
    pub max_entries: Option<usize>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            default_ttl: Ttl::After(DEFAULT_TTL),
            max_entries: Some(DEFAULT_MAX_ENTRIES),
        }
    }
}

pub type LoadResult<V, E> = std::result::Result<V, Arc<E>>;
type PendingLoad<V, E> = Shared<BoxFuture<'static, LoadResult<V, E>>>;

enum SlotState<V, E> {
    Ready(V),
    Pending(PendingLoad<V, E>),
}

struct Slot<V, E> {
    state: SlotState<V, E>,
    expires_at: Option<Instant>,
    tick: u64,
    generation: u64,
}

impl<V, E> Slot<V, E> {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.state, SlotState::Ready(_))
            && self.expires_at.is_some_and(|deadline| now >= deadline)
    }

    fn into_eviction(self, key: String, reason: EvictionReason) -> Eviction<V> {
        let (value, pending) = match self.state {
            SlotState::Ready(value) => (Some(value), false),
            SlotState::Pending(_) => (None, true),
        };
        Eviction {
            key,
            reason,
            value,
            pending,
            expires_at: self.expires_at,
        }
    }
}

enum Probe<V, E> {
    Missing,
    Expired,
    Fresh(V),
    Pending(PendingLoad<V, E>),
}

enum Step<V, E> {
    Done(V),
    Wait(PendingLoad<V, E>),
}

struct CacheState<V, E> {
    entries: HashMap<String, Slot<V, E>>,
    // tick -> key, oldest first
    order: BTreeMap<u64, String>,
    next_tick: u64,
    next_generation: u64,
    stats: CacheStats,
}

impl<V: Clone, E> CacheState<V, E> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_tick: 1,
            next_generation: 1,
            stats: CacheStats::default(),
        }
    }

    fn probe(&self, key: &str, now: Instant) -> Probe<V, E> {
        match self.entries.get(key) {
            None => Probe::Missing,
            Some(slot) if slot.is_expired(now) => Probe::Expired,
            Some(slot) => match &slot.state {
                SlotState::Ready(value) => Probe::Fresh(value.clone()),
                SlotState::Pending(load) => Probe::Pending(load.clone()),
            },
        }
    }

    fn generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    fn insert(&mut self, key: &str, slot: Slot<V, E>) {
        if let Some(previous) = self.entries.insert(key.to_string(), slot) {
            self.order.remove(&previous.tick);
        }
    }

    /// Mark `key` most recently used, then evict from the cold end while over capacity.
    fn touch(&mut self, key: &str, max_entries: Option<usize>, evicted: &mut Vec<Eviction<V>>) {
        if let Some(slot) = self.entries.get_mut(key) {
            self.order.remove(&slot.tick);
            slot.tick = self.next_tick;
            self.next_tick += 1;
            self.order.insert(slot.tick, key.to_string());
        }

        let Some(max_entries) = max_entries else {
            return;
        };
        while self.order.len() > max_entries {
            let Some((_, victim)) = self.order.pop_first() else {
                break;
            };
            if let Some(slot) = self.entries.remove(&victim) {
                self.stats.evictions += 1;
                evicted.push(slot.into_eviction(victim, EvictionReason::Capacity));
            }
        }
    }

    fn remove(&mut self, key: &str, reason: EvictionReason) -> Option<Eviction<V>> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.tick);
        if reason != EvictionReason::Failed {
            self.stats.evictions += 1;
        }
        Some(slot.into_eviction(key.to_string(), reason))
    }
}

struct CacheShared<V, E> {
    state: Mutex<CacheState<V, E>>,
    options: CacheOptions,
    clock: Arc<dyn Clock>,
    on_evict: Option<EvictionHook<V>>,
}

impl<V, E> CacheShared<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn lock(&self) -> MutexGuard<'_, CacheState<V, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, evicted: Vec<Eviction<V>>) {
        for eviction in &evicted {
            debug!("cache evicted `{}` ({:?})", eviction.key, eviction.reason);
            if let Some(hook) = &self.on_evict {
                hook(eviction);
            }
        }
    }

    /// Promote or undo the placeholder for `key`, unless it was replaced or removed meanwhile.
    fn settle(&self, key: &str, generation: u64, ttl: Ttl, outcome: &LoadResult<V, E>) {
        let now = self.clock.now();
        let mut evicted = Vec::new();
        {
            let mut state = self.lock();
            let owns_slot = state.entries.get(key).is_some_and(|slot| {
                slot.generation == generation && matches!(slot.state, SlotState::Pending(_))
            });
            if !owns_slot {
                return;
            }

            match outcome {
                Ok(value) => {
                    if let Some(slot) = state.entries.get_mut(key) {
                        slot.state = SlotState::Ready(value.clone());
                        slot.expires_at = ttl.deadline(now);
                    }
                    state.touch(key, self.options.max_entries, &mut evicted);
                }
                Err(_) => {
                    state.stats.errors += 1;
                    evicted.extend(state.remove(key, EvictionReason::Failed));
                }
            }
        }
        self.notify(evicted);
    }
}

/// Cloneable handle; clones share the same entries.
pub struct RequestCache<V, E = AppError> {
    shared: Arc<CacheShared<V, E>>,
}

impl<V, E> Clone for RequestCache<V, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

pub struct CacheBuilder<V> {
    options: CacheOptions,
    clock: Arc<dyn Clock>,
    on_evict: Option<EvictionHook<V>>,
}

impl<V> CacheBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn default_ttl(mut self, ttl: Ttl) -> Self {
        self.options.default_ttl = ttl;
        self
    }

    pub fn max_entries(mut self, max_entries: Option<usize>) -> Self {
        self.options.max_entries = max_entries;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn on_evict<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Eviction<V>) + Send + Sync + 'static,
    {
        self.on_evict = Some(Arc::new(hook));
        self
    }

    pub fn build<E>(self) -> RequestCache<V, E>
    where
        E: Send + Sync + 'static,
    {
        RequestCache {
            shared: Arc::new(CacheShared {
                state: Mutex::new(CacheState::new()),
                options: self.options,
                clock: self.clock,
                on_evict: self.on_evict,
            }),
        }
    }
}

impl<V> RequestCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// The error type is picked by [`CacheBuilder::build`].
    pub fn builder() -> CacheBuilder<V> {
        CacheBuilder {
            options: CacheOptions::default(),
            clock: Arc::new(SystemClock),
            on_evict: None,
        }
    }
}

impl<V, E> RequestCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub fn new(options: CacheOptions) -> Self {
        RequestCache::<V>::builder()
            .default_ttl(options.default_ttl)
            .max_entries(options.max_entries)
            .build()
    }

    /// Plain lookup. Pending and expired entries count as misses.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.shared.clock.now();
        let mut evicted = Vec::new();
        let found = {
            let mut state = self.shared.lock();
            match state.probe(key, now) {
                Probe::Fresh(value) => {
                    state.stats.hits += 1;
                    state.touch(key, self.shared.options.max_entries, &mut evicted);
                    Some(value)
                }
                Probe::Expired => {
                    state.stats.stale += 1;
                    state.stats.misses += 1;
                    evicted.extend(state.remove(key, EvictionReason::Expired));
                    None
                }
                Probe::Pending(_) | Probe::Missing => {
                    state.stats.misses += 1;
                    None
                }
            }
        };
        self.shared.notify(evicted);
        found
    }

    pub fn set(&self, key: &str, value: V) -> V {
        self.set_with_ttl(key, value, self.shared.options.default_ttl)
    }

    /// Store a resolved value, replacing whatever the key held.
    pub fn set_with_ttl(&self, key: &str, value: V, ttl: Ttl) -> V {
        let now = self.shared.clock.now();
        let mut evicted = Vec::new();
        {
            let mut state = self.shared.lock();
            let generation = state.generation();
            state.insert(
                key,
                Slot {
                    state: SlotState::Ready(value.clone()),
                    expires_at: ttl.deadline(now),
                    tick: 0,
                    generation,
                },
            );
            state.touch(key, self.shared.options.max_entries, &mut evicted);
        }
        self.shared.notify(evicted);
        value
    }

    pub async fn resolve<F, Fut>(&self, key: &str, loader: F) -> LoadResult<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
    {
        self.resolve_with_ttl(key, self.shared.options.default_ttl, loader)
            .await
    }

    /// Return the cached value, join an in-flight load, or start one.
    ///
    /// The loader runs at most once per key while a load is pending; its error is
    /// shared by every waiter and the placeholder is dropped so a later call retries.
    pub async fn resolve_with_ttl<F, Fut>(&self, key: &str, ttl: Ttl, loader: F) -> LoadResult<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
    {
        match self.begin(key, ttl, loader) {
            Step::Done(value) => Ok(value),
            Step::Wait(load) => load.await,
        }
    }

    fn begin<F, Fut>(&self, key: &str, ttl: Ttl, loader: F) -> Step<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
    {
        let now = self.shared.clock.now();
        let max_entries = self.shared.options.max_entries;
        let mut evicted = Vec::new();
        let step = {
            let mut state = self.shared.lock();
            match state.probe(key, now) {
                Probe::Fresh(value) => {
                    state.stats.hits += 1;
                    state.touch(key, max_entries, &mut evicted);
                    Step::Done(value)
                }
                Probe::Pending(load) => {
                    state.stats.hits += 1;
                    state.touch(key, max_entries, &mut evicted);
                    Step::Wait(load)
                }
                probe => {
                    if matches!(probe, Probe::Expired) {
                        state.stats.stale += 1;
                        state.stats.revalidations += 1;
                        evicted.extend(state.remove(key, EvictionReason::Expired));
                    }
                    state.stats.misses += 1;
                    state.stats.loads += 1;

                    let generation = state.generation();
                    let weak = Arc::downgrade(&self.shared);
                    let owned_key = key.to_string();
                    let load = async move {
                        let outcome = loader().await.map_err(Arc::new);
                        if let Some(shared) = weak.upgrade() {
                            shared.settle(&owned_key, generation, ttl, &outcome);
                        }
                        outcome
                    }
                    .boxed()
                    .shared();

                    state.insert(
                        key,
                        Slot {
                            state: SlotState::Pending(load.clone()),
                            expires_at: None,
                            tick: 0,
                            generation,
                        },
                    );
                    state.touch(key, max_entries, &mut evicted);
                    Step::Wait(load)
                }
            }
        };
        self.shared.notify(evicted);
        step
    }

    pub fn delete(&self, key: &str) -> bool {
        let removed = self.shared.lock().remove(key, EvictionReason::Manual);
        let found = removed.is_some();
        self.shared.notify(removed.into_iter().collect());
        found
    }

    pub fn clear(&self) {
        let evicted = {
            let mut state = self.shared.lock();
            state.order.clear();
            let drained: Vec<_> = state.entries.drain().collect();
            state.stats.evictions += drained.len() as u64;
            drained
                .into_iter()
                .map(|(key, slot)| slot.into_eviction(key, EvictionReason::Clear))
                .collect::<Vec<_>>()
        };
        self.shared.notify(evicted);
    }

    /// Drop every expired value now instead of waiting for the next access.
    pub fn prune(&self) -> usize {
        let now = self.shared.clock.now();
        let evicted = {
            let mut state = self.shared.lock();
            let expired: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, slot)| slot.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            expired
                .iter()
                .filter_map(|key| state.remove(key, EvictionReason::Expired))
                .collect::<Vec<_>>()
        };
        let pruned = evicted.len();
        self.shared.notify(evicted);
        pruned
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.shared.lock();
        CacheStats {
            size: state.entries.len(),
            ..state.stats
        }
    }

    pub fn len(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn manual_cache(max_entries: Option<usize>) -> (RequestCache<u32>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = RequestCache::builder()
            .max_entries(max_entries)
            .clock(clock.clone())
            .build();
        (cache, clock)
    }

    #[tokio::test]
    async fn concurrent_resolves_share_one_load() {
        let cache: RequestCache<u32> = RequestCache::new(CacheOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let loader = |calls: Arc<AtomicUsize>, gate: Arc<Notify>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
                Ok::<_, AppError>(42)
            }
        };

        let (first, second, _) = tokio::join!(
            cache.resolve("AAPL", loader(calls.clone(), gate.clone())),
            cache.resolve("AAPL", loader(calls.clone(), gate.clone())),
            async {
                tokio::task::yield_now().await;
                gate.notify_one();
            }
        );

        assert_eq!(first.expect("first resolve"), 42);
        assert_eq!(second.expect("second resolve"), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("AAPL"), Some(42));
        assert_eq!(cache.stats().loads, 1);
    }

    #[tokio::test]
    async fn failed_load_is_shared_then_retried() {
        let cache: RequestCache<u32> = RequestCache::new(CacheOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = {
            let calls = calls.clone();
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(AppError::message("upstream down"))
            }
        };
        let err = cache.resolve("MSFT", failing).await.expect_err("load fails");
        assert_eq!(err.to_string(), "upstream down");
        assert!(cache.is_empty());
        assert_eq!(cache.stats().errors, 1);

        let succeeding = {
            let calls = calls.clone();
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>(7)
            }
        };
        assert_eq!(cache.resolve("MSFT", succeeding).await.expect("retry"), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fresh_value_skips_loader() {
        let cache: RequestCache<u32> = RequestCache::new(CacheOptions::default());
        cache.set("NVDA", 5);

        let value = cache
            .resolve("NVDA", || async { Err::<u32, _>(AppError::message("should not run")) })
            .await
            .expect("cached value");
        assert_eq!(value, 5);
        assert_eq!(cache.stats().loads, 0);
    }

    #[test]
    fn ttl_expiry_counts_stale_lookup() {
        let (cache, clock) = manual_cache(None);
        cache.set_with_ttl("AMZN", 1, Ttl::After(Duration::from_millis(50)));
        assert_eq!(cache.get("AMZN"), Some(1));

        clock.advance(Duration::from_millis(100));
        assert_eq!(cache.get("AMZN"), None);

        let stats = cache.stats();
        assert_eq!(stats.stale, 1);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn zero_ttl_is_stale_on_next_access() {
        let (cache, _clock) = manual_cache(None);
        assert_eq!(cache.set_with_ttl("META", 3, Ttl::After(Duration::ZERO)), 3);
        assert_eq!(cache.get("META"), None);
    }

    #[test]
    fn never_ttl_survives_clock_jumps() {
        let (cache, clock) = manual_cache(None);
        cache.set_with_ttl("TSLA", 9, Ttl::Never);
        clock.advance(Duration::from_secs(60 * 60 * 24 * 365));
        assert_eq!(cache.get("TSLA"), Some(9));
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let (cache, _clock) = manual_cache(Some(2));
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("c", 3);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));

        let (cache, _clock) = manual_cache(Some(2));
        cache.set("a", 1);
        cache.set("b", 2);
        assert_eq!(cache.get("a"), Some(1));
        cache.set("c", 3);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
    }

    #[test]
    fn zero_capacity_evicts_the_new_entry() {
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let seen = reasons.clone();
        let cache: RequestCache<u32> = RequestCache::builder()
            .max_entries(Some(0))
            .on_evict(move |eviction| seen.lock().unwrap().push(eviction.reason))
            .build();

        assert_eq!(cache.set("a", 1), 1);
        assert_eq!(cache.get("a"), None);
        assert_eq!(*reasons.lock().unwrap(), vec![EvictionReason::Capacity]);
    }

    #[test]
    fn hook_reports_every_removal() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        let clock = Arc::new(ManualClock::new());
        let cache: RequestCache<u32> = RequestCache::builder()
            .clock(clock.clone())
            .on_evict(move |eviction| {
                seen.lock()
                    .unwrap()
                    .push((eviction.key.clone(), eviction.reason, eviction.has_value()))
            })
            .build();

        cache.set("a", 1);
        cache.set_with_ttl("b", 2, Ttl::After(Duration::from_millis(10)));
        cache.set("c", 3);
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        clock.advance(Duration::from_millis(20));
        assert_eq!(cache.prune(), 1);
        cache.clear();

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                ("a".to_string(), EvictionReason::Manual, true),
                ("b".to_string(), EvictionReason::Expired, true),
                ("c".to_string(), EvictionReason::Clear, true),
            ]
        );
    }

    #[tokio::test]
    async fn cleared_placeholder_is_not_resurrected() {
        let cache: RequestCache<u32> = RequestCache::new(CacheOptions::default());
        let gate = Arc::new(Notify::new());
        let wait = gate.clone();

        let (value, _) = tokio::join!(
            cache.resolve("GOOG", move || async move {
                wait.notified().await;
                Ok::<_, AppError>(11)
            }),
            async {
                tokio::task::yield_now().await;
                cache.clear();
                gate.notify_one();
            }
        );

        assert_eq!(value.expect("load completes"), 11);
        assert_eq!(cache.get("GOOG"), None);
    }

    #[tokio::test]
    async fn pending_entry_is_a_miss_for_get() {
        let cache: RequestCache<u32> = RequestCache::new(CacheOptions::default());
        let gate = Arc::new(Notify::new());
        let wait = gate.clone();

        let (value, during) = tokio::join!(
            cache.resolve("IBM", move || async move {
                wait.notified().await;
                Ok::<_, AppError>(4)
            }),
            async {
                tokio::task::yield_now().await;
                let during = cache.get("IBM");
                gate.notify_one();
                during
            }
        );

        assert_eq!(during, None);
        assert_eq!(value.expect("load completes"), 4);
        assert_eq!(cache.get("IBM"), Some(4));
    }
}
