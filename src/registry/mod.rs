//! The prefetch registry: debounced triggers, single-flight tracking, and
//! cancellation.
//!
//! A [`Prefetcher`] is the per-session context object that owns every
//! outstanding prefetch. Each key moves through a small state machine:
//!
//! ```text
//! Pending ──timer──▶ Fired ──fetch settles──▶ Settled
//!    │                 │
//!    └────cancel───────┴────────────────────▶ Cancelled
//! ```
//!
//! Only `Pending` and `Fired` entries live in the registry map, so at most
//! one of them exists per key. Every entry is stamped with a generation; a
//! timer or fetch task whose generation no longer matches the map has been
//! superseded and drops its work.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::cache::{QueryCache, should_skip};
use crate::catalog::{AbortHandle, AbortSignal, CatalogClient, abort_pair};
use crate::config::PrefetchConfig;
use crate::dispatch::{Dispatcher, PrefetchError};
use crate::events::{EventBus, PrefetchEvent, PrefetchStats};
use crate::key::{KeyError, PrefetchKey, PrefetchTarget};
use crate::policy::{Priority, Reason};
use crate::region::Region;

/// How a fired entry ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The catalog request completed.
    Fetched,
    /// Fresh data was already cached.
    Skipped,
    /// The catalog request failed; the failure was absorbed.
    Failed,
}

/// Lifecycle state of a prefetch entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "outcome", rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Fired,
    Cancelled,
    Settled(Outcome),
}

impl EntryStatus {
    /// Returns `true` for `Cancelled` and `Settled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Settled(_))
    }

    fn event(self, key: PrefetchKey) -> Option<PrefetchEvent> {
        match self {
            Self::Pending | Self::Fired => None,
            Self::Cancelled => Some(PrefetchEvent::Cancelled { key }),
            Self::Settled(Outcome::Skipped) => Some(PrefetchEvent::Skipped { key }),
            Self::Settled(Outcome::Fetched) => Some(PrefetchEvent::Settled { key, ok: true }),
            Self::Settled(Outcome::Failed) => Some(PrefetchEvent::Settled { key, ok: false }),
        }
    }
}

/// Result of a [`Prefetcher::trigger`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A timer is pending. `replaced` is `true` when an earlier pending
    /// timer for the same key was cancelled.
    Scheduled { key: PrefetchKey, replaced: bool },
    /// A fetch for this key is already in flight; nothing was scheduled.
    InFlight { key: PrefetchKey },
    /// Prefetching is disabled by configuration.
    Disabled,
}

/// Debug view of one live entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySnapshot {
    pub key: PrefetchKey,
    pub reason: String,
    pub priority: Priority,
    pub status: EntryStatus,
    pub age_ms: u64,
}

struct Entry {
    target: PrefetchTarget,
    reason: Reason,
    priority: Priority,
    scheduled_at: Instant,
    generation: u64,
    status: EntryStatus,
    timer: JoinHandle<()>,
    abort: AbortHandle,
}

struct Inner {
    config: PrefetchConfig,
    cache: Arc<dyn QueryCache>,
    dispatcher: Dispatcher,
    region: watch::Receiver<Region>,
    entries: Mutex<HashMap<PrefetchKey, Entry>>,
    next_generation: AtomicU64,
    events: EventBus,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<PrefetchKey, Entry>> {
        // Entries are replaced whole under the lock, so a poisoned map is
        // still consistent.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Tears down an entry that has already been removed from the map.
    fn retire(&self, key: PrefetchKey, entry: Entry) {
        match entry.status {
            EntryStatus::Pending => entry.timer.abort(),
            // Cooperative: the dispatch races this signal and drops the request.
            _ => entry.abort.abort(),
        }
        debug!(key = %key, reason = %entry.reason, "prefetch cancelled");
        self.events.emit(PrefetchEvent::Cancelled { key });
    }

    /// Removes `key` if it still belongs to `generation` and records the
    /// terminal status. Returns `false` when the entry was superseded.
    fn finish(&self, key: &PrefetchKey, generation: u64, status: EntryStatus) -> bool {
        let removed = {
            let mut entries = self.lock();
            match entries.get(key) {
                Some(entry) if entry.generation == generation => entries.remove(key),
                _ => None,
            }
        };
        let Some(entry) = removed else {
            return false;
        };

        trace!(
            key = %key,
            status = ?status,
            elapsed_ms = entry.scheduled_at.elapsed().as_millis() as u64,
            "prefetch finished"
        );
        if let Some(event) = status.event(key.clone()) {
            self.events.emit(event);
        }
        true
    }
}

/// Schedules, deduplicates, and cancels speculative catalog fetches.
///
/// Cheap to clone; clones share the same registry. Triggers must be issued
/// from within a Tokio runtime because every entry owns a spawned timer task.
/// Dropping the last clone ends the session: pending timers never dispatch.
/// Fetches already in flight run to completion unless [`shutdown`] aborts
/// them first.
///
/// [`shutdown`]: Prefetcher::shutdown
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use storefront_prefetch::{
///     MemoryCache, PrefetchConfig, Prefetcher, PrefetchTarget, Reason, Region, region,
///     catalog::CatalogClient,
/// };
///
/// # async fn example(client: Arc<dyn CatalogClient>) {
/// let (_region_tx, region_rx) = region::channel(Region::new("reg_01", "us"));
/// let prefetcher = Prefetcher::new(
///     PrefetchConfig::default(),
///     client,
///     Arc::new(MemoryCache::new()),
///     region_rx,
/// );
///
/// prefetcher.trigger(PrefetchTarget::product("sweatshirt"), Reason::Hover);
/// // ... the shopper leaves the category
/// prefetcher.cancel_all("cat-");
/// # }
/// ```
#[derive(Clone)]
pub struct Prefetcher {
    inner: Arc<Inner>,
}

impl Prefetcher {
    /// Creates an empty registry.
    ///
    /// # Arguments
    ///
    /// - `config`: delays, page size, and logging switches.
    /// - `client`: the catalog client requests are dispatched through.
    /// - `cache`: the shared request cache consulted before each fetch.
    /// - `region`: the current region; read when a timer fires.
    pub fn new(
        config: PrefetchConfig,
        client: Arc<dyn CatalogClient>,
        cache: Arc<dyn QueryCache>,
        region: watch::Receiver<Region>,
    ) -> Self {
        let dispatcher = Dispatcher::new(client, config.page_size);
        let events = EventBus::new(config.event_capacity);
        Self {
            inner: Arc::new(Inner {
                config,
                cache,
                dispatcher,
                region,
                entries: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Requests a prefetch of `target`.
    ///
    /// A pending timer for the same key is cancelled and replaced, so only the
    /// most recent trigger within the delay window fires. A trigger for a key
    /// whose fetch is already in flight is ignored.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn trigger(&self, target: PrefetchTarget, reason: Reason) -> TriggerOutcome {
        if !self.inner.config.enabled {
            return TriggerOutcome::Disabled;
        }

        let key = target.key();
        let tier = self.inner.config.delays.lookup(&reason);

        let mut entries = self.inner.lock();
        let replaced = match entries.get(&key).map(|entry| entry.status) {
            Some(EntryStatus::Fired) => {
                trace!(key = %key, "prefetch already in flight");
                return TriggerOutcome::InFlight { key };
            }
            Some(_) => match entries.remove(&key) {
                Some(old) => {
                    old.timer.abort();
                    true
                }
                None => false,
            },
            None => false,
        };

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let (abort, signal) = abort_pair();
        let timer = tokio::spawn(run_entry(
            Arc::downgrade(&self.inner),
            key.clone(),
            generation,
            tier.delay(),
            signal,
        ));
        entries.insert(
            key.clone(),
            Entry {
                target,
                reason: reason.clone(),
                priority: tier.priority,
                scheduled_at: Instant::now(),
                generation,
                status: EntryStatus::Pending,
                timer,
                abort,
            },
        );
        drop(entries);

        if replaced {
            self.inner
                .events
                .emit(PrefetchEvent::Replaced { key: key.clone() });
        }
        debug!(
            key = %key,
            reason = %reason,
            delay_ms = tier.delay_ms,
            priority = %tier.priority,
            "prefetch scheduled"
        );
        self.inner.events.emit(PrefetchEvent::Scheduled {
            key: key.clone(),
            reason,
            priority: tier.priority,
            delay_ms: tier.delay_ms,
        });

        TriggerOutcome::Scheduled { key, replaced }
    }

    /// Parses `key` into a target and triggers it.
    ///
    /// # Errors
    ///
    /// Returns a [`KeyError`] if `key` is not a well-formed prefetch key.
    pub fn trigger_key(&self, key: &str, reason: Reason) -> Result<TriggerOutcome, KeyError> {
        let target: PrefetchTarget = key.parse()?;
        Ok(self.trigger(target, reason))
    }

    /// Cancels the entry for `key`.
    ///
    /// A pending timer is dropped; an in-flight fetch is signalled to abort
    /// and its result is discarded either way. Returns `false` (and changes
    /// nothing) when no live entry exists.
    pub fn cancel(&self, key: &str) -> bool {
        let removed = self.inner.lock().remove_entry(key);
        match removed {
            Some((key, entry)) => {
                self.inner.retire(key, entry);
                true
            }
            None => false,
        }
    }

    /// Cancels every entry whose key starts with `prefix`, returning how many.
    pub fn cancel_all(&self, prefix: &str) -> usize {
        let swept: Vec<(PrefetchKey, Entry)> = {
            let mut entries = self.inner.lock();
            let keys: Vec<PrefetchKey> = entries
                .keys()
                .filter(|key| key.has_prefix(prefix))
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| entries.remove_entry(&key))
                .collect()
        };

        let count = swept.len();
        for (key, entry) in swept {
            self.inner.retire(key, entry);
        }
        if count > 0 {
            debug!(prefix, count, "prefetch scope swept");
        }
        count
    }

    /// Cancels everything. Call when the page session ends.
    pub fn shutdown(&self) -> usize {
        self.cancel_all("")
    }

    /// Spawns a task that re-triggers every live entry whenever the region
    /// changes, so work scheduled for the old region is not completed.
    ///
    /// The task ends when the region sender is dropped or every
    /// `Prefetcher` clone is gone.
    pub fn follow_region(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let mut rx = self.inner.region.clone();
        rx.mark_unchanged();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let region = rx.borrow_and_update().clone();
                let count = Prefetcher { inner }.retrigger_all();
                debug!(
                    region = %region.region_id,
                    country = %region.country_code,
                    count,
                    "region changed, prefetches rescheduled"
                );
            }
        })
    }

    fn retrigger_all(&self) -> usize {
        let live: Vec<(PrefetchKey, Entry)> = self.inner.lock().drain().collect();
        let mut retriggers = Vec::with_capacity(live.len());
        for (key, entry) in live {
            retriggers.push((entry.target.clone(), entry.reason.clone()));
            self.inner.retire(key, entry);
        }
        let count = retriggers.len();
        for (target, reason) in retriggers {
            self.trigger(target, reason);
        }
        count
    }

    /// Returns the live status of `key`, or `None` once it settled or was
    /// cancelled.
    pub fn status(&self, key: &str) -> Option<EntryStatus> {
        self.inner.lock().get(key).map(|entry| entry.status)
    }

    /// Number of live (pending or in-flight) entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Returns a sorted snapshot of all live entries.
    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        let mut snapshot: Vec<EntrySnapshot> = self
            .inner
            .lock()
            .iter()
            .map(|(key, entry)| EntrySnapshot {
                key: key.clone(),
                reason: entry.reason.to_string(),
                priority: entry.priority,
                status: entry.status,
                age_ms: entry.scheduled_at.elapsed().as_millis() as u64,
            })
            .collect();
        snapshot.sort_by(|a, b| a.key.cmp(&b.key));
        snapshot
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<PrefetchEvent> {
        self.inner.events.subscribe()
    }

    pub fn stats(&self) -> PrefetchStats {
        self.inner.events.stats()
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.inner.config
    }

    /// Returns the region requests are currently made for.
    pub fn region(&self) -> Region {
        self.inner.region.borrow().clone()
    }
}

/// Body of the per-entry timer task.
///
/// Holds the registry weakly while sleeping; once every `Prefetcher` clone
/// is dropped the timer wakes to nothing and no request goes out.
async fn run_entry(
    inner: Weak<Inner>,
    key: PrefetchKey,
    generation: u64,
    delay: Duration,
    signal: AbortSignal,
) {
    tokio::time::sleep(delay).await;

    let Some(inner) = inner.upgrade() else {
        trace!(key = %key, "registry dropped before timer fired");
        return;
    };
    let (target, priority) = {
        let mut entries = inner.lock();
        match entries.get_mut(&key) {
            Some(entry)
                if entry.generation == generation && entry.status == EntryStatus::Pending =>
            {
                entry.status = EntryStatus::Fired;
                (entry.target.clone(), entry.priority)
            }
            _ => return,
        }
    };
    inner.events.emit(PrefetchEvent::Fired { key: key.clone() });

    let region = inner.region.borrow().clone();
    let cache_key = key.cache_key(&region);
    if should_skip(inner.cache.as_ref(), &cache_key, Instant::now()) {
        trace!(key = %key, cache_key = %cache_key, "fresh in cache, skipping");
        inner.finish(&key, generation, EntryStatus::Settled(Outcome::Skipped));
        return;
    }

    inner
        .events
        .emit(PrefetchEvent::Dispatched { key: key.clone() });
    let outcome = match inner
        .dispatcher
        .dispatch(&target, &region, priority, signal)
        .await
    {
        Ok(fetched) => {
            trace!(key = %key, fetched = ?fetched, "prefetch fetched");
            Outcome::Fetched
        }
        // Only `cancel` fires the signal, and it has already retired the entry.
        Err(PrefetchError::Aborted) => return,
        Err(e) => {
            if inner.config.dev_logging {
                debug!(key = %key, error = %e, "prefetch failed");
            }
            Outcome::Failed
        }
    };

    inner.finish(&key, generation, EntryStatus::Settled(outcome));
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;
    use crate::cache::MemoryCache;
    use crate::catalog::{
        CatalogError, HandleParams, ListParams, Product, ProductList,
    };
    use crate::key::ListQuery;
    use crate::policy::{DelayTable, Tier};
    use crate::region;

    #[derive(Default)]
    struct CountingCatalog {
        handles: StdMutex<Vec<(String, Instant)>>,
        lists: StdMutex<Vec<ListParams>>,
    }

    #[async_trait]
    impl CatalogClient for CountingCatalog {
        async fn list_products(
            &self,
            params: ListParams,
            _signal: AbortSignal,
        ) -> Result<ProductList, CatalogError> {
            self.lists.lock().unwrap().push(params);
            Ok(ProductList {
                items: Vec::new(),
                count: 0,
            })
        }

        async fn get_product_by_handle(
            &self,
            params: HandleParams,
            _signal: AbortSignal,
        ) -> Result<Option<Product>, CatalogError> {
            self.handles
                .lock()
                .unwrap()
                .push((params.handle, Instant::now()));
            Ok(None)
        }
    }

    fn config() -> PrefetchConfig {
        PrefetchConfig {
            delays: DelayTable {
                hover: Tier::new(200, Priority::High),
                ..DelayTable::default()
            },
            ..PrefetchConfig::default()
        }
    }

    fn setup(config: PrefetchConfig) -> (Prefetcher, Arc<CountingCatalog>, Arc<MemoryCache>) {
        let catalog = Arc::new(CountingCatalog::default());
        let cache = Arc::new(MemoryCache::new());
        let (_tx, rx) = region::channel(Region::new("reg_us", "us"));
        let prefetcher = Prefetcher::new(config, catalog.clone(), cache.clone(), rx);
        (prefetcher, catalog, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn pending_then_settled() {
        let (prefetcher, catalog, _) = setup(config());
        let outcome = prefetcher.trigger(PrefetchTarget::product("abc"), Reason::Hover);
        assert!(matches!(
            outcome,
            TriggerOutcome::Scheduled { replaced: false, .. }
        ));
        assert_eq!(prefetcher.status("prod-abc"), Some(EntryStatus::Pending));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(prefetcher.status("prod-abc"), None);
        assert_eq!(catalog.handles.lock().unwrap().len(), 1);
        let stats = prefetcher.stats();
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.succeeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retrigger_replaces_pending() {
        let (prefetcher, catalog, _) = setup(config());
        prefetcher.trigger(PrefetchTarget::product("abc"), Reason::Hover);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let outcome = prefetcher.trigger(PrefetchTarget::product("abc"), Reason::Hover);
        assert!(matches!(
            outcome,
            TriggerOutcome::Scheduled { replaced: true, .. }
        ));
        assert_eq!(prefetcher.len(), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(catalog.handles.lock().unwrap().len(), 1);
        assert_eq!(prefetcher.stats().replaced, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_config_ignores_triggers() {
        let (prefetcher, _, _) = setup(PrefetchConfig {
            enabled: false,
            ..config()
        });
        assert_eq!(
            prefetcher.trigger(PrefetchTarget::product("abc"), Reason::Hover),
            TriggerOutcome::Disabled
        );
        assert!(prefetcher.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_cache_skips_dispatch() {
        let (prefetcher, catalog, cache) = setup(config());
        cache.insert("prod-abc@us/reg_us", "null", Duration::from_secs(60));
        prefetcher.trigger(PrefetchTarget::product("abc"), Reason::Hover);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(catalog.handles.lock().unwrap().is_empty());
        assert_eq!(prefetcher.stats().skipped, 1);
        assert!(prefetcher.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let (prefetcher, catalog, _) = setup(config());
        prefetcher.trigger(PrefetchTarget::product("abc"), Reason::Hover);
        assert!(prefetcher.cancel("prod-abc"));
        assert!(!prefetcher.cancel("prod-abc"));
        assert!(!prefetcher.cancel("prod-unknown"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(catalog.handles.lock().unwrap().is_empty());
        assert_eq!(prefetcher.stats().cancelled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn list_target_uses_key_and_page() {
        let (prefetcher, catalog, _) = setup(config());
        prefetcher
            .trigger_key("cat-c1:p2", Reason::AdjacentPage)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let lists = catalog.lists.lock().unwrap();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].query, ListQuery::new(["c1"]).page(2));
        assert_eq!(lists[0].offset, 12);
        assert_eq!(lists[0].meta.priority, Priority::Medium);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_registry_never_dispatches() {
        let (prefetcher, catalog, _) = setup(config());
        prefetcher.trigger(PrefetchTarget::product("abc"), Reason::Hover);
        drop(prefetcher);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(catalog.handles.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cached_list_does_not_cover_lookalike_target() {
        let (prefetcher, catalog, cache) = setup(config());
        let joined: PrefetchTarget = ListQuery::new(["a,b"]).into();
        let region = Region::new("reg_us", "us");
        cache.insert(
            joined.key().cache_key(&region),
            "null",
            Duration::from_secs(60),
        );

        prefetcher.trigger(ListQuery::new(["a", "b"]).into(), Reason::Hover);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(catalog.lists.lock().unwrap().len(), 1);
        assert_eq!(prefetcher.stats().skipped, 0);
    }

    #[tokio::test]
    async fn trigger_key_rejects_garbage() {
        let (prefetcher, _, _) = setup(config());
        assert!(prefetcher.trigger_key("banner-1", Reason::Hover).is_err());
        assert!(prefetcher.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_lists_live_entries() {
        let (prefetcher, _, _) = setup(config());
        prefetcher.trigger(PrefetchTarget::product("b"), Reason::Hover);
        prefetcher.trigger(PrefetchTarget::product("a"), Reason::SiblingCategory);
        let snapshot = prefetcher.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].key.as_str(), "prod-a");
        assert_eq!(snapshot[0].reason, "sibling_category");
        assert_eq!(snapshot[0].priority, Priority::Low);
        assert_eq!(snapshot[1].status, EntryStatus::Pending);
        assert_eq!(prefetcher.shutdown(), 2);
    }

    #[test]
    fn terminal_states() {
        assert!(EntryStatus::Cancelled.is_terminal());
        assert!(EntryStatus::Settled(Outcome::Failed).is_terminal());
        assert!(!EntryStatus::Pending.is_terminal());
        assert!(!EntryStatus::Fired.is_terminal());
    }

    #[test]
    fn status_serializes_with_outcome() {
        let json = serde_json::to_value(EntryStatus::Settled(Outcome::Skipped)).unwrap();
        assert_eq!(json["state"], "settled");
        assert_eq!(json["outcome"], "skipped");
    }
}
