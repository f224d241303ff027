//! # storefront-prefetch
//!
//! Debounced, cache-aware speculative prefetching for headless-commerce
//! storefronts.
//!
//! UI signals (a hover on a product card, a link scrolling into view, the
//! next page of a listing) call [`Prefetcher::trigger`]. The prefetcher waits
//! out a per-reason delay, skips the fetch if the shared request cache already
//! holds fresh data, and otherwise issues a low-priority catalog request.
//! Prefetch failures never reach the caller.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use storefront_prefetch::{
//!     CachingClient, MemoryCache, PrefetchConfig, Prefetcher, PrefetchTarget, Reason, Region,
//!     catalog::CatalogClient, region,
//! };
//!
//! # async fn example(backend: Arc<dyn CatalogClient>) {
//! let cache = Arc::new(MemoryCache::new());
//! let client = CachingClient::new(backend, Arc::clone(&cache), Duration::from_secs(60));
//! let (_region_tx, region_rx) = region::channel(Region::new("reg_01", "us"));
//!
//! let prefetcher = Prefetcher::new(PrefetchConfig::default(), Arc::new(client), cache, region_rx);
//! prefetcher.trigger(PrefetchTarget::product("sweatshirt"), Reason::Hover);
//! # }
//! ```

// ── Leaves ────────────────────────────────────────────────────────────────────
pub mod key;
pub mod policy;
pub mod region;

// ── Collaborator contracts ────────────────────────────────────────────────────
pub mod cache;
pub mod catalog;

// ── Scheduling ────────────────────────────────────────────────────────────────
pub mod config;
pub mod dispatch;
pub mod events;
pub mod registry;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheEntry, MemoryCache, QueryCache};
pub use catalog::{AbortSignal, CachingClient, CatalogClient, CatalogError};
pub use config::{ConfigError, PrefetchConfig};
pub use dispatch::PrefetchError;
pub use events::{PrefetchEvent, PrefetchStats};
pub use key::{KeyError, ListQuery, PrefetchKey, PrefetchTarget};
pub use policy::{DelayTable, Priority, Reason, Tier};
pub use region::Region;
pub use registry::{EntryStatus, Outcome, Prefetcher, TriggerOutcome};
