//! Commerce catalog client contract.
//!
//! The prefetcher never talks to the commerce backend directly. It calls a
//! [`CatalogClient`], the same client the storefront's data-fetching layer
//! uses for user-initiated loads, and tags each request with a
//! [`RequestMeta`] so the client can rank speculative traffic below
//! navigation traffic.
//!
//! [`CachingClient`] is the glue that makes successful fetches land in a
//! [`MemoryCache`]; the prefetcher itself only ever reads the cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::cache::MemoryCache;
use crate::key::{ListQuery, PrefetchTarget};
use crate::policy::Priority;
use crate::region::Region;

/// Errors produced by a catalog client.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("network error: {0}")]
    Network(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("server responded {status}: {message}")]
    Server { status: u16, message: String },

    #[error("request aborted")]
    Aborted,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A product as returned by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub handle: String,
    pub title: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub category_ids: Vec<String>,
}

/// One page of products plus the total match count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductList {
    pub items: Vec<Product>,
    pub count: u64,
}

/// Who asked for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOrigin {
    /// The user navigated to the resource.
    Navigation,
    /// A speculative load ahead of navigation.
    Prefetch,
}

/// Request tagging forwarded to the catalog client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMeta {
    pub origin: FetchOrigin,
    pub priority: Priority,
}

impl RequestMeta {
    pub fn prefetch(priority: Priority) -> Self {
        Self {
            origin: FetchOrigin::Prefetch,
            priority,
        }
    }

    pub fn navigation() -> Self {
        Self {
            origin: FetchOrigin::Navigation,
            priority: Priority::High,
        }
    }
}

/// Parameters for a product listing request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListParams {
    pub query: ListQuery,
    pub limit: u32,
    pub offset: u32,
    pub region: Region,
    pub meta: RequestMeta,
}

/// Parameters for a product detail request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandleParams {
    pub handle: String,
    pub region: Region,
    pub meta: RequestMeta,
}

/// Cooperative cancellation signal handed to catalog calls.
///
/// Clients that can abort in-flight I/O should race their request against
/// [`AbortSignal::aborted`]. Clients that ignore it still get their result
/// discarded by the caller.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Returns `true` once the paired [`AbortHandle`] has fired.
    pub fn is_aborted(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves when the signal fires. Pends forever if it never can.
    pub async fn aborted(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            // Handle dropped without aborting.
            std::future::pending::<()>().await;
        }
    }
}

/// Write side of an [`AbortSignal`].
#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Fires the signal. Idempotent.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Creates a connected abort handle and signal.
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx }, AbortSignal { rx: Some(rx) })
}

/// The commerce catalog operations the prefetcher depends on.
///
/// Implementations must be idempotent: the same parameters may be requested
/// repeatedly, concurrently, and from both prefetch and navigation paths.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Lists products for a category page.
    async fn list_products(
        &self,
        params: ListParams,
        signal: AbortSignal,
    ) -> Result<ProductList, CatalogError>;

    /// Looks up a single product by handle. `Ok(None)` when it does not exist.
    async fn get_product_by_handle(
        &self,
        params: HandleParams,
        signal: AbortSignal,
    ) -> Result<Option<Product>, CatalogError>;
}

#[async_trait]
impl<C: CatalogClient + ?Sized> CatalogClient for Arc<C> {
    async fn list_products(
        &self,
        params: ListParams,
        signal: AbortSignal,
    ) -> Result<ProductList, CatalogError> {
        (**self).list_products(params, signal).await
    }

    async fn get_product_by_handle(
        &self,
        params: HandleParams,
        signal: AbortSignal,
    ) -> Result<Option<Product>, CatalogError> {
        (**self).get_product_by_handle(params, signal).await
    }
}

/// Wraps a client and records every successful response in a [`MemoryCache`].
///
/// Responses are stored as JSON under the same region-scoped key the skip
/// check reads, fresh for `ttl`.
pub struct CachingClient<C> {
    inner: C,
    cache: Arc<MemoryCache>,
    ttl: Duration,
}

impl<C: CatalogClient> CachingClient<C> {
    pub fn new(inner: C, cache: Arc<MemoryCache>, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }

    pub fn cache(&self) -> &Arc<MemoryCache> {
        &self.cache
    }
}

#[async_trait]
impl<C: CatalogClient> CatalogClient for CachingClient<C> {
    async fn list_products(
        &self,
        params: ListParams,
        signal: AbortSignal,
    ) -> Result<ProductList, CatalogError> {
        let cache_key = PrefetchTarget::ProductList(params.query.clone())
            .key()
            .cache_key(&params.region);
        let list = self.inner.list_products(params, signal).await?;
        self.cache
            .insert(cache_key, serde_json::to_vec(&list)?, self.ttl);
        Ok(list)
    }

    async fn get_product_by_handle(
        &self,
        params: HandleParams,
        signal: AbortSignal,
    ) -> Result<Option<Product>, CatalogError> {
        let cache_key = PrefetchTarget::product(params.handle.as_str())
            .key()
            .cache_key(&params.region);
        let product = self.inner.get_product_by_handle(params, signal).await?;
        self.cache
            .insert(cache_key, serde_json::to_vec(&product)?, self.ttl);
        Ok(product)
    }
}
