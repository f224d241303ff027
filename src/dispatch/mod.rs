//! Fetch dispatcher: turns a prefetch target into a catalog request.

use std::sync::Arc;

use thiserror::Error;
use tracing::trace;

use crate::catalog::{
    AbortSignal, CatalogClient, CatalogError, HandleParams, ListParams, RequestMeta,
};
use crate::key::PrefetchTarget;
use crate::policy::Priority;
use crate::region::Region;

/// Why a prefetch did not complete.
#[derive(Debug, Error)]
pub enum PrefetchError {
    #[error("catalog request failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("prefetch aborted")]
    Aborted,
}

/// What a successful dispatch fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetched {
    List { items: usize, count: u64 },
    Product { found: bool },
}

/// Issues prefetch requests through a [`CatalogClient`].
#[derive(Clone)]
pub struct Dispatcher {
    client: Arc<dyn CatalogClient>,
    page_size: u32,
}

impl Dispatcher {
    /// Creates a dispatcher. A `page_size` of `0` is treated as `1`.
    pub fn new(client: Arc<dyn CatalogClient>, page_size: u32) -> Self {
        Self {
            client,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Fetches `target` for `region`, tagged as a prefetch at `priority`.
    ///
    /// The request races `signal`; if the signal fires first the request
    /// future is dropped and [`PrefetchError::Aborted`] is returned.
    pub async fn dispatch(
        &self,
        target: &PrefetchTarget,
        region: &Region,
        priority: Priority,
        signal: AbortSignal,
    ) -> Result<Fetched, PrefetchError> {
        if signal.is_aborted() {
            return Err(PrefetchError::Aborted);
        }

        let meta = RequestMeta::prefetch(priority);
        let request = self.request(target, region, meta, signal.clone());

        tokio::select! {
            biased;
            _ = signal.aborted() => Err(PrefetchError::Aborted),
            res = request => res,
        }
    }

    async fn request(
        &self,
        target: &PrefetchTarget,
        region: &Region,
        meta: RequestMeta,
        signal: AbortSignal,
    ) -> Result<Fetched, PrefetchError> {
        match target {
            PrefetchTarget::Product { handle } => {
                trace!(handle = %handle, region = %region.region_id, "prefetching product");
                let params = HandleParams {
                    handle: handle.clone(),
                    region: region.clone(),
                    meta,
                };
                let product = self.client.get_product_by_handle(params, signal).await?;
                Ok(Fetched::Product {
                    found: product.is_some(),
                })
            }
            PrefetchTarget::ProductList(query) => {
                trace!(
                    categories = ?query.category_ids,
                    page = query.page,
                    region = %region.region_id,
                    "prefetching product list"
                );
                let params = ListParams {
                    query: query.clone(),
                    limit: self.page_size,
                    offset: query.page.saturating_sub(1).saturating_mul(self.page_size),
                    region: region.clone(),
                    meta,
                };
                let list = self.client.list_products(params, signal).await?;
                Ok(Fetched::List {
                    items: list.items.len(),
                    count: list.count,
                })
            }
        }
    }
}
