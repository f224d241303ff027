//! Simulated browsing session: hovers, pagination, and a region switch
//! against an in-memory catalog with artificial latency.
//!
//! ```sh
//! RUST_LOG=storefront_prefetch=trace cargo run --example storefront
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use storefront_prefetch::catalog::{HandleParams, ListParams, Product, ProductList};
use storefront_prefetch::{
    AbortSignal, CachingClient, CatalogClient, CatalogError, MemoryCache, PrefetchConfig,
    PrefetchTarget, Prefetcher, Reason, Region, region,
};

struct DemoCatalog {
    products: Vec<Product>,
    latency: Duration,
}

impl DemoCatalog {
    fn new() -> Self {
        let products = ["shorts", "sweatshirt", "sweatpants", "t-shirt"]
            .iter()
            .enumerate()
            .map(|(i, handle)| Product {
                id: format!("prod_{i:02}"),
                handle: handle.to_string(),
                title: handle.replace('-', " "),
                thumbnail: None,
                category_ids: vec![if i % 2 == 0 { "pants" } else { "tops" }.to_string()],
            })
            .collect();
        Self {
            products,
            latency: Duration::from_millis(120),
        }
    }
}

#[async_trait]
impl CatalogClient for DemoCatalog {
    async fn list_products(
        &self,
        params: ListParams,
        signal: AbortSignal,
    ) -> Result<ProductList, CatalogError> {
        tokio::select! {
            _ = signal.aborted() => return Err(CatalogError::Aborted),
            _ = tokio::time::sleep(self.latency) => {}
        }
        let matching: Vec<Product> = self
            .products
            .iter()
            .filter(|p| {
                p.category_ids
                    .iter()
                    .any(|c| params.query.category_ids.contains(c))
            })
            .cloned()
            .collect();
        let count = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(params.offset as usize)
            .take(params.limit as usize)
            .collect();
        Ok(ProductList { items, count })
    }

    async fn get_product_by_handle(
        &self,
        params: HandleParams,
        signal: AbortSignal,
    ) -> Result<Option<Product>, CatalogError> {
        tokio::select! {
            _ = signal.aborted() => return Err(CatalogError::Aborted),
            _ = tokio::time::sleep(self.latency) => {}
        }
        if params.handle == "discontinued" {
            return Err(CatalogError::Server {
                status: 500,
                message: "inventory service unavailable".into(),
            });
        }
        Ok(self
            .products
            .iter()
            .find(|p| p.handle == params.handle)
            .cloned())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("storefront_prefetch=debug,storefront=info")),
        )
        .init();

    let config = PrefetchConfig::from_env()?;
    let cache = Arc::new(MemoryCache::new());
    let client = CachingClient::new(DemoCatalog::new(), Arc::clone(&cache), config.cache_ttl());
    let (region_tx, region_rx) = region::channel(Region::new("reg_us", "us"));

    let prefetcher = Prefetcher::new(config, Arc::new(client), cache.clone(), region_rx);
    let follower = prefetcher.follow_region();

    // Shopper skims across product cards; only the last hover survives.
    for handle in ["shorts", "sweatshirt", "sweatshirt"] {
        prefetcher.trigger(PrefetchTarget::product(handle), Reason::Hover);
        tokio::time::sleep(Duration::from_millis(150)).await;
    }
    prefetcher.trigger(PrefetchTarget::product("discontinued"), Reason::Hover);
    prefetcher.trigger_key("cat-tops:p2", Reason::AdjacentPage)?;
    prefetcher.trigger_key("cat-pants", Reason::SiblingCategory)?;

    tokio::time::sleep(Duration::from_millis(600)).await;
    tracing::info!(live = ?prefetcher.snapshot(), "mid-session");

    // Switching region reschedules everything still outstanding.
    region_tx.set(Region::new("reg_eu", "dk"));
    tokio::time::sleep(Duration::from_secs(3)).await;

    prefetcher.shutdown();
    drop(region_tx);
    follower.await?;

    tracing::info!(
        stats = %serde_json::to_string(&prefetcher.stats())?,
        cached = cache.len(),
        "session finished"
    );
    Ok(())
}
