//! Region and locale input.
//!
//! The storefront resolves the shopper's region (price list, currency) and
//! country code elsewhere; this crate only reads the current value. It is
//! published through a [`tokio::sync::watch`] channel so the prefetcher always
//! sees the latest region and can react when it changes.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// The commerce region and country a request is made for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub region_id: String,
    pub country_code: String,
}

impl Region {
    /// Creates a region. The country code is lower-cased to match storefront URLs.
    pub fn new(region_id: impl Into<String>, country_code: impl Into<String>) -> Self {
        Self {
            region_id: region_id.into(),
            country_code: country_code.into().to_ascii_lowercase(),
        }
    }
}

/// Write side of the region channel, held by whatever resolves the region.
#[derive(Debug)]
pub struct RegionSender {
    tx: watch::Sender<Region>,
}

impl RegionSender {
    /// Publishes a new region. Returns `false` when the value did not change.
    pub fn set(&self, region: Region) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == region {
                false
            } else {
                *current = region;
                true
            }
        })
    }

    /// Returns the region currently published.
    pub fn current(&self) -> Region {
        self.tx.borrow().clone()
    }

    /// Returns a new read handle.
    pub fn subscribe(&self) -> watch::Receiver<Region> {
        self.tx.subscribe()
    }
}

/// Creates a region channel seeded with `initial`.
pub fn channel(initial: Region) -> (RegionSender, watch::Receiver<Region>) {
    let (tx, rx) = watch::channel(initial);
    (RegionSender { tx }, rx)
}
