//! Prefetch keys and the catalog resources they stand for.
//!
//! Every prefetch is identified by a [`PrefetchKey`], an opaque string derived
//! from the [`PrefetchTarget`] it warms. Keys are stable for identical targets,
//! and the registry keeps at most one live entry per key.
//!
//! | Target                                   | Key                          |
//! |------------------------------------------|------------------------------|
//! | product `abc`                            | `prod-abc`                   |
//! | categories `c1`, `c2`, page 2            | `cat-c1,c2:p2`               |
//! | category `c1`, page 1, `sort=price`      | `cat-c1:p1:sort=price`       |
//! | category `c1`, page 1, `tag=Tops & Tees` | `cat-c1:p1:tag=Tops%20%26%20Tees` |
//!
//! Category ids, filter names and filter values are percent-encoded, so a
//! separator inside one of them never changes the key's shape.
//!
//! Keys parse back into targets, so UI code that only carries the key string
//! can still trigger a prefetch.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use urlencoding::{decode, encode};

use crate::region::Region;

/// Key prefix shared by every product-detail prefetch.
pub const PRODUCT_PREFIX: &str = "prod-";

/// Key prefix shared by every product-list (category page) prefetch.
pub const CATEGORY_PREFIX: &str = "cat-";

/// Errors produced when parsing a key string back into a target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("unknown key prefix in {0:?}")]
    UnknownPrefix(String),

    #[error("product key {0:?} has an empty handle")]
    EmptyHandle(String),

    #[error("category key {0:?} names no categories")]
    EmptyCategories(String),

    #[error("category key {key:?} has an invalid page segment {segment:?}")]
    InvalidPage { key: String, segment: String },

    #[error("category key {key:?} has an invalid filter {filter:?}")]
    InvalidFilter { key: String, filter: String },

    #[error("category key {key:?} has a badly encoded component {component:?}")]
    InvalidEncoding { key: String, component: String },
}

/// An opaque identifier for one prefetchable resource.
///
/// Construct one from a target with [`PrefetchTarget::key`]; the raw string is
/// exposed for prefix sweeps and logging.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrefetchKey(String);

impl PrefetchKey {
    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this key belongs to the scope named by `prefix`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    /// Returns the query-cache key for this resource in the given region.
    ///
    /// Cached data is region-specific (prices, availability), so the same
    /// prefetch key maps to a different cache slot per region.
    pub fn cache_key(&self, region: &Region) -> String {
        format!("{}@{}/{}", self.0, region.country_code, region.region_id)
    }
}

impl fmt::Display for PrefetchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PrefetchKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

// Lets key maps be queried with plain `&str`.
impl Borrow<str> for PrefetchKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A category listing page: one or more categories, a 1-based page number and
/// an optional filter set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListQuery {
    pub category_ids: Vec<String>,
    pub page: u32,
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

impl ListQuery {
    /// Creates a query for the first page of the given categories.
    pub fn new<I, S>(category_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            category_ids: category_ids.into_iter().map(Into::into).collect(),
            page: 1,
            filters: BTreeMap::new(),
        }
    }

    /// Sets the page number. Page `0` is normalized to `1`.
    #[must_use]
    pub fn page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    /// Adds a filter. Filters are kept sorted by name so key derivation is stable.
    #[must_use]
    pub fn filter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(name.into(), value.into());
        self
    }
}

/// The catalog resource a prefetch warms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PrefetchTarget {
    /// A product detail page, looked up by handle.
    Product { handle: String },
    /// A product listing page for a set of categories.
    ProductList(ListQuery),
}

impl PrefetchTarget {
    /// Shorthand for a product-detail target.
    pub fn product(handle: impl Into<String>) -> Self {
        Self::Product {
            handle: handle.into(),
        }
    }

    /// Derives the prefetch key for this target.
    pub fn key(&self) -> PrefetchKey {
        match self {
            Self::Product { handle } => PrefetchKey(format!("{PRODUCT_PREFIX}{handle}")),
            Self::ProductList(query) => {
                let ids: Vec<_> = query.category_ids.iter().map(|id| encode(id)).collect();
                let mut key = format!("{CATEGORY_PREFIX}{}:p{}", ids.join(","), query.page);
                if !query.filters.is_empty() {
                    let filters: Vec<String> = query
                        .filters
                        .iter()
                        .map(|(name, value)| format!("{}={}", encode(name), encode(value)))
                        .collect();
                    key.push(':');
                    key.push_str(&filters.join("&"));
                }
                PrefetchKey(key)
            }
        }
    }
}

impl From<ListQuery> for PrefetchTarget {
    fn from(query: ListQuery) -> Self {
        Self::ProductList(query)
    }
}

impl FromStr for PrefetchTarget {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(handle) = s.strip_prefix(PRODUCT_PREFIX) {
            if handle.is_empty() {
                return Err(KeyError::EmptyHandle(s.to_owned()));
            }
            return Ok(Self::product(handle));
        }

        let Some(rest) = s.strip_prefix(CATEGORY_PREFIX) else {
            return Err(KeyError::UnknownPrefix(s.to_owned()));
        };

        let mut parts = rest.splitn(3, ':');
        let category_ids = parts
            .next()
            .unwrap_or("")
            .split(',')
            .filter(|id| !id.is_empty())
            .map(|id| decode_component(s, id))
            .collect::<Result<Vec<String>, KeyError>>()?;
        if category_ids.is_empty() {
            return Err(KeyError::EmptyCategories(s.to_owned()));
        }

        // The page segment is optional so `cat-c1` means the first page.
        let page = match parts.next() {
            None => 1,
            Some(segment) => segment
                .strip_prefix('p')
                .and_then(|n| n.parse::<u32>().ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| KeyError::InvalidPage {
                    key: s.to_owned(),
                    segment: segment.to_owned(),
                })?,
        };

        let mut filters = BTreeMap::new();
        if let Some(raw) = parts.next() {
            for pair in raw.split('&').filter(|p| !p.is_empty()) {
                let Some((name, value)) = pair.split_once('=') else {
                    return Err(KeyError::InvalidFilter {
                        key: s.to_owned(),
                        filter: pair.to_owned(),
                    });
                };
                if name.is_empty() {
                    return Err(KeyError::InvalidFilter {
                        key: s.to_owned(),
                        filter: pair.to_owned(),
                    });
                }
                filters.insert(decode_component(s, name)?, decode_component(s, value)?);
            }
        }

        Ok(Self::ProductList(ListQuery {
            category_ids,
            page,
            filters,
        }))
    }
}

fn decode_component(key: &str, component: &str) -> Result<String, KeyError> {
    decode(component)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| KeyError::InvalidEncoding {
            key: key.to_owned(),
            component: component.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_key() {
        assert_eq!(PrefetchTarget::product("abc").key().as_str(), "prod-abc");
    }

    #[test]
    fn list_key_without_filters() {
        let target: PrefetchTarget = ListQuery::new(["c1", "c2"]).page(2).into();
        assert_eq!(target.key().as_str(), "cat-c1,c2:p2");
    }

    #[test]
    fn list_key_filters_are_sorted() {
        let a: PrefetchTarget = ListQuery::new(["c1"])
            .filter("sort", "price")
            .filter("color", "red")
            .into();
        let b: PrefetchTarget = ListQuery::new(["c1"])
            .filter("color", "red")
            .filter("sort", "price")
            .into();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().as_str(), "cat-c1:p1:color=red&sort=price");
    }

    #[test]
    fn page_zero_normalized() {
        assert_eq!(ListQuery::new(["c1"]).page(0).page, 1);
    }

    #[test]
    fn parse_product_key() {
        let target: PrefetchTarget = "prod-abc".parse().unwrap();
        assert_eq!(target, PrefetchTarget::product("abc"));
    }

    #[test]
    fn parse_list_key_round_trips() {
        let query: PrefetchTarget = ListQuery::new(["c1", "c2"])
            .page(3)
            .filter("sort", "price")
            .into();
        let parsed: PrefetchTarget = query.key().as_str().parse().unwrap();
        assert_eq!(parsed, query);
    }

    #[test]
    fn separators_inside_components_are_escaped() {
        let target: PrefetchTarget = ListQuery::new(["a,b", "c:d"])
            .filter("tag", "Tops & Tees")
            .filter("x", "1&y=2%")
            .into();
        assert_eq!(
            target.key().as_str(),
            "cat-a%2Cb,c%3Ad:p1:tag=Tops%20%26%20Tees&x=1%26y%3D2%25"
        );
        let parsed: PrefetchTarget = target.key().as_str().parse().unwrap();
        assert_eq!(parsed, target);
    }

    #[test]
    fn distinct_targets_never_share_a_key() {
        let joined: PrefetchTarget = ListQuery::new(["tops"]).filter("x", "1&y=2").into();
        let split: PrefetchTarget = ListQuery::new(["tops"])
            .filter("x", "1")
            .filter("y", "2")
            .into();
        assert_ne!(joined.key(), split.key());

        let one: PrefetchTarget = ListQuery::new(["a,b"]).into();
        let two: PrefetchTarget = ListQuery::new(["a", "b"]).into();
        assert_ne!(one.key(), two.key());
        assert_eq!(two.key().as_str(), "cat-a,b:p1");
    }

    #[test]
    fn parse_rejects_non_utf8_escapes() {
        assert!(matches!(
            "cat-%FF:p1".parse::<PrefetchTarget>(),
            Err(KeyError::InvalidEncoding { .. })
        ));
    }

    #[test]
    fn parse_list_key_defaults_to_first_page() {
        let target: PrefetchTarget = "cat-1".parse().unwrap();
        assert_eq!(target, PrefetchTarget::ProductList(ListQuery::new(["1"])));
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        assert!(matches!(
            "prod-".parse::<PrefetchTarget>(),
            Err(KeyError::EmptyHandle(_))
        ));
        assert!(matches!(
            "cat-:p1".parse::<PrefetchTarget>(),
            Err(KeyError::EmptyCategories(_))
        ));
        assert!(matches!(
            "cat-c1:page2".parse::<PrefetchTarget>(),
            Err(KeyError::InvalidPage { .. })
        ));
        assert!(matches!(
            "cat-c1:p0".parse::<PrefetchTarget>(),
            Err(KeyError::InvalidPage { .. })
        ));
        assert!(matches!(
            "cat-c1:p1:novalue".parse::<PrefetchTarget>(),
            Err(KeyError::InvalidFilter { .. })
        ));
        assert!(matches!(
            "collection-x".parse::<PrefetchTarget>(),
            Err(KeyError::UnknownPrefix(_))
        ));
    }

    #[test]
    fn cache_key_is_region_scoped() {
        let key = PrefetchTarget::product("abc").key();
        let us = Region::new("reg_us", "us");
        let dk = Region::new("reg_eu", "dk");
        assert_eq!(key.cache_key(&us), "prod-abc@us/reg_us");
        assert_ne!(key.cache_key(&us), key.cache_key(&dk));
    }

    #[test]
    fn prefix_scope() {
        let key = PrefetchTarget::product("abc").key();
        assert!(key.has_prefix(PRODUCT_PREFIX));
        assert!(!key.has_prefix(CATEGORY_PREFIX));
        assert!(key.has_prefix(""));
    }
}
