//! Delay and priority table for prefetch reasons.
//!
//! Each UI signal that can start a prefetch carries a [`Reason`]. The
//! [`DelayTable`] maps a reason to a [`Tier`]: how long to wait before firing
//! and how the resulting request ranks against other traffic. Changing the
//! table only changes how aggressive prefetching is, never its correctness.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Why a prefetch was requested.
///
/// Standard reasons are unit variants; anything else is captured in
/// [`Reason::Custom`] and resolved against the table's custom entries.
///
/// # Examples
///
/// ```
/// use storefront_prefetch::policy::Reason;
///
/// let reason: Reason = "hover".parse().unwrap();
/// assert_eq!(reason, Reason::Hover);
/// assert_eq!("quick-view".parse::<Reason>().unwrap(), Reason::Custom("quick-view".into()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reason {
    /// Pointer rests on a product card or category link.
    Hover,
    /// A link scrolled into the viewport.
    ViewportEntry,
    /// The next or previous page of the listing being viewed.
    AdjacentPage,
    /// A neighbouring category in the navigation tree.
    SiblingCategory,
    /// An application-defined reason.
    Custom(String),
}

impl Reason {
    /// Returns the reason as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Hover => "hover",
            Self::ViewportEntry => "viewport_entry",
            Self::AdjacentPage => "adjacent_page",
            Self::SiblingCategory => "sibling_category",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Reason {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "hover" => Self::Hover,
            "viewport_entry" => Self::ViewportEntry,
            "adjacent_page" => Self::AdjacentPage,
            "sibling_category" => Self::SiblingCategory,
            other => Self::Custom(other.to_owned()),
        })
    }
}

/// Relative importance of a prefetch request. `High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling parameters for one reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub delay_ms: u64,
    pub priority: Priority,
}

impl Tier {
    pub const fn new(delay_ms: u64, priority: Priority) -> Self {
        Self { delay_ms, priority }
    }

    /// Returns the debounce delay as a [`Duration`].
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Reason -> tier lookup table.
///
/// | Reason             | Delay   | Priority |
/// |--------------------|---------|----------|
/// | `hover`            | 400 ms  | High     |
/// | `viewport_entry`   | 800 ms  | Medium   |
/// | `adjacent_page`    | 1000 ms | Medium   |
/// | `sibling_category` | 2000 ms | Low      |
/// | anything else      | 1500 ms | Low      |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayTable {
    pub hover: Tier,
    pub viewport_entry: Tier,
    pub adjacent_page: Tier,
    pub sibling_category: Tier,
    /// Fallback for unknown reasons and unconfigured custom reasons.
    pub default: Tier,
    /// Tiers for application-defined reasons, keyed by name.
    pub custom: HashMap<String, Tier>,
}

impl Default for DelayTable {
    fn default() -> Self {
        Self {
            hover: Tier::new(400, Priority::High),
            viewport_entry: Tier::new(800, Priority::Medium),
            adjacent_page: Tier::new(1000, Priority::Medium),
            sibling_category: Tier::new(2000, Priority::Low),
            default: Tier::new(1500, Priority::Low),
            custom: HashMap::new(),
        }
    }
}

impl DelayTable {
    /// Returns the tier for `reason`. Never fails.
    pub fn lookup(&self, reason: &Reason) -> Tier {
        match reason {
            Reason::Hover => self.hover,
            Reason::ViewportEntry => self.viewport_entry,
            Reason::AdjacentPage => self.adjacent_page,
            Reason::SiblingCategory => self.sibling_category,
            Reason::Custom(name) => self.custom.get(name).copied().unwrap_or(self.default),
        }
    }

    /// Registers a tier for a custom reason.
    #[must_use]
    pub fn with_custom(mut self, name: impl Into<String>, tier: Tier) -> Self {
        self.custom.insert(name.into(), tier);
        self
    }
}
