//! Lifetime and cache policies.
//!
//! A [`Lifetime`] decides whether and how a produced instance is kept:
//! - [`Lifetime::EagerSingleton`]: built once, during kernel startup
//! - [`Lifetime::LazySingleton`]: built once, on first resolve
//! - [`Lifetime::OnDemand`]: built on every resolve, unless a
//!   [`CachePolicy`] keeps it around for a while
//! - [`Lifetime::Weak`]: shared while somebody outside the container holds it
//!
//! # Ordering
//! Lifetimes are ordered by startup tier: eager services come first,
//! weak ones last.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Defines how long a resolved instance is kept by the container.
///
/// # Examples
/// ```
/// use tadbir_container::lifetime::Lifetime;
///
/// assert!(Lifetime::EagerSingleton < Lifetime::Weak);
/// assert_eq!(Lifetime::OnDemand.tier(), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Lifetime {
    /// One instance for the container's life, created during startup.
    ///
    /// # When to use
    /// - Logging and crash reporting
    /// - Configuration that every other service reads
    EagerSingleton,

    /// One instance for the container's life, created on first use.
    LazySingleton,

    /// A fresh instance per resolve.
    ///
    /// Attach a [`CachePolicy`] to reuse instances for a bounded time or count.
    OnDemand,

    /// Shared while an external owner keeps the `Arc` alive.
    ///
    /// The container only observes the instance; once every outside
    /// reference is dropped the next resolve builds a new one.
    Weak,
}

impl Lifetime {
    /// Startup tier, 0 for eager singletons up to 3 for weak registrations.
    #[inline]
    pub fn tier(&self) -> u32 {
        match self {
            Lifetime::EagerSingleton => 0,
            Lifetime::LazySingleton => 1,
            Lifetime::OnDemand => 2,
            Lifetime::Weak => 3,
        }
    }

    /// Returns `true` if the instance lives as long as the container.
    #[inline]
    pub fn is_singleton(&self) -> bool {
        matches!(self, Lifetime::EagerSingleton | Lifetime::LazySingleton)
    }

    /// Returns `true` if the kernel builds the instance at startup.
    #[inline]
    pub fn is_eager(&self) -> bool {
        matches!(self, Lifetime::EagerSingleton)
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifetime::EagerSingleton => write!(f, "EagerSingleton"),
            Lifetime::LazySingleton => write!(f, "LazySingleton"),
            Lifetime::OnDemand => write!(f, "OnDemand"),
            Lifetime::Weak => write!(f, "Weak"),
        }
    }
}

/// Which cached entry leaves first when the cache is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EvictionPolicy {
    /// Least recently used; hits refresh the entry.
    #[default]
    Lru,
    /// First in, first out; hits do not refresh the entry.
    Fifo,
}

/// Bounds for caching [`Lifetime::OnDemand`] instances.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use tadbir_container::lifetime::{CachePolicy, EvictionPolicy};
///
/// let policy = CachePolicy::bounded(64)
///     .with_ttl(Duration::from_secs(30))
///     .with_eviction(EvictionPolicy::Fifo);
/// assert_eq!(policy.max_entries, Some(64));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Maximum number of cached on-demand entries, `None` for unbounded.
    pub max_entries: Option<usize>,
    /// How long an entry stays valid after insertion.
    pub ttl: Option<Duration>,
    /// Order in which entries are evicted.
    pub eviction: EvictionPolicy,
}

impl CachePolicy {
    /// Unbounded, never-expiring LRU policy.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// LRU policy holding at most `max_entries` entries.
    pub fn bounded(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries),
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }
}
