//! Weak observation of externally owned instances.
//!
//! A [`WeakHandle`] never keeps its target alive. [`HandleCollection`] keys
//! handles by dependency and sweeps the dead ones on request.

use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::key::DependencyKey;

/// Non-owning reference to a produced instance.
#[derive(Debug, Clone)]
pub struct WeakHandle {
    target: Weak<dyn Any + Send + Sync>,
    created_at: Instant,
}

impl WeakHandle {
    /// Observes `instance` without taking ownership.
    pub fn new(instance: &Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            target: Arc::downgrade(instance),
            created_at: Instant::now(),
        }
    }

    /// Returns `true` while some owner still holds the instance.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }

    /// The instance, if it is still alive.
    pub fn upgrade(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.target.upgrade()
    }

    /// Time since the handle was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Alive/dead breakdown of a [`HandleCollection`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleCounts {
    pub alive: usize,
    pub dead: usize,
}

impl HandleCounts {
    pub fn total(&self) -> usize {
        self.alive + self.dead
    }
}

/// Keyed set of weak handles.
#[derive(Debug, Default)]
pub struct HandleCollection {
    handles: DashMap<DependencyKey, WeakHandle>,
}

impl HandleCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a handle, replacing any previous one for `key`.
    pub fn insert(&self, key: DependencyKey, handle: WeakHandle) {
        self.handles.insert(key, handle);
    }

    /// The live instance for `key`, if any.
    pub fn get(&self, key: &DependencyKey) -> Option<Arc<dyn Any + Send + Sync>> {
        self.handles.get(key).and_then(|handle| handle.upgrade())
    }

    /// Returns `true` if a handle (alive or dead) exists for `key`.
    pub fn contains(&self, key: &DependencyKey) -> bool {
        self.handles.contains_key(key)
    }

    /// Removes every dead handle and returns how many were dropped.
    pub fn cleanup(&self) -> usize {
        let before = self.handles.len();
        self.handles.retain(|_, handle| handle.is_alive());
        let removed = before.saturating_sub(self.handles.len());
        if removed > 0 {
            debug!(removed, remaining = self.handles.len(), "Swept dead weak handles");
        }
        removed
    }

    pub fn counts(&self) -> HandleCounts {
        self.handles
            .iter()
            .fold(HandleCounts::default(), |mut counts, entry| {
                if entry.value().is_alive() {
                    counts.alive += 1;
                } else {
                    counts.dead += 1;
                }
                counts
            })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn clear(&self) {
        self.handles.clear();
    }
}
