//! Per-call-chain resolution stack.
//!
//! Every [`Resolver`](crate::resolver::Resolver) carries the keys that are
//! being produced above it. The stack is passed explicitly and never shared
//! between unrelated call chains.

use std::sync::Arc;

use crate::error::CircularDependencyError;
use crate::key::DependencyKey;

/// Immutable list of keys currently being produced in one call chain.
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    stack: Arc<[DependencyKey]>,
}

impl ResolutionContext {
    /// An empty context, used by top-level resolvers.
    pub fn root() -> Self {
        Self::default()
    }

    /// Returns a new context with `key` on top. `self` is left untouched.
    pub fn push(&self, key: DependencyKey) -> Self {
        let mut stack = Vec::with_capacity(self.stack.len() + 1);
        stack.extend(self.stack.iter().cloned());
        stack.push(key);
        Self {
            stack: stack.into(),
        }
    }

    #[inline]
    pub fn contains(&self, key: &DependencyKey) -> bool {
        self.stack.iter().any(|k| k == key)
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// The key being produced by the innermost factory, if any.
    pub fn current(&self) -> Option<&DependencyKey> {
        self.stack.last()
    }

    pub fn keys(&self) -> &[DependencyKey] {
        &self.stack
    }

    /// Cycle error for re-entering `key`: the full stack followed by `key`.
    pub fn cycle_to(&self, key: &DependencyKey) -> CircularDependencyError {
        let mut path = self.stack.to_vec();
        path.push(key.clone());
        CircularDependencyError { path }
    }
}
