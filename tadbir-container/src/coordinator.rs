//! Resolution coordinator.
//!
//! Owns every piece of mutable resolution state of one container: the
//! singleton cache, the shared on-demand cache, the in-flight table, the
//! creation order and the disposal marks. All of it sits behind a single
//! `parking_lot::Mutex` whose guard is never held across an `.await`.
//!
//! # Resolution
//! ```text
//! resolve(key, ctx)
//!   ├─ shut down?            → ShutdownInProgress
//!   ├─ cached?               → hit
//!   ├─ not registered here?  → parent.resolve(key, ctx) | NotRegistered
//!   ├─ key on ctx stack?     → CircularDependency
//!   ├─ in flight?            → wait on its watch channel
//!   └─ otherwise             → spawn production with ctx + key
//! ```
//!
//! Only locally registered keys are ever cached, and the registration picks
//! which cache to look in, so the code fetches the registration before the
//! cache lookup. A key without one misses every cache and is delegated.
//!
//! # Disposal
//! A cached instance with a disposal hook is disposed exactly once, whether
//! it leaves through eviction, TTL expiry, memory pressure, terminate or
//! shutdown. Hooks always run after the state lock is released.
//!
//! Production runs in its own task. A caller that stops waiting does not
//! cancel it; the result is still cached and published to the others.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tadbir_support::rendering::suggest_similar;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::cache::{Lookup, OnDemandCache, Released};
use crate::context::ResolutionContext;
use crate::error::{NotRegisteredError, Result, TadbirError};
use crate::hooks::DisposeHook;
use crate::key::DependencyKey;
use crate::lifetime::Lifetime;
use crate::metrics::{MetricsSnapshot, ResolutionMetrics};
use crate::registry::{Instance, RegistrationEntry, Registry};
use crate::resolver::Resolver;
use crate::weak::{HandleCollection, WeakHandle};

const MAX_SUGGESTIONS: usize = 3;

type Outcome = Option<Result<Instance>>;

type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Result<Instance>> + Send + 'a>>;

/// A claimed disposal, run once the state lock is released.
type PendingDisposal = (DependencyKey, Instance, DisposeHook);

/// Where a resolve goes after the locked section.
enum Joined {
    Cached(Instance),
    Waiting(watch::Receiver<Outcome>),
}

/// A production task ended without publishing a result (panic or runtime
/// shutdown).
#[derive(Debug, thiserror::Error)]
#[error("production of {0} ended before publishing a result")]
struct ProductionAborted(DependencyKey);

/// What a memory-pressure signal released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryPressureReport {
    /// Dead weak handles swept.
    pub released_handles: usize,
    /// On-demand cache entries dropped.
    pub released_cache_entries: usize,
    /// Dropped cache entries whose disposal hook ran.
    pub disposed: usize,
}

impl MemoryPressureReport {
    /// Handles plus cache entries released.
    pub fn total(&self) -> usize {
        self.released_handles + self.released_cache_entries
    }
}

#[derive(Debug)]
struct CoordinatorState {
    singletons: HashMap<DependencyKey, Instance>,
    on_demand: OnDemandCache,
    in_flight: HashMap<DependencyKey, watch::Receiver<Outcome>>,
    /// Cached keys, oldest creation first.
    created: Vec<DependencyKey>,
    disposed: HashSet<DependencyKey>,
}

impl CoordinatorState {
    fn new() -> Self {
        Self {
            singletons: HashMap::new(),
            on_demand: OnDemandCache::new(),
            in_flight: HashMap::new(),
            created: Vec::new(),
            disposed: HashSet::new(),
        }
    }

    fn record_created(&mut self, key: &DependencyKey) {
        self.created.retain(|k| k != key);
        self.created.push(key.clone());
        self.disposed.remove(key);
    }

    fn forget(&mut self, key: &DependencyKey) {
        self.created.retain(|k| k != key);
        self.disposed.remove(key);
    }

    /// Forgets entries that left the on-demand cache and claims the
    /// disposal of those not disposed yet.
    fn release(&mut self, registry: &Registry, released: Released) -> Vec<PendingDisposal> {
        let mut pending = Vec::new();
        for (key, instance) in released {
            let already_disposed = self.disposed.contains(&key);
            self.forget(&key);
            if already_disposed {
                continue;
            }
            if let Some(hook) = registry.get(&key).and_then(|entry| entry.dispose.clone()) {
                pending.push((key, instance, hook));
            }
        }
        pending
    }

    fn cached(&self, key: &DependencyKey) -> Option<Instance> {
        self.singletons
            .get(key)
            .cloned()
            .or_else(|| self.on_demand.peek(key))
    }
}

/// Serves `resolve` for one container.
pub(crate) struct Coordinator {
    registry: Registry,
    parent: Option<Arc<Coordinator>>,
    state: Mutex<CoordinatorState>,
    handles: HandleCollection,
    metrics: ResolutionMetrics,
    shutdown: AtomicBool,
    safe_resolve_timeout: Duration,
}

impl Coordinator {
    pub fn new(
        registry: Registry,
        parent: Option<Arc<Coordinator>>,
        safe_resolve_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            parent,
            state: Mutex::new(CoordinatorState::new()),
            handles: HandleCollection::new(),
            metrics: ResolutionMetrics::default(),
            shutdown: AtomicBool::new(false),
            safe_resolve_timeout,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn parent(&self) -> Option<&Arc<Coordinator>> {
        self.parent.as_ref()
    }

    pub fn safe_resolve_timeout(&self) -> Duration {
        self.safe_resolve_timeout
    }

    #[inline]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    // ═══════════════════════════════════════════
    // Resolution
    // ═══════════════════════════════════════════

    /// Resolves `key` within the call chain `ctx`.
    ///
    /// Boxed because delegation to a parent recurses.
    pub fn resolve<'a>(
        self: &'a Arc<Self>,
        key: &'a DependencyKey,
        ctx: &'a ResolutionContext,
    ) -> ResolveFuture<'a> {
        Box::pin(async move {
            let started = Instant::now();
            let result = self.resolve_inner(key, ctx).await;
            self.metrics
                .record_resolution(started.elapsed(), result.is_err());
            result
        })
    }

    async fn resolve_inner(
        self: &Arc<Self>,
        key: &DependencyKey,
        ctx: &ResolutionContext,
    ) -> Result<Instance> {
        if self.is_shut_down() {
            return Err(TadbirError::ShutdownInProgress);
        }
        trace!(key = %key, depth = ctx.depth(), "Resolving");

        let Some(entry) = self.registry.get(key).cloned() else {
            return self.delegate(key, ctx).await;
        };

        let mut expired = Vec::new();
        let joined = {
            let mut state = self.state.lock();
            self.join(&mut state, entry, ctx, &mut expired)
        };
        dispose_all(expired).await;

        match joined? {
            Joined::Cached(instance) => Ok(instance),
            Joined::Waiting(rx) => await_production(key, rx).await,
        }
    }

    /// The locked part of resolve: cache hit, cycle check, then joining or
    /// starting a production.
    fn join(
        self: &Arc<Self>,
        state: &mut CoordinatorState,
        entry: Arc<RegistrationEntry>,
        ctx: &ResolutionContext,
        expired: &mut Vec<PendingDisposal>,
    ) -> Result<Joined> {
        let key = &entry.key;
        if let Some(instance) = self.lookup_cached(state, &entry, expired) {
            self.metrics.record_hit();
            trace!(key = %key, lifetime = %entry.lifetime, "Cache hit");
            return Ok(Joined::Cached(instance));
        }

        if ctx.contains(key) {
            let cycle = ctx.cycle_to(key);
            warn!(key = %key, path = %cycle, "Circular dependency at resolve time");
            return Err(TadbirError::CircularDependency(cycle));
        }

        self.metrics.record_miss();
        if let Some(rx) = state.in_flight.get(key).cloned() {
            trace!(key = %key, "Joining in-flight production");
            return Ok(Joined::Waiting(rx));
        }

        let (tx, rx) = watch::channel(None);
        state.in_flight.insert(key.clone(), rx.clone());
        let context = ctx.push(key.clone());
        self.spawn_production(entry, context, tx);
        Ok(Joined::Waiting(rx))
    }

    async fn delegate(self: &Arc<Self>, key: &DependencyKey, ctx: &ResolutionContext) -> Result<Instance> {
        let Some(parent) = &self.parent else {
            return Err(self.not_registered(key, ctx));
        };

        trace!(key = %key, "Delegating to parent container");
        match parent.resolve(key, ctx).await {
            Err(TadbirError::NotRegistered(mut missing)) if &missing.requested == key => {
                missing.suggestions = self.suggestions_for(key);
                Err(TadbirError::NotRegistered(missing))
            }
            other => other,
        }
    }

    fn lookup_cached(
        &self,
        state: &mut CoordinatorState,
        entry: &RegistrationEntry,
        expired: &mut Vec<PendingDisposal>,
    ) -> Option<Instance> {
        match entry.lifetime {
            Lifetime::EagerSingleton | Lifetime::LazySingleton => state.singletons.get(&entry.key).cloned(),
            Lifetime::OnDemand => {
                entry.cache_policy()?;
                match state.on_demand.get(&entry.key, Instant::now()) {
                    Lookup::Hit(instance) => Some(instance),
                    Lookup::Expired(instance) => {
                        let released = vec![(entry.key.clone(), instance)];
                        expired.extend(state.release(&self.registry, released));
                        None
                    }
                    Lookup::Miss => None,
                }
            }
            Lifetime::Weak => self.handles.get(&entry.key),
        }
    }

    fn spawn_production(
        self: &Arc<Self>,
        entry: Arc<RegistrationEntry>,
        context: ResolutionContext,
        tx: watch::Sender<Outcome>,
    ) {
        let guard = ProductionGuard {
            coordinator: Arc::clone(self),
            key: entry.key.clone(),
            tx: Some(tx),
        };
        let resolver = Resolver::new(Arc::clone(self), context);

        tokio::spawn(async move {
            debug!(key = %entry.key, lifetime = %entry.lifetime, "Producing instance");
            let produced = (entry.factory)(resolver)
                .await
                .map_err(|error| TadbirError::from_factory(&entry.key, error));

            if let Err(error) = &produced {
                warn!(key = %entry.key, error = %error, "Factory failed");
            }
            guard.complete(&entry, produced).await;
        });
    }

    /// Stores a finished production and clears its in-flight entry.
    ///
    /// Returns the disposals this caused: instances evicted to make room, or
    /// the instance itself when it would have been cached but the container
    /// has shut down meanwhile.
    fn finish(&self, entry: &RegistrationEntry, outcome: &Result<Instance>) -> Vec<PendingDisposal> {
        let mut state = self.state.lock();
        state.in_flight.remove(&entry.key);

        let Ok(instance) = outcome else {
            return Vec::new();
        };
        if self.is_shut_down() {
            debug!(key = %entry.key, "Discarding instance produced during shutdown");
            let cacheable = match entry.lifetime {
                Lifetime::EagerSingleton | Lifetime::LazySingleton => true,
                Lifetime::OnDemand => entry.cache_policy().is_some_and(|p| p.max_entries != Some(0)),
                Lifetime::Weak => false,
            };
            return match (&entry.dispose, cacheable) {
                (Some(hook), true) => vec![(entry.key.clone(), instance.clone(), hook.clone())],
                _ => Vec::new(),
            };
        }

        match entry.lifetime {
            Lifetime::EagerSingleton | Lifetime::LazySingleton => {
                state.singletons.insert(entry.key.clone(), instance.clone());
                state.record_created(&entry.key);
                Vec::new()
            }
            Lifetime::OnDemand => {
                let Some(policy) = entry.cache_policy() else {
                    return Vec::new();
                };
                let evicted = state
                    .on_demand
                    .insert(entry.key.clone(), instance.clone(), policy, Instant::now());
                for (victim, _) in &evicted {
                    debug!(key = %victim, by = %entry.key, "Evicted from on-demand cache");
                }
                let pending = state.release(&self.registry, evicted);
                if state.on_demand.contains(&entry.key) {
                    state.record_created(&entry.key);
                }
                pending
            }
            Lifetime::Weak => {
                self.handles
                    .insert(entry.key.clone(), WeakHandle::new(instance));
                Vec::new()
            }
        }
    }

    fn not_registered(&self, key: &DependencyKey, ctx: &ResolutionContext) -> TadbirError {
        TadbirError::NotRegistered(NotRegisteredError {
            requested: key.clone(),
            required_by: ctx.current().cloned(),
            suggestions: self.suggestions_for(key),
        })
    }

    /// Similar names across this container and its parents.
    fn suggestions_for(&self, key: &DependencyKey) -> Vec<String> {
        let mut names = Vec::new();
        let mut current = Some(self);
        while let Some(coordinator) = current {
            names.extend(coordinator.registry.display_names());
            current = coordinator.parent.as_deref();
        }
        names.sort();
        names.dedup();

        let candidates: Vec<&str> = names.iter().map(String::as_str).collect();
        suggest_similar(&key.display_name(), &candidates, MAX_SUGGESTIONS)
    }

    // ═══════════════════════════════════════════
    // Inspection and maintenance
    // ═══════════════════════════════════════════

    /// The live instance behind `key` without producing anything.
    ///
    /// Covers singletons, cached on-demand entries and live weak instances.
    pub fn cached_instance(&self, key: &DependencyKey) -> Option<Instance> {
        let cached = self.state.lock().cached(key);
        cached.or_else(|| self.handles.get(key))
    }

    /// The live weak instance for `key`, or `WeakObjectDeallocated`.
    pub fn existing_weak(&self, key: &DependencyKey) -> Result<Instance> {
        if !self.registry.contains(key) {
            return match &self.parent {
                Some(parent) => parent.existing_weak(key),
                None => Err(self.not_registered(key, &ResolutionContext::root())),
            };
        }
        self.handles
            .get(key)
            .ok_or_else(|| TadbirError::WeakObjectDeallocated(key.clone()))
    }

    /// Claims the disposal of `key`'s cached instance. Returns `None` when
    /// nothing is cached, there is no hook, or it was already disposed.
    pub fn take_disposal(&self, key: &DependencyKey) -> Option<(Instance, DisposeHook)> {
        let hook = self.registry.get(key)?.dispose.clone()?;
        let mut state = self.state.lock();
        if state.disposed.contains(key) {
            return None;
        }
        let instance = state.cached(key)?;
        state.disposed.insert(key.clone());
        Some((instance, hook))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.handles.counts())
    }

    pub fn cleanup_weak_handles(&self) -> usize {
        self.handles.cleanup()
    }

    /// Drops on-demand entries whose TTL has run out, disposing them.
    /// Returns how many entries were dropped.
    pub async fn purge_expired(&self) -> usize {
        let (purged, pending) = {
            let mut state = self.state.lock();
            let expired = state.on_demand.purge_expired(Instant::now());
            let purged = expired.len();
            (purged, state.release(&self.registry, expired))
        };
        if purged > 0 {
            debug!(purged, "Purged expired on-demand entries");
        }
        dispose_all(pending).await;
        purged
    }

    /// Sweeps dead weak handles and drops the whole on-demand cache,
    /// disposing the dropped entries.
    pub async fn handle_memory_pressure(&self) -> MemoryPressureReport {
        let released_handles = self.handles.cleanup();
        let (released_cache_entries, pending) = {
            let mut state = self.state.lock();
            let released = state.on_demand.clear();
            let count = released.len();
            (count, state.release(&self.registry, released))
        };

        MemoryPressureReport {
            released_handles,
            released_cache_entries,
            disposed: dispose_all(pending).await,
        }
    }

    /// Stops serving resolutions and disposes every cached instance that
    /// has not been disposed yet, newest first. Returns the number of
    /// disposal hooks run. Calling it twice is a no-op.
    pub async fn shutdown(&self) -> usize {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let pending: Vec<PendingDisposal> = {
            let mut state = self.state.lock();
            let order: Vec<DependencyKey> = state.created.iter().rev().cloned().collect();
            let mut pending = Vec::new();
            for key in order {
                if state.disposed.contains(&key) {
                    continue;
                }
                let Some(hook) = self.registry.get(&key).and_then(|e| e.dispose.clone()) else {
                    continue;
                };
                if let Some(instance) = state.cached(&key) {
                    state.disposed.insert(key.clone());
                    pending.push((key, instance, hook));
                }
            }

            state.singletons.clear();
            state.on_demand.clear();
            state.created.clear();
            pending
        };

        let disposed = dispose_all(pending).await;
        self.handles.clear();

        info!(disposed, "Container shut down");
        disposed
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("registered", &self.registry.len())
            .field("has_parent", &self.parent.is_some())
            .field("on_demand_cached", &self.state.lock().on_demand.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Runs claimed disposals in order and returns how many ran.
async fn dispose_all(pending: Vec<PendingDisposal>) -> usize {
    let count = pending.len();
    for (key, instance, hook) in pending {
        debug!(key = %key, "Disposing instance");
        hook(instance).await;
    }
    count
}

/// Waits for a production to publish its outcome.
async fn await_production(key: &DependencyKey, mut rx: watch::Receiver<Outcome>) -> Result<Instance> {
    loop {
        let current = Option::clone(&rx.borrow_and_update());
        if let Some(outcome) = current {
            return outcome;
        }
        if rx.changed().await.is_err() {
            let last = Option::clone(&rx.borrow());
            return last.unwrap_or_else(|| Err(aborted(key)));
        }
    }
}

fn aborted(key: &DependencyKey) -> TadbirError {
    TadbirError::FactoryFailed {
        key: key.clone(),
        source: Arc::new(ProductionAborted(key.clone())),
    }
}

/// Publishes a production outcome exactly once.
///
/// If the task dies before [`complete`](Self::complete) (panic, runtime
/// shutdown), dropping the guard clears the in-flight entry and releases the
/// waiters with an error.
struct ProductionGuard {
    coordinator: Arc<Coordinator>,
    key: DependencyKey,
    tx: Option<watch::Sender<Outcome>>,
}

impl ProductionGuard {
    /// Stores the outcome, runs the disposals storing it caused, then
    /// publishes it. Waiters therefore never see an evicted instance still
    /// undisposed.
    async fn complete(mut self, entry: &RegistrationEntry, outcome: Result<Instance>) {
        let pending = self.coordinator.finish(entry, &outcome);
        dispose_all(pending).await;
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(outcome));
        }
    }
}

impl Drop for ProductionGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            self.coordinator.state.lock().in_flight.remove(&self.key);
            warn!(key = %self.key, "Production aborted");
            tx.send_replace(Some(Err(aborted(&self.key))));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::error::BoxError;
    use crate::hooks::Dispose;
    use crate::key::Identifier;
    use crate::lifetime::CachePolicy;
    use crate::registry::Registration;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Service(u32);

    fn counting(
        calls: &Arc<AtomicU32>,
    ) -> impl Fn(Resolver) -> Pin<Box<dyn Future<Output = std::result::Result<Arc<Service>, BoxError>> + Send>>
    + Send
    + Sync
    + 'static {
        let calls = calls.clone();
        move |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(Arc::new(Service(n))) })
        }
    }

    #[tokio::test]
    async fn lazy_singleton_is_produced_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let service = Identifier::new("service", || Service(0));
        let container = Container::builder()
            .register(&service, Lifetime::LazySingleton, counting(&calls))
            .build();

        let a = container.resolve(&service).await.expect("first");
        let b = container.resolve(&service).await.expect("second");

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let metrics = container.metrics();
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.cache_misses, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resolves_share_one_production() {
        let calls = Arc::new(AtomicU32::new(0));
        let service = Identifier::new("service", || Service(0));
        let container = Container::builder()
            .register(&service, Lifetime::LazySingleton, {
                let calls = calls.clone();
                move |_| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(Arc::new(Service(7)))
                    }
                }
            })
            .build();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let container = container.clone();
                let service = service.clone();
                tokio::spawn(async move { container.resolve(&service).await })
            })
            .collect();

        let mut instances = Vec::new();
        for task in tasks {
            instances.push(task.await.expect("join").expect("resolve"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn weak_instance_is_recreated_after_release() {
        let calls = Arc::new(AtomicU32::new(0));
        let service = Identifier::new("session", || Service(0));
        let container = Container::builder()
            .register_weak(&service, counting(&calls))
            .build();

        let first = container.resolve(&service).await.expect("first");
        let again = container.resolve(&service).await.expect("while held");
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        drop(again);
        drop(first);
        assert!(matches!(
            container.existing_weak(&service),
            Err(TadbirError::WeakObjectDeallocated(_))
        ));

        let fresh = container.resolve(&service).await.expect("recreated");
        assert_eq!(fresh.0, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(container.existing_weak(&service).is_ok());
    }

    #[tokio::test]
    async fn cycle_fails_instead_of_hanging() {
        let a = Identifier::new("a", || Service(0));
        let b = Identifier::new("b", || Service(0));

        let container = Container::builder()
            .add(
                Registration::new(&a, Lifetime::LazySingleton, {
                    let b = b.clone();
                    move |r: Resolver| {
                        let b = b.clone();
                        async move {
                            r.resolve(&b).await?;
                            Ok(Arc::new(Service(1)))
                        }
                    }
                })
                .depends_on(&b),
            )
            .add(
                Registration::new(&b, Lifetime::LazySingleton, {
                    let a = a.clone();
                    move |r: Resolver| {
                        let a = a.clone();
                        async move {
                            r.resolve(&a).await?;
                            Ok(Arc::new(Service(2)))
                        }
                    }
                })
                .depends_on(&a),
            )
            .build();

        let result = tokio::time::timeout(Duration::from_secs(2), container.resolve(&a))
            .await
            .expect("cycle must not hang");

        match result {
            Err(TadbirError::CircularDependency(cycle)) => {
                let names: Vec<String> = cycle.path.iter().map(DependencyKey::display_name).collect();
                assert_eq!(names, vec!["a", "b", "a"]);
            }
            other => panic!("Expected CircularDependency, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cache_of_one_evicts_previous_entry() {
        let x_calls = Arc::new(AtomicU32::new(0));
        let y_calls = Arc::new(AtomicU32::new(0));
        let x = Identifier::new("x", || Service(0));
        let y = Identifier::new("y", || Service(0));

        let container = Container::builder()
            .add(Registration::new(&x, Lifetime::OnDemand, counting(&x_calls)).cached(CachePolicy::bounded(1)))
            .add(Registration::new(&y, Lifetime::OnDemand, counting(&y_calls)).cached(CachePolicy::bounded(1)))
            .build();

        let x1 = container.resolve(&x).await.expect("x");
        let x1_again = container.resolve(&x).await.expect("x cached");
        assert!(Arc::ptr_eq(&x1, &x1_again));

        container.resolve(&y).await.expect("y");
        let x2 = container.resolve(&x).await.expect("x recreated");

        assert!(!Arc::ptr_eq(&x1, &x2));
        assert_eq!(x_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn purge_drops_expired_entries() {
        let calls = Arc::new(AtomicU32::new(0));
        let quote = Identifier::new("quote", || Service(0));
        let container = Container::builder()
            .add(
                Registration::new(&quote, Lifetime::OnDemand, counting(&calls))
                    .cached(CachePolicy::unbounded().with_ttl(Duration::from_millis(10))),
            )
            .build();

        container.resolve(&quote).await.expect("quote");
        assert_eq!(container.coordinator().purge_expired().await, 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(container.coordinator().purge_expired().await, 1);

        container.resolve(&quote).await.expect("quote again");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn uncached_on_demand_is_fresh_each_time() {
        let calls = Arc::new(AtomicU32::new(0));
        let request = Identifier::new("request", || Service(0));
        let container = Container::builder()
            .register(&request, Lifetime::OnDemand, counting(&calls))
            .build();

        let a = container.resolve(&request).await.expect("a");
        let b = container.resolve(&request).await.expect("b");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn foreign_error_is_wrapped_at_its_origin_only() {
        let store = Identifier::new("store", || Service(0));
        let repository = Identifier::new("repository", || Service(0));

        let container = Container::builder()
            .register(&store, Lifetime::LazySingleton, |_| async {
                Err::<Arc<Service>, BoxError>("disk full".into())
            })
            .register(&repository, Lifetime::LazySingleton, {
                let store = store.clone();
                move |r: Resolver| {
                    let store = store.clone();
                    async move {
                        let inner = r.resolve(&store).await?;
                        Ok(Arc::new(Service(inner.0)))
                    }
                }
            })
            .build();

        match container.resolve(&repository).await {
            Err(TadbirError::FactoryFailed { key, source }) => {
                assert_eq!(&key, store.key());
                assert_eq!(source.to_string(), "disk full");
            }
            other => panic!("Expected FactoryFailed, got: {other:?}"),
        }
        assert_eq!(container.metrics().failures, 2);
    }

    #[tokio::test]
    async fn failed_production_is_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let flaky = Identifier::new("flaky", || Service(0));
        let container = Container::builder()
            .register(&flaky, Lifetime::LazySingleton, {
                let attempts = attempts.clone();
                move |_| {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt == 0 {
                            Err::<Arc<Service>, BoxError>("not yet".into())
                        } else {
                            Ok(Arc::new(Service(attempt)))
                        }
                    }
                }
            })
            .build();

        assert!(container.resolve(&flaky).await.is_err());
        let ok = container.resolve(&flaky).await.expect("second attempt");
        assert_eq!(ok.0, 1);
    }

    #[tokio::test]
    async fn child_delegates_and_shadows() {
        let config = Identifier::new("config", || Service(0));
        let logger = Identifier::new("logger", || Service(0));

        let parent = Container::builder()
            .register(&config, Lifetime::LazySingleton, |_| async { Ok(Arc::new(Service(1))) })
            .register(&logger, Lifetime::LazySingleton, |_| async { Ok(Arc::new(Service(1))) })
            .build();
        let child = Container::builder()
            .with_parent(&parent)
            .register(&logger, Lifetime::LazySingleton, |_| async { Ok(Arc::new(Service(2))) })
            .build();

        let from_parent = parent.resolve(&config).await.expect("parent config");
        let via_child = child.resolve(&config).await.expect("delegated config");
        assert!(Arc::ptr_eq(&from_parent, &via_child));

        assert_eq!(child.resolve(&logger).await.expect("shadowed").0, 2);
        assert_eq!(parent.resolve(&logger).await.expect("parent logger").0, 1);
    }

    #[tokio::test]
    async fn missing_dependency_suggests_similar_names() {
        let database = Identifier::new("database", || Service(0));
        let typo = Identifier::new("databse", || Service(0));
        let container = Container::builder()
            .register(&database, Lifetime::LazySingleton, |_| async { Ok(Arc::new(Service(0))) })
            .build();
        let child = Container::builder().with_parent(&container).build();

        match child.resolve(&typo).await {
            Err(TadbirError::NotRegistered(missing)) => {
                assert_eq!(&missing.requested, typo.key());
                assert_eq!(missing.required_by, None);
                assert_eq!(missing.suggestions, vec!["database".to_string()]);
            }
            other => panic!("Expected NotRegistered, got: {other:?}"),
        }
    }

    #[derive(Default)]
    struct Pool {
        disposed: AtomicU32,
    }

    #[async_trait]
    impl Dispose for Pool {
        async fn dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn shutdown_fails_fast_and_disposes_once() {
        let pool = Identifier::new("pool", Pool::default);
        let container = Container::builder()
            .add(
                Registration::new(&pool, Lifetime::LazySingleton, |_| async {
                    Ok(Arc::new(Pool::default()))
                })
                .with_dispose(),
            )
            .build();

        let instance = container.resolve(&pool).await.expect("pool");
        assert_eq!(container.shutdown().await, 1);
        assert_eq!(container.shutdown().await, 0);

        assert!(matches!(
            container.resolve(&pool).await,
            Err(TadbirError::ShutdownInProgress)
        ));
        assert_eq!(instance.disposed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn take_disposal_is_claimed_once() {
        let pool = Identifier::new("pool", Pool::default);
        let container = Container::builder()
            .add(
                Registration::new(&pool, Lifetime::LazySingleton, |_| async {
                    Ok(Arc::new(Pool::default()))
                })
                .with_dispose(),
            )
            .build();

        let coordinator = container.coordinator();
        assert!(coordinator.take_disposal(pool.key()).is_none());

        container.resolve(&pool).await.expect("pool");
        assert!(coordinator.take_disposal(pool.key()).is_some());
        assert!(coordinator.take_disposal(pool.key()).is_none());
        assert_eq!(container.shutdown().await, 0);
    }

    #[tokio::test]
    async fn memory_pressure_drops_on_demand_cache() {
        let calls = Arc::new(AtomicU32::new(0));
        let thumbnails = Identifier::new("thumbnails", || Service(0));
        let container = Container::builder()
            .add(
                Registration::new(&thumbnails, Lifetime::OnDemand, counting(&calls))
                    .cached(CachePolicy::unbounded()),
            )
            .build();

        container.resolve(&thumbnails).await.expect("cached");
        let report = container.handle_memory_pressure().await;
        assert_eq!(report.released_cache_entries, 1);
        assert_eq!(report.disposed, 0);

        container.resolve(&thumbnails).await.expect("recreated");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    fn disposable_pool(
        pools: &Arc<parking_lot::Mutex<Vec<Arc<Pool>>>>,
    ) -> impl Fn(Resolver) -> Pin<Box<dyn Future<Output = std::result::Result<Arc<Pool>, BoxError>> + Send>>
    + Send
    + Sync
    + 'static {
        let pools = pools.clone();
        move |_| {
            let pool = Arc::new(Pool::default());
            pools.lock().push(pool.clone());
            Box::pin(async move { Ok(pool) })
        }
    }

    fn dispose_counts(pools: &parking_lot::Mutex<Vec<Arc<Pool>>>) -> Vec<u32> {
        pools
            .lock()
            .iter()
            .map(|pool| pool.disposed.load(Ordering::SeqCst))
            .collect()
    }

    #[tokio::test]
    async fn evicted_instance_is_disposed_once() {
        let x_pools = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let y_pools = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let x = Identifier::new("x", Pool::default);
        let y = Identifier::new("y", Pool::default);
        let container = Container::builder()
            .add(
                Registration::new(&x, Lifetime::OnDemand, disposable_pool(&x_pools))
                    .cached(CachePolicy::bounded(1))
                    .with_dispose(),
            )
            .add(
                Registration::new(&y, Lifetime::OnDemand, disposable_pool(&y_pools))
                    .cached(CachePolicy::bounded(1))
                    .with_dispose(),
            )
            .build();

        container.resolve(&x).await.expect("x");
        container.resolve(&y).await.expect("y evicts x");
        assert_eq!(dispose_counts(&x_pools), vec![1]);
        assert_eq!(dispose_counts(&y_pools), vec![0]);

        assert_eq!(container.shutdown().await, 1);
        assert_eq!(dispose_counts(&x_pools), vec![1]);
        assert_eq!(dispose_counts(&y_pools), vec![1]);
    }

    #[tokio::test]
    async fn expired_instance_is_disposed_on_access_and_purge() {
        let pools = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let token = Identifier::new("token", Pool::default);
        let container = Container::builder()
            .add(
                Registration::new(&token, Lifetime::OnDemand, disposable_pool(&pools))
                    .cached(CachePolicy::unbounded().with_ttl(Duration::from_millis(10)))
                    .with_dispose(),
            )
            .build();

        container.resolve(&token).await.expect("first");
        tokio::time::sleep(Duration::from_millis(30)).await;
        container.resolve(&token).await.expect("expired, recreated");
        assert_eq!(dispose_counts(&pools), vec![1, 0]);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(container.coordinator().purge_expired().await, 1);
        assert_eq!(dispose_counts(&pools), vec![1, 1]);

        assert_eq!(container.shutdown().await, 0);
        assert_eq!(dispose_counts(&pools), vec![1, 1]);
    }

    #[tokio::test]
    async fn memory_pressure_disposes_dropped_entries() {
        let pools = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let pool = Identifier::new("pool", Pool::default);
        let container = Container::builder()
            .add(
                Registration::new(&pool, Lifetime::OnDemand, disposable_pool(&pools))
                    .cached(CachePolicy::unbounded())
                    .with_dispose(),
            )
            .build();

        container.resolve(&pool).await.expect("pool");
        let report = container.handle_memory_pressure().await;
        assert_eq!(report.released_cache_entries, 1);
        assert_eq!(report.disposed, 1);
        assert_eq!(dispose_counts(&pools), vec![1]);

        assert_eq!(container.shutdown().await, 0);
        assert_eq!(dispose_counts(&pools), vec![1]);
    }

    #[tokio::test]
    async fn instance_finished_after_shutdown_is_disposed() {
        let pools = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let release = Arc::new(tokio::sync::Notify::new());
        let pool = Identifier::new("pool", Pool::default);
        let container = Container::builder()
            .add(
                Registration::new(&pool, Lifetime::LazySingleton, {
                    let pools = pools.clone();
                    let release = release.clone();
                    move |_| {
                        let pools = pools.clone();
                        let release = release.clone();
                        async move {
                            release.notified().await;
                            let pool = Arc::new(Pool::default());
                            pools.lock().push(pool.clone());
                            Ok(pool)
                        }
                    }
                })
                .with_dispose(),
            )
            .build();

        let pending = tokio::spawn({
            let container = container.clone();
            let pool = pool.clone();
            async move { container.resolve(&pool).await }
        });
        tokio::task::yield_now().await;

        assert_eq!(container.shutdown().await, 0);
        release.notify_one();
        pending.await.expect("join").expect("produced before shutdown was seen");

        assert_eq!(dispose_counts(&pools), vec![1]);
    }
}
