//! # The Container
//!
//! Registrations go into a [`ContainerBuilder`]; [`build()`](ContainerBuilder::build)
//! turns them into an immutable, thread-safe [`Container`] that resolves and
//! caches instances.
//!
//! # Architecture
//! ```text
//! ContainerBuilder ──build()──> Container ──resolver()──> Resolver
//!        │                          │
//!   with_parent(&Container)    Coordinator (caches, in-flight, disposal)
//! ```
//!
//! # Examples
//! ```
//! use std::sync::Arc;
//! use tadbir_container::prelude::*;
//!
//! struct Config {
//!     url: String,
//! }
//!
//! struct Database {
//!     url: String,
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<()> {
//! let config = Identifier::new("config", || Config { url: String::new() });
//! let database = Identifier::new("database", || Database { url: String::new() });
//!
//! let container = Container::builder()
//!     .register(&config, Lifetime::EagerSingleton, |_| async {
//!         Ok(Arc::new(Config { url: "postgres://localhost".into() }))
//!     })
//!     .register_with_dependencies(
//!         &database,
//!         Lifetime::LazySingleton,
//!         {
//!             let config = config.clone();
//!             move |resolver: Resolver| {
//!                 let config = config.clone();
//!                 async move {
//!                     let config = resolver.resolve(&config).await?;
//!                     Ok(Arc::new(Database { url: config.url.clone() }))
//!                 }
//!             }
//!         },
//!         [config.key().clone()],
//!     )
//!     .build();
//!
//! let db = container.resolve(&database).await?;
//! assert_eq!(db.url, "postgres://localhost");
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::context::ResolutionContext;
use crate::coordinator::{Coordinator, MemoryPressureReport};
use crate::error::{BoxError, Result};
use crate::graph::DependencyGraph;
use crate::key::{DependencyKey, Identifier};
use crate::lifetime::Lifetime;
use crate::metrics::MetricsSnapshot;
use crate::provider::{Provider, ProviderRegistry};
use crate::registry::{Instance, Registration, RegistrationEntry, Registry};
use crate::resolver::{Resolver, downcast};

/// Default bound for [`Resolver::safe_resolve`].
pub const DEFAULT_SAFE_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

// ═══════════════════════════════════════════
// ContainerBuilder
// ═══════════════════════════════════════════

/// Collects registrations for a [`Container`].
///
/// Registering a key twice keeps the last registration. Nothing is
/// validated at build time; use [`Container::dependency_graph`] or the
/// kernel's validation for that.
pub struct ContainerBuilder {
    registry: Registry,
    parent: Option<Arc<Coordinator>>,
    safe_resolve_timeout: Duration,
}

impl ContainerBuilder {
    fn new() -> Self {
        Self {
            registry: Registry::new(),
            parent: None,
            safe_resolve_timeout: DEFAULT_SAFE_RESOLVE_TIMEOUT,
        }
    }

    /// Registers a factory for `id`.
    pub fn register<T, F, Fut>(self, id: &Identifier<T>, lifetime: Lifetime, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Arc<T>, BoxError>> + Send + 'static,
    {
        self.add(Registration::new(id, lifetime, factory))
    }

    /// Registers a factory together with its declared dependencies.
    pub fn register_with_dependencies<T, F, Fut>(
        self,
        id: &Identifier<T>,
        lifetime: Lifetime,
        factory: F,
        dependencies: impl IntoIterator<Item = DependencyKey>,
    ) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Arc<T>, BoxError>> + Send + 'static,
    {
        self.add(Registration::new(id, lifetime, factory).depends_on_all(dependencies))
    }

    /// Registers a weak dependency: the container only observes the
    /// instance and recreates it once every external owner dropped it.
    pub fn register_weak<T, F, Fut>(self, id: &Identifier<T>, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Arc<T>, BoxError>> + Send + 'static,
    {
        self.add(Registration::new(id, Lifetime::Weak, factory))
    }

    /// Adds a fully configured [`Registration`].
    pub fn add<T: Send + Sync + 'static>(mut self, registration: Registration<T>) -> Self {
        self.registry.register(registration.into_entry());
        self
    }

    /// Replaces an existing registration for `id`.
    ///
    /// Same effect as [`register`](Self::register), but states the intent
    /// and is logged at info level.
    pub fn override_<T, F, Fut>(self, id: &Identifier<T>, lifetime: Lifetime, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Arc<T>, BoxError>> + Send + 'static,
    {
        info!(
            key = %id.key(),
            lifetime = %lifetime,
            existed = self.registry.contains(id.key()),
            "Overriding registration"
        );
        self.register(id, lifetime, factory)
    }

    /// Delegates keys this container does not register to `parent`.
    ///
    /// The parent is never mutated by the child.
    pub fn with_parent(mut self, parent: &Container) -> Self {
        self.parent = Some(Arc::clone(&parent.coordinator));
        self
    }

    /// Lets a [`Provider`] module add its registrations.
    pub fn add_provider(mut self, provider: &dyn Provider) -> Self {
        let before = self.registry.len();
        provider.register(&mut self);
        debug!(
            provider = provider.name(),
            added = self.registry.len().saturating_sub(before),
            "Applied provider"
        );
        self
    }

    /// Upper bound for every `safe_resolve` issued through the container.
    pub fn safe_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.safe_resolve_timeout = timeout;
        self
    }

    /// Number of keys registered so far.
    pub fn registration_count(&self) -> usize {
        self.registry.len()
    }

    pub fn contains(&self, key: &DependencyKey) -> bool {
        self.registry.contains(key)
    }

    /// Builds an immutable snapshot of the current registrations.
    ///
    /// Each call yields an independent container with its own caches.
    #[instrument(skip(self), name = "container_build")]
    pub fn build(&self) -> Container {
        info!(
            registered = self.registry.len(),
            has_parent = self.parent.is_some(),
            "Building container"
        );

        Container {
            coordinator: Arc::new(Coordinator::new(
                self.registry.clone(),
                self.parent.clone(),
                self.safe_resolve_timeout,
            )),
        }
    }
}

impl ProviderRegistry for ContainerBuilder {
    fn add_entry(&mut self, entry: RegistrationEntry) {
        self.registry.register(entry);
    }
}

impl fmt::Debug for ContainerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerBuilder")
            .field("registered", &self.registry.len())
            .field("has_parent", &self.parent.is_some())
            .field("safe_resolve_timeout", &self.safe_resolve_timeout)
            .finish()
    }
}

// ═══════════════════════════════════════════
// Container
// ═══════════════════════════════════════════

/// Immutable, thread-safe dependency container.
///
/// Cloning is cheap and every clone shares the same caches.
#[derive(Clone)]
pub struct Container {
    coordinator: Arc<Coordinator>,
}

impl Container {
    /// Creates a new builder.
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    /// A top-level resolver for this container.
    pub fn resolver(&self) -> Resolver {
        Resolver::new(Arc::clone(&self.coordinator), ResolutionContext::root())
    }

    /// Resolves `id`.
    ///
    /// ```rust,ignore
    /// let db = container.resolve(&DATABASE).await?;
    /// ```
    pub async fn resolve<T: Send + Sync + 'static>(&self, id: &Identifier<T>) -> Result<Arc<T>> {
        self.resolver().resolve(id).await
    }

    /// Resolves `id`, returning its default on any failure.
    pub async fn safe_resolve<T: Send + Sync + 'static>(&self, id: &Identifier<T>) -> Arc<T> {
        self.resolver().safe_resolve(id).await
    }

    /// Type-erased resolution.
    pub async fn resolve_key(&self, key: &DependencyKey) -> Result<Instance> {
        self.coordinator.resolve(key, &ResolutionContext::root()).await
    }

    /// The live instance of a weak registration, without recreating it.
    ///
    /// # Errors
    /// [`TadbirError::WeakObjectDeallocated`](crate::error::TadbirError::WeakObjectDeallocated)
    /// when no owner keeps the instance alive.
    pub fn existing_weak<T: Send + Sync + 'static>(&self, id: &Identifier<T>) -> Result<Arc<T>> {
        let instance = self.coordinator.existing_weak(id.key())?;
        downcast::<T>(instance, id.key())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.coordinator.metrics()
    }

    /// Declared dependency graph of this container.
    pub fn dependency_graph(&self) -> DependencyGraph {
        DependencyGraph::from_coordinator(&self.coordinator)
    }

    /// Stops serving resolutions and disposes cached instances.
    ///
    /// Returns how many disposal hooks ran. A second call does nothing.
    #[instrument(skip(self), name = "container_shutdown")]
    pub async fn shutdown(&self) -> usize {
        self.coordinator.shutdown().await
    }

    pub fn is_shut_down(&self) -> bool {
        self.coordinator.is_shut_down()
    }

    /// Sweeps dead weak handles and returns how many were removed.
    pub fn cleanup_weak_handles(&self) -> usize {
        self.coordinator.cleanup_weak_handles()
    }

    /// Releases everything that can be recreated on demand, disposing
    /// dropped cache entries.
    pub async fn handle_memory_pressure(&self) -> MemoryPressureReport {
        let report = self.coordinator.handle_memory_pressure().await;
        debug!(
            released_handles = report.released_handles,
            released_cache_entries = report.released_cache_entries,
            disposed = report.disposed,
            "Released memory"
        );
        report
    }

    /// Number of local registrations (the parent's are not counted).
    pub fn registration_count(&self) -> usize {
        self.coordinator.registry().len()
    }

    /// Returns `true` if `key` is registered here or in a parent.
    pub fn contains(&self, key: &DependencyKey) -> bool {
        let mut current = Some(&self.coordinator);
        while let Some(coordinator) = current {
            if coordinator.registry().contains(key) {
                return true;
            }
            current = coordinator.parent();
        }
        false
    }

    pub(crate) fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("registered", &self.coordinator.registry().len())
            .field("has_parent", &self.coordinator.parent().is_some())
            .field("shut_down", &self.coordinator.is_shut_down())
            .finish()
    }
}

// ═══════════════════════════════════════════
// Prelude
// ═══════════════════════════════════════════

pub mod prelude {
    pub use super::{Container, ContainerBuilder};
    pub use crate::config::{KernelConfig, StartupOrdering};
    pub use crate::error::{BoxError, Result, TadbirError};
    pub use crate::hooks::{Dispose, LifecycleEvent, LifecycleHooks};
    pub use crate::key::{DependencyKey, Identifier};
    pub use crate::kernel::{Kernel, LifecycleState};
    pub use crate::lifetime::{CachePolicy, EvictionPolicy, Lifetime};
    pub use crate::provider::{Provider, ProviderRegistry};
    pub use crate::registry::Registration;
    pub use crate::resolver::{Inject, Resolver};
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TadbirError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    struct Config {
        url: String,
    }

    struct Database {
        url: String,
    }

    fn config_id() -> Identifier<Config> {
        Identifier::new("config", || Config { url: String::new() })
    }

    fn database_id() -> Identifier<Database> {
        Identifier::new("database", || Database { url: String::new() })
    }

    #[tokio::test]
    async fn resolve_with_dependency() {
        let config = config_id();
        let database = database_id();

        let container = Container::builder()
            .register(&config, Lifetime::LazySingleton, |_| async {
                Ok(Arc::new(Config {
                    url: "postgres://localhost".into(),
                }))
            })
            .register_with_dependencies(
                &database,
                Lifetime::LazySingleton,
                {
                    let config = config.clone();
                    move |r: Resolver| {
                        let config = config.clone();
                        async move {
                            let config = r.resolve(&config).await?;
                            Ok(Arc::new(Database {
                                url: config.url.clone(),
                            }))
                        }
                    }
                },
                [config.key().clone()],
            )
            .build();

        let db = container.resolve(&database).await.expect("database");
        assert_eq!(db.url, "postgres://localhost");
        assert!(container.dependency_graph().validate().is_ok());
    }

    #[tokio::test]
    async fn resolve_not_registered() {
        let container = Container::builder().build();

        match container.resolve(&config_id()).await {
            Err(TadbirError::NotRegistered(e)) => {
                assert_eq!(e.requested.name(), Some("config"));
                assert!(e.suggestions.is_empty());
            }
            other => panic!("Expected NotRegistered, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn override_keeps_last_registration() {
        let config = config_id();
        let container = Container::builder()
            .register(&config, Lifetime::LazySingleton, |_| async {
                Ok(Arc::new(Config { url: "first".into() }))
            })
            .override_(&config, Lifetime::LazySingleton, |_| async {
                Ok(Arc::new(Config { url: "second".into() }))
            })
            .build();

        assert_eq!(container.registration_count(), 1);
        assert_eq!(container.resolve(&config).await.expect("config").url, "second");
    }

    #[tokio::test]
    async fn building_twice_yields_independent_caches() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = config_id();
        let builder = Container::builder().register(&config, Lifetime::LazySingleton, {
            let calls = calls.clone();
            move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(Arc::new(Config { url: "x".into() })) }
            }
        });

        let first = builder.build();
        let second = builder.build();

        let a = first.resolve(&config).await.expect("first");
        let b = second.resolve(&config).await.expect("second");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn clones_share_caches() {
        let config = config_id();
        let container = Container::builder()
            .register(&config, Lifetime::LazySingleton, |_| async {
                Ok(Arc::new(Config { url: "x".into() }))
            })
            .build();
        let clone = container.clone();

        let a = container.resolve(&config).await.expect("a");
        let b = clone.resolve(&config).await.expect("b");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn resolve_key_is_type_erased() {
        let config = config_id();
        let container = Container::builder()
            .register(&config, Lifetime::OnDemand, |_| async {
                Ok(Arc::new(Config { url: "erased".into() }))
            })
            .build();

        let instance = container.resolve_key(config.key()).await.expect("instance");
        let typed = instance.downcast::<Config>().expect("config type");
        assert_eq!(typed.url, "erased");
    }

    #[test]
    fn contains_walks_the_parent_chain() {
        let config = config_id();
        let parent = Container::builder()
            .register(&config, Lifetime::LazySingleton, |_| async {
                Ok(Arc::new(Config { url: "x".into() }))
            })
            .build();
        let child = Container::builder().with_parent(&parent).build();

        assert!(child.contains(config.key()));
        assert_eq!(child.registration_count(), 0);
        assert!(child.dependency_graph().contains(config.key()));
    }

    #[test]
    fn debug_display() {
        let container = Container::builder()
            .register(&config_id(), Lifetime::LazySingleton, |_| async {
                Ok(Arc::new(Config { url: "x".into() }))
            })
            .register(&database_id(), Lifetime::LazySingleton, |_| async {
                Ok(Arc::new(Database { url: "x".into() }))
            })
            .build();

        let debug = format!("{container:?}");
        assert!(debug.contains("Container"));
        assert!(debug.contains("registered: 2"));
    }
}
