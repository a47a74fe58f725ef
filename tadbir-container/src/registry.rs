//! Registration store.
//!
//! The registry maps a [`DependencyKey`] to everything needed to produce it:
//! lifetime, async factory, declared dependencies, optional cache policy and
//! optional hooks. Once a container is built its registry is never mutated.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::BoxError;
use crate::hooks::{BoxFuture, Dispose, DisposeHook, EventHook, LifecycleHooks, dispose_hook, event_hook};
use crate::key::{DependencyKey, Identifier};
use crate::lifetime::{CachePolicy, Lifetime};
use crate::resolver::Resolver;

/// A produced, type-erased instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Type-erased async factory.
///
/// A factory receives a [`Resolver`] bound to the container (so it can
/// resolve its own dependencies) and eventually yields an instance.
///
/// # Why `Arc` and not `Box`?
/// Factories are shared with spawned production tasks. `Arc` allows cloning
/// without copying the closure.
pub type FactoryFn = Arc<dyn Fn(Resolver) -> BoxFuture<Result<Instance, BoxError>> + Send + Sync>;

/// Typed registration builder.
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use tadbir_container::prelude::*;
///
/// struct Config;
/// struct Database;
///
/// let config = Identifier::new("config", || Config);
/// let database = Identifier::new("database", || Database);
///
/// let registration = Registration::new(&database, Lifetime::LazySingleton, |_| async {
///     Ok(Arc::new(Database))
/// })
/// .depends_on(&config);
///
/// let container = Container::builder().add(registration).build();
/// assert_eq!(container.registration_count(), 1);
/// ```
pub struct Registration<T> {
    entry: RegistrationEntry,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Registration<T> {
    /// Starts a registration for `id` with the given lifetime and factory.
    pub fn new<F, Fut>(id: &Identifier<T>, lifetime: Lifetime, factory: F) -> Self
    where
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<T>, BoxError>> + Send + 'static,
    {
        let factory: FactoryFn = Arc::new(move |resolver: Resolver| -> BoxFuture<Result<Instance, BoxError>> {
            let produce = factory(resolver);
            Box::pin(async move { produce.await.map(|value| value as Instance) })
        });

        Self {
            entry: RegistrationEntry {
                key: id.key().clone(),
                lifetime,
                factory,
                dependencies: Vec::new(),
                cache: None,
                on_event: None,
                dispose: None,
            },
            _marker: PhantomData,
        }
    }

    /// Declares a dependency, used for graph validation and startup priority.
    ///
    /// Declarations are not enforced when the factory runs.
    pub fn depends_on(mut self, dependency: impl Into<DependencyKey>) -> Self {
        self.entry.dependencies.push(dependency.into());
        self
    }

    /// Declares several dependencies at once.
    pub fn depends_on_all(mut self, dependencies: impl IntoIterator<Item = DependencyKey>) -> Self {
        self.entry.dependencies.extend(dependencies);
        self
    }

    /// Attaches a cache policy. Only [`Lifetime::OnDemand`] honours it.
    pub fn cached(mut self, policy: CachePolicy) -> Self {
        self.entry.cache = Some(policy);
        self
    }

    /// Routes suspend/resume/terminate events to `T`'s [`LifecycleHooks`].
    pub fn with_lifecycle(mut self) -> Self
    where
        T: LifecycleHooks,
    {
        self.entry.on_event = Some(event_hook::<T>());
        self
    }

    /// Calls `T`'s [`Dispose`] hook when the container shuts down.
    pub fn with_dispose(mut self) -> Self
    where
        T: Dispose,
    {
        self.entry.dispose = Some(dispose_hook::<T>());
        self
    }

    /// Erases the value type.
    pub fn into_entry(self) -> RegistrationEntry {
        self.entry
    }
}

/// Type-erased registration as stored in the registry.
#[derive(Clone)]
pub struct RegistrationEntry {
    pub(crate) key: DependencyKey,
    pub(crate) lifetime: Lifetime,
    pub(crate) factory: FactoryFn,
    pub(crate) dependencies: Vec<DependencyKey>,
    pub(crate) cache: Option<CachePolicy>,
    pub(crate) on_event: Option<EventHook>,
    pub(crate) dispose: Option<DisposeHook>,
}

impl RegistrationEntry {
    pub fn key(&self) -> &DependencyKey {
        &self.key
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    pub fn dependencies(&self) -> &[DependencyKey] {
        &self.dependencies
    }

    /// The cache policy in effect, `None` unless the lifetime is on-demand.
    pub fn cache_policy(&self) -> Option<CachePolicy> {
        match self.lifetime {
            Lifetime::OnDemand => self.cache,
            _ => None,
        }
    }

    pub fn has_lifecycle_hooks(&self) -> bool {
        self.on_event.is_some()
    }

    pub fn has_dispose_hook(&self) -> bool {
        self.dispose.is_some()
    }
}

impl fmt::Debug for RegistrationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationEntry")
            .field("key", &self.key)
            .field("lifetime", &self.lifetime)
            .field("dependencies", &self.dependencies)
            .field("cache", &self.cache)
            .field("lifecycle_hooks", &self.on_event.is_some())
            .field("dispose_hook", &self.dispose.is_some())
            .finish()
    }
}

/// Stores all registrations of one container.
///
/// Populated by the builder; each built container gets its own snapshot.
#[derive(Debug, Clone, Default)]
pub(crate) struct Registry {
    registrations: HashMap<DependencyKey, Arc<RegistrationEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a registration. The last registration for a key wins.
    pub fn register(&mut self, entry: RegistrationEntry) {
        if entry.cache.is_some() && entry.lifetime != Lifetime::OnDemand {
            warn!(
                key = %entry.key,
                lifetime = %entry.lifetime,
                "Cache policy ignored: only on-demand registrations are cached by policy"
            );
        }

        let key = entry.key.clone();
        let lifetime = entry.lifetime;
        match self.registrations.insert(key.clone(), Arc::new(entry)) {
            Some(previous) => debug!(
                key = %key,
                lifetime = %lifetime,
                previous = %previous.lifetime,
                "Overrode registration"
            ),
            None => debug!(key = %key, lifetime = %lifetime, "Registered dependency"),
        }
    }

    pub fn get(&self, key: &DependencyKey) -> Option<&Arc<RegistrationEntry>> {
        self.registrations.get(key)
    }

    pub fn contains(&self, key: &DependencyKey) -> bool {
        self.registrations.contains_key(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = &Arc<RegistrationEntry>> {
        self.registrations.values()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Display names of every registered key, for suggestions.
    pub fn display_names(&self) -> Vec<String> {
        self.registrations.keys().map(DependencyKey::display_name).collect()
    }
}
