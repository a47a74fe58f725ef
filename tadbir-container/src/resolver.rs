//! Resolution handles passed to consumers and factories.

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::warn;

use crate::context::ResolutionContext;
use crate::coordinator::Coordinator;
use crate::error::{Result, TadbirError};
use crate::key::{DependencyKey, Identifier};
use crate::registry::Instance;

/// Resolves dependencies from one container.
///
/// A resolver is cheap to clone. The one handed to a factory carries the
/// current call chain, so re-entering a key that is still being produced
/// fails with [`TadbirError::CircularDependency`] instead of waiting forever.
#[derive(Clone)]
pub struct Resolver {
    coordinator: Arc<Coordinator>,
    context: ResolutionContext,
}

impl Resolver {
    pub(crate) fn new(coordinator: Arc<Coordinator>, context: ResolutionContext) -> Self {
        Self {
            coordinator,
            context,
        }
    }

    /// Resolves `id` to a shared instance.
    pub async fn resolve<T: Send + Sync + 'static>(&self, id: &Identifier<T>) -> Result<Arc<T>> {
        let instance = self.resolve_key(id.key()).await?;
        downcast::<T>(instance, id.key())
    }

    /// Type-erased resolution.
    pub async fn resolve_key(&self, key: &DependencyKey) -> Result<Instance> {
        self.coordinator.resolve(key, &self.context).await
    }

    /// Resolves `id`, falling back to its default on any error or when the
    /// container's safe-resolve timeout expires. Never fails.
    pub async fn safe_resolve<T: Send + Sync + 'static>(&self, id: &Identifier<T>) -> Arc<T> {
        let timeout = self.coordinator.safe_resolve_timeout();
        let outcome = match tokio::time::timeout(timeout, self.resolve(id)).await {
            Ok(result) => result,
            Err(_) => Err(TadbirError::InitializationTimeout(timeout)),
        };

        match outcome {
            Ok(instance) => instance,
            Err(error) => {
                warn!(key = %id.key(), error = %error, "Falling back to default value");
                id.default_value()
            }
        }
    }

    /// Lazy accessor for `id`, resolved on first use.
    pub fn inject<T: Send + Sync + 'static>(&self, id: &Identifier<T>) -> Inject<T> {
        Inject {
            resolver: self.clone(),
            id: id.clone(),
            cell: OnceCell::new(),
        }
    }

    /// Keys currently being produced above this resolver.
    pub fn context(&self) -> &ResolutionContext {
        &self.context
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("depth", &self.context.depth())
            .field("current", &self.context.current())
            .finish()
    }
}

/// Downcasts an erased instance to the requested type.
pub(crate) fn downcast<T: Send + Sync + 'static>(
    instance: Instance,
    key: &DependencyKey,
) -> Result<Arc<T>> {
    instance
        .downcast::<T>()
        .map_err(|_| TadbirError::TypeMismatch {
            expected: type_name::<T>(),
            actual: key.type_name(),
            key: key.clone(),
        })
}

// ═══════════════════════════════════════════
// Inject
// ═══════════════════════════════════════════

/// Field-style accessor: resolves once, then returns the memoized instance.
///
/// ```rust,ignore
/// struct Checkout {
///     payments: Inject<PaymentClient>,
/// }
///
/// let client = checkout.payments.get().await;
/// ```
pub struct Inject<T> {
    resolver: Resolver,
    id: Identifier<T>,
    cell: OnceCell<Arc<T>>,
}

impl<T: Send + Sync + 'static> Inject<T> {
    /// Returns the instance, or the identifier default when resolution
    /// fails. A fallback is not memoized, so a later call retries.
    pub async fn get(&self) -> Arc<T> {
        match self.try_get().await {
            Ok(instance) => instance,
            Err(error) => {
                warn!(key = %self.id.key(), error = %error, "Injected dependency unavailable");
                self.id.default_value()
            }
        }
    }

    /// Returns the instance, resolving it on the first call.
    pub async fn try_get(&self) -> Result<Arc<T>> {
        self.cell
            .get_or_try_init(|| self.resolver.resolve(&self.id))
            .await
            .cloned()
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.initialized()
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for Inject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inject")
            .field("key", self.id.key())
            .field("resolved", &self.cell.initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::lifetime::Lifetime;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    struct Endpoint(&'static str);

    #[test]
    fn downcast_mismatch_reports_both_types() {
        let key = DependencyKey::named::<u32>("port");
        let instance: Instance = Arc::new(8080u32);

        match downcast::<String>(instance, &key) {
            Err(TadbirError::TypeMismatch {
                expected, actual, ..
            }) => {
                assert!(expected.contains("String"));
                assert!(actual.contains("u32"));
            }
            other => panic!("Expected TypeMismatch, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn safe_resolve_returns_default_when_missing() {
        let endpoint = Identifier::new("endpoint", || Endpoint("fallback"));
        let container = Container::builder().build();

        let value = container.resolver().safe_resolve(&endpoint).await;
        assert_eq!(*value, Endpoint("fallback"));
    }

    #[tokio::test]
    async fn safe_resolve_times_out_to_default() {
        let endpoint = Identifier::new("endpoint", || Endpoint("fallback"));
        let container = Container::builder()
            .register(&endpoint, Lifetime::LazySingleton, |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Arc::new(Endpoint("slow")))
            })
            .safe_resolve_timeout(Duration::from_millis(20))
            .build();

        let value = container.resolver().safe_resolve(&endpoint).await;
        assert_eq!(*value, Endpoint("fallback"));
    }

    #[tokio::test]
    async fn inject_resolves_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let endpoint = Identifier::new("endpoint", || Endpoint("fallback"));
        let container = Container::builder()
            .register(&endpoint, Lifetime::OnDemand, {
                let calls = calls.clone();
                move |_| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(Arc::new(Endpoint("live")))
                    }
                }
            })
            .build();

        let injected = container.resolver().inject(&endpoint);
        assert!(!injected.is_resolved());

        let first = injected.get().await;
        let second = injected.try_get().await.expect("memoized");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*first, Endpoint("live"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn inject_get_falls_back_without_memoizing() {
        let endpoint = Identifier::new("endpoint", || Endpoint("fallback"));
        let container = Container::builder().build();

        let injected = container.resolver().inject(&endpoint);
        assert_eq!(*injected.get().await, Endpoint("fallback"));
        assert!(!injected.is_resolved());
        assert!(injected.try_get().await.is_err());
    }
}
