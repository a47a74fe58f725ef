//! Lifecycle and disposal hooks.
//!
//! Services opt in by implementing [`LifecycleHooks`] and/or [`Dispose`] and
//! marking their registration with
//! [`Registration::with_lifecycle`](crate::registry::Registration::with_lifecycle) /
//! [`Registration::with_dispose`](crate::registry::Registration::with_dispose).

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

/// Future type used for type-erased async callbacks.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Cross-cutting events propagated by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Suspend,
    Resume,
    Terminate,
}

impl LifecycleEvent {
    /// Suspend and terminate visit services from the most dependent one
    /// down to the most fundamental one.
    #[inline]
    pub fn runs_in_reverse(&self) -> bool {
        matches!(self, LifecycleEvent::Suspend | LifecycleEvent::Terminate)
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::Suspend => write!(f, "suspend"),
            LifecycleEvent::Resume => write!(f, "resume"),
            LifecycleEvent::Terminate => write!(f, "terminate"),
        }
    }
}

/// Reactions to application lifecycle events.
///
/// All methods default to no-ops.
///
/// # Examples
/// ```
/// use async_trait::async_trait;
/// use tadbir_container::hooks::LifecycleHooks;
///
/// struct Uploader;
///
/// #[async_trait]
/// impl LifecycleHooks for Uploader {
///     async fn on_suspend(&self) {
///         // pause background uploads
///     }
/// }
/// ```
#[async_trait]
pub trait LifecycleHooks: Send + Sync + 'static {
    async fn on_suspend(&self) {}

    async fn on_resume(&self) {}

    async fn on_terminate(&self) {}
}

/// Release of resources when the container shuts down.
///
/// Called at most once per cached instance.
#[async_trait]
pub trait Dispose: Send + Sync + 'static {
    async fn dispose(&self);
}

/// Type-erased [`LifecycleHooks`] adapter stored on a registration.
pub(crate) type EventHook =
    Arc<dyn Fn(Arc<dyn Any + Send + Sync>, LifecycleEvent) -> BoxFuture<()> + Send + Sync>;

/// Type-erased [`Dispose`] adapter stored on a registration.
pub(crate) type DisposeHook = Arc<dyn Fn(Arc<dyn Any + Send + Sync>) -> BoxFuture<()> + Send + Sync>;

pub(crate) fn event_hook<T: LifecycleHooks>() -> EventHook {
    Arc::new(|instance: Arc<dyn Any + Send + Sync>, event: LifecycleEvent| -> BoxFuture<()> {
        Box::pin(async move {
            let Ok(service) = instance.downcast::<T>() else {
                return;
            };
            match event {
                LifecycleEvent::Suspend => service.on_suspend().await,
                LifecycleEvent::Resume => service.on_resume().await,
                LifecycleEvent::Terminate => service.on_terminate().await,
            }
        })
    })
}

pub(crate) fn dispose_hook<T: Dispose>() -> DisposeHook {
    Arc::new(|instance: Arc<dyn Any + Send + Sync>| -> BoxFuture<()> {
        Box::pin(async move {
            if let Ok(service) = instance.downcast::<T>() {
                service.dispose().await;
            }
        })
    })
}
