//! Lifecycle kernel.
//!
//! Drives one container from configuration to shutdown:
//!
//! ```text
//! Idle ─build()─> Configuring ─> WarmingUp(0.0 … 1.0) ─> Ready ─shutdown()─> Shutdown
//!                      │                 │
//!                      └──────> Failed <─┘ (validation error, or critical
//!                                           failure with fail_on_critical)
//! ```
//!
//! Eager singletons are activated one at a time in startup order. Suspend
//! and terminate walk that order backwards, resume walks it forwards.
//!
//! The current state lives on a `watch` channel. [`Kernel::subscribe`] hands
//! out a `broadcast` receiver instead, so every progress step reaches
//! subscribers even when the next state follows immediately.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::{KernelConfig, StartupOrdering};
use crate::container::{Container, ContainerBuilder};
use crate::coordinator::MemoryPressureReport;
use crate::error::{Result, TadbirError};
use crate::graph::DependencyGraph;
use crate::hooks::LifecycleEvent;
use crate::key::DependencyKey;
use crate::metrics::MetricsSnapshot;
use crate::priority::{PrioritizedKey, startup_order};
use crate::resolver::Resolver;

/// Transitions a subscriber may fall behind before it sees `Lagged`.
const TRANSITION_BACKLOG: usize = 64;

/// Observable kernel state.
#[derive(Debug, Clone)]
pub enum LifecycleState {
    Idle,
    Configuring,
    /// Eager activation in progress; fraction of eager services done.
    WarmingUp(f64),
    Ready,
    Failed(TadbirError),
    Shutdown,
}

impl LifecycleState {
    pub fn is_ready(&self) -> bool {
        matches!(self, LifecycleState::Ready)
    }

    pub fn name(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Configuring => "configuring",
            LifecycleState::WarmingUp(_) => "warming_up",
            LifecycleState::Ready => "ready",
            LifecycleState::Failed(_) => "failed",
            LifecycleState::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::WarmingUp(progress) => write!(f, "warming_up({:.0}%)", progress * 100.0),
            LifecycleState::Failed(error) => write!(f, "failed: {error}"),
            other => f.write_str(other.name()),
        }
    }
}

/// One eager service that did not come up.
#[derive(Debug, Clone)]
pub struct ActivationFailure {
    pub key: DependencyKey,
    /// Whether the service sits in a critical priority band.
    pub critical: bool,
    pub error: TadbirError,
}

/// Outcome of eager activation.
#[derive(Debug, Clone, Default)]
pub struct ActivationReport {
    /// Eager keys activated successfully, in activation order.
    pub activated: Vec<DependencyKey>,
    pub failures: Vec<ActivationFailure>,
    pub elapsed: Duration,
}

impl ActivationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn has_critical_failure(&self) -> bool {
        self.failures.iter().any(|failure| failure.critical)
    }

    fn first_critical(&self) -> Option<&ActivationFailure> {
        self.failures.iter().find(|failure| failure.critical)
    }
}

/// Owns a container and its lifecycle.
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use tadbir_container::prelude::*;
///
/// struct Logger;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<()> {
/// let logger = Identifier::new("logger", || Logger);
/// let builder = Container::builder()
///     .register(&logger, Lifetime::EagerSingleton, |_| async { Ok(Arc::new(Logger)) });
///
/// let kernel = Kernel::new(builder, KernelConfig::default());
/// let report = kernel.build().await?;
/// assert_eq!(report.activated.len(), 1);
///
/// let resolver = kernel.resolver()?;
/// resolver.resolve(&logger).await?;
/// kernel.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Kernel {
    builder: ContainerBuilder,
    config: KernelConfig,
    container: OnceCell<Container>,
    order: OnceCell<Vec<PrioritizedKey>>,
    report: OnceCell<ActivationReport>,
    state: watch::Sender<LifecycleState>,
    transitions: broadcast::Sender<LifecycleState>,
    /// Serializes build, events and shutdown.
    sequence: tokio::sync::Mutex<()>,
    sweeper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Kernel {
    pub fn new(builder: ContainerBuilder, config: KernelConfig) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        let (transitions, _) = broadcast::channel(TRANSITION_BACKLOG);
        Self {
            builder,
            config,
            container: OnceCell::new(),
            order: OnceCell::new(),
            report: OnceCell::new(),
            state,
            transitions,
            sequence: tokio::sync::Mutex::new(()),
            sweeper: parking_lot::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        LifecycleState::clone(&self.state.borrow())
    }

    /// Every state change from now on, in order, including each
    /// `WarmingUp` step.
    ///
    /// A receiver more than 64 transitions behind gets
    /// [`RecvError::Lagged`](broadcast::error::RecvError::Lagged).
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleState> {
        self.transitions.subscribe()
    }

    fn set_state(&self, next: LifecycleState) {
        debug!(state = %next, "Kernel state changed");
        // No subscribers is fine.
        let _ = self.transitions.send(next.clone());
        self.state.send_replace(next);
    }

    // ═══════════════════════════════════════════
    // Build and activation
    // ═══════════════════════════════════════════

    /// Builds the container and activates eager singletons.
    ///
    /// Activation never stops at a failing service; failures are collected
    /// in the returned report. Calling `build` again once ready returns the
    /// stored report.
    ///
    /// # Errors
    /// - graph validation errors (state becomes `Failed`)
    /// - [`TadbirError::CriticalDependencyFailed`] when `fail_on_critical` is
    ///   set and a logging or configuration service failed
    /// - [`TadbirError::ShutdownInProgress`] after shutdown
    #[instrument(skip(self), name = "kernel_build")]
    pub async fn build(&self) -> Result<ActivationReport> {
        let _sequence = self.sequence.lock().await;

        match self.state() {
            LifecycleState::Ready => return Ok(self.report.get().cloned().unwrap_or_default()),
            LifecycleState::Failed(error) => return Err(error),
            LifecycleState::Shutdown => return Err(TadbirError::ShutdownInProgress),
            _ => {}
        }

        self.set_state(LifecycleState::Configuring);
        let container = self.builder.build();

        if self.config.validate_graph {
            if let Err(err) = container.dependency_graph().validate() {
                error!(error = %err, "Dependency graph is invalid");
                self.set_state(LifecycleState::Failed(err.clone()));
                return Err(err);
            }
        }

        let order = self.compute_order(&container);
        let container = self.container.get_or_init(|| container);
        let order = self.order.get_or_init(|| order);
        self.start_sweeper(container);

        let report = self.activate(container, order).await;
        let report = self.report.get_or_init(|| report).clone();

        if self.config.fail_on_critical {
            if let Some(failure) = report.first_critical() {
                self.set_state(LifecycleState::Failed(failure.error.clone()));
                return Err(failure.error.clone());
            }
        }

        info!(
            activated = report.activated.len(),
            failed = report.failures.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Kernel ready ✓"
        );
        self.set_state(LifecycleState::Ready);
        Ok(report)
    }

    fn compute_order(&self, container: &Container) -> Vec<PrioritizedKey> {
        let layers = match self.config.ordering {
            StartupOrdering::Priority => None,
            StartupOrdering::DependencyAware => match container.dependency_graph().layer_map() {
                Ok(layers) => Some(layers),
                Err(err) => {
                    warn!(error = %err, "Cannot layer dependency graph, ordering by priority");
                    None
                }
            },
        };

        let registry = container.coordinator().registry();
        startup_order(registry.entries().map(|entry| entry.as_ref()), layers.as_ref())
    }

    async fn activate(&self, container: &Container, order: &[PrioritizedKey]) -> ActivationReport {
        let started = Instant::now();
        let eager: Vec<&PrioritizedKey> = order.iter().filter(|p| p.lifetime.is_eager()).collect();
        let total = eager.len();
        let step_timeout = self.config.activation_timeout();

        info!(eager = total, "Activating eager services");
        self.set_state(LifecycleState::WarmingUp(0.0));

        let mut report = ActivationReport::default();
        for (i, prioritized) in eager.into_iter().enumerate() {
            let key = &prioritized.key;
            trace!(key = %key, priority = %prioritized.priority, "Activating");

            let resolved = match step_timeout {
                Some(limit) => tokio::time::timeout(limit, container.resolve_key(key))
                    .await
                    .unwrap_or(Err(TadbirError::InitializationTimeout(limit))),
                None => container.resolve_key(key).await,
            };

            match resolved {
                Ok(_) => report.activated.push(key.clone()),
                Err(source) => {
                    let critical = prioritized.priority.is_critical();
                    let error = if critical {
                        let wrapped = TadbirError::CriticalDependencyFailed {
                            key: key.clone(),
                            source: Box::new(source),
                        };
                        error!(key = %key, error = %wrapped, "Critical service failed to start");
                        wrapped
                    } else {
                        warn!(key = %key, error = %source, "Eager service failed to start");
                        source
                    };
                    report.failures.push(ActivationFailure {
                        key: key.clone(),
                        critical,
                        error,
                    });
                }
            }

            self.set_state(LifecycleState::WarmingUp((i + 1) as f64 / total as f64));
        }

        if total == 0 {
            self.set_state(LifecycleState::WarmingUp(1.0));
        }

        report.elapsed = started.elapsed();
        report
    }

    fn start_sweeper(&self, container: &Container) {
        let Some(period) = self.config.weak_sweep_interval() else {
            return;
        };
        let coordinator = Arc::downgrade(container.coordinator());

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                if coordinator.is_shut_down() {
                    break;
                }
                coordinator.cleanup_weak_handles();
                coordinator.purge_expired().await;
            }
        });

        debug!(period_ms = period.as_millis() as u64, "Started weak-handle sweeper");
        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    // ═══════════════════════════════════════════
    // Access
    // ═══════════════════════════════════════════

    /// A resolver for the ready container.
    ///
    /// # Errors
    /// - [`TadbirError::ContainerNotFound`] before `build`
    /// - [`TadbirError::ContainerNotReady`] while starting or after a failure
    /// - [`TadbirError::ShutdownInProgress`] after shutdown
    pub fn resolver(&self) -> Result<Resolver> {
        match self.state() {
            LifecycleState::Idle => Err(TadbirError::ContainerNotFound),
            LifecycleState::Configuring | LifecycleState::WarmingUp(_) | LifecycleState::Failed(_) => {
                Err(TadbirError::ContainerNotReady)
            }
            LifecycleState::Shutdown => Err(TadbirError::ShutdownInProgress),
            LifecycleState::Ready => self
                .container
                .get()
                .map(Container::resolver)
                .ok_or(TadbirError::ContainerNotFound),
        }
    }

    /// Waits until the kernel is ready and returns a resolver.
    ///
    /// # Errors
    /// The failure error if startup failed, [`TadbirError::ShutdownInProgress`]
    /// after shutdown, [`TadbirError::InitializationTimeout`] when `timeout`
    /// elapses first.
    pub async fn wait_for_ready(&self, timeout: Option<Duration>) -> Result<Resolver> {
        let mut states = self.state.subscribe();
        let wait = async {
            loop {
                let current = LifecycleState::clone(&states.borrow_and_update());
                match current {
                    LifecycleState::Ready => return self.resolver(),
                    LifecycleState::Failed(error) => return Err(error),
                    LifecycleState::Shutdown => return Err(TadbirError::ShutdownInProgress),
                    _ => {}
                }
                if states.changed().await.is_err() {
                    return Err(TadbirError::ContainerNotReady);
                }
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .unwrap_or(Err(TadbirError::InitializationTimeout(limit))),
            None => wait.await,
        }
    }

    fn container(&self) -> Result<&Container> {
        self.container.get().ok_or(TadbirError::ContainerNotFound)
    }

    pub fn metrics(&self) -> Result<MetricsSnapshot> {
        Ok(self.container()?.metrics())
    }

    pub fn dependency_graph(&self) -> Result<DependencyGraph> {
        Ok(self.container()?.dependency_graph())
    }

    /// Every registration in startup order.
    pub fn startup_order(&self) -> Result<Vec<PrioritizedKey>> {
        self.order.get().cloned().ok_or(TadbirError::ContainerNotFound)
    }

    /// The report of the last successful or failed activation.
    pub fn activation_report(&self) -> Option<&ActivationReport> {
        self.report.get()
    }

    // ═══════════════════════════════════════════
    // Events
    // ═══════════════════════════════════════════

    /// Notifies cached services that the application is being suspended,
    /// most dependent first.
    pub async fn handle_suspend(&self) -> Result<usize> {
        self.propagate(LifecycleEvent::Suspend).await
    }

    /// Notifies cached services that the application resumed, most
    /// fundamental first.
    pub async fn handle_resume(&self) -> Result<usize> {
        self.propagate(LifecycleEvent::Resume).await
    }

    /// Notifies cached services of termination, then disposes each of them.
    pub async fn handle_terminate(&self) -> Result<usize> {
        self.propagate(LifecycleEvent::Terminate).await
    }

    /// Returns how many services received the event.
    #[instrument(skip(self), name = "kernel_event")]
    async fn propagate(&self, event: LifecycleEvent) -> Result<usize> {
        let _sequence = self.sequence.lock().await;
        let container = self.container()?;
        if container.is_shut_down() {
            return Err(TadbirError::ShutdownInProgress);
        }
        let order = self.order.get().ok_or(TadbirError::ContainerNotFound)?;
        let coordinator = container.coordinator();

        let walk: Vec<&PrioritizedKey> = if event.runs_in_reverse() {
            order.iter().rev().collect()
        } else {
            order.iter().collect()
        };

        let mut notified = 0;
        let mut disposed = 0;
        for prioritized in walk {
            let key = &prioritized.key;
            let Some(entry) = coordinator.registry().get(key) else {
                continue;
            };

            if let Some(hook) = &entry.on_event {
                if let Some(instance) = coordinator.cached_instance(key) {
                    trace!(key = %key, event = %event, "Notifying");
                    hook(instance, event).await;
                    notified += 1;
                }
            }

            if event == LifecycleEvent::Terminate {
                if let Some((instance, dispose)) = coordinator.take_disposal(key) {
                    dispose(instance).await;
                    disposed += 1;
                }
            }
        }

        info!(event = %event, notified, disposed, "Propagated lifecycle event");
        Ok(notified)
    }

    // ═══════════════════════════════════════════
    // Maintenance
    // ═══════════════════════════════════════════

    /// Releases dead weak handles and the whole on-demand cache, disposing
    /// dropped cache entries.
    pub async fn handle_memory_pressure(&self) -> Result<MemoryPressureReport> {
        let report = self.container()?.handle_memory_pressure().await;
        let signal = TadbirError::MemoryPressureDetected {
            released: report.total(),
        };
        warn!(
            released_handles = report.released_handles,
            released_cache_entries = report.released_cache_entries,
            disposed = report.disposed,
            "{signal}"
        );
        Ok(report)
    }

    /// Stops the sweeper, disposes remaining cached instances and enters
    /// `Shutdown`. Allowed from any state; returns the number of disposal
    /// hooks run.
    #[instrument(skip(self), name = "kernel_shutdown")]
    pub async fn shutdown(&self) -> usize {
        let _sequence = self.sequence.lock().await;
        if matches!(self.state(), LifecycleState::Shutdown) {
            return 0;
        }

        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }

        let disposed = match self.container.get() {
            Some(container) => container.shutdown().await,
            None => 0,
        };

        self.set_state(LifecycleState::Shutdown);
        info!(disposed, "Kernel shut down");
        disposed
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.abort();
        }
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("state", &self.state())
            .field("config", &self.config)
            .field("builder", &self.builder)
            .finish()
    }
}
