//! Boots a small application graph, walks it through suspend/resume and
//! shuts it down.
//!
//! Run with `RUST_LOG=debug cargo run -p tadbir --example basic` to see the
//! runtime's own logs.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tadbir::prelude::*;
use tadbir::support::logging::init_tracing;
use tracing::info;

struct AppLogger;

#[async_trait]
impl Dispose for AppLogger {
    async fn dispose(&self) {
        info!("logger flushed");
    }
}

struct SessionStore {
    logger: Arc<AppLogger>,
    active: AtomicUsize,
}

#[async_trait]
impl LifecycleHooks for SessionStore {
    async fn on_suspend(&self) {
        info!(active = self.active.load(Ordering::Relaxed), "sessions parked");
    }

    async fn on_resume(&self) {
        info!("sessions restored");
    }
}

#[async_trait]
impl Dispose for SessionStore {
    async fn dispose(&self) {
        info!("session store closed");
    }
}

struct ReportRenderer {
    sessions: Arc<SessionStore>,
}

struct ThumbnailCache;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info,tadbir_container=debug");

    let logger = Identifier::new("app_logger", || AppLogger);
    let sessions = Identifier::new("session_store", || SessionStore {
        logger: Arc::new(AppLogger),
        active: AtomicUsize::new(0),
    });
    let renderer = Identifier::new("report_renderer", || ReportRenderer {
        sessions: Arc::new(SessionStore {
            logger: Arc::new(AppLogger),
            active: AtomicUsize::new(0),
        }),
    });
    let thumbnails = Identifier::new("thumbnail_cache", || ThumbnailCache);

    let builder = Container::builder()
        .add(
            Registration::new(&logger, Lifetime::EagerSingleton, |_| async {
                Ok(Arc::new(AppLogger))
            })
            .with_dispose(),
        )
        .add({
            let logger_dep = logger.clone();
            Registration::new(&sessions, Lifetime::EagerSingleton, move |resolver| {
                let logger = logger_dep.clone();
                async move {
                    Ok(Arc::new(SessionStore {
                        logger: resolver.resolve(&logger).await?,
                        active: AtomicUsize::new(3),
                    }))
                }
            })
            .depends_on(&logger)
            .with_lifecycle()
            .with_dispose()
        })
        .add({
            let sessions_dep = sessions.clone();
            Registration::new(&renderer, Lifetime::OnDemand, move |resolver| {
                let sessions = sessions_dep.clone();
                async move {
                    Ok(Arc::new(ReportRenderer {
                        sessions: resolver.resolve(&sessions).await?,
                    }))
                }
            })
            .depends_on(&sessions)
            .cached(CachePolicy::bounded(4))
        })
        .register_weak(&thumbnails, |_| async { Ok(Arc::new(ThumbnailCache)) });

    let kernel = Kernel::new(
        builder,
        KernelConfig::default().with_weak_sweep_interval_ms(500),
    );

    let report = kernel.build().await?;
    info!(
        activated = report.activated.len(),
        failures = report.failures.len(),
        elapsed = ?report.elapsed,
        "kernel ready"
    );

    for step in kernel.startup_order()? {
        info!(key = %step.key, priority = step.priority.value(), "startup step");
    }
    println!("{}", kernel.dependency_graph()?);

    let resolver = kernel.resolver()?;
    let report_renderer = resolver.resolve(&renderer).await?;
    let _sessions_logger = Arc::clone(&report_renderer.sessions.logger);
    let _thumbnails = resolver.resolve(&thumbnails).await?;

    kernel.handle_suspend().await?;
    kernel.handle_resume().await?;

    let released = kernel.handle_memory_pressure().await?;
    info!(released = released.total(), "memory pressure handled");

    let metrics = kernel.metrics()?;
    info!(
        resolutions = metrics.total_resolutions,
        hit_ratio = metrics.hit_ratio(),
        weak_alive = metrics.weak_alive,
        "metrics"
    );

    let disposed = kernel.shutdown().await;
    info!(disposed, state = %kernel.state(), "kernel stopped");

    Ok(())
}
