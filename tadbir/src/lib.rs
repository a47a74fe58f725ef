//! # Tadbir
//!
//! An async dependency-resolution and lifecycle runtime.
//!
//! Services are registered under typed [`Identifier`]s with a
//! [`Lifetime`], produced by async factories, and driven through startup,
//! suspend/resume and shutdown by a [`Kernel`].
//!
//! ```
//! use std::sync::Arc;
//! use tadbir::prelude::*;
//!
//! struct Clock;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<()> {
//! let clock = Identifier::new("clock", || Clock);
//! let kernel = Kernel::new(
//!     Container::builder().register(&clock, Lifetime::EagerSingleton, |_| async {
//!         Ok(Arc::new(Clock))
//!     }),
//!     KernelConfig::default(),
//! );
//!
//! kernel.build().await?;
//! let resolver = kernel.resolver()?;
//! let _clock = resolver.resolve(&clock).await?;
//! kernel.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub use tadbir_container::*;
pub use tadbir_support as support;
