//! Core engine of Tadbir: registrations, resolution, caching and the
//! lifecycle kernel.
//!
//! Most applications only need the [`prelude`].

mod cache;
pub mod config;
pub mod container;
pub mod context;
mod coordinator;
pub mod error;
pub mod graph;
pub mod hooks;
pub mod kernel;
pub mod key;
pub mod lifetime;
pub mod metrics;
pub mod priority;
pub mod provider;
pub mod registry;
pub mod resolver;
pub mod weak;

pub use container::{Container, ContainerBuilder, prelude};
pub use coordinator::MemoryPressureReport;
pub use error::{Result, TadbirError};
pub use kernel::{ActivationReport, Kernel, LifecycleState};
pub use key::{DependencyKey, Identifier};
pub use lifetime::Lifetime;
