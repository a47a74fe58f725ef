//! Kernel configuration.
//!
//! Plain serde structure so applications can keep it next to the rest of
//! their settings (TOML, JSON, environment-backed loaders).
//!
//! ```
//! use tadbir_container::config::{KernelConfig, StartupOrdering};
//!
//! let config = KernelConfig::default()
//!     .with_ordering(StartupOrdering::DependencyAware)
//!     .with_activation_timeout_ms(2_000);
//! assert_eq!(config.activation_timeout().map(|d| d.as_millis()), Some(2_000));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the kernel orders eager activation and lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupOrdering {
    /// Ascending heuristic priority (lifetime tier, name band, dependency count).
    #[default]
    Priority,
    /// Topological layers of the declared dependency graph; the heuristic
    /// priority only breaks ties inside a layer.
    DependencyAware,
}

/// Settings read by [`Kernel`](crate::kernel::Kernel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Validate the declared dependency graph before warming up.
    pub validate_graph: bool,
    /// Startup ordering strategy.
    pub ordering: StartupOrdering,
    /// Upper bound for each eager activation step.
    pub activation_timeout_ms: Option<u64>,
    /// Enter `Failed` instead of `Ready` when a critical service failed.
    pub fail_on_critical: bool,
    /// Period of the background weak-handle sweep; `None` disables it.
    pub weak_sweep_interval_ms: Option<u64>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            validate_graph: true,
            ordering: StartupOrdering::Priority,
            activation_timeout_ms: None,
            fail_on_critical: false,
            weak_sweep_interval_ms: None,
        }
    }
}

impl KernelConfig {
    pub fn with_ordering(mut self, ordering: StartupOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate_graph = validate;
        self
    }

    pub fn with_activation_timeout_ms(mut self, millis: u64) -> Self {
        self.activation_timeout_ms = Some(millis);
        self
    }

    pub fn with_fail_on_critical(mut self, fail: bool) -> Self {
        self.fail_on_critical = fail;
        self
    }

    pub fn with_weak_sweep_interval_ms(mut self, millis: u64) -> Self {
        self.weak_sweep_interval_ms = Some(millis);
        self
    }

    pub fn activation_timeout(&self) -> Option<Duration> {
        self.activation_timeout_ms.map(Duration::from_millis)
    }

    /// Sweep period; zero is treated as disabled.
    pub fn weak_sweep_interval(&self) -> Option<Duration> {
        self.weak_sweep_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}
