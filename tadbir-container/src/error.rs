//! Error types for Tadbir operations.
//!
//! Every variant is cheap to clone: a single failed production is fanned
//! out to every caller waiting on it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tadbir_support::rendering::render_path;

use crate::key::DependencyKey;

/// Boxed error returned by user factories.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared form of a factory error, kept inside [`TadbirError`].
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Main error type for all Tadbir operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TadbirError {
    /// No container has been built yet.
    #[error("No container available. Call Kernel::build() first")]
    ContainerNotFound,

    /// The container exists but has not reached the ready state.
    #[error("Container is not ready")]
    ContainerNotReady,

    /// The container has been shut down.
    #[error("Container is shutting down; no further resolutions are served")]
    ShutdownInProgress,

    /// Startup or a single activation step took too long.
    #[error("Initialization timed out after {0:?}")]
    InitializationTimeout(Duration),

    /// Requested dependency was never registered.
    #[error("{}", .0)]
    NotRegistered(NotRegisteredError),

    /// Circular dependency detected during resolve.
    #[error("{}", .0)]
    CircularDependency(CircularDependencyError),

    /// A factory body failed.
    #[error("Failed to construct {key}: {source}")]
    FactoryFailed {
        key: DependencyKey,
        #[source]
        source: SharedError,
    },

    /// A produced value could not be downcast to the requested type.
    #[error("Type mismatch for {key}: expected {expected}, registered as {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
        key: DependencyKey,
    },

    /// The externally owned instance behind a weak registration is gone.
    #[error("Weak instance of {0} has been deallocated")]
    WeakObjectDeallocated(DependencyKey),

    /// An eager service in a critical priority band failed to start.
    #[error("Critical dependency {key} failed: {source}")]
    CriticalDependencyFailed {
        key: DependencyKey,
        #[source]
        source: Box<TadbirError>,
    },

    /// A memory-pressure signal was handled.
    #[error("Memory pressure detected; released {released} cached entries")]
    MemoryPressureDetected { released: usize },
}

impl TadbirError {
    /// Wraps a factory error, unless it already is a domain error.
    ///
    /// Domain errors raised deeper in the resolution chain pass through
    /// untouched, so each failure is wrapped exactly once, at its origin.
    pub fn from_factory(key: &DependencyKey, error: BoxError) -> Self {
        match error.downcast::<TadbirError>() {
            Ok(domain) => *domain,
            Err(other) => TadbirError::FactoryFailed {
                key: key.clone(),
                source: Arc::from(other),
            },
        }
    }

    /// Returns `true` for errors describing the shape of the graph rather
    /// than a failing factory.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            TadbirError::NotRegistered(_) | TadbirError::CircularDependency(_)
        )
    }
}

/// Error when a dependency was not registered.
#[derive(Debug, Clone)]
pub struct NotRegisteredError {
    /// The dependency that was requested
    pub requested: DependencyKey,
    /// What required this dependency (if known)
    pub required_by: Option<DependencyKey>,
    /// Similar registered names, for "did you mean?" hints
    pub suggestions: Vec<String>,
}

impl fmt::Display for NotRegisteredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dependency not registered: {}", self.requested)?;

        if let Some(ref parent) = self.required_by {
            write!(f, "\n  Required by: {parent}")?;
        }

        if !self.suggestions.is_empty() {
            write!(f, "\n  Did you mean one of:")?;
            for suggestion in &self.suggestions {
                write!(f, "\n    - {suggestion}")?;
            }
        }

        write!(
            f,
            "\n  Hint: register {} on this container or one of its parents",
            self.requested.display_name()
        )
    }
}

/// Error when a circular dependency is detected.
#[derive(Debug, Clone)]
pub struct CircularDependencyError {
    /// The resolution path that closes the cycle, e.g. `[A, B, A]`.
    pub path: Vec<DependencyKey>,
}

impl fmt::Display for CircularDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.path.iter().map(DependencyKey::display_name).collect();
        write!(f, "Circular dependency detected:\n  {}", render_path(&names))?;
        write!(
            f,
            "\n  Hint: break the cycle with a weak registration or resolve lazily after startup"
        )
    }
}

/// Convenient Result type for Tadbir operations.
pub type Result<T> = std::result::Result<T, TadbirError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct DiskFull;

    impl fmt::Display for DiskFull {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "disk full")
        }
    }

    impl std::error::Error for DiskFull {}

    #[test]
    fn not_registered_display_lists_suggestions() {
        let err = TadbirError::NotRegistered(NotRegisteredError {
            requested: DependencyKey::named::<String>("databse"),
            required_by: Some(DependencyKey::named::<u8>("repository")),
            suggestions: vec!["database".into()],
        });

        let msg = err.to_string();
        assert!(msg.contains("not registered"));
        assert!(msg.contains("Required by: repository"));
        assert!(msg.contains("- database"));
    }

    #[test]
    fn circular_display_renders_path() {
        let err = TadbirError::CircularDependency(CircularDependencyError {
            path: vec![
                DependencyKey::named::<u8>("a"),
                DependencyKey::named::<u8>("b"),
                DependencyKey::named::<u8>("a"),
            ],
        });

        let msg = err.to_string();
        assert!(msg.contains("Circular"));
        assert!(msg.contains("a → b → a"));
    }

    #[test]
    fn foreign_errors_are_wrapped_once() {
        let key = DependencyKey::named::<u8>("store");
        let err = TadbirError::from_factory(&key, Box::new(DiskFull));
        match &err {
            TadbirError::FactoryFailed { key: failed, source } => {
                assert_eq!(failed, &key);
                assert_eq!(source.to_string(), "disk full");
            }
            other => panic!("Expected FactoryFailed, got: {other:?}"),
        }

        // Propagating through another hop keeps the original error intact.
        let outer = DependencyKey::named::<u8>("service");
        let again = TadbirError::from_factory(&outer, Box::new(err));
        match again {
            TadbirError::FactoryFailed { key: failed, .. } => assert_eq!(failed, key),
            other => panic!("Expected FactoryFailed, got: {other:?}"),
        }
    }

    #[test]
    fn structural_errors_pass_through() {
        let key = DependencyKey::named::<u8>("a");
        let cycle = TadbirError::CircularDependency(CircularDependencyError {
            path: vec![key.clone(), key.clone()],
        });
        let passed = TadbirError::from_factory(&key, Box::new(cycle));
        assert!(passed.is_structural());
        assert!(matches!(passed, TadbirError::CircularDependency(_)));
    }
}
