//! Provider trait: a module of related registrations.
//!
//! Providers group registrations by concern so application setup does not
//! turn into one long builder chain.
//!
//! # Examples
//! ```
//! use std::sync::Arc;
//! use tadbir_container::prelude::*;
//!
//! struct Database;
//!
//! struct StorageProvider {
//!     database: Identifier<Database>,
//! }
//!
//! impl Provider for StorageProvider {
//!     fn register(&self, registry: &mut dyn ProviderRegistry) {
//!         registry.add(Registration::new(&self.database, Lifetime::LazySingleton, |_| async {
//!             Ok(Arc::new(Database))
//!         }));
//!     }
//! }
//!
//! let storage = StorageProvider {
//!     database: Identifier::new("database", || Database),
//! };
//! let container = Container::builder().add_provider(&storage).build();
//! assert_eq!(container.registration_count(), 1);
//! ```

use crate::registry::{Registration, RegistrationEntry};

/// A module that registers related dependencies.
pub trait Provider: Send + Sync {
    /// Registers this provider's dependencies.
    ///
    /// Called once per [`ContainerBuilder::add_provider`](crate::container::ContainerBuilder::add_provider).
    fn register(&self, registry: &mut dyn ProviderRegistry);

    /// Human-readable name for logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// The part of the builder a [`Provider`] can see.
///
/// Kept object-safe so providers can be tested against a recording
/// registry instead of a real builder.
pub trait ProviderRegistry {
    /// Adds an erased registration. The last registration for a key wins.
    fn add_entry(&mut self, entry: RegistrationEntry);
}

impl dyn ProviderRegistry + '_ {
    /// Adds a typed registration.
    pub fn add<T: Send + Sync + 'static>(&mut self, registration: Registration<T>) {
        self.add_entry(registration.into_entry());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{DependencyKey, Identifier};
    use crate::lifetime::Lifetime;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recording {
        keys: Vec<DependencyKey>,
    }

    impl ProviderRegistry for Recording {
        fn add_entry(&mut self, entry: RegistrationEntry) {
            self.keys.push(entry.key().clone());
        }
    }

    struct Logger;
    struct Metrics;

    struct ObservabilityProvider;

    impl Provider for ObservabilityProvider {
        fn register(&self, registry: &mut dyn ProviderRegistry) {
            let logger = Identifier::new("logger", || Logger);
            let metrics = Identifier::new("metrics", || Metrics);

            registry.add(Registration::new(&logger, Lifetime::EagerSingleton, |_| async {
                Ok(Arc::new(Logger))
            }));
            registry.add(
                Registration::new(&metrics, Lifetime::LazySingleton, |_| async {
                    Ok(Arc::new(Metrics))
                })
                .depends_on(&logger),
            );
        }
    }

    #[test]
    fn provider_registers_in_order() {
        let mut recording = Recording::default();
        ObservabilityProvider.register(&mut recording);

        assert_eq!(
            recording.keys,
            vec![
                DependencyKey::named::<Logger>("logger"),
                DependencyKey::named::<Metrics>("metrics"),
            ]
        );
    }

    #[test]
    fn default_name_is_type_name() {
        assert!(ObservabilityProvider.name().contains("ObservabilityProvider"));
    }
}
