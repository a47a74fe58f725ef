//! Dependency identification keys.
//!
//! [`DependencyKey`] is the type-erased token the engine works with.
//! [`Identifier`] is its typed counterpart handed to users: it remembers the
//! value type and carries a static default used by
//! [`Resolver::safe_resolve`](crate::resolver::Resolver::safe_resolve).

use std::any::{TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use tadbir_support::rendering::shorten_type_name;

/// Uniquely identifies a dependency in the container.
///
/// Two keys are equal when both the Rust type and the optional name match.
///
/// # Examples
/// ```
/// use tadbir_container::key::DependencyKey;
///
/// let key = DependencyKey::of::<String>();
/// assert_eq!(key.name(), None);
/// assert_eq!(key.display_name(), "String");
///
/// let primary = DependencyKey::named::<String>("primary_db");
/// let replica = DependencyKey::named::<String>("replica_db");
/// assert_ne!(primary, replica);
/// ```
#[derive(Clone)]
pub struct DependencyKey {
    type_id: TypeId,
    type_name: &'static str,
    name: Option<&'static str>,
}

impl DependencyKey {
    /// Creates a key for type `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            name: None,
        }
    }

    /// Creates a named key for type `T`.
    #[inline]
    pub fn named<T: ?Sized + 'static>(name: &'static str) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            name: Some(name),
        }
    }

    /// Returns the [`TypeId`] of the produced value.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the fully qualified type name.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the optional binding name.
    #[inline]
    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    /// Human-readable name used in diagnostics and priority heuristics.
    ///
    /// The explicit name if there is one, otherwise the type name without
    /// module paths.
    pub fn display_name(&self) -> String {
        match self.name {
            Some(name) => name.to_string(),
            None => shorten_type_name(self.type_name),
        }
    }
}

impl PartialEq for DependencyKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.name == other.name
    }
}

impl Eq for DependencyKey {}

impl Hash for DependencyKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Debug for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name {
            Some(name) => write!(f, "DependencyKey({}, name={:?})", self.type_name, name),
            None => write!(f, "DependencyKey({})", self.type_name),
        }
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name {
            Some(name) => write!(f, "{name} ({})", shorten_type_name(self.type_name)),
            None => write!(f, "{}", self.type_name),
        }
    }
}

/// Typed token naming a dependency that produces `Arc<T>`.
///
/// The default is returned by `safe_resolve` whenever resolution fails.
///
/// # Examples
/// ```
/// use tadbir_container::key::Identifier;
///
/// struct Settings { verbose: bool }
///
/// let id = Identifier::new("settings", || Settings { verbose: false });
/// assert_eq!(id.key().display_name(), "settings");
/// assert!(!id.default_value().verbose);
/// ```
pub struct Identifier<T> {
    key: DependencyKey,
    default: fn() -> T,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Identifier<T> {
    /// Creates a named identifier with a static default.
    pub fn new(name: &'static str, default: fn() -> T) -> Self {
        Self {
            key: DependencyKey::named::<T>(name),
            default,
            _marker: PhantomData,
        }
    }

    /// Creates an unnamed identifier keyed by type alone.
    pub fn of(default: fn() -> T) -> Self {
        Self {
            key: DependencyKey::of::<T>(),
            default,
            _marker: PhantomData,
        }
    }

    /// The type-erased key.
    #[inline]
    pub fn key(&self) -> &DependencyKey {
        &self.key
    }

    /// Builds a fresh copy of the static default.
    pub fn default_value(&self) -> Arc<T> {
        Arc::new((self.default)())
    }
}

impl<T> Clone for Identifier<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            default: self.default,
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Identifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Identifier").field(&self.key).finish()
    }
}

impl<T> From<&Identifier<T>> for DependencyKey {
    fn from(id: &Identifier<T>) -> Self {
        id.key.clone()
    }
}
