//! Startup priorities.
//!
//! A priority is a plain number; lower starts earlier and is notified of
//! suspend/terminate later. It is assembled from three parts:
//!
//! | part        | contribution                                         |
//! |-------------|------------------------------------------------------|
//! | lifetime    | `100 × (tier + 1)`: eager 100 … weak 400              |
//! | name band   | `10 × band`: logging 0 … presentation 70              |
//! | dependencies| `+1` per declared dependency                          |
//!
//! The name band comes from a keyword scan of the display name. It is a
//! heuristic and can be wrong for unusual names;
//! [`StartupOrdering::DependencyAware`](crate::config::StartupOrdering)
//! orders by the declared graph first.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use crate::key::DependencyKey;
use crate::lifetime::Lifetime;
use crate::registry::RegistrationEntry;

const TIER_UNIT: u32 = 100;
const BAND_UNIT: u32 = 10;

/// Functional area guessed from a service name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceBand {
    Logging,
    Configuration,
    Analytics,
    Networking,
    Security,
    Storage,
    Business,
    Presentation,
}

impl ServiceBand {
    const ALL: [ServiceBand; 8] = [
        ServiceBand::Logging,
        ServiceBand::Configuration,
        ServiceBand::Analytics,
        ServiceBand::Networking,
        ServiceBand::Security,
        ServiceBand::Storage,
        ServiceBand::Business,
        ServiceBand::Presentation,
    ];

    fn keywords(self) -> &'static [&'static str] {
        match self {
            ServiceBand::Logging => &[
                "log", "logs", "logger", "logging", "crash", "diagnostic", "tracing",
            ],
            ServiceBand::Configuration => &[
                "config", "setting", "env", "environment", "feature", "flag", "flags",
            ],
            ServiceBand::Analytics => &[
                "analytic", "metric", "telemetry", "tracker", "tracking", "stats", "event",
            ],
            ServiceBand::Networking => &[
                "network", "http", "https", "api", "client", "socket", "grpc", "rest", "url",
            ],
            ServiceBand::Security => &[
                "auth", "security", "crypto", "keychain", "token", "login", "credential",
                "permission", "encrypt",
            ],
            ServiceBand::Storage => &[
                "database", "db", "storage", "store", "cache", "repository", "repo", "persist",
                "disk", "file", "sql",
            ],
            ServiceBand::Business => &[
                "service", "manager", "interactor", "usecase", "use", "domain", "logic",
                "engine", "workflow",
            ],
            ServiceBand::Presentation => &[
                "view", "presenter", "ui", "screen", "controller", "coordinator", "router",
                "theme", "widget", "render",
            ],
        }
    }

    /// Classifies a display name. Names matching nothing count as business
    /// logic.
    pub fn classify(name: &str) -> Self {
        let tokens = tokenize(name);
        Self::ALL
            .into_iter()
            .find(|band| {
                band.keywords()
                    .iter()
                    .any(|kw| tokens.iter().any(|token| keyword_matches(token, kw)))
            })
            .unwrap_or(ServiceBand::Business)
    }

    #[inline]
    pub fn index(self) -> u32 {
        self as u32
    }

    /// The two lowest bands: failures there are reported as critical.
    #[inline]
    pub fn is_critical(self) -> bool {
        matches!(self, ServiceBand::Logging | ServiceBand::Configuration)
    }
}

impl fmt::Display for ServiceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// Short keywords must match a whole token so "log" does not swallow "login".
fn keyword_matches(token: &str, keyword: &str) -> bool {
    token == keyword || (keyword.len() >= 4 && token.starts_with(keyword))
}

/// Splits `HttpClient`, `crash_reporter` or `api-gateway` into lowercase words.
fn tokenize(name: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for ch in name.chars() {
        if !ch.is_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Computed startup priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Priority {
    value: u32,
    band: ServiceBand,
}

impl Priority {
    #[inline]
    pub fn value(&self) -> u32 {
        self.value
    }

    #[inline]
    pub fn band(&self) -> ServiceBand {
        self.band
    }

    #[inline]
    pub fn is_critical(&self) -> bool {
        self.band.is_critical()
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value).then(self.band.cmp(&other.band))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.value, self.band)
    }
}

/// Computes the priority of one registration.
///
/// # Examples
/// ```
/// use tadbir_container::key::DependencyKey;
/// use tadbir_container::lifetime::Lifetime;
/// use tadbir_container::priority::compute_priority;
///
/// let logger = compute_priority(&DependencyKey::named::<u8>("logger"), Lifetime::EagerSingleton, 0);
/// let network = compute_priority(&DependencyKey::named::<u8>("network"), Lifetime::EagerSingleton, 1);
/// assert!(logger < network);
/// ```
pub fn compute_priority(key: &DependencyKey, lifetime: Lifetime, dependency_count: usize) -> Priority {
    let band = ServiceBand::classify(&key.display_name());
    let dependencies = u32::try_from(dependency_count).unwrap_or(u32::MAX);
    let value = TIER_UNIT * (lifetime.tier() + 1) + BAND_UNIT * band.index();
    Priority {
        value: value.saturating_add(dependencies),
        band,
    }
}

/// A registration placed in startup order.
#[derive(Debug, Clone)]
pub struct PrioritizedKey {
    pub key: DependencyKey,
    pub lifetime: Lifetime,
    pub priority: Priority,
    /// Topological layer (0 = no local dependencies); 0 for every key when
    /// ordering by priority only.
    pub layer: usize,
}

/// Orders registrations for startup.
///
/// With `layers`, keys sort by layer first and priority second; without,
/// by priority alone. Display name then type name break remaining ties so the
/// order is deterministic.
pub(crate) fn startup_order<'a>(
    entries: impl IntoIterator<Item = &'a RegistrationEntry>,
    layers: Option<&HashMap<DependencyKey, usize>>,
) -> Vec<PrioritizedKey> {
    let mut ordered: Vec<(PrioritizedKey, String)> = entries
        .into_iter()
        .map(|entry| {
            let layer = layers
                .and_then(|layers| layers.get(&entry.key).copied())
                .unwrap_or(0);
            let prioritized = PrioritizedKey {
                key: entry.key.clone(),
                lifetime: entry.lifetime,
                priority: compute_priority(&entry.key, entry.lifetime, entry.dependencies.len()),
                layer,
            };
            (prioritized, entry.key.display_name())
        })
        .collect();

    ordered.sort_by(|(a, a_name), (b, b_name)| {
        a.layer
            .cmp(&b.layer)
            .then(a.priority.cmp(&b.priority))
            .then_with(|| a_name.cmp(b_name))
            .then_with(|| a.key.type_name().cmp(b.key.type_name()))
    });

    ordered.into_iter().map(|(key, _)| key).collect()
}
