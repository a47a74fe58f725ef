//! Text rendering for diagnostics.
//!
//! Formats resolution paths, type names, "did you mean?" suggestions and the
//! textual dependency-graph view.

use std::fmt::Write as _;

/// Renders a resolution path as a single line.
///
/// # Examples
/// ```
/// use tadbir_support::rendering::render_path;
///
/// let path = ["session", "auth_client", "session"];
/// assert_eq!(render_path(&path), "session → auth_client → session");
/// ```
pub fn render_path(path: &[impl AsRef<str>]) -> String {
    let mut out = String::new();
    for (i, segment) in path.iter().enumerate() {
        if i > 0 {
            out.push_str(" → ");
        }
        out.push_str(segment.as_ref());
    }
    out
}

/// A node of the textual dependency tree.
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// Display name of the registration
    pub name: String,
    /// Lifetime label, e.g. `"LazySingleton"`
    pub lifetime: String,
    /// Startup priority, if one has been computed
    pub priority: Option<u32>,
    /// Display names of declared dependencies
    pub dependencies: Vec<String>,
}

/// Renders graph nodes as an indented listing.
///
/// ```text
/// [EagerSingleton] logger (p=100)
/// [LazySingleton ] database (p=252)
///     ├─ logger
///     └─ config
/// ```
pub fn render_graph(nodes: &[GraphNode]) -> String {
    let width = nodes.iter().map(|n| n.lifetime.len()).max().unwrap_or(0);
    let mut out = String::new();

    for node in nodes {
        let _ = write!(out, "[{:<width$}] {}", node.lifetime, node.name);
        if let Some(priority) = node.priority {
            let _ = write!(out, " (p={priority})");
        }
        out.push('\n');

        let last = node.dependencies.len().saturating_sub(1);
        for (i, dep) in node.dependencies.iter().enumerate() {
            let branch = if i == last { "└─" } else { "├─" };
            let _ = writeln!(out, "    {branch} {dep}");
        }
    }

    out
}

/// Strips module paths from a fully qualified type name.
///
/// ```
/// use tadbir_support::rendering::shorten_type_name;
///
/// assert_eq!(shorten_type_name("app::net::HttpClient"), "HttpClient");
/// assert_eq!(
///     shorten_type_name("alloc::sync::Arc<dyn app::log::Sink>"),
///     "Arc<dyn Sink>"
/// );
/// ```
pub fn shorten_type_name(full_name: &str) -> String {
    let mut out = String::with_capacity(full_name.len());
    let mut segment_start = 0;

    for (idx, ch) in full_name.char_indices() {
        if matches!(ch, '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' | '&') {
            out.push_str(last_path_segment(&full_name[segment_start..idx]));
            out.push(ch);
            segment_start = idx + ch.len_utf8();
        }
    }
    out.push_str(last_path_segment(&full_name[segment_start..]));
    out
}

fn last_path_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}

/// Picks registered names close to `requested`, best first.
///
/// Substring matches score highest, then shared prefixes of three or more
/// characters. Equal scores prefer names of similar length.
pub fn suggest_similar(requested: &str, available: &[&str], max_suggestions: usize) -> Vec<String> {
    let wanted = shorten_type_name(requested).to_lowercase();

    let mut scored: Vec<(&str, usize)> = available
        .iter()
        .filter_map(|&candidate| {
            let name = shorten_type_name(candidate).to_lowercase();
            if name == wanted {
                return None;
            }
            if name.contains(&wanted) || wanted.contains(&name) {
                return Some((candidate, 100));
            }
            let prefix = name
                .chars()
                .zip(wanted.chars())
                .take_while(|(a, b)| a == b)
                .count();
            (prefix >= 3).then_some((candidate, prefix * 10))
        })
        .collect();

    let distance = |name: &str| name.len().abs_diff(requested.len());
    scored.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| distance(a.0).cmp(&distance(b.0)))
            .then_with(|| a.0.cmp(b.0))
    });
    scored
        .into_iter()
        .take(max_suggestions)
        .map(|(name, _)| name.to_string())
        .collect()
}
