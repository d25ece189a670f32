//! Canonical cache keys.
//!
//! Every logical resource maps to exactly one key string: the REST path it is
//! fetched from, relative to the page origin. Components asking for the same
//! resource therefore share one cache entry.

use url::form_urlencoded;

/// REST prefix shared by every resource path.
pub const API_PREFIX: &str = "/api";

/// Build a key from a resource path and query parameters.
///
/// Parameters are sorted by name and values are percent-encoded, so the same
/// query always yields byte-identical keys regardless of argument order.
pub fn key(resource: &str, params: &[(&str, &str)]) -> String {
    let mut base = String::with_capacity(API_PREFIX.len() + resource.len() + 1);
    base.push_str(API_PREFIX);
    if !resource.starts_with('/') {
        base.push('/');
    }
    base.push_str(resource);

    if params.is_empty() {
        return base;
    }

    let mut sorted: Vec<&(&str, &str)> = params.iter().collect();
    sorted.sort();

    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(sorted.into_iter().map(|(k, v)| (*k, *v)))
        .finish();
    format!("{}?{}", base, query)
}

pub fn dashboard() -> String {
    key("/dashboard/", &[])
}

/// Net-worth history; each range is cached independently.
pub fn history(range: &str) -> String {
    key("/stats/history", &[("range", range)])
}

pub fn budgets() -> String {
    key("/budgets/categories", &[])
}

pub fn income() -> String {
    key("/income/items", &[])
}

/// Encode `segment` for use as one URL path segment.
///
/// Form encoding turns a space into `+`, which a path reads as a literal
/// plus; a literal `+` is already `%2B`, so every remaining `+` was a space.
fn path_segment(segment: &str) -> String {
    form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

pub fn setting(name: &str) -> String {
    key(&format!("/settings/{}", path_segment(name)), &[])
}

pub fn risk_metrics() -> String {
    key("/stats/risk_metrics", &[])
}

pub fn alerts() -> String {
    key("/alerts/", &[])
}
