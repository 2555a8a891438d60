//! Canonical request forms for deduplication fingerprints and cache keys.
//!
//! Both identifiers start from the same canonical JSON document: method, URL,
//! the filtered and sorted headers, and the filtered parameters with every
//! nested map sorted. The cache-key form also folds in the TTL so the same
//! request cached under different lifetimes does not collide.
//!
//! The canonical string is then hashed into a UUID v5 (see
//! [`identifier_for`]), which is stable across processes and releases.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Value, json};
use uuid::Uuid;

use crate::request::{FieldFilter, Headers, Method, Parameters};

/// Namespace for every identifier derived by this crate.
const NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_0e2b_93a4_4f57_b0d1_7a5e_2c48_9f13);

/// Builds the canonical string used to fingerprint an in-flight call.
pub fn dedup_canonical(
    method: &Method,
    url: &str,
    headers: &Headers,
    params: &Parameters,
    filter: &FieldFilter,
) -> String {
    canonical("dedup", method, url, headers, params, filter, None)
}

/// Builds the canonical string used to key a cached response.
pub fn cache_canonical(
    method: &Method,
    url: &str,
    headers: &Headers,
    params: &Parameters,
    filter: &FieldFilter,
    ttl: Duration,
) -> String {
    canonical("cache", method, url, headers, params, filter, Some(ttl))
}

/// Hashes a canonical string into its stable identifier.
pub fn identifier_for(canonical: &str) -> String {
    Uuid::new_v5(&NAMESPACE, canonical.as_bytes()).to_string()
}

fn canonical(
    kind: &str,
    method: &Method,
    url: &str,
    headers: &Headers,
    params: &Parameters,
    filter: &FieldFilter,
    ttl: Option<Duration>,
) -> String {
    let headers: Vec<Value> = headers
        .canonical(|name| filter.keeps_header(name))
        .into_iter()
        .map(|(name, value)| json!([name, value]))
        .collect();

    let mut document = json!({
        "kind": kind,
        "method": method.as_str(),
        "url": url,
        "headers": headers,
        "params": params.canonical(|name| filter.keeps_param(name)),
    });
    if let Some(ttl) = ttl {
        document["ttl_ms"] = json!(ttl.as_millis() as u64);
    }

    sort_keys(document).to_string()
}

/// Rebuilds every object with its keys inserted in sorted order, whatever map
/// representation `serde_json` was built with.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .collect::<BTreeMap<_, _>>()
                .into_iter()
                .map(|(key, value)| (key, sort_keys(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
