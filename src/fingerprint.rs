//! Canonical cache keys derived from request parameters.
//!
//! Two requests with the same effective parameters must map to the
//! same key no matter what order the parameters arrived in, so the
//! fingerprint sorts pairs before encoding. The endpoint is part of
//! the key to keep `/render` and `/metrics/find` results apart.

use crate::types::QueryParams;

/// A stable, canonical key for one request.
///
/// Sorts parameter pairs by `(key, value)` and percent-encodes them,
/// prefixed with the endpoint path.
pub fn fingerprint(endpoint: &str, params: &QueryParams) -> String {
    let mut pairs: Vec<&(String, String)> = params.pairs().iter().collect();
    pairs.sort();

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }

    format!("{}?{}", endpoint, serializer.finish())
}
