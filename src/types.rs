//! Canonical domain types shared across the fan-out core.
//!
//! All values are immutable after construction by a codec or a backend;
//! the merger and the caches hold them by value. Times are Unix epoch
//! seconds.

use serde::{Deserialize, Serialize};

/// One node in the metric name tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    /// Dotted identifier, e.g. `foo.bar.baz`. Never empty.
    pub path: String,
    /// `true` when `path` names a storable series, `false` for a branch.
    pub is_leaf: bool,
}

/// Result of a discovery query: the queried glob plus its matches.
///
/// Within one `Matches` no two entries share the same
/// `(path, is_leaf)` pair; the merger upholds this by deduplicating on
/// `path` entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matches {
    /// The glob that produced these matches.
    pub name: String,
    /// Ordered match entries.
    pub matches: Vec<Match>,
}

impl Matches {
    /// A discovery result with no entries for the given glob.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            matches: Vec::new(),
        }
    }
}

/// One retention archive: resolution and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retention {
    /// Seconds between datapoints. Always positive.
    pub seconds_per_point: u32,
    /// Number of datapoints held at this resolution.
    pub number_of_points: u32,
}

/// Metadata for one series as reported by one backend.
///
/// Entities are keyed by `(host, name)`: several backends may report
/// the same `name` with differing metadata, and the merger keeps each
/// record tagged by `host` rather than reconciling fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Info {
    /// The backend that reported this record.
    pub host: String,
    /// Metric name.
    pub name: String,
    /// Aggregation method, e.g. `"average"`.
    pub aggregation_method: String,
    /// Longest retention in seconds.
    pub max_retention: i64,
    /// Whisper x-files-factor, in `[0, 1]`.
    pub x_files_factor: f32,
    /// Retention archives, ordered finest first.
    pub retentions: Vec<Retention>,
}

/// A rendered time series.
///
/// Invariants: `stop_time >= start_time`; `values` and `is_absent`
/// have equal length; `stop_time - start_time` is a non-negative
/// multiple of `step_time` within one step of rounding. When
/// `is_absent[i]` is true, `values[i]` carries no meaning and is
/// conventionally `0.0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Series name.
    pub name: String,
    /// Window start, inclusive.
    pub start_time: i64,
    /// Window stop, exclusive.
    pub stop_time: i64,
    /// Seconds between datapoints. Always positive.
    pub step_time: i64,
    /// Datapoint values.
    pub values: Vec<f64>,
    /// Per-point absence markers, same length as `values`.
    pub is_absent: Vec<bool>,
}

/// Raw reply from one peer: body bytes plus HTTP status, tagged with
/// the originating backend for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResponse {
    /// `host:port` of the backend that answered.
    pub address: String,
    /// HTTP status code of the reply.
    pub status: u16,
    /// The full response body.
    pub body: Vec<u8>,
}

/// Ordered query-string parameters for a backend request.
///
/// Keys may repeat (`target` does, on render). Encoding preserves
/// insertion order; [`crate::fingerprint::fingerprint`] produces the
/// order-insensitive canonical form used as a cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a key/value pair.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The pairs in insertion order.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    /// Percent-encode into a query string, preserving insertion order.
    pub fn encode(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.0 {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }
}
