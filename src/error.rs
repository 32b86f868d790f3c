use std::time::Duration;
use thiserror::Error;

/// Errors produced by the fan-out core and its components.
///
/// The taxonomy is closed: every failure a caller can observe is one of
/// these kinds. Per-backend variants carry the peer address so that an
/// aggregated error still names each failing peer.
#[derive(Error, Debug)]
pub enum FanoutError {
    /// The caller's cancellation context fired before the work finished.
    #[error("request cancelled")]
    Cancelled,

    /// A per-request deadline expired during limiter entry, send, or receive.
    #[error("backend {address}: timed out after {after:?}")]
    Timeout {
        /// Address of the backend the request was bound for.
        address: String,
        /// The deadline that expired.
        after: Duration,
    },

    /// Low-level transport failure: dial, TLS, read.
    #[error("backend {address}: transport error: {source}")]
    Transport {
        /// Address of the failing backend.
        address: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The backend answered with a non-2xx status.
    #[error("backend {address}: HTTP {status}: {body}")]
    Remote {
        /// Address of the responding backend.
        address: String,
        /// HTTP status code (>= 400 in practice).
        status: u16,
        /// A snippet of the response body, for logs.
        body: String,
    },

    /// The backend's response body could not be decoded by the codec.
    #[error("backend {address}: decode error: {message}")]
    Decode {
        /// Address of the backend whose body failed to decode.
        address: String,
        /// Codec failure description.
        message: String,
    },

    /// Two replicas of the same metric disagree on step time.
    /// Scoped to one metric name; other names merge normally.
    #[error("metric {name}: inconsistent step times {left} and {right}")]
    InconsistentStep {
        /// The metric name whose replicas disagree.
        name: String,
        /// Step time of the first replica seen.
        left: i64,
        /// The conflicting step time.
        right: i64,
    },

    /// A programming error, e.g. an unpaired limiter release.
    /// Surfaced immediately and never retried.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Every backend in a fan-out failed. Holds one error per cause.
    #[error("{}", format_aggregated(.0))]
    Aggregated(Vec<FanoutError>),
}

pub type Result<T> = std::result::Result<T, FanoutError>;

fn format_aggregated(errs: &[FanoutError]) -> String {
    let msgs: Vec<String> = errs.iter().map(|e| e.to_string()).collect();
    format!("multiple errors:\n{}", msgs.join("\n"))
}

/// Collapse a list of errors into at most one.
///
/// No errors yields `None`; a single error is returned verbatim;
/// anything more becomes [`FanoutError::Aggregated`], whose message
/// joins the individual messages with newlines.
pub fn combine_errors(mut errs: Vec<FanoutError>) -> Option<FanoutError> {
    match errs.len() {
        0 => None,
        1 => Some(errs.remove(0)),
        _ => Some(FanoutError::Aggregated(errs)),
    }
}
