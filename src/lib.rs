//! # Graphite Fanout
//!
//! Scatter/gather client core for federating Graphite metric queries
//! across a fleet of storage backends.
//!
//! This crate provides the building blocks a query gateway runs on:
//! **backend clients** that talk to individual storage peers with
//! bounded in-flight concurrency and per-request deadlines, a
//! **scatter/gather** layer that fans one query out to every peer and
//! tolerates partial failure, a **merger** that reconciles overlapping
//! replica responses into one logical result, and small best-effort
//! **caches** that short-circuit repeated work.
//!
//! Expression evaluation, response rendering, and HTTP handler
//! plumbing belong in the gateway built on top. This crate provides
//! what runs *underneath* each request.
//!
//! ## Core Concepts
//!
//! - **[`Backend`]** — object-safe trait for one storage peer.
//!   [`HttpBackend`] is the production implementation; [`MockBackend`]
//!   answers from closures for tests.
//! - **[`backend::scatter_gather`]** — raw parallel fan-out returning
//!   one [`BackendResponse`](types::BackendResponse) per surviving
//!   peer.
//! - **[`backend::find`] / [`backend::info`] / [`backend::render`]** —
//!   the merged, typed fan-out surface.
//! - **[`merge`]** — pure reconciliation: leaf-wins for discovery,
//!   per-host records for metadata, first-non-absent-wins for
//!   datapoints.
//! - **[`FindCache`] / [`cache::QueryCache`]** — volatile, best-effort
//!   caches keyed by request [`fingerprint`](fingerprint::fingerprint).
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use graphite_fanout::{backend, Backend, HttpBackend, HttpConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backends: Vec<Arc<dyn Backend>> = vec![
//!         Arc::new(HttpBackend::new(HttpConfig {
//!             address: "10.0.0.1:8080".into(),
//!             inflight_limit: 1024,
//!             ..HttpConfig::default()
//!         })?),
//!         Arc::new(HttpBackend::new(HttpConfig {
//!             address: "10.0.0.2:8080".into(),
//!             inflight_limit: 1024,
//!             ..HttpConfig::default()
//!         })?),
//!     ];
//!
//!     let ctx = CancellationToken::new();
//!     let matches = backend::find(&ctx, &backends, "foo.*").await?;
//!     for m in &matches.matches {
//!         println!("{} leaf={}", m.path, m.is_leaf);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Cancellation is cooperative: every operation takes a
//! [`CancellationToken`](tokio_util::sync::CancellationToken), and
//! cancelling it unwinds every in-flight task, returns limiter permits,
//! and abandons open response bodies.

pub mod backend;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod limiter;
pub mod merge;
pub mod types;

pub use backend::{Backend, HttpBackend, HttpConfig, MockBackend, ProbeCallback};
pub use cache::{FindCache, MemoryQueryCache, NullQueryCache, QueryCache, RemoteQueryCache};
pub use codec::{Codec, JsonCodec};
pub use config::Config;
pub use error::{combine_errors, FanoutError, Result};
pub use limiter::Limiter;
pub use types::{BackendResponse, Info, Match, Matches, Metric, QueryParams, Retention};
