//! Mock backend for testing without live peers.
//!
//! [`MockBackend`] answers each operation from a configurable closure,
//! so downstream consumers can write deterministic tests against this
//! crate. Unconfigured operations succeed with empty results.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::Backend;
use crate::error::{FanoutError, Result};
use crate::types::{BackendResponse, Info, Matches, Metric, QueryParams};

type FindFn = Arc<dyn Fn(&str) -> Result<Matches> + Send + Sync>;
type InfoFn = Arc<dyn Fn(&str) -> Result<Vec<Info>> + Send + Sync>;
type RenderFn = Arc<dyn Fn(i64, i64, &[String]) -> Result<Vec<Metric>> + Send + Sync>;
type CallFn = Arc<dyn Fn(&str, &QueryParams) -> Result<BackendResponse> + Send + Sync>;

/// A test backend answering from closures.
///
/// An optional artificial delay runs before each operation and is
/// interrupted by cancellation, which makes deadline and cancellation
/// paths testable without a network.
#[derive(Clone)]
pub struct MockBackend {
    address: String,
    delay: Option<Duration>,
    find_fn: Option<FindFn>,
    info_fn: Option<InfoFn>,
    render_fn: Option<RenderFn>,
    call_fn: Option<CallFn>,
    probes: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            delay: None,
            find_fn: None,
            info_fn: None,
            render_fn: None,
            call_fn: None,
            probes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Answer `find` with the given closure.
    pub fn on_find(mut self, f: impl Fn(&str) -> Result<Matches> + Send + Sync + 'static) -> Self {
        self.find_fn = Some(Arc::new(f));
        self
    }

    /// Answer `info` with the given closure.
    pub fn on_info(
        mut self,
        f: impl Fn(&str) -> Result<Vec<Info>> + Send + Sync + 'static,
    ) -> Self {
        self.info_fn = Some(Arc::new(f));
        self
    }

    /// Answer `render` with the given closure.
    pub fn on_render(
        mut self,
        f: impl Fn(i64, i64, &[String]) -> Result<Vec<Metric>> + Send + Sync + 'static,
    ) -> Self {
        self.render_fn = Some(Arc::new(f));
        self
    }

    /// Answer `call` with the given closure.
    pub fn on_call(
        mut self,
        f: impl Fn(&str, &QueryParams) -> Result<BackendResponse> + Send + Sync + 'static,
    ) -> Self {
        self.call_fn = Some(Arc::new(f));
        self
    }

    /// Sleep this long before answering, unless cancelled first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `probe` has run.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::Relaxed)
    }

    async fn wait(&self, ctx: &CancellationToken) -> Result<()> {
        if ctx.is_cancelled() {
            return Err(FanoutError::Cancelled);
        }
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = ctx.cancelled() => return Err(FanoutError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn find(&self, ctx: &CancellationToken, query: &str) -> Result<Matches> {
        self.wait(ctx).await?;
        match &self.find_fn {
            Some(f) => f(query),
            None => Ok(Matches::empty(query)),
        }
    }

    async fn info(&self, ctx: &CancellationToken, name: &str) -> Result<Vec<Info>> {
        self.wait(ctx).await?;
        match &self.info_fn {
            Some(f) => f(name),
            None => Ok(Vec::new()),
        }
    }

    async fn render(
        &self,
        ctx: &CancellationToken,
        from: i64,
        until: i64,
        targets: &[String],
    ) -> Result<Vec<Metric>> {
        self.wait(ctx).await?;
        match &self.render_fn {
            Some(f) => f(from, until, targets),
            None => Ok(Vec::new()),
        }
    }

    async fn call(
        &self,
        ctx: &CancellationToken,
        endpoint: &str,
        params: &QueryParams,
    ) -> Result<BackendResponse> {
        self.wait(ctx).await?;
        match &self.call_fn {
            Some(f) => f(endpoint, params),
            None => Ok(BackendResponse {
                address: self.address.clone(),
                status: 200,
                body: Vec::new(),
            }),
        }
    }

    async fn probe(&self) {
        self.probes.fetch_add(1, Ordering::Relaxed);
    }

    fn address(&self) -> &str {
        &self.address
    }
}
