//! Single-peer HTTP backend client.
//!
//! [`HttpBackend`] talks to one storage peer over plain HTTP. Every
//! request is bracketed by the peer's [`Limiter`]: enter, exchange,
//! release, on every exit path. The per-request deadline covers both
//! limiter entry and the network exchange, and the caller's
//! cancellation context is honored at each suspension point.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::Backend;
use crate::codec::{Codec, DecodeError, JsonCodec};
use crate::error::{FanoutError, Result};
use crate::limiter::Limiter;
use crate::types::{BackendResponse, Info, Matches, Metric, QueryParams};

/// Invoked after every probe with the peer address and the outcome.
pub type ProbeCallback = Arc<dyn Fn(&str, &Result<Matches>) + Send + Sync>;

/// Configuration for one [`HttpBackend`].
#[derive(Clone, Default)]
pub struct HttpConfig {
    /// Peer address as `host:port`, no scheme. The scheme is always
    /// `http`.
    pub address: String,

    /// Per-request wall-clock deadline. `None` means no deadline.
    pub timeout: Option<Duration>,

    /// Dial deadline, applied at the transport.
    pub connect_timeout: Option<Duration>,

    /// Receive deadline once the response has started arriving.
    pub read_timeout: Option<Duration>,

    /// Capacity of the peer's limiter. 0 means unlimited.
    pub inflight_limit: usize,

    /// TCP keep-alive interval for pooled connections.
    pub keepalive_interval: Option<Duration>,

    /// Idle connection pool bound. 0 keeps the transport default.
    pub max_idle_conns_per_host: usize,

    /// Response body decoder. Defaults to [`JsonCodec`].
    pub codec: Option<Arc<dyn Codec>>,

    /// Pre-built HTTP client. When set, the transport tuning fields
    /// above are ignored in favor of the client's own settings.
    pub client: Option<reqwest::Client>,

    /// Observer for probe outcomes.
    pub on_probe: Option<ProbeCallback>,
}

/// HTTP client for a single storage peer.
pub struct HttpBackend {
    address: String,
    timeout: Option<Duration>,
    client: reqwest::Client,
    limiter: Limiter,
    codec: Arc<dyn Codec>,
    on_probe: Option<ProbeCallback>,
}

impl HttpBackend {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let HttpConfig {
            address,
            timeout,
            connect_timeout,
            read_timeout,
            inflight_limit,
            keepalive_interval,
            max_idle_conns_per_host,
            codec,
            client,
            on_probe,
        } = config;

        let client = match client {
            Some(client) => client,
            None => {
                let mut builder = reqwest::Client::builder();
                if let Some(connect) = connect_timeout {
                    builder = builder.connect_timeout(connect);
                }
                if let Some(read) = read_timeout {
                    builder = builder.read_timeout(read);
                }
                if let Some(keepalive) = keepalive_interval {
                    builder = builder.tcp_keepalive(keepalive);
                }
                if max_idle_conns_per_host > 0 {
                    builder = builder.pool_max_idle_per_host(max_idle_conns_per_host);
                }
                builder.build().map_err(|e| {
                    FanoutError::InvariantViolation(format!("failed to build HTTP client: {e}"))
                })?
            }
        };

        Ok(Self {
            address,
            timeout,
            client,
            limiter: Limiter::new(inflight_limit),
            codec: codec.unwrap_or_else(|| Arc::new(JsonCodec)),
            on_probe,
        })
    }

    /// Full URL for an endpoint: prepend a single `/` when missing,
    /// keep trailing slashes and any query string verbatim.
    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("http://{}{}", self.address, endpoint)
        } else {
            format!("http://{}/{}", self.address, endpoint)
        }
    }

    fn request_url(&self, endpoint: &str, params: &QueryParams) -> String {
        let base = self.url(endpoint);
        if params.is_empty() {
            base
        } else if base.contains('?') {
            format!("{}&{}", base, params.encode())
        } else {
            format!("{}?{}", base, params.encode())
        }
    }

    async fn with_deadline<T, F>(&self, deadline: Option<tokio::time::Instant>, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        match deadline {
            Some(at) => match tokio::time::timeout_at(at, fut).await {
                Ok(result) => result,
                Err(_) => Err(FanoutError::Timeout {
                    address: self.address.clone(),
                    after: self.timeout.unwrap_or_default(),
                }),
            },
            None => fut.await,
        }
    }

    /// Send the request and read the whole body, racing the caller's
    /// cancellation.
    async fn exchange(
        &self,
        ctx: &CancellationToken,
        endpoint: &str,
        params: &QueryParams,
    ) -> Result<BackendResponse> {
        let url = self.request_url(endpoint, params);

        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(FanoutError::Cancelled),
            result = self.send(&url) => result,
        }
    }

    async fn send(&self, url: &str) -> Result<BackendResponse> {
        debug!(backend = %self.address, %url, "backend request");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(FanoutError::Remote {
                address: self.address.clone(),
                status: status.as_u16(),
                body: snippet(&body),
            });
        }

        Ok(BackendResponse {
            address: self.address.clone(),
            status: status.as_u16(),
            body: body.to_vec(),
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> FanoutError {
        if err.is_timeout() {
            FanoutError::Timeout {
                address: self.address.clone(),
                after: self.timeout.unwrap_or_default(),
            }
        } else {
            FanoutError::Transport {
                address: self.address.clone(),
                source: err,
            }
        }
    }

    fn decode_error(&self, err: DecodeError) -> FanoutError {
        FanoutError::Decode {
            address: self.address.clone(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn find(&self, ctx: &CancellationToken, query: &str) -> Result<Matches> {
        let params = QueryParams::new()
            .with("format", self.codec.format())
            .with("query", query);
        let response = self.call(ctx, "/metrics/find", &params).await?;
        let matches = self
            .codec
            .decode_find(&response.body)
            .map_err(|e| self.decode_error(e))?;
        Ok(Matches {
            name: query.to_string(),
            matches,
        })
    }

    async fn info(&self, ctx: &CancellationToken, name: &str) -> Result<Vec<Info>> {
        let params = QueryParams::new()
            .with("format", self.codec.format())
            .with("target", name);
        let response = self.call(ctx, "/info", &params).await?;
        let mut infos = self
            .codec
            .decode_info(&response.body)
            .map_err(|e| self.decode_error(e))?;
        for info in &mut infos {
            info.host = self.address.clone();
        }
        Ok(infos)
    }

    async fn render(
        &self,
        ctx: &CancellationToken,
        from: i64,
        until: i64,
        targets: &[String],
    ) -> Result<Vec<Metric>> {
        let mut params = QueryParams::new()
            .with("format", self.codec.format())
            .with("from", from.to_string())
            .with("until", until.to_string());
        for target in targets {
            params.push("target", target);
        }

        let response = self.call(ctx, "/render", &params).await?;
        self.codec
            .decode_render(&response.body)
            .map_err(|e| self.decode_error(e))
    }

    async fn call(
        &self,
        ctx: &CancellationToken,
        endpoint: &str,
        params: &QueryParams,
    ) -> Result<BackendResponse> {
        let started = std::time::Instant::now();
        let deadline = self.timeout.map(|d| tokio::time::Instant::now() + d);

        // Limiter entry shares the request deadline. Nothing touches
        // the network until a permit is held.
        self.with_deadline(deadline, self.limiter.acquire(ctx))
            .await?;

        let result = self
            .with_deadline(deadline, self.exchange(ctx, endpoint, params))
            .await;

        counter!("fanout_requests_total", "backend" => self.address.clone()).increment(1);
        histogram!("fanout_request_duration_seconds", "backend" => self.address.clone())
            .record(started.elapsed().as_secs_f64());
        if result.is_err() {
            counter!("fanout_request_failures_total", "backend" => self.address.clone())
                .increment(1);
        }

        match self.limiter.release() {
            Ok(()) => result,
            Err(release_err) => {
                error!(backend = %self.address, error = %release_err, "limiter out of sync");
                if result.is_err() {
                    result
                } else {
                    Err(release_err)
                }
            }
        }
    }

    async fn probe(&self) {
        let ctx = CancellationToken::new();
        let result = self.find(&ctx, "*").await;

        match &result {
            Ok(matches) => {
                debug!(backend = %self.address, entries = matches.matches.len(), "probe ok")
            }
            Err(err) => warn!(backend = %self.address, error = %err, "probe failed"),
        }

        if let Some(on_probe) = &self.on_probe {
            on_probe(&self.address, &result);
        }
    }

    fn address(&self) -> &str {
        &self.address
    }
}

fn snippet(body: &[u8]) -> String {
    const LIMIT: usize = 512;
    let end = body.len().min(LIMIT);
    String::from_utf8_lossy(&body[..end]).into_owned()
}
