//! Backend abstraction and parallel fan-out.
//!
//! A [`Backend`] is one storage peer serving a subset of the metric
//! namespace. The free functions in this module fan one request out to
//! every peer, tolerate partial failure, and merge what comes back:
//!
//! ```text
//! find/info/render ──► one task per Backend ──► merge ──► one result
//!                          │
//!                ┌─────────┴─────────┐
//!           HttpBackend         MockBackend
//! ```
//!
//! Per-backend failures are captured, not propagated: as long as one
//! peer answers, the caller gets a (possibly reduced) result and the
//! losers are logged. Only when every peer fails does the combined
//! error surface.

pub mod http;
pub mod mock;

pub use http::{HttpBackend, HttpConfig, ProbeCallback};
pub use mock::MockBackend;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{combine_errors, FanoutError, Result};
use crate::merge::{merge_find, merge_info, merge_render};
use crate::types::{BackendResponse, Info, Matches, Metric, QueryParams};

/// One storage peer.
///
/// Implementations are long-lived and process-scoped; all methods take
/// a cancellation context and return domain values decoded by the
/// backend's codec. The trait is object-safe and used as
/// `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Discover metric names matching a glob.
    async fn find(&self, ctx: &CancellationToken, query: &str) -> Result<Matches>;

    /// Fetch metadata for one metric name.
    async fn info(&self, ctx: &CancellationToken, name: &str) -> Result<Vec<Info>>;

    /// Fetch datapoints for the given targets over `[from, until]`.
    async fn render(
        &self,
        ctx: &CancellationToken,
        from: i64,
        until: i64,
        targets: &[String],
    ) -> Result<Vec<Metric>>;

    /// Low-level request: GET `endpoint` with `params`, returning the
    /// raw body without decoding.
    async fn call(
        &self,
        ctx: &CancellationToken,
        endpoint: &str,
        params: &QueryParams,
    ) -> Result<BackendResponse>;

    /// Out-of-band health check. Observers learn the outcome through
    /// the backend's probe callback and logs.
    async fn probe(&self);

    /// `host:port` identity, used for logging and `Info` tagging.
    fn address(&self) -> &str;
}

/// Issue one raw request to every backend in parallel.
///
/// Returns the successful responses in unspecified order. An empty
/// backend list yields an empty `Ok`. When at least one backend
/// succeeds the failures are logged and swallowed; when all fail the
/// combined error is returned.
pub async fn scatter_gather(
    ctx: &CancellationToken,
    backends: &[Arc<dyn Backend>],
    endpoint: &str,
    params: &QueryParams,
) -> Result<Vec<BackendResponse>> {
    if ctx.is_cancelled() {
        return Err(FanoutError::Cancelled);
    }
    if backends.is_empty() {
        return Ok(Vec::new());
    }

    let endpoint = endpoint.to_string();
    let params = params.clone();
    let results = fan_out(ctx, backends, move |backend, ctx| {
        let endpoint = endpoint.clone();
        let params = params.clone();
        Box::pin(async move { backend.call(&ctx, &endpoint, &params).await })
    })
    .await;

    let (responses, failures) = split_results(results);
    settle("scatter_gather", responses, failures)
}

/// Fan a discovery query out to all backends and merge the results.
pub async fn find(
    ctx: &CancellationToken,
    backends: &[Arc<dyn Backend>],
    query: &str,
) -> Result<Matches> {
    if ctx.is_cancelled() {
        return Err(FanoutError::Cancelled);
    }
    if backends.is_empty() {
        return Ok(Matches::empty(query));
    }

    let query_owned = query.to_string();
    let results = fan_out(ctx, backends, move |backend, ctx| {
        let query = query_owned.clone();
        Box::pin(async move { backend.find(&ctx, &query).await })
    })
    .await;

    let (groups, failures) = split_results(results);
    let groups = settle("find", groups, failures)?;
    Ok(merge_find(groups))
}

/// Fan a metadata query out to all backends. Records stay tagged by
/// host; no field-level reconciliation happens.
pub async fn info(
    ctx: &CancellationToken,
    backends: &[Arc<dyn Backend>],
    name: &str,
) -> Result<Vec<Info>> {
    if ctx.is_cancelled() {
        return Err(FanoutError::Cancelled);
    }
    if backends.is_empty() {
        return Ok(Vec::new());
    }

    let name_owned = name.to_string();
    let results = fan_out(ctx, backends, move |backend, ctx| {
        let name = name_owned.clone();
        Box::pin(async move { backend.info(&ctx, &name).await })
    })
    .await;

    let (groups, failures) = split_results(results);
    let groups = settle("info", groups, failures)?;
    Ok(merge_info(groups))
}

/// Fan a render out to all backends and reconcile overlapping series.
///
/// A metric name whose replicas disagree on step time is dropped and
/// logged; the other names come back merged.
pub async fn render(
    ctx: &CancellationToken,
    backends: &[Arc<dyn Backend>],
    from: i64,
    until: i64,
    targets: &[String],
) -> Result<Vec<Metric>> {
    if ctx.is_cancelled() {
        return Err(FanoutError::Cancelled);
    }
    if backends.is_empty() {
        return Ok(Vec::new());
    }

    let targets: Arc<[String]> = targets.to_vec().into();
    let results = fan_out(ctx, backends, move |backend, ctx| {
        let targets = Arc::clone(&targets);
        Box::pin(async move { backend.render(&ctx, from, until, &targets).await })
    })
    .await;

    let (groups, failures) = split_results(results);
    let groups = settle("render", groups, failures)?;

    let (metrics, merge_errors) = merge_render(groups);
    for err in &merge_errors {
        warn!(error = %err, "dropped metric group during render merge");
    }
    Ok(metrics)
}

/// Spawn one task per backend and collect every outcome. No task waits
/// on any other; a cancelled context makes each task finish on its own.
async fn fan_out<T, F>(
    ctx: &CancellationToken,
    backends: &[Arc<dyn Backend>],
    op: F,
) -> Vec<Result<T>>
where
    T: Send + 'static,
    F: Fn(Arc<dyn Backend>, CancellationToken) -> BoxFuture<'static, Result<T>>,
{
    let mut handles = Vec::with_capacity(backends.len());
    for backend in backends {
        handles.push(tokio::spawn(op(Arc::clone(backend), ctx.clone())));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(match handle.await {
            Ok(result) => result,
            Err(err) => Err(FanoutError::InvariantViolation(format!(
                "fan-out task panicked: {err}"
            ))),
        });
    }
    results
}

fn split_results<T>(results: Vec<Result<T>>) -> (Vec<T>, Vec<FanoutError>) {
    let mut oks = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(value) => oks.push(value),
            Err(err) => failures.push(err),
        }
    }
    (oks, failures)
}

/// Apply the partial-failure policy: any success wins, all-failure
/// surfaces the combined error.
fn settle<T>(operation: &'static str, oks: Vec<T>, failures: Vec<FanoutError>) -> Result<Vec<T>> {
    if oks.is_empty() {
        if let Some(err) = combine_errors(failures) {
            return Err(err);
        }
        return Ok(Vec::new());
    }

    if !failures.is_empty() {
        counter!("fanout_partial_failures_total", "operation" => operation)
            .increment(failures.len() as u64);
        for err in &failures {
            warn!(operation, error = %err, "backend failed during fan-out");
        }
    }
    Ok(oks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Match;
    use std::time::Duration;

    fn backends(mocks: Vec<MockBackend>) -> Vec<Arc<dyn Backend>> {
        mocks
            .into_iter()
            .map(|m| Arc::new(m) as Arc<dyn Backend>)
            .collect()
    }

    fn ok_body(address: &str, body: &str) -> MockBackend {
        let body = body.as_bytes().to_vec();
        let addr = address.to_string();
        MockBackend::new(address).on_call(move |_, _| {
            Ok(BackendResponse {
                address: addr.clone(),
                status: 200,
                body: body.clone(),
            })
        })
    }

    fn failing(address: &str, status: u16) -> MockBackend {
        let addr = address.to_string();
        MockBackend::new(address).on_call(move |_, _| {
            Err(FanoutError::Remote {
                address: addr.clone(),
                status,
                body: "Bad".into(),
            })
        })
    }

    #[tokio::test]
    async fn test_scatter_gather_empty_backends() {
        let ctx = CancellationToken::new();
        let responses = scatter_gather(&ctx, &[], "/render", &QueryParams::new())
            .await
            .unwrap();
        assert!(responses.is_empty());
    }

    #[tokio::test]
    async fn test_scatter_gather_collects_all_responses() {
        let ctx = CancellationToken::new();
        let backends = backends((0..10).map(|i| ok_body(&format!("b{i}:80"), &i.to_string())).collect());

        let responses = scatter_gather(&ctx, &backends, "/render", &QueryParams::new())
            .await
            .unwrap();

        assert_eq!(responses.len(), 10);
        let mut bodies: Vec<String> = responses
            .iter()
            .map(|r| String::from_utf8_lossy(&r.body).into_owned())
            .collect();
        bodies.sort();
        bodies.dedup();
        assert_eq!(bodies.len(), 10);
    }

    #[tokio::test]
    async fn test_scatter_gather_partial_failure_is_success() {
        let ctx = CancellationToken::new();
        let mut mocks: Vec<MockBackend> =
            (0..9).map(|i| ok_body(&format!("b{i}:80"), "yo")).collect();
        mocks.push(failing("slow:80", 500));

        let responses = scatter_gather(&ctx, &backends(mocks), "/render", &QueryParams::new())
            .await
            .unwrap();

        assert_eq!(responses.len(), 9);
    }

    #[tokio::test]
    async fn test_scatter_gather_all_fail_aggregates() {
        let ctx = CancellationToken::new();
        let mocks = vec![failing("a:80", 500), failing("b:80", 500)];

        let err = scatter_gather(&ctx, &backends(mocks), "/render", &QueryParams::new())
            .await
            .unwrap_err();

        match &err {
            FanoutError::Aggregated(inner) => {
                assert_eq!(inner.len(), 2);
                assert!(inner
                    .iter()
                    .all(|e| matches!(e, FanoutError::Remote { status: 500, .. })));
            }
            other => panic!("expected Aggregated, got {:?}", other),
        }
        assert!(err.to_string().contains("a:80"));
        assert!(err.to_string().contains("b:80"));
    }

    #[tokio::test]
    async fn test_scatter_gather_single_failure_verbatim() {
        let ctx = CancellationToken::new();
        let mocks = vec![failing("a:80", 503)];

        let err = scatter_gather(&ctx, &backends(mocks), "/render", &QueryParams::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FanoutError::Remote { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_scatter_gather_pre_cancelled_short_circuits() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let mocks = vec![ok_body("a:80", "yo")];

        let err = scatter_gather(&ctx, &backends(mocks), "/render", &QueryParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FanoutError::Cancelled));
    }

    #[tokio::test]
    async fn test_scatter_gather_cancellation_reaches_inflight_tasks() {
        let ctx = CancellationToken::new();
        let mocks: Vec<MockBackend> = (0..4)
            .map(|i| ok_body(&format!("b{i}:80"), "yo").with_delay(Duration::from_secs(30)))
            .collect();

        let gather = {
            let ctx = ctx.clone();
            let backends = backends(mocks);
            tokio::spawn(async move {
                scatter_gather(&ctx, &backends, "/render", &QueryParams::new()).await
            })
        };

        tokio::task::yield_now().await;
        ctx.cancel();

        let err = tokio::time::timeout(Duration::from_secs(5), gather)
            .await
            .expect("scatter did not unwind after cancellation")
            .unwrap()
            .unwrap_err();

        match err {
            FanoutError::Aggregated(inner) => {
                assert!(inner.iter().all(|e| matches!(e, FanoutError::Cancelled)));
            }
            FanoutError::Cancelled => {}
            other => panic!("expected cancellation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_find_fans_out_and_merges() {
        let ctx = CancellationToken::new();

        let one = MockBackend::new("a:80").on_find(|query| {
            Ok(Matches {
                name: query.into(),
                matches: vec![Match {
                    path: "foo.bar".into(),
                    is_leaf: true,
                }],
            })
        });
        let two = MockBackend::new("b:80").on_find(|query| {
            Ok(Matches {
                name: query.into(),
                matches: vec![
                    Match {
                        path: "foo.bar".into(),
                        is_leaf: false,
                    },
                    Match {
                        path: "foo.baz".into(),
                        is_leaf: true,
                    },
                ],
            })
        });

        let merged = find(&ctx, &backends(vec![one, two]), "foo.ba*")
            .await
            .unwrap();

        assert_eq!(merged.name, "foo.ba*");
        assert_eq!(
            merged.matches,
            vec![
                Match {
                    path: "foo.bar".into(),
                    is_leaf: true
                },
                Match {
                    path: "foo.baz".into(),
                    is_leaf: true
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_find_empty_backends() {
        let ctx = CancellationToken::new();
        let merged = find(&ctx, &[], "foo.*").await.unwrap();
        assert_eq!(merged, Matches::empty("foo.*"));
    }

    #[tokio::test]
    async fn test_find_partial_failure_returns_survivors() {
        let ctx = CancellationToken::new();

        let good = MockBackend::new("a:80").on_find(|query| {
            Ok(Matches {
                name: query.into(),
                matches: vec![Match {
                    path: "foo.bar".into(),
                    is_leaf: true,
                }],
            })
        });
        let bad = MockBackend::new("b:80").on_find(|_| {
            Err(FanoutError::Decode {
                address: "b:80".into(),
                message: "truncated body".into(),
            })
        });

        let merged = find(&ctx, &backends(vec![good, bad]), "foo.*")
            .await
            .unwrap();
        assert_eq!(merged.matches.len(), 1);
    }

    #[tokio::test]
    async fn test_info_tags_hosts_separately() {
        let ctx = CancellationToken::new();

        fn record(host: &str) -> Info {
            Info {
                host: host.into(),
                name: "foo.bar".into(),
                aggregation_method: "average".into(),
                max_retention: 157680000,
                x_files_factor: 0.5,
                retentions: Vec::new(),
            }
        }

        let one = MockBackend::new("a:80").on_info(|_| Ok(vec![record("a:80")]));
        let two = MockBackend::new("b:80").on_info(|_| Ok(vec![record("b:80")]));

        let merged = info(&ctx, &backends(vec![one, two]), "foo.bar")
            .await
            .unwrap();

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].host, "a:80");
        assert_eq!(merged[1].host, "b:80");
    }

    #[tokio::test]
    async fn test_render_merges_replicas() {
        let ctx = CancellationToken::new();

        fn series(points: Vec<Option<f64>>) -> Metric {
            Metric {
                name: "foo.bar".into(),
                start_time: 100,
                stop_time: 130,
                step_time: 10,
                values: points.iter().map(|p| p.unwrap_or(0.0)).collect(),
                is_absent: points.iter().map(|p| p.is_none()).collect(),
            }
        }

        let one = MockBackend::new("a:80")
            .on_render(|_, _, _| Ok(vec![series(vec![None, Some(2.0), Some(3.0)])]));
        let two = MockBackend::new("b:80")
            .on_render(|_, _, _| Ok(vec![series(vec![Some(1.0), None, None])]));

        let merged = render(
            &ctx,
            &backends(vec![one, two]),
            100,
            130,
            &["foo.bar".to_string()],
        )
        .await
        .unwrap();

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].values, vec![1.0, 2.0, 3.0]);
        assert_eq!(merged[0].is_absent, vec![false, false, false]);
    }

    #[tokio::test]
    async fn test_render_all_fail() {
        let ctx = CancellationToken::new();
        let one = MockBackend::new("a:80").on_render(|_, _, _| {
            Err(FanoutError::Remote {
                address: "a:80".into(),
                status: 500,
                body: "Bad".into(),
            })
        });

        let err = render(
            &ctx,
            &backends(vec![one]),
            100,
            130,
            &["foo.bar".to_string()],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FanoutError::Remote { .. }));
    }
}
