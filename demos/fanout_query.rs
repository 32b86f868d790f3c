//! Fan a discovery query out to the configured backends, then render
//! the leaves that came back.
//!
//! Usage:
//!
//! ```sh
//! cargo run --example fanout_query -- gateway.yml 'foo.*'
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use graphite_fanout::fingerprint::fingerprint;
use graphite_fanout::{backend, Backend, Config, FindCache, HttpBackend, HttpConfig, QueryParams};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().ok_or("usage: fanout_query <config.yml> [glob]")?;
    let glob = args.next().unwrap_or_else(|| "*".to_string());

    let config = Config::from_yaml(&std::fs::read_to_string(&config_path)?)?;

    let backends: Vec<Arc<dyn Backend>> = config
        .backend_addresses()
        .into_iter()
        .map(|address| {
            HttpBackend::new(HttpConfig {
                address,
                timeout: Some(config.timeouts.global),
                connect_timeout: Some(config.timeouts.connect),
                read_timeout: Some(config.timeouts.after_started),
                inflight_limit: config.concurrency_limit_per_server,
                keepalive_interval: Some(config.keep_alive_interval),
                max_idle_conns_per_host: config.max_idle_conns_per_host,
                ..HttpConfig::default()
            })
            .map(|b| Arc::new(b) as Arc<dyn Backend>)
        })
        .collect::<Result<_, _>>()?;

    let find_cache = FindCache::new(
        1000,
        Duration::from_secs(u64::from(config.expire_delay_sec)),
    );
    let ctx = CancellationToken::new();

    let key = fingerprint("/metrics/find", &QueryParams::new().with("query", glob.as_str()));
    let matches = match find_cache.get(&key) {
        Some(hit) => {
            println!("(find cache hit)");
            hit
        }
        None => {
            let matches = backend::find(&ctx, &backends, &glob).await?;
            find_cache.put(&key, matches.clone());
            matches
        }
    };

    println!("{} matches for {}", matches.matches.len(), matches.name);
    for m in &matches.matches {
        println!("  {} leaf={}", m.path, m.is_leaf);
    }

    let leaves: Vec<String> = matches
        .matches
        .iter()
        .filter(|m| m.is_leaf)
        .map(|m| m.path.clone())
        .collect();
    if leaves.is_empty() {
        return Ok(());
    }

    let until = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64;
    let from = until - 3600;
    let metrics = backend::render(&ctx, &backends, from, until, &leaves).await?;

    for metric in &metrics {
        let present = metric.is_absent.iter().filter(|absent| !**absent).count();
        println!(
            "{}: {} points ({} present), step {}s",
            metric.name,
            metric.values.len(),
            present,
            metric.step_time
        );
    }

    Ok(())
}
