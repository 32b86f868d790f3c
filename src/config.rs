//! Gateway configuration.
//!
//! Loaded from YAML. Durations are written the way operators expect
//! (`"20s"`, `"200ms"`); unknown keys are ignored so one config file
//! can be shared with collaborating processes.

use std::time::Duration;

use serde::Deserialize;

/// Per-request deadlines.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timeouts {
    /// Default deadline for a whole backend request.
    #[serde(deserialize_with = "de_duration")]
    pub global: Duration,
    /// Dial deadline.
    #[serde(deserialize_with = "de_duration")]
    pub connect: Duration,
    /// Receive deadline once the first byte has arrived.
    #[serde(deserialize_with = "de_duration")]
    pub after_started: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            global: Duration::from_secs(10),
            connect: Duration::from_millis(200),
            after_started: Duration::from_secs(2),
        }
    }
}

/// Configuration recognized by the fan-out core.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// HTTP bind address. Consumed by the handler layer, not the core.
    pub listen: String,

    /// Capacity of each backend's limiter. 0 means unlimited.
    #[serde(alias = "concurrencyLimit")]
    pub concurrency_limit_per_server: usize,

    /// HTTP transport tuning.
    pub max_idle_conns_per_host: usize,

    /// HTTP transport tuning.
    #[serde(deserialize_with = "de_duration")]
    pub keep_alive_interval: Duration,

    pub timeouts: Timeouts,

    /// Find cache TTL, seconds.
    pub expire_delay_sec: u32,

    /// Ordered list of peer base URLs.
    pub backends: Vec<String>,

    /// Enables legacy quirks in the codec layer.
    #[serde(rename = "graphite09compat")]
    pub graphite09_compat: bool,

    /// Latency-histogram bucket count.
    pub buckets: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: ":8080".into(),
            concurrency_limit_per_server: 0,
            max_idle_conns_per_host: 100,
            keep_alive_interval: Duration::from_secs(30),
            timeouts: Timeouts::default(),
            expire_delay_sec: 600,
            backends: Vec::new(),
            graphite09_compat: false,
            buckets: 10,
        }
    }
}

impl Config {
    /// Parse a YAML config document.
    pub fn from_yaml(input: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(input)
    }

    /// Backend addresses with any `http://` scheme stripped, ready for
    /// [`crate::backend::HttpConfig`].
    pub fn backend_addresses(&self) -> Vec<String> {
        self.backends
            .iter()
            .map(|b| {
                b.strip_prefix("http://")
                    .unwrap_or(b)
                    .trim_end_matches('/')
                    .to_string()
            })
            .collect()
    }
}

/// Parse durations of the form `"200ms"`, `"20s"`, `"1m30s"`, `"2h"`.
fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".into());
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return Err(format!("invalid duration {:?}", input));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid duration {:?}", input))?;
        rest = &rest[digits..];

        let unit = rest
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .count();
        let component = match &rest[..unit] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            _ => return Err(format!("invalid duration {:?}", input)),
        };
        rest = &rest[unit..];
        total += component;
    }

    Ok(total)
}

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}
