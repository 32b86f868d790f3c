//! Decoding of backend response bodies into domain values.
//!
//! The core treats bodies as opaque bytes; a [`Codec`] turns them into
//! the types of [`crate::types`]. [`JsonCodec`] handles the JSON wire
//! format; protobuf and pickle bodies are decoded by external codecs
//! implementing the same trait.
//!
//! Wire shapes (JSON):
//!
//! ```text
//! find:   [{"path": "foo.bar", "isLeaf": true}, ...]
//! info:   [{"name": ..., "aggregationMethod": ..., "maxRetention": ...,
//!           "xFilesFactor": ..., "retentions": [{"secondsPerPoint": ...,
//!           "numberOfPoints": ...}]}, ...]
//! render: [{"name": ..., "startTime": ..., "stopTime": ..., "stepTime": ...,
//!           "values": [1.0, null, ...]}, ...]
//! ```
//!
//! Absent datapoints are `null` on the wire and become
//! `is_absent[i] == true` with a value of `0.0`.

use serde::Deserialize;

use crate::types::{Info, Match, Metric, Retention};

/// A codec failure. The backend client tags it with the peer address
/// before surfacing it as [`crate::FanoutError::Decode`].
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct DecodeError(pub String);

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError(err.to_string())
    }
}

/// Decodes backend response bodies into domain values.
///
/// Implementations are pure: no I/O, no shared state. `Info` records
/// are returned without a `host`; the backend client fills in its own
/// address.
pub trait Codec: Send + Sync {
    /// Value of the `format` query parameter this codec corresponds to.
    fn format(&self) -> &'static str;

    /// Decode a discovery response into match entries.
    fn decode_find(&self, body: &[u8]) -> Result<Vec<Match>, DecodeError>;

    /// Decode a metadata response.
    fn decode_info(&self, body: &[u8]) -> Result<Vec<Info>, DecodeError>;

    /// Decode a render response into time series.
    fn decode_render(&self, body: &[u8]) -> Result<Vec<Metric>, DecodeError>;
}

/// The built-in JSON codec. This is the default for [`crate::backend::HttpBackend`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMatch {
    path: String,
    is_leaf: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRetention {
    seconds_per_point: u32,
    number_of_points: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInfo {
    name: String,
    aggregation_method: String,
    max_retention: i64,
    x_files_factor: f32,
    retentions: Vec<WireRetention>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMetric {
    name: String,
    start_time: i64,
    stop_time: i64,
    step_time: i64,
    values: Vec<Option<f64>>,
}

impl Codec for JsonCodec {
    fn format(&self) -> &'static str {
        "json"
    }

    fn decode_find(&self, body: &[u8]) -> Result<Vec<Match>, DecodeError> {
        let wire: Vec<WireMatch> = serde_json::from_slice(body)?;
        Ok(wire
            .into_iter()
            .map(|m| Match {
                path: m.path,
                is_leaf: m.is_leaf,
            })
            .collect())
    }

    fn decode_info(&self, body: &[u8]) -> Result<Vec<Info>, DecodeError> {
        let wire: Vec<WireInfo> = serde_json::from_slice(body)?;
        Ok(wire
            .into_iter()
            .map(|i| Info {
                host: String::new(),
                name: i.name,
                aggregation_method: i.aggregation_method,
                max_retention: i.max_retention,
                x_files_factor: i.x_files_factor,
                retentions: i
                    .retentions
                    .into_iter()
                    .map(|r| Retention {
                        seconds_per_point: r.seconds_per_point,
                        number_of_points: r.number_of_points,
                    })
                    .collect(),
            })
            .collect())
    }

    fn decode_render(&self, body: &[u8]) -> Result<Vec<Metric>, DecodeError> {
        let wire: Vec<WireMetric> = serde_json::from_slice(body)?;
        Ok(wire
            .into_iter()
            .map(|m| {
                let mut values = Vec::with_capacity(m.values.len());
                let mut is_absent = Vec::with_capacity(m.values.len());
                for v in m.values {
                    match v {
                        Some(v) => {
                            values.push(v);
                            is_absent.push(false);
                        }
                        None => {
                            values.push(0.0);
                            is_absent.push(true);
                        }
                    }
                }
                Metric {
                    name: m.name,
                    start_time: m.start_time,
                    stop_time: m.stop_time,
                    step_time: m.step_time,
                    values,
                    is_absent,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_find() {
        let body = br#"[{"path": "foo.bar", "isLeaf": true}, {"path": "foo.b", "isLeaf": false}]"#;
        let matches = JsonCodec.decode_find(body).unwrap();

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].path, "foo.bar");
        assert!(matches[0].is_leaf);
        assert_eq!(matches[1].path, "foo.b");
        assert!(!matches[1].is_leaf);
    }

    #[test]
    fn test_decode_find_empty() {
        let matches = JsonCodec.decode_find(b"[]").unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_decode_info() {
        let body = br#"[{
            "name": "foo.bar",
            "aggregationMethod": "average",
            "maxRetention": 157680000,
            "xFilesFactor": 0.5,
            "retentions": [{"secondsPerPoint": 60, "numberOfPoints": 43200}]
        }]"#;
        let infos = JsonCodec.decode_info(body).unwrap();

        assert_eq!(infos.len(), 1);
        let info = &infos[0];
        assert_eq!(info.host, "");
        assert_eq!(info.name, "foo.bar");
        assert_eq!(info.aggregation_method, "average");
        assert_eq!(info.max_retention, 157680000);
        assert_eq!(info.x_files_factor, 0.5);
        assert_eq!(
            info.retentions,
            vec![Retention {
                seconds_per_point: 60,
                number_of_points: 43200
            }]
        );
    }

    #[test]
    fn test_decode_render_nulls_become_absent() {
        let body = br#"[{
            "name": "foo.bar",
            "startTime": 1510913280,
            "stopTime": 1510913880,
            "stepTime": 60,
            "values": [null, 1510913759, 1510913818]
        }]"#;
        let metrics = JsonCodec.decode_render(body).unwrap();

        assert_eq!(metrics.len(), 1);
        let metric = &metrics[0];
        assert_eq!(metric.name, "foo.bar");
        assert_eq!(metric.start_time, 1510913280);
        assert_eq!(metric.stop_time, 1510913880);
        assert_eq!(metric.step_time, 60);
        assert_eq!(metric.values, vec![0.0, 1510913759.0, 1510913818.0]);
        assert_eq!(metric.is_absent, vec![true, false, false]);
        assert_eq!(metric.values.len(), metric.is_absent.len());
    }

    #[test]
    fn test_decode_render_garbage_fails() {
        let err = JsonCodec.decode_render(b"yo").unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn test_decode_find_wrong_shape_fails() {
        assert!(JsonCodec.decode_find(br#"{"path": "foo"}"#).is_err());
    }
}
