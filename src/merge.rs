//! Cross-backend reconciliation of overlapping responses.
//!
//! These functions are pure: codec failures are handled at the backend
//! boundary, so the merger only ever sees decoded domain values. All
//! merges are commutative with respect to input order; where order
//! matters (render fill-in), inputs are first put into a documented
//! deterministic order.

use std::collections::{BTreeMap, HashSet};

use tracing::warn;

use crate::error::{FanoutError, Result};
use crate::types::{Info, Match, Matches, Metric};

/// Merge discovery results from several backends.
///
/// The output is the union of entries deduplicated by `path`, with
/// leaf-wins semantics: a path any backend calls a leaf is a leaf.
/// Entries come back sorted by `path` so downstream caching is
/// deterministic. The result's `name` is taken from the first group.
pub fn merge_find(groups: Vec<Matches>) -> Matches {
    let name = groups.first().map(|g| g.name.clone()).unwrap_or_default();

    let mut by_path: BTreeMap<String, bool> = BTreeMap::new();
    for group in groups {
        for m in group.matches {
            let is_leaf = by_path.entry(m.path).or_insert(false);
            *is_leaf = *is_leaf || m.is_leaf;
        }
    }

    Matches {
        name,
        matches: by_path
            .into_iter()
            .map(|(path, is_leaf)| Match { path, is_leaf })
            .collect(),
    }
}

/// Merge metadata responses from several backends.
///
/// Records are grouped by `name` but kept as separate per-host entries
/// with no field-level reconciliation. Duplicate `(host, name)` pairs
/// keep their first occurrence; output is sorted by `(name, host)`.
pub fn merge_info(groups: Vec<Vec<Info>>) -> Vec<Info> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut merged: Vec<Info> = Vec::new();

    for group in groups {
        for info in group {
            if seen.insert((info.host.clone(), info.name.clone())) {
                merged.push(info);
            }
        }
    }

    merged.sort_by(|a, b| (&a.name, &a.host).cmp(&(&b.name, &b.host)));
    merged
}

/// Merge rendered series from several backends.
///
/// Series are grouped by metric name and each group is reconciled
/// pointwise. A group whose replicas disagree on step time is dropped
/// with an [`FanoutError::InconsistentStep`]; the remaining groups are
/// still returned. Output is sorted by metric name.
pub fn merge_render(groups: Vec<Vec<Metric>>) -> (Vec<Metric>, Vec<FanoutError>) {
    let mut by_name: BTreeMap<String, Vec<Metric>> = BTreeMap::new();
    for group in groups {
        for metric in group {
            by_name.entry(metric.name.clone()).or_default().push(metric);
        }
    }

    let mut merged = Vec::with_capacity(by_name.len());
    let mut errors = Vec::new();
    for (name, replicas) in by_name {
        match merge_metrics(&name, replicas) {
            Ok(metric) => merged.push(metric),
            Err(err) => errors.push(err),
        }
    }

    (merged, errors)
}

/// Reconcile all replicas of one metric into a single series.
///
/// Replicas are scanned in ascending `start_time` order (ties keep
/// arrival order). The common window is the intersection of the
/// replica windows; at each aligned timestamp the first replica with a
/// present point supplies the value, and the output is absent only
/// when every replica is.
fn merge_metrics(name: &str, mut replicas: Vec<Metric>) -> Result<Metric> {
    if replicas.len() == 1 {
        return Ok(replicas.remove(0));
    }

    replicas.sort_by_key(|m| m.start_time);

    let step = replicas[0].step_time;
    if step <= 0 {
        return Err(FanoutError::InvariantViolation(format!(
            "metric {}: non-positive step time {}",
            name, step
        )));
    }
    for replica in &replicas[1..] {
        if replica.step_time != step {
            return Err(FanoutError::InconsistentStep {
                name: name.to_string(),
                left: step,
                right: replica.step_time,
            });
        }
    }

    let start = replicas.iter().map(|m| m.start_time).max().unwrap_or(0);
    let stop = replicas.iter().map(|m| m.stop_time).min().unwrap_or(0);

    if stop < start {
        // Disjoint windows: fall back to the freshest replica.
        warn!(metric = name, "replica windows do not overlap, keeping freshest");
        let freshest = replicas
            .into_iter()
            .max_by_key(|m| m.start_time)
            .unwrap_or_default();
        return Ok(freshest);
    }

    let points = ((stop - start) / step) as usize;
    let mut values = vec![0.0; points];
    let mut is_absent = vec![true; points];

    for (i, (value, absent)) in values.iter_mut().zip(is_absent.iter_mut()).enumerate() {
        let t = start + i as i64 * step;
        for replica in &replicas {
            let index = ((t - replica.start_time) / step) as usize;
            if t >= replica.start_time
                && index < replica.values.len()
                && !replica.is_absent[index]
            {
                *value = replica.values[index];
                *absent = false;
                break;
            }
        }
    }

    Ok(Metric {
        name: name.to_string(),
        start_time: start,
        stop_time: stop,
        step_time: step,
        values,
        is_absent,
    })
}
