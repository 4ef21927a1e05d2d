//! Sorting, quantile and interpolation helpers shared by filters

use std::collections::BTreeSet;

use serde_json::Value;
use tessera_stack::{Axis, StackError, StackResult};

/// Values in ascending order
pub(crate) fn sorted(values: impl Iterator<Item = f32>) -> Vec<f32> {
    let mut values: Vec<f32> = values.collect();
    values.sort_by(f32::total_cmp);
    values
}

/// Distinct values of a sorted slice with their multiplicities
pub(crate) fn unique_counts(sorted: &[f32]) -> (Vec<f32>, Vec<usize>) {
    let mut values = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    for &v in sorted {
        match (values.last(), counts.last_mut()) {
            (Some(&last), Some(count)) if last == v => *count += 1,
            _ => {
                values.push(v);
                counts.push(1);
            }
        }
    }
    (values, counts)
}

/// Cumulative fraction of samples at or below each distinct value
pub(crate) fn cumulative_quantiles(counts: &[usize]) -> Vec<f64> {
    let total: usize = counts.iter().sum();
    let mut running = 0usize;
    counts
        .iter()
        .map(|&c| {
            running += c;
            running as f64 / total as f64
        })
        .collect()
}

/// Piecewise-linear interpolation of `x` through (`xp`, `fp`)
///
/// `xp` must be ascending; values outside it take the nearest endpoint.
pub(crate) fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let (Some(&x0), Some(&xn)) = (xp.first(), xp.last()) else {
        return 0.0;
    };
    if x <= x0 {
        return fp[0];
    }
    if x >= xn {
        return fp[fp.len() - 1];
    }
    let hi = xp.partition_point(|&p| p <= x);
    let lo = hi - 1;
    let span = xp[hi] - xp[lo];
    if span == 0.0 {
        return fp[hi];
    }
    fp[lo] + (fp[hi] - fp[lo]) * (x - xp[lo]) / span
}

/// Percentile of sorted values, linear between closest ranks
pub(crate) fn percentile(sorted: &[f32], p: f64) -> f32 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (p / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = (rank - lo as f64) as f32;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// Parse a `group_by` parameter: a list of axis names
pub(crate) fn parse_group_by(value: Option<&Value>) -> StackResult<Option<BTreeSet<Axis>>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let names = value
        .as_array()
        .ok_or_else(|| StackError::config(format!("group_by must be a list of axes, got {value}")))?;
    names
        .iter()
        .map(|name| {
            name.as_str()
                .ok_or_else(|| StackError::config(format!("axis names must be strings, got {name}")))?
                .parse::<Axis>()
        })
        .collect::<StackResult<BTreeSet<Axis>>>()
        .map(Some)
}
