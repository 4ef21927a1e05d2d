//! Percentile clipping with contrast stretch

use std::collections::BTreeSet;

use ndarray::{ArrayD, ArrayViewD};
use serde_json::{json, Value};

use tessera_stack::{
    default_group_by, ApplyOptions, Axis, ClipMethod, EngineConfig, ImageStack,
    PipelineComponent, StackError, StackResult,
};

use crate::util::{parse_group_by, percentile, sorted};
use crate::FilterAlgorithm;

/// Clip each chunk to its `[p_min, p_max]` percentile window and stretch
/// that window onto [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct ClipPercentile {
    p_min: f64,
    p_max: f64,
    group_by: BTreeSet<Axis>,
}

impl ClipPercentile {
    /// Percentiles must satisfy `0 <= p_min <= p_max <= 100`
    pub fn new(
        p_min: f64,
        p_max: f64,
        group_by: impl IntoIterator<Item = Axis>,
    ) -> StackResult<Self> {
        if !(0.0..=100.0).contains(&p_min) || !(0.0..=100.0).contains(&p_max) || p_min > p_max {
            return Err(StackError::config(format!(
                "percentiles must satisfy 0 <= p_min <= p_max <= 100, got {p_min} and {p_max}"
            )));
        }
        Ok(Self {
            p_min,
            p_max,
            group_by: group_by.into_iter().collect(),
        })
    }

    /// Build from JSON parameters: `{"p_min": 1, "p_max": 99, "group_by": ["r"]}`
    ///
    /// Missing percentiles default to 0 and 100; `group_by` defaults to one
    /// chunk per tile.
    pub fn from_params(params: &Value) -> StackResult<Self> {
        let number = |key: &str, default: f64| -> StackResult<f64> {
            match params.get(key) {
                None => Ok(default),
                Some(v) => v
                    .as_f64()
                    .ok_or_else(|| StackError::config(format!("{key} must be a number, got {v}"))),
            }
        };
        let group_by = parse_group_by(params.get("group_by"))?.unwrap_or_else(default_group_by);
        Self::new(number("p_min", 0.0)?, number("p_max", 100.0)?, group_by)
    }

    fn clip_chunk(&self, view: ArrayViewD<'_, f32>) -> ArrayD<f32> {
        let values = sorted(view.iter().copied());
        let lo = percentile(&values, self.p_min);
        let hi = percentile(&values, self.p_max);
        let span = hi - lo;
        view.mapv(|v| {
            let clipped = v.clamp(lo, hi);
            if span > 0.0 {
                (clipped - lo) / span
            } else {
                0.0
            }
        })
    }
}

impl PipelineComponent for ClipPercentile {
    fn method_name(&self) -> String {
        "ClipPercentile".to_string()
    }

    fn arguments(&self) -> Value {
        let axes: Vec<String> = self.group_by.iter().map(ToString::to_string).collect();
        json!({ "p_min": self.p_min, "p_max": self.p_max, "group_by": axes })
    }
}

impl FilterAlgorithm for ClipPercentile {
    fn run_in_place(&self, stack: &mut ImageStack, config: &EngineConfig) -> StackResult<()> {
        let options = ApplyOptions::default()
            .group_by(self.group_by.iter().copied())
            .clip_method(ClipMethod::Clip)
            .engine(config.clone());
        stack.apply_in_place(|view| Ok(self.clip_chunk(view)), &options)?;
        stack.update_log(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_invalid_percentiles() {
        assert!(ClipPercentile::new(-1.0, 50.0, []).is_err());
        assert!(ClipPercentile::new(60.0, 50.0, []).is_err());
        assert!(ClipPercentile::new(10.0, 101.0, []).is_err());
        assert!(ClipPercentile::new(10.0, 10.0, []).is_ok());
    }

    #[test]
    fn test_clip_chunk_stretches_window() {
        let filter = ClipPercentile::new(25.0, 75.0, []).unwrap();
        let data = array![0.0f32, 0.1, 0.2, 0.3, 0.4].into_dyn();
        let clipped = filter.clip_chunk(data.view());
        assert_relative_eq!(clipped[0], 0.0);
        assert_relative_eq!(clipped[2], 0.5, epsilon = 1e-6);
        assert_relative_eq!(clipped[4], 1.0);
    }

    #[test]
    fn test_flat_chunk_goes_to_zero() {
        let filter = ClipPercentile::new(0.0, 100.0, []).unwrap();
        let data = array![0.7f32, 0.7].into_dyn();
        assert_eq!(filter.clip_chunk(data.view()), array![0.0f32, 0.0].into_dyn());
    }

    #[test]
    fn test_params_defaults() {
        let filter = ClipPercentile::from_params(&json!({"p_max": 99.5})).unwrap();
        assert_eq!(filter.p_min, 0.0);
        assert_eq!(filter.p_max, 99.5);
        assert_eq!(filter.group_by, default_group_by());
        assert!(ClipPercentile::from_params(&json!({"p_min": "low"})).is_err());
    }
}
