//! Quantile normalization across chunks

use std::collections::BTreeSet;

use ndarray::{ArrayD, ArrayViewD};
use serde_json::{json, Value};
use tracing::debug;

use tessera_stack::{
    ApplyOptions, Axis, ClipMethod, EngineConfig, ImageStack, PipelineComponent, StackError,
    StackResult,
};

use crate::util::{cumulative_quantiles, interp, parse_group_by, sorted, unique_counts};
use crate::FilterAlgorithm;

/// Match the intensity distribution of every chunk to a shared reference
///
/// Chunks are the label combinations of `group_by`. The reference is the
/// element-wise mean of the chunks' sorted intensities, so after filtering
/// every chunk has (up to ties) the same sorted intensity profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchHistograms {
    group_by: BTreeSet<Axis>,
}

impl MatchHistograms {
    /// Filter over the given grouping axes
    pub fn new(group_by: impl IntoIterator<Item = Axis>) -> Self {
        Self {
            group_by: group_by.into_iter().collect(),
        }
    }

    /// Build from JSON parameters: `{"group_by": ["r", "c"]}`
    pub fn from_params(params: &Value) -> StackResult<Self> {
        let group_by = parse_group_by(params.get("group_by"))?
            .ok_or_else(|| StackError::config("MatchHistograms requires group_by"))?;
        Ok(Self { group_by })
    }

    /// Grouping axes
    pub fn group_by(&self) -> &BTreeSet<Axis> {
        &self.group_by
    }

    fn reference(&self, stack: &mut ImageStack, config: &EngineConfig) -> StackResult<Vec<f32>> {
        let chunks = stack.transform(
            |view| Ok(sorted(view.iter().copied())),
            &self.group_by,
            config,
        )?;
        let Some(((first, _), rest)) = chunks.split_first() else {
            return Ok(Vec::new());
        };

        let mut sum: Vec<f64> = first.iter().map(|&v| f64::from(v)).collect();
        for (values, _) in rest {
            for (acc, &v) in sum.iter_mut().zip(values) {
                *acc += f64::from(v);
            }
        }
        let n = chunks.len() as f64;
        Ok(sum.into_iter().map(|v| (v / n) as f32).collect())
    }
}

/// Map `source` onto the distribution of the sorted `reference`
fn match_cumulative(source: ArrayViewD<'_, f32>, reference: &[f32]) -> ArrayD<f32> {
    let (src_values, src_counts) = unique_counts(&sorted(source.iter().copied()));
    let (ref_values, ref_counts) = unique_counts(reference);
    let src_quantiles = cumulative_quantiles(&src_counts);
    let ref_quantiles = cumulative_quantiles(&ref_counts);
    let ref_values: Vec<f64> = ref_values.iter().map(|&v| f64::from(v)).collect();

    let mapped: Vec<f32> = src_quantiles
        .iter()
        .map(|&q| interp(q, &ref_quantiles, &ref_values) as f32)
        .collect();
    source.mapv(|v| {
        let ix = src_values.partition_point(|&u| u < v);
        mapped.get(ix).copied().unwrap_or(v)
    })
}

impl PipelineComponent for MatchHistograms {
    fn method_name(&self) -> String {
        "MatchHistograms".to_string()
    }

    fn arguments(&self) -> Value {
        let axes: Vec<String> = self.group_by.iter().map(ToString::to_string).collect();
        json!({ "group_by": axes })
    }
}

impl FilterAlgorithm for MatchHistograms {
    fn run_in_place(&self, stack: &mut ImageStack, config: &EngineConfig) -> StackResult<()> {
        if config.verbose {
            debug!("Calculating reference distribution over {:?}", self.group_by);
        }
        let reference = self.reference(stack, config)?;
        let options = ApplyOptions::default()
            .group_by(self.group_by.iter().copied())
            .clip_method(ClipMethod::Clip)
            .engine(config.clone());
        stack.apply_in_place(
            |view| Ok(match_cumulative(view, &reference)),
            &options,
        )?;
        stack.update_log(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_match_cumulative_maps_ranks() {
        let source = array![0.3f32, 0.1, 0.2, 0.4].into_dyn();
        let reference = [0.0f32, 0.2, 0.4, 0.6];
        let matched = match_cumulative(source.view(), &reference);
        assert_eq!(matched, array![0.4f32, 0.0, 0.2, 0.6].into_dyn());
    }

    #[test]
    fn test_ties_share_a_value() {
        let source = array![0.5f32, 0.5, 0.1, 0.9].into_dyn();
        let reference = [0.1f32, 0.2, 0.3, 0.4];
        let matched = match_cumulative(source.view(), &reference);
        assert_eq!(matched[0], matched[1]);
        assert!(matched[2] < matched[0] && matched[0] < matched[3]);
    }

    #[test]
    fn test_params() {
        let filter = MatchHistograms::from_params(&json!({"group_by": ["r", "c"]})).unwrap();
        assert_eq!(filter, MatchHistograms::new([Axis::Round, Axis::Ch]));
        assert!(MatchHistograms::from_params(&json!({})).is_err());
        assert_eq!(filter.arguments(), json!({"group_by": ["r", "c"]}));
    }
}
