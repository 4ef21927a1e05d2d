//! Built-in filters run through the registry against in-memory stacks

use std::collections::BTreeSet;

use approx::assert_relative_eq;
use ndarray::{Array5, ArrayViewD};
use serde_json::json;

use tessera_filter::{ClipPercentile, FilterAlgorithm, FilterRegistry, MatchHistograms};
use tessera_stack::{Axis, EngineConfig, ImageStack, StackError};

fn ramp_stack() -> ImageStack {
    let data = Array5::from_shape_fn((2, 3, 2, 8, 8), |(r, c, z, y, x)| {
        (r * 6 + c * 2 + z) as f32 / 16.0 + (y * 8 + x) as f32 / 4096.0
    });
    ImageStack::from_array(data, None, None).unwrap()
}

fn sorted_chunks(stack: &mut ImageStack, group_by: &BTreeSet<Axis>) -> Vec<Vec<f32>> {
    stack
        .transform(
            |view: ArrayViewD<'_, f32>| {
                let mut values: Vec<f32> = view.iter().copied().collect();
                values.sort_by(f32::total_cmp);
                Ok(values)
            },
            group_by,
            &EngineConfig::with_workers(2),
        )
        .unwrap()
        .into_iter()
        .map(|(values, _)| values)
        .collect()
}

#[test]
fn test_registry_rejects_unknown_and_duplicate() {
    let mut registry = FilterRegistry::builtin();
    let err = registry.create("Deconvolve", &json!({})).err().unwrap();
    assert!(matches!(err, StackError::Config(_)));

    fn noop(params: &serde_json::Value) -> tessera_stack::StackResult<Box<dyn FilterAlgorithm>> {
        Ok(Box::new(ClipPercentile::from_params(params)?))
    }
    assert!(registry.register("MatchHistograms", noop).is_err());
    assert!(registry.register("Stretch", noop).is_ok());
    assert_eq!(
        registry.names(),
        vec!["ClipPercentile", "MatchHistograms", "Stretch"]
    );
}

#[test]
fn test_match_histograms_equalizes_chunks() {
    let registry = FilterRegistry::builtin();
    let filter = registry
        .create("MatchHistograms", &json!({"group_by": ["r", "c"]}))
        .unwrap();

    let mut stack = ramp_stack();
    filter
        .run_in_place(&mut stack, &EngineConfig::with_workers(3))
        .unwrap();

    let group_by: BTreeSet<Axis> = [Axis::Round, Axis::Ch].into_iter().collect();
    let chunks = sorted_chunks(&mut stack, &group_by);
    assert_eq!(chunks.len(), 6);
    for chunk in &chunks[1..] {
        for (a, b) in chunk.iter().zip(&chunks[0]) {
            assert_relative_eq!(*a, *b, epsilon = 1e-6);
        }
    }
    assert!(stack.data().iter().all(|v| (0.0..=1.0).contains(v)));
    assert_eq!(stack.log().len(), 1);
    assert_eq!(stack.log().entries()[0].method, "MatchHistograms");
}

#[test]
fn test_clip_percentile_stretches_every_tile() {
    let filter = ClipPercentile::new(0.0, 100.0, [Axis::Round, Axis::Ch, Axis::Zplane]).unwrap();
    let mut stack = ramp_stack();
    filter
        .run_in_place(&mut stack, &EngineConfig::default())
        .unwrap();

    let tile: ndarray::Array2<f32> = stack.data().slice(ndarray::s![1, 2, 0, .., ..]).to_owned();
    assert_relative_eq!(tile[[0, 0]], 0.0);
    assert_relative_eq!(tile[[7, 7]], 1.0);
    assert_eq!(stack.log().entries()[0].arguments["p_max"], json!(100.0));
}

#[test]
fn test_run_leaves_input_untouched() {
    let stack = ramp_stack();
    let before = stack.data().to_owned();
    let filter = MatchHistograms::new([Axis::Round]);

    let filtered = filter.run(&stack, &EngineConfig::with_workers(2)).unwrap();

    assert_eq!(stack.data(), before.view());
    assert!(stack.log().is_empty());
    assert_eq!(filtered.log().len(), 1);
    assert_ne!(filtered.data(), before.view());
}

#[test]
fn test_filters_log_in_order() {
    let registry = FilterRegistry::builtin();
    let mut stack = ramp_stack();
    let config = EngineConfig::with_workers(2);
    for (name, params) in [
        ("ClipPercentile", json!({"p_min": 1, "p_max": 99})),
        ("MatchHistograms", json!({"group_by": ["c"]})),
    ] {
        registry
            .create(name, &params)
            .unwrap()
            .run_in_place(&mut stack, &config)
            .unwrap();
    }

    let methods: Vec<&str> = stack
        .log()
        .entries()
        .iter()
        .map(|entry| entry.method.as_str())
        .collect();
    assert_eq!(methods, vec!["ClipPercentile", "MatchHistograms"]);
}
