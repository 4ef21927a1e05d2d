//! Axis-grouped parallel apply/transform engine
//!
//! The stack is split into one chunk per combination of labels along the
//! grouping axes. Chunks are processed on a rayon pool built for the call.
//! Every job split rayon makes attaches to the shared region once (through
//! `map_init`) and then receives mutable views of its chunks, so a worker
//! may attach several times per call. Results come back in enumeration order.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{debug, info};

use crate::axes::{grouping_axes, Axis, N_AXES, N_DIMS};
use crate::config::{ClipMethod, EngineConfig};
use crate::error::{StackError, StackResult};
use crate::range::{preserve_float_range, preserve_float_range_slice};
use crate::selector::{Position, Selector, SliceList};
use crate::shm::SharedRegion;

/// One unit of work: the pinned labels and the positions they resolve to
#[derive(Debug, Clone)]
pub(crate) struct Chunk {
    pub(crate) selector: Selector,
    pub(crate) slices: SliceList,
}

/// Reject groupings the engine cannot split on
pub(crate) fn validate_group_by(group_by: &BTreeSet<Axis>) -> StackResult<()> {
    if let Some(axis) = group_by.iter().find(|axis| axis.is_spatial()) {
        return Err(StackError::config(format!(
            "cannot group by pixel axis {axis}, expected a subset of {:?}",
            grouping_axes()
        )));
    }
    Ok(())
}

/// Enumerate chunks lexicographically by label, grouping axes in storage
/// order with the first one outermost
pub(crate) fn enumerate_chunks(
    labels: &[Vec<i64>; N_AXES],
    raw_shape: [usize; N_DIMS],
    group_by: &BTreeSet<Axis>,
) -> StackResult<Vec<Chunk>> {
    validate_group_by(group_by)?;

    let axes: Vec<Axis> = grouping_axes()
        .into_iter()
        .filter(|axis| group_by.contains(axis))
        .collect();
    let sizes: Vec<usize> = axes
        .iter()
        .map(|axis| labels[axis.storage_index()].len())
        .collect();
    if sizes.iter().any(|&n| n == 0) {
        return Ok(Vec::new());
    }

    let total: usize = sizes.iter().product();
    let mut chunks = Vec::with_capacity(total);
    let mut counter = vec![0usize; axes.len()];
    for _ in 0..total {
        let mut slices: SliceList = raw_shape.map(Position::full);
        let mut selector = Selector::new();
        for (axis, &ix) in axes.iter().zip(&counter) {
            let dim = axis.storage_index();
            slices[dim] = Position::Pin(ix);
            selector.insert(*axis, labels[dim][ix]);
        }
        chunks.push(Chunk { selector, slices });

        // odometer step, last axis fastest
        for pos in (0..counter.len()).rev() {
            counter[pos] += 1;
            if counter[pos] < sizes[pos] {
                break;
            }
            counter[pos] = 0;
        }
    }
    Ok(chunks)
}

/// Run `func` over every chunk on a fresh pool and collect results in
/// chunk order
///
/// The first error aborts the call; no partial results are returned.
pub(crate) fn run_chunks<R, F>(
    region: &mut SharedRegion,
    chunks: &[Chunk],
    func: F,
    config: &EngineConfig,
) -> StackResult<Vec<R>>
where
    R: Send,
    F: Fn(ArrayViewMutD<'_, f32>) -> StackResult<R> + Sync,
{
    config.validate()?;
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let n_workers = config.effective_workers().min(chunks.len());
    let pool = ThreadPoolBuilder::new()
        .num_threads(n_workers)
        .thread_name(|i| format!("tessera-worker-{i}"))
        .build()
        .map_err(|e| StackError::config(format!("failed to build worker pool: {e}")))?;

    let total = chunks.len();
    let completed = AtomicUsize::new(0);
    let handle = region.handle();
    debug!(
        "Dispatching {} chunks to {} workers over region {:?}",
        total,
        n_workers,
        handle.layout().shape
    );

    let results = pool.install(|| {
        chunks
            .par_iter()
            .map_init(
                || handle.attach(),
                |attached, chunk| {
                    // SAFETY: chunks pin distinct label combinations of the
                    // grouping axes, so their positions never overlap.
                    let view = unsafe { attached.chunk_mut(&chunk.slices) };
                    let result = func(view).map_err(|e| StackError::Worker {
                        selector: chunk.selector.to_string(),
                        source: Box::new(e),
                    })?;
                    if config.verbose {
                        let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                        debug!("Chunk {} done ({}/{})", chunk.selector, done, total);
                    }
                    Ok(result)
                },
            )
            .collect::<StackResult<Vec<R>>>()
    })?;

    if config.verbose {
        info!("Processed {} chunks with {} workers", total, n_workers);
    }
    Ok(results)
}

/// Replace every chunk with `func`'s output and enforce the clip policy
///
/// With [`ClipMethod::ScaleByImage`] chunk results are written raw and one
/// global pass runs after the pool has finished. That pass also runs when a
/// chunk fails, so the region never stays outside [0, 1].
pub(crate) fn apply_chunks<F>(
    region: &mut SharedRegion,
    chunks: &[Chunk],
    func: F,
    clip_method: ClipMethod,
    config: &EngineConfig,
) -> StackResult<()>
where
    F: Fn(ArrayViewD<'_, f32>) -> StackResult<ArrayD<f32>> + Sync,
{
    let outcome = run_chunks(
        region,
        chunks,
        |mut view| {
            let result = func(view.view())?;
            if result.shape() != view.shape() {
                return Err(StackError::InvalidShape {
                    expected: view.shape().to_vec(),
                    actual: result.shape().to_vec(),
                });
            }
            view.assign(&result);
            match clip_method {
                ClipMethod::Clip => preserve_float_range(view, false),
                ClipMethod::ScaleByChunk => preserve_float_range(view, true),
                ClipMethod::ScaleByImage => {}
            }
            Ok(())
        },
        config,
    );

    if clip_method == ClipMethod::ScaleByImage {
        preserve_float_range_slice(region.as_mut_slice(), true);
    }
    outcome.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::RegionLayout;

    fn labels(n: [usize; N_AXES]) -> [Vec<i64>; N_AXES] {
        n.map(|len| (0..len as i64).collect())
    }

    #[test]
    fn test_enumeration_order() {
        let group_by: BTreeSet<Axis> = [Axis::Round, Axis::Zplane].into_iter().collect();
        let chunks = enumerate_chunks(&labels([2, 3, 2]), [2, 3, 2, 4, 4], &group_by).unwrap();
        let order: Vec<(i64, i64)> = chunks
            .iter()
            .map(|c| {
                (
                    c.selector.label(Axis::Round).unwrap(),
                    c.selector.label(Axis::Zplane).unwrap(),
                )
            })
            .collect();
        assert_eq!(order, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
        assert_eq!(chunks[0].slices[Axis::Ch.storage_index()], Position::full(3));
    }

    #[test]
    fn test_enumeration_uses_labels() {
        let labels = [vec![3, 7], vec![0], vec![0]];
        let group_by: BTreeSet<Axis> = [Axis::Round].into_iter().collect();
        let chunks = enumerate_chunks(&labels, [2, 1, 1, 2, 2], &group_by).unwrap();
        assert_eq!(chunks[1].selector.label(Axis::Round), Some(7));
        assert_eq!(chunks[1].slices[0], Position::Pin(1));
    }

    #[test]
    fn test_empty_group_by_is_single_chunk() {
        let chunks =
            enumerate_chunks(&labels([2, 2, 2]), [2, 2, 2, 3, 3], &BTreeSet::new()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].selector.is_empty());
    }

    #[test]
    fn test_spatial_group_by_rejected() {
        let group_by: BTreeSet<Axis> = [Axis::Round, Axis::Y].into_iter().collect();
        let result = enumerate_chunks(&labels([1, 1, 1]), [1, 1, 1, 2, 2], &group_by);
        assert!(matches!(result, Err(StackError::Config(_))));
    }

    #[test]
    fn test_zero_label_axis_gives_no_chunks() {
        let group_by: BTreeSet<Axis> = [Axis::Ch].into_iter().collect();
        let chunks = enumerate_chunks(&labels([2, 0, 1]), [2, 0, 1, 2, 2], &group_by).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_run_chunks_writes_each_chunk() {
        let mut region = SharedRegion::zeroed(RegionLayout::f32([2, 3, 1, 2, 2])).unwrap();
        let group_by: BTreeSet<Axis> = [Axis::Round, Axis::Ch].into_iter().collect();
        let chunks = enumerate_chunks(&labels([2, 3, 1]), [2, 3, 1, 2, 2], &group_by).unwrap();
        let shapes = run_chunks(
            &mut region,
            &chunks,
            |mut view| {
                view.fill(0.5);
                Ok(view.shape().to_vec())
            },
            &EngineConfig::with_workers(3),
        )
        .unwrap();
        assert_eq!(shapes.len(), 6);
        assert!(shapes.iter().all(|s| s == &vec![1, 2, 2]));
        assert!(region.as_slice().iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_run_chunks_wraps_errors() {
        let mut region = SharedRegion::zeroed(RegionLayout::f32([2, 1, 1, 2, 2])).unwrap();
        let group_by: BTreeSet<Axis> = [Axis::Round].into_iter().collect();
        let chunks = enumerate_chunks(&labels([2, 1, 1]), [2, 1, 1, 2, 2], &group_by).unwrap();
        let result: StackResult<Vec<()>> = run_chunks(
            &mut region,
            &chunks,
            |_| Err(StackError::chunk("boom")),
            &EngineConfig::with_workers(1),
        );
        match result {
            Err(StackError::Worker { selector, source }) => {
                assert_eq!(selector, "{r: 0}");
                assert!(matches!(*source, StackError::Chunk(_)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_apply_rejects_shape_change() {
        let mut region = SharedRegion::zeroed(RegionLayout::f32([1, 1, 1, 2, 2])).unwrap();
        let chunks =
            enumerate_chunks(&labels([1, 1, 1]), [1, 1, 1, 2, 2], &BTreeSet::new()).unwrap();
        let result = apply_chunks(
            &mut region,
            &chunks,
            |_| Ok(ArrayD::zeros(ndarray::IxDyn(&[3]))),
            ClipMethod::Clip,
            &EngineConfig::with_workers(1),
        );
        assert!(matches!(
            result,
            Err(StackError::Worker { source, .. }) if matches!(*source, StackError::InvalidShape { .. })
        ));
    }
}
