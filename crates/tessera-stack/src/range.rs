//! Unit-interval checks and range-restoring policies

use ndarray::{ArrayBase, ArrayViewMutD, Data, Dimension};

use crate::error::{StackError, StackResult};

/// Smallest and largest value, or `None` for an empty array
pub fn min_max<S, D>(data: &ArrayBase<S, D>) -> Option<(f32, f32)>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    data.iter().fold(None, |acc, &v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Fail unless every value lies in [0, 1]
///
/// Any NaN fails, reported as a NaN minimum and maximum.
pub fn check_range<S, D>(data: &ArrayBase<S, D>) -> StackResult<()>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    if data.iter().any(|v| v.is_nan()) {
        return Err(StackError::OutOfRange {
            min: f32::NAN,
            max: f32::NAN,
        });
    }
    match min_max(data) {
        Some((min, max)) if min < 0.0 || max > 1.0 => Err(StackError::OutOfRange { min, max }),
        _ => Ok(()),
    }
}

/// Whether every value lies in [0, 1]
pub fn in_unit_range<S, D>(data: &ArrayBase<S, D>) -> bool
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    check_range(data).is_ok()
}

/// Force values into [0, 1]
///
/// Negatives and NaN become 0 either way. With `rescale`, an array whose max
/// exceeds 1 is divided by that max; otherwise values above 1 become 1.
pub fn preserve_float_range(mut data: ArrayViewMutD<'_, f32>, rescale: bool) {
    data.mapv_inplace(|v| if v < 0.0 || v.is_nan() { 0.0 } else { v });
    if rescale {
        let max = data.iter().copied().fold(0.0f32, f32::max);
        if max > 1.0 {
            data.mapv_inplace(|v| v / max);
        }
    } else {
        data.mapv_inplace(|v| v.min(1.0));
    }
}

/// Slice variant of [`preserve_float_range`], used on the whole store
pub fn preserve_float_range_slice(data: &mut [f32], rescale: bool) {
    for v in data.iter_mut() {
        if *v < 0.0 || v.is_nan() {
            *v = 0.0;
        }
    }
    if rescale {
        let max = data.iter().copied().fold(0.0f32, f32::max);
        if max > 1.0 {
            for v in data.iter_mut() {
                *v /= max;
            }
        }
    } else {
        for v in data.iter_mut() {
            *v = v.min(1.0);
        }
    }
}
