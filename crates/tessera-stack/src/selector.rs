//! Selectors describe a region of a stack in terms of axis labels
//!
//! Grouping axes (round, channel, z-plane) are indexed by label and their
//! ranges are inclusive. The pixel axes are indexed by position and their
//! ranges are half-open.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{ArrayBase, Axis as NdAxis, Data, IxDyn, RawData, Slice};
use serde::{Deserialize, Serialize};

use crate::axes::{Axis, N_DIMS};

/// Index applied to a single axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Index {
    /// A single label; the axis is pinned
    Label(i64),
    /// A range of labels; `None` bounds extend to the edge
    Range {
        /// First label (inclusive)
        start: Option<i64>,
        /// Last label (inclusive for grouping axes, exclusive for pixel axes)
        end: Option<i64>,
    },
}

impl Index {
    /// Range with both bounds
    pub fn range(start: i64, end: i64) -> Self {
        Self::Range {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Range from `start` to the edge
    pub fn starting_at(start: i64) -> Self {
        Self::Range {
            start: Some(start),
            end: None,
        }
    }

    /// Range from the edge up to `end`
    pub fn up_to(end: i64) -> Self {
        Self::Range {
            start: None,
            end: Some(end),
        }
    }

    /// Whether this index pins the axis to a single label
    pub fn is_label(&self) -> bool {
        matches!(self, Self::Label(_))
    }
}

impl From<i64> for Index {
    fn from(label: i64) -> Self {
        Self::Label(label)
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = |b: &Option<i64>| b.map(|v| v.to_string()).unwrap_or_default();
        match self {
            Self::Label(label) => write!(f, "{label}"),
            Self::Range { start, end } => write!(f, "{}..{}", bound(start), bound(end)),
        }
    }
}

/// Mapping from axes to indices; unspecified axes mean "all"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector(BTreeMap<Axis, Index>);

impl Selector {
    /// Empty selector covering the whole stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, axis: Axis, index: impl Into<Index>) -> Self {
        self.0.insert(axis, index.into());
        self
    }

    /// Insert or replace the index of an axis
    pub fn insert(&mut self, axis: Axis, index: impl Into<Index>) {
        self.0.insert(axis, index.into());
    }

    /// Index of an axis, if specified
    pub fn get(&self, axis: Axis) -> Option<Index> {
        self.0.get(&axis).copied()
    }

    /// Label an axis is pinned to, if any
    pub fn label(&self, axis: Axis) -> Option<i64> {
        match self.0.get(&axis) {
            Some(Index::Label(label)) => Some(*label),
            _ => None,
        }
    }

    /// Iterate over specified axes in storage order
    pub fn iter(&self) -> impl Iterator<Item = (Axis, Index)> + '_ {
        self.0.iter().map(|(axis, index)| (*axis, *index))
    }

    /// Whether no axis is specified
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of specified axes
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(Axis, Index)> for Selector {
    fn from_iter<T: IntoIterator<Item = (Axis, Index)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(axis, index)| format!("{axis}: {index}"))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Resolved positional index of one storage dimension
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Position {
    /// Single position; the dimension is dropped from views
    Pin(usize),
    /// Half-open positional span
    Span(usize, usize),
}

impl Position {
    pub(crate) fn full(len: usize) -> Self {
        Self::Span(0, len)
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Pin(_) => 1,
            Self::Span(start, end) => end.saturating_sub(*start),
        }
    }

    pub(crate) fn start(&self) -> usize {
        match self {
            Self::Pin(ix) | Self::Span(ix, _) => *ix,
        }
    }

    /// Span covering the same positions, keeping the dimension
    pub(crate) fn keep_dim(&self) -> Self {
        match self {
            Self::Pin(ix) => Self::Span(*ix, ix + 1),
            span => span.clone(),
        }
    }
}

/// One resolved position per storage dimension
pub(crate) type SliceList = [Position; N_DIMS];

/// Narrow an array in place to the positions of a slice list
///
/// Pinned dimensions are collapsed to length one; call [`drop_pinned`]
/// afterwards to remove them.
pub(crate) fn restrict<S: RawData>(array: &mut ArrayBase<S, IxDyn>, slices: &SliceList) {
    for (dim, position) in slices.iter().enumerate() {
        match position {
            Position::Pin(ix) => array.collapse_axis(NdAxis(dim), *ix),
            Position::Span(start, end) => {
                array.slice_axis_inplace(NdAxis(dim), Slice::from(*start..*end));
            }
        }
    }
}

/// Remove the dimensions a slice list pins
pub(crate) fn drop_pinned<S: Data>(
    mut array: ArrayBase<S, IxDyn>,
    slices: &SliceList,
) -> ArrayBase<S, IxDyn> {
    for (dim, position) in slices.iter().enumerate().rev() {
        if matches!(position, Position::Pin(_)) {
            array = array.index_axis_move(NdAxis(dim), 0);
        }
    }
    array
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    #[test]
    fn test_selector_display_is_ordered() {
        let selector = Selector::new()
            .with(Axis::Zplane, 3)
            .with(Axis::Round, Index::range(1, 2))
            .with(Axis::X, Index::up_to(10));
        assert_eq!(selector.to_string(), "{r: 1..2, z: 3, x: ..10}");
        assert_eq!(selector.label(Axis::Zplane), Some(3));
        assert_eq!(selector.label(Axis::Round), None);
    }

    #[test]
    fn test_restrict_and_drop_pinned() {
        let array = ArrayD::from_shape_fn(IxDyn(&[2, 3, 4, 5, 6]), |ix| {
            (ix[0] * 1000 + ix[1] * 100 + ix[2] * 10) as f32
        });
        let slices: SliceList = [
            Position::Pin(1),
            Position::Span(1, 3),
            Position::Pin(2),
            Position::full(5),
            Position::full(6),
        ];
        let mut view = array.view();
        restrict(&mut view, &slices);
        assert_eq!(view.shape(), &[1, 2, 1, 5, 6]);
        let view = drop_pinned(view, &slices);
        assert_eq!(view.shape(), &[2, 5, 6]);
        assert_eq!(view[[0, 0, 0]], 1120.0);
        assert_eq!(view[[1, 4, 5]], 1220.0);
    }

    #[test]
    fn test_position_keep_dim() {
        assert_eq!(Position::Pin(4).keep_dim(), Position::Span(4, 5));
        assert_eq!(Position::Span(1, 3).len(), 2);
        assert_eq!(Position::Pin(7).start(), 7);
    }
}
