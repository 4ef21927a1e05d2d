//! Axis registry and stack shape
//!
//! The stack stores its pixels as a 5-d array. The three grouping axes
//! (round, channel, z-plane) take the storage positions declared in
//! [`AXES_DATA`]; y and x always occupy the last two positions.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StackError;

/// Number of grouping (non-spatial) axes
pub const N_AXES: usize = 3;

/// Total number of storage dimensions
pub const N_DIMS: usize = N_AXES + 2;

/// Logical axis of an image stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Imaging round
    Round,
    /// Fluorescence channel
    Ch,
    /// Focal plane
    Zplane,
    /// Pixel row
    Y,
    /// Pixel column
    X,
}

impl Axis {
    /// All axes in declaration order
    pub const ALL: [Axis; N_DIMS] = [Axis::Round, Axis::Ch, Axis::Zplane, Axis::Y, Axis::X];

    /// Short label used in dimension lists and display
    pub const fn label(self) -> &'static str {
        match self {
            Axis::Round => "r",
            Axis::Ch => "c",
            Axis::Zplane => "z",
            Axis::Y => "y",
            Axis::X => "x",
        }
    }

    /// Whether the axis is one of the two pixel axes
    pub const fn is_spatial(self) -> bool {
        matches!(self, Axis::Y | Axis::X)
    }

    /// Storage position of the axis in the 5-d backing array
    pub fn storage_index(self) -> usize {
        match self {
            Axis::Y => N_AXES,
            Axis::X => N_AXES + 1,
            grouping => AXES_DATA
                .iter()
                .find(|data| data.axis == grouping)
                .map(|data| data.order)
                .unwrap_or_else(|| unreachable!("AXES_DATA is checked at compile time")),
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Axis {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "r" | "round" => Ok(Axis::Round),
            "c" | "ch" | "channel" => Ok(Axis::Ch),
            "z" | "zplane" => Ok(Axis::Zplane),
            "y" => Ok(Axis::Y),
            "x" => Ok(Axis::X),
            other => Err(StackError::config(format!("unknown axis: {other}"))),
        }
    }
}

/// Registry entry describing where a grouping axis is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisData {
    /// The grouping axis
    pub axis: Axis,
    /// Storage position, 0..N_AXES
    pub order: usize,
}

/// Storage order of the grouping axes
pub const AXES_DATA: [AxisData; N_AXES] = [
    AxisData { axis: Axis::Round, order: 0 },
    AxisData { axis: Axis::Ch, order: 1 },
    AxisData { axis: Axis::Zplane, order: 2 },
];

const fn registry_is_complete(data: &[AxisData; N_AXES]) -> bool {
    let mut seen_axes = [false; N_AXES];
    let mut seen_orders = [false; N_AXES];
    let mut i = 0;
    while i < N_AXES {
        let axis = data[i].axis as usize;
        let order = data[i].order;
        if axis >= N_AXES || order >= N_AXES || seen_axes[axis] || seen_orders[order] {
            return false;
        }
        seen_axes[axis] = true;
        seen_orders[order] = true;
        i += 1;
    }
    true
}

const _: () = assert!(
    registry_is_complete(&AXES_DATA),
    "AXES_DATA must map round, ch and zplane onto distinct storage positions"
);

/// Grouping axes sorted by storage position
pub fn grouping_axes() -> [Axis; N_AXES] {
    let mut axes = [Axis::Round; N_AXES];
    for data in &AXES_DATA {
        axes[data.order] = data.axis;
    }
    axes
}

/// All five axes in storage order
pub fn storage_dims() -> [Axis; N_DIMS] {
    let grouping = grouping_axes();
    let mut dims = [Axis::Y; N_DIMS];
    dims[..N_AXES].copy_from_slice(&grouping);
    dims[N_AXES] = Axis::Y;
    dims[N_AXES + 1] = Axis::X;
    dims
}

/// Default grouping for apply/transform: one chunk per tile
pub fn default_group_by() -> BTreeSet<Axis> {
    grouping_axes().into_iter().collect()
}

/// Ordered mapping from axis to size, always ending with y and x
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackShape {
    entries: Vec<(Axis, usize)>,
}

impl StackShape {
    /// Build the shape from a raw storage shape
    pub fn from_raw(raw: [usize; N_DIMS]) -> Self {
        let entries = storage_dims()
            .iter()
            .map(|&axis| (axis, raw[axis.storage_index()]))
            .collect();
        Self { entries }
    }

    /// Size of one axis
    pub fn get(&self, axis: Axis) -> usize {
        self.entries
            .iter()
            .find(|(a, _)| *a == axis)
            .map(|(_, size)| *size)
            .unwrap_or(0)
    }

    /// Iterate over (axis, size) pairs in storage order
    pub fn iter(&self) -> impl Iterator<Item = (Axis, usize)> + '_ {
        self.entries.iter().copied()
    }

    /// Axes in storage order
    pub fn axes(&self) -> Vec<Axis> {
        self.entries.iter().map(|(axis, _)| *axis).collect()
    }
}

impl fmt::Display for StackShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|(axis, size)| format!("{axis}: {size}"))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}
