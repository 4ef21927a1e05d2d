//! Error types for image stack operations

use std::io;
use thiserror::Error;

use crate::axes::Axis;
use crate::tile::TileKey;

/// Image stack errors
#[derive(Debug, Error)]
pub enum StackError {
    /// Invalid configuration, raised before any work starts
    #[error("configuration error: {0}")]
    Config(String),

    /// Pixel values outside the unit interval
    #[error("stack data must lie in the range [0, 1], found min {min} and max {max}")]
    OutOfRange {
        /// Smallest observed value
        min: f32,
        /// Largest observed value
        max: f32,
    },

    /// Shape mismatch between source and destination
    #[error("invalid shape: expected {expected:?}, got {actual:?}")]
    InvalidShape {
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        actual: Vec<usize>,
    },

    /// Data dimensionality disagrees with the declared axes
    #[error("data shape {shape:?} should be the axes {axes:?} followed by (y, x)")]
    AxesMismatch {
        /// Shape of the supplied data
        shape: Vec<usize>,
        /// Declared leading axes
        axes: Vec<Axis>,
    },

    /// Axis not permitted by the selector
    #[error("unexpected axis {axis}, expecting only {expected:?}")]
    UnexpectedAxis {
        /// Offending axis
        axis: Axis,
        /// Axes the selector leaves open
        expected: Vec<Axis>,
    },

    /// Label or pixel index absent from an axis
    #[error("label {label} not found on axis {axis}")]
    LabelNotFound {
        /// Axis that was indexed
        axis: Axis,
        /// Requested label
        label: i64,
    },

    /// Tiles disagree on their physical x/y bounds
    #[error("tiles must be aligned: tile {key} has bounds {actual:?}, expected {expected:?}")]
    MisalignedTiles {
        /// Tile that disagreed
        key: TileKey,
        /// Bounds of the first tile (x_min, x_max, y_min, y_max)
        expected: [f64; 4],
        /// Bounds of the offending tile
        actual: [f64; 4],
    },

    /// Tiles mix unsigned and float pixel kinds
    #[error("all tiles should have the same kind of dtype, found {0:?}")]
    MixedDtypeKinds(Vec<String>),

    /// Tile missing from a collection
    #[error("tile not found: {0}")]
    TileNotFound(TileKey),

    /// Collection without any tiles
    #[error("tile collection is empty")]
    EmptyCollection,

    /// A chunk function failed inside the worker pool
    #[error("chunk function failed for {selector}: {source}")]
    Worker {
        /// Selector of the failing chunk
        selector: String,
        /// Underlying error
        #[source]
        source: Box<StackError>,
    },

    /// Chunk function reported a failure of its own
    #[error("chunk function error: {0}")]
    Chunk(String),

    /// Shared backing store could not be mapped
    #[error("shared memory error: {0}")]
    SharedMemory(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl StackError {
    /// Build a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Build a chunk function error
    pub fn chunk(message: impl Into<String>) -> Self {
        Self::Chunk(message.into())
    }
}

impl From<serde_json::Error> for StackError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for image stack operations
pub type StackResult<T> = Result<T, StackError>;
