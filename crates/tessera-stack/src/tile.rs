//! Tile-level ingestion and export boundary

use std::fmt;
use std::ops::Range;

use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::axes::Axis;
use crate::coords::PhysicalBounds;
use crate::error::StackResult;

/// Free-form metadata attached to tiles and tile collections
pub type Extras = serde_json::Map<String, serde_json::Value>;

/// Identifies one 2-d plane by its round, channel and z-plane labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    /// Round label
    pub round: i64,
    /// Channel label
    pub ch: i64,
    /// Z-plane label
    pub zplane: i64,
}

impl TileKey {
    /// Create a new tile key
    pub fn new(round: i64, ch: i64, zplane: i64) -> Self {
        Self { round, ch, zplane }
    }

    /// Label of a grouping axis; `None` for the pixel axes
    pub fn label(&self, axis: Axis) -> Option<i64> {
        match axis {
            Axis::Round => Some(self.round),
            Axis::Ch => Some(self.ch),
            Axis::Zplane => Some(self.zplane),
            Axis::Y | Axis::X => None,
        }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(r={}, c={}, z={})", self.round, self.ch, self.zplane)
    }
}

/// Numeric kind of a pixel type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DtypeKind {
    /// Unsigned integer
    Unsigned,
    /// Floating point
    Float,
}

/// Pixel types accepted at the ingestion boundary
///
/// `to_unit_f32` is the range-preserving conversion: unsigned integers are
/// divided by their type maximum, floats are cast.
pub trait Pixel: Copy + Send + Sync + 'static {
    /// Name of the type, for diagnostics
    const DTYPE: &'static str;
    /// Numeric kind
    const KIND: DtypeKind;
    /// Size in bytes
    const ITEMSIZE: usize = std::mem::size_of::<Self>();

    /// Convert to f32 preserving the type's range
    fn to_unit_f32(self) -> f32;
}

impl Pixel for u8 {
    const DTYPE: &'static str = "uint8";
    const KIND: DtypeKind = DtypeKind::Unsigned;

    fn to_unit_f32(self) -> f32 {
        f32::from(self) / f32::from(u8::MAX)
    }
}

impl Pixel for u16 {
    const DTYPE: &'static str = "uint16";
    const KIND: DtypeKind = DtypeKind::Unsigned;

    fn to_unit_f32(self) -> f32 {
        f32::from(self) / f32::from(u16::MAX)
    }
}

impl Pixel for u32 {
    const DTYPE: &'static str = "uint32";
    const KIND: DtypeKind = DtypeKind::Unsigned;

    fn to_unit_f32(self) -> f32 {
        (f64::from(self) / f64::from(u32::MAX)) as f32
    }
}

impl Pixel for f32 {
    const DTYPE: &'static str = "float32";
    const KIND: DtypeKind = DtypeKind::Float;

    fn to_unit_f32(self) -> f32 {
        self
    }
}

impl Pixel for f64 {
    const DTYPE: &'static str = "float64";
    const KIND: DtypeKind = DtypeKind::Float;

    fn to_unit_f32(self) -> f32 {
        self as f32
    }
}

/// Pixel data of one tile in its source type
#[derive(Debug, Clone, PartialEq)]
pub enum TilePixels {
    /// 8-bit unsigned
    U8(Array2<u8>),
    /// 16-bit unsigned
    U16(Array2<u16>),
    /// 32-bit unsigned
    U32(Array2<u32>),
    /// 32-bit float
    F32(Array2<f32>),
    /// 64-bit float
    F64(Array2<f64>),
}

macro_rules! with_pixels {
    ($pixels:expr, $array:ident, $ty:ident => $body:expr) => {
        match $pixels {
            TilePixels::U8($array) => {
                type $ty = u8;
                $body
            }
            TilePixels::U16($array) => {
                type $ty = u16;
                $body
            }
            TilePixels::U32($array) => {
                type $ty = u32;
                $body
            }
            TilePixels::F32($array) => {
                type $ty = f32;
                $body
            }
            TilePixels::F64($array) => {
                type $ty = f64;
                $body
            }
        }
    };
}

impl TilePixels {
    /// Numeric kind of the source type
    pub fn kind(&self) -> DtypeKind {
        with_pixels!(self, _a, T => <T as Pixel>::KIND)
    }

    /// Size of one source element in bytes
    pub fn itemsize(&self) -> usize {
        with_pixels!(self, _a, T => <T as Pixel>::ITEMSIZE)
    }

    /// Name of the source type
    pub fn dtype(&self) -> &'static str {
        with_pixels!(self, _a, T => <T as Pixel>::DTYPE)
    }

    /// (height, width)
    pub fn shape(&self) -> (usize, usize) {
        with_pixels!(self, a, _T => a.dim())
    }

    /// Range-preserving conversion to f32
    pub fn to_float32(&self) -> Array2<f32> {
        with_pixels!(self, a, T => a.mapv(<T as Pixel>::to_unit_f32))
    }

    /// Crop to half-open pixel ranges
    pub fn crop(&self, y: &Range<usize>, x: &Range<usize>) -> Self {
        match self {
            TilePixels::U8(a) => TilePixels::U8(a.slice(s![y.clone(), x.clone()]).to_owned()),
            TilePixels::U16(a) => TilePixels::U16(a.slice(s![y.clone(), x.clone()]).to_owned()),
            TilePixels::U32(a) => TilePixels::U32(a.slice(s![y.clone(), x.clone()]).to_owned()),
            TilePixels::F32(a) => TilePixels::F32(a.slice(s![y.clone(), x.clone()]).to_owned()),
            TilePixels::F64(a) => TilePixels::F64(a.slice(s![y.clone(), x.clone()]).to_owned()),
        }
    }
}

/// One 2-d plane fetched from a tile collection
#[derive(Debug, Clone)]
pub struct Tile {
    /// Pixel data
    pub pixels: TilePixels,
    /// Physical bounds of the plane
    pub coordinates: PhysicalBounds,
    /// Tile-level metadata
    pub extras: Extras,
}

/// Lazy collection of tiles keyed by (round, ch, zplane)
pub trait TileCollection {
    /// Keys of all tiles in the collection
    fn keys(&self) -> Vec<TileKey>;

    /// (height, width) shared by every tile
    fn tile_shape(&self) -> (usize, usize);

    /// Collection-level metadata
    fn extras(&self) -> &Extras;

    /// Fetch one tile
    fn get_tile(&self, key: TileKey) -> StackResult<Tile>;
}

/// Collection-level description handed to a writer before any tile
#[derive(Debug, Clone, PartialEq)]
pub struct TileSetHeader {
    /// Number of rounds, channels and z-planes
    pub counts: [usize; 3],
    /// (height, width) of every tile
    pub tile_shape: (usize, usize),
    /// Collection-level metadata, including the serialized provenance log
    pub extras: Extras,
}

/// Physical coordinates of an exported tile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExportCoordinates {
    /// (min, max) along x
    pub x: (f64, f64),
    /// (min, max) along y
    pub y: (f64, f64),
    /// Z coordinate of the plane
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

impl ExportCoordinates {
    /// Bounds as reported when the tile is read back
    pub fn to_bounds(&self) -> PhysicalBounds {
        PhysicalBounds {
            x: self.x,
            y: self.y,
            z: self.z.map(|z| (z, z)),
        }
    }
}

/// One plane handed to a writer during export
#[derive(Debug, Clone)]
pub struct ExportedTile<'a> {
    /// Tile key
    pub key: TileKey,
    /// Physical coordinates
    pub coordinates: ExportCoordinates,
    /// Tile-level metadata
    pub extras: Extras,
    /// Pixel data
    pub pixels: ArrayView2<'a, f32>,
}

/// Sink for exported tiles; controls layout, format and naming
pub trait TileWriter {
    /// Start a tile set
    fn begin(&mut self, header: &TileSetHeader) -> StackResult<()>;

    /// Write one tile
    fn write_tile(&mut self, tile: ExportedTile<'_>) -> StackResult<()>;

    /// Complete the tile set
    fn finish(&mut self) -> StackResult<()>;
}
