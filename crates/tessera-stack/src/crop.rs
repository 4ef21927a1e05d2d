//! Cropping view over a tile collection

use std::collections::BTreeSet;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::axes::Axis;
use crate::error::{StackError, StackResult};
use crate::tile::{Extras, Tile, TileCollection, TileKey};

/// Which tiles and pixels a [`CroppedTileCollection`] keeps
///
/// `None` keeps everything along that axis. Pixel ranges are half-open and
/// clamped to the tile size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropParameters {
    /// Rounds to keep
    pub permitted_rounds: Option<BTreeSet<i64>>,
    /// Channels to keep
    pub permitted_chs: Option<BTreeSet<i64>>,
    /// Z-planes to keep
    pub permitted_zplanes: Option<BTreeSet<i64>>,
    /// Pixel rows to keep
    pub y: Option<Range<usize>>,
    /// Pixel columns to keep
    pub x: Option<Range<usize>>,
}

impl CropParameters {
    /// Whether a tile survives the label filters
    pub fn permits(&self, key: &TileKey) -> bool {
        [
            (Axis::Round, &self.permitted_rounds),
            (Axis::Ch, &self.permitted_chs),
            (Axis::Zplane, &self.permitted_zplanes),
        ]
        .into_iter()
        .all(|(axis, permitted)| match (permitted, key.label(axis)) {
            (Some(set), Some(label)) => set.contains(&label),
            _ => true,
        })
    }

    fn clamp(range: &Option<Range<usize>>, len: usize) -> Range<usize> {
        match range {
            Some(range) => {
                let start = range.start.min(len);
                start..range.end.clamp(start, len)
            }
            None => 0..len,
        }
    }

    /// Row and column ranges applied to a tile of `tile_shape`
    pub fn pixel_ranges(&self, tile_shape: (usize, usize)) -> (Range<usize>, Range<usize>) {
        (
            Self::clamp(&self.y, tile_shape.0),
            Self::clamp(&self.x, tile_shape.1),
        )
    }
}

/// Tile collection restricted by [`CropParameters`]
pub struct CroppedTileCollection<'a, C: TileCollection + ?Sized> {
    inner: &'a C,
    params: CropParameters,
}

impl<'a, C: TileCollection + ?Sized> CroppedTileCollection<'a, C> {
    /// Wrap a collection
    pub fn new(inner: &'a C, params: CropParameters) -> Self {
        Self { inner, params }
    }
}

impl<C: TileCollection + ?Sized> TileCollection for CroppedTileCollection<'_, C> {
    fn keys(&self) -> Vec<TileKey> {
        self.inner
            .keys()
            .into_iter()
            .filter(|key| self.params.permits(key))
            .collect()
    }

    fn tile_shape(&self) -> (usize, usize) {
        let (y, x) = self.params.pixel_ranges(self.inner.tile_shape());
        (y.len(), x.len())
    }

    fn extras(&self) -> &Extras {
        self.inner.extras()
    }

    fn get_tile(&self, key: TileKey) -> StackResult<Tile> {
        if !self.params.permits(&key) {
            return Err(StackError::TileNotFound(key));
        }
        let tile = self.inner.get_tile(key)?;
        let (height, width) = tile.pixels.shape();
        let (y, x) = self.params.pixel_ranges((height, width));
        Ok(Tile {
            pixels: tile.pixels.crop(&y, &x),
            coordinates: tile.coordinates.crop(&y, &x, height, width),
            extras: tile.extras,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::PhysicalBounds;
    use crate::memory::MemoryTileSet;
    use crate::tile::TilePixels;
    use ndarray::Array2;

    fn collection() -> MemoryTileSet {
        let mut set = MemoryTileSet::new((4, 6));
        for round in 0..2 {
            for ch in 0..3 {
                let pixels = Array2::from_shape_fn((4, 6), |(y, x)| (y * 6 + x) as u16);
                set.insert(
                    TileKey::new(round, ch, 0),
                    Tile {
                        pixels: TilePixels::U16(pixels),
                        coordinates: PhysicalBounds::planar((0.0, 5.0), (0.0, 3.0)),
                        extras: Extras::new(),
                    },
                )
                .unwrap();
            }
        }
        set
    }

    #[test]
    fn test_crop_filters_keys() {
        let inner = collection();
        let params = CropParameters {
            permitted_chs: Some([0, 2].into_iter().collect()),
            ..CropParameters::default()
        };
        let cropped = CroppedTileCollection::new(&inner, params);
        assert_eq!(cropped.keys().len(), 4);
        assert!(cropped.get_tile(TileKey::new(0, 1, 0)).is_err());
    }

    #[test]
    fn test_crop_pixels_and_bounds() {
        let inner = collection();
        let params = CropParameters {
            y: Some(1..3),
            x: Some(2..100),
            ..CropParameters::default()
        };
        let cropped = CroppedTileCollection::new(&inner, params);
        assert_eq!(cropped.tile_shape(), (2, 4));
        let tile = cropped.get_tile(TileKey::new(1, 2, 0)).unwrap();
        assert_eq!(tile.pixels.shape(), (2, 4));
        assert_eq!(tile.coordinates.x, (2.0, 5.0));
        assert_eq!(tile.coordinates.y, (1.0, 2.0));
    }
}
