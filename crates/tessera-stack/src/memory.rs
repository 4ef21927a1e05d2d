//! In-memory tile set, usable as both a collection and a writer

use std::collections::BTreeMap;

use crate::error::{StackError, StackResult};
use crate::tile::{
    ExportedTile, Extras, Tile, TileCollection, TileKey, TilePixels, TileSetHeader, TileWriter,
};

/// Tiles held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryTileSet {
    tile_shape: (usize, usize),
    extras: Extras,
    tiles: BTreeMap<TileKey, Tile>,
}

impl MemoryTileSet {
    /// Empty tile set for tiles of the given (height, width)
    pub fn new(tile_shape: (usize, usize)) -> Self {
        Self {
            tile_shape,
            ..Self::default()
        }
    }

    /// Builder-style collection extras
    pub fn with_extras(mut self, extras: Extras) -> Self {
        self.extras = extras;
        self
    }

    /// Add or replace a tile
    ///
    /// Every tile must have the set's shape.
    pub fn insert(&mut self, key: TileKey, tile: Tile) -> StackResult<()> {
        let (height, width) = tile.pixels.shape();
        if (height, width) != self.tile_shape {
            return Err(StackError::InvalidShape {
                expected: vec![self.tile_shape.0, self.tile_shape.1],
                actual: vec![height, width],
            });
        }
        self.tiles.insert(key, tile);
        Ok(())
    }

    /// Number of tiles
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Whether the set holds no tiles
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

impl TileCollection for MemoryTileSet {
    fn keys(&self) -> Vec<TileKey> {
        self.tiles.keys().copied().collect()
    }

    fn tile_shape(&self) -> (usize, usize) {
        self.tile_shape
    }

    fn extras(&self) -> &Extras {
        &self.extras
    }

    fn get_tile(&self, key: TileKey) -> StackResult<Tile> {
        self.tiles
            .get(&key)
            .cloned()
            .ok_or(StackError::TileNotFound(key))
    }
}

impl TileWriter for MemoryTileSet {
    fn begin(&mut self, header: &TileSetHeader) -> StackResult<()> {
        self.tile_shape = header.tile_shape;
        self.extras = header.extras.clone();
        self.tiles.clear();
        Ok(())
    }

    fn write_tile(&mut self, tile: ExportedTile<'_>) -> StackResult<()> {
        self.insert(
            tile.key,
            Tile {
                pixels: TilePixels::F32(tile.pixels.to_owned()),
                coordinates: tile.coordinates.to_bounds(),
                extras: tile.extras,
            },
        )
    }

    fn finish(&mut self) -> StackResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::PhysicalBounds;
    use ndarray::Array2;

    fn tile(height: usize, width: usize) -> Tile {
        Tile {
            pixels: TilePixels::U8(Array2::zeros((height, width))),
            coordinates: PhysicalBounds::planar((0.0, 1.0), (0.0, 1.0)),
            extras: Extras::new(),
        }
    }

    #[test]
    fn test_insert_checks_shape() {
        let mut set = MemoryTileSet::new((4, 3));
        set.insert(TileKey::new(0, 0, 0), tile(4, 3)).unwrap();
        assert!(set.insert(TileKey::new(0, 1, 0), tile(3, 4)).is_err());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_missing_tile() {
        let set = MemoryTileSet::new((1, 1));
        assert!(set.is_empty());
        assert!(matches!(
            set.get_tile(TileKey::new(0, 0, 0)),
            Err(StackError::TileNotFound(_))
        ));
    }
}
