//! Directory tile sets
//!
//! Layout:
//!
//! ```text
//! <dir>/manifest.json      counts, tile shape, extras, per-tile records
//! <dir>/r0_c1_z2.f32       one raw little-endian f32 plane per tile
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{StackError, StackResult};
use crate::tile::{
    ExportCoordinates, ExportedTile, Extras, Tile, TileCollection, TileKey, TilePixels,
    TileSetHeader, TileWriter,
};

/// Name of the manifest inside a tile set directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Manifest format version
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    counts: [usize; 3],
    tile_shape: (usize, usize),
    #[serde(default)]
    extras: Extras,
    tiles: Vec<TileRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TileRecord {
    key: TileKey,
    file: String,
    coordinates: ExportCoordinates,
    #[serde(default)]
    extras: Extras,
}

fn tile_file_name(key: &TileKey) -> String {
    format!("r{}_c{}_z{}.f32", key.round, key.ch, key.zplane)
}

/// Writes an exported stack into a directory
#[derive(Debug)]
pub struct DirectoryTileWriter {
    root: PathBuf,
    manifest: Option<Manifest>,
}

impl DirectoryTileWriter {
    /// Writer targeting `root`, created on `begin` if missing
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            manifest: None,
        }
    }

    /// Target directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn manifest_mut(&mut self) -> StackResult<&mut Manifest> {
        self.manifest
            .as_mut()
            .ok_or_else(|| StackError::config("tile writer used before begin"))
    }
}

impl TileWriter for DirectoryTileWriter {
    fn begin(&mut self, header: &TileSetHeader) -> StackResult<()> {
        fs::create_dir_all(&self.root)?;
        self.manifest = Some(Manifest {
            version: FORMAT_VERSION,
            counts: header.counts,
            tile_shape: header.tile_shape,
            extras: header.extras.clone(),
            tiles: Vec::new(),
        });
        debug!("Writing tile set to {}", self.root.display());
        Ok(())
    }

    fn write_tile(&mut self, tile: ExportedTile<'_>) -> StackResult<()> {
        self.manifest_mut()?;
        let file = tile_file_name(&tile.key);
        let path = self.root.join(&file);

        let mut bytes = Vec::with_capacity(tile.pixels.len() * std::mem::size_of::<f32>());
        for value in tile.pixels.iter() {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        fs::write(&path, &bytes)?;

        self.manifest_mut()?.tiles.push(TileRecord {
            key: tile.key,
            file,
            coordinates: tile.coordinates,
            extras: tile.extras,
        });
        Ok(())
    }

    fn finish(&mut self) -> StackResult<()> {
        let manifest = self
            .manifest
            .take()
            .ok_or_else(|| StackError::config("tile writer finished before begin"))?;
        let mut writer = BufWriter::new(File::create(self.root.join(MANIFEST_FILE))?);
        serde_json::to_writer_pretty(&mut writer, &manifest)?;
        writer.flush()?;
        info!(
            "Wrote {} tiles to {}",
            manifest.tiles.len(),
            self.root.display()
        );
        Ok(())
    }
}

/// Read-only tile collection backed by a directory written with
/// [`DirectoryTileWriter`]
#[derive(Debug)]
pub struct DirectoryTileSet {
    root: PathBuf,
    tile_shape: (usize, usize),
    extras: Extras,
    tiles: BTreeMap<TileKey, TileRecord>,
}

impl DirectoryTileSet {
    /// Read the manifest of a tile set directory
    pub fn open(root: impl AsRef<Path>) -> StackResult<Self> {
        let root = root.as_ref().to_path_buf();
        let reader = BufReader::new(File::open(root.join(MANIFEST_FILE))?);
        let manifest: Manifest = serde_json::from_reader(reader)?;
        if manifest.version != FORMAT_VERSION {
            return Err(StackError::Serialization(format!(
                "unsupported tile set version {}, expected {}",
                manifest.version, FORMAT_VERSION
            )));
        }

        let tiles = manifest
            .tiles
            .into_iter()
            .map(|record| (record.key, record))
            .collect();
        Ok(Self {
            root,
            tile_shape: manifest.tile_shape,
            extras: manifest.extras,
            tiles,
        })
    }

    fn read_pixels(&self, record: &TileRecord) -> StackResult<Array2<f32>> {
        let (height, width) = self.tile_shape;
        let expected = height * width * std::mem::size_of::<f32>();
        if expected == 0 {
            return Ok(Array2::zeros((height, width)));
        }

        let file = File::open(self.root.join(&record.file))?;
        // SAFETY: the mapping is read-only and dropped before this function
        // returns; the tile file is not modified while a tile set is read.
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() != expected {
            return Err(StackError::InvalidShape {
                expected: vec![expected],
                actual: vec![mmap.len()],
            });
        }

        let values: Vec<f32> = mmap
            .chunks_exact(std::mem::size_of::<f32>())
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Array2::from_shape_vec((height, width), values)
            .map_err(|e| StackError::Serialization(format!("tile {}: {e}", record.key)))
    }
}

impl TileCollection for DirectoryTileSet {
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
        let record = self.tiles.get(&key).ok_or(StackError::TileNotFound(key))?;
        Ok(Tile {
            pixels: TilePixels::F32(self.read_pixels(record)?),
            coordinates: record.coordinates.to_bounds(),
            extras: record.extras.clone(),
        })
    }
}
