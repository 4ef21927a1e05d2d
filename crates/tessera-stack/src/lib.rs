//! tessera-stack: five-dimensional image stacks for multiplexed microscopy
//!
//! An [`ImageStack`] holds round × channel × z-plane × y × x pixels as f32
//! in [0, 1], with per-axis labels, physical coordinates and a provenance
//! log.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  TileCollection ──from_tile_collection──▶ ImageStack          │
//! │  (memory, cropped, directory)              │   sel / max_proj │
//! │                                            │   get/set_slice  │
//! │                     transform / apply ◀────┘                  │
//! │                            │                                  │
//! │  ┌─────────────────────────▼──────────────────────────────┐   │
//! │  │ engine: one chunk per label combination of group_by     │   │
//! │  │ rayon pool, each job split attaches to the SharedRegion │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                                                               │
//! │  ImageStack ──export──▶ TileWriter (memory, directory)        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use tessera_stack::{ApplyOptions, Axis, ImageStack};
//!
//! let stack = ImageStack::synthetic_stack(2, 3, 4, 30, 20)?;
//! let halved = stack.apply(|chunk| Ok(chunk.mapv(|v| v / 2.0)), &ApplyOptions::default())?;
//! let projected = halved.max_proj(&[Axis::Ch])?;
//! assert_eq!(projected.raw_shape(), [2, 1, 4, 30, 20]);
//! # Ok::<(), tessera_stack::StackError>(())
//! ```

#![warn(missing_docs)]

pub mod axes;
pub mod config;
pub mod coords;
pub mod crop;
mod engine;
pub mod error;
pub mod fs;
pub mod log;
pub mod memory;
pub mod range;
pub mod selector;
pub mod shm;
pub mod stack;
pub mod tile;

pub use axes::{default_group_by, Axis, StackShape};
pub use config::{ApplyOptions, ClipMethod, EngineConfig};
pub use coords::{CoordinateSet, PhysicalBounds};
pub use crop::{CropParameters, CroppedTileCollection};
pub use error::{StackError, StackResult};
pub use fs::{DirectoryTileSet, DirectoryTileWriter};
pub use log::{LogEntry, PipelineComponent, ProvenanceLog};
pub use memory::MemoryTileSet;
pub use selector::{Index, Selector};
pub use stack::{AxisLabels, ImageStack};
pub use tile::{
    Extras, ExportCoordinates, ExportedTile, Pixel, Tile, TileCollection, TileKey, TilePixels,
    TileSetHeader, TileWriter,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
