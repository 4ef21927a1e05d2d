//! The image stack container
//!
//! An [`ImageStack`] holds a 5-d f32 array (round, ch, zplane, y, x) whose
//! values always lie in [0, 1], the labels of each grouping axis, physical
//! coordinates and a provenance log.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use ndarray::{s, Array5, ArrayD, ArrayView5, ArrayViewD, Axis as NdAxis, Slice};
use tracing::{debug, info, warn};

use crate::axes::{default_group_by, grouping_axes, storage_dims, Axis, StackShape, N_AXES, N_DIMS};
use crate::config::{ApplyOptions, EngineConfig};
use crate::coords::{z_plane_midpoint, CoordinateSet, PhysicalBounds};
use crate::engine::{apply_chunks, enumerate_chunks, run_chunks, validate_group_by};
use crate::error::{StackError, StackResult};
use crate::fs::DirectoryTileSet;
use crate::log::{LogEntry, PipelineComponent, ProvenanceLog};
use crate::range::{check_range, in_unit_range, min_max};
use crate::selector::{drop_pinned, restrict, Index, Position, Selector, SliceList};
use crate::shm::{RegionLayout, SharedRegion};
use crate::tile::{
    DtypeKind, ExportCoordinates, ExportedTile, Extras, Pixel, TileCollection, TileKey,
    TileSetHeader, TileWriter,
};

/// Labels of the three grouping axes, in storage order
pub type AxisLabels = [Vec<i64>; N_AXES];

/// Five-dimensional labeled image stack
pub struct ImageStack {
    region: SharedRegion,
    labels: AxisLabels,
    coordinates: CoordinateSet,
    log: ProvenanceLog,
    extras: Extras,
    tile_extras: BTreeMap<TileKey, Extras>,
}

impl ImageStack {
    /// Load every tile of a collection into a new stack
    ///
    /// Tiles are visited in enumeration order and converted to f32 with
    /// range-preserving conversion. Fails without returning a partial stack
    /// if the tiles disagree on their x/y bounds or mix dtype kinds.
    pub fn from_tile_collection<C>(collection: &C) -> StackResult<Self>
    where
        C: TileCollection + ?Sized,
    {
        let keys = collection.keys();
        if keys.is_empty() {
            return Err(StackError::EmptyCollection);
        }

        let mut label_sets: [BTreeSet<i64>; N_AXES] = Default::default();
        for key in &keys {
            for axis in grouping_axes() {
                if let Some(label) = key.label(axis) {
                    label_sets[axis.storage_index()].insert(label);
                }
            }
        }
        let labels: AxisLabels = label_sets.map(|set| set.into_iter().collect());
        let (height, width) = collection.tile_shape();
        let raw_shape = [labels[0].len(), labels[1].len(), labels[2].len(), height, width];
        debug!("Allocating stack of shape {:?} for {} tiles", raw_shape, keys.len());

        let region = SharedRegion::zeroed(RegionLayout::f32(raw_shape))?;
        let mut stack = Self {
            region,
            coordinates: CoordinateSet::from_bounds((0.0, 1.0), (0.0, 1.0), height, width),
            labels,
            log: ProvenanceLog::new(),
            extras: collection.extras().clone(),
            tile_extras: BTreeMap::new(),
        };

        let mut first: Option<(PhysicalBounds, DtypeKind, usize)> = None;
        let mut dtypes = BTreeSet::new();
        let mut itemsize_warned = false;
        let mut z_values = vec![0.0; raw_shape[Axis::Zplane.storage_index()]];

        for chunk in enumerate_chunks(&stack.labels, raw_shape, &default_group_by())? {
            let key = key_of(&chunk.selector);
            let tile = collection.get_tile(key)?;
            let kind = tile.pixels.kind();
            let itemsize = tile.pixels.itemsize();
            dtypes.insert(tile.pixels.dtype().to_string());

            let (bounds, first_kind, first_itemsize) =
                *first.get_or_insert((tile.coordinates, kind, itemsize));
            if tile.coordinates.xy() != bounds.xy() {
                return Err(StackError::MisalignedTiles {
                    key,
                    expected: bounds.xy(),
                    actual: tile.coordinates.xy(),
                });
            }
            if kind != first_kind {
                return Err(StackError::MixedDtypeKinds(dtypes.into_iter().collect()));
            }
            if itemsize != first_itemsize && !itemsize_warned {
                warn!(
                    "Tile {} has {}-byte pixels while the first tile has {}-byte pixels",
                    key, itemsize, first_itemsize
                );
                itemsize_warned = true;
            }

            let pixels = tile.pixels.to_float32();
            stack.set_slice(&chunk.selector, pixels.view().into_dyn(), &[])?;

            if let Some(z_range) = tile.coordinates.z {
                z_values[chunk.slices[Axis::Zplane.storage_index()].start()] =
                    z_plane_midpoint(z_range);
            }
            stack.tile_extras.insert(key, tile.extras);
        }

        if let Some((bounds, _, _)) = first {
            let coordinates = CoordinateSet::from_bounds(bounds.x, bounds.y, height, width);
            stack.coordinates = match bounds.z {
                Some(_) => CoordinateSet::from_samples(
                    coordinates.x().to_vec(),
                    coordinates.y().to_vec(),
                    Some(z_values),
                ),
                None => coordinates,
            };
        }

        if let Some(log) = ProvenanceLog::from_extras(collection.extras())? {
            stack.log = log;
        }

        info!("Loaded {} tiles into stack ({})", keys.len(), stack.shape());
        Ok(stack)
    }

    /// Build a stack from a dense (round, ch, zplane, y, x) array
    ///
    /// Labels default to `0..n` per axis and bounds to x, y in (0, 1)
    /// without z. Non-f32 pixels are converted once, with a warning.
    pub fn from_array<T: Pixel>(
        data: Array5<T>,
        labels: Option<AxisLabels>,
        bounds: Option<PhysicalBounds>,
    ) -> StackResult<Self> {
        let shape = data.shape();
        let raw_shape = [shape[0], shape[1], shape[2], shape[3], shape[4]];

        let labels: AxisLabels = match labels {
            Some(labels) => {
                for axis in grouping_axes() {
                    let dim = axis.storage_index();
                    if labels[dim].len() != raw_shape[dim] {
                        return Err(StackError::config(format!(
                            "axis {axis} has {} labels for {} planes",
                            labels[dim].len(),
                            raw_shape[dim]
                        )));
                    }
                    if labels[dim].windows(2).any(|pair| pair[0] >= pair[1]) {
                        return Err(StackError::config(format!(
                            "labels of axis {axis} must be strictly ascending"
                        )));
                    }
                }
                labels
            }
            None => [0, 1, 2].map(|dim| (0..raw_shape[dim] as i64).collect()),
        };

        if T::DTYPE != <f32 as Pixel>::DTYPE {
            warn!(
                "Converting {} stack data to float32 with range-preserving scaling",
                T::DTYPE
            );
        }
        let converted = data.mapv(T::to_unit_f32);
        check_range(&converted)?;

        let bounds = bounds.unwrap_or_else(|| PhysicalBounds::planar((0.0, 1.0), (0.0, 1.0)));
        let (height, width) = (raw_shape[3], raw_shape[4]);
        let mut coordinates = CoordinateSet::from_bounds(bounds.x, bounds.y, height, width);
        if let Some(z) = bounds.z {
            coordinates = coordinates.with_zero_z(raw_shape[2]);
            for plane in 0..raw_shape[2] {
                coordinates.set_z(plane, z_plane_midpoint(z));
            }
        }

        Ok(Self {
            region: SharedRegion::from_view(converted.view())?,
            labels,
            coordinates,
            log: ProvenanceLog::new(),
            extras: Extras::new(),
            tile_extras: BTreeMap::new(),
        })
    }

    /// All-ones stack, mostly for tests and demos
    pub fn synthetic_stack(
        num_round: usize,
        num_ch: usize,
        num_z: usize,
        tile_height: usize,
        tile_width: usize,
    ) -> StackResult<Self> {
        let data = Array5::<f32>::ones((num_round, num_ch, num_z, tile_height, tile_width));
        Self::from_array(data, None, None)
    }

    /// Load a tile set written by [`DirectoryTileWriter`](crate::DirectoryTileWriter)
    pub fn from_path(path: impl AsRef<Path>) -> StackResult<Self> {
        let tile_set = DirectoryTileSet::open(path)?;
        Self::from_tile_collection(&tile_set)
    }

    /// Full value copy with its own backing store
    pub fn try_clone(&self) -> StackResult<Self> {
        Ok(Self {
            region: self.region.duplicate()?,
            labels: self.labels.clone(),
            coordinates: self.coordinates.clone(),
            log: self.log.clone(),
            extras: self.extras.clone(),
            tile_extras: self.tile_extras.clone(),
        })
    }

    /// Storage shape (round, ch, zplane, y, x)
    pub fn raw_shape(&self) -> [usize; N_DIMS] {
        self.region.layout().shape
    }

    /// Ordered axis → size mapping ending with y and x
    pub fn shape(&self) -> StackShape {
        StackShape::from_raw(self.raw_shape())
    }

    /// Number of rounds
    pub fn num_rounds(&self) -> usize {
        self.raw_shape()[Axis::Round.storage_index()]
    }

    /// Number of channels
    pub fn num_chs(&self) -> usize {
        self.raw_shape()[Axis::Ch.storage_index()]
    }

    /// Number of z-planes
    pub fn num_zplanes(&self) -> usize {
        self.raw_shape()[Axis::Zplane.storage_index()]
    }

    /// (height, width) of every plane
    pub fn tile_shape(&self) -> (usize, usize) {
        let raw = self.raw_shape();
        (raw[Axis::Y.storage_index()], raw[Axis::X.storage_index()])
    }

    /// Labels of a grouping axis; `None` for y and x
    pub fn axis_labels(&self, axis: Axis) -> Option<&[i64]> {
        if axis.is_spatial() {
            return None;
        }
        Some(&self.labels[axis.storage_index()])
    }

    /// Physical coordinates
    pub fn coordinates(&self) -> &CoordinateSet {
        &self.coordinates
    }

    /// Read-only view of all pixels
    pub fn data(&self) -> ArrayView5<'_, f32> {
        self.region.view()
    }

    /// Provenance log
    pub fn log(&self) -> &ProvenanceLog {
        &self.log
    }

    /// Collection-level metadata
    pub fn extras(&self) -> &Extras {
        &self.extras
    }

    /// Metadata of one tile, if it carried any
    pub fn tile_extras(&self, key: TileKey) -> Option<&Extras> {
        self.tile_extras.get(&key)
    }

    /// Every tile's key with its metadata, in enumeration order
    ///
    /// Tiles that carried no metadata yield `None`.
    pub fn tile_metadata(&self) -> impl Iterator<Item = (TileKey, Option<&Extras>)> + '_ {
        let [rounds, chs, zplanes] = &self.labels;
        rounds.iter().flat_map(move |&round| {
            chs.iter().flat_map(move |&ch| {
                zplanes.iter().map(move |&zplane| {
                    let key = TileKey::new(round, ch, zplane);
                    (key, self.tile_extras.get(&key))
                })
            })
        })
    }

    /// Record a pipeline component in the provenance log
    pub fn update_log(&mut self, component: &dyn PipelineComponent) {
        self.log.push(LogEntry::for_component(component));
    }

    /// Resolve a selector to one position per storage dimension
    fn resolve(&self, selector: &Selector, allow_spatial: bool) -> StackResult<SliceList> {
        let raw = self.raw_shape();
        let dims = storage_dims();
        let mut slices: SliceList = raw.map(Position::full);

        for (axis, index) in selector.iter() {
            let dim = axis.storage_index();
            let len = raw[dim];
            slices[dim] = if axis.is_spatial() {
                if !allow_spatial {
                    return Err(StackError::UnexpectedAxis {
                        axis,
                        expected: dims[..N_AXES].to_vec(),
                    });
                }
                match index {
                    Index::Label(pos) => match usize::try_from(pos) {
                        Ok(p) if p < len => Position::Pin(p),
                        _ => return Err(StackError::LabelNotFound { axis, label: pos }),
                    },
                    Index::Range { start, end } => {
                        let clamp = |v: i64| usize::try_from(v.max(0)).unwrap_or(0).min(len);
                        let start = start.map(clamp).unwrap_or(0);
                        let end = end.map(clamp).unwrap_or(len).max(start);
                        Position::Span(start, end)
                    }
                }
            } else {
                let labels = &self.labels[dim];
                match index {
                    Index::Label(label) => match labels.binary_search(&label) {
                        Ok(ix) => Position::Pin(ix),
                        Err(_) => return Err(StackError::LabelNotFound { axis, label }),
                    },
                    Index::Range { start, end } => {
                        let start = start.map_or(0, |s| labels.partition_point(|&l| l < s));
                        let end = end
                            .map_or(labels.len(), |e| labels.partition_point(|&l| l <= e))
                            .max(start);
                        Position::Span(start, end)
                    }
                }
            };
        }
        Ok(slices)
    }

    /// New stack restricted to a region, with its own backing store
    ///
    /// Every axis is kept, so single labels leave a size-1 axis. Grouping
    /// axis ranges are inclusive label ranges; y and x ranges are
    /// half-open pixel ranges.
    pub fn sel(&self, selector: &Selector) -> StackResult<Self> {
        let slices = self.resolve(selector, true)?.map(|p| p.keep_dim());
        let mut view = self.region.view();
        for (dim, position) in slices.iter().enumerate() {
            let start = position.start();
            view.slice_axis_inplace(NdAxis(dim), Slice::from(start..start + position.len()));
        }
        let region = SharedRegion::from_view(view)?;

        let span = |axis: Axis| {
            let p = &slices[axis.storage_index()];
            p.start()..p.start() + p.len()
        };
        let labels: AxisLabels = [0, 1, 2].map(|dim| {
            let p = &slices[dim];
            self.labels[dim][p.start()..p.start() + p.len()].to_vec()
        });
        let coordinates = self
            .coordinates
            .select(span(Axis::Y), span(Axis::X), span(Axis::Zplane));
        let tile_extras = self
            .tile_extras
            .iter()
            .filter(|(key, _)| {
                grouping_axes().iter().all(|&axis| {
                    key.label(axis)
                        .is_some_and(|label| labels[axis.storage_index()].contains(&label))
                })
            })
            .map(|(key, extras)| (*key, extras.clone()))
            .collect();

        Ok(Self {
            region,
            labels,
            coordinates,
            log: self.log.clone(),
            extras: self.extras.clone(),
            tile_extras,
        })
    }

    /// Borrowed view of a region plus the grouping axes left in it
    ///
    /// Pinned axes are dropped; y and x may not be selected. The returned
    /// axes name the leading dims of the view, ahead of the trailing (y, x),
    /// so they can be passed straight back to [`set_slice`](Self::set_slice).
    pub fn get_slice(&self, selector: &Selector) -> StackResult<(ArrayViewD<'_, f32>, Vec<Axis>)> {
        let slices = self.resolve(selector, false)?;
        let mut view = self.region.view().into_dyn();
        restrict(&mut view, &slices);
        let view = drop_pinned(view, &slices);

        if !in_unit_range(&view) {
            if let Some((min, max)) = min_max(&view) {
                warn!(
                    "Slice {} holds values outside [0, 1]: min {}, max {}",
                    selector, min, max
                );
            }
        }

        let axes = grouping_axes()
            .into_iter()
            .filter(|axis| !matches!(slices[axis.storage_index()], Position::Pin(_)))
            .collect();
        Ok((view, axes))
    }

    /// Overwrite a region with `data`
    ///
    /// The trailing two dims of `data` are (y, x); `axes` names its leading
    /// dims in data order. Values, dimensionality, axis names and the final
    /// shape are all checked before anything is written.
    pub fn set_slice(
        &mut self,
        selector: &Selector,
        data: ArrayViewD<'_, f32>,
        axes: &[Axis],
    ) -> StackResult<()> {
        check_range(&data)?;

        if data.ndim() != axes.len() + 2 {
            return Err(StackError::AxesMismatch {
                shape: data.shape().to_vec(),
                axes: axes.to_vec(),
            });
        }

        let slices = self.resolve(selector, false)?;
        let open: Vec<Axis> = grouping_axes()
            .into_iter()
            .filter(|axis| !matches!(slices[axis.storage_index()], Position::Pin(_)))
            .collect();
        for (i, axis) in axes.iter().enumerate() {
            if !open.contains(axis) || axes[..i].contains(axis) {
                return Err(StackError::UnexpectedAxis {
                    axis: *axis,
                    expected: open.clone(),
                });
            }
        }

        let data = if axes.len() == open.len() {
            let n = axes.len();
            let mut order: Vec<usize> = open
                .iter()
                .filter_map(|axis| axes.iter().position(|a| a == axis))
                .collect();
            order.extend([n, n + 1]);
            data.permuted_axes(order)
        } else {
            data
        };

        let mut destination = self.region.view_mut().into_dyn();
        restrict(&mut destination, &slices);
        let mut destination = drop_pinned(destination, &slices);
        if destination.shape() != data.shape() {
            return Err(StackError::InvalidShape {
                expected: destination.shape().to_vec(),
                actual: data.shape().to_vec(),
            });
        }
        destination.assign(&data);
        Ok(())
    }

    /// Selectors of every chunk a grouping would produce, in enumeration order
    pub fn iter_axes(&self, group_by: &BTreeSet<Axis>) -> StackResult<Vec<Selector>> {
        Ok(enumerate_chunks(&self.labels, self.raw_shape(), group_by)?
            .into_iter()
            .map(|chunk| chunk.selector)
            .collect())
    }

    /// Run `func` on every chunk of a grouping and collect its results
    ///
    /// Results are paired with the chunk's selector and returned in
    /// enumeration order whatever the completion order was.
    pub fn transform<R, F>(
        &mut self,
        func: F,
        group_by: &BTreeSet<Axis>,
        config: &EngineConfig,
    ) -> StackResult<Vec<(R, Selector)>>
    where
        R: Send,
        F: Fn(ArrayViewD<'_, f32>) -> StackResult<R> + Sync,
    {
        config.validate()?;
        let chunks = enumerate_chunks(&self.labels, self.raw_shape(), group_by)?;
        let results = run_chunks(&mut self.region, &chunks, |view| func(view.view()), config)?;
        Ok(results
            .into_iter()
            .zip(chunks)
            .map(|(result, chunk)| (result, chunk.selector))
            .collect())
    }

    /// Non-destructive apply: a full copy of the stack with `func` applied
    pub fn apply<F>(&self, func: F, options: &ApplyOptions) -> StackResult<Self>
    where
        F: Fn(ArrayViewD<'_, f32>) -> StackResult<ArrayD<f32>> + Sync,
    {
        validate_group_by(&options.group_by)?;
        options.engine.validate()?;
        let mut copy = self.try_clone()?;
        copy.apply_in_place(func, options)?;
        Ok(copy)
    }

    /// Replace every chunk of a grouping with `func`'s output
    ///
    /// The function must return an array of its input's shape. Results are
    /// brought back into [0, 1] by the configured clip method.
    pub fn apply_in_place<F>(&mut self, func: F, options: &ApplyOptions) -> StackResult<()>
    where
        F: Fn(ArrayViewD<'_, f32>) -> StackResult<ArrayD<f32>> + Sync,
    {
        validate_group_by(&options.group_by)?;
        options.engine.validate()?;
        let chunks = enumerate_chunks(&self.labels, self.raw_shape(), &options.group_by)?;
        apply_chunks(
            &mut self.region,
            &chunks,
            func,
            options.clip_method,
            &options.engine,
        )
    }

    /// Maximum projection over grouping axes
    ///
    /// Projected axes shrink to size 1 and keep their first label; a
    /// projected z axis gets the mean z coordinate.
    pub fn max_proj(&self, axes: &[Axis]) -> StackResult<Self> {
        let mut projected: BTreeSet<Axis> = BTreeSet::new();
        for &axis in axes {
            if axis.is_spatial() {
                return Err(StackError::UnexpectedAxis {
                    axis,
                    expected: grouping_axes().to_vec(),
                });
            }
            projected.insert(axis);
        }

        let mut data = self.region.view().to_owned();
        let mut labels = self.labels.clone();
        for &axis in &projected {
            let dim = axis.storage_index();
            if data.len_of(NdAxis(dim)) == 0 {
                continue;
            }
            data = data
                .fold_axis(NdAxis(dim), f32::NEG_INFINITY, |&acc, &v| acc.max(v))
                .insert_axis(NdAxis(dim));
            labels[dim].truncate(1);
        }

        let coordinates = if projected.contains(&Axis::Zplane) {
            self.coordinates.collapse_z()
        } else {
            self.coordinates.clone()
        };
        let tile_extras = self
            .tile_extras
            .iter()
            .filter(|(key, _)| {
                grouping_axes().iter().all(|&axis| {
                    key.label(axis)
                        .is_some_and(|label| labels[axis.storage_index()].contains(&label))
                })
            })
            .map(|(key, extras)| (*key, extras.clone()))
            .collect();

        Ok(Self {
            region: SharedRegion::from_view(data.view())?,
            labels,
            coordinates,
            log: self.log.clone(),
            extras: self.extras.clone(),
            tile_extras,
        })
    }

    /// Hand every plane to a tile writer
    ///
    /// The provenance log is serialized into the collection extras.
    pub fn export(&self, writer: &mut dyn TileWriter) -> StackResult<()> {
        let mut extras = self.extras.clone();
        self.log.write_extras(&mut extras)?;
        let header = TileSetHeader {
            counts: [self.num_rounds(), self.num_chs(), self.num_zplanes()],
            tile_shape: self.tile_shape(),
            extras,
        };
        writer.begin(&header)?;

        let data = self.region.view();
        let chunks = enumerate_chunks(&self.labels, self.raw_shape(), &default_group_by())?;
        for chunk in &chunks {
            let key = key_of(&chunk.selector);
            let [r, c, z] = [0, 1, 2].map(|dim| chunk.slices[dim].start());
            let coordinates = ExportCoordinates {
                x: self.coordinates.x_range(),
                y: self.coordinates.y_range(),
                z: self.coordinates.z_at(z),
            };
            writer.write_tile(ExportedTile {
                key,
                coordinates,
                extras: self.tile_extras.get(&key).cloned().unwrap_or_default(),
                pixels: data.slice(s![r, c, z, .., ..]),
            })?;
        }

        writer.finish()?;
        info!("Exported {} tiles", chunks.len());
        Ok(())
    }
}

fn key_of(selector: &Selector) -> TileKey {
    TileKey::new(
        selector.label(Axis::Round).unwrap_or_default(),
        selector.label(Axis::Ch).unwrap_or_default(),
        selector.label(Axis::Zplane).unwrap_or_default(),
    )
}

impl fmt::Display for ImageStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<ImageStack ({})>", self.shape())
    }
}

impl fmt::Debug for ImageStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageStack")
            .field("shape", &self.raw_shape())
            .field("labels", &self.labels)
            .field("log_entries", &self.log.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array4, IxDyn};

    fn ramp_stack() -> ImageStack {
        let data = Array5::from_shape_fn((2, 3, 2, 4, 5), |(r, c, z, y, x)| {
            (r * 1000 + c * 100 + z * 10 + y * 5 + x) as f32 / 2000.0
        });
        ImageStack::from_array(data, None, None).unwrap()
    }

    #[test]
    fn test_shape_and_display() {
        let stack = ImageStack::synthetic_stack(2, 3, 4, 30, 20).unwrap();
        assert_eq!(stack.raw_shape(), [2, 3, 4, 30, 20]);
        assert_eq!(stack.tile_shape(), (30, 20));
        assert_eq!(stack.to_string(), "<ImageStack (r: 2, c: 3, z: 4, y: 30, x: 20)>");
        assert_eq!(stack.axis_labels(Axis::Ch), Some(&[0, 1, 2][..]));
        assert_eq!(stack.axis_labels(Axis::Y), None);
    }

    #[test]
    fn test_from_array_converts_unsigned() {
        let data = Array5::from_elem((1, 1, 1, 2, 2), 65535u16);
        let stack = ImageStack::from_array(data, None, None).unwrap();
        assert!(stack.data().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_from_array_rejects_out_of_range_floats() {
        let data = Array5::from_elem((1, 1, 1, 2, 2), 1.5f32);
        assert!(matches!(
            ImageStack::from_array(data, None, None),
            Err(StackError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_from_array_validates_labels() {
        let data = Array5::<f32>::zeros((2, 1, 1, 2, 2));
        let short = [vec![0], vec![0], vec![0]];
        assert!(ImageStack::from_array(data.clone(), Some(short), None).is_err());
        let unsorted = [vec![3, 1], vec![0], vec![0]];
        assert!(ImageStack::from_array(data, Some(unsorted), None).is_err());
    }

    #[test]
    fn test_get_slice_drops_pinned_axes() {
        let stack = ramp_stack();
        let selector = Selector::new().with(Axis::Round, 1).with(Axis::Zplane, 0);
        let (view, axes) = stack.get_slice(&selector).unwrap();
        assert_eq!(view.shape(), &[3, 4, 5]);
        assert_eq!(axes, vec![Axis::Ch]);
        assert_eq!(view[[2, 0, 0]], 1200.0 / 2000.0);
    }

    #[test]
    fn test_get_slice_inclusive_label_range() {
        let stack = ramp_stack();
        let selector = Selector::new().with(Axis::Ch, Index::range(1, 2));
        let (view, axes) = stack.get_slice(&selector).unwrap();
        assert_eq!(view.shape(), &[2, 2, 2, 4, 5]);
        assert_eq!(axes, vec![Axis::Round, Axis::Ch, Axis::Zplane]);
    }

    #[test]
    fn test_get_slice_rejects_pixel_axes() {
        let stack = ramp_stack();
        let selector = Selector::new().with(Axis::X, 1);
        assert!(matches!(
            stack.get_slice(&selector),
            Err(StackError::UnexpectedAxis { axis: Axis::X, .. })
        ));
    }

    #[test]
    fn test_unknown_label() {
        let stack = ramp_stack();
        let selector = Selector::new().with(Axis::Round, 9);
        assert!(matches!(
            stack.get_slice(&selector),
            Err(StackError::LabelNotFound { axis: Axis::Round, label: 9 })
        ));
    }

    #[test]
    fn test_set_slice_permutes_leading_axes() {
        let mut stack = ImageStack::synthetic_stack(3, 4, 1, 2, 2).unwrap();
        let data = Array4::from_shape_fn((4, 3, 2, 2), |(c, r, _, _)| (r * 4 + c) as f32 / 16.0);
        stack
            .set_slice(&Selector::new(), data.view().into_dyn(), &[Axis::Ch, Axis::Round])
            .unwrap();
        let view = stack.data();
        assert_eq!(view[[2, 1, 0, 0, 0]], 9.0 / 16.0);
        assert_eq!(view[[0, 3, 0, 1, 1]], 3.0 / 16.0);
    }

    #[test]
    fn test_set_slice_validation_order() {
        let mut stack = ImageStack::synthetic_stack(1, 2, 1, 2, 2).unwrap();
        let selector = Selector::new().with(Axis::Round, 0).with(Axis::Zplane, 0);

        let too_big = ArrayD::from_elem(IxDyn(&[2, 2, 2]), 2.0f32);
        assert!(matches!(
            stack.set_slice(&selector, too_big.view(), &[Axis::Ch]),
            Err(StackError::OutOfRange { .. })
        ));

        let data = ArrayD::from_elem(IxDyn(&[2, 2, 2]), 0.5f32);
        assert!(matches!(
            stack.set_slice(&selector, data.view(), &[]),
            Err(StackError::AxesMismatch { .. })
        ));
        assert!(matches!(
            stack.set_slice(&selector, data.view(), &[Axis::Round]),
            Err(StackError::UnexpectedAxis { axis: Axis::Round, .. })
        ));

        let wrong = ArrayD::from_elem(IxDyn(&[2, 3, 2]), 0.5f32);
        assert!(matches!(
            stack.set_slice(&selector, wrong.view(), &[Axis::Ch]),
            Err(StackError::InvalidShape { .. })
        ));
        assert!(stack.data().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_sel_keeps_dims_and_copies() {
        let stack = ramp_stack();
        let selector = Selector::new()
            .with(Axis::Round, 1)
            .with(Axis::Ch, Index::starting_at(1))
            .with(Axis::X, Index::range(1, 3));
        let sub = stack.sel(&selector).unwrap();
        assert_eq!(sub.raw_shape(), [1, 2, 2, 4, 2]);
        assert_eq!(sub.axis_labels(Axis::Round), Some(&[1][..]));
        assert_eq!(sub.axis_labels(Axis::Ch), Some(&[1, 2][..]));
        assert_eq!(sub.coordinates().x().len(), 2);
        assert_eq!(sub.data()[[0, 0, 0, 0, 0]], stack.data()[[1, 1, 0, 0, 1]]);
    }

    #[test]
    fn test_update_log_appends() {
        struct Noop;
        impl PipelineComponent for Noop {
            fn method_name(&self) -> String {
                "Noop".into()
            }
            fn arguments(&self) -> serde_json::Value {
                serde_json::Value::Null
            }
        }

        let mut stack = ramp_stack();
        stack.update_log(&Noop);
        let copy = stack.try_clone().unwrap();
        assert_eq!(copy.log().len(), 1);
        assert_eq!(copy.log().entries()[0].method, "Noop");
    }

    #[test]
    fn test_max_proj_rejects_pixel_axes() {
        let stack = ramp_stack();
        assert!(stack.max_proj(&[Axis::Y]).is_err());
        let projected = stack.max_proj(&[Axis::Round, Axis::Zplane]).unwrap();
        assert_eq!(projected.raw_shape(), [1, 3, 1, 4, 5]);
        assert_eq!(projected.data()[[0, 0, 0, 0, 0]], 1010.0 / 2000.0);
    }

    #[test]
    fn test_get_slice_output_feeds_set_slice() {
        let mut stack = ImageStack::synthetic_stack(3, 4, 5, 20, 10).unwrap();
        let selector = Selector::new().with(Axis::Zplane, 2);
        let (view, axes) = stack.get_slice(&selector).unwrap();
        assert_eq!(view.shape(), &[3, 4, 20, 10]);
        assert_eq!(axes, vec![Axis::Round, Axis::Ch]);

        let halved = view.mapv(|v| v * 0.5);
        stack.set_slice(&selector, halved.view(), &axes).unwrap();
        let data = stack.data();
        assert_eq!(data[[2, 3, 2, 19, 9]], 0.5);
        assert_eq!(data[[2, 3, 1, 19, 9]], 1.0);
    }

    #[test]
    fn test_nan_rejected_anywhere_in_data() {
        let mut stack = ImageStack::synthetic_stack(1, 1, 1, 1, 2).unwrap();
        let selector = Selector::new()
            .with(Axis::Round, 0)
            .with(Axis::Ch, 0)
            .with(Axis::Zplane, 0);
        let data = ArrayD::from_shape_vec(IxDyn(&[1, 2]), vec![0.5f32, f32::NAN]).unwrap();
        assert!(matches!(
            stack.set_slice(&selector, data.view(), &[]),
            Err(StackError::OutOfRange { .. })
        ));
        assert!(stack.data().iter().all(|&v| v == 1.0));

        let data = Array5::from_shape_vec((1, 1, 1, 1, 2), vec![0.5f32, f32::NAN]).unwrap();
        assert!(ImageStack::from_array(data, None, None).is_err());
    }

    #[test]
    fn test_scale_by_image_zeroes_nan() {
        let mut stack = ImageStack::synthetic_stack(2, 1, 1, 2, 2).unwrap();
        let options = ApplyOptions::default()
            .clip_method(crate::config::ClipMethod::ScaleByImage)
            .engine(EngineConfig::with_workers(2));
        stack
            .apply_in_place(
                |view| {
                    let mut out = view.mapv(|v| v * 2.0);
                    out[[0, 0]] = f32::NAN;
                    Ok(out)
                },
                &options,
            )
            .unwrap();
        let data = stack.data();
        assert!(data.iter().all(|v| !v.is_nan()));
        assert_eq!(data[[1, 0, 0, 0, 0]], 0.0);
        assert_eq!(data[[1, 0, 0, 1, 1]], 1.0);
    }

    #[test]
    fn test_tile_metadata_covers_every_tile() {
        let stack = ramp_stack();
        let keys: Vec<TileKey> = stack.tile_metadata().map(|(key, _)| key).collect();
        assert_eq!(keys.len(), 12);
        assert_eq!(keys[0], TileKey::new(0, 0, 0));
        assert_eq!(keys[1], TileKey::new(0, 0, 1));
        assert_eq!(keys[11], TileKey::new(1, 2, 1));
        assert!(stack.tile_metadata().all(|(_, extras)| extras.is_none()));
    }

    #[test]
    fn test_apply_in_place_clips() {
        let mut stack = ImageStack::synthetic_stack(1, 2, 1, 3, 3).unwrap();
        let options = ApplyOptions::default().engine(EngineConfig::with_workers(2));
        stack
            .apply_in_place(|view| Ok(view.mapv(|v| v * 3.0 - 2.5)), &options)
            .unwrap();
        assert!(stack.data().iter().all(|&v| v == 0.5));

        let flat = Array2::<f32>::zeros((3, 3));
        let result = stack.apply_in_place(|_| Ok(flat.clone().into_dyn()), &options);
        assert!(result.is_ok());
        assert!(stack.data().iter().all(|&v| v == 0.0));
    }
}
