//! Shared backing store for stack pixels
//!
//! A [`SharedRegion`] owns an anonymous memory mapping holding the f32
//! pixels of a stack. The mapping is described separately by a
//! [`RegionLayout`]. Pool workers never receive pixel data: the
//! coordinator hands out a [`RegionHandle`] (pointer + layout) and each
//! unit of pool work calls [`RegionHandle::attach`] before processing its
//! chunks. Attaching is cheap and any number of attachments may coexist as
//! long as their chunk views stay disjoint.

use std::marker::PhantomData;
use std::ptr::NonNull;

use memmap2::MmapMut;
use ndarray::{ArrayView5, ArrayViewMut5, ArrayViewMutD, IxDyn, RawArrayViewMut};
use serde::{Deserialize, Serialize};

use crate::axes::N_DIMS;
use crate::error::{StackError, StackResult};
use crate::selector::{drop_pinned, restrict, SliceList};

/// Element type stored in a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    /// Single-precision float
    F32,
}

impl ElementType {
    /// Size of one element in bytes
    pub const fn size(self) -> usize {
        match self {
            ElementType::F32 => std::mem::size_of::<f32>(),
        }
    }
}

/// Shape and element type of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionLayout {
    /// Storage shape (round, ch, zplane, y, x)
    pub shape: [usize; N_DIMS],
    /// Element type
    pub dtype: ElementType,
}

impl RegionLayout {
    /// f32 layout of the given shape
    pub fn f32(shape: [usize; N_DIMS]) -> Self {
        Self {
            shape,
            dtype: ElementType::F32,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// Whether the region holds no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the pixel data in bytes
    pub fn byte_len(&self) -> usize {
        self.len() * self.dtype.size()
    }
}

/// Owned, mutable block of f32 memory backing a stack
pub struct SharedRegion {
    map: MmapMut,
    layout: RegionLayout,
}

impl SharedRegion {
    /// Map a zero-initialized region
    pub fn zeroed(layout: RegionLayout) -> StackResult<Self> {
        // anonymous mappings are zero-filled; map at least one byte so empty
        // stacks still own a valid mapping
        let map = MmapMut::map_anon(layout.byte_len().max(1)).map_err(|e| {
            StackError::SharedMemory(format!(
                "failed to map {} bytes for shape {:?}: {e}",
                layout.byte_len(),
                layout.shape
            ))
        })?;
        Ok(Self { map, layout })
    }

    /// Map a region holding a copy of `data`
    pub fn from_view(data: ArrayView5<'_, f32>) -> StackResult<Self> {
        let shape = data.shape();
        let layout = RegionLayout::f32([shape[0], shape[1], shape[2], shape[3], shape[4]]);
        let mut region = Self::zeroed(layout)?;
        region.view_mut().assign(&data);
        Ok(region)
    }

    /// Full value copy into a new mapping
    pub fn duplicate(&self) -> StackResult<Self> {
        let mut region = Self::zeroed(self.layout)?;
        region.as_mut_slice().copy_from_slice(self.as_slice());
        Ok(region)
    }

    /// Layout descriptor
    pub fn layout(&self) -> &RegionLayout {
        &self.layout
    }

    /// Pixels as a flat slice
    pub fn as_slice(&self) -> &[f32] {
        bytemuck::cast_slice(&self.map[..self.layout.byte_len()])
    }

    /// Pixels as a mutable flat slice
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        let byte_len = self.layout.byte_len();
        bytemuck::cast_slice_mut(&mut self.map[..byte_len])
    }

    /// Read-only 5-d view
    pub fn view(&self) -> ArrayView5<'_, f32> {
        // SAFETY: the slice holds exactly layout.len() contiguous elements
        // and the shape is the layout's; standard (row-major) strides fit.
        unsafe { ArrayView5::from_shape_ptr(self.layout.shape, self.as_slice().as_ptr()) }
    }

    /// Mutable 5-d view
    pub fn view_mut(&mut self) -> ArrayViewMut5<'_, f32> {
        let shape = self.layout.shape;
        let ptr = self.as_mut_slice().as_mut_ptr();
        // SAFETY: same layout argument as `view`; the exclusive borrow of
        // self prevents any other access for the view's lifetime.
        unsafe { ArrayViewMut5::from_shape_ptr(shape, ptr) }
    }

    /// Hand out a handle that pool workers attach to
    ///
    /// The exclusive borrow keeps the coordinator from touching the region
    /// while workers hold chunk views.
    pub fn handle(&mut self) -> RegionHandle<'_> {
        let layout = self.layout;
        let ptr = NonNull::from(self.as_mut_slice()).cast::<f32>();
        RegionHandle {
            ptr,
            layout,
            _region: PhantomData,
        }
    }
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

/// Pointer and layout of a region, passed to workers instead of pixels
#[derive(Clone, Copy)]
pub struct RegionHandle<'a> {
    ptr: NonNull<f32>,
    layout: RegionLayout,
    _region: PhantomData<&'a mut [f32]>,
}

// SAFETY: the handle only carries the address of a mapping that outlives
// 'a; mutable access goes through `AttachedRegion::chunk_mut`, whose caller
// guarantees disjoint chunks.
unsafe impl Send for RegionHandle<'_> {}
unsafe impl Sync for RegionHandle<'_> {}

impl<'a> RegionHandle<'a> {
    /// Layout descriptor of the region
    pub fn layout(&self) -> &RegionLayout {
        &self.layout
    }

    /// Attach step run per unit of pool work: rebuild the array geometry
    /// over the mapping
    pub fn attach(&self) -> AttachedRegion<'a> {
        // SAFETY: ptr addresses layout.len() f32 elements laid out row-major.
        let raw = unsafe {
            RawArrayViewMut::from_shape_ptr(IxDyn(&self.layout.shape), self.ptr.as_ptr())
        };
        AttachedRegion {
            raw,
            _region: PhantomData,
        }
    }
}

/// One attachment to a shared region
pub struct AttachedRegion<'a> {
    raw: RawArrayViewMut<f32, IxDyn>,
    _region: PhantomData<&'a mut [f32]>,
}

impl<'a> AttachedRegion<'a> {
    /// Mutable view of one chunk, with pinned dimensions dropped
    ///
    /// # Safety
    /// No other live view may overlap the positions in `slices` for the
    /// lifetime of the returned view.
    pub(crate) unsafe fn chunk_mut(&self, slices: &SliceList) -> ArrayViewMutD<'a, f32> {
        let mut raw = self.raw.clone();
        restrict(&mut raw, slices);
        drop_pinned(raw.deref_into_view_mut(), slices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::Position;
    use ndarray::Array5;

    #[test]
    fn test_zeroed_region() {
        let region = SharedRegion::zeroed(RegionLayout::f32([2, 3, 1, 4, 5])).unwrap();
        assert_eq!(region.as_slice().len(), 120);
        assert!(region.as_slice().iter().all(|&v| v == 0.0));
        assert_eq!(region.view().shape(), &[2, 3, 1, 4, 5]);
    }

    #[test]
    fn test_empty_region() {
        let region = SharedRegion::zeroed(RegionLayout::f32([0, 3, 1, 4, 5])).unwrap();
        assert!(region.layout().is_empty());
        assert!(region.as_slice().is_empty());
    }

    #[test]
    fn test_duplicate_is_independent() {
        let data = Array5::from_elem((1, 1, 1, 2, 2), 0.5f32);
        let mut original = SharedRegion::from_view(data.view()).unwrap();
        let copy = original.duplicate().unwrap();
        original.view_mut().fill(0.25);
        assert!(copy.as_slice().iter().all(|&v| v == 0.5));
        assert!(original.as_slice().iter().all(|&v| v == 0.25));
    }

    #[test]
    fn test_attached_chunk_writes_through() {
        let mut region = SharedRegion::zeroed(RegionLayout::f32([2, 2, 1, 3, 3])).unwrap();
        {
            let handle = region.handle();
            let attached = handle.attach();
            let slices: SliceList = [
                Position::Pin(1),
                Position::Pin(0),
                Position::Pin(0),
                Position::full(3),
                Position::full(3),
            ];
            let mut chunk = unsafe { attached.chunk_mut(&slices) };
            assert_eq!(chunk.shape(), &[3, 3]);
            chunk.fill(1.0);
        }
        let view = region.view();
        assert_eq!(view[[1, 0, 0, 2, 2]], 1.0);
        assert_eq!(view[[0, 0, 0, 2, 2]], 0.0);
        assert_eq!(view[[1, 1, 0, 0, 0]], 0.0);
    }

    #[test]
    fn test_attachments_coexist() {
        let mut region = SharedRegion::zeroed(RegionLayout::f32([2, 1, 1, 2, 2])).unwrap();
        {
            let handle = region.handle();
            let (first, second) = (handle.attach(), handle.attach());
            let pin = |round| -> SliceList {
                [
                    Position::Pin(round),
                    Position::Pin(0),
                    Position::Pin(0),
                    Position::full(2),
                    Position::full(2),
                ]
            };
            let mut a = unsafe { first.chunk_mut(&pin(0)) };
            let mut b = unsafe { second.chunk_mut(&pin(1)) };
            a.fill(0.25);
            b.fill(0.75);
        }
        let view = region.view();
        assert_eq!(view[[0, 0, 0, 1, 1]], 0.25);
        assert_eq!(view[[1, 0, 0, 0, 0]], 0.75);
    }
}
