//! Physical coordinate model attached to a stack

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Physical bounds reported by a single tile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalBounds {
    /// (min, max) along x
    pub x: (f64, f64),
    /// (min, max) along y
    pub y: (f64, f64),
    /// (min, max) along z, when the tile carries one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<(f64, f64)>,
}

impl PhysicalBounds {
    /// Bounds without a z range
    pub fn planar(x: (f64, f64), y: (f64, f64)) -> Self {
        Self { x, y, z: None }
    }

    /// Attach a z range
    pub fn with_z(mut self, z: (f64, f64)) -> Self {
        self.z = Some(z);
        self
    }

    /// Flattened (x_min, x_max, y_min, y_max), used for alignment checks
    pub fn xy(&self) -> [f64; 4] {
        [self.x.0, self.x.1, self.y.0, self.y.1]
    }

    /// Bounds of a pixel sub-range of a tile spanning `height` x `width` pixels
    pub fn crop(&self, y: &Range<usize>, x: &Range<usize>, height: usize, width: usize) -> Self {
        Self {
            x: narrow(self.x, x, width),
            y: narrow(self.y, y, height),
            z: self.z,
        }
    }
}

fn narrow(bounds: (f64, f64), range: &Range<usize>, extent: usize) -> (f64, f64) {
    if extent <= 1 || range.is_empty() {
        return bounds;
    }
    let step = (bounds.1 - bounds.0) / (extent - 1) as f64;
    let start = bounds.0 + step * range.start as f64;
    let end = if range.end >= extent {
        bounds.1
    } else {
        bounds.0 + step * (range.end - 1) as f64
    };
    (start, end)
}

/// Per-axis physical coordinates of a stack
///
/// X and Y hold one sample per pixel; Z holds one value per z-plane when
/// the source tiles carried z ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateSet {
    x: Vec<f64>,
    y: Vec<f64>,
    z: Option<Vec<f64>>,
}

impl CoordinateSet {
    /// Sample x and y linearly across the pixel extent
    pub fn from_bounds(x: (f64, f64), y: (f64, f64), height: usize, width: usize) -> Self {
        Self {
            x: linspace(x.0, x.1, width),
            y: linspace(y.0, y.1, height),
            z: None,
        }
    }

    /// Build from explicit samples
    pub fn from_samples(x: Vec<f64>, y: Vec<f64>, z: Option<Vec<f64>>) -> Self {
        Self { x, y, z }
    }

    /// Zero-filled z coordinates for `n_zplanes` planes
    pub fn with_zero_z(mut self, n_zplanes: usize) -> Self {
        self.z = Some(vec![0.0; n_zplanes]);
        self
    }

    /// Set the z coordinate of one plane, if z coordinates are present
    pub fn set_z(&mut self, plane: usize, value: f64) {
        if let Some(slot) = self.z.as_mut().and_then(|z| z.get_mut(plane)) {
            *slot = value;
        }
    }

    /// Per-pixel x samples
    pub fn x(&self) -> &[f64] {
        &self.x
    }

    /// Per-pixel y samples
    pub fn y(&self) -> &[f64] {
        &self.y
    }

    /// Per-plane z values
    pub fn z(&self) -> Option<&[f64]> {
        self.z.as_deref()
    }

    /// First and last x sample
    pub fn x_range(&self) -> (f64, f64) {
        endpoints(&self.x)
    }

    /// First and last y sample
    pub fn y_range(&self) -> (f64, f64) {
        endpoints(&self.y)
    }

    /// Z value of one plane
    pub fn z_at(&self, plane: usize) -> Option<f64> {
        self.z.as_ref().and_then(|z| z.get(plane).copied())
    }

    /// Coordinates restricted to pixel and plane sub-ranges
    pub fn select(&self, y: Range<usize>, x: Range<usize>, z: Range<usize>) -> Self {
        Self {
            x: self.x[x].to_vec(),
            y: self.y[y].to_vec(),
            z: self.z.as_ref().map(|values| values[z].to_vec()),
        }
    }

    /// Collapse the z coordinates to their mean, used by z projections
    pub fn collapse_z(&self) -> Self {
        let z = self.z.as_ref().map(|values| {
            if values.is_empty() {
                vec![0.0]
            } else {
                vec![values.iter().sum::<f64>() / values.len() as f64]
            }
        });
        Self {
            x: self.x.clone(),
            y: self.y.clone(),
            z,
        }
    }
}

fn endpoints(values: &[f64]) -> (f64, f64) {
    match (values.first(), values.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => (0.0, 0.0),
    }
}

/// `n` evenly spaced samples from `start` to `stop`, both inclusive
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            let mut values: Vec<f64> = (0..n).map(|i| start + step * i as f64).collect();
            // keep the endpoint exact so exported bounds match the input
            values[n - 1] = stop;
            values
        }
    }
}

/// Physical z coordinate of a plane given its tile z range
pub fn z_plane_midpoint(range: (f64, f64)) -> f64 {
    (range.0 + range.1) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_linspace_endpoints() {
        let values = linspace(0.1, 0.3, 7);
        assert_eq!(values.len(), 7);
        assert_eq!(values[0], 0.1);
        assert_eq!(values[6], 0.3);
        assert_relative_eq!(values[3], 0.2, epsilon = 1e-12);
        assert_eq!(linspace(5.0, 9.0, 1), vec![5.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn test_select_narrows_ranges() {
        let coords = CoordinateSet::from_bounds((0.0, 10.0), (0.0, 20.0), 21, 11).with_zero_z(3);
        let sub = coords.select(5..11, 2..6, 1..2);
        assert_eq!(sub.x_range(), (2.0, 5.0));
        assert_eq!(sub.y_range(), (5.0, 10.0));
        assert_eq!(sub.z().map(<[f64]>::len), Some(1));
    }

    #[test]
    fn test_midpoint_and_set_z() {
        let mut coords = CoordinateSet::from_bounds((0.0, 1.0), (0.0, 1.0), 2, 2).with_zero_z(2);
        coords.set_z(1, z_plane_midpoint((0.5, 1.5)));
        assert_eq!(coords.z_at(1), Some(1.0));
        assert_eq!(coords.z_at(5), None);

        let collapsed = coords.collapse_z();
        assert_eq!(collapsed.z(), Some(&[0.5][..]));
    }

    #[test]
    fn test_crop_bounds() {
        let bounds = PhysicalBounds::planar((0.0, 9.0), (0.0, 4.0));
        let cropped = bounds.crop(&(1..3), &(3..10), 5, 10);
        assert_eq!(cropped.x, (3.0, 9.0));
        assert_eq!(cropped.y, (1.0, 2.0));
    }
}
