//! Geometric helpers for axis-aligned boxes.
//!
//! All functions are pure and are shared by placement validation and by every
//! scoring routine.

use crate::types::{EPSILON_GENERAL, EPSILON_HEIGHT, Vec3};

/// Overlap length of two intervals, at least 0.0.
///
/// # Example
/// ```
/// use stowage::geometry::overlap_1d;
///
/// assert_eq!(overlap_1d(0.0, 5.0, 3.0, 8.0), 2.0);
/// assert_eq!(overlap_1d(0.0, 1.0, 2.0, 3.0), 0.0);
/// ```
#[inline]
pub fn overlap_1d(a_min: f64, a_max: f64, b_min: f64, b_max: f64) -> f64 {
    (a_max.min(b_max) - a_min.max(b_min)).max(0.0)
}

/// Overlap area of two rectangles given as (min corner, extent) in the plane.
#[inline]
pub fn rect_overlap_area(a_pos: (f64, f64), a_ext: (f64, f64), b_pos: (f64, f64), b_ext: (f64, f64)) -> f64 {
    overlap_1d(a_pos.0, a_pos.0 + a_ext.0, b_pos.0, b_pos.0 + b_ext.0)
        * overlap_1d(a_pos.1, a_pos.1 + a_ext.1, b_pos.1, b_pos.1 + b_ext.1)
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn from_position_and_dims(position: Vec3, dims: Vec3) -> Self {
        Self {
            min: position,
            max: position + dims,
        }
    }

    /// Strict 3D intersection; touching faces do not count.
    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        let eps = EPSILON_GENERAL;
        !(self.max.x <= other.min.x + eps
            || other.max.x <= self.min.x + eps
            || self.max.y <= other.min.y + eps
            || other.max.y <= self.min.y + eps
            || self.max.z <= other.min.z + eps
            || other.max.z <= self.min.z + eps)
    }

    /// Strict intersection of the XY projections.
    #[inline]
    pub fn overlaps_xy(&self, other: &Self) -> bool {
        self.overlap_area_xy(other) > EPSILON_GENERAL
    }

    #[inline]
    pub fn overlap_area_xy(&self, other: &Self) -> f64 {
        overlap_1d(self.min.x, self.max.x, other.min.x, other.max.x)
            * overlap_1d(self.min.y, self.max.y, other.min.y, other.max.y)
    }

    /// Area of the face shared with `other`, or 0.0 when the boxes do not touch.
    ///
    /// Two boxes share a face when they touch along one axis and their
    /// projections onto the remaining two axes overlap.
    pub fn contact_area(&self, other: &Self) -> f64 {
        let mut area = 0.0;
        for axis in 0..3 {
            let touching = (self.max.axis(axis) - other.min.axis(axis)).abs() < EPSILON_HEIGHT
                || (other.max.axis(axis) - self.min.axis(axis)).abs() < EPSILON_HEIGHT;
            if !touching {
                continue;
            }
            let (u, v) = match axis {
                0 => (1, 2),
                1 => (0, 2),
                _ => (0, 1),
            };
            let face = overlap_1d(self.min.axis(u), self.max.axis(u), other.min.axis(u), other.max.axis(u))
                * overlap_1d(self.min.axis(v), self.max.axis(v), other.min.axis(v), other.max.axis(v));
            area += face;
        }
        area
    }

    /// Checks whether this box lies within `[0, dims]` on every axis.
    #[inline]
    pub fn is_within(&self, dims: &Vec3) -> bool {
        self.min.x >= -EPSILON_GENERAL
            && self.min.y >= -EPSILON_GENERAL
            && self.min.z >= -EPSILON_GENERAL
            && self.max.fits_within(dims, EPSILON_GENERAL)
    }

    /// Distances to the six faces of a container spanning `[0, dims]`,
    /// ordered `[-x, +x, -y, +y, -z (floor), +z (ceiling)]`.
    pub fn wall_distances(&self, dims: &Vec3) -> [f64; 6] {
        [
            self.min.x,
            dims.x - self.max.x,
            self.min.y,
            dims.y - self.max.y,
            self.min.z,
            dims.z - self.max.z,
        ]
    }

    /// Minimum distance to any of the six container faces.
    pub fn min_wall_distance(&self, dims: &Vec3) -> f64 {
        self.wall_distances(dims)
            .into_iter()
            .fold(f64::INFINITY, f64::min)
    }

    #[inline]
    pub fn top_z(&self) -> f64 {
        self.max.z
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn dimensions(&self) -> Vec3 {
        self.max - self.min
    }

    #[inline]
    pub fn volume(&self) -> f64 {
        self.dimensions().volume()
    }
}
