//! Common value types and traits for 3D load planning.
//!
//! The container frame is: `x` along the container length, `y` along its
//! width and `z` upwards. Every position is the minimum corner of a box.

use std::cmp::Ordering;
use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// Global numerical tolerance for floating-point comparisons.
pub const EPSILON_GENERAL: f64 = 1e-6;

/// Tolerance for height comparisons when matching stacking planes.
pub const EPSILON_HEIGHT: f64 = 1e-3;

/// Compares two values, treating differences within `eps` as equal.
#[inline]
pub fn compare_with_epsilon(a: f64, b: f64, eps: f64) -> Ordering {
    if (a - b).abs() <= eps {
        Ordering::Equal
    } else if a < b {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

/// A 3D vector, used for positions as well as dimension triples.
///
/// # Examples
/// ```
/// use stowage::types::Vec3;
///
/// let position = Vec3::new(1.0, 2.0, 3.0);
/// let dimensions = Vec3::new(10.0, 20.0, 30.0);
/// let center = position + dimensions * 0.5;
/// assert_eq!(center, Vec3::new(6.0, 12.0, 18.0));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    #[inline]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    #[inline]
    pub const fn as_tuple(&self) -> (f64, f64, f64) {
        (self.x, self.y, self.z)
    }

    #[inline]
    pub const fn as_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    #[inline]
    pub const fn from_array(values: [f64; 3]) -> Self {
        Self::new(values[0], values[1], values[2])
    }

    /// Component along the given axis (0 = x, 1 = y, 2 = z).
    #[inline]
    pub fn axis(&self, axis: usize) -> f64 {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    /// Product of all components. Meaningful for dimension vectors.
    #[inline]
    pub fn volume(&self) -> f64 {
        self.x * self.y * self.z
    }

    /// Footprint area (x × y).
    #[inline]
    pub fn base_area(&self) -> f64 {
        self.x * self.y
    }

    /// Total surface area of a box with these dimensions.
    #[inline]
    pub fn surface_area(&self) -> f64 {
        2.0 * (self.x * self.y + self.x * self.z + self.y * self.z)
    }

    #[inline]
    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    #[inline]
    pub fn distance_to(&self, other: &Self) -> f64 {
        (*self - *other).length()
    }

    /// Distance in the horizontal plane only.
    #[inline]
    pub fn distance_2d(&self, other: &Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    #[inline]
    pub fn max_component(&self) -> f64 {
        self.x.max(self.y).max(self.z)
    }

    #[inline]
    pub fn min_component(&self) -> f64 {
        self.x.min(self.y).min(self.z)
    }

    /// Checks if all components are positive and finite.
    #[inline]
    pub fn is_valid_dimension(&self) -> bool {
        [self.x, self.y, self.z]
            .iter()
            .all(|v| *v > 0.0 && v.is_finite())
    }

    /// Component-wise `<=` with tolerance.
    #[inline]
    pub fn fits_within(&self, outer: &Self, tolerance: f64) -> bool {
        self.x <= outer.x + tolerance && self.y <= outer.y + tolerance && self.z <= outer.z + tolerance
    }

    /// Midpoint between the origin and this point.
    #[inline]
    pub fn center(&self) -> Self {
        *self * 0.5
    }
}

impl Add for Vec3 {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Self;

    #[inline]
    fn mul(self, scalar: f64) -> Self::Output {
        Self::new(self.x * scalar, self.y * scalar, self.z * scalar)
    }
}

impl From<(f64, f64, f64)> for Vec3 {
    #[inline]
    fn from(tuple: (f64, f64, f64)) -> Self {
        Self::new(tuple.0, tuple.1, tuple.2)
    }
}

impl From<Vec3> for (f64, f64, f64) {
    #[inline]
    fn from(vec: Vec3) -> Self {
        vec.as_tuple()
    }
}

/// Objects with a spatial extent.
pub trait Dimensional {
    fn dimensions(&self) -> Vec3;

    fn volume(&self) -> f64 {
        self.dimensions().volume()
    }

    fn base_area(&self) -> f64 {
        self.dimensions().base_area()
    }

    fn fits_in(&self, outer: &Vec3, tolerance: f64) -> bool {
        self.dimensions().fits_within(outer, tolerance)
    }
}

/// Objects anchored at a minimum corner inside the container.
pub trait Positioned {
    fn position(&self) -> Vec3;
}

/// Objects with a weight in kg.
pub trait Weighted {
    fn weight(&self) -> f64;
}

/// Accumulates weighted points for a mass-weighted centroid.
#[derive(Clone, Debug, Default)]
pub struct CenterOfMassCalculator {
    weighted: Vec3,
    total_weight: f64,
}

impl CenterOfMassCalculator {
    pub fn new() -> Self {
        Self {
            weighted: Vec3::zero(),
            total_weight: 0.0,
        }
    }

    pub fn add_point(&mut self, point: Vec3, weight: f64) {
        self.weighted = self.weighted + point * weight;
        self.total_weight += weight;
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Returns `None` while no weight has been accumulated.
    pub fn compute(&self) -> Option<Vec3> {
        if self.total_weight <= 0.0 {
            None
        } else {
            Some(self.weighted * (1.0 / self.total_weight))
        }
    }

    /// Horizontal distance of the centroid to a reference point, 0 when empty.
    pub fn distance_2d_to(&self, reference: &Vec3) -> f64 {
        self.compute()
            .map(|center| center.distance_2d(reference))
            .unwrap_or(0.0)
    }
}

impl Default for Vec3 {
    fn default() -> Self {
        Self::zero()
    }
}
