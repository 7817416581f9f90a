//! Wall-clearance and insulation rules for temperature-sensitive items.
//!
//! An item is flagged when the route temperature lies outside its tolerated
//! range. A flagged item must keep `buffer` clear of all six container faces
//! and must either touch enough neighbours or sit in the central region.
//! The placement pre-filter and the placement-time re-check both go through
//! this handler, so the rule is enforced identically on both paths.

use crate::geometry::BoundingBox;
use crate::item::Item;
use crate::space::Space;
use crate::types::{EPSILON_GENERAL, Vec3};

/// Default clearance from every container face, in length units.
pub const DEFAULT_TEMPERATURE_BUFFER: f64 = 0.3;

/// Default number of touching neighbours required outside the central region.
pub const DEFAULT_MIN_INSULATING_NEIGHBORS: usize = 2;

/// Wall distance at which compliance scores saturate.
pub const DEFAULT_TARGET_BUFFER: f64 = 0.5;

/// Why a flagged item may not sit at a position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemperatureViolation {
    /// Closer than the buffer to at least one container face.
    Clearance,
    /// Too few touching neighbours and not in the central region.
    Insulation,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TemperatureHandler {
    buffer: f64,
    min_neighbors: usize,
    target_buffer: f64,
}

impl Default for TemperatureHandler {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPERATURE_BUFFER, DEFAULT_MIN_INSULATING_NEIGHBORS)
    }
}

impl TemperatureHandler {
    pub fn new(buffer: f64, min_neighbors: usize) -> Self {
        Self {
            buffer,
            min_neighbors,
            target_buffer: DEFAULT_TARGET_BUFFER.max(buffer),
        }
    }

    pub fn buffer(&self) -> f64 {
        self.buffer
    }

    pub fn min_neighbors(&self) -> usize {
        self.min_neighbors
    }

    pub fn target_buffer(&self) -> f64 {
        self.target_buffer
    }

    /// Sets `needs_insulation` on every item; returns how many were flagged.
    pub fn flag_items(&self, items: &mut [Item], route_temperature: Option<f64>) -> usize {
        items
            .iter_mut()
            .map(|item| {
                item.flag_insulation(route_temperature);
                usize::from(item.needs_insulation())
            })
            .sum()
    }

    /// Whether some allowed rotation of the item fits the buffered interior.
    pub fn zone_fits(&self, item: &Item, container: &Vec3) -> bool {
        let inner = Vec3::new(
            container.x - 2.0 * self.buffer,
            container.y - 2.0 * self.buffer,
            container.z - 2.0 * self.buffer,
        );
        if inner.min_component() <= 0.0 {
            return false;
        }
        item.allowed_rotations()
            .iter()
            .any(|rot| item.rotated_dims(*rot).fits_within(&inner, EPSILON_GENERAL))
    }

    /// Positions inside `space` that respect the wall clearance: the corner
    /// pushed off the near walls, then the spot closest to the container's
    /// centre. Empty if the space is not temperature-safe.
    pub fn candidate_positions(&self, space: &Space, dims: &Vec3, container: &Vec3) -> Vec<Vec3> {
        if !space.temperature_safe {
            return Vec::new();
        }

        let corner = Vec3::new(
            space.position.x.max(self.buffer),
            space.position.y.max(self.buffer),
            space.position.z,
        );
        let centered = |axis: usize| -> f64 {
            let lo = space.position.axis(axis).max(self.buffer);
            let hi = (space.position.axis(axis) + space.dims.axis(axis))
                .min(container.axis(axis) - self.buffer)
                - dims.axis(axis);
            let ideal = (container.axis(axis) - dims.axis(axis)) / 2.0;
            if hi < lo { lo } else { ideal.clamp(lo, hi) }
        };
        let central = Vec3::new(centered(0), centered(1), space.position.z);

        let mut positions = Vec::with_capacity(2);
        for pos in [corner, central] {
            let bbox = BoundingBox::from_position_and_dims(pos, *dims);
            if !self.has_clearance(&bbox, container) || !space.can_fit_at(&pos, dims) {
                continue;
            }
            if positions.iter().any(|p: &Vec3| p.distance_to(&pos) < EPSILON_GENERAL) {
                continue;
            }
            positions.push(pos);
        }
        positions
    }

    #[inline]
    pub fn has_clearance(&self, bbox: &BoundingBox, container: &Vec3) -> bool {
        bbox.min_wall_distance(container) + EPSILON_GENERAL >= self.buffer
    }

    /// Whether the box centre lies within a quarter of each horizontal
    /// extent around the container centroid.
    pub fn is_central(&self, bbox: &BoundingBox, container: &Vec3) -> bool {
        let center = bbox.center();
        (center.x - container.x / 2.0).abs() <= container.x / 4.0 + EPSILON_GENERAL
            && (center.y - container.y / 2.0).abs() <= container.y / 4.0 + EPSILON_GENERAL
    }

    /// Number of placed items sharing a face with `bbox`.
    pub fn insulating_neighbors<'a>(
        &self,
        bbox: &BoundingBox,
        placed: impl IntoIterator<Item = &'a Item>,
    ) -> usize {
        placed
            .into_iter()
            .filter_map(Item::bounding_box)
            .filter(|other| bbox.contact_area(other) > EPSILON_GENERAL)
            .count()
    }

    /// Full placement check for a flagged item.
    pub fn check<'a>(
        &self,
        bbox: &BoundingBox,
        container: &Vec3,
        placed: impl IntoIterator<Item = &'a Item>,
    ) -> Result<(), TemperatureViolation> {
        if !self.has_clearance(bbox, container) {
            return Err(TemperatureViolation::Clearance);
        }
        if self.is_central(bbox, container) {
            return Ok(());
        }
        if self.insulating_neighbors(bbox, placed) >= self.min_neighbors {
            Ok(())
        } else {
            Err(TemperatureViolation::Insulation)
        }
    }

    /// Clearance normalised against the target buffer, capped at 1.0.
    pub fn compliance(&self, bbox: &BoundingBox, container: &Vec3) -> f64 {
        if self.target_buffer <= 0.0 {
            return 1.0;
        }
        (bbox.min_wall_distance(container) / self.target_buffer).clamp(0.0, 1.0)
    }
}
