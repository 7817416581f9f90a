//! Container state: placed items, free spaces and running metrics.
//!
//! A container exclusively owns its items and spaces. Containers built for
//! fitness evaluation are disposable and never shared between genomes.

use serde::Serialize;

use crate::error::{Result, validate_dimension, validate_weight};
use crate::geometry::BoundingBox;
use crate::item::{Item, Rotation};
use crate::placement::UnpackedReason;
use crate::space::FreeSpaceSet;
use crate::types::{CenterOfMassCalculator, Dimensional, EPSILON_HEIGHT, Vec3, Weighted};

/// Weight histogram by length thirds and by a 3 × 3 floor grid.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct WeightDistribution {
    /// Weight whose centre falls in the front, middle and rear third.
    pub length_thirds: [f64; 3],
    /// `grid[i][j]`: length third `i`, width third `j`.
    pub grid: [[f64; 3]; 3],
}

impl WeightDistribution {
    fn bucket(coordinate: f64, extent: f64) -> usize {
        if extent <= 0.0 {
            return 0;
        }
        ((coordinate / extent * 3.0).floor().max(0.0) as usize).min(2)
    }

    pub fn add(&mut self, center: Vec3, weight: f64, container: &Vec3) {
        let i = Self::bucket(center.x, container.x);
        let j = Self::bucket(center.y, container.y);
        self.length_thirds[i] += weight;
        self.grid[i][j] += weight;
    }
}

/// An item that could not be placed and why.
#[derive(Clone, Debug)]
pub struct UnpackedItem {
    pub item: Item,
    pub reason: UnpackedReason,
}

/// A rectangular container being packed.
#[derive(Clone, Debug)]
pub struct Container {
    dims: Vec3,
    max_weight: Option<f64>,
    placed: Vec<Item>,
    borne_loads: Vec<f64>,
    spaces: FreeSpaceSet,
    total_weight: f64,
    packed_volume: f64,
    center_of_mass: CenterOfMassCalculator,
    distribution: WeightDistribution,
    unpacked: Vec<UnpackedItem>,
}

impl Container {
    /// Creates an empty container with validated dimensions `(L, W, H)` and
    /// an optional rated payload in kg.
    ///
    /// # Examples
    /// ```
    /// use stowage::container::Container;
    /// use stowage::types::Vec3;
    ///
    /// assert!(Container::new(Vec3::new(2.0, 2.0, 2.0), None).is_ok());
    /// assert!(Container::new(Vec3::new(2.0, 0.0, 2.0), None).is_err());
    /// ```
    pub fn new(dims: Vec3, max_weight: Option<f64>) -> Result<Self> {
        validate_dimension(dims.x, "Container length")?;
        validate_dimension(dims.y, "Container width")?;
        validate_dimension(dims.z, "Container height")?;
        if let Some(limit) = max_weight {
            validate_weight(limit, "Container payload")?;
        }

        Ok(Self {
            dims,
            max_weight,
            placed: Vec::new(),
            borne_loads: Vec::new(),
            spaces: FreeSpaceSet::new(dims, None),
            total_weight: 0.0,
            packed_volume: 0.0,
            center_of_mass: CenterOfMassCalculator::new(),
            distribution: WeightDistribution::default(),
            unpacked: Vec::new(),
        })
    }

    /// Tags free spaces against a wall buffer for temperature-sensitive items.
    /// Resets the free-space set, so call it before placing anything.
    pub fn with_temperature_buffer(mut self, buffer: Option<f64>) -> Self {
        self.spaces = FreeSpaceSet::new(self.dims, buffer);
        self
    }

    /// Re-tags the free spaces of a still-empty container.
    pub(crate) fn ensure_temperature_buffer(&mut self, buffer: f64) {
        if self.placed.is_empty() {
            self.spaces = FreeSpaceSet::new(self.dims, Some(buffer));
        }
    }

    pub fn dims(&self) -> Vec3 {
        self.dims
    }

    pub fn max_weight(&self) -> Option<f64> {
        self.max_weight
    }

    pub fn placed(&self) -> &[Item] {
        &self.placed
    }

    pub fn placed_count(&self) -> usize {
        self.placed.len()
    }

    pub fn spaces(&self) -> &FreeSpaceSet {
        &self.spaces
    }

    pub fn unpacked(&self) -> &[UnpackedItem] {
        &self.unpacked
    }

    pub fn unpacked_reason(&self, name: &str) -> Option<&UnpackedReason> {
        self.unpacked
            .iter()
            .find(|entry| entry.item.name() == name)
            .map(|entry| &entry.reason)
    }

    /// Load already resting on the placed item at `index`, in kg.
    pub fn borne_load(&self, index: usize) -> f64 {
        self.borne_loads.get(index).copied().unwrap_or(0.0)
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    pub fn volume(&self) -> f64 {
        self.dims.volume()
    }

    pub fn packed_volume(&self) -> f64 {
        self.packed_volume
    }

    pub fn remaining_volume(&self) -> f64 {
        (self.volume() - self.packed_volume).max(0.0)
    }

    /// Packed volume over container volume, clamped to [0, 1].
    pub fn volume_utilization(&self) -> f64 {
        let total = self.volume();
        if total <= 0.0 {
            return 0.0;
        }
        (self.packed_volume / total).clamp(0.0, 1.0)
    }

    /// Mass-weighted centroid of placed items; origin when empty.
    pub fn center_of_gravity(&self) -> Vec3 {
        self.center_of_mass.compute().unwrap_or_default()
    }

    pub fn center_of_mass(&self) -> &CenterOfMassCalculator {
        &self.center_of_mass
    }

    /// Geometric centre of the floor plan.
    pub fn floor_center(&self) -> Vec3 {
        Vec3::new(self.dims.x / 2.0, self.dims.y / 2.0, 0.0)
    }

    pub fn weight_distribution(&self) -> &WeightDistribution {
        &self.distribution
    }

    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::from_position_and_dims(Vec3::zero(), self.dims)
    }

    /// Floor plus every distinct top-of-item height, ascending.
    pub fn candidate_heights(&self) -> Vec<f64> {
        let mut heights: Vec<f64> = std::iter::once(0.0)
            .chain(
                self.placed
                    .iter()
                    .filter_map(Item::bounding_box)
                    .map(|b| b.top_z()),
            )
            .collect();
        heights.sort_by(f64::total_cmp);
        heights.dedup_by(|a, b| (*a - *b).abs() < EPSILON_HEIGHT);
        heights
    }

    /// Fixes an item at `position` with `rotation`, consumes the free space
    /// it was placed into and adds its weight share to the supporting items.
    pub(crate) fn commit(
        &mut self,
        mut item: Item,
        position: Vec3,
        rotation: Rotation,
        space_index: usize,
        support_shares: &[(usize, f64)],
    ) {
        item.place(position, rotation);
        let dims = item.dimensions();
        let weight = item.weight();
        let center = position + dims * 0.5;

        self.spaces.consume(space_index, position, dims);
        for (index, share) in support_shares {
            if let Some(load) = self.borne_loads.get_mut(*index) {
                *load += share;
            }
        }

        self.total_weight += weight;
        self.packed_volume += dims.volume();
        self.center_of_mass.add_point(center, weight);
        self.distribution.add(center, weight, &self.dims);
        self.unpacked.retain(|entry| entry.item != item);
        self.placed.push(item);
        self.borne_loads.push(0.0);
    }

    /// Records an unplaced item, replacing an earlier entry with the same name.
    pub(crate) fn record_unpacked(&mut self, mut item: Item, reason: UnpackedReason) {
        item.unplace();
        if let Some(entry) = self.unpacked.iter_mut().find(|e| e.item == item) {
            entry.reason = reason;
            entry.item = item;
        } else {
            self.unpacked.push(UnpackedItem { item, reason });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EPSILON_GENERAL;

    fn unit(name: &str, weight: f64) -> Item {
        Item::new(name, Vec3::new(1.0, 1.0, 1.0), weight).unwrap()
    }

    #[test]
    fn rejects_non_positive_dimensions() {
        assert!(Container::new(Vec3::new(0.0, 1.0, 1.0), None).is_err());
        assert!(Container::new(Vec3::new(1.0, 1.0, -1.0), None).is_err());
        assert!(Container::new(Vec3::new(1.0, 1.0, 1.0), Some(0.0)).is_err());
    }

    #[test]
    fn commit_updates_running_metrics() {
        let mut cont = Container::new(Vec3::new(3.0, 3.0, 3.0), Some(100.0)).unwrap();
        cont.commit(unit("A", 10.0), Vec3::zero(), Rotation::Lwh, 0, &[]);
        assert!((cont.total_weight() - 10.0).abs() < EPSILON_GENERAL);
        assert!((cont.volume_utilization() - 1.0 / 27.0).abs() < EPSILON_GENERAL);
        assert_eq!(cont.center_of_gravity(), Vec3::new(0.5, 0.5, 0.5));
        assert!((cont.weight_distribution().length_thirds[0] - 10.0).abs() < EPSILON_GENERAL);
        assert!((cont.weight_distribution().grid[0][0] - 10.0).abs() < EPSILON_GENERAL);
        assert_eq!(cont.candidate_heights(), vec![0.0, 1.0]);
    }

    #[test]
    fn support_shares_accumulate_on_carriers() {
        let mut cont = Container::new(Vec3::new(1.0, 1.0, 3.0), None).unwrap();
        cont.commit(unit("Base", 10.0), Vec3::zero(), Rotation::Lwh, 0, &[]);
        let idx = cont.spaces().indices_at_height(1.0)[0];
        cont.commit(unit("Top", 4.0), Vec3::new(0.0, 0.0, 1.0), Rotation::Lwh, idx, &[(0, 4.0)]);
        assert!((cont.borne_load(0) - 4.0).abs() < EPSILON_GENERAL);
        assert_eq!(cont.borne_load(1), 0.0);
    }

    #[test]
    fn unpacked_entries_are_keyed_by_name() {
        let mut cont = Container::new(Vec3::new(1.0, 1.0, 1.0), None).unwrap();
        cont.record_unpacked(unit("A", 1.0), UnpackedReason::NoSupport);
        cont.record_unpacked(unit("A", 1.0), UnpackedReason::ConstraintViolation);
        assert_eq!(cont.unpacked().len(), 1);
        assert_eq!(cont.unpacked_reason("A"), Some(&UnpackedReason::ConstraintViolation));

        cont.commit(unit("A", 1.0), Vec3::zero(), Rotation::Lwh, 0, &[]);
        assert!(cont.unpacked().is_empty());
    }

    #[test]
    fn distribution_buckets_clamp_to_last_third() {
        let mut dist = WeightDistribution::default();
        let dims = Vec3::new(3.0, 3.0, 3.0);
        dist.add(Vec3::new(3.0, 1.5, 0.0), 5.0, &dims);
        assert_eq!(dist.length_thirds, [0.0, 0.0, 5.0]);
        assert_eq!(dist.grid[2][1], 5.0);
    }
}
