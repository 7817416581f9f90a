//! Placement engine for loading items into a single container.
//!
//! Items are tried at the floor and then at every existing top-of-item
//! height, in ascending order. At each height every allowed rotation is
//! matched against the free spaces whose floor lies at that height; valid
//! candidates are scored and the best one wins, ties going to the first
//! candidate found. The rules enforced are:
//! - containment and no overlap
//! - direct support for elevated items, with an optional minimum support ratio
//! - no stacking on non-stackable items or anywhere above HIGH-fragility items
//! - load-bearing capacity of supporting items (cumulative)
//! - wall clearance and insulation for temperature-flagged items

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;

use crate::container::Container;
use crate::geometry::{BoundingBox, overlap_1d};
use crate::item::{Fragility, Item, Rotation, Stackable, expand_items};
use crate::metrics::item_stability;
use crate::temperature::{
    DEFAULT_MIN_INSULATING_NEIGHBORS, DEFAULT_TEMPERATURE_BUFFER, TemperatureHandler,
    TemperatureViolation,
};
use crate::types::{Dimensional, EPSILON_GENERAL, Vec3, Weighted, compare_with_epsilon};

/// Weights of the placement score components.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct ScoreWeights {
    /// Stability of the item at the candidate position.
    pub support: f64,
    /// Inverse of the summed gaps to the nearest obstacle in all six directions.
    pub efficiency: f64,
    /// Faces touching a wall, the floor or the ceiling.
    pub wall_contact: f64,
    /// Face area shared with already placed items.
    pub contact_area: f64,
    /// Centre-of-gravity movement towards the floor centre.
    pub balance: f64,
    /// Wall distance and insulation bonus for flagged items.
    pub temperature: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            support: 0.25,
            efficiency: 0.20,
            wall_contact: 0.15,
            contact_area: 0.20,
            balance: 0.10,
            temperature: 0.10,
        }
    }
}

/// Configuration for the placement engine.
///
/// Contains the tolerances and thresholds that steer placement.
#[derive(Copy, Clone, Debug)]
pub struct PackingConfig {
    /// Clearance that flagged items keep from all six container faces
    pub temperature_buffer: f64,
    /// Touching neighbours a flagged item needs outside the central region
    pub min_insulating_neighbors: usize,
    /// Minimum supported share of the footprint (0.0 = any overlap suffices)
    pub support_ratio: f64,
    /// Tolerance for height comparisons
    pub height_epsilon: f64,
    /// General numeric tolerance
    pub general_epsilon: f64,
    /// Retry failed items once after all other items were attempted
    pub retry_failed: bool,
    /// Placement score weights
    pub score: ScoreWeights,
}

impl PackingConfig {
    pub const DEFAULT_TEMPERATURE_BUFFER: f64 = DEFAULT_TEMPERATURE_BUFFER;
    pub const DEFAULT_MIN_INSULATING_NEIGHBORS: usize = DEFAULT_MIN_INSULATING_NEIGHBORS;
    pub const DEFAULT_SUPPORT_RATIO: f64 = 0.0;
    pub const DEFAULT_HEIGHT_EPSILON: f64 = 1e-3;
    pub const DEFAULT_GENERAL_EPSILON: f64 = 1e-6;

    /// Creates a builder for a custom configuration.
    pub fn builder() -> PackingConfigBuilder {
        PackingConfigBuilder::default()
    }

    pub fn temperature_handler(&self) -> TemperatureHandler {
        TemperatureHandler::new(self.temperature_buffer, self.min_insulating_neighbors)
    }
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            temperature_buffer: Self::DEFAULT_TEMPERATURE_BUFFER,
            min_insulating_neighbors: Self::DEFAULT_MIN_INSULATING_NEIGHBORS,
            support_ratio: Self::DEFAULT_SUPPORT_RATIO,
            height_epsilon: Self::DEFAULT_HEIGHT_EPSILON,
            general_epsilon: Self::DEFAULT_GENERAL_EPSILON,
            retry_failed: true,
            score: ScoreWeights::default(),
        }
    }
}

/// Builder for [`PackingConfig`].
#[derive(Clone, Debug, Default)]
pub struct PackingConfigBuilder {
    config: PackingConfig,
}

impl PackingConfigBuilder {
    pub fn temperature_buffer(mut self, buffer: f64) -> Self {
        self.config.temperature_buffer = buffer;
        self
    }

    pub fn min_insulating_neighbors(mut self, count: usize) -> Self {
        self.config.min_insulating_neighbors = count;
        self
    }

    pub fn support_ratio(mut self, ratio: f64) -> Self {
        self.config.support_ratio = ratio;
        self
    }

    pub fn height_epsilon(mut self, epsilon: f64) -> Self {
        self.config.height_epsilon = epsilon;
        self
    }

    pub fn general_epsilon(mut self, epsilon: f64) -> Self {
        self.config.general_epsilon = epsilon;
        self
    }

    pub fn retry_failed(mut self, retry: bool) -> Self {
        self.config.retry_failed = retry;
        self
    }

    pub fn score_weights(mut self, weights: ScoreWeights) -> Self {
        self.config.score = weights;
        self
    }

    pub fn build(self) -> PackingConfig {
        self.config
    }
}

/// Container axis, named as in the container frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Length,
    Width,
    Height,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::Length, Axis::Width, Axis::Height];

    fn index(self) -> usize {
        match self {
            Axis::Length => 0,
            Axis::Width => 1,
            Axis::Height => 2,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Length => write!(f, "length"),
            Axis::Width => write!(f, "width"),
            Axis::Height => write!(f, "height"),
        }
    }
}

/// Why an item ended up unpacked.
///
/// Rendered to text only at the reporting boundary.
#[derive(Clone, Debug, PartialEq)]
pub enum UnpackedReason {
    /// No allowed rotation fits the container.
    ExceedsContainer { axis: Axis, item: f64, container: f64 },
    /// The item is larger than the volume still free.
    InsufficientVolume { required: f64, remaining: f64 },
    /// Every elevated candidate lacked an item directly beneath.
    NoSupport,
    StackedOnNonStackable,
    ExceedsLoadCapacity { load: f64, capacity: f64 },
    StackedOnFragile,
    /// A flagged item does not fit the wall-buffered interior.
    TemperatureZoneTooSmall { buffer: f64 },
    TemperatureClearance { buffer: f64 },
    TemperatureInsulation { required_neighbors: usize },
    /// Catch-all when no rule explains the failure.
    ConstraintViolation,
}

impl UnpackedReason {
    pub fn code(&self) -> &'static str {
        match self {
            UnpackedReason::ExceedsContainer { .. } => "exceeds_container",
            UnpackedReason::InsufficientVolume { .. } => "insufficient_volume",
            UnpackedReason::NoSupport => "no_support",
            UnpackedReason::StackedOnNonStackable => "stacked_on_non_stackable",
            UnpackedReason::ExceedsLoadCapacity { .. } => "exceeds_load_capacity",
            UnpackedReason::StackedOnFragile => "stacked_on_fragile",
            UnpackedReason::TemperatureZoneTooSmall { .. } => "temperature_zone_too_small",
            UnpackedReason::TemperatureClearance { .. } => "temperature_clearance",
            UnpackedReason::TemperatureInsulation { .. } => "temperature_insulation",
            UnpackedReason::ConstraintViolation => "constraint_violation",
        }
    }
}

impl fmt::Display for UnpackedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnpackedReason::ExceedsContainer {
                axis,
                item,
                container,
            } => write!(
                f,
                "Item {axis} {item:.2} exceeds container {axis} {container:.2} in every allowed rotation"
            ),
            UnpackedReason::InsufficientVolume {
                required,
                remaining,
            } => write!(
                f,
                "Insufficient remaining volume: needs {required:.3}, only {remaining:.3} left"
            ),
            UnpackedReason::NoSupport => {
                write!(f, "No supporting item beneath any free position")
            }
            UnpackedReason::StackedOnNonStackable => {
                write!(f, "Only free positions are on top of non-stackable items")
            }
            UnpackedReason::ExceedsLoadCapacity { load, capacity } => write!(
                f,
                "Load of {load:.2} kg exceeds the load-bearing capacity {capacity:.2} kg of the item beneath"
            ),
            UnpackedReason::StackedOnFragile => {
                write!(f, "Only free positions are above a HIGH-fragility item")
            }
            UnpackedReason::TemperatureZoneTooSmall { buffer } => write!(
                f,
                "Temperature-sensitive item too large for the zone {buffer:.2} away from all walls"
            ),
            UnpackedReason::TemperatureClearance { buffer } => write!(
                f,
                "Temperature-sensitive item cannot keep {buffer:.2} clearance from every wall"
            ),
            UnpackedReason::TemperatureInsulation { required_neighbors } => write!(
                f,
                "Temperature-sensitive item lacks {required_neighbors} insulating neighbours outside the central region"
            ),
            UnpackedReason::ConstraintViolation => {
                write!(f, "No suitable position (constraint violation)")
            }
        }
    }
}

/// Why a concrete position was refused.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Rejection {
    OutOfBounds,
    Overlap,
    NoSupport,
    InsufficientSupport { ratio: f64 },
    NonStackable,
    FragileBelow,
    LoadCapacity { load: f64, capacity: f64 },
    Temperature(TemperatureViolation),
}

/// Counts rejections while searching, to explain a failure afterwards.
#[derive(Clone, Debug, Default)]
struct RejectionTally {
    no_support: usize,
    non_stackable: usize,
    fragile: usize,
    load: Option<(f64, f64)>,
    clearance: usize,
    insulation: usize,
}

impl RejectionTally {
    fn record(&mut self, rejection: Rejection) {
        match rejection {
            Rejection::OutOfBounds | Rejection::Overlap => {}
            Rejection::NoSupport | Rejection::InsufficientSupport { .. } => self.no_support += 1,
            Rejection::NonStackable => self.non_stackable += 1,
            Rejection::FragileBelow => self.fragile += 1,
            Rejection::LoadCapacity { load, capacity } => {
                // Keep the smallest excess, it is the closest miss.
                let excess = load - capacity;
                if self.load.is_none_or(|(l, c)| excess < l - c) {
                    self.load = Some((load, capacity));
                }
            }
            Rejection::Temperature(TemperatureViolation::Clearance) => self.clearance += 1,
            Rejection::Temperature(TemperatureViolation::Insulation) => self.insulation += 1,
        }
    }
}

/// How rotations are chosen for an item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationPolicy {
    /// Score every allowed rotation.
    Any,
    /// Use this rotation if allowed, otherwise the first allowed one. No fallback.
    Fixed(Rotation),
    /// Try this rotation first, then the remaining ones in canonical order.
    Preferred(Rotation),
}

/// Events emitted while packing, for live progress output.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum PackEvent {
    /// An item was placed.
    ItemPlaced {
        name: String,
        position: (f64, f64, f64),
        dims: (f64, f64, f64),
        rotation: Rotation,
        total_weight: f64,
    },
    /// An item could not be placed.
    ItemRejected {
        name: String,
        reason_code: String,
        reason_text: String,
    },
    /// Packing finished.
    Finished { placed: usize, unpacked: usize },
}

#[derive(Clone, Debug)]
struct Candidate {
    position: Vec3,
    rotation: Rotation,
    space_index: usize,
    shares: Vec<(usize, f64)>,
    score: f64,
}

/// Finds and commits positions for items in a container.
#[derive(Clone, Debug, Default)]
pub struct PlacementEngine {
    config: PackingConfig,
    temperature: TemperatureHandler,
}

impl PlacementEngine {
    pub fn new(config: PackingConfig) -> Self {
        Self {
            temperature: config.temperature_handler(),
            config,
        }
    }

    pub fn config(&self) -> &PackingConfig {
        &self.config
    }

    pub fn temperature(&self) -> &TemperatureHandler {
        &self.temperature
    }

    /// Expands quantities and bundles and flags items against the route
    /// temperature.
    pub fn prepare_items(&self, items: &[Item], bounds: &Vec3, route_temperature: Option<f64>) -> Vec<Item> {
        let mut expanded = expand_items(items, bounds);
        let flagged = self.temperature.flag_items(&mut expanded, route_temperature);
        if flagged > 0 {
            tracing::debug!(flagged, "items need insulation on this route");
        }
        expanded
    }

    /// Packs `items` into `cont` using the engine's own ordering.
    ///
    /// # Parameters
    /// * `cont` - Target container, usually empty
    /// * `items` - Input rows; quantities and bundles are expanded here
    /// * `route_temperature` - Route temperature in °C, if known
    pub fn pack(&self, cont: &mut Container, items: &[Item], route_temperature: Option<f64>) {
        self.pack_with_progress(cont, items, route_temperature, |_| {});
    }

    /// Like [`PlacementEngine::pack`], calling `on_event` for every placement
    /// decision.
    pub fn pack_with_progress(
        &self,
        cont: &mut Container,
        items: &[Item],
        route_temperature: Option<f64>,
        mut on_event: impl FnMut(&PackEvent),
    ) {
        let mut prepared = self.prepare_items(items, &cont.dims(), route_temperature);
        sort_for_packing(&mut prepared);
        let sequence = prepared
            .into_iter()
            .map(|item| (item, RotationPolicy::Any))
            .collect();
        self.pack_sequence_with_progress(cont, sequence, &mut on_event);
    }

    /// Packs already prepared items in exactly the given order.
    pub fn pack_sequence(&self, cont: &mut Container, sequence: Vec<(Item, RotationPolicy)>) {
        self.pack_sequence_with_progress(cont, sequence, &mut |_| {});
    }

    pub fn pack_sequence_with_progress(
        &self,
        cont: &mut Container,
        sequence: Vec<(Item, RotationPolicy)>,
        on_event: &mut dyn FnMut(&PackEvent),
    ) {
        if sequence.iter().any(|(item, _)| item.needs_insulation()) {
            cont.ensure_temperature_buffer(self.config.temperature_buffer);
        }

        let mut deferred = Vec::new();
        for (item, policy) in sequence {
            match self.place_item(cont, item, policy, on_event) {
                Ok(()) => {}
                Err((item, reason)) if self.config.retry_failed => deferred.push((item, policy, reason)),
                Err((item, reason)) => self.reject(cont, item, reason, on_event),
            }
        }

        for (item, policy, first_reason) in deferred {
            match self.place_item(cont, item, policy, on_event) {
                Ok(()) => {}
                // A geometric misfit stays the clearer explanation.
                Err((item, reason)) => {
                    let reason = match first_reason {
                        UnpackedReason::ExceedsContainer { .. } => first_reason,
                        _ => reason,
                    };
                    self.reject(cont, item, reason, on_event);
                }
            }
        }

        on_event(&PackEvent::Finished {
            placed: cont.placed_count(),
            unpacked: cont.unpacked().len(),
        });
    }

    fn reject(
        &self,
        cont: &mut Container,
        item: Item,
        reason: UnpackedReason,
        on_event: &mut dyn FnMut(&PackEvent),
    ) {
        tracing::debug!(item = item.name(), reason = reason.code(), "item left unpacked");
        on_event(&PackEvent::ItemRejected {
            name: item.name().to_string(),
            reason_code: reason.code().to_string(),
            reason_text: reason.to_string(),
        });
        cont.record_unpacked(item, reason);
    }

    /// Places one item, trying every candidate height in ascending order.
    ///
    /// # Returns
    /// The item and the reason it failed if no height admits it
    fn place_item(
        &self,
        cont: &mut Container,
        item: Item,
        policy: RotationPolicy,
        on_event: &mut dyn FnMut(&PackEvent),
    ) -> Result<(), (Item, UnpackedReason)> {
        let valid = item.valid_rotations(&cont.dims());
        if valid.is_empty() {
            let reason = oversize_reason(&item, &cont.dims());
            return Err((item, reason));
        }

        let attempts: Vec<Vec<Rotation>> = match policy {
            RotationPolicy::Any => vec![valid],
            RotationPolicy::Fixed(rotation) => {
                let chosen = if valid.contains(&rotation) { rotation } else { valid[0] };
                vec![vec![chosen]]
            }
            RotationPolicy::Preferred(rotation) => {
                let mut order = Vec::with_capacity(valid.len());
                if valid.contains(&rotation) {
                    order.push(vec![rotation]);
                }
                order.extend(valid.iter().filter(|r| **r != rotation).map(|r| vec![*r]));
                order
            }
        };

        let mut tally = RejectionTally::default();
        for rotations in &attempts {
            for height in cont.candidate_heights() {
                if let Some(candidate) = self.try_place(cont, &item, height, rotations, &mut tally) {
                    let rotation = candidate.rotation;
                    let position = candidate.position;
                    cont.commit(item, position, rotation, candidate.space_index, &candidate.shares);
                    if let Some(placed) = cont.placed().last() {
                        on_event(&PackEvent::ItemPlaced {
                            name: placed.name().to_string(),
                            position: position.as_tuple(),
                            dims: placed.dims().as_tuple(),
                            rotation,
                            total_weight: cont.total_weight(),
                        });
                    }
                    return Ok(());
                }
            }
        }

        let reason = self.determine_reason(cont, &item, &tally);
        Err((item, reason))
    }

    /// Best valid candidate for `item` among free spaces at `height`.
    ///
    /// # Parameters
    /// * `cont` - Container to search
    /// * `item` - Item to place
    /// * `height` - Floor height of the spaces to consider
    /// * `rotations` - Rotations to try, in order
    ///
    /// # Returns
    /// The highest scoring candidate; on equal scores the first one found
    fn try_place(
        &self,
        cont: &Container,
        item: &Item,
        height: f64,
        rotations: &[Rotation],
        tally: &mut RejectionTally,
    ) -> Option<Candidate> {
        let dims = cont.dims();
        let indices = cont.spaces().indices_at_height(height);
        let mut best: Option<Candidate> = None;

        for &rotation in rotations {
            let rotated = item.rotated_dims(rotation);
            if height + rotated.z > dims.z + self.config.general_epsilon {
                continue;
            }

            for &index in &indices {
                let Some(space) = cont.spaces().get(index) else {
                    continue;
                };
                if !space.can_fit(&rotated) {
                    continue;
                }

                let positions = if item.needs_insulation() {
                    let positions = self.temperature.candidate_positions(space, &rotated, &dims);
                    if positions.is_empty() {
                        tally.record(Rejection::Temperature(TemperatureViolation::Clearance));
                    }
                    positions
                } else {
                    vec![space.position]
                };

                for position in positions {
                    match self.validate(cont, item, position, rotated) {
                        Ok(shares) => {
                            let score = self.score(cont, item, position, rotated);
                            let better = best.as_ref().is_none_or(|current| {
                                compare_with_epsilon(score, current.score, self.config.general_epsilon)
                                    == Ordering::Greater
                            });
                            if better {
                                best = Some(Candidate {
                                    position,
                                    rotation,
                                    space_index: index,
                                    shares,
                                    score,
                                });
                            }
                        }
                        Err(rejection) => tally.record(rejection),
                    }
                }
            }
        }

        best
    }

    /// Checks whether `item` may sit at `position` with `rotation`.
    pub fn check_position(
        &self,
        cont: &Container,
        item: &Item,
        position: Vec3,
        rotation: Rotation,
    ) -> Result<(), Rejection> {
        self.validate(cont, item, position, item.rotated_dims(rotation))
            .map(|_| ())
    }

    /// Validates a position and returns the load share per supporting item.
    fn validate(
        &self,
        cont: &Container,
        item: &Item,
        position: Vec3,
        dims: Vec3,
    ) -> Result<Vec<(usize, f64)>, Rejection> {
        let container = cont.dims();
        let bbox = BoundingBox::from_position_and_dims(position, dims);
        if !bbox.is_within(&container) {
            return Err(Rejection::OutOfBounds);
        }

        let placed = cont.placed();
        if placed
            .iter()
            .filter_map(Item::bounding_box)
            .any(|other| bbox.intersects(&other))
        {
            return Err(Rejection::Overlap);
        }

        let mut shares = Vec::new();
        if position.z > self.config.height_epsilon {
            shares = self.validate_support(cont, item, &bbox)?;
        }

        if item.needs_insulation() {
            self.temperature
                .check(&bbox, &container, placed)
                .map_err(Rejection::Temperature)?;
        }

        Ok(shares)
    }

    fn validate_support(
        &self,
        cont: &Container,
        item: &Item,
        bbox: &BoundingBox,
    ) -> Result<Vec<(usize, f64)>, Rejection> {
        let placed = cont.placed();

        // Nothing may ever rest above a HIGH-fragility footprint.
        let above_fragile = placed.iter().any(|other| {
            other.fragility() == Fragility::High
                && other.bounding_box().is_some_and(|b| {
                    b.top_z() <= bbox.min.z + self.config.height_epsilon && bbox.overlaps_xy(&b)
                })
        });
        if above_fragile {
            return Err(Rejection::FragileBelow);
        }

        let supporters: Vec<(usize, &Item, f64)> = placed
            .iter()
            .enumerate()
            .filter_map(|(idx, other)| {
                let b = other.bounding_box()?;
                let area = bbox.overlap_area_xy(&b);
                ((b.top_z() - bbox.min.z).abs() < self.config.height_epsilon
                    && area > self.config.general_epsilon)
                    .then_some((idx, other, area))
            })
            .collect();

        if supporters.is_empty() {
            return Err(Rejection::NoSupport);
        }
        if supporters
            .iter()
            .any(|(_, other, _)| other.stackable() == Stackable::No)
        {
            return Err(Rejection::NonStackable);
        }

        let supported: f64 = supporters.iter().map(|(_, _, area)| area).sum();
        let base = bbox.dimensions().base_area();
        let ratio = if base > 0.0 { supported / base } else { 0.0 };
        if ratio + self.config.general_epsilon < self.config.support_ratio {
            return Err(Rejection::InsufficientSupport { ratio });
        }

        let weight = item.weight();
        let mut shares = Vec::with_capacity(supporters.len());
        for (idx, other, area) in supporters {
            let share = weight * area / supported;
            let capacity = other.load_capacity();
            let load = cont.borne_load(idx) + share;
            if capacity > 0.0 && load > capacity + self.config.general_epsilon {
                return Err(Rejection::LoadCapacity { load, capacity });
            }
            shares.push((idx, share));
        }
        Ok(shares)
    }

    /// Weighted placement score, higher is better.
    fn score(&self, cont: &Container, item: &Item, position: Vec3, dims: Vec3) -> f64 {
        let weights = &self.config.score;
        let container = cont.dims();
        let bbox = BoundingBox::from_position_and_dims(position, dims);
        let placed = cont.placed();

        let support = item_stability(&bbox, placed, &container);

        let gaps = nearest_gaps(&bbox, placed, &container);
        let relative_gap: f64 = (0..3)
            .map(|axis| (gaps[2 * axis] + gaps[2 * axis + 1]) / container.axis(axis))
            .sum();
        let efficiency = 1.0 / (1.0 + relative_gap);

        let touching_walls = bbox
            .wall_distances(&container)
            .iter()
            .filter(|d| d.abs() < self.config.height_epsilon)
            .count();
        let wall_contact = (touching_walls as f64 / 3.0).min(1.0);

        let shared: f64 = placed
            .iter()
            .filter_map(Item::bounding_box)
            .map(|other| bbox.contact_area(&other))
            .sum();
        let surface = dims.surface_area();
        let contact_area = if surface > 0.0 { (shared / surface).min(1.0) } else { 0.0 };

        let balance = balance_improvement(cont, &bbox, item.weight());

        let temperature = if item.needs_insulation() {
            let neighbours = self.temperature.insulating_neighbors(&bbox, placed);
            let insulation = if self.temperature.is_central(&bbox, &container) {
                1.0
            } else {
                (neighbours as f64 / self.temperature.min_neighbors().max(1) as f64).min(1.0)
            };
            0.5 * self.temperature.compliance(&bbox, &container) + 0.5 * insulation
        } else {
            0.0
        };

        weights.support * support
            + weights.efficiency * efficiency
            + weights.wall_contact * wall_contact
            + weights.contact_area * contact_area
            + weights.balance * balance
            + weights.temperature * temperature
    }

    /// Picks the most specific explanation for a failed item.
    fn determine_reason(&self, cont: &Container, item: &Item, tally: &RejectionTally) -> UnpackedReason {
        let container = cont.dims();
        if item.valid_rotations(&container).is_empty() {
            return oversize_reason(item, &container);
        }

        let required = item.volume();
        let remaining = cont.remaining_volume();
        if required > remaining + self.config.general_epsilon {
            return UnpackedReason::InsufficientVolume {
                required,
                remaining,
            };
        }

        if item.needs_insulation() {
            let buffer = self.temperature.buffer();
            if !self.temperature.zone_fits(item, &container) {
                return UnpackedReason::TemperatureZoneTooSmall { buffer };
            }
            if tally.insulation > 0 {
                return UnpackedReason::TemperatureInsulation {
                    required_neighbors: self.temperature.min_neighbors(),
                };
            }
            if tally.clearance > 0 {
                return UnpackedReason::TemperatureClearance { buffer };
            }
        }

        if tally.fragile > 0 {
            return UnpackedReason::StackedOnFragile;
        }
        if let Some((load, capacity)) = tally.load {
            return UnpackedReason::ExceedsLoadCapacity { load, capacity };
        }
        if tally.non_stackable > 0 {
            return UnpackedReason::StackedOnNonStackable;
        }
        if tally.no_support > 0 {
            return UnpackedReason::NoSupport;
        }
        UnpackedReason::ConstraintViolation
    }
}

/// Default packing order: flagged items first, smallest first among them;
/// the rest by base area descending, height ascending, weight descending.
/// The sort is stable, so equal items keep their input order.
pub fn sort_for_packing(items: &mut [Item]) {
    items.sort_by(|a, b| {
        b.needs_insulation()
            .cmp(&a.needs_insulation())
            .then_with(|| {
                if a.needs_insulation() && b.needs_insulation() {
                    a.volume().total_cmp(&b.volume())
                } else {
                    Ordering::Equal
                }
            })
            .then_with(|| b.base_area().total_cmp(&a.base_area()))
            .then_with(|| a.dims().z.total_cmp(&b.dims().z))
            .then_with(|| b.weight().total_cmp(&a.weight()))
    });
}

/// Names the axis on which an item that fits in no rotation is too large.
fn oversize_reason(item: &Item, container: &Vec3) -> UnpackedReason {
    let dims = item.base_dims();
    let axis = Axis::ALL
        .into_iter()
        .find(|axis| dims.axis(axis.index()) > container.axis(axis.index()) + EPSILON_GENERAL)
        .unwrap_or_else(|| {
            // Fits upright but no allowed rotation: blame the tightest axis.
            Axis::ALL
                .into_iter()
                .max_by(|a, b| {
                    let ra = dims.axis(a.index()) / container.axis(a.index());
                    let rb = dims.axis(b.index()) / container.axis(b.index());
                    ra.total_cmp(&rb)
                })
                .unwrap_or(Axis::Height)
        });
    UnpackedReason::ExceedsContainer {
        axis,
        item: dims.axis(axis.index()),
        container: container.axis(axis.index()),
    }
}

/// Gap to the nearest wall or placed item in each of the six directions,
/// ordered like [`BoundingBox::wall_distances`].
fn nearest_gaps(bbox: &BoundingBox, placed: &[Item], container: &Vec3) -> [f64; 6] {
    let mut gaps = bbox.wall_distances(container);
    for other in placed.iter().filter_map(Item::bounding_box) {
        for axis in 0..3 {
            let facing = (0..3).filter(|a| *a != axis).all(|a| {
                overlap_1d(bbox.min.axis(a), bbox.max.axis(a), other.min.axis(a), other.max.axis(a))
                    > EPSILON_GENERAL
            });
            if !facing {
                continue;
            }
            if other.max.axis(axis) <= bbox.min.axis(axis) + EPSILON_GENERAL {
                gaps[2 * axis] = gaps[2 * axis].min(bbox.min.axis(axis) - other.max.axis(axis));
            }
            if other.min.axis(axis) + EPSILON_GENERAL >= bbox.max.axis(axis) {
                gaps[2 * axis + 1] = gaps[2 * axis + 1].min(other.min.axis(axis) - bbox.max.axis(axis));
            }
        }
    }
    gaps.map(|g| g.max(0.0))
}

/// Score in [0, 1]; 0.5 when the centre of gravity does not move relative to
/// the floor centre, higher when it moves closer.
fn balance_improvement(cont: &Container, bbox: &BoundingBox, weight: f64) -> f64 {
    let reference = cont.floor_center();
    let half_diagonal = reference.distance_2d(&Vec3::zero());
    if half_diagonal <= EPSILON_GENERAL {
        return 0.5;
    }

    let mut after = cont.center_of_mass().clone();
    after.add_point(bbox.center(), weight);
    let distance_after = after.distance_2d_to(&reference);
    let distance_before = if cont.placed().is_empty() {
        distance_after
    } else {
        cont.center_of_mass().distance_2d_to(&reference)
    };

    (0.5 + (distance_before - distance_after) / half_diagonal).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::TemperatureRange;
    use crate::types::EPSILON_HEIGHT;

    fn container(l: f64, w: f64, h: f64) -> Container {
        Container::new(Vec3::new(l, w, h), None).unwrap()
    }

    fn unit(name: &str, weight: f64) -> Item {
        Item::new(name, Vec3::new(1.0, 1.0, 1.0), weight).unwrap()
    }

    fn assert_invariants(cont: &Container) {
        let dims = cont.dims();
        let boxes: Vec<BoundingBox> = cont.placed().iter().filter_map(Item::bounding_box).collect();
        assert_eq!(boxes.len(), cont.placed_count());

        for (i, a) in boxes.iter().enumerate() {
            assert!(a.is_within(&dims), "item {i} leaves the container");
            for b in boxes.iter().skip(i + 1) {
                assert!(!a.intersects(b), "placed items overlap");
            }
            if a.min.z > EPSILON_HEIGHT {
                let supported = boxes
                    .iter()
                    .any(|b| (b.top_z() - a.min.z).abs() < EPSILON_HEIGHT && a.overlaps_xy(b));
                assert!(supported, "elevated item {i} has no support");
            }
        }

        let weight: f64 = cont.placed().iter().map(Item::weight).sum();
        assert!((cont.total_weight() - weight).abs() < 1e-9);
        let volume: f64 = boxes.iter().map(BoundingBox::volume).sum();
        assert!((cont.volume_utilization() - (volume / cont.volume()).min(1.0)).abs() < 1e-9);
    }

    #[test]
    fn eight_unit_cubes_fill_the_container() {
        let mut cont = container(2.0, 2.0, 2.0);
        let items = vec![unit("Box", 10.0).with_quantity(8).unwrap()];
        PlacementEngine::default().pack(&mut cont, &items, None);

        assert_eq!(cont.placed_count(), 8);
        assert!(cont.unpacked().is_empty());
        assert!((cont.volume_utilization() - 1.0).abs() < 1e-9);
        assert!((cont.total_weight() - 80.0).abs() < 1e-9);
        assert_invariants(&cont);
    }

    #[test]
    fn oversized_item_cites_container_length() {
        let mut cont = container(2.0, 2.0, 2.0);
        let items = vec![Item::new("Beam", Vec3::new(3.0, 1.0, 1.0), 10.0).unwrap()];
        PlacementEngine::default().pack(&mut cont, &items, None);

        assert_eq!(cont.placed_count(), 0);
        assert_eq!(cont.unpacked().len(), 1);
        let reason = cont.unpacked_reason("Beam").unwrap();
        assert_eq!(
            reason,
            &UnpackedReason::ExceedsContainer {
                axis: Axis::Length,
                item: 3.0,
                container: 2.0
            }
        );
        assert_eq!(reason.code(), "exceeds_container");
        assert!(reason.to_string().contains("length"));
    }

    #[test]
    fn flagged_item_in_corner_is_rejected() {
        let engine = PlacementEngine::default();
        let cont = container(2.0, 2.0, 2.0).with_temperature_buffer(Some(0.3));
        let mut item = Item::new("Vaccine", Vec3::new(0.5, 0.5, 0.5), 1.0)
            .unwrap()
            .with_temperature_range("10 to 30".parse::<TemperatureRange>().unwrap());
        item.flag_insulation(Some(40.0));
        assert!(item.needs_insulation());

        assert_eq!(
            engine.check_position(&cont, &item, Vec3::zero(), Rotation::Lwh),
            Err(Rejection::Temperature(TemperatureViolation::Clearance))
        );
    }

    #[test]
    fn flagged_item_is_placed_centrally_on_a_pallet() {
        let engine = PlacementEngine::default();
        let mut cont = container(3.0, 3.0, 3.0);
        let items = vec![
            Item::new("Pallet", Vec3::new(3.0, 3.0, 0.5), 20.0).unwrap(),
            Item::new("Vaccine", Vec3::new(0.5, 0.5, 0.5), 1.0)
                .unwrap()
                .with_temperature_range("10 to 30".parse().unwrap()),
        ];
        engine.pack(&mut cont, &items, Some(40.0));

        assert_eq!(cont.placed_count(), 2);
        let vaccine = cont.placed().iter().find(|i| i.name() == "Vaccine").unwrap();
        assert!(vaccine.needs_insulation());
        let bbox = vaccine.bounding_box().unwrap();
        assert!(bbox.min_wall_distance(&cont.dims()) + EPSILON_GENERAL >= 0.3);
        assert!(engine.temperature().is_central(&bbox, &cont.dims()));
        assert_invariants(&cont);
    }

    #[test]
    fn flagged_item_without_a_base_reports_clearance() {
        let mut cont = container(2.0, 2.0, 2.0);
        let items = vec![
            Item::new("Vaccine", Vec3::new(0.5, 0.5, 0.5), 1.0)
                .unwrap()
                .with_temperature_range("10 to 30".parse().unwrap()),
        ];
        PlacementEngine::default().pack(&mut cont, &items, Some(40.0));
        assert_eq!(
            cont.unpacked_reason("Vaccine"),
            Some(&UnpackedReason::TemperatureClearance { buffer: 0.3 })
        );
    }

    #[test]
    fn flagged_item_too_large_for_buffered_zone() {
        let mut cont = container(2.0, 2.0, 2.0);
        let items = vec![
            Item::new("Cooler", Vec3::new(1.6, 1.6, 1.0), 1.0)
                .unwrap()
                .with_temperature_range("-5 to 5".parse().unwrap()),
        ];
        PlacementEngine::default().pack(&mut cont, &items, Some(20.0));
        assert_eq!(
            cont.unpacked_reason("Cooler"),
            Some(&UnpackedReason::TemperatureZoneTooSmall { buffer: 0.3 })
        );
    }

    #[test]
    fn load_bearing_capacity_blocks_heavy_top() {
        let mut cont = container(1.0, 1.0, 3.0);
        let items = vec![
            unit("Base", 10.0).with_load_capacity(5.0).unwrap(),
            unit("Heavy", 8.0),
        ];
        PlacementEngine::default().pack(&mut cont, &items, None);

        assert_eq!(cont.placed_count(), 1);
        assert_eq!(
            cont.unpacked_reason("Heavy"),
            Some(&UnpackedReason::ExceedsLoadCapacity {
                load: 8.0,
                capacity: 5.0
            })
        );
    }

    #[test]
    fn load_accumulates_across_stacked_items() {
        let mut cont = container(1.0, 1.0, 4.0);
        let items = vec![
            unit("Base", 10.0).with_load_capacity(7.0).unwrap(),
            unit("Middle", 4.0),
            unit("Top", 4.0),
        ];
        PlacementEngine::default().pack(&mut cont, &items, None);

        // Top rests on Middle, which is uncapped, so only Middle loads Base.
        assert_eq!(cont.placed_count(), 3);
        assert!((cont.borne_load(0) - 4.0).abs() < EPSILON_GENERAL);

        let mut side_by_side = container(2.0, 1.0, 2.0);
        let plate = Item::new("Plate", Vec3::new(2.0, 1.0, 1.0), 10.0)
            .unwrap()
            .with_load_capacity(7.0)
            .unwrap();
        let items = vec![plate, unit("A", 4.0), unit("B", 4.0)];
        PlacementEngine::default().pack(&mut side_by_side, &items, None);
        assert_eq!(side_by_side.placed_count(), 2);
        assert!(matches!(
            side_by_side.unpacked_reason("B"),
            Some(UnpackedReason::ExceedsLoadCapacity { .. })
        ));
    }

    #[test]
    fn nothing_rests_on_fragile_or_non_stackable_items() {
        let mut cont = container(1.0, 1.0, 3.0);
        let items = vec![
            unit("Glass", 10.0).with_fragility(Fragility::High),
            unit("Box", 5.0),
        ];
        PlacementEngine::default().pack(&mut cont, &items, None);
        assert_eq!(cont.unpacked_reason("Box"), Some(&UnpackedReason::StackedOnFragile));

        let mut cont = container(1.0, 1.0, 3.0);
        let items = vec![unit("Drum", 10.0).with_stackable(Stackable::No), unit("Box", 5.0)];
        PlacementEngine::default().pack(&mut cont, &items, None);
        assert_eq!(
            cont.unpacked_reason("Box"),
            Some(&UnpackedReason::StackedOnNonStackable)
        );
    }

    #[test]
    fn elevated_position_without_support_is_rejected() {
        let engine = PlacementEngine::default();
        let mut cont = container(2.0, 2.0, 2.0);
        engine.pack(&mut cont, &[unit("Base", 10.0)], None);
        let base = cont.placed()[0].bounding_box().unwrap();

        let floating = Vec3::new(base.max.x, base.min.y, 1.0);
        assert_eq!(
            engine.check_position(&cont, &unit("Float", 1.0), floating, Rotation::Lwh),
            Err(Rejection::NoSupport)
        );
        assert_eq!(
            engine.check_position(&cont, &unit("Clash", 1.0), base.min, Rotation::Lwh),
            Err(Rejection::Overlap)
        );
        assert_eq!(
            engine.check_position(&cont, &unit("Out", 1.0), Vec3::new(1.5, 0.0, 0.0), Rotation::Lwh),
            Err(Rejection::OutOfBounds)
        );
    }

    #[test]
    fn support_ratio_knob_rejects_overhangs() {
        let config = PackingConfig::builder().support_ratio(0.75).build();
        let engine = PlacementEngine::new(config);
        let mut cont = container(2.0, 1.0, 2.0);
        engine.pack(&mut cont, &[unit("Base", 10.0)], None);

        let overhang = Vec3::new(0.5, 0.0, 1.0);
        assert!(matches!(
            engine.check_position(&cont, &unit("Top", 1.0), overhang, Rotation::Lwh),
            Err(Rejection::InsufficientSupport { .. })
        ));
        assert!(PlacementEngine::default()
            .check_position(&cont, &unit("Top", 1.0), overhang, Rotation::Lwh)
            .is_ok());
    }

    #[test]
    fn unexplained_failure_is_a_constraint_violation() {
        // A fragile plank cannot stand up, and no free space is long enough.
        let mut cont = container(2.0, 1.0, 2.0);
        let items = vec![
            unit("Block", 10.0),
            Item::new("Plank", Vec3::new(2.0, 1.0, 1.0), 5.0)
                .unwrap()
                .with_fragility(Fragility::High),
        ];
        let sequence = items.into_iter().map(|i| (i, RotationPolicy::Any)).collect();
        PlacementEngine::default().pack_sequence(&mut cont, sequence);

        assert_eq!(cont.unpacked_reason("Plank"), Some(&UnpackedReason::ConstraintViolation));
        assert!(UnpackedReason::ConstraintViolation
            .to_string()
            .contains("constraint violation"));
    }

    #[test]
    fn insufficient_volume_is_reported_before_search_details() {
        let mut cont = container(2.0, 2.0, 1.0);
        let items = vec![
            Item::new("Slab", Vec3::new(2.0, 1.5, 1.0), 10.0).unwrap(),
            Item::new("Wide", Vec3::new(2.0, 1.0, 1.0), 10.0).unwrap(),
        ];
        PlacementEngine::default().pack(&mut cont, &items, None);
        assert!(matches!(
            cont.unpacked_reason("Wide"),
            Some(UnpackedReason::InsufficientVolume { .. })
        ));
    }

    #[test]
    fn sort_puts_flagged_items_first_then_large_bases() {
        let mut flagged_big = Item::new("ColdBig", Vec3::new(1.0, 1.0, 1.0), 1.0)
            .unwrap()
            .with_temperature_range("0 to 5".parse().unwrap());
        let mut flagged_small = Item::new("ColdSmall", Vec3::new(0.5, 0.5, 0.5), 1.0)
            .unwrap()
            .with_temperature_range("0 to 5".parse().unwrap());
        flagged_big.flag_insulation(Some(20.0));
        flagged_small.flag_insulation(Some(20.0));
        let wide = Item::new("Wide", Vec3::new(2.0, 2.0, 1.0), 1.0).unwrap();
        let tall = Item::new("Tall", Vec3::new(1.0, 1.0, 2.0), 1.0).unwrap();
        let flat = Item::new("Flat", Vec3::new(1.0, 1.0, 0.5), 1.0).unwrap();

        let mut items = vec![tall, flagged_big, wide, flat, flagged_small];
        sort_for_packing(&mut items);
        let names: Vec<&str> = items.iter().map(Item::name).collect();
        assert_eq!(names, vec!["ColdSmall", "ColdBig", "Wide", "Flat", "Tall"]);
    }

    #[test]
    fn fixed_rotation_falls_back_to_first_allowed() {
        let engine = PlacementEngine::default();
        let mut cont = container(3.0, 1.0, 1.0);
        let plank = Item::new("Plank", Vec3::new(1.0, 3.0, 1.0), 5.0).unwrap();
        engine.pack_sequence(&mut cont, vec![(plank, RotationPolicy::Fixed(Rotation::Lwh))]);
        assert_eq!(cont.placed_count(), 1);
        assert_eq!(cont.placed()[0].dims(), Vec3::new(3.0, 1.0, 1.0));
    }

    #[test]
    fn preferred_rotation_tries_the_others_on_failure() {
        let engine = PlacementEngine::default();
        let mut cont = container(2.0, 1.0, 2.0);
        engine.pack_sequence(&mut cont, vec![(unit("Block", 1.0), RotationPolicy::Any)]);

        // Lying flat no longer fits beside the block; standing up does.
        let post = Item::new("Post", Vec3::new(2.0, 1.0, 1.0), 1.0).unwrap();
        let mut fixed = cont.clone();
        engine.pack_sequence(&mut fixed, vec![(post.clone(), RotationPolicy::Fixed(Rotation::Lwh))]);
        assert_eq!(fixed.placed_count(), 1);

        engine.pack_sequence(&mut cont, vec![(post, RotationPolicy::Preferred(Rotation::Lwh))]);
        assert_eq!(cont.placed_count(), 2);
        assert_eq!(cont.placed()[1].dims(), Vec3::new(1.0, 1.0, 2.0));
        assert_invariants(&cont);
    }

    #[test]
    fn progress_events_cover_every_item() {
        let mut cont = container(2.0, 2.0, 2.0);
        let items = vec![
            unit("Box", 1.0).with_quantity(2).unwrap(),
            Item::new("Beam", Vec3::new(3.0, 1.0, 1.0), 1.0).unwrap(),
        ];
        let mut events = Vec::new();
        PlacementEngine::default().pack_with_progress(&mut cont, &items, None, |e| {
            events.push(e.clone())
        });

        let placed = events
            .iter()
            .filter(|e| matches!(e, PackEvent::ItemPlaced { .. }))
            .count();
        let rejected = events
            .iter()
            .filter(|e| matches!(e, PackEvent::ItemRejected { reason_code, .. } if reason_code == "exceeds_container"))
            .count();
        assert_eq!((placed, rejected), (2, 1));
        assert!(matches!(
            events.last(),
            Some(PackEvent::Finished {
                placed: 2,
                unpacked: 1
            })
        ));
        let json = serde_json::to_string(&events[0]).unwrap();
        assert!(json.contains("\"type\":\"ItemPlaced\""));
    }

    #[test]
    fn mixed_load_respects_all_invariants() {
        let mut cont = Container::new(Vec3::new(4.0, 3.0, 3.0), Some(500.0)).unwrap();
        let items = vec![
            Item::new("Crate", Vec3::new(1.2, 1.0, 0.8), 40.0).unwrap().with_quantity(6).unwrap(),
            Item::new("Drum", Vec3::new(0.6, 0.6, 0.9), 30.0)
                .unwrap()
                .with_quantity(4)
                .unwrap()
                .with_stackable(Stackable::No),
            Item::new("Glass", Vec3::new(0.8, 0.5, 0.6), 8.0)
                .unwrap()
                .with_quantity(3)
                .unwrap()
                .with_fragility(Fragility::High),
            Item::new("Can", Vec3::new(0.3, 0.3, 0.4), 2.0)
                .unwrap()
                .with_quantity(12)
                .unwrap()
                .with_bundle(true)
                .with_load_capacity(10.0)
                .unwrap(),
            Item::new("Serum", Vec3::new(0.4, 0.4, 0.3), 1.0)
                .unwrap()
                .with_quantity(2)
                .unwrap()
                .with_temperature_range("2 to 8".parse().unwrap()),
        ];
        let engine = PlacementEngine::default();
        engine.pack(&mut cont, &items, Some(25.0));
        assert_invariants(&cont);

        let handler = engine.temperature();
        for item in cont.placed().iter().filter(|i| i.needs_insulation()) {
            let bbox = item.bounding_box().unwrap();
            assert!(handler.has_clearance(&bbox, &cont.dims()));
            let others = cont.placed().iter().filter(|o| o.name() != item.name());
            assert!(
                handler.is_central(&bbox, &cont.dims())
                    || handler.insulating_neighbors(&bbox, others) >= 2
            );
        }

        for (i, carrier) in cont.placed().iter().enumerate() {
            if carrier.load_capacity() > 0.0 {
                assert!(cont.borne_load(i) <= carrier.load_capacity() + EPSILON_GENERAL);
            }
        }
        assert_eq!(cont.placed_count() + cont.unpacked().len(), 6 + 4 + 3 + 1 + 2);
    }
}
