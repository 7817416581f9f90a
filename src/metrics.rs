//! Packing metrics and the weighted fitness built from them.
//!
//! Every function here is a pure read of a [`Container`]. Non-finite or
//! negative intermediate values are clamped to zero so that one degenerate
//! evaluation cannot poison an optimizer run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::container::Container;
use crate::geometry::BoundingBox;
use crate::item::Item;
use crate::temperature::TemperatureHandler;
use crate::types::{EPSILON_GENERAL, EPSILON_HEIGHT, Vec3, Weighted};

/// Support ratio at which the full-support bonus applies.
const FULL_SUPPORT_RATIO: f64 = 0.8;

/// Clamps NaN, infinities and negatives to 0.0.
#[inline]
pub fn sanitize(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 { value } else { 0.0 }
}

pub fn volume_utilization(cont: &Container) -> f64 {
    sanitize(cont.volume_utilization())
}

pub fn total_weight(cont: &Container) -> f64 {
    sanitize(cont.total_weight())
}

pub fn center_of_gravity(cont: &Container) -> Vec3 {
    cont.center_of_gravity()
}

/// Inverse spread of weight across the three length thirds, in (0, 1].
pub fn weight_balance_score(cont: &Container) -> f64 {
    let thirds = cont.weight_distribution().length_thirds;
    let total: f64 = thirds.iter().sum();
    if total <= EPSILON_GENERAL {
        return 1.0;
    }
    let mean = total / 3.0;
    let variance = thirds.iter().map(|w| (w - mean).powi(2)).sum::<f64>() / 3.0;
    let score = 1.0 / (1.0 + variance / (mean * mean));
    if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 }
}

/// Observed face-to-face contacts over `itemCount × 6`.
pub fn interlocking_score(cont: &Container) -> f64 {
    let boxes: Vec<BoundingBox> = cont.placed().iter().filter_map(Item::bounding_box).collect();
    if boxes.is_empty() {
        return 0.0;
    }
    let mut contacts = 0usize;
    for (i, a) in boxes.iter().enumerate() {
        for b in boxes.iter().skip(i + 1) {
            if a.contact_area(b) > EPSILON_GENERAL {
                contacts += 2;
            }
        }
    }
    sanitize(contacts as f64 / (boxes.len() * 6) as f64).min(1.0)
}

/// Stability of a box resting among `placed` inside a container of `dims`.
///
/// Floor placements score 1.0. Elevated boxes blend support ratio (0.5),
/// a bonus for at least 80 % support (0.2), a low-profile bonus (0.15) and a
/// side-wall contact bonus (0.15).
pub fn item_stability<'a>(
    bbox: &BoundingBox,
    placed: impl IntoIterator<Item = &'a Item>,
    dims: &Vec3,
) -> f64 {
    if bbox.min.z <= EPSILON_HEIGHT {
        return 1.0;
    }

    let base = bbox.dimensions().base_area();
    if base <= EPSILON_GENERAL {
        return 0.0;
    }

    let supported: f64 = placed
        .into_iter()
        .filter_map(Item::bounding_box)
        .filter(|other| (other.top_z() - bbox.min.z).abs() < EPSILON_HEIGHT)
        .map(|other| bbox.overlap_area_xy(&other))
        .sum();
    let ratio = (supported / base).clamp(0.0, 1.0);

    let extent = bbox.dimensions();
    let low_profile = 1.0 - extent.z / extent.max_component().max(EPSILON_GENERAL);

    let walls = bbox.wall_distances(dims);
    let touches_side_wall = walls[..4].iter().any(|d| d.abs() < EPSILON_HEIGHT);

    let score = 0.5 * ratio
        + if ratio >= FULL_SUPPORT_RATIO { 0.2 } else { 0.0 }
        + 0.15 * low_profile
        + if touches_side_wall { 0.15 } else { 0.0 };
    sanitize(score).min(1.0)
}

/// Mean per-item stability; 0.0 for an empty container.
pub fn stability_score(cont: &Container) -> f64 {
    let placed = cont.placed();
    if placed.is_empty() {
        return 0.0;
    }
    let dims = cont.dims();
    let sum: f64 = placed
        .iter()
        .filter_map(Item::bounding_box)
        .map(|bbox| item_stability(&bbox, placed, &dims))
        .sum();
    sanitize(sum / placed.len() as f64).min(1.0)
}

/// 1.0 without packed flagged items, otherwise their mean normalised
/// wall clearance.
pub fn temperature_compliance(cont: &Container, handler: &TemperatureHandler) -> f64 {
    let dims = cont.dims();
    let scores: Vec<f64> = cont
        .placed()
        .iter()
        .filter(|item| item.needs_insulation())
        .filter_map(Item::bounding_box)
        .map(|bbox| handler.compliance(&bbox, &dims))
        .collect();
    if scores.is_empty() {
        return 1.0;
    }
    sanitize(scores.iter().sum::<f64>() / scores.len() as f64).min(1.0)
}

/// 1.0 within the rated payload, degrading linearly to 0 at twice the payload.
pub fn weight_capacity_score(cont: &Container) -> f64 {
    let Some(limit) = cont.max_weight() else {
        return 1.0;
    };
    let total = cont.total_weight();
    if total <= limit {
        return 1.0;
    }
    sanitize(1.0 - (total - limit) / limit).min(1.0)
}

/// Share of the requested items that were placed.
pub fn items_packed_ratio(cont: &Container, total_items: usize) -> f64 {
    if total_items == 0 {
        return 1.0;
    }
    sanitize(cont.placed_count() as f64 / total_items as f64).min(1.0)
}

/// Metric values that produced a fitness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsBreakdown {
    pub volume_utilization: f64,
    pub stability: f64,
    pub contact: f64,
    pub weight_balance: f64,
    pub items_packed: f64,
    pub temperature_compliance: f64,
    pub weight_capacity: f64,
    pub total_weight: f64,
    pub placed_count: usize,
}

impl MetricsBreakdown {
    pub fn from_container(cont: &Container, total_items: usize, handler: &TemperatureHandler) -> Self {
        Self {
            volume_utilization: volume_utilization(cont),
            stability: stability_score(cont),
            contact: interlocking_score(cont),
            weight_balance: weight_balance_score(cont),
            items_packed: items_packed_ratio(cont, total_items),
            temperature_compliance: temperature_compliance(cont, handler),
            weight_capacity: weight_capacity_score(cont),
            total_weight: total_weight(cont),
            placed_count: cont.placed_count(),
        }
    }
}

/// Relative importance of each metric in the fitness scalar.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitnessWeights {
    pub volume: f64,
    pub stability: f64,
    pub contact: f64,
    pub weight_balance: f64,
    pub items_packed: f64,
    pub temperature: f64,
}

impl Default for FitnessWeights {
    fn default() -> Self {
        Self {
            volume: 0.50,
            stability: 0.10,
            contact: 0.10,
            weight_balance: 0.10,
            items_packed: 0.15,
            temperature: 0.05,
        }
    }
}

impl FitnessWeights {
    pub const KEYS: [&'static str; 6] = [
        "volume",
        "stability",
        "contact",
        "weight_balance",
        "items_packed",
        "temperature",
    ];

    fn values(&self) -> [f64; 6] {
        [
            self.volume,
            self.stability,
            self.contact,
            self.weight_balance,
            self.items_packed,
            self.temperature,
        ]
    }

    fn from_values(values: [f64; 6]) -> Self {
        Self {
            volume: values[0],
            stability: values[1],
            contact: values[2],
            weight_balance: values[3],
            items_packed: values[4],
            temperature: values[5],
        }
    }

    pub fn sum(&self) -> f64 {
        self.values().iter().sum()
    }

    /// Degenerate when no weight is positive or any weight is not finite.
    pub fn is_degenerate(&self) -> bool {
        let values = self.values();
        values.iter().any(|v| !v.is_finite()) || values.iter().all(|v| *v <= 0.0)
    }

    /// Scales weights to sum to 1.0, dropping negatives. `None` if degenerate.
    pub fn normalized(&self) -> Option<Self> {
        if self.is_degenerate() {
            return None;
        }
        let clipped = self.values().map(|v| v.max(0.0));
        let total: f64 = clipped.iter().sum();
        if total <= EPSILON_GENERAL {
            return None;
        }
        Some(Self::from_values(clipped.map(|v| v / total)))
    }

    /// Builds normalised weights from a name → value mapping. Unknown keys
    /// are ignored and missing keys count as 0.
    pub fn from_mapping(mapping: &HashMap<String, f64>) -> Option<Self> {
        if mapping.is_empty() {
            return None;
        }
        let mut values = [0.0; 6];
        for (key, value) in mapping {
            if let Some(idx) = Self::KEYS.iter().position(|k| k.eq_ignore_ascii_case(key.trim())) {
                values[idx] = *value;
            }
        }
        Self::from_values(values).normalized()
    }

    pub fn to_mapping(&self) -> HashMap<String, f64> {
        Self::KEYS
            .iter()
            .zip(self.values())
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    /// Weighted sum of the metrics, scaled by the weight-capacity score.
    pub fn combine(&self, metrics: &MetricsBreakdown) -> f64 {
        let weighted = self.volume * metrics.volume_utilization
            + self.stability * metrics.stability
            + self.contact * metrics.contact
            + self.weight_balance * metrics.weight_balance
            + self.items_packed * metrics.items_packed
            + self.temperature * metrics.temperature_compliance;
        sanitize(weighted * metrics.weight_capacity)
    }
}
