//! Serializable result of an optimizer run.
//!
//! Unpacked reasons are rendered to text only here.

use serde::Serialize;

use crate::container::Container;
use crate::item::{Fragility, Item, Rotation};
use crate::metrics::{FitnessWeights, MetricsBreakdown};
use crate::optimizer::{OptimizationResult, WeightsSource};
use crate::types::Weighted;

/// Single placed item in the report.
///
/// # Fields
/// * `name` - Item name after quantity expansion
/// * `pos` - Minimum corner (x, y, z) in the container
/// * `dims` - Dimensions as placed, after rotation
#[derive(Clone, Debug, Serialize)]
pub struct PlacedEntry {
    pub name: String,
    pub pos: (f64, f64, f64),
    pub dims: (f64, f64, f64),
    pub rotation: Rotation,
    pub weight: f64,
    pub fragility: Fragility,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub boxing_type: String,
    pub bundled_count: usize,
    pub needs_insulation: bool,
}

impl PlacedEntry {
    fn from_item(item: &Item) -> Option<Self> {
        let pos = item.placed_position()?;
        Some(Self {
            name: item.name().to_string(),
            pos: pos.as_tuple(),
            dims: item.dims().as_tuple(),
            rotation: item.rotation(),
            weight: item.weight(),
            fragility: item.fragility(),
            boxing_type: item.boxing_type().to_string(),
            bundled_count: item.bundled_count(),
            needs_insulation: item.needs_insulation(),
        })
    }
}

/// Item that stayed outside the container.
#[derive(Clone, Debug, Serialize)]
pub struct UnpackedEntry {
    pub name: String,
    pub dims: (f64, f64, f64),
    pub weight: f64,
    pub reason_code: String,
    pub reason: String,
}

/// Weight per length third and per 3 × 3 floor cell.
#[derive(Clone, Debug, Serialize)]
pub struct WeightReport {
    pub total: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_weight: Option<f64>,
    pub center_of_gravity: (f64, f64, f64),
    pub length_thirds: [f64; 3],
    pub grid: [[f64; 3]; 3],
}

/// Complete report for one packed container.
#[derive(Clone, Debug, Serialize)]
pub struct PackReport {
    pub container_dims: (f64, f64, f64),
    pub is_complete: bool,
    pub placed: Vec<PlacedEntry>,
    pub unpacked: Vec<UnpackedEntry>,
    pub weight: WeightReport,
    pub metrics: MetricsBreakdown,
    pub fitness: f64,
    pub search_fitness: f64,
    pub generations: usize,
    pub weights: FitnessWeights,
    pub weights_source: WeightsSource,
}

impl PackReport {
    /// Renders a report from a packed container and its metrics.
    pub fn from_container(cont: &Container, metrics: MetricsBreakdown, fitness: f64) -> Self {
        let placed = cont.placed().iter().filter_map(PlacedEntry::from_item).collect();
        let unpacked = cont
            .unpacked()
            .iter()
            .map(|entry| UnpackedEntry {
                name: entry.item.name().to_string(),
                dims: entry.item.original_dims().as_tuple(),
                weight: entry.item.weight(),
                reason_code: entry.reason.code().to_string(),
                reason: entry.reason.to_string(),
            })
            .collect();
        let distribution = cont.weight_distribution();

        Self {
            container_dims: cont.dims().as_tuple(),
            is_complete: cont.unpacked().is_empty(),
            placed,
            unpacked,
            weight: WeightReport {
                total: cont.total_weight(),
                max_weight: cont.max_weight(),
                center_of_gravity: cont.center_of_gravity().as_tuple(),
                length_thirds: distribution.length_thirds,
                grid: distribution.grid,
            },
            metrics,
            fitness,
            search_fitness: fitness,
            generations: 0,
            weights: FitnessWeights::default(),
            weights_source: WeightsSource::Default,
        }
    }

    /// Renders the report of an optimizer run.
    pub fn from_result(result: &OptimizationResult) -> Self {
        Self {
            search_fitness: result.best_fitness,
            generations: result.generations,
            weights: result.weights,
            weights_source: result.weights_source,
            ..Self::from_container(&result.container, result.metrics, result.final_fitness)
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::PlacementEngine;
    use crate::types::Vec3;

    #[test]
    fn renders_placed_and_unpacked_items() {
        let mut cont = Container::new(Vec3::new(2.0, 2.0, 2.0), Some(100.0)).unwrap();
        let items = vec![
            Item::new("Box", Vec3::new(1.0, 1.0, 1.0), 10.0)
                .unwrap()
                .with_quantity(2)
                .unwrap()
                .with_boxing_type("carton"),
            Item::new("Beam", Vec3::new(3.0, 0.5, 0.5), 5.0).unwrap(),
        ];
        let engine = PlacementEngine::default();
        engine.pack(&mut cont, &items, None);
        let metrics = MetricsBreakdown::from_container(&cont, 3, engine.temperature());
        let report = PackReport::from_container(&cont, metrics, 0.5);

        assert!(!report.is_complete);
        assert_eq!(report.placed.len(), 2);
        assert_eq!(report.placed[0].boxing_type, "carton");
        assert_eq!(report.unpacked.len(), 1);
        assert_eq!(report.unpacked[0].name, "Beam");
        assert_eq!(report.unpacked[0].reason_code, "exceeds_container");
        assert!(report.unpacked[0].reason.contains("length"));
        assert_eq!(report.weight.total, 20.0);

        let json: serde_json::Value = serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["placed"][0]["pos"], serde_json::json!([0.0, 0.0, 0.0]));
        assert_eq!(json["weights_source"], "default");
        assert_eq!(json["weight"]["max_weight"], 100.0);
    }
}
