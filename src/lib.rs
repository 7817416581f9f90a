//! Container load planning with a genetic optimizer.
//!
//! Items are placed by a deterministic [`placement::PlacementEngine`] that
//! honours support, stacking, load-bearing and temperature rules. The
//! [`optimizer::GeneticOptimizer`] searches over packing order and item
//! rotation, scoring every candidate with the metrics in [`metrics`]. An
//! optional [`advisor::Advisor`] may suggest fitness weights and mutation
//! strategies; the optimizer never depends on it.

pub mod advisor;
pub mod config;
pub mod container;
pub mod error;
pub mod genome;
pub mod geometry;
pub mod item;
pub mod job;
pub mod metrics;
pub mod optimizer;
pub mod placement;
pub mod report;
pub mod space;
pub mod temperature;
pub mod types;
