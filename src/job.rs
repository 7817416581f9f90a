//! JSON job input for the command line front end.
//!
//! A job names one container, the item rows to load into it and optional
//! run parameters. Rows are validated into domain types before anything is
//! packed; the first invalid row aborts the job.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::container::Container;
use crate::error::{ConfigError, Result};
use crate::item::{Fragility, Item, Stackable, TemperatureRange};
use crate::optimizer::OptimizerSettings;
use crate::types::Vec3;

/// Reasons a job file could not be turned into a packing run.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Could not read job file: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed job file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

#[derive(Clone, Debug, Deserialize)]
pub struct ContainerSpec {
    /// `[length, width, height]`
    pub dims: Vec<f64>,
    #[serde(default)]
    pub max_weight: Option<f64>,
}

/// One input row. Optional columns fall back to the item defaults.
#[derive(Clone, Debug, Deserialize)]
pub struct ItemSpec {
    pub name: String,
    /// `[length, width, height]`
    pub dims: Vec<f64>,
    pub weight: f64,
    #[serde(default = "default_quantity")]
    pub quantity: usize,
    #[serde(default)]
    pub fragility: Option<String>,
    #[serde(default)]
    pub stackable: Option<String>,
    #[serde(default)]
    pub boxing_type: Option<String>,
    #[serde(default)]
    pub bundle: bool,
    #[serde(default)]
    pub load_capacity: f64,
    /// e.g. `"2 to 8"`
    #[serde(default)]
    pub temperature_range: Option<String>,
}

fn default_quantity() -> usize {
    1
}

/// A packing job as read from disk.
#[derive(Clone, Debug, Deserialize)]
pub struct PackJob {
    pub container: ContainerSpec,
    pub items: Vec<ItemSpec>,
    #[serde(default)]
    pub route_temperature: Option<f64>,
    #[serde(default)]
    pub weights: Option<HashMap<String, f64>>,
    #[serde(default)]
    pub population_size: Option<usize>,
    #[serde(default)]
    pub generations: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// A job whose container and items passed validation.
#[derive(Clone, Debug)]
pub struct ValidatedJob {
    pub container: Container,
    pub items: Vec<Item>,
    pub route_temperature: Option<f64>,
    pub weights: Option<HashMap<String, f64>>,
    population_size: Option<usize>,
    generations: Option<usize>,
    seed: Option<u64>,
}

impl ValidatedJob {
    /// Applies the job's run parameters on top of configured settings.
    pub fn apply_to(&self, mut settings: OptimizerSettings) -> OptimizerSettings {
        if let Some(size) = self.population_size {
            settings.population_size = size;
        }
        if let Some(generations) = self.generations {
            settings.generations = generations;
        }
        if self.seed.is_some() {
            settings.seed = self.seed;
        }
        settings
    }

    pub fn item_count(&self) -> usize {
        self.items.iter().map(Item::quantity).sum()
    }
}

fn dims_from(values: &[f64], owner: &str) -> Result<Vec3> {
    match values {
        [l, w, h] => Ok(Vec3::new(*l, *w, *h)),
        _ => Err(ConfigError::DimensionCount {
            item: owner.to_string(),
            count: values.len(),
        }),
    }
}

impl ItemSpec {
    fn into_item(self) -> Result<Item> {
        let dims = dims_from(&self.dims, &self.name)?;
        let mut item = Item::new(self.name, dims, self.weight)?
            .with_quantity(self.quantity)?
            .with_bundle(self.bundle)
            .with_load_capacity(self.load_capacity)?;
        if let Some(raw) = self.fragility {
            item = item.with_fragility(raw.parse::<Fragility>()?);
        }
        if let Some(raw) = self.stackable {
            item = item.with_stackable(raw.parse::<Stackable>()?);
        }
        if let Some(boxing_type) = self.boxing_type {
            item = item.with_boxing_type(boxing_type);
        }
        if let Some(raw) = self.temperature_range {
            item = item.with_temperature_range(raw.parse::<TemperatureRange>()?);
        }
        Ok(item)
    }
}

impl PackJob {
    pub fn from_json(raw: &str) -> std::result::Result<Self, JobError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> std::result::Result<Self, JobError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn into_validated(self) -> Result<ValidatedJob> {
        let dims = dims_from(&self.container.dims, "container")?;
        let container = Container::new(dims, self.container.max_weight)?;

        let items = self
            .items
            .into_iter()
            .map(ItemSpec::into_item)
            .collect::<Result<Vec<_>>>()?;

        if let Some(temperature) = self.route_temperature {
            if !temperature.is_finite() {
                return Err(ConfigError::InvalidSettings(format!(
                    "route temperature must be finite, got {temperature}"
                )));
            }
        }

        Ok(ValidatedJob {
            container,
            items,
            route_temperature: self.route_temperature,
            weights: self.weights,
            population_size: self.population_size,
            generations: self.generations,
            seed: self.seed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const JOB: &str = r#"{
        "container": { "dims": [12.0, 2.4, 2.6], "max_weight": 20000.0 },
        "items": [
            { "name": "Pallet", "dims": [1.2, 0.8, 1.0], "weight": 300.0, "quantity": 4,
              "fragility": "LOW", "stackable": "YES", "load_capacity": 800.0 },
            { "name": "Vaccine", "dims": [0.4, 0.3, 0.3], "weight": 5.0,
              "fragility": "HIGH", "stackable": "no", "temperature_range": "2 to 8",
              "boxing_type": "cooler" }
        ],
        "route_temperature": 30.0,
        "weights": { "volume": 0.6, "items_packed": 0.4 },
        "generations": 10,
        "seed": 7
    }"#;

    #[test]
    fn parses_and_validates_a_job_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(JOB.as_bytes()).unwrap();

        let job = PackJob::from_path(file.path()).unwrap().into_validated().unwrap();
        assert_eq!(job.container.dims(), Vec3::new(12.0, 2.4, 2.6));
        assert_eq!(job.container.max_weight(), Some(20000.0));
        assert_eq!(job.items.len(), 2);
        assert_eq!(job.item_count(), 5);
        assert_eq!(job.route_temperature, Some(30.0));

        let vaccine = &job.items[1];
        assert_eq!(vaccine.fragility(), Fragility::High);
        assert_eq!(vaccine.stackable(), Stackable::No);
        assert_eq!(vaccine.boxing_type(), "cooler");
        assert!(vaccine.is_temperature_sensitive());
        assert_eq!(job.items[0].load_capacity(), 800.0);

        let settings = job.apply_to(OptimizerSettings::default());
        assert_eq!(settings.generations, 10);
        assert_eq!(settings.seed, Some(7));
        assert_eq!(settings.population_size, OptimizerSettings::DEFAULT_POPULATION_SIZE);
    }

    #[test]
    fn rejects_wrong_dimension_count() {
        let raw = r#"{ "container": { "dims": [2.0, 2.0, 2.0] },
                       "items": [ { "name": "Flat", "dims": [1.0, 1.0], "weight": 1.0 } ] }"#;
        let err = PackJob::from_json(raw).unwrap().into_validated().unwrap_err();
        assert_eq!(
            err,
            ConfigError::DimensionCount {
                item: "Flat".to_string(),
                count: 2
            }
        );
    }

    #[test]
    fn rejects_invalid_container_and_rows() {
        let raw = r#"{ "container": { "dims": [2.0, 0.0, 2.0] }, "items": [] }"#;
        assert!(matches!(
            PackJob::from_json(raw).unwrap().into_validated(),
            Err(ConfigError::InvalidDimension { .. })
        ));

        let raw = r#"{ "container": { "dims": [2.0, 2.0, 2.0] },
                       "items": [ { "name": "Warm", "dims": [1.0, 1.0, 1.0], "weight": 1.0,
                                    "temperature_range": "hot" } ] }"#;
        assert!(matches!(
            PackJob::from_json(raw).unwrap().into_validated(),
            Err(ConfigError::TemperatureRange(_))
        ));

        let raw = r#"{ "container": { "dims": [2.0, 2.0, 2.0] },
                       "items": [ { "name": "Odd", "dims": [1.0, 1.0, 1.0], "weight": 1.0,
                                    "fragility": "brittle" } ] }"#;
        assert!(matches!(
            PackJob::from_json(raw).unwrap().into_validated(),
            Err(ConfigError::UnknownFragility(_))
        ));
    }

    #[test]
    fn reports_io_and_parse_failures() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(PackJob::from_path(&missing), Err(JobError::Io(_))));
        assert!(matches!(PackJob::from_json("{ not json"), Err(JobError::Parse(_))));
    }
}
