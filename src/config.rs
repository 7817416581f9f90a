use std::env;
use std::time::Duration;

use crate::optimizer::OptimizerSettings;
use crate::placement::PackingConfig;

/// Complete application configuration, loaded from environment variables or default values.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub optimizer: OptimizerConfig,
    pub advisor: AdvisorConfig,
}

impl AppConfig {
    /// Creates a configuration from the currently available environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(env_string)
    }

    /// Creates a configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            optimizer: OptimizerConfig::from_lookup(&lookup),
            advisor: AdvisorConfig::from_lookup(&lookup),
        }
    }
}

/// Configuration for the advisory service.
#[derive(Clone, Debug, PartialEq)]
pub struct AdvisorConfig {
    url: Option<String>,
    timeout: Duration,
}

impl AdvisorConfig {
    const URL_VAR: &'static str = "STOWAGE_ADVISOR_URL";
    const TIMEOUT_VAR: &'static str = "STOWAGE_ADVISOR_TIMEOUT_SECS";
    const DEFAULT_TIMEOUT_SECS: f64 = 5.0;

    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let url = lookup(Self::URL_VAR).and_then(|raw| {
            if raw.starts_with("http://") || raw.starts_with("https://") {
                Some(raw)
            } else {
                tracing::warn!(
                    "{} ('{}') is not an http(s) URL. Running without advisor.",
                    Self::URL_VAR,
                    raw
                );
                None
            }
        });

        let timeout_secs = load_f64_with_warning(
            lookup,
            Self::TIMEOUT_VAR,
            Self::DEFAULT_TIMEOUT_SECS,
            |value| value > 0.0 && value <= 600.0,
            "must be between 0 and 600 seconds",
            "Adjusted advisor timeout may stall optimizer generations",
        );

        Self {
            url,
            timeout: Duration::from_secs_f64(timeout_secs),
        }
    }

    /// Base URL of the advisory service, if one is configured.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Hard timeout for one advisory round trip.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Configuration for the genetic optimizer and its placement rules.
#[derive(Clone, Debug)]
pub struct OptimizerConfig {
    settings: OptimizerSettings,
}

impl OptimizerConfig {
    const POPULATION_VAR: &'static str = "STOWAGE_POPULATION_SIZE";
    const GENERATIONS_VAR: &'static str = "STOWAGE_GENERATIONS";
    const MUTATION_RATE_VAR: &'static str = "STOWAGE_MUTATION_RATE";
    const SEED_VAR: &'static str = "STOWAGE_SEED";
    const DYNAMIC_WEIGHTS_VAR: &'static str = "STOWAGE_DYNAMIC_WEIGHTS";
    const TEMPERATURE_BUFFER_VAR: &'static str = "STOWAGE_TEMPERATURE_BUFFER";
    const INSULATING_NEIGHBORS_VAR: &'static str = "STOWAGE_MIN_INSULATING_NEIGHBORS";
    const SUPPORT_RATIO_VAR: &'static str = "STOWAGE_SUPPORT_RATIO";
    const HEIGHT_EPSILON_VAR: &'static str = "STOWAGE_HEIGHT_EPSILON";

    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let population_size = load_usize_with_warning(
            lookup,
            Self::POPULATION_VAR,
            OptimizerSettings::DEFAULT_POPULATION_SIZE,
            |value| value >= 2,
            "must be at least 2",
        );

        let generations = load_usize_with_warning(
            lookup,
            Self::GENERATIONS_VAR,
            OptimizerSettings::DEFAULT_GENERATIONS,
            |value| value >= 1,
            "must be at least 1",
        );

        let mutation_rate = load_f64_with_warning(
            lookup,
            Self::MUTATION_RATE_VAR,
            OptimizerSettings::DEFAULT_MUTATION_RATE,
            |value| (0.0..=1.0).contains(&value),
            "must be between 0 and 1",
            "Adjusted mutation rate is clamped to [0.01, 0.5] during the run",
        );

        let seed = lookup(Self::SEED_VAR).and_then(|raw| match raw.parse::<u64>() {
            Ok(seed) => Some(seed),
            Err(err) => {
                tracing::warn!(
                    "Could not parse {} ('{}') as seed: {}. Using a random seed.",
                    Self::SEED_VAR,
                    raw,
                    err
                );
                None
            }
        });

        let dynamic_weights = lookup(Self::DYNAMIC_WEIGHTS_VAR)
            .and_then(|raw| parse_bool(&raw, Self::DYNAMIC_WEIGHTS_VAR))
            .unwrap_or(false);

        let temperature_buffer = load_f64_with_warning(
            lookup,
            Self::TEMPERATURE_BUFFER_VAR,
            PackingConfig::DEFAULT_TEMPERATURE_BUFFER,
            |value| value >= 0.0,
            "must not be negative",
            "Adjusted temperature buffer changes where sensitive goods may stand",
        );

        let min_insulating_neighbors = load_usize_with_warning(
            lookup,
            Self::INSULATING_NEIGHBORS_VAR,
            PackingConfig::DEFAULT_MIN_INSULATING_NEIGHBORS,
            |value| value <= 6,
            "must be between 0 and 6",
        );

        let support_ratio = load_f64_with_warning(
            lookup,
            Self::SUPPORT_RATIO_VAR,
            PackingConfig::DEFAULT_SUPPORT_RATIO,
            |value| (0.0..=1.0).contains(&value),
            "must be between 0 and 1",
            "Adjusted minimum support may lead to unstable stacks",
        );

        let height_epsilon = load_f64_with_warning(
            lookup,
            Self::HEIGHT_EPSILON_VAR,
            PackingConfig::DEFAULT_HEIGHT_EPSILON,
            |value| value > 0.0,
            "must be greater than 0",
            "Adjusted height tolerance may cause unexpected placements",
        );

        let packing = PackingConfig::builder()
            .temperature_buffer(temperature_buffer)
            .min_insulating_neighbors(min_insulating_neighbors)
            .support_ratio(support_ratio)
            .height_epsilon(height_epsilon)
            .build();

        let settings = OptimizerSettings::builder()
            .population_size(population_size)
            .generations(generations)
            .mutation_rate(mutation_rate)
            .seed(seed)
            .dynamic_weights(dynamic_weights)
            .packing(packing)
            .build();

        Self { settings }
    }

    /// Returns the configured optimizer settings.
    pub fn settings(&self) -> OptimizerSettings {
        self.settings
    }

    /// Returns the configured placement rules.
    pub fn packing_config(&self) -> PackingConfig {
        self.settings.packing
    }
}

fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            }
        }
        Err(env::VarError::NotPresent) => None,
        Err(err) => {
            tracing::warn!("Access to {} failed: {}. Using default value.", name, err);
            None
        }
    }
}

fn parse_bool(raw: &str, var_name: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        other => {
            tracing::warn!(
                "Could not interpret {} ('{}') as boolean value. Using default value.",
                var_name,
                other
            );
            None
        }
    }
}

fn load_f64_with_warning(
    lookup: &impl Fn(&str) -> Option<String>,
    var_name: &str,
    default: f64,
    validator: impl Fn(f64) -> bool,
    invalid_hint: &str,
    warning: &str,
) -> f64 {
    match lookup(var_name) {
        Some(raw) => match raw.parse::<f64>() {
            Ok(value) if value.is_finite() && validator(value) => {
                let tolerance = (default.abs().max(1.0)) * 1e-9;
                if (value - default).abs() > tolerance {
                    tracing::info!("{} ({} = {}).", warning, var_name, value);
                }
                value
            }
            Ok(_) => {
                tracing::warn!(
                    "{} contains invalid value '{}': {}. Using {}.",
                    var_name,
                    raw,
                    invalid_hint,
                    default
                );
                default
            }
            Err(err) => {
                tracing::warn!(
                    "Could not parse {} ('{}') as number: {}. Using {}.",
                    var_name,
                    raw,
                    err,
                    default
                );
                default
            }
        },
        None => default,
    }
}

fn load_usize_with_warning(
    lookup: &impl Fn(&str) -> Option<String>,
    var_name: &str,
    default: usize,
    validator: impl Fn(usize) -> bool,
    invalid_hint: &str,
) -> usize {
    match lookup(var_name) {
        Some(raw) => match raw.parse::<usize>() {
            Ok(value) if validator(value) => value,
            Ok(_) => {
                tracing::warn!(
                    "{} contains invalid value '{}': {}. Using {}.",
                    var_name,
                    raw,
                    invalid_hint,
                    default
                );
                default
            }
            Err(err) => {
                tracing::warn!(
                    "Could not parse {} ('{}') as integer: {}. Using {}.",
                    var_name,
                    raw,
                    err,
                    default
                );
                default
            }
        },
        None => default,
    }
}
