//! Error types for stowage.
//!
//! Only configuration problems surface as errors. Placement failures are
//! recorded as unpacked reasons and advisory failures fall back locally.

use thiserror::Error;

/// Result type alias for construction and validation.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Invalid input detected while building containers, items or settings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Invalid dimension: {name} must be positive and finite, got {value}")]
    InvalidDimension { name: String, value: f64 },

    #[error("Invalid weight: {name} must be positive and finite, got {value}")]
    InvalidWeight { name: String, value: f64 },

    #[error("Invalid quantity for '{item}': must be at least 1")]
    InvalidQuantity { item: String },

    #[error("Item '{item}' needs exactly 3 dimensions, got {count}")]
    DimensionCount { item: String, count: usize },

    #[error("Malformed temperature range '{0}': expected '<min> to <max>'")]
    TemperatureRange(String),

    #[error("Unknown fragility '{0}': expected LOW, MEDIUM or HIGH")]
    UnknownFragility(String),

    #[error("Unknown stackable flag '{0}': expected YES or NO")]
    UnknownStackable(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

/// Validates that a value is a usable length.
pub fn validate_dimension(value: f64, name: &str) -> Result<()> {
    if value <= 0.0 || !value.is_finite() {
        return Err(ConfigError::InvalidDimension {
            name: name.to_string(),
            value,
        });
    }
    Ok(())
}

/// Validates that a value is a usable weight.
pub fn validate_weight(value: f64, name: &str) -> Result<()> {
    if value <= 0.0 || !value.is_finite() {
        return Err(ConfigError::InvalidWeight {
            name: name.to_string(),
            value,
        });
    }
    Ok(())
}
