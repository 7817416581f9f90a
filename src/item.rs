//! Placeable items, their physical attributes and rotation rules.
//!
//! An [`Item`] keeps its original unit dimensions forever. Bundling replaces
//! the base dimensions by a grid of units, and a [`Rotation`] permutes the
//! base dimensions into the effective dimensions used once placed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result, validate_dimension, validate_weight};
use crate::geometry::BoundingBox;
use crate::types::{Dimensional, EPSILON_GENERAL, Positioned, Vec3, Weighted};

/// How much handling an item tolerates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Fragility {
    Low,
    Medium,
    High,
}

impl FromStr for Fragility {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            _ => Err(ConfigError::UnknownFragility(raw.to_string())),
        }
    }
}

impl fmt::Display for Fragility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

/// Whether other items may rest on top of this one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stackable {
    Yes,
    No,
}

impl FromStr for Stackable {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "YES" | "Y" | "TRUE" => Ok(Self::Yes),
            "NO" | "N" | "FALSE" => Ok(Self::No),
            _ => Err(ConfigError::UnknownStackable(raw.to_string())),
        }
    }
}

/// Tolerated temperature range in °C.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemperatureRange {
    pub min: f64,
    pub max: f64,
}

impl TemperatureRange {
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(ConfigError::TemperatureRange(format!("{min} to {max}")));
        }
        Ok(Self { min, max })
    }

    #[inline]
    pub fn contains(&self, temperature: f64) -> bool {
        temperature >= self.min && temperature <= self.max
    }
}

impl FromStr for TemperatureRange {
    type Err = ConfigError;

    /// Accepts `"10 to 30"`, `"10..30"`, `"10,30"` and `"10-30"`, each side
    /// optionally suffixed with `°C`.
    fn from_str(raw: &str) -> Result<Self> {
        let malformed = || ConfigError::TemperatureRange(raw.to_string());
        let text = raw.trim().to_ascii_lowercase();

        let (lo, hi) = if let Some(parts) = text.split_once(" to ") {
            parts
        } else if let Some(parts) = text.split_once("..") {
            parts
        } else if let Some(parts) = text.split_once(',') {
            parts
        } else {
            // A leading '-' is a sign, so search for the separator after it.
            let offset = usize::from(text.starts_with('-'));
            let idx = text[offset..].find('-').ok_or_else(malformed)? + offset;
            (&text[..idx], &text[idx + 1..])
        };

        let parse = |part: &str| -> Result<f64> {
            let cleaned = part.trim().trim_end_matches('c').trim_end_matches('°').trim();
            cleaned.parse::<f64>().map_err(|_| malformed())
        };

        let (min, max) = (parse(lo)?, parse(hi)?);
        Self::new(min, max).map_err(|_| malformed())
    }
}

/// One of the six axis-aligned orientations of a box.
///
/// Each variant names which base dimension (`L`ength, `W`idth, `H`eight)
/// ends up along the container's x, y and z axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    Lwh,
    Wlh,
    Lhw,
    Hlw,
    Whl,
    Hwl,
}

impl Rotation {
    pub const ALL: [Rotation; 6] = [
        Rotation::Lwh,
        Rotation::Wlh,
        Rotation::Lhw,
        Rotation::Hlw,
        Rotation::Whl,
        Rotation::Hwl,
    ];

    /// Rotations that keep the original top face up.
    pub const UPRIGHT: [Rotation; 2] = [Rotation::Lwh, Rotation::Wlh];

    #[inline]
    pub fn index(self) -> usize {
        Self::ALL.iter().position(|r| *r == self).unwrap_or(0)
    }

    #[inline]
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % Self::ALL.len()]
    }

    /// Permutes base dimensions `(l, w, h)` into `(x, y, z)` extents.
    pub fn apply(self, dims: Vec3) -> Vec3 {
        let (l, w, h) = dims.as_tuple();
        match self {
            Rotation::Lwh => Vec3::new(l, w, h),
            Rotation::Wlh => Vec3::new(w, l, h),
            Rotation::Lhw => Vec3::new(l, h, w),
            Rotation::Hlw => Vec3::new(h, l, w),
            Rotation::Whl => Vec3::new(w, h, l),
            Rotation::Hwl => Vec3::new(h, w, l),
        }
    }

    #[inline]
    pub fn keeps_top_face(self) -> bool {
        matches!(self, Rotation::Lwh | Rotation::Wlh)
    }
}

/// A placeable unit.
///
/// Two items are equal iff their names match; names are unique after
/// quantity expansion.
#[derive(Clone, Debug, Serialize)]
pub struct Item {
    name: String,
    original_dims: Vec3,
    base_dims: Vec3,
    dims: Vec3,
    weight: f64,
    quantity: usize,
    fragility: Fragility,
    stackable: Stackable,
    boxing_type: String,
    bundle: bool,
    bundled_count: usize,
    load_capacity: f64,
    temperature_range: Option<TemperatureRange>,
    needs_insulation: bool,
    rotation: Rotation,
    position: Option<Vec3>,
}

impl Item {
    /// Creates an item with validated dimensions `(l, w, h)` and weight.
    ///
    /// # Examples
    /// ```
    /// use stowage::item::Item;
    /// use stowage::types::Vec3;
    ///
    /// assert!(Item::new("Crate", Vec3::new(1.0, 0.5, 0.5), 12.0).is_ok());
    /// assert!(Item::new("Crate", Vec3::new(-1.0, 0.5, 0.5), 12.0).is_err());
    /// ```
    pub fn new(name: impl Into<String>, dims: Vec3, weight: f64) -> Result<Self> {
        let name = name.into();
        validate_dimension(dims.x, &format!("{name} length"))?;
        validate_dimension(dims.y, &format!("{name} width"))?;
        validate_dimension(dims.z, &format!("{name} height"))?;
        validate_weight(weight, &format!("{name} weight"))?;
        Ok(Self {
            name,
            original_dims: dims,
            base_dims: dims,
            dims,
            weight,
            quantity: 1,
            fragility: Fragility::Low,
            stackable: Stackable::Yes,
            boxing_type: String::new(),
            bundle: false,
            bundled_count: 1,
            load_capacity: 0.0,
            temperature_range: None,
            needs_insulation: false,
            rotation: Rotation::Lwh,
            position: None,
        })
    }

    pub fn with_quantity(mut self, quantity: usize) -> Result<Self> {
        if quantity == 0 {
            return Err(ConfigError::InvalidQuantity { item: self.name });
        }
        self.quantity = quantity;
        Ok(self)
    }

    pub fn with_fragility(mut self, fragility: Fragility) -> Self {
        self.fragility = fragility;
        self
    }

    pub fn with_stackable(mut self, stackable: Stackable) -> Self {
        self.stackable = stackable;
        self
    }

    pub fn with_boxing_type(mut self, boxing_type: impl Into<String>) -> Self {
        self.boxing_type = boxing_type.into();
        self
    }

    pub fn with_bundle(mut self, bundle: bool) -> Self {
        self.bundle = bundle;
        self
    }

    /// Load-bearing capacity in kg; 0 means unspecified.
    pub fn with_load_capacity(mut self, capacity: f64) -> Result<Self> {
        if capacity < 0.0 || !capacity.is_finite() {
            return Err(ConfigError::InvalidWeight {
                name: format!("{} load-bearing capacity", self.name),
                value: capacity,
            });
        }
        self.load_capacity = capacity;
        Ok(self)
    }

    pub fn with_temperature_range(mut self, range: TemperatureRange) -> Self {
        self.temperature_range = Some(range);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unit dimensions as supplied.
    pub fn original_dims(&self) -> Vec3 {
        self.original_dims
    }

    /// Dimensions after bundling, before rotation.
    pub fn base_dims(&self) -> Vec3 {
        self.base_dims
    }

    /// Effective dimensions after bundling and rotation.
    pub fn dims(&self) -> Vec3 {
        self.dims
    }

    pub fn quantity(&self) -> usize {
        self.quantity
    }

    pub fn fragility(&self) -> Fragility {
        self.fragility
    }

    pub fn stackable(&self) -> Stackable {
        self.stackable
    }

    pub fn boxing_type(&self) -> &str {
        &self.boxing_type
    }

    pub fn is_bundle(&self) -> bool {
        self.bundle
    }

    /// Number of units merged into this item (1 unless bundled).
    pub fn bundled_count(&self) -> usize {
        self.bundled_count
    }

    pub fn load_capacity(&self) -> f64 {
        self.load_capacity
    }

    pub fn temperature_range(&self) -> Option<TemperatureRange> {
        self.temperature_range
    }

    pub fn is_temperature_sensitive(&self) -> bool {
        self.temperature_range.is_some()
    }

    pub fn needs_insulation(&self) -> bool {
        self.needs_insulation
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn placed_position(&self) -> Option<Vec3> {
        self.position
    }

    pub fn is_placed(&self) -> bool {
        self.position.is_some()
    }

    /// Bounding box at the placed position, if any.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.position
            .map(|pos| BoundingBox::from_position_and_dims(pos, self.dims))
    }

    /// Re-derives the insulation flag against a route temperature.
    pub fn flag_insulation(&mut self, route_temperature: Option<f64>) {
        self.needs_insulation = match (route_temperature, self.temperature_range) {
            (Some(temp), Some(range)) => !range.contains(temp),
            _ => false,
        };
    }

    /// Rotations allowed by the item's handling rules, in canonical order.
    pub fn allowed_rotations(&self) -> &'static [Rotation] {
        if self.fragility == Fragility::High {
            &Rotation::UPRIGHT
        } else {
            &Rotation::ALL
        }
    }

    /// Allowed rotations whose extents fit inside `bounds`.
    pub fn valid_rotations(&self, bounds: &Vec3) -> Vec<Rotation> {
        let mut seen: Vec<Vec3> = Vec::with_capacity(6);
        self.allowed_rotations()
            .iter()
            .copied()
            .filter(|rot| {
                let dims = rot.apply(self.base_dims);
                if !dims.fits_within(bounds, EPSILON_GENERAL) {
                    return false;
                }
                // Cubes and square faces produce duplicate extents.
                if seen.iter().any(|d| (*d - dims).length() < EPSILON_GENERAL) {
                    return false;
                }
                seen.push(dims);
                true
            })
            .collect()
    }

    /// Extents of this item under `rotation`.
    pub fn rotated_dims(&self, rotation: Rotation) -> Vec3 {
        rotation.apply(self.base_dims)
    }

    pub(crate) fn place(&mut self, position: Vec3, rotation: Rotation) {
        self.rotation = rotation;
        self.dims = rotation.apply(self.base_dims);
        self.position = Some(position);
    }

    pub(crate) fn unplace(&mut self) {
        self.position = None;
        self.rotation = Rotation::Lwh;
        self.dims = self.base_dims;
    }

    fn expanded_copy(&self, index: usize) -> Self {
        let mut copy = self.clone();
        copy.name = format!("{}_{}", self.name, index);
        copy.quantity = 1;
        copy
    }

    fn bundled(&self, layout: (usize, usize, usize)) -> Self {
        let (a, b, c) = layout;
        let count = a * b * c;
        let mut merged = self.clone();
        merged.base_dims = Vec3::new(
            self.original_dims.x * a as f64,
            self.original_dims.y * b as f64,
            self.original_dims.z * c as f64,
        );
        merged.dims = merged.base_dims;
        merged.weight = self.weight * count as f64;
        merged.load_capacity = self.load_capacity * (a * b) as f64;
        merged.quantity = 1;
        merged.bundled_count = count;
        merged
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Item {}

impl Dimensional for Item {
    fn dimensions(&self) -> Vec3 {
        self.dims
    }
}

impl Weighted for Item {
    fn weight(&self) -> f64 {
        self.weight
    }
}

impl Positioned for Item {
    fn position(&self) -> Vec3 {
        self.position.unwrap_or_default()
    }
}

/// Grid layout `(a, b, c)` with `a·b·c = count` whose bundle has the smallest
/// surface area and fits `bounds` in at least one allowed rotation.
pub fn bundle_layout(item: &Item, count: usize, bounds: &Vec3) -> Option<(usize, usize, usize)> {
    let unit = item.original_dims();
    let mut best: Option<((usize, usize, usize), f64)> = None;

    for a in 1..=count {
        if count % a != 0 {
            continue;
        }
        let rest = count / a;
        for b in 1..=rest {
            if rest % b != 0 {
                continue;
            }
            let c = rest / b;
            let dims = Vec3::new(unit.x * a as f64, unit.y * b as f64, unit.z * c as f64);
            let fits = item
                .allowed_rotations()
                .iter()
                .any(|rot| rot.apply(dims).fits_within(bounds, EPSILON_GENERAL));
            if !fits {
                continue;
            }
            let area = dims.surface_area();
            if best.is_none_or(|(_, best_area)| area + EPSILON_GENERAL < best_area) {
                best = Some(((a, b, c), area));
            }
        }
    }

    best.map(|(layout, _)| layout)
}

/// Expands input rows into placeable items.
///
/// Bundled rows with quantity > 1 become a single merged box when a grid
/// layout fits the container; every other row with quantity > 1 becomes
/// singleton copies named `"<name>_<n>"`.
pub fn expand_items(items: &[Item], bounds: &Vec3) -> Vec<Item> {
    let mut expanded = Vec::with_capacity(items.iter().map(Item::quantity).sum());

    for item in items {
        if item.quantity <= 1 {
            let mut single = item.clone();
            single.quantity = 1;
            expanded.push(single);
            continue;
        }

        if item.bundle {
            if let Some(layout) = bundle_layout(item, item.quantity, bounds) {
                expanded.push(item.bundled(layout));
                continue;
            }
            tracing::debug!(
                item = item.name(),
                quantity = item.quantity,
                "no bundle layout fits the container, expanding into singletons"
            );
        }

        expanded.extend((1..=item.quantity).map(|idx| item.expanded_copy(idx)));
    }

    expanded
}
