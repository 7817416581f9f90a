//! Candidate solutions for the genetic optimizer and their operators.
//!
//! A [`Genome`] is a permutation of item indices plus one rotation gene per
//! sequence position. Operators keep the permutation valid, and every
//! operator that moves sequence genes moves the rotation genes with them.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::item::Rotation;
use crate::metrics::MetricsBreakdown;

/// Per-gene probability of rotation resampling in the aggressive operator.
const AGGRESSIVE_ROTATION_PROBABILITY: f64 = 0.7;

/// Which mutation operator the adaptive strategy emphasises.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationFocus {
    Rotation,
    Swap,
    Subsequence,
    Balanced,
    Aggressive,
}

impl FromStr for OperationFocus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "rotation" => Ok(Self::Rotation),
            "swap" => Ok(Self::Swap),
            "subsequence" => Ok(Self::Subsequence),
            "balanced" => Ok(Self::Balanced),
            "aggressive" => Ok(Self::Aggressive),
            other => Err(format!("unknown operation focus '{other}'")),
        }
    }
}

impl fmt::Display for OperationFocus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rotation => "rotation",
            Self::Swap => "swap",
            Self::Subsequence => "subsequence",
            Self::Balanced => "balanced",
            Self::Aggressive => "aggressive",
        };
        f.write_str(name)
    }
}

fn random_rotation<R: Rng + ?Sized>(rng: &mut R) -> Rotation {
    Rotation::from_index(rng.gen_range(0..Rotation::ALL.len()))
}

/// One candidate solution.
#[derive(Clone, Debug, PartialEq)]
pub struct Genome {
    order: Vec<usize>,
    rotations: Vec<Rotation>,
    fitness: Option<f64>,
    metrics: Option<MetricsBreakdown>,
}

impl Genome {
    /// Builds a genome from an explicit order and rotation genes.
    ///
    /// Returns `None` unless `order` is a permutation of `0..n` and both
    /// sequences have the same length.
    pub fn new(order: Vec<usize>, rotations: Vec<Rotation>) -> Option<Self> {
        let genome = Self {
            order,
            rotations,
            fitness: None,
            metrics: None,
        };
        genome.is_valid().then_some(genome)
    }

    /// Keeps `order` and draws every rotation gene uniformly.
    pub fn with_random_rotations<R: Rng + ?Sized>(order: Vec<usize>, rng: &mut R) -> Option<Self> {
        let rotations = (0..order.len()).map(|_| random_rotation(rng)).collect();
        Self::new(order, rotations)
    }

    /// Shuffled order with uniformly random rotation genes.
    pub fn random<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Self {
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(rng);
        let rotations = (0..len).map(|_| random_rotation(rng)).collect();
        Self {
            order,
            rotations,
            fitness: None,
            metrics: None,
        }
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn rotations(&self) -> &[Rotation] {
        &self.rotations
    }

    /// `(item index, rotation)` per sequence position.
    pub fn genes(&self) -> impl Iterator<Item = (usize, Rotation)> + '_ {
        self.order.iter().copied().zip(self.rotations.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn fitness(&self) -> Option<f64> {
        self.fitness
    }

    /// Fitness, or negative infinity when not yet evaluated.
    pub fn fitness_or_min(&self) -> f64 {
        self.fitness.unwrap_or(f64::NEG_INFINITY)
    }

    pub fn metrics(&self) -> Option<&MetricsBreakdown> {
        self.metrics.as_ref()
    }

    pub fn is_evaluated(&self) -> bool {
        self.fitness.is_some()
    }

    pub(crate) fn set_evaluation(&mut self, fitness: f64, metrics: MetricsBreakdown) {
        self.fitness = Some(fitness);
        self.metrics = Some(metrics);
    }

    pub(crate) fn clear_evaluation(&mut self) {
        self.fitness = None;
        self.metrics = None;
    }

    /// Whether `order` is a permutation of `0..len` with matching rotations.
    pub fn is_valid(&self) -> bool {
        if self.order.len() != self.rotations.len() {
            return false;
        }
        let mut seen = vec![false; self.order.len()];
        self.order.iter().all(|&idx| {
            idx < seen.len() && !std::mem::replace(&mut seen[idx], true)
        })
    }

    /// Order crossover on the sequence plus uniform crossover on rotations.
    ///
    /// The child keeps a random contiguous slice of `self` in place and fills
    /// the other positions with the remaining items in `other`'s relative
    /// order.
    pub fn crossover<R: Rng + ?Sized>(&self, other: &Genome, rng: &mut R) -> Genome {
        let len = self.len();
        if len < 2 || other.len() != len {
            return self.offspring();
        }

        let mut a = rng.gen_range(0..len);
        let mut b = rng.gen_range(0..len);
        if a > b {
            std::mem::swap(&mut a, &mut b);
        }

        let mut order = vec![usize::MAX; len];
        let mut taken = vec![false; len];
        for pos in a..=b {
            order[pos] = self.order[pos];
            taken[self.order[pos]] = true;
        }

        let mut fill = other.order.iter().copied().filter(|idx| !taken[*idx]);
        for slot in order.iter_mut().filter(|slot| **slot == usize::MAX) {
            if let Some(idx) = fill.next() {
                *slot = idx;
            }
        }

        let rotations = self
            .rotations
            .iter()
            .zip(&other.rotations)
            .map(|(ra, rb)| if rng.gen_bool(0.5) { *ra } else { *rb })
            .collect();

        Genome {
            order,
            rotations,
            fitness: None,
            metrics: None,
        }
    }

    /// Unevaluated copy.
    fn offspring(&self) -> Genome {
        let mut child = self.clone();
        child.clear_evaluation();
        child
    }

    /// Applies the operators emphasised by `focus` at the given rate.
    pub fn mutate<R: Rng + ?Sized>(&mut self, rate: f64, focus: OperationFocus, rng: &mut R) {
        if self.is_empty() {
            return;
        }
        let rate = rate.clamp(0.0, 1.0);
        match focus {
            OperationFocus::Rotation => {
                self.mutate_rotations((rate * 2.0).min(1.0), rng);
                if rng.gen_bool(rate) {
                    self.mutate_swap(rng);
                }
            }
            OperationFocus::Swap => {
                for _ in 0..self.len() {
                    if rng.gen_bool(rate) {
                        self.mutate_swap(rng);
                    }
                }
                self.mutate_rotations(rate / 2.0, rng);
            }
            OperationFocus::Subsequence => {
                if rng.gen_bool((rate * 3.0).min(1.0)) {
                    self.mutate_subsequence(rng);
                }
                self.mutate_rotations(rate / 2.0, rng);
            }
            OperationFocus::Balanced => {
                self.mutate_rotations(rate, rng);
                if rng.gen_bool(rate) {
                    self.mutate_swap(rng);
                }
                if rng.gen_bool(rate) {
                    self.mutate_subsequence(rng);
                }
            }
            OperationFocus::Aggressive => self.mutate_aggressive(rng),
        }
    }

    /// Resamples each rotation gene with probability `probability`.
    pub fn mutate_rotations<R: Rng + ?Sized>(&mut self, probability: f64, rng: &mut R) {
        let probability = probability.clamp(0.0, 1.0);
        let mut changed = false;
        for gene in &mut self.rotations {
            if rng.gen_bool(probability) {
                *gene = random_rotation(rng);
                changed = true;
            }
        }
        if changed {
            self.clear_evaluation();
        }
    }

    /// Swaps two sequence positions together with their rotation genes.
    pub fn mutate_swap<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let len = self.len();
        if len < 2 {
            return;
        }
        let i = rng.gen_range(0..len);
        let j = rng.gen_range(0..len);
        if i != j {
            self.order.swap(i, j);
            self.rotations.swap(i, j);
            self.clear_evaluation();
        }
    }

    /// Cuts a random slice and reinserts it at a random position.
    pub fn mutate_subsequence<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let len = self.len();
        if len < 2 {
            return;
        }
        let start = rng.gen_range(0..len);
        let slice_len = rng.gen_range(1..=(len - start));
        let order: Vec<usize> = self.order.drain(start..start + slice_len).collect();
        let rotations: Vec<Rotation> = self.rotations.drain(start..start + slice_len).collect();

        let insert_at = rng.gen_range(0..=self.order.len());
        self.order.splice(insert_at..insert_at, order);
        self.rotations.splice(insert_at..insert_at, rotations);
        self.clear_evaluation();
    }

    /// Large block reversal with fresh rotations inside the block, bulk
    /// rotation resampling and a handful of extra swaps.
    pub fn mutate_aggressive<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let len = self.len();
        if len == 0 {
            return;
        }

        if len >= 2 {
            let block = rng.gen_range((len / 4).max(2)..=(len / 2).max(2)).min(len);
            let start = rng.gen_range(0..=(len - block));
            self.order[start..start + block].reverse();
            for gene in &mut self.rotations[start..start + block] {
                *gene = random_rotation(rng);
            }
        }

        for gene in &mut self.rotations {
            if rng.gen_bool(AGGRESSIVE_ROTATION_PROBABILITY) {
                *gene = random_rotation(rng);
            }
        }

        for _ in 0..(2 + len / 10) {
            self.mutate_swap(rng);
        }
        self.clear_evaluation();
    }
}

/// Fitness statistics of an evaluated population.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PopulationStats {
    pub size: usize,
    pub best_fitness: f64,
    pub mean_fitness: f64,
    pub worst_fitness: f64,
    pub std_dev: f64,
}

impl PopulationStats {
    /// Statistics over evaluated genomes; unevaluated ones are skipped.
    pub fn from_population(population: &[Genome]) -> Self {
        let values: Vec<f64> = population.iter().filter_map(Genome::fitness).collect();
        if values.is_empty() {
            return Self {
                size: population.len(),
                ..Self::default()
            };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            size: population.len(),
            best_fitness: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean_fitness: mean,
            worst_fitness: values.iter().copied().fold(f64::INFINITY, f64::min),
            std_dev: variance.sqrt(),
        }
    }
}
