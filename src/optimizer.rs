//! Genetic search over packing orders and rotations.
//!
//! Each genome is evaluated by packing a private copy of the container with
//! the genome's order and rotation genes, so evaluations run in parallel
//! without shared mutable state. Selection, crossover and elitism happen
//! single-threaded between generations. The best genome ever seen is
//! re-packed at the end, this time allowing rotation fallbacks.

use std::collections::HashMap;
use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;

use crate::advisor::{Advisor, MetricsSummary, StrategySuggestion};
use crate::container::Container;
use crate::error::{ConfigError, Result};
use crate::genome::{Genome, OperationFocus, PopulationStats};
use crate::item::{Item, Rotation};
use crate::metrics::{FitnessWeights, MetricsBreakdown};
use crate::placement::{PackEvent, PackingConfig, PlacementEngine, RotationPolicy, sort_for_packing};
use crate::types::{Dimensional, EPSILON_GENERAL};

/// Bounds of the effective mutation rate.
pub const MUTATION_RATE_BOUNDS: (f64, f64) = (0.01, 0.5);

/// Stagnation at which the aggressive operator is forced.
const FORCE_AGGRESSIVE_STAGNATION: usize = 8;

/// Generations between dynamic re-weighting requests.
const REWEIGHT_INTERVAL: usize = 3;

/// One extra initial swap per this many items.
const INITIAL_SWAP_DIVISOR: usize = 10;

/// Parameters of an optimizer run.
#[derive(Copy, Clone, Debug)]
pub struct OptimizerSettings {
    /// Genomes per generation (at least 2)
    pub population_size: usize,
    /// Generations to run (at least 1)
    pub generations: usize,
    /// Base mutation rate before strategy modifiers
    pub mutation_rate: f64,
    /// Share of the population carried over unchanged
    pub elite_ratio: f64,
    /// Genomes drawn per tournament
    pub tournament_size: usize,
    /// Seed for reproducible runs
    pub seed: Option<u64>,
    /// Re-request fitness weights from the advisor during the run
    pub dynamic_weights: bool,
    /// Placement rules used for every evaluation
    pub packing: PackingConfig,
}

impl OptimizerSettings {
    pub const DEFAULT_POPULATION_SIZE: usize = 30;
    pub const DEFAULT_GENERATIONS: usize = 40;
    pub const DEFAULT_MUTATION_RATE: f64 = 0.1;
    pub const DEFAULT_ELITE_RATIO: f64 = 0.15;
    pub const DEFAULT_TOURNAMENT_SIZE: usize = 3;

    pub fn builder() -> OptimizerSettingsBuilder {
        OptimizerSettingsBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.population_size < 2 {
            return Err(ConfigError::InvalidSettings(format!(
                "population size must be at least 2, got {}",
                self.population_size
            )));
        }
        if self.generations == 0 {
            return Err(ConfigError::InvalidSettings(
                "generation count must be at least 1".to_string(),
            ));
        }
        if !self.mutation_rate.is_finite() || self.mutation_rate < 0.0 {
            return Err(ConfigError::InvalidSettings(format!(
                "mutation rate must be a non-negative number, got {}",
                self.mutation_rate
            )));
        }
        if !(0.0..1.0).contains(&self.elite_ratio) {
            return Err(ConfigError::InvalidSettings(format!(
                "elite ratio must be in [0, 1), got {}",
                self.elite_ratio
            )));
        }
        if self.tournament_size == 0 {
            return Err(ConfigError::InvalidSettings(
                "tournament size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            population_size: Self::DEFAULT_POPULATION_SIZE,
            generations: Self::DEFAULT_GENERATIONS,
            mutation_rate: Self::DEFAULT_MUTATION_RATE,
            elite_ratio: Self::DEFAULT_ELITE_RATIO,
            tournament_size: Self::DEFAULT_TOURNAMENT_SIZE,
            seed: None,
            dynamic_weights: false,
            packing: PackingConfig::default(),
        }
    }
}

/// Builder for [`OptimizerSettings`].
#[derive(Clone, Debug, Default)]
pub struct OptimizerSettingsBuilder {
    settings: OptimizerSettings,
}

impl OptimizerSettingsBuilder {
    pub fn population_size(mut self, size: usize) -> Self {
        self.settings.population_size = size;
        self
    }

    pub fn generations(mut self, generations: usize) -> Self {
        self.settings.generations = generations;
        self
    }

    pub fn mutation_rate(mut self, rate: f64) -> Self {
        self.settings.mutation_rate = rate;
        self
    }

    pub fn elite_ratio(mut self, ratio: f64) -> Self {
        self.settings.elite_ratio = ratio;
        self
    }

    pub fn tournament_size(mut self, size: usize) -> Self {
        self.settings.tournament_size = size;
        self
    }

    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.settings.seed = seed;
        self
    }

    pub fn dynamic_weights(mut self, enabled: bool) -> Self {
        self.settings.dynamic_weights = enabled;
        self
    }

    pub fn packing(mut self, packing: PackingConfig) -> Self {
        self.settings.packing = packing;
        self
    }

    pub fn build(self) -> OptimizerSettings {
        self.settings
    }
}

/// Where the active fitness weights came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightsSource {
    Caller,
    Advisor,
    Default,
}

impl fmt::Display for WeightsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightsSource::Caller => write!(f, "caller"),
            WeightsSource::Advisor => write!(f, "advisor"),
            WeightsSource::Default => write!(f, "default"),
        }
    }
}

/// Where the current mutation strategy came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategySource {
    Initial,
    Advisor,
    Escalation,
    Forced,
}

/// Events emitted during a run, for live progress output.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum OptimizerEvent {
    Started {
        items: usize,
        population: usize,
        generations: usize,
        weights_source: WeightsSource,
    },
    Generation {
        generation: usize,
        best_fitness: f64,
        mean_fitness: f64,
        best_ever: f64,
        stagnation: usize,
        focus: OperationFocus,
        mutation_rate: f64,
    },
    WeightsUpdated {
        generation: usize,
        weights: FitnessWeights,
    },
    ItemPlaced {
        name: String,
        position: (f64, f64, f64),
        dims: (f64, f64, f64),
        rotation: Rotation,
    },
    ItemRejected {
        name: String,
        reason_code: String,
        reason_text: String,
    },
    Finished {
        best_fitness: f64,
        generations: usize,
        placed: usize,
        unpacked: usize,
    },
}

impl OptimizerEvent {
    fn from_pack_event(event: &PackEvent) -> Option<Self> {
        match event {
            PackEvent::ItemPlaced {
                name,
                position,
                dims,
                rotation,
                ..
            } => Some(Self::ItemPlaced {
                name: name.clone(),
                position: *position,
                dims: *dims,
                rotation: *rotation,
            }),
            PackEvent::ItemRejected {
                name,
                reason_code,
                reason_text,
            } => Some(Self::ItemRejected {
                name: name.clone(),
                reason_code: reason_code.clone(),
                reason_text: reason_text.clone(),
            }),
            PackEvent::Finished { .. } => None,
        }
    }
}

/// Outcome of an optimizer run.
#[derive(Clone, Debug)]
pub struct OptimizationResult {
    /// Container packed with the best genome, rotation fallbacks allowed.
    pub container: Container,
    pub best_genome: Genome,
    /// Fitness of the best genome during the search.
    pub best_fitness: f64,
    /// Metrics of the final container.
    pub metrics: MetricsBreakdown,
    /// Fitness of the final container under the final weights.
    pub final_fitness: f64,
    pub generations: usize,
    pub weights: FitnessWeights,
    pub weights_source: WeightsSource,
    /// Population statistics per generation.
    pub history: Vec<PopulationStats>,
}

/// Escalating fallback strategy keyed on stagnation.
pub fn escalation_strategy(stagnation: usize) -> StrategySuggestion {
    let (focus, rate_modifier) = match stagnation {
        s if s >= 10 => (OperationFocus::Aggressive, 0.20),
        s if s >= 7 => (OperationFocus::Subsequence, 0.15),
        s if s >= 3 => (OperationFocus::Swap, 0.10),
        _ => (OperationFocus::Balanced, 0.05),
    };
    StrategySuggestion {
        rate_modifier,
        focus,
    }
}

/// Generations between strategy queries; shorter as stagnation grows.
pub fn query_interval(stagnation: usize) -> usize {
    match stagnation {
        s if s >= 6 => 3,
        s if s >= 3 => 4,
        _ => 5,
    }
}

/// Base rate plus modifier, clamped to [`MUTATION_RATE_BOUNDS`].
pub fn effective_mutation_rate(base: f64, modifier: f64) -> f64 {
    let (lo, hi) = MUTATION_RATE_BOUNDS;
    let rate = base + modifier;
    if rate.is_finite() { rate.clamp(lo, hi) } else { lo }
}

/// `ceil(population × ratio)`, never the whole population.
pub fn elite_count(population: usize, ratio: f64) -> usize {
    ((population as f64 * ratio).ceil() as usize).min(population.saturating_sub(1))
}

/// Picks the strategy for the next generation.
///
/// An advisory suggestion wins over the escalation table, but stagnation of
/// 8 or more always forces the aggressive operator.
pub fn select_strategy(
    suggestion: Option<StrategySuggestion>,
    stagnation: usize,
) -> (StrategySuggestion, StrategySource) {
    if stagnation >= FORCE_AGGRESSIVE_STAGNATION {
        let forced = StrategySuggestion {
            rate_modifier: 0.20,
            focus: OperationFocus::Aggressive,
        };
        return (forced, StrategySource::Forced);
    }
    match suggestion.and_then(StrategySuggestion::sanitized) {
        Some(suggestion) => (suggestion, StrategySource::Advisor),
        None => (escalation_strategy(stagnation), StrategySource::Escalation),
    }
}

fn fitness_order(a: &Genome, b: &Genome) -> std::cmp::Ordering {
    b.fitness_or_min().total_cmp(&a.fitness_or_min())
}

/// Genetic optimizer over one container and one item set.
pub struct GeneticOptimizer {
    template: Container,
    items: Vec<Item>,
    engine: PlacementEngine,
    settings: OptimizerSettings,
    weights: FitnessWeights,
    weights_source: WeightsSource,
    advisor: Box<dyn Advisor>,
    rng: StdRng,
}

impl fmt::Debug for GeneticOptimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneticOptimizer")
            .field("items", &self.items.len())
            .field("settings", &self.settings)
            .field("weights", &self.weights)
            .field("weights_source", &self.weights_source)
            .finish_non_exhaustive()
    }
}

impl GeneticOptimizer {
    /// Prepares an optimizer run.
    ///
    /// # Parameters
    /// * `container` - Empty container to pack; cloned for every evaluation
    /// * `items` - Input rows; quantities and bundles are expanded here
    /// * `route_temperature` - Route temperature in °C, if known
    /// * `weight_overrides` - Caller fitness weights by metric name
    /// * `settings` - Run parameters
    /// * `advisor` - Optional advisory service; use [`crate::advisor::NoAdvisor`] for none
    pub fn new(
        container: Container,
        items: &[Item],
        route_temperature: Option<f64>,
        weight_overrides: Option<&HashMap<String, f64>>,
        settings: OptimizerSettings,
        advisor: Box<dyn Advisor>,
    ) -> Result<Self> {
        settings.validate()?;
        if container.placed_count() > 0 {
            return Err(ConfigError::InvalidSettings(
                "the optimizer needs an empty container".to_string(),
            ));
        }

        let engine = PlacementEngine::new(settings.packing);
        let mut prepared = engine.prepare_items(items, &container.dims(), route_temperature);
        sort_for_packing(&mut prepared);

        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut optimizer = Self {
            template: container,
            items: prepared,
            engine,
            settings,
            weights: FitnessWeights::default(),
            weights_source: WeightsSource::Default,
            advisor,
            rng,
        };
        optimizer.resolve_weights(weight_overrides);
        Ok(optimizer)
    }

    fn resolve_weights(&mut self, overrides: Option<&HashMap<String, f64>>) {
        if let Some(mapping) = overrides {
            match FitnessWeights::from_mapping(mapping) {
                Some(weights) => {
                    self.weights = weights;
                    self.weights_source = WeightsSource::Caller;
                    return;
                }
                None => tracing::warn!("caller fitness weights are degenerate, ignoring them"),
            }
        }

        let summary = self.summary(None);
        if let Some(weights) = self
            .advisor
            .suggest_fitness_weights(&summary)
            .and_then(|mapping| FitnessWeights::from_mapping(&mapping))
        {
            self.weights = weights;
            self.weights_source = WeightsSource::Advisor;
            return;
        }

        self.weights = FitnessWeights::default();
        self.weights_source = WeightsSource::Default;
    }

    fn summary(&self, current: Option<MetricsBreakdown>) -> MetricsSummary {
        let container_volume = self.template.volume();
        let item_volume: f64 = self.items.iter().map(Item::volume).sum();
        MetricsSummary {
            estimated_utilization: if container_volume > 0.0 {
                (item_volume / container_volume).min(1.0)
            } else {
                0.0
            },
            item_count: self.items.len(),
            container_volume,
            weight_capacity: self.template.max_weight(),
            has_temperature_sensitive: self.items.iter().any(Item::needs_insulation),
            current,
        }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn weights(&self) -> &FitnessWeights {
        &self.weights
    }

    pub fn weights_source(&self) -> WeightsSource {
        self.weights_source
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    /// Packs a fresh container with the genome's order and rotations, one
    /// rotation per gene, and scores it. Pure: same genome, same result.
    pub fn evaluate(&self, genome: &Genome) -> (f64, MetricsBreakdown) {
        let mut cont = self.template.clone();
        let sequence = genome
            .genes()
            .map(|(idx, rotation)| (self.items[idx].clone(), RotationPolicy::Fixed(rotation)))
            .collect();
        self.engine.pack_sequence(&mut cont, sequence);
        let metrics = MetricsBreakdown::from_container(&cont, self.items.len(), self.engine.temperature());
        (self.weights.combine(&metrics), metrics)
    }

    fn evaluate_population(&self, population: &mut [Genome]) {
        population
            .par_iter_mut()
            .filter(|genome| !genome.is_evaluated())
            .for_each(|genome| {
                let (fitness, metrics) = self.evaluate(genome);
                genome.set_evaluation(fitness, metrics);
            });
    }

    /// The engine's default order with random rotations. All genomes but
    /// the first also get a few random swaps.
    fn initial_population(&mut self) -> Vec<Genome> {
        let order: Vec<usize> = (0..self.items.len()).collect();
        let swaps = 1 + order.len() / INITIAL_SWAP_DIVISOR;
        let mut population = Vec::with_capacity(self.settings.population_size);
        for index in 0..self.settings.population_size {
            let Some(mut genome) = Genome::with_random_rotations(order.clone(), &mut self.rng) else {
                continue;
            };
            if index > 0 {
                for _ in 0..swaps {
                    genome.mutate_swap(&mut self.rng);
                }
            }
            population.push(genome);
        }
        population
    }

    fn tournament<'a>(&mut self, population: &'a [Genome]) -> &'a Genome {
        let mut winner = &population[self.rng.gen_range(0..population.len())];
        for _ in 1..self.settings.tournament_size {
            let challenger = &population[self.rng.gen_range(0..population.len())];
            if challenger.fitness_or_min() > winner.fitness_or_min() {
                winner = challenger;
            }
        }
        winner
    }

    fn next_generation(&mut self, population: &[Genome], rate: f64, focus: OperationFocus) -> Vec<Genome> {
        let size = self.settings.population_size;
        let elites = elite_count(size, self.settings.elite_ratio);
        let mut next: Vec<Genome> = population.iter().take(elites).cloned().collect();

        while next.len() < size {
            let first = self.tournament(population);
            let second = self.tournament(population);
            let mut child = first.crossover(second, &mut self.rng);
            child.mutate(rate, focus, &mut self.rng);
            next.push(child);
        }
        next
    }

    /// Runs the search and packs the best genome.
    pub fn run(&mut self) -> OptimizationResult {
        self.run_with_progress(|_| {})
    }

    /// Like [`GeneticOptimizer::run`], calling `on_event` after every
    /// generation and for every placement of the final packing.
    pub fn run_with_progress(&mut self, mut on_event: impl FnMut(&OptimizerEvent)) -> OptimizationResult {
        let generations = self.settings.generations;
        tracing::info!(
            items = self.items.len(),
            population = self.settings.population_size,
            generations,
            weights_source = %self.weights_source,
            "starting optimizer"
        );
        on_event(&OptimizerEvent::Started {
            items: self.items.len(),
            population: self.settings.population_size,
            generations,
            weights_source: self.weights_source,
        });

        let mut population = self.initial_population();
        let mut best: Option<Genome> = None;
        let mut stagnation = 0usize;
        let mut strategy = StrategySuggestion {
            rate_modifier: 0.0,
            focus: OperationFocus::Balanced,
        };
        let mut strategy_source = StrategySource::Initial;
        let mut history = Vec::with_capacity(generations);

        for generation in 0..generations {
            self.evaluate_population(&mut population);
            population.sort_by(fitness_order);

            let leader = population[0].fitness_or_min();
            let improved = best
                .as_ref()
                .is_none_or(|current| leader > current.fitness_or_min() + EPSILON_GENERAL);
            if improved {
                best = Some(population[0].clone());
                stagnation = 0;
            } else {
                stagnation += 1;
            }

            let stats = PopulationStats::from_population(&population);
            history.push(stats);
            let best_ever = best.as_ref().map_or(leader, Genome::fitness_or_min);
            let rate = effective_mutation_rate(self.settings.mutation_rate, strategy.rate_modifier);
            tracing::debug!(
                generation,
                best = stats.best_fitness,
                mean = stats.mean_fitness,
                best_ever,
                stagnation,
                "generation evaluated"
            );
            on_event(&OptimizerEvent::Generation {
                generation,
                best_fitness: stats.best_fitness,
                mean_fitness: stats.mean_fitness,
                best_ever,
                stagnation,
                focus: strategy.focus,
                mutation_rate: rate,
            });

            if generation + 1 == generations {
                break;
            }

            if self.settings.dynamic_weights && generation > 0 && generation % REWEIGHT_INTERVAL == 0 {
                if let Some(weights) = self.refresh_weights(&mut population, best.as_mut()) {
                    on_event(&OptimizerEvent::WeightsUpdated { generation, weights });
                }
            }

            let query_now = generation > 0 && generation % query_interval(stagnation) == 0;
            if query_now || stagnation >= FORCE_AGGRESSIVE_STAGNATION {
                let suggestion = if query_now {
                    self.advisor
                        .suggest_mutation_strategy(generation, &stats, stagnation)
                } else {
                    None
                };
                let (next, source) = select_strategy(suggestion, stagnation);
                if next != strategy || source != strategy_source {
                    tracing::info!(
                        generation,
                        stagnation,
                        focus = %next.focus,
                        modifier = next.rate_modifier,
                        source = ?source,
                        "mutation strategy changed"
                    );
                }
                strategy = next;
                strategy_source = source;
            }

            let rate = effective_mutation_rate(self.settings.mutation_rate, strategy.rate_modifier);
            population = self.next_generation(&population, rate, strategy.focus);
        }

        let best = best.unwrap_or_else(|| {
            let mut genome = population.swap_remove(0);
            let (fitness, metrics) = self.evaluate(&genome);
            genome.set_evaluation(fitness, metrics);
            genome
        });
        self.finish(best, history, &mut on_event)
    }

    /// Re-weights and re-scores `population` and `best` under the new
    /// weights, leaving the population sorted for selection.
    fn refresh_weights(&mut self, population: &mut [Genome], best: Option<&mut Genome>) -> Option<FitnessWeights> {
        let weights = self.reweight(best.as_deref())?;
        population.iter_mut().for_each(Genome::clear_evaluation);
        self.evaluate_population(population);
        population.sort_by(fitness_order);
        if let Some(best) = best {
            let (fitness, metrics) = self.evaluate(best);
            best.set_evaluation(fitness, metrics);
        }
        Some(weights)
    }

    /// Asks the advisor for new weights based on the best genome so far.
    fn reweight(&mut self, best: Option<&Genome>) -> Option<FitnessWeights> {
        let summary = self.summary(best.and_then(|g| g.metrics().copied()));
        let weights = self
            .advisor
            .suggest_fitness_weights(&summary)
            .and_then(|mapping| FitnessWeights::from_mapping(&mapping))?;
        if weights == self.weights {
            return None;
        }
        tracing::info!(?weights, "fitness weights updated by advisor");
        self.weights = weights;
        self.weights_source = WeightsSource::Advisor;
        Some(weights)
    }

    /// Re-packs the best genome, trying its rotation first and the others
    /// only when it fails.
    fn finish(
        &self,
        best: Genome,
        history: Vec<PopulationStats>,
        on_event: &mut impl FnMut(&OptimizerEvent),
    ) -> OptimizationResult {
        let mut container = self.template.clone();
        let sequence = best
            .genes()
            .map(|(idx, rotation)| (self.items[idx].clone(), RotationPolicy::Preferred(rotation)))
            .collect();
        self.engine
            .pack_sequence_with_progress(&mut container, sequence, &mut |event: &PackEvent| {
                if let Some(event) = OptimizerEvent::from_pack_event(event) {
                    on_event(&event);
                }
            });

        let metrics = MetricsBreakdown::from_container(&container, self.items.len(), self.engine.temperature());
        let final_fitness = self.weights.combine(&metrics);
        let best_fitness = best.fitness_or_min();

        tracing::info!(
            best_fitness,
            final_fitness,
            placed = container.placed_count(),
            unpacked = container.unpacked().len(),
            utilization = metrics.volume_utilization,
            "optimizer finished"
        );
        on_event(&OptimizerEvent::Finished {
            best_fitness,
            generations: history.len(),
            placed: container.placed_count(),
            unpacked: container.unpacked().len(),
        });

        OptimizationResult {
            container,
            best_genome: best,
            best_fitness,
            metrics,
            final_fitness,
            generations: history.len(),
            weights: self.weights,
            weights_source: self.weights_source,
            history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::NoAdvisor;
    use crate::item::TemperatureRange;
    use crate::types::Vec3;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cubes(count: usize) -> Vec<Item> {
        vec![
            Item::new("Box", Vec3::new(1.0, 1.0, 1.0), 10.0)
                .unwrap()
                .with_quantity(count)
                .unwrap(),
        ]
    }

    fn mixed_items() -> Vec<Item> {
        vec![
            Item::new("Crate", Vec3::new(1.0, 0.8, 0.6), 20.0).unwrap().with_quantity(5).unwrap(),
            Item::new("Tube", Vec3::new(1.8, 0.3, 0.3), 4.0).unwrap().with_quantity(3).unwrap(),
            Item::new("Cube", Vec3::new(0.5, 0.5, 0.5), 6.0).unwrap().with_quantity(4).unwrap(),
        ]
    }

    fn settings(seed: u64) -> OptimizerSettings {
        OptimizerSettings::builder()
            .population_size(8)
            .generations(5)
            .seed(Some(seed))
            .build()
    }

    fn container() -> Container {
        Container::new(Vec3::new(2.0, 2.0, 2.0), Some(500.0)).unwrap()
    }

    /// Advisor with canned answers that counts its calls.
    struct StubAdvisor {
        weights: Option<HashMap<String, f64>>,
        strategy: Option<StrategySuggestion>,
        weight_calls: AtomicUsize,
        strategy_calls: Mutex<Vec<usize>>,
    }

    impl StubAdvisor {
        fn new(weights: Option<HashMap<String, f64>>, strategy: Option<StrategySuggestion>) -> Self {
            Self {
                weights,
                strategy,
                weight_calls: AtomicUsize::new(0),
                strategy_calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl Advisor for &'static StubAdvisor {
        fn suggest_fitness_weights(&self, _summary: &MetricsSummary) -> Option<HashMap<String, f64>> {
            self.weight_calls.fetch_add(1, Ordering::SeqCst);
            self.weights.clone()
        }

        fn suggest_mutation_strategy(
            &self,
            generation: usize,
            _stats: &PopulationStats,
            _stagnation: usize,
        ) -> Option<StrategySuggestion> {
            self.strategy_calls.lock().unwrap().push(generation);
            self.strategy
        }
    }

    fn leak(advisor: StubAdvisor) -> &'static StubAdvisor {
        Box::leak(Box::new(advisor))
    }

    /// Favors volume on the first request and stability afterwards.
    #[derive(Default)]
    struct ShiftingAdvisor {
        calls: AtomicUsize,
    }

    impl Advisor for &'static ShiftingAdvisor {
        fn suggest_fitness_weights(&self, _summary: &MetricsSummary) -> Option<HashMap<String, f64>> {
            let key = if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                "volume"
            } else {
                "stability"
            };
            Some(HashMap::from([(key.to_string(), 1.0)]))
        }
    }

    #[test]
    fn escalation_table_matches_stagnation() {
        assert_eq!(escalation_strategy(0).focus, OperationFocus::Balanced);
        assert_eq!(escalation_strategy(0).rate_modifier, 0.05);
        assert_eq!(escalation_strategy(3).focus, OperationFocus::Swap);
        assert_eq!(escalation_strategy(7).focus, OperationFocus::Subsequence);
        assert_eq!(escalation_strategy(7).rate_modifier, 0.15);
        assert_eq!(escalation_strategy(12).focus, OperationFocus::Aggressive);
        assert_eq!(escalation_strategy(12).rate_modifier, 0.20);
    }

    #[test]
    fn stagnation_forces_aggressive_over_advice() {
        let advice = StrategySuggestion {
            rate_modifier: 0.0,
            focus: OperationFocus::Rotation,
        };
        let (strategy, source) = select_strategy(Some(advice), 8);
        assert_eq!(strategy.focus, OperationFocus::Aggressive);
        assert_eq!(source, StrategySource::Forced);

        let (strategy, source) = select_strategy(Some(advice), 2);
        assert_eq!(strategy, advice);
        assert_eq!(source, StrategySource::Advisor);

        let bad = StrategySuggestion {
            rate_modifier: f64::NAN,
            focus: OperationFocus::Swap,
        };
        let (strategy, source) = select_strategy(Some(bad), 4);
        assert_eq!(strategy, escalation_strategy(4));
        assert_eq!(source, StrategySource::Escalation);
    }

    #[test]
    fn query_interval_shrinks_with_stagnation() {
        assert_eq!(query_interval(0), 5);
        assert_eq!(query_interval(3), 4);
        assert_eq!(query_interval(6), 3);
    }

    #[test]
    fn mutation_rate_is_clamped() {
        assert_eq!(effective_mutation_rate(0.45, 0.2), 0.5);
        assert_eq!(effective_mutation_rate(0.0, -0.05), 0.01);
        assert!((effective_mutation_rate(0.1, 0.05) - 0.15).abs() < 1e-12);
        assert_eq!(effective_mutation_rate(f64::NAN, 0.0), 0.01);
    }

    #[test]
    fn elites_are_fifteen_percent_rounded_up() {
        assert_eq!(elite_count(30, 0.15), 5);
        assert_eq!(elite_count(10, 0.15), 2);
        assert_eq!(elite_count(2, 0.15), 1);
    }

    #[test]
    fn rejects_invalid_settings() {
        let bad = OptimizerSettings::builder().population_size(1).build();
        assert!(GeneticOptimizer::new(container(), &cubes(2), None, None, bad, Box::new(NoAdvisor)).is_err());
        let bad = OptimizerSettings::builder().generations(0).build();
        assert!(bad.validate().is_err());
        let bad = OptimizerSettings::builder().elite_ratio(1.0).build();
        assert!(bad.validate().is_err());
        assert!(OptimizerSettings::default().validate().is_ok());
    }

    #[test]
    fn caller_weights_win_when_not_degenerate() {
        let mut overrides = HashMap::new();
        overrides.insert("volume".to_string(), 3.0);
        overrides.insert("items_packed".to_string(), 1.0);
        let optimizer =
            GeneticOptimizer::new(container(), &cubes(2), None, Some(&overrides), settings(1), Box::new(NoAdvisor))
                .unwrap();
        assert_eq!(optimizer.weights_source(), WeightsSource::Caller);
        assert!((optimizer.weights().volume - 0.75).abs() < 1e-9);
        assert!((optimizer.weights().sum() - 1.0).abs() < 1e-3);

        let zeros: HashMap<String, f64> = FitnessWeights::KEYS.iter().map(|k| (k.to_string(), 0.0)).collect();
        let optimizer =
            GeneticOptimizer::new(container(), &cubes(2), None, Some(&zeros), settings(1), Box::new(NoAdvisor))
                .unwrap();
        assert_eq!(optimizer.weights_source(), WeightsSource::Default);
        assert_eq!(*optimizer.weights(), FitnessWeights::default());
    }

    #[test]
    fn advisor_weights_are_normalized_or_ignored() {
        let mut mapping = HashMap::new();
        mapping.insert("volume".to_string(), 5.0);
        mapping.insert("stability".to_string(), 5.0);
        let advisor = leak(StubAdvisor::new(Some(mapping), None));
        let optimizer =
            GeneticOptimizer::new(container(), &cubes(2), None, None, settings(1), Box::new(advisor)).unwrap();
        assert_eq!(optimizer.weights_source(), WeightsSource::Advisor);
        assert!((optimizer.weights().sum() - 1.0).abs() < 1e-3);
        assert_eq!(advisor.weight_calls.load(Ordering::SeqCst), 1);

        let mut negative = HashMap::new();
        negative.insert("volume".to_string(), -1.0);
        let advisor = leak(StubAdvisor::new(Some(negative), None));
        let optimizer =
            GeneticOptimizer::new(container(), &cubes(2), None, None, settings(1), Box::new(advisor)).unwrap();
        assert_eq!(optimizer.weights_source(), WeightsSource::Default);
    }

    #[test]
    fn genome_evaluation_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(42);
        let optimizer = GeneticOptimizer::new(
            Container::new(Vec3::new(3.0, 2.0, 2.0), None).unwrap(),
            &mixed_items(),
            None,
            None,
            settings(2),
            Box::new(NoAdvisor),
        )
        .unwrap();
        let genome = Genome::random(optimizer.items().len(), &mut rng);
        let first = optimizer.evaluate(&genome);
        let second = optimizer.evaluate(&genome);
        assert_eq!(first.0, second.0);
        assert_eq!(first.1, second.1);
    }

    #[test]
    fn packs_eight_cubes_completely() {
        let mut optimizer =
            GeneticOptimizer::new(container(), &cubes(8), None, None, settings(3), Box::new(NoAdvisor)).unwrap();
        let result = optimizer.run();
        assert_eq!(result.container.placed_count(), 8);
        assert!(result.container.unpacked().is_empty());
        assert!((result.metrics.volume_utilization - 1.0).abs() < 1e-9);
        assert_eq!(result.generations, 5);
        assert_eq!(result.history.len(), 5);
        assert_eq!(result.weights_source, WeightsSource::Default);
    }

    #[test]
    fn best_fitness_never_decreases_across_history() {
        let mut optimizer = GeneticOptimizer::new(
            Container::new(Vec3::new(3.0, 2.0, 2.0), None).unwrap(),
            &mixed_items(),
            None,
            None,
            OptimizerSettings::builder()
                .population_size(10)
                .generations(8)
                .seed(Some(9))
                .build(),
            Box::new(NoAdvisor),
        )
        .unwrap();
        let result = optimizer.run();
        // Elites carry over unchanged, so the leader can only improve.
        for pair in result.history.windows(2) {
            assert!(pair[1].best_fitness + 1e-12 >= pair[0].best_fitness);
        }
        let max = result
            .history
            .iter()
            .map(|s| s.best_fitness)
            .fold(f64::NEG_INFINITY, f64::max);
        assert!((result.best_fitness - max).abs() < 1e-6);
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let run = || {
            let mut optimizer = GeneticOptimizer::new(
                Container::new(Vec3::new(3.0, 2.0, 2.0), None).unwrap(),
                &mixed_items(),
                None,
                None,
                settings(77),
                Box::new(NoAdvisor),
            )
            .unwrap();
            optimizer.run()
        };
        let a = run();
        let b = run();
        assert_eq!(a.best_fitness, b.best_fitness);
        assert_eq!(a.best_genome.order(), b.best_genome.order());
        assert_eq!(a.best_genome.rotations(), b.best_genome.rotations());
    }

    #[test]
    fn final_packing_respects_invariants_and_reports_rejections() {
        let mut items = mixed_items();
        items.push(Item::new("Mast", Vec3::new(4.0, 0.2, 0.2), 3.0).unwrap());
        items.push(
            Item::new("Serum", Vec3::new(0.4, 0.4, 0.4), 1.0)
                .unwrap()
                .with_temperature_range(TemperatureRange::new(2.0, 8.0).unwrap()),
        );
        let mut optimizer = GeneticOptimizer::new(
            Container::new(Vec3::new(3.0, 2.0, 2.0), None).unwrap(),
            &items,
            Some(30.0),
            None,
            settings(5),
            Box::new(NoAdvisor),
        )
        .unwrap();

        let mut events = Vec::new();
        let result = optimizer.run_with_progress(|e| events.push(e.clone()));
        let cont = &result.container;

        assert!(matches!(
            cont.unpacked_reason("Mast"),
            Some(crate::placement::UnpackedReason::ExceedsContainer { .. })
        ));
        let boxes: Vec<_> = cont.placed().iter().filter_map(Item::bounding_box).collect();
        for (i, a) in boxes.iter().enumerate() {
            assert!(a.is_within(&cont.dims()));
            for b in boxes.iter().skip(i + 1) {
                assert!(!a.intersects(b));
            }
        }
        for item in cont.placed().iter().filter(|i| i.needs_insulation()) {
            let bbox = item.bounding_box().unwrap();
            assert!(bbox.min_wall_distance(&cont.dims()) + 1e-6 >= 0.3);
        }

        assert!(matches!(events.first(), Some(OptimizerEvent::Started { .. })));
        assert!(matches!(events.last(), Some(OptimizerEvent::Finished { .. })));
        let generations = events
            .iter()
            .filter(|e| matches!(e, OptimizerEvent::Generation { .. }))
            .count();
        assert_eq!(generations, 5);
        assert!(events
            .iter()
            .any(|e| matches!(e, OptimizerEvent::ItemRejected { name, .. } if name == "Mast")));
    }

    #[test]
    fn advisor_is_queried_for_strategy_and_dynamic_weights() {
        let mut mapping = HashMap::new();
        mapping.insert("volume".to_string(), 1.0);
        let advisor = leak(StubAdvisor::new(
            Some(mapping),
            Some(StrategySuggestion {
                rate_modifier: 0.1,
                focus: OperationFocus::Rotation,
            }),
        ));
        let mut optimizer = GeneticOptimizer::new(
            container(),
            &cubes(6),
            None,
            None,
            OptimizerSettings::builder()
                .population_size(6)
                .generations(12)
                .seed(Some(4))
                .dynamic_weights(true)
                .build(),
            Box::new(advisor),
        )
        .unwrap();
        let result = optimizer.run();

        let calls = advisor.strategy_calls.lock().unwrap().clone();
        assert!(!calls.is_empty());
        assert!(calls.iter().all(|g| *g > 0));
        // Initial request plus re-weighting at generations 3, 6 and 9.
        assert_eq!(advisor.weight_calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.weights_source, WeightsSource::Advisor);
        assert!((result.weights.volume - 1.0).abs() < 1e-9);
    }

    #[test]
    fn population_is_rescored_before_selection_after_reweight() {
        let advisor: &'static ShiftingAdvisor = Box::leak(Box::default());
        let mut optimizer = GeneticOptimizer::new(
            Container::new(Vec3::new(3.0, 2.0, 2.0), None).unwrap(),
            &mixed_items(),
            None,
            None,
            OptimizerSettings::builder()
                .population_size(8)
                .seed(Some(21))
                .dynamic_weights(true)
                .build(),
            Box::new(advisor),
        )
        .unwrap();
        assert!((optimizer.weights().volume - 1.0).abs() < 1e-9);

        let mut population = optimizer.initial_population();
        optimizer.evaluate_population(&mut population);
        population.sort_by(fitness_order);
        let mut best = population[0].clone();

        let weights = optimizer.refresh_weights(&mut population, Some(&mut best)).unwrap();
        assert!((weights.stability - 1.0).abs() < 1e-9);
        assert!(population.iter().all(Genome::is_evaluated));
        for genome in &population {
            assert_eq!(genome.fitness(), Some(optimizer.evaluate(genome).0));
        }
        assert!(population
            .windows(2)
            .all(|pair| pair[0].fitness_or_min() >= pair[1].fitness_or_min()));
        assert_eq!(best.fitness(), Some(optimizer.evaluate(&best).0));
        assert!(optimizer.tournament(&population).is_evaluated());

        // Same answer again changes nothing.
        assert!(optimizer.refresh_weights(&mut population, None).is_none());
    }

    #[test]
    fn run_switches_to_updated_weights() {
        let advisor: &'static ShiftingAdvisor = Box::leak(Box::default());
        let mut optimizer = GeneticOptimizer::new(
            container(),
            &cubes(4),
            None,
            None,
            OptimizerSettings::builder()
                .population_size(6)
                .generations(5)
                .seed(Some(8))
                .dynamic_weights(true)
                .build(),
            Box::new(advisor),
        )
        .unwrap();
        let mut updates = Vec::new();
        let result = optimizer.run_with_progress(|event| {
            if let OptimizerEvent::WeightsUpdated { generation, .. } = event {
                updates.push(*generation);
            }
        });
        assert_eq!(updates, vec![3]);
        assert!((result.weights.stability - 1.0).abs() < 1e-9);
        assert_eq!(result.best_genome.fitness(), Some(optimizer.evaluate(&result.best_genome).0));
    }

    #[test]
    fn initial_population_keeps_sorted_leader_and_varies_the_rest() {
        let mut optimizer = GeneticOptimizer::new(
            Container::new(Vec3::new(3.0, 2.0, 2.0), None).unwrap(),
            &mixed_items(),
            None,
            None,
            OptimizerSettings::builder().population_size(12).seed(Some(3)).build(),
            Box::new(NoAdvisor),
        )
        .unwrap();
        let sorted: Vec<usize> = (0..optimizer.items().len()).collect();
        let population = optimizer.initial_population();
        assert_eq!(population.len(), 12);
        assert_eq!(population[0].order(), sorted.as_slice());
        assert!(population.iter().all(Genome::is_valid));
        assert!(population.iter().skip(1).any(|g| g.order() != sorted.as_slice()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_http_advisor_falls_back_inside_async_code() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let advisor = crate::advisor::HttpAdvisor::new(
            format!("http://127.0.0.1:{port}"),
            std::time::Duration::from_millis(200),
            tokio::runtime::Handle::current(),
        )
        .unwrap();
        let optimizer =
            GeneticOptimizer::new(container(), &cubes(2), None, None, settings(1), Box::new(advisor)).unwrap();
        assert_eq!(optimizer.weights_source(), WeightsSource::Default);
        assert_eq!(*optimizer.weights(), FitnessWeights::default());
    }

    #[test]
    fn empty_item_list_runs_cleanly() {
        let mut optimizer =
            GeneticOptimizer::new(container(), &[], None, None, settings(6), Box::new(NoAdvisor)).unwrap();
        let result = optimizer.run();
        assert_eq!(result.container.placed_count(), 0);
        assert!(result.container.unpacked().is_empty());
        assert_eq!(result.metrics.stability, 0.0);
        assert_eq!(result.metrics.items_packed, 1.0);
    }
}
