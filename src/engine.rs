use crate::agent::{self, Agent};
use crate::game::Game;
use crate::net::Network;
use crate::pos::Pos;
use ahash::AHashSet;
use anyhow::{Result, bail, ensure};
use log::warn;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Head positions inspected by the loop detector.
const LOOP_WINDOW: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub population_size: usize,
    pub field_width: i32,
    pub field_height: i32,
    pub initial_length: usize,
    pub hidden_layers: Vec<usize>,
    pub mutation_rate: f32,
    pub mutation_strength: f32,
    pub elite_count: usize,
    pub tournament_size: usize,
    /// Hard cap on steps per evaluation episode.
    pub max_steps: usize,
    /// Seed for the engine's generator; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            population_size: 50,
            field_width: 15,
            field_height: 15,
            initial_length: 3,
            hidden_layers: vec![16, 12],
            mutation_rate: 0.1,
            mutation_strength: 0.5,
            elite_count: 5,
            tournament_size: 3,
            max_steps: 5000,
            seed: None,
        }
    }
}

impl EngineConfig {
    /// Fails fast on values that would make a cycle meaningless or a game
    /// unconstructible. Called before any population is built.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.population_size >= 1, "population size must be at least 1");
        ensure!(
            self.elite_count <= self.population_size,
            "elite count {} exceeds population size {}",
            self.elite_count,
            self.population_size
        );
        ensure!(self.tournament_size >= 1, "tournament size must be at least 1");
        ensure!(
            self.field_width >= 1 && self.field_height >= 1,
            "field dimensions must be positive, got {}x{}",
            self.field_width,
            self.field_height
        );
        ensure!(self.initial_length >= 1, "initial snake length must be at least 1");
        ensure!(
            self.initial_length as i32 <= self.field_width / 2 + 1,
            "initial length {} does not fit a {} wide field",
            self.initial_length,
            self.field_width
        );
        ensure!(
            (self.field_width as usize) * (self.field_height as usize) > self.initial_length,
            "field has no free cell for the apple"
        );
        ensure!(
            (0.0..=1.0).contains(&self.mutation_rate),
            "mutation rate must be in [0, 1], got {}",
            self.mutation_rate
        );
        ensure!(
            self.mutation_strength.is_finite() && self.mutation_strength >= 0.0,
            "mutation strength must be finite and non-negative, got {}",
            self.mutation_strength
        );
        ensure!(self.max_steps >= 1, "max steps must be at least 1");
        ensure!(
            self.hidden_layers.iter().all(|&s| s > 0),
            "hidden layer widths must be positive: {:?}",
            self.hidden_layers
        );
        Ok(())
    }
}

/// Outcome of one simulated episode. Selection uses `fitness`; `score` is
/// the raw apple count kept for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitnessRecord {
    pub fitness: f32,
    pub score: usize,
    pub steps: usize,
    pub length: usize,
}

/// Per-cycle aggregate appended to the engine's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleStats {
    pub cycle: u64,
    pub best_score: usize,
    pub avg_score: f32,
    pub best_fitness: f32,
    pub avg_fitness: f32,
}

/// Runs one agent through a fresh game until it dies, hits the step cap,
/// starves (no apple for 3 x width x height steps), or falls into a short
/// movement loop. The seed makes the episode reproducible.
pub fn evaluate_agent(agent: &Agent, config: &EngineConfig, seed: u64) -> Result<FitnessRecord> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut game = Game::new(
        config.field_width,
        config.field_height,
        config.initial_length,
        &mut rng,
    );
    let starvation_limit = (config.field_width * config.field_height * 3) as usize;

    let mut steps = 0usize;
    let mut steps_since_apple = 0usize;
    let mut recent_heads: VecDeque<Pos> = VecDeque::with_capacity(LOOP_WINDOW + 1);

    while !game.is_over() && steps < config.max_steps {
        let dir = agent.decide(&game)?;
        game.set_direction(dir);

        let before = game.score();
        game.step(&mut rng);

        if game.score() > before {
            steps_since_apple = 0;
            recent_heads.clear();
        } else {
            steps_since_apple += 1;
        }
        if steps_since_apple > starvation_limit {
            break;
        }

        recent_heads.push_back(game.head());
        if recent_heads.len() > LOOP_WINDOW {
            recent_heads.pop_front();
            let distinct: AHashSet<Pos> = recent_heads.iter().copied().collect();
            if distinct.len() < LOOP_WINDOW / 2 {
                break;
            }
        }

        steps += 1;
    }

    Ok(FitnessRecord {
        fitness: 1000.0 * game.score() as f32 + 10.0 * game.len() as f32 + 0.1 * steps as f32,
        score: game.score(),
        steps,
        length: game.len(),
    })
}

/// Owns the population and runs the evaluate -> rank -> reproduce cycle.
/// Supports two regimes over the same primitives: `evolve_generation`
/// (elitism + tournament selection over a diverse population) and
/// `evolve_from_best` (the whole next population is the current best genome
/// self-crossed and mutated).
pub struct Engine {
    config: EngineConfig,
    population: Vec<Agent>,
    rng: SmallRng,
    generation: u64,
    best_fitness: f32,
    best_score: usize,
    best_genome: Option<Network>,
    last_best: Option<Network>,
    seed_genome: Option<Network>,
    history: Vec<CycleStats>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        let population = (0..config.population_size)
            .map(|_| Agent::new(&config.hidden_layers, &mut rng))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            config,
            population,
            rng,
            generation: 0,
            best_fitness: f32::NEG_INFINITY,
            best_score: 0,
            best_genome: None,
            last_best: None,
            seed_genome: None,
            history: Vec::new(),
            cancel: None,
        })
    }

    /// Installs a flag the evaluation pass polls between individual agents,
    /// so a stop request takes effect mid-cycle.
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|f| f.load(Ordering::Relaxed))
    }

    /// Seeds the continuous regime from a flattened weight vector, for
    /// example one loaded from disk. Rejects a length mismatch without
    /// changing any engine state.
    pub fn set_seed_weights(&mut self, flat: &[f32]) -> Result<()> {
        let mut net = Network::new(&agent::layer_sizes(&self.config.hidden_layers), &mut self.rng)?;
        net.restore(flat)?;
        self.seed_genome = Some(net);
        Ok(())
    }

    /// One fixed-regime generation: evaluate everyone, rank, carry elites,
    /// fill the rest via tournament selection + crossover + mutation.
    pub fn evolve_generation(&mut self) -> Result<CycleStats> {
        self.generation += 1;
        let records = self.evaluate_population()?;
        let stats = self.record_cycle(&records);

        let elite_n = self.config.elite_count.min(records.len());
        let mut next: Vec<Agent> = records[..elite_n]
            .iter()
            .map(|&(_, ix)| self.population[ix].clone())
            .collect();

        while next.len() < self.config.population_size {
            let p1 = tournament(&records, self.config.tournament_size, &mut self.rng);
            let p2 = tournament(&records, self.config.tournament_size, &mut self.rng);
            let mut child = Network::crossover(
                self.population[p1].network(),
                self.population[p2].network(),
                &mut self.rng,
            )?;
            child.mutate(
                self.config.mutation_rate,
                self.config.mutation_strength,
                &mut self.rng,
            );
            next.push(Agent::from_network(child)?);
        }

        self.population = next;
        Ok(stats)
    }

    /// One continuous-regime cycle: rebuild the entire population from the
    /// current seed genome crossed with itself and mutated, evaluate, and
    /// make the cycle's best the seed for the next cycle. A hill-climbing
    /// variant of the same primitives, with diversity coming solely from
    /// independent mutation draws.
    pub fn evolve_from_best(&mut self) -> Result<CycleStats> {
        self.generation += 1;

        let seed = match self.seed_genome.take() {
            Some(net) => net,
            None => match self.best_genome.clone() {
                Some(net) => net,
                None => Network::new(
                    &agent::layer_sizes(&self.config.hidden_layers),
                    &mut self.rng,
                )?,
            },
        };

        let mut next = Vec::with_capacity(self.config.population_size);
        for _ in 0..self.config.population_size {
            let mut child = Network::crossover(&seed, &seed, &mut self.rng)?;
            child.mutate(
                self.config.mutation_rate,
                self.config.mutation_strength,
                &mut self.rng,
            );
            next.push(Agent::from_network(child)?);
        }
        self.population = next;

        let records = self.evaluate_population()?;
        let stats = self.record_cycle(&records);
        self.seed_genome = Some(self.population[records[0].1].network().clone());
        Ok(stats)
    }

    /// Evaluates the whole population in parallel and returns the surviving
    /// records sorted by fitness descending, paired with population indices.
    /// An agent whose evaluation errors is logged and skipped; the cycle
    /// fails only when nobody evaluates successfully.
    fn evaluate_population(&mut self) -> Result<Vec<(FitnessRecord, usize)>> {
        let seeds: Vec<u64> = (0..self.population.len())
            .map(|_| self.rng.next_u64())
            .collect();
        let cancel = self.cancel.clone();
        let config = &self.config;

        let outcomes: Vec<Option<Result<FitnessRecord>>> = self
            .population
            .par_iter()
            .zip(seeds)
            .map(|(agent, seed)| {
                if cancel.as_ref().is_some_and(|f| f.load(Ordering::Relaxed)) {
                    return None;
                }
                Some(evaluate_agent(agent, config, seed))
            })
            .collect();

        if self.cancelled() {
            bail!("cycle {} cancelled", self.generation);
        }

        let mut records = Vec::with_capacity(outcomes.len());
        for (ix, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Some(Ok(record)) => records.push((record, ix)),
                Some(Err(e)) => warn!("skipping agent {ix} in cycle {}: {e:#}", self.generation),
                None => {}
            }
        }
        if records.is_empty() {
            bail!("no agent evaluated successfully in cycle {}", self.generation);
        }

        records.sort_by(|a, b| b.0.fitness.total_cmp(&a.0.fitness));
        Ok(records)
    }

    fn record_cycle(&mut self, records: &[(FitnessRecord, usize)]) -> CycleStats {
        let best = records[0].0;
        let n = records.len() as f32;
        let stats = CycleStats {
            cycle: self.generation,
            best_score: best.score,
            avg_score: records.iter().map(|r| r.0.score as f32).sum::<f32>() / n,
            best_fitness: best.fitness,
            avg_fitness: records.iter().map(|r| r.0.fitness).sum::<f32>() / n,
        };

        let top = self.population[records[0].1].network().clone();
        if best.fitness > self.best_fitness {
            self.best_fitness = best.fitness;
            self.best_score = best.score;
            self.best_genome = Some(top.clone());
        }
        self.last_best = Some(top);

        self.history.push(stats.clone());
        stats
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn best_fitness(&self) -> f32 {
        self.best_fitness
    }

    pub fn best_score(&self) -> usize {
        self.best_score
    }

    /// Flattened parameters of the best genome seen so far.
    pub fn best_weights(&self) -> Option<Vec<f32>> {
        self.best_genome.as_ref().map(Network::flatten)
    }

    /// Flattened parameters of the most recent cycle's top genome.
    pub fn last_best_weights(&self) -> Option<Vec<f32>> {
        self.last_best.as_ref().map(Network::flatten)
    }

    pub fn history(&self) -> &[CycleStats] {
        &self.history
    }

    pub fn population(&self) -> &[Agent] {
        &self.population
    }
}

/// Tournament selection: sample `size` records without replacement (clamped
/// to the population) and return the population index of the fittest.
fn tournament<R: Rng>(records: &[(FitnessRecord, usize)], size: usize, rng: &mut R) -> usize {
    records
        .choose_multiple(rng, size.max(1))
        .max_by(|a, b| a.0.fitness.total_cmp(&b.0.fitness))
        .expect("records is not empty")
        .1
}
