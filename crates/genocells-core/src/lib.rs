//! Core types shared across the genocells workspace.
//!
//! The simulation is a toroidal grid of cell slots. Every alive cell carries a
//! fixed-length genome that is interpreted one instruction per tick; the
//! [`WorldState`] drives the per-tick visitation and keeps census history.

use rand::{Rng, RngCore, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error;

pub mod cell;
pub mod genome;
pub mod grid;
pub mod interpreter;
pub mod world;

pub use cell::{Cell, Direction, FoodSource, SlotState};
pub use genome::{Command, Genome, Instruction, MAX_GENOME_LENGTH};
pub use grid::{Grid, wrap};
pub use interpreter::{StepOutcome, step};
pub use world::{TickEvents, WorldState};

/// Upper bound of a colour channel.
pub const COLOR_MAX: f32 = 255.0;

/// Draw an integer uniformly from the closed range `[from, to]`.
///
/// Degenerate ranges (`from >= to`) always yield `from`.
pub fn random_inclusive(rng: &mut dyn RngCore, from: i32, to: i32) -> i32 {
    if from >= to {
        return from;
    }
    rng.random_range(from..=to)
}

fn clamp_channel(value: f32) -> f32 {
    value.clamp(0.0, COLOR_MAX)
}

/// Errors that can occur when constructing world state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldStateError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// The grid storage could not be allocated.
    #[error("failed to allocate storage for {cells} cells")]
    Allocation { cells: usize },
}

/// Order in which the scheduler visits grid slots during a tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum TickOrder {
    /// Row-major order, `(0,0), (1,0), ...`.
    Raster,
    /// A permutation of all slots drawn once when the world is built.
    #[default]
    Shuffled,
}

/// Behaviour of `MOVE_FORWARDS` when the facing slot holds a corpse.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum CorpseStep {
    /// Absorb the corpse's residual energy and take its slot.
    #[default]
    Consume,
    /// Treat the corpse as an obstacle.
    Block,
}

/// How genome similarity is measured for kin recognition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum SimilarityMode {
    /// All operands and the command must match.
    #[default]
    Exact,
    /// Only the command must match.
    CommandOnly,
}

/// Static configuration for a genocells world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenocellsConfig {
    /// Number of grid columns.
    pub grid_width: u32,
    /// Number of grid rows.
    pub grid_height: u32,
    /// Optional RNG seed for reproducible worlds.
    pub rng_seed: Option<u64>,
    /// Instructions per genome (at most [`MAX_GENOME_LENGTH`]).
    pub genome_length: usize,
    /// Inclusive upper bound of the `e` operand.
    pub operand_max: u8,
    /// Chance that a slot is seeded with a random alive cell.
    pub initial_alive_probability: f64,
    /// Energy of freshly seeded cells.
    pub start_energy: f32,
    /// Minimum energy before `MAKE_CHILD` does anything.
    pub reproduction_required_energy: f32,
    /// Chance out of 100 that a child receives one mutation event.
    pub mutation_percent: u32,
    /// Largest colour shift applied by a mutation event.
    pub color_mutation_step: i32,
    /// Cells older than this die on their next step.
    pub cell_max_age: u32,
    /// Ambient metabolic tax paid every step.
    pub noop_cost: f32,
    /// Extra cost of turning.
    pub turn_cost: f32,
    /// Extra cost of moving forwards (paid even when blocked).
    pub movement_cost: f32,
    /// Extra cost of swapping places.
    pub swap_cost: f32,
    /// Energy produced by one photosynthesis step.
    pub photosynthesis_energy: f32,
    /// Minimum energy for an attack; also its cost.
    pub attack_required_energy: f32,
    /// Fraction of the victim's energy taken by an attack.
    pub attack_energy_rate: f32,
    /// Multiplier on the take when the attacker is not a meat eater.
    pub attack_non_meat_scale: f32,
    /// Victim loses this multiple of the attacker's take.
    pub attack_damage_multiplier: f32,
    /// Surcharge paid for killing a victim outright.
    pub attack_kill_cost: f32,
    /// Fraction of residual energy kept by a new corpse.
    pub corpse_energy_fraction: f32,
    /// Behaviour when moving onto a corpse.
    pub corpse_step: CorpseStep,
    /// Whether children may be spawned onto corpses.
    pub spawn_on_corpses: bool,
    /// Visitation order of the scheduler.
    pub tick_order: TickOrder,
    /// Similarity measure used by kin recognition.
    pub similarity: SimilarityMode,
    /// Maximum number of recent tick summaries retained in-memory.
    pub history_capacity: usize,
    /// Interval (ticks) between persistence flushes. 0 disables persistence.
    pub persistence_interval: u32,
}

impl Default for GenocellsConfig {
    fn default() -> Self {
        Self {
            grid_width: 238,
            grid_height: 130,
            rng_seed: None,
            genome_length: 256,
            operand_max: 100,
            initial_alive_probability: 0.2,
            start_energy: 10.0,
            reproduction_required_energy: 80.0,
            mutation_percent: 25,
            color_mutation_step: 16,
            cell_max_age: 1_200,
            noop_cost: 0.2,
            turn_cost: 0.5,
            movement_cost: 1.0,
            swap_cost: 2.0,
            photosynthesis_energy: 5.0,
            attack_required_energy: 1.0,
            attack_energy_rate: 0.5,
            attack_non_meat_scale: 0.5,
            attack_damage_multiplier: 1.5,
            attack_kill_cost: 2.0,
            corpse_energy_fraction: 0.8,
            corpse_step: CorpseStep::Consume,
            spawn_on_corpses: true,
            tick_order: TickOrder::Shuffled,
            similarity: SimilarityMode::Exact,
            history_capacity: 256,
            persistence_interval: 0,
        }
    }
}

impl GenocellsConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), WorldStateError> {
        if self.grid_width == 0 || self.grid_height == 0 {
            return Err(WorldStateError::InvalidConfig(
                "grid dimensions must be non-zero",
            ));
        }
        if self.genome_length == 0 || self.genome_length > MAX_GENOME_LENGTH {
            return Err(WorldStateError::InvalidConfig(
                "genome_length must be within 1..=256",
            ));
        }
        if !(0.0..=1.0).contains(&self.initial_alive_probability) {
            return Err(WorldStateError::InvalidConfig(
                "initial_alive_probability must be within [0, 1]",
            ));
        }
        if self.mutation_percent > 100 {
            return Err(WorldStateError::InvalidConfig(
                "mutation_percent cannot exceed 100",
            ));
        }
        if !(0.0..=1.0).contains(&self.corpse_energy_fraction) {
            return Err(WorldStateError::InvalidConfig(
                "corpse_energy_fraction must be within [0, 1]",
            ));
        }
        if self.start_energy < 0.0
            || self.reproduction_required_energy < 0.0
            || self.color_mutation_step < 0
            || self.noop_cost < 0.0
            || self.turn_cost < 0.0
            || self.movement_cost < 0.0
            || self.swap_cost < 0.0
            || self.photosynthesis_energy < 0.0
            || self.attack_required_energy < 0.0
            || self.attack_energy_rate < 0.0
            || self.attack_non_meat_scale < 0.0
            || self.attack_damage_multiplier < 0.0
            || self.attack_kill_cost < 0.0
        {
            return Err(WorldStateError::InvalidConfig(
                "energies, costs, and attack rates must be non-negative",
            ));
        }
        if self.history_capacity == 0 {
            return Err(WorldStateError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        Ok(())
    }

    /// Number of slots in the configured grid.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        (self.grid_width as usize) * (self.grid_height as usize)
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// High level simulation clock (ticks processed since boot).
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Census emitted to persistence hooks each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub tick: Tick,
    pub alive: usize,
    pub corpses: usize,
    pub births: usize,
    pub deaths: usize,
    pub kills: usize,
    pub total_energy: f32,
    pub average_energy: f32,
    pub photosynthesizers: usize,
    pub meat_eaters: usize,
    pub scavengers: usize,
}

/// Scalar metric sampled during persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: Cow<'static, str>,
    pub value: f64,
}

impl MetricSample {
    /// Creates a new metric sample.
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Helper for `f32` values.
    #[must_use]
    pub fn from_f32(name: &'static str, value: f32) -> Self {
        Self::new(name, f64::from(value))
    }

    /// Helper for counters.
    #[must_use]
    pub fn from_count(name: &'static str, value: usize) -> Self {
        Self::new(name, value as f64)
    }
}

/// Event type recorded for persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistenceEventKind {
    Births,
    Deaths,
    Kills,
}

impl PersistenceEventKind {
    /// Stable label used by storage backends.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Births => "births",
            Self::Deaths => "deaths",
            Self::Kills => "kills",
        }
    }
}

/// Structured persistence event entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistenceEvent {
    pub kind: PersistenceEventKind,
    pub count: usize,
}

impl PersistenceEvent {
    /// Construct a new event entry.
    #[must_use]
    pub fn new(kind: PersistenceEventKind, count: usize) -> Self {
        Self { kind, count }
    }
}

/// Aggregate payload forwarded to persistence sinks.
#[derive(Debug, Clone)]
pub struct PersistenceBatch {
    pub summary: TickSummary,
    pub metrics: Vec<MetricSample>,
    pub events: Vec<PersistenceEvent>,
}

/// Persistence sink invoked after each tick.
pub trait WorldPersistence: Send {
    fn on_tick(&mut self, payload: &PersistenceBatch);

    /// Called once when the world is torn down.
    fn flush(&mut self) {}
}

/// No-op persistence sink.
#[derive(Debug, Default)]
pub struct NullPersistence;

impl WorldPersistence for NullPersistence {
    fn on_tick(&mut self, _payload: &PersistenceBatch) {}
}
