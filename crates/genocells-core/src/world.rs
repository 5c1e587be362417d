//! Tick scheduler and world lifecycle.

use rand::{Rng, rngs::SmallRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, info};

use crate::cell::{Cell, FoodSource};
use crate::grid::Grid;
use crate::interpreter;
use crate::{
    GenocellsConfig, MetricSample, NullPersistence, PersistenceBatch, PersistenceEvent,
    PersistenceEventKind, Tick, TickOrder, TickSummary, WorldPersistence, WorldStateError,
};

/// Events emitted after processing a world tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TickEvents {
    pub tick: Tick,
    pub alive: usize,
    pub births: usize,
    pub deaths: usize,
    pub kills: usize,
    /// Whether the tick's summary was forwarded to the persistence sink.
    pub persisted: bool,
}

/// Simulation state: grid, clock, RNG stream, and census history.
pub struct WorldState {
    config: GenocellsConfig,
    tick: Tick,
    rng: SmallRng,
    grid: Grid,
    update_order: Vec<usize>,
    persistence: Box<dyn WorldPersistence>,
    last_births: usize,
    last_deaths: usize,
    last_kills: usize,
    history: VecDeque<TickSummary>,
}

impl fmt::Debug for WorldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldState")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("alive", &self.grid.count_alive())
            .finish()
    }
}

impl WorldState {
    /// Instantiate and randomly seed a new world.
    pub fn new(config: GenocellsConfig) -> Result<Self, WorldStateError> {
        Self::with_persistence(config, Box::new(NullPersistence))
    }

    /// Instantiate and seed a new world reporting to `persistence`.
    pub fn with_persistence(
        config: GenocellsConfig,
        persistence: Box<dyn WorldPersistence>,
    ) -> Result<Self, WorldStateError> {
        let mut world = Self::empty(config, persistence)?;
        world.populate();
        debug!(
            width = world.grid.width(),
            height = world.grid.height(),
            alive = world.grid.count_alive(),
            order = ?world.config.tick_order,
            "seeded world"
        );
        Ok(world)
    }

    /// Instantiate a world with every slot vacant.
    pub fn empty(
        config: GenocellsConfig,
        persistence: Box<dyn WorldPersistence>,
    ) -> Result<Self, WorldStateError> {
        config.validate()?;
        let grid = Grid::new(config.grid_width, config.grid_height)?;
        let rng = config.seeded_rng();
        Ok(Self::assemble(config, grid, Tick::zero(), rng, persistence))
    }

    /// Resume from a previously captured grid and clock.
    ///
    /// The grid dimensions must match the configuration.
    pub fn from_grid(
        config: GenocellsConfig,
        grid: Grid,
        tick: Tick,
        persistence: Box<dyn WorldPersistence>,
    ) -> Result<Self, WorldStateError> {
        config.validate()?;
        if grid.width() != config.grid_width || grid.height() != config.grid_height {
            return Err(WorldStateError::InvalidConfig(
                "grid dimensions do not match configuration",
            ));
        }
        let rng = config.seeded_rng();
        let world = Self::assemble(config, grid, tick, rng, persistence);
        info!(
            tick = tick.0,
            alive = world.grid.count_alive(),
            "restored world"
        );
        Ok(world)
    }

    fn assemble(
        config: GenocellsConfig,
        grid: Grid,
        tick: Tick,
        mut rng: SmallRng,
        persistence: Box<dyn WorldPersistence>,
    ) -> Self {
        let mut update_order: Vec<usize> = (0..grid.len()).collect();
        if config.tick_order == TickOrder::Shuffled {
            update_order.shuffle(&mut rng);
        }
        let history_capacity = config.history_capacity;
        Self {
            config,
            tick,
            rng,
            grid,
            update_order,
            persistence,
            last_births: 0,
            last_deaths: 0,
            last_kills: 0,
            history: VecDeque::with_capacity(history_capacity),
        }
    }

    /// Seed every slot as a random alive cell with the configured probability.
    fn populate(&mut self) {
        let probability = self.config.initial_alive_probability;
        for index in 0..self.grid.len() {
            if self.rng.random_bool(probability) {
                let (x, y) = self.grid.coords(index);
                let cell = Cell::random(x, y, &mut self.rng, &self.config);
                self.grid.set(x, y, cell);
            }
        }
    }

    /// Execute one simulation tick, visiting every slot once in the fixed order.
    ///
    /// Each slot is read from the live grid, so moves and births earlier in the
    /// tick are visible to slots visited later.
    pub fn step(&mut self) -> TickEvents {
        let next_tick = self.tick.next();

        for &index in &self.update_order {
            let Some(cell) = self.grid.cells().get(index).filter(|c| c.is_alive()).cloned()
            else {
                continue;
            };
            let outcome = interpreter::step(&mut self.grid, cell, &self.config, &mut self.rng);
            self.last_births += usize::from(outcome.born);
            self.last_deaths += usize::from(outcome.died) + usize::from(outcome.killed);
            self.last_kills += usize::from(outcome.killed);
        }

        let summary = self.summary_at(next_tick);
        let events = TickEvents {
            tick: next_tick,
            alive: summary.alive,
            births: summary.births,
            deaths: summary.deaths,
            kills: summary.kills,
            persisted: self.stage_persistence(&summary),
        };
        self.push_history(summary);

        self.last_births = 0;
        self.last_deaths = 0;
        self.last_kills = 0;
        self.tick = next_tick;
        events
    }

    fn stage_persistence(&mut self, summary: &TickSummary) -> bool {
        let interval = u64::from(self.config.persistence_interval);
        if interval == 0 || !summary.tick.0.is_multiple_of(interval) {
            return false;
        }

        let metrics = vec![
            MetricSample::from_count("alive", summary.alive),
            MetricSample::from_count("corpses", summary.corpses),
            MetricSample::from_f32("total_energy", summary.total_energy),
            MetricSample::from_f32("average_energy", summary.average_energy),
            MetricSample::from_count("photosynthesizers", summary.photosynthesizers),
            MetricSample::from_count("meat_eaters", summary.meat_eaters),
            MetricSample::from_count("scavengers", summary.scavengers),
        ];

        let mut events = Vec::with_capacity(3);
        for (kind, count) in [
            (PersistenceEventKind::Births, summary.births),
            (PersistenceEventKind::Deaths, summary.deaths),
            (PersistenceEventKind::Kills, summary.kills),
        ] {
            if count > 0 {
                events.push(PersistenceEvent::new(kind, count));
            }
        }

        let batch = PersistenceBatch {
            summary: summary.clone(),
            metrics,
            events,
        };
        self.persistence.on_tick(&batch);
        true
    }

    fn push_history(&mut self, summary: TickSummary) {
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary);
    }

    /// Census of the current grid, labelled with the current tick.
    #[must_use]
    pub fn summary(&self) -> TickSummary {
        self.summary_at(self.tick)
    }

    fn summary_at(&self, tick: Tick) -> TickSummary {
        let mut summary = TickSummary {
            tick,
            alive: 0,
            corpses: 0,
            births: self.last_births,
            deaths: self.last_deaths,
            kills: self.last_kills,
            total_energy: 0.0,
            average_energy: 0.0,
            photosynthesizers: 0,
            meat_eaters: 0,
            scavengers: 0,
        };
        for cell in self.grid.cells() {
            if cell.is_corpse() {
                summary.corpses += 1;
                continue;
            }
            if !cell.is_alive() {
                continue;
            }
            summary.alive += 1;
            summary.total_energy += cell.energy;
            match cell.food_source() {
                FoodSource::Photosynthesis => summary.photosynthesizers += 1,
                FoodSource::Meat => summary.meat_eaters += 1,
                FoodSource::DeadCells => summary.scavengers += 1,
                FoodSource::Unknown => {}
            }
        }
        if summary.alive > 0 {
            summary.average_energy = summary.total_energy / summary.alive as f32;
        }
        summary
    }

    /// Wipe the grid and seed a fresh random population; the clock restarts at zero.
    pub fn reset(&mut self) {
        self.grid.clear();
        self.populate();
        self.tick = Tick::zero();
        self.history.clear();
        info!(alive = self.grid.count_alive(), "world reset");
    }

    /// Flush the persistence sink and hand back the final grid.
    pub fn teardown(mut self) -> Grid {
        self.persistence.flush();
        debug!(tick = self.tick.0, "world torn down");
        self.grid
    }

    /// Overwrite one slot, e.g. for interactive placement.
    pub fn set_cell(&mut self, x: u32, y: u32, cell: Cell) {
        self.grid.set(x, y, cell);
    }

    /// Place a freshly generated random cell at `(x, y)`.
    ///
    /// Returns `false` when the coordinate is outside the grid.
    pub fn place_random_cell(&mut self, x: u32, y: u32) -> bool {
        if self.grid.get(x, y).is_none() {
            return false;
        }
        let cell = Cell::random(x, y, &mut self.rng, &self.config);
        self.grid.set(x, y, cell);
        true
    }

    #[must_use]
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub fn config(&self) -> &GenocellsConfig {
        &self.config
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Flat slot indices in visitation order.
    #[must_use]
    pub fn update_order(&self) -> &[usize] {
        &self.update_order
    }

    #[must_use]
    pub fn count_alive(&self) -> usize {
        self.grid.count_alive()
    }

    #[must_use]
    pub fn count_corpses(&self) -> usize {
        self.grid.count_corpses()
    }

    /// Iterate over retained tick summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }
}
