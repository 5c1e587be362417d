//! Per-slot cell state.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::genome::Genome;
use crate::{COLOR_MAX, GenocellsConfig, random_inclusive};

/// Facing direction, cyclic in the order `Left -> Up -> Right -> Down -> Left`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Direction {
    #[default]
    Left = 0,
    Up,
    Right,
    Down,
}

impl Direction {
    pub const ALL: [Self; 4] = [Self::Left, Self::Up, Self::Right, Self::Down];

    #[must_use]
    pub const fn index(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }

    pub fn random(rng: &mut dyn RngCore) -> Self {
        Self::ALL[random_inclusive(rng, 0, 3) as usize]
    }

    /// One step forward in the cyclic order.
    #[must_use]
    pub const fn turned_right(self) -> Self {
        match self {
            Self::Left => Self::Up,
            Self::Up => Self::Right,
            Self::Right => Self::Down,
            Self::Down => Self::Left,
        }
    }

    /// One step back in the cyclic order.
    #[must_use]
    pub const fn turned_left(self) -> Self {
        match self {
            Self::Left => Self::Down,
            Self::Up => Self::Left,
            Self::Right => Self::Up,
            Self::Down => Self::Right,
        }
    }

    /// Grid offset `(dx, dy)`; `y` grows downwards.
    #[must_use]
    pub const fn offset(self) -> (i64, i64) {
        match self {
            Self::Left => (-1, 0),
            Self::Up => (0, -1),
            Self::Right => (1, 0),
            Self::Down => (0, 1),
        }
    }
}

/// Occupancy of a grid slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SlotState {
    #[default]
    Empty = 0,
    /// Corpse: inert biomass holding residual energy.
    Dead,
    Alive,
}

/// Dominant energy-acquisition strategy inferred from lifetime counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FoodSource {
    Photosynthesis,
    Meat,
    DeadCells,
    Unknown,
}

/// A grid slot together with everything an alive cell or corpse carries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Cell {
    pub state: SlotState,
    pub genome: Genome,
    pub pc: usize,
    pub facing: Direction,
    pub energy: f32,
    pub age: u32,
    pub x: u32,
    pub y: u32,
    pub color: [f32; 3],
    pub photosynthesis_count: u32,
    pub attack_count: u32,
    pub eating_dead_count: u32,
}

impl Cell {
    /// Vacant slot at `(x, y)`.
    #[must_use]
    pub fn empty(x: u32, y: u32) -> Self {
        Self {
            x,
            y,
            ..Self::default()
        }
    }

    /// Alive cell with a random genome, facing, and colour.
    pub fn random(x: u32, y: u32, rng: &mut dyn RngCore, config: &GenocellsConfig) -> Self {
        let genome = Genome::random(rng, config);
        let facing = Direction::random(rng);
        let mut color = [0.0; 3];
        for channel in &mut color {
            *channel = random_inclusive(rng, 0, COLOR_MAX as i32) as f32;
        }
        Self {
            state: SlotState::Alive,
            genome,
            pc: 0,
            facing,
            energy: config.start_energy,
            age: 0,
            x,
            y,
            color,
            photosynthesis_count: 0,
            attack_count: 0,
            eating_dead_count: 0,
        }
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.state == SlotState::Alive
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state == SlotState::Empty
    }

    #[must_use]
    pub fn is_corpse(&self) -> bool {
        self.state == SlotState::Dead
    }

    /// Turn this cell into a corpse keeping `fraction` of its non-negative energy.
    pub fn die(&mut self, fraction: f32) {
        self.state = SlotState::Dead;
        self.energy = self.energy.max(0.0) * fraction;
    }

    /// Category whose lifetime counter is greatest.
    ///
    /// Ties go to the earliest of `Photosynthesis`, `Meat`, `DeadCells`; a cell
    /// that has never fed reports `Unknown`.
    #[must_use]
    pub fn food_source(&self) -> FoodSource {
        let counters = [
            (FoodSource::Photosynthesis, self.photosynthesis_count),
            (FoodSource::Meat, self.attack_count),
            (FoodSource::DeadCells, self.eating_dead_count),
        ];
        let best = counters.iter().map(|(_, count)| *count).max().unwrap_or(0);
        if best == 0 {
            return FoodSource::Unknown;
        }
        counters
            .iter()
            .find(|(_, count)| *count == best)
            .map_or(FoodSource::Unknown, |(source, _)| *source)
    }
}
