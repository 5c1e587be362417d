//! Toroidal grid of cell slots.

use serde::{Deserialize, Serialize};

use crate::WorldStateError;
use crate::cell::{Cell, Direction};

/// Wrap a possibly out-of-range coordinate onto an axis of `extent` slots.
#[must_use]
pub fn wrap(coord: i64, extent: u32) -> u32 {
    if extent == 0 {
        return 0;
    }
    coord.rem_euclid(i64::from(extent)) as u32
}

/// Row-major `width * height` array of cell slots with wraparound edges.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Grid {
    width: u32,
    height: u32,
    cells: Vec<Cell>,
}

impl Grid {
    /// Construct a grid of empty slots.
    pub fn new(width: u32, height: u32) -> Result<Self, WorldStateError> {
        if width == 0 || height == 0 {
            return Err(WorldStateError::InvalidConfig(
                "grid dimensions must be non-zero",
            ));
        }
        let count = (width as usize)
            .checked_mul(height as usize)
            .ok_or(WorldStateError::Allocation { cells: usize::MAX })?;
        let mut cells = Vec::new();
        cells
            .try_reserve_exact(count)
            .map_err(|_| WorldStateError::Allocation { cells: count })?;
        for idx in 0..count {
            let x = (idx % width as usize) as u32;
            let y = (idx / width as usize) as u32;
            cells.push(Cell::empty(x, y));
        }
        Ok(Self {
            width,
            height,
            cells,
        })
    }

    /// Rebuild a grid from row-major slots, restamping coordinates.
    pub fn from_cells(width: u32, height: u32, cells: Vec<Cell>) -> Result<Self, WorldStateError> {
        if width == 0 || height == 0 {
            return Err(WorldStateError::InvalidConfig(
                "grid dimensions must be non-zero",
            ));
        }
        if cells.len() != (width as usize) * (height as usize) {
            return Err(WorldStateError::InvalidConfig(
                "cell count does not match grid dimensions",
            ));
        }
        let mut grid = Self {
            width,
            height,
            cells,
        };
        for idx in 0..grid.cells.len() {
            let (x, y) = grid.coords(idx);
            grid.cells[idx].x = x;
            grid.cells[idx].y = y;
        }
        Ok(grid)
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[must_use]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Returns the flat index for `(x, y)` without bounds checks.
    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }

    /// Coordinates of the slot at flat `index`.
    #[must_use]
    pub fn coords(&self, index: usize) -> (u32, u32) {
        let width = self.width as usize;
        ((index % width) as u32, (index / width) as u32)
    }

    /// Immutable access to a slot; `None` when out of bounds.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<&Cell> {
        if x < self.width && y < self.height {
            Some(&self.cells[self.offset(x, y)])
        } else {
            None
        }
    }

    /// Overwrite a slot. Out-of-bounds writes are ignored.
    ///
    /// The stored cell's coordinates are stamped with `(x, y)`.
    pub fn set(&mut self, x: u32, y: u32, mut cell: Cell) {
        if x >= self.width || y >= self.height {
            return;
        }
        cell.x = x;
        cell.y = y;
        let idx = self.offset(x, y);
        self.cells[idx] = cell;
    }

    /// Slot adjacent to `(x, y)` in `direction`, wrapped on both axes.
    #[must_use]
    pub fn neighbor(&self, x: u32, y: u32, direction: Direction) -> (u32, u32) {
        let (dx, dy) = direction.offset();
        (
            wrap(i64::from(x) + dx, self.width),
            wrap(i64::from(y) + dy, self.height),
        )
    }

    /// Number of alive cells (full scan).
    #[must_use]
    pub fn count_alive(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_alive()).count()
    }

    /// Number of corpses (full scan).
    #[must_use]
    pub fn count_corpses(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_corpse()).count()
    }

    /// Iterate over alive cells in row-major order.
    pub fn alive_cells(&self) -> impl Iterator<Item = &Cell> + '_ {
        self.cells.iter().filter(|cell| cell.is_alive())
    }

    /// Vacate every slot.
    pub fn clear(&mut self) {
        for idx in 0..self.cells.len() {
            let (x, y) = self.coords(idx);
            self.cells[idx] = Cell::empty(x, y);
        }
    }
}
