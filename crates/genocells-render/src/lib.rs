//! Offscreen rendering of a genocells grid.
//!
//! Each slot becomes a `cell_size` square. Empty slots are black, corpses a
//! flat grey, and alive cells are coloured according to the [`RenderMode`].

use anyhow::{Context, Result, bail};
use genocells_core::{Cell, FoodSource, Grid};
use image::{ImageBuffer, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

const CORPSE_GREY: u8 = 70;
const ENERGY_BASE: f32 = 30.0;
const AGE_BASE: f32 = 50.0;

/// Palette applied to alive cells.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum RenderMode {
    /// Yellow brightness grows with stored energy.
    Energy,
    /// Inherited lineage colour.
    #[default]
    Relatives,
    /// Blue brightness grows with age.
    Age,
    /// Red for meat eaters, green for photosynthesizers, cyan for scavengers.
    EnergySource,
}

impl RenderMode {
    pub const ALL: [Self; 4] = [Self::Energy, Self::Relatives, Self::Age, Self::EnergySource];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Energy => "energy",
            Self::Relatives => "relatives",
            Self::Age => "age",
            Self::EnergySource => "energy-source",
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RenderMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match Self::ALL.iter().find(|mode| mode.label() == normalized) {
            Some(mode) => Ok(*mode),
            None => bail!("unknown render mode `{s}` (expected energy, relatives, age, energy-source)"),
        }
    }
}

/// Frame geometry and palette parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    pub mode: RenderMode,
    /// Edge length of one slot in pixels.
    pub cell_size: u32,
    /// Age mapped to full brightness in [`RenderMode::Age`].
    pub max_age: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            mode: RenderMode::default(),
            cell_size: 8,
            max_age: 1_200,
        }
    }
}

fn channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Colour of one slot.
#[must_use]
pub fn cell_rgb(cell: &Cell, mode: RenderMode, max_age: u32) -> [u8; 3] {
    if cell.is_empty() {
        return [0, 0, 0];
    }
    if cell.is_corpse() {
        return [CORPSE_GREY; 3];
    }
    match mode {
        RenderMode::Relatives => cell.color.map(channel),
        RenderMode::Energy => {
            let level = channel(ENERGY_BASE + cell.energy);
            [level, level, 0]
        }
        RenderMode::Age => {
            let ratio = cell.age as f32 / max_age.max(1) as f32;
            [0, 0, channel(AGE_BASE + 255.0 * ratio)]
        }
        RenderMode::EnergySource => match cell.food_source() {
            FoodSource::Meat => [255, 0, 0],
            FoodSource::Photosynthesis => [0, 255, 0],
            FoodSource::DeadCells => [0, 255, 255],
            FoodSource::Unknown => [255, 255, 255],
        },
    }
}

/// Rasterize `grid` into an RGB frame.
pub fn render_frame(grid: &Grid, options: &RenderOptions) -> Result<RgbImage> {
    let size = options.cell_size.max(1);
    let width = grid
        .width()
        .checked_mul(size)
        .context("frame width overflows u32")?;
    let height = grid
        .height()
        .checked_mul(size)
        .context("frame height overflows u32")?;

    let mut image: RgbImage = ImageBuffer::new(width, height);
    for (index, cell) in grid.cells().iter().enumerate() {
        if cell.is_empty() {
            continue;
        }
        let (x, y) = grid.coords(index);
        let px = Rgb(cell_rgb(cell, options.mode, options.max_age));
        for dy in 0..size {
            for dx in 0..size {
                image.put_pixel(x * size + dx, y * size + dy, px);
            }
        }
    }
    Ok(image)
}

/// Render `grid` and encode it as PNG bytes.
pub fn render_png_offscreen(grid: &Grid, options: &RenderOptions) -> Result<Vec<u8>> {
    let image = render_frame(grid, options)?;
    let mut bytes = Vec::new();
    {
        let mut cursor = Cursor::new(&mut bytes);
        image
            .write_to(&mut cursor, image::ImageFormat::Png)
            .context("encode png")?;
    }
    debug!(
        mode = %options.mode,
        width = image.width(),
        height = image.height(),
        bytes = bytes.len(),
        "rendered frame"
    );
    Ok(bytes)
}

/// Render `grid` to a PNG file at `path`.
pub fn save_png(grid: &Grid, options: &RenderOptions, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let bytes = render_png_offscreen(grid, options)?;
    std::fs::write(path, bytes).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
