//! Headless host loop shared by the `genocells` binary and its tests.

use anyhow::{Context, Result};
use genocells_core::{
    GenocellsConfig, NullPersistence, Tick, TickOrder, TickSummary, WorldPersistence, WorldState,
};
use genocells_render::{RenderOptions, save_png};
use genocells_storage::{Snapshot, Storage, StoragePipeline, save_to_file};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Placeholder replaced by the zero-padded tick in frame paths.
pub const TICK_PLACEHOLDER: &str = "{tick}";

/// Command-line overrides layered over the configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub seed: Option<u64>,
    pub genome_length: Option<usize>,
    pub mutation_percent: Option<u32>,
    pub initial_alive_probability: Option<f64>,
    pub tick_order: Option<TickOrder>,
    pub persistence_interval: Option<u32>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut GenocellsConfig) {
        if let Some(width) = self.width {
            config.grid_width = width;
        }
        if let Some(height) = self.height {
            config.grid_height = height;
        }
        if let Some(seed) = self.seed {
            config.rng_seed = Some(seed);
        }
        if let Some(length) = self.genome_length {
            config.genome_length = length;
        }
        if let Some(percent) = self.mutation_percent {
            config.mutation_percent = percent;
        }
        if let Some(probability) = self.initial_alive_probability {
            config.initial_alive_probability = probability;
        }
        if let Some(order) = self.tick_order {
            config.tick_order = order;
        }
        if let Some(interval) = self.persistence_interval {
            config.persistence_interval = interval;
        }
    }
}

/// Read an optional JSON configuration file, apply overrides, and validate.
pub fn load_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<GenocellsConfig> {
    let mut config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parse config {}", path.display()))?
        }
        None => GenocellsConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Open the tick-history database behind a writer thread, or a no-op sink.
pub fn open_persistence(
    db: Option<&Path>,
    config: &GenocellsConfig,
) -> Result<Box<dyn WorldPersistence>> {
    let Some(db) = db else {
        return Ok(Box::new(NullPersistence));
    };
    let path = db.to_string_lossy();
    let mut storage =
        Storage::open(&path).with_context(|| format!("open history database {path}"))?;
    storage
        .record_config(config)
        .context("record run configuration")?;
    let pipeline = StoragePipeline::from_storage(storage)?;
    info!(path = %path, interval = config.persistence_interval, "recording tick history");
    Ok(Box::new(pipeline))
}

/// Adopt the snapshot's grid dimensions, which win over the configuration.
fn fit_to_snapshot(config: &mut GenocellsConfig, snapshot: &Snapshot) {
    let (width, height) = (snapshot.grid.width(), snapshot.grid.height());
    if (config.grid_width, config.grid_height) != (width, height) {
        warn!(
            config_width = config.grid_width,
            config_height = config.grid_height,
            width,
            height,
            "snapshot dimensions override configuration"
        );
        config.grid_width = width;
        config.grid_height = height;
    }
}

/// Rebuild a world from a snapshot; the grid dimensions override the configuration.
pub fn restore(
    snapshot: Snapshot,
    mut config: GenocellsConfig,
    persistence: Box<dyn WorldPersistence>,
) -> Result<WorldState> {
    fit_to_snapshot(&mut config, &snapshot);
    WorldState::from_grid(config, snapshot.grid, snapshot.tick, persistence)
        .context("restore world from snapshot")
}

/// Restore a snapshot and attach tick history, recording the adjusted configuration.
pub fn resume(
    snapshot: Snapshot,
    mut config: GenocellsConfig,
    db: Option<&Path>,
) -> Result<WorldState> {
    fit_to_snapshot(&mut config, &snapshot);
    let persistence = open_persistence(db, &config)?;
    restore(snapshot, config, persistence)
}

/// Census of a snapshot without running it.
pub fn inspect(snapshot: Snapshot) -> Result<TickSummary> {
    let world = restore(
        snapshot,
        GenocellsConfig::default(),
        Box::new(NullPersistence),
    )?;
    Ok(world.summary())
}

/// Periodic PNG output.
#[derive(Debug, Clone)]
pub struct FrameOutput {
    /// Destination; `{tick}` is replaced by the tick number.
    pub path: PathBuf,
    /// Ticks between frames; 0 writes only the final frame.
    pub every: u64,
    pub options: RenderOptions,
}

/// Parameters of a headless run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop after this many ticks; `None` runs until interrupted.
    pub ticks: Option<u64>,
    /// Ticks between census log lines; 0 disables them.
    pub report_every: u64,
    /// Reseed the grid when every cell has died.
    pub reset_on_extinction: bool,
    /// Write a snapshot here when the run ends.
    pub snapshot: Option<PathBuf>,
    pub frame: Option<FrameOutput>,
}

/// Outcome of [`run`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunReport {
    pub ticks_run: u64,
    pub final_tick: u64,
    pub alive: usize,
    pub corpses: usize,
    pub resets: u32,
}

/// Expand the tick placeholder in a frame path.
#[must_use]
pub fn frame_path(template: &Path, tick: Tick) -> PathBuf {
    let raw = template.to_string_lossy();
    if raw.contains(TICK_PLACEHOLDER) {
        PathBuf::from(raw.replace(TICK_PLACEHOLDER, &format!("{:08}", tick.0)))
    } else {
        template.to_path_buf()
    }
}

fn write_frame(world: &WorldState, frame: &FrameOutput) -> Result<()> {
    let path = frame_path(&frame.path, world.tick());
    save_png(world.grid(), &frame.options, &path)
        .with_context(|| format!("render frame {}", path.display()))
}

/// Drive `world` according to `options`.
pub fn run(world: &mut WorldState, options: &RunOptions) -> Result<RunReport> {
    let mut ticks_run = 0u64;
    let mut resets = 0u32;
    let mut window_start = Instant::now();

    while options.ticks.is_none_or(|limit| ticks_run < limit) {
        let events = world.step();
        ticks_run += 1;

        if options.report_every > 0 && events.tick.0.is_multiple_of(options.report_every) {
            let elapsed = window_start.elapsed().as_secs_f64().max(f64::EPSILON);
            info!(
                tick = events.tick.0,
                alive = events.alive,
                corpses = world.count_corpses(),
                births = events.births,
                deaths = events.deaths,
                kills = events.kills,
                tps = options.report_every as f64 / elapsed,
                "census"
            );
            window_start = Instant::now();
        }

        if let Some(frame) = &options.frame
            && frame.every > 0
            && events.tick.0.is_multiple_of(frame.every)
        {
            write_frame(world, frame)?;
        }

        if events.alive == 0 && options.reset_on_extinction {
            warn!(tick = events.tick.0, "population extinct; reseeding");
            world.reset();
            resets += 1;
        }
    }

    if let Some(frame) = &options.frame
        && frame.every == 0
    {
        write_frame(world, frame)?;
    }
    if let Some(path) = &options.snapshot {
        save_to_file(world.grid(), world.tick(), path)
            .with_context(|| format!("save snapshot {}", path.display()))?;
    }

    Ok(RunReport {
        ticks_run,
        final_tick: world.tick().0,
        alive: world.count_alive(),
        corpses: world.count_corpses(),
        resets,
    })
}
