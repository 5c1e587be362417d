use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use genocells_app::{
    ConfigOverrides, FrameOutput, RunOptions, inspect, load_config, open_persistence, resume, run,
};
use genocells_core::{TickOrder, WorldState};
use genocells_render::{RenderMode, RenderOptions, save_png};
use genocells_storage::{Storage, load_from_file};
use tracing::info;

/// Persistence interval used when `--db` is given without one.
const DEFAULT_DB_INTERVAL: u32 = 10;

#[derive(Parser, Debug)]
#[command(
    name = "genocells",
    version,
    about = "Headless genome-driven cellular automaton"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Seed a fresh world and run it.
    Run {
        #[command(flatten)]
        world: WorldArgs,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Continue a world from a snapshot file.
    Resume {
        /// Snapshot written by `run --save`.
        snapshot: PathBuf,
        #[command(flatten)]
        world: WorldArgs,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Print the census of a snapshot as JSON.
    Inspect {
        snapshot: PathBuf,
    },
    /// Render a snapshot to a PNG.
    Render {
        snapshot: PathBuf,
        /// Output image path.
        #[arg(short, long)]
        out: PathBuf,
        #[arg(long, value_enum, default_value_t = ModeArg::Relatives)]
        mode: ModeArg,
        /// Pixels per grid slot.
        #[arg(long, default_value_t = 8)]
        cell_size: u32,
    },
    /// Print the recorded population history of a database.
    History {
        db: PathBuf,
        /// Number of most recent ticks to show.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Args, Debug)]
struct WorldArgs {
    /// JSON configuration file; omitted fields keep their defaults.
    #[arg(short, long, env = "GENOCELLS_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// RNG seed for reproducible runs.
    #[arg(long, env = "GENOCELLS_SEED")]
    seed: Option<u64>,
    #[arg(long)]
    genome_length: Option<usize>,
    /// Chance (0-100) that a child is mutated.
    #[arg(long)]
    mutation_percent: Option<u32>,
    /// Probability that a slot starts with a living cell.
    #[arg(long)]
    alive_probability: Option<f64>,
    #[arg(long, value_enum)]
    order: Option<OrderArg>,
    /// Ticks between database writes.
    #[arg(long)]
    persistence_interval: Option<u32>,
}

impl WorldArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            width: self.width,
            height: self.height,
            seed: self.seed,
            genome_length: self.genome_length,
            mutation_percent: self.mutation_percent,
            initial_alive_probability: self.alive_probability,
            tick_order: self.order.map(Into::into),
            persistence_interval: self.persistence_interval,
        }
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Stop after this many ticks; runs until interrupted when omitted.
    #[arg(long)]
    ticks: Option<u64>,
    /// Ticks between census lines (0 disables).
    #[arg(long, default_value_t = 10)]
    report_every: u64,
    /// Reseed the grid when the population dies out.
    #[arg(long)]
    reset_on_extinction: bool,
    /// DuckDB file receiving tick summaries.
    #[arg(long, env = "GENOCELLS_DB")]
    db: Option<PathBuf>,
    /// Snapshot written when the run ends.
    #[arg(long)]
    save: Option<PathBuf>,
    /// PNG output path; `{tick}` expands to the tick number.
    #[arg(long)]
    frame: Option<PathBuf>,
    /// Ticks between frames (0 writes only the final frame).
    #[arg(long, default_value_t = 0)]
    frame_every: u64,
    #[arg(long, value_enum, default_value_t = ModeArg::Relatives)]
    mode: ModeArg,
    #[arg(long, default_value_t = 8)]
    cell_size: u32,
}

impl RunArgs {
    fn options(&self, max_age: u32) -> RunOptions {
        RunOptions {
            ticks: self.ticks,
            report_every: self.report_every,
            reset_on_extinction: self.reset_on_extinction,
            snapshot: self.save.clone(),
            frame: self.frame.clone().map(|path| FrameOutput {
                path,
                every: self.frame_every,
                options: RenderOptions {
                    mode: self.mode.into(),
                    cell_size: self.cell_size,
                    max_age,
                },
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OrderArg {
    Raster,
    Shuffled,
}

impl From<OrderArg> for TickOrder {
    fn from(value: OrderArg) -> Self {
        match value {
            OrderArg::Raster => TickOrder::Raster,
            OrderArg::Shuffled => TickOrder::Shuffled,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Energy,
    Relatives,
    Age,
    EnergySource,
}

impl From<ModeArg> for RenderMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Energy => RenderMode::Energy,
            ModeArg::Relatives => RenderMode::Relatives,
            ModeArg::Age => RenderMode::Age,
            ModeArg::EnergySource => RenderMode::EnergySource,
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Run { world, run: args } => {
            let mut config = load_config(world.config.as_deref(), &world.overrides())?;
            if args.db.is_some() && config.persistence_interval == 0 {
                config.persistence_interval = DEFAULT_DB_INTERVAL;
            }
            let persistence = open_persistence(args.db.as_deref(), &config)?;
            let mut state = WorldState::with_persistence(config, persistence)?;
            info!(
                width = state.config().grid_width,
                height = state.config().grid_height,
                alive = state.count_alive(),
                "world seeded"
            );
            let options = args.options(state.config().cell_max_age);
            let report = run(&mut state, &options)?;
            state.teardown();
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Resume {
            snapshot,
            world,
            run: args,
        } => {
            let mut config = load_config(world.config.as_deref(), &world.overrides())?;
            if args.db.is_some() && config.persistence_interval == 0 {
                config.persistence_interval = DEFAULT_DB_INTERVAL;
            }
            let snapshot = load_from_file(&snapshot)?;
            let mut state = resume(snapshot, config, args.db.as_deref())?;
            let options = args.options(state.config().cell_max_age);
            let report = run(&mut state, &options)?;
            state.teardown();
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Inspect { snapshot } => {
            let summary = inspect(load_from_file(&snapshot)?)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Render {
            snapshot,
            out,
            mode,
            cell_size,
        } => {
            let snapshot = load_from_file(&snapshot)?;
            let options = RenderOptions {
                mode: mode.into(),
                cell_size,
                ..RenderOptions::default()
            };
            save_png(&snapshot.grid, &options, &out)?;
            info!(path = %out.display(), tick = snapshot.tick.0, "frame written");
        }
        Command::History { db, limit } => {
            let path = db.to_string_lossy();
            let mut storage =
                Storage::open(&path).with_context(|| format!("open history database {path}"))?;
            for sample in storage.population_history(limit)? {
                println!(
                    "tick {:>8}  alive {:>6}  corpses {:>6}  births {:>5}  deaths {:>5}  avg energy {:>7.2}",
                    sample.tick,
                    sample.alive,
                    sample.corpses,
                    sample.births,
                    sample.deaths,
                    sample.average_energy
                );
            }
        }
    }

    Ok(())
}
