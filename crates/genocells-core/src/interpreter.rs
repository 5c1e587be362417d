//! Single-cell instruction interpreter.
//!
//! [`step`] takes a copy of one alive cell, executes the instruction under its
//! program counter against the grid, and commits the updated cell back into the
//! grid at its (possibly new) coordinates. Every grid write goes through
//! [`Grid::set`].

use rand::RngCore;

use crate::cell::{Cell, Direction, FoodSource, SlotState};
use crate::genome::{Command, Instruction};
use crate::grid::Grid;
use crate::{CorpseStep, GenocellsConfig, clamp_channel, random_inclusive};

/// What happened during one interpreted step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// Command that was executed, `None` when the cell was not alive.
    pub command: Option<Command>,
    /// A child was placed on the facing slot.
    pub born: bool,
    /// The acting cell became a corpse.
    pub died: bool,
    /// The facing neighbour died from this attack.
    pub killed: bool,
}

/// Execute one instruction for `cell` and commit the result into `grid`.
pub fn step(
    grid: &mut Grid,
    mut cell: Cell,
    config: &GenocellsConfig,
    rng: &mut dyn RngCore,
) -> StepOutcome {
    let mut outcome = StepOutcome::default();
    if !cell.is_alive() {
        return outcome;
    }

    let origin = (cell.x, cell.y);
    let (fx, fy) = grid.neighbor(cell.x, cell.y, cell.facing);
    let self_facing = (fx, fy) == origin;
    let start_energy = cell.energy;
    let front_state = grid.get(fx, fy).map_or(SlotState::Empty, |front| front.state);

    let mut next_pc = cell.pc + 1;
    let mut consumed = config.noop_cost;

    if let Some(instr) = cell.genome.get(cell.pc).copied() {
        outcome.command = Some(instr.command);
        match instr.command {
            Command::TurnLeft => {
                cell.facing = cell.facing.turned_left();
                consumed += config.turn_cost;
            }
            Command::TurnRight => {
                cell.facing = cell.facing.turned_right();
                consumed += config.turn_cost;
            }
            Command::MoveForwards => {
                consumed += config.movement_cost;
                if !self_facing {
                    consumed -= move_forwards(grid, &mut cell, (fx, fy), config);
                }
            }
            Command::SwapPlaces => {
                consumed += config.swap_cost;
                if !self_facing && let Some(front) = grid.get(fx, fy).cloned() {
                    grid.set(origin.0, origin.1, front);
                    cell.x = fx;
                    cell.y = fy;
                }
            }
            Command::Photosynthesis => {
                let mut gain = config.photosynthesis_energy;
                if cell.attack_count > cell.photosynthesis_count {
                    gain *= 0.5;
                }
                consumed -= gain;
                cell.photosynthesis_count = cell.photosynthesis_count.saturating_add(1);
            }
            Command::GiveEnergy => {
                if !self_facing
                    && let Some(mut front) = grid.get(fx, fy).filter(|c| c.is_alive()).cloned()
                {
                    let amount = f32::from(instr.e).min(cell.energy.max(0.0));
                    front.energy += amount;
                    grid.set(fx, fy, front);
                    consumed += amount;
                }
            }
            Command::AttackCell => {
                if start_energy >= config.attack_required_energy {
                    consumed += config.attack_required_energy;
                    if !self_facing {
                        let (net, killed) = attack(grid, &cell, instr, (fx, fy), config);
                        consumed -= net;
                        outcome.killed = killed;
                    }
                    cell.attack_count = cell.attack_count.saturating_add(1);
                }
            }
            Command::RecycleDeadCell => {
                if !self_facing
                    && let Some(residual) = grid
                        .get(fx, fy)
                        .filter(|c| c.is_corpse())
                        .map(|c| c.energy.max(0.0))
                {
                    grid.set(fx, fy, Cell::empty(fx, fy));
                    consumed -= residual;
                    cell.eating_dead_count = cell.eating_dead_count.saturating_add(1);
                }
            }
            Command::JmpIfFacingAlive => {
                next_pc = instr.branch(front_state == SlotState::Alive);
            }
            Command::JmpIfFacingDead => {
                next_pc = instr.branch(front_state == SlotState::Dead);
            }
            Command::JmpIfFacingVoid => {
                next_pc = instr.branch(front_state == SlotState::Empty);
            }
            Command::JmpIfFacingRelative => {
                let related = grid
                    .get(fx, fy)
                    .filter(|other| other.is_alive())
                    .is_some_and(|other| {
                        cell.genome.similarity(&other.genome, config.similarity) * 100.0
                            >= f32::from(instr.e)
                    });
                next_pc = instr.branch(related);
            }
            Command::CheckEnergy => {
                next_pc = instr.branch(start_energy >= f32::from(instr.e));
            }
            Command::CheckRotation => {
                next_pc = usize::from(instr.branches()[usize::from(cell.facing.index())]);
            }
            Command::MakeChild => {
                if start_energy >= config.reproduction_required_energy
                    && !self_facing
                    && let Some(inherited) = spawn_slot_energy(grid, (fx, fy), config)
                {
                    let child = spawn_child(&mut cell, instr, inherited, (fx, fy), config, rng);
                    grid.set(fx, fy, child);
                    outcome.born = true;
                }
            }
        }
    }

    cell.pc = next_pc % cell.genome.len().max(1);
    cell.energy -= consumed;

    if cell.age > config.cell_max_age || cell.energy <= 0.0 {
        cell.die(config.corpse_energy_fraction);
        outcome.died = true;
    }
    cell.age = cell.age.saturating_add(1);

    grid.set(cell.x, cell.y, cell);
    outcome
}

/// Enter the facing slot if the policy allows; returns energy absorbed from a corpse.
fn move_forwards(
    grid: &mut Grid,
    cell: &mut Cell,
    (fx, fy): (u32, u32),
    config: &GenocellsConfig,
) -> f32 {
    let Some((state, residual)) = grid.get(fx, fy).map(|front| (front.state, front.energy)) else {
        return 0.0;
    };
    let absorbed = match state {
        SlotState::Empty => 0.0,
        SlotState::Dead if config.corpse_step == CorpseStep::Consume => {
            cell.eating_dead_count = cell.eating_dead_count.saturating_add(1);
            residual.max(0.0)
        }
        SlotState::Dead | SlotState::Alive => return 0.0,
    };
    grid.set(cell.x, cell.y, Cell::empty(cell.x, cell.y));
    cell.x = fx;
    cell.y = fy;
    absorbed
}

/// Damage the facing cell. Returns the attacker's net energy change and whether the victim died.
fn attack(
    grid: &mut Grid,
    attacker: &Cell,
    instr: Instruction,
    (fx, fy): (u32, u32),
    config: &GenocellsConfig,
) -> (f32, bool) {
    let Some(mut victim) = grid.get(fx, fy).filter(|c| c.is_alive()).cloned() else {
        return (0.0, false);
    };
    let meat_eater = attacker.food_source() == FoodSource::Meat;
    let mut taken = victim.energy.max(0.0) * config.attack_energy_rate;
    if !meat_eater {
        taken *= config.attack_non_meat_scale;
    }
    victim.energy -= taken * config.attack_damage_multiplier;

    let mut net = taken;
    let executed = instr.opt && meat_eater;
    if executed {
        net -= config.attack_kill_cost;
    }
    // a drained victim dies even without the kill flag
    let killed = executed || victim.energy <= 0.0;
    if killed {
        victim.die(config.corpse_energy_fraction);
    }
    grid.set(fx, fy, victim);
    (net, killed)
}

/// Residual energy a child would inherit at `(x, y)`, or `None` when the slot cannot host one.
fn spawn_slot_energy(grid: &Grid, (x, y): (u32, u32), config: &GenocellsConfig) -> Option<f32> {
    let target = grid.get(x, y)?;
    match target.state {
        SlotState::Empty => Some(0.0),
        SlotState::Dead if config.spawn_on_corpses => Some(target.energy.max(0.0)),
        SlotState::Dead | SlotState::Alive => None,
    }
}

/// Build a child from `parent`, moving the instruction's share of energy into it.
fn spawn_child(
    parent: &mut Cell,
    instr: Instruction,
    inherited: f32,
    (x, y): (u32, u32),
    config: &GenocellsConfig,
    rng: &mut dyn RngCore,
) -> Cell {
    let share = f32::from(instr.e.min(100)) / 100.0;
    let endowment = parent.energy * share;
    parent.energy -= endowment;

    let mut genome = parent.genome.clone();
    let mut color = parent.color;
    if random_inclusive(rng, 1, 100) <= config.mutation_percent as i32 {
        genome = genome.point_mutated(rng, config);
        let channel = random_inclusive(rng, 0, 2) as usize;
        let shift = random_inclusive(
            rng,
            -config.color_mutation_step,
            config.color_mutation_step,
        );
        color[channel] = clamp_channel(color[channel] + shift as f32);
    }

    Cell {
        state: SlotState::Alive,
        genome,
        pc: 0,
        facing: Direction::random(rng),
        energy: endowment + inherited,
        age: 1,
        x,
        y,
        color,
        photosynthesis_count: 0,
        attack_count: 0,
        eating_dead_count: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::Genome;
    use rand::{SeedableRng, rngs::SmallRng};

    const EPS: f32 = 1e-4;

    fn config() -> GenocellsConfig {
        GenocellsConfig {
            genome_length: 4,
            mutation_percent: 0,
            ..GenocellsConfig::default()
        }
    }

    fn op(command: Command) -> Instruction {
        Instruction {
            command,
            opt: false,
            e: 0,
            b1: 0,
            b2: 0,
            b3: 0,
            b4: 0,
        }
    }

    fn program(first: Instruction) -> Genome {
        Genome::from_instructions(vec![
            first,
            op(Command::Photosynthesis),
            op(Command::Photosynthesis),
            op(Command::Photosynthesis),
        ])
    }

    fn alive(x: u32, y: u32, facing: Direction, energy: f32, first: Instruction) -> Cell {
        Cell {
            state: SlotState::Alive,
            genome: program(first),
            facing,
            energy,
            color: [100.0, 120.0, 140.0],
            ..Cell::empty(x, y)
        }
    }

    fn corpse(x: u32, y: u32, energy: f32) -> Cell {
        Cell {
            state: SlotState::Dead,
            energy,
            ..Cell::empty(x, y)
        }
    }

    fn run(grid: &mut Grid, x: u32, y: u32) -> StepOutcome {
        let mut rng = SmallRng::seed_from_u64(99);
        let cell = grid.get(x, y).cloned().expect("cell");
        step(grid, cell, &config(), &mut rng)
    }

    fn run_with(grid: &mut Grid, x: u32, y: u32, config: &GenocellsConfig) -> StepOutcome {
        let mut rng = SmallRng::seed_from_u64(99);
        let cell = grid.get(x, y).cloned().expect("cell");
        step(grid, cell, config, &mut rng)
    }

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() < EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn at(grid: &Grid, x: u32, y: u32) -> &Cell {
        grid.get(x, y).expect("in bounds")
    }

    #[test]
    fn corpses_and_empty_slots_are_never_interpreted() {
        let mut grid = Grid::new(3, 3).expect("grid");
        grid.set(1, 1, corpse(1, 1, 4.0));
        let before = grid.clone();
        let outcome = run(&mut grid, 1, 1);
        assert_eq!(outcome, StepOutcome::default());
        let outcome = run(&mut grid, 0, 0);
        assert_eq!(outcome.command, None);
        assert_eq!(grid, before);
    }

    #[test]
    fn program_counter_wraps_and_age_advances() {
        let mut grid = Grid::new(3, 3).expect("grid");
        let mut cell = alive(1, 1, Direction::Up, 10.0, op(Command::TurnLeft));
        cell.pc = 3;
        grid.set(1, 1, cell);
        run(&mut grid, 1, 1);
        let cell = at(&grid, 1, 1);
        assert_eq!(cell.pc, 0);
        assert_eq!(cell.age, 1);
        assert_close(cell.energy, 10.0 - 0.2 + 5.0);
    }

    #[test]
    fn turning_rotates_and_costs_energy() {
        let mut grid = Grid::new(3, 3).expect("grid");
        grid.set(1, 1, alive(1, 1, Direction::Left, 10.0, op(Command::TurnLeft)));
        grid.set(0, 0, alive(0, 0, Direction::Down, 10.0, op(Command::TurnRight)));
        run(&mut grid, 1, 1);
        run(&mut grid, 0, 0);
        assert_eq!(at(&grid, 1, 1).facing, Direction::Down);
        assert_eq!(at(&grid, 0, 0).facing, Direction::Left);
        assert_close(at(&grid, 1, 1).energy, 10.0 - 0.2 - 0.5);
        assert_eq!(at(&grid, 1, 1).pc, 1);
    }

    #[test]
    fn moving_into_empty_slot_vacates_origin() {
        let mut grid = Grid::new(3, 3).expect("grid");
        grid.set(2, 1, alive(2, 1, Direction::Right, 10.0, op(Command::MoveForwards)));
        run(&mut grid, 2, 1);
        assert!(at(&grid, 2, 1).is_empty());
        let moved = at(&grid, 0, 1);
        assert!(moved.is_alive());
        assert_eq!((moved.x, moved.y), (0, 1));
        assert_close(moved.energy, 10.0 - 0.2 - 1.0);
    }

    #[test]
    fn moving_into_alive_cell_is_rejected_but_paid() {
        let mut grid = Grid::new(3, 3).expect("grid");
        grid.set(1, 1, alive(1, 1, Direction::Up, 10.0, op(Command::MoveForwards)));
        grid.set(1, 0, alive(1, 0, Direction::Up, 7.0, op(Command::TurnLeft)));
        run(&mut grid, 1, 1);
        assert!(at(&grid, 1, 1).is_alive());
        assert_close(at(&grid, 1, 1).energy, 8.8);
        assert_close(at(&grid, 1, 0).energy, 7.0);
    }

    #[test]
    fn moving_onto_corpse_follows_policy() {
        let mut grid = Grid::new(3, 3).expect("grid");
        grid.set(1, 1, alive(1, 1, Direction::Down, 10.0, op(Command::MoveForwards)));
        grid.set(1, 2, corpse(1, 2, 6.0));
        let mut blocked = grid.clone();

        run(&mut grid, 1, 1);
        assert!(at(&grid, 1, 1).is_empty());
        let eater = at(&grid, 1, 2);
        assert!(eater.is_alive());
        assert_eq!(eater.eating_dead_count, 1);
        assert_close(eater.energy, 10.0 - 1.2 + 6.0);

        let block = GenocellsConfig {
            corpse_step: CorpseStep::Block,
            ..config()
        };
        run_with(&mut blocked, 1, 1, &block);
        assert!(at(&blocked, 1, 1).is_alive());
        assert!(at(&blocked, 1, 2).is_corpse());
        assert_eq!(at(&blocked, 1, 1).eating_dead_count, 0);
    }

    #[test]
    fn swapping_exchanges_both_slots() {
        let mut grid = Grid::new(3, 3).expect("grid");
        grid.set(0, 0, alive(0, 0, Direction::Right, 10.0, op(Command::SwapPlaces)));
        grid.set(1, 0, alive(1, 0, Direction::Up, 3.0, op(Command::TurnLeft)));
        run(&mut grid, 0, 0);
        let swapped_in = at(&grid, 0, 0);
        assert_close(swapped_in.energy, 3.0);
        assert_eq!((swapped_in.x, swapped_in.y), (0, 0));
        let actor = at(&grid, 1, 0);
        assert_eq!(actor.facing, Direction::Right);
        assert_close(actor.energy, 10.0 - 0.2 - 2.0);
    }

    #[test]
    fn photosynthesis_is_halved_for_attackers() {
        let mut grid = Grid::new(3, 3).expect("grid");
        grid.set(0, 0, alive(0, 0, Direction::Up, 10.0, op(Command::Photosynthesis)));
        let mut hybrid = alive(2, 2, Direction::Up, 10.0, op(Command::Photosynthesis));
        hybrid.attack_count = 2;
        grid.set(2, 2, hybrid);
        run(&mut grid, 0, 0);
        run(&mut grid, 2, 2);
        assert_close(at(&grid, 0, 0).energy, 14.8);
        assert_eq!(at(&grid, 0, 0).photosynthesis_count, 1);
        assert_close(at(&grid, 2, 2).energy, 12.3);
    }

    #[test]
    fn giving_energy_transfers_to_alive_neighbour() {
        let mut grid = Grid::new(3, 3).expect("grid");
        let give = Instruction {
            e: 4,
            ..op(Command::GiveEnergy)
        };
        grid.set(0, 1, alive(0, 1, Direction::Right, 10.0, give));
        grid.set(1, 1, alive(1, 1, Direction::Up, 2.0, op(Command::TurnLeft)));
        run(&mut grid, 0, 1);
        assert_close(at(&grid, 0, 1).energy, 10.0 - 0.2 - 4.0);
        assert_close(at(&grid, 1, 1).energy, 6.0);

        let mut lonely = Grid::new(3, 3).expect("grid");
        lonely.set(0, 1, alive(0, 1, Direction::Right, 10.0, give));
        run(&mut lonely, 0, 1);
        assert_close(at(&lonely, 0, 1).energy, 9.8);
    }

    #[test]
    fn donations_are_capped_by_own_energy() {
        let mut grid = Grid::new(3, 3).expect("grid");
        let give = Instruction {
            e: 50,
            ..op(Command::GiveEnergy)
        };
        grid.set(0, 1, alive(0, 1, Direction::Right, 3.0, give));
        grid.set(1, 1, alive(1, 1, Direction::Up, 2.0, op(Command::TurnLeft)));
        let outcome = run(&mut grid, 0, 1);
        assert_close(at(&grid, 1, 1).energy, 5.0);
        // the donor pays everything it had plus the tax
        assert!(outcome.died);
        let donor = at(&grid, 0, 1);
        assert!(donor.is_corpse());
        assert_close(donor.energy, 0.0);
    }

    #[test]
    fn attack_requires_threshold_energy() {
        let mut grid = Grid::new(3, 3).expect("grid");
        grid.set(0, 0, alive(0, 0, Direction::Right, 0.5, op(Command::AttackCell)));
        grid.set(1, 0, alive(1, 0, Direction::Up, 40.0, op(Command::TurnLeft)));
        run(&mut grid, 0, 0);
        assert_close(at(&grid, 0, 0).energy, 0.3);
        assert_eq!(at(&grid, 0, 0).attack_count, 0);
        assert_close(at(&grid, 1, 0).energy, 40.0);
    }

    #[test]
    fn non_meat_attackers_take_half_and_destroy_extra() {
        let mut grid = Grid::new(3, 3).expect("grid");
        grid.set(0, 0, alive(0, 0, Direction::Right, 10.0, op(Command::AttackCell)));
        grid.set(1, 0, alive(1, 0, Direction::Up, 40.0, op(Command::TurnLeft)));
        let outcome = run(&mut grid, 0, 0);
        assert!(!outcome.killed);
        assert_close(at(&grid, 1, 0).energy, 25.0);
        assert!(at(&grid, 1, 0).is_alive());
        assert_close(at(&grid, 0, 0).energy, 10.0 - 0.2 - 1.0 + 10.0);
        assert_eq!(at(&grid, 0, 0).attack_count, 1);
    }

    #[test]
    fn drained_victims_become_corpses() {
        let config = GenocellsConfig {
            attack_energy_rate: 1.0,
            attack_non_meat_scale: 1.0,
            ..config()
        };
        assert!(config.validate().is_ok());
        let mut grid = Grid::new(3, 3).expect("grid");
        grid.set(0, 0, alive(0, 0, Direction::Right, 10.0, op(Command::AttackCell)));
        grid.set(1, 0, alive(1, 0, Direction::Up, 40.0, op(Command::TurnLeft)));
        let outcome = run_with(&mut grid, 0, 0, &config);
        assert!(outcome.killed);
        let victim = at(&grid, 1, 0);
        assert!(victim.is_corpse());
        assert_close(victim.energy, 0.0);
        // no kill surcharge without the kill flag
        assert_close(at(&grid, 0, 0).energy, 10.0 - 0.2 - 1.0 + 40.0);
    }

    #[test]
    fn meat_eaters_with_kill_flag_leave_a_corpse() {
        let mut grid = Grid::new(3, 3).expect("grid");
        let kill = Instruction {
            opt: true,
            ..op(Command::AttackCell)
        };
        let mut hunter = alive(0, 0, Direction::Right, 10.0, kill);
        hunter.attack_count = 5;
        grid.set(0, 0, hunter);
        grid.set(1, 0, alive(1, 0, Direction::Up, 40.0, op(Command::TurnLeft)));
        let outcome = run(&mut grid, 0, 0);
        assert!(outcome.killed);
        let victim = at(&grid, 1, 0);
        assert!(victim.is_corpse());
        assert_close(victim.energy, 8.0);
        assert_close(at(&grid, 0, 0).energy, 10.0 - 0.2 - 1.0 + 20.0 - 2.0);
        assert_eq!(at(&grid, 0, 0).attack_count, 6);
    }

    #[test]
    fn attacking_empty_space_still_pays_threshold() {
        let mut grid = Grid::new(3, 3).expect("grid");
        grid.set(0, 0, alive(0, 0, Direction::Down, 10.0, op(Command::AttackCell)));
        run(&mut grid, 0, 0);
        assert_close(at(&grid, 0, 0).energy, 8.8);
        assert_eq!(at(&grid, 0, 0).attack_count, 1);
    }

    #[test]
    fn recycling_clears_corpse_and_reclaims_energy() {
        let mut grid = Grid::new(3, 3).expect("grid");
        grid.set(1, 1, alive(1, 1, Direction::Left, 10.0, op(Command::RecycleDeadCell)));
        grid.set(0, 1, corpse(0, 1, 6.0));
        run(&mut grid, 1, 1);
        assert!(at(&grid, 0, 1).is_empty());
        assert_close(at(&grid, 1, 1).energy, 15.8);
        assert_eq!(at(&grid, 1, 1).eating_dead_count, 1);
    }

    #[test]
    fn facing_tests_branch_on_slot_state() {
        let branchy = |command| Instruction {
            b1: 2,
            b2: 3,
            ..op(command)
        };
        let mut grid = Grid::new(4, 4).expect("grid");
        grid.set(0, 0, alive(0, 0, Direction::Right, 10.0, branchy(Command::JmpIfFacingAlive)));
        grid.set(1, 0, alive(1, 0, Direction::Down, 10.0, branchy(Command::JmpIfFacingDead)));
        grid.set(1, 1, corpse(1, 1, 1.0));
        grid.set(3, 3, alive(3, 3, Direction::Up, 10.0, branchy(Command::JmpIfFacingVoid)));
        grid.set(2, 2, alive(2, 2, Direction::Left, 10.0, branchy(Command::JmpIfFacingVoid)));
        grid.set(1, 2, corpse(1, 2, 1.0));

        run(&mut grid, 0, 0);
        run(&mut grid, 1, 0);
        run(&mut grid, 3, 3);
        run(&mut grid, 2, 2);
        assert_eq!(at(&grid, 0, 0).pc, 2);
        assert_eq!(at(&grid, 1, 0).pc, 2);
        assert_eq!(at(&grid, 3, 3).pc, 2);
        assert_eq!(at(&grid, 2, 2).pc, 3);
        for (x, y) in [(0, 0), (1, 0), (3, 3), (2, 2)] {
            assert_close(at(&grid, x, y).energy, 9.8);
        }
    }

    #[test]
    fn relative_test_compares_genomes() {
        let relative = Instruction {
            e: 60,
            b1: 2,
            b2: 3,
            ..op(Command::JmpIfFacingRelative)
        };
        let mut grid = Grid::new(4, 4).expect("grid");
        grid.set(0, 0, alive(0, 0, Direction::Right, 10.0, relative));
        grid.set(1, 0, alive(1, 0, Direction::Up, 10.0, relative));
        grid.set(0, 3, alive(0, 3, Direction::Right, 10.0, relative));
        let stranger = Cell {
            genome: Genome::from_instructions(vec![op(Command::AttackCell); 4]),
            ..alive(1, 3, Direction::Up, 10.0, relative)
        };
        grid.set(1, 3, stranger);

        run(&mut grid, 0, 0);
        run(&mut grid, 0, 3);
        assert_eq!(at(&grid, 0, 0).pc, 2);
        assert_eq!(at(&grid, 0, 3).pc, 3);
    }

    #[test]
    fn energy_and_rotation_checks_select_targets() {
        let check = Instruction {
            e: 50,
            b1: 1,
            b2: 2,
            b3: 3,
            b4: 0,
            ..op(Command::CheckEnergy)
        };
        let rotation = Instruction {
            command: Command::CheckRotation,
            ..check
        };
        let mut grid = Grid::new(4, 4).expect("grid");
        grid.set(0, 0, alive(0, 0, Direction::Up, 60.0, check));
        grid.set(2, 0, alive(2, 0, Direction::Up, 40.0, check));
        grid.set(0, 2, alive(0, 2, Direction::Right, 10.0, rotation));
        grid.set(2, 2, alive(2, 2, Direction::Down, 10.0, rotation));
        run(&mut grid, 0, 0);
        run(&mut grid, 2, 0);
        run(&mut grid, 0, 2);
        run(&mut grid, 2, 2);
        assert_eq!(at(&grid, 0, 0).pc, 1);
        assert_eq!(at(&grid, 2, 0).pc, 2);
        assert_eq!(at(&grid, 0, 2).pc, 3);
        assert_eq!(at(&grid, 2, 2).pc, 0);
    }

    #[test]
    fn make_child_splits_energy_and_copies_genome() {
        let reproduce = Instruction {
            e: 25,
            ..op(Command::MakeChild)
        };
        let mut grid = Grid::new(3, 3).expect("grid");
        grid.set(1, 1, alive(1, 1, Direction::Right, 100.0, reproduce));
        let outcome = run(&mut grid, 1, 1);
        assert!(outcome.born);

        let parent = at(&grid, 1, 1).clone();
        let child = at(&grid, 2, 1);
        assert!(child.is_alive());
        assert_eq!(child.age, 1);
        assert_eq!(child.pc, 0);
        assert_eq!(child.genome, parent.genome);
        assert_eq!(child.color, parent.color);
        assert_eq!(child.attack_count, 0);
        assert_close(child.energy, 25.0);
        assert_close(parent.energy, 75.0 - 0.2);
    }

    #[test]
    fn make_child_absorbs_corpse_energy_when_allowed() {
        let reproduce = Instruction {
            e: 25,
            ..op(Command::MakeChild)
        };
        let mut grid = Grid::new(3, 3).expect("grid");
        grid.set(1, 1, alive(1, 1, Direction::Right, 100.0, reproduce));
        grid.set(2, 1, corpse(2, 1, 4.0));
        let mut strict = grid.clone();

        run(&mut grid, 1, 1);
        assert_close(at(&grid, 2, 1).energy, 29.0);

        let no_corpses = GenocellsConfig {
            spawn_on_corpses: false,
            ..config()
        };
        let outcome = run_with(&mut strict, 1, 1, &no_corpses);
        assert!(!outcome.born);
        assert!(at(&strict, 2, 1).is_corpse());
        assert_close(at(&strict, 1, 1).energy, 99.8);
    }

    #[test]
    fn make_child_preconditions() {
        let reproduce = Instruction {
            e: 25,
            ..op(Command::MakeChild)
        };
        let mut poor = Grid::new(3, 3).expect("grid");
        poor.set(1, 1, alive(1, 1, Direction::Right, 50.0, reproduce));
        assert!(!run(&mut poor, 1, 1).born);
        assert!(at(&poor, 2, 1).is_empty());

        let mut crowded = Grid::new(3, 3).expect("grid");
        crowded.set(1, 1, alive(1, 1, Direction::Right, 100.0, reproduce));
        crowded.set(2, 1, alive(2, 1, Direction::Up, 5.0, op(Command::TurnLeft)));
        assert!(!run(&mut crowded, 1, 1).born);
        assert_close(at(&crowded, 2, 1).energy, 5.0);
        assert_eq!(crowded.count_alive(), 2);
    }

    #[test]
    fn guaranteed_mutation_changes_at_most_one_gene_and_keeps_colour_in_range() {
        let reproduce = Instruction {
            e: 50,
            ..op(Command::MakeChild)
        };
        let always = GenocellsConfig {
            mutation_percent: 100,
            ..config()
        };
        let mut rng = SmallRng::seed_from_u64(4);
        for _ in 0..64 {
            let mut grid = Grid::new(3, 3).expect("grid");
            let mut parent = alive(1, 1, Direction::Right, 100.0, reproduce);
            parent.color = [0.0, 255.0, 8.0];
            grid.set(1, 1, parent.clone());
            step(&mut grid, parent.clone(), &always, &mut rng);
            let child = at(&grid, 2, 1);
            let differing = child
                .genome
                .instructions()
                .iter()
                .zip(parent.genome.instructions())
                .filter(|(a, b)| a != b)
                .count();
            assert!(differing <= 1);
            assert!(child.color.iter().all(|c| (0.0..=255.0).contains(c)));
        }
    }

    #[test]
    fn starvation_and_old_age_leave_corpses() {
        let mut grid = Grid::new(3, 3).expect("grid");
        grid.set(0, 0, alive(0, 0, Direction::Up, 0.1, op(Command::TurnLeft)));
        let outcome = run(&mut grid, 0, 0);
        assert!(outcome.died);
        assert!(at(&grid, 0, 0).is_corpse());
        assert_eq!(at(&grid, 0, 0).energy, 0.0);

        let short_lived = GenocellsConfig {
            cell_max_age: 5,
            ..config()
        };
        let mut elder = alive(2, 2, Direction::Up, 10.0, op(Command::Photosynthesis));
        elder.age = 6;
        grid.set(2, 2, elder);
        assert!(run_with(&mut grid, 2, 2, &short_lived).died);
        let corpse = at(&grid, 2, 2);
        assert!(corpse.is_corpse());
        assert_close(corpse.energy, (10.0 - 0.2 + 5.0) * 0.8);
        assert_eq!(corpse.age, 7);
    }

    #[test]
    fn single_slot_world_survives_self_facing_actions() {
        for command in [
            Command::AttackCell,
            Command::MoveForwards,
            Command::SwapPlaces,
            Command::GiveEnergy,
            Command::MakeChild,
            Command::RecycleDeadCell,
        ] {
            let mut grid = Grid::new(1, 1).expect("grid");
            let instr = Instruction {
                opt: true,
                e: 50,
                ..op(command)
            };
            let mut cell = alive(0, 0, Direction::Left, 100.0, instr);
            cell.attack_count = 3;
            grid.set(0, 0, cell);
            let outcome = run(&mut grid, 0, 0);
            assert!(!outcome.born && !outcome.killed, "{command} acted on itself");
            assert_eq!(grid.count_alive(), 1, "{command}");
            let only = at(&grid, 0, 0);
            assert_eq!((only.x, only.y), (0, 0));
            assert_eq!(only.pc, 1);
            assert!(only.energy < 100.0);
        }
    }
}
