//! Instruction set and fixed-length genomes.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::{GenocellsConfig, SimilarityMode, random_inclusive};

/// Longest genome addressable by the one-byte branch operands.
pub const MAX_GENOME_LENGTH: usize = 256;

const OPERAND_JITTER: i32 = 3;
const BRANCH_JITTER: i32 = 2;

/// Commands understood by the interpreter, in generation order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    TurnLeft = 0,
    TurnRight,
    MoveForwards,
    SwapPlaces,
    Photosynthesis,
    GiveEnergy,
    AttackCell,
    RecycleDeadCell,
    JmpIfFacingAlive,
    JmpIfFacingDead,
    JmpIfFacingVoid,
    JmpIfFacingRelative,
    CheckEnergy,
    CheckRotation,
    MakeChild,
}

impl Command {
    /// Every command ordered by discriminant.
    pub const ALL: [Self; 15] = [
        Self::TurnLeft,
        Self::TurnRight,
        Self::MoveForwards,
        Self::SwapPlaces,
        Self::Photosynthesis,
        Self::GiveEnergy,
        Self::AttackCell,
        Self::RecycleDeadCell,
        Self::JmpIfFacingAlive,
        Self::JmpIfFacingDead,
        Self::JmpIfFacingVoid,
        Self::JmpIfFacingRelative,
        Self::CheckEnergy,
        Self::CheckRotation,
        Self::MakeChild,
    ];

    #[must_use]
    pub const fn index(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }

    /// Uniform draw over `[TurnLeft, MakeChild]`.
    pub fn random(rng: &mut dyn RngCore) -> Self {
        let index = random_inclusive(rng, 0, i32::from(Self::MakeChild.index()));
        Self::ALL[index as usize]
    }

    /// Short assembler-style name.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::TurnLeft => "turn_left",
            Self::TurnRight => "turn_right",
            Self::MoveForwards => "move",
            Self::SwapPlaces => "swap",
            Self::Photosynthesis => "photosynthesis",
            Self::GiveEnergy => "give",
            Self::AttackCell => "attack",
            Self::RecycleDeadCell => "recycle",
            Self::JmpIfFacingAlive => "jmp_alive",
            Self::JmpIfFacingDead => "jmp_dead",
            Self::JmpIfFacingVoid => "jmp_void",
            Self::JmpIfFacingRelative => "jmp_relative",
            Self::CheckEnergy => "check_energy",
            Self::CheckRotation => "check_rotation",
            Self::MakeChild => "make_child",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// One genome entry: a command plus generic operands whose meaning depends on the command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub command: Command,
    pub opt: bool,
    pub e: u8,
    pub b1: u8,
    pub b2: u8,
    pub b3: u8,
    pub b4: u8,
}

impl Instruction {
    /// Draw every field from its own bounded-uniform distribution.
    pub fn random(rng: &mut dyn RngCore, config: &GenocellsConfig) -> Self {
        let last = branch_limit(config.genome_length);
        Self {
            command: Command::random(rng),
            opt: rng.random_bool(0.5),
            e: random_inclusive(rng, 0, i32::from(config.operand_max)) as u8,
            b1: random_inclusive(rng, 0, last) as u8,
            b2: random_inclusive(rng, 0, last) as u8,
            b3: random_inclusive(rng, 0, last) as u8,
            b4: random_inclusive(rng, 0, last) as u8,
        }
    }

    /// Branch targets `[b1, b2, b3, b4]`.
    #[must_use]
    pub const fn branches(&self) -> [u8; 4] {
        [self.b1, self.b2, self.b3, self.b4]
    }

    /// Two-way branch: `b1` when the test holds, `b2` otherwise.
    #[must_use]
    pub fn branch(&self, taken: bool) -> usize {
        usize::from(if taken { self.b1 } else { self.b2 })
    }

    /// Nudge the numeric operands by a few steps, keeping them in range.
    fn perturb(&mut self, rng: &mut dyn RngCore, config: &GenocellsConfig) {
        let last = branch_limit(config.genome_length);
        self.e = jitter(rng, self.e, OPERAND_JITTER, i32::from(config.operand_max));
        self.b1 = jitter(rng, self.b1, BRANCH_JITTER, last);
        self.b2 = jitter(rng, self.b2, BRANCH_JITTER, last);
        self.b3 = jitter(rng, self.b3, BRANCH_JITTER, last);
        self.b4 = jitter(rng, self.b4, BRANCH_JITTER, last);
        if rng.random_bool(0.5) {
            self.opt = !self.opt;
        }
    }

    fn matches(&self, other: &Self, mode: SimilarityMode) -> bool {
        match mode {
            SimilarityMode::Exact => self == other,
            SimilarityMode::CommandOnly => self.command == other.command,
        }
    }
}

fn jitter(rng: &mut dyn RngCore, value: u8, spread: i32, max: i32) -> u8 {
    (i32::from(value) + random_inclusive(rng, -spread, spread)).clamp(0, max) as u8
}

fn branch_limit(genome_length: usize) -> i32 {
    genome_length.clamp(1, MAX_GENOME_LENGTH) as i32 - 1
}

/// Immutable instruction sequence addressed by the program counter.
///
/// Instructions live behind an `Arc` so copying a cell out of the grid for a
/// step does not duplicate its program.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Genome {
    instructions: Arc<[Instruction]>,
}

impl Default for Genome {
    fn default() -> Self {
        Self::from_instructions(Vec::new())
    }
}

impl Genome {
    #[must_use]
    pub fn from_instructions(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions: Arc::from(instructions),
        }
    }

    /// Generate `config.genome_length` random instructions.
    pub fn random(rng: &mut dyn RngCore, config: &GenocellsConfig) -> Self {
        let instructions = (0..config.genome_length)
            .map(|_| Instruction::random(rng, config))
            .collect();
        Self::from_instructions(instructions)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Fraction of index-wise matching instructions, relative to this genome's length.
    #[must_use]
    pub fn similarity(&self, other: &Self, mode: SimilarityMode) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let matching = self
            .instructions
            .iter()
            .zip(other.instructions.iter())
            .filter(|(ours, theirs)| ours.matches(theirs, mode))
            .count();
        matching as f32 / self.len() as f32
    }

    /// Copy with one point mutation: a random instruction is either regenerated
    /// or has its operands perturbed, chosen by a fair coin.
    pub fn point_mutated(&self, rng: &mut dyn RngCore, config: &GenocellsConfig) -> Self {
        if self.is_empty() {
            return self.clone();
        }
        let mut instructions = self.instructions.to_vec();
        let index = rng.random_range(0..instructions.len());
        if rng.random_bool(0.5) {
            instructions[index] = Instruction::random(rng, config);
        } else {
            instructions[index].perturb(rng, config);
        }
        Self::from_instructions(instructions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::SmallRng};

    fn small_config() -> GenocellsConfig {
        GenocellsConfig {
            genome_length: 16,
            ..GenocellsConfig::default()
        }
    }

    fn instruction(command: Command) -> Instruction {
        Instruction {
            command,
            opt: false,
            e: 10,
            b1: 1,
            b2: 2,
            b3: 3,
            b4: 4,
        }
    }

    #[test]
    fn command_indices_roundtrip() {
        for (idx, command) in Command::ALL.iter().enumerate() {
            assert_eq!(command.index() as usize, idx);
            assert_eq!(Command::from_index(idx as u8), Some(*command));
        }
        assert_eq!(Command::from_index(15), None);
        assert_eq!(Command::MakeChild.index(), 14);
    }

    #[test]
    fn random_instructions_respect_operand_bounds() {
        let config = small_config();
        let mut rng = SmallRng::seed_from_u64(1);
        let mut seen = [false; Command::ALL.len()];
        for _ in 0..5_000 {
            let instr = Instruction::random(&mut rng, &config);
            seen[instr.command.index() as usize] = true;
            assert!(instr.e <= config.operand_max);
            for branch in instr.branches() {
                assert!((branch as usize) < config.genome_length);
            }
        }
        assert!(seen.iter().all(|hit| *hit), "every command should be drawn");
    }

    #[test]
    fn similarity_counts_matches() {
        let a = Genome::from_instructions(vec![
            instruction(Command::TurnLeft),
            instruction(Command::MoveForwards),
            instruction(Command::Photosynthesis),
            instruction(Command::MakeChild),
        ]);
        let mut changed = a.instructions().to_vec();
        changed[1].e = 99;
        changed[3] = instruction(Command::AttackCell);
        let b = Genome::from_instructions(changed);

        assert_eq!(a.similarity(&a, SimilarityMode::Exact), 1.0);
        assert_eq!(a.similarity(&b, SimilarityMode::Exact), 0.5);
        assert_eq!(a.similarity(&b, SimilarityMode::CommandOnly), 0.75);
        assert_eq!(a.similarity(&Genome::default(), SimilarityMode::Exact), 0.0);
        assert_eq!(Genome::default().similarity(&a, SimilarityMode::Exact), 0.0);
    }

    #[test]
    fn point_mutation_touches_one_instruction() {
        let config = small_config();
        let mut rng = SmallRng::seed_from_u64(77);
        let parent = Genome::random(&mut rng, &config);
        for _ in 0..200 {
            let child = parent.point_mutated(&mut rng, &config);
            assert_eq!(child.len(), parent.len());
            let differing = parent
                .instructions()
                .iter()
                .zip(child.instructions())
                .filter(|(a, b)| a != b)
                .count();
            assert!(differing <= 1);
            for instr in child.instructions() {
                assert!(instr.e <= config.operand_max);
                assert!(instr.branches().iter().all(|b| (*b as usize) < 16));
            }
        }
    }

    #[test]
    fn perturb_clamps_at_edges() {
        let config = small_config();
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..500 {
            let mut instr = Instruction {
                command: Command::CheckEnergy,
                opt: true,
                e: config.operand_max,
                b1: 0,
                b2: 15,
                b3: 0,
                b4: 15,
            };
            instr.perturb(&mut rng, &config);
            assert!(instr.e <= config.operand_max && instr.e >= config.operand_max - 3);
            assert!(instr.b1 <= 2);
            assert!((13..=15).contains(&instr.b2));
            assert_eq!(instr.command, Command::CheckEnergy);
        }
    }
}
