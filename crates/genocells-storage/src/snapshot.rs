//! Versioned binary snapshot of a grid.
//!
//! ```text
//! HEADER (40 bytes, little-endian)
//! ├── Magic:       "GCEL" (4 bytes)
//! ├── Version:     u16
//! ├── Flags:       u16 (reserved, zero)
//! ├── Width:       u32
//! ├── Height:      u32
//! ├── Tick:        u64
//! ├── RecordCount: u32 (width * height)
//! ├── PayloadLen:  u32
//! └── Checksum:    u64 (over the payload)
//!
//! PAYLOAD (row-major, one record per slot)
//! ├── State:       u8 (0 empty, 1 dead, 2 alive)
//! ├── Facing:      u8 (0 left, 1 up, 2 right, 3 down)
//! ├── Pc:          u16
//! ├── Energy:      f32
//! ├── Age:         u32
//! ├── Color:       [f32; 3]
//! ├── Counters:    [u32; 3] (photosynthesis, attack, eating dead)
//! ├── GenomeLen:   u16
//! └── Genome:      GenomeLen * 7 bytes (command, opt, e, b1, b2, b3, b4)
//! ```

use genocells_core::{
    Cell, Command, Direction, Genome, Grid, Instruction, MAX_GENOME_LENGTH, SlotState, Tick,
};
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Leading bytes of every snapshot.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"GCEL";
/// Current format version.
pub const SNAPSHOT_VERSION: u16 = 1;
/// Header size in bytes.
pub const HEADER_SIZE: usize = 40;

const INSTRUCTION_SIZE: usize = 7;
/// Fixed part of a cell record, before its instructions.
const RECORD_PREFIX_SIZE: usize = 38;

/// Errors raised while reading or writing snapshots.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid magic: expected GCEL, got {found:?}")]
    BadMagic { found: [u8; 4] },
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u16),
    #[error("snapshot truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("checksum mismatch: expected {expected:016x}, got {actual:016x}")]
    ChecksumMismatch { expected: u64, actual: u64 },
    #[error("invalid {field} in record {index}")]
    InvalidField { field: &'static str, index: usize },
    #[error("{extra} unexpected bytes after the last record")]
    TrailingBytes { extra: usize },
    #[error("{records} records do not fill a {width}x{height} grid")]
    DimensionMismatch {
        width: u32,
        height: u32,
        records: usize,
    },
}

/// Grid plus the tick it was captured at.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub tick: Tick,
    pub grid: Grid,
}

#[derive(Debug, Clone, Copy)]
struct Header {
    version: u16,
    width: u32,
    height: u32,
    tick: u64,
    record_count: u32,
    payload_len: u32,
    checksum: u64,
}

impl Header {
    fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&SNAPSHOT_MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        // flags stay zero
        buf[8..12].copy_from_slice(&self.width.to_le_bytes());
        buf[12..16].copy_from_slice(&self.height.to_le_bytes());
        buf[16..24].copy_from_slice(&self.tick.to_le_bytes());
        buf[24..28].copy_from_slice(&self.record_count.to_le_bytes());
        buf[28..32].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[32..40].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    fn from_bytes(data: &[u8]) -> Result<Self, SnapshotError> {
        let mut reader = Reader::new(data);
        let magic = reader.array::<4>()?;
        if magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::BadMagic { found: magic });
        }
        let version = reader.u16()?;
        if version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }
        let _flags = reader.u16()?;
        Ok(Self {
            version,
            width: reader.u32()?,
            height: reader.u32()?,
            tick: reader.u64()?,
            record_count: reader.u32()?,
            payload_len: reader.u32()?,
            checksum: reader.u64()?,
        })
    }
}

/// Bounds-checked little-endian cursor.
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], SnapshotError> {
        let end = self.offset + len;
        let slice = self.data.get(self.offset..end).ok_or(SnapshotError::Truncated {
            needed: end,
            available: self.data.len(),
        })?;
        self.offset = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], SnapshotError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, SnapshotError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, SnapshotError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, SnapshotError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32, SnapshotError> {
        Ok(f32::from_le_bytes(self.array()?))
    }
}

fn state_code(state: SlotState) -> u8 {
    match state {
        SlotState::Empty => 0,
        SlotState::Dead => 1,
        SlotState::Alive => 2,
    }
}

fn state_from_code(code: u8) -> Option<SlotState> {
    match code {
        0 => Some(SlotState::Empty),
        1 => Some(SlotState::Dead),
        2 => Some(SlotState::Alive),
        _ => None,
    }
}

fn encode_cell(cell: &Cell, buf: &mut Vec<u8>) {
    buf.push(state_code(cell.state));
    buf.push(cell.facing.index());
    buf.extend_from_slice(&(cell.pc as u16).to_le_bytes());
    buf.extend_from_slice(&cell.energy.to_le_bytes());
    buf.extend_from_slice(&cell.age.to_le_bytes());
    for channel in cell.color {
        buf.extend_from_slice(&channel.to_le_bytes());
    }
    for counter in [
        cell.photosynthesis_count,
        cell.attack_count,
        cell.eating_dead_count,
    ] {
        buf.extend_from_slice(&counter.to_le_bytes());
    }
    let genome = cell.genome.instructions();
    buf.extend_from_slice(&(genome.len() as u16).to_le_bytes());
    for instr in genome {
        buf.extend_from_slice(&[
            instr.command.index(),
            u8::from(instr.opt),
            instr.e,
            instr.b1,
            instr.b2,
            instr.b3,
            instr.b4,
        ]);
    }
}

fn decode_cell(reader: &mut Reader<'_>, index: usize) -> Result<Cell, SnapshotError> {
    let invalid = |field| SnapshotError::InvalidField { field, index };
    let state = state_from_code(reader.u8()?).ok_or_else(|| invalid("state"))?;
    let facing = Direction::from_index(reader.u8()?).ok_or_else(|| invalid("facing"))?;
    let pc = usize::from(reader.u16()?);
    let energy = reader.f32()?;
    let age = reader.u32()?;
    let color = [reader.f32()?, reader.f32()?, reader.f32()?];
    let photosynthesis_count = reader.u32()?;
    let attack_count = reader.u32()?;
    let eating_dead_count = reader.u32()?;

    let genome_len = usize::from(reader.u16()?);
    if genome_len > MAX_GENOME_LENGTH {
        return Err(invalid("genome length"));
    }
    if pc > 0 && pc >= genome_len {
        return Err(invalid("program counter"));
    }
    let mut instructions = Vec::with_capacity(genome_len);
    for _ in 0..genome_len {
        let raw = reader.array::<INSTRUCTION_SIZE>()?;
        let command = Command::from_index(raw[0]).ok_or_else(|| invalid("command"))?;
        let opt = match raw[1] {
            0 => false,
            1 => true,
            _ => return Err(invalid("opt flag")),
        };
        instructions.push(Instruction {
            command,
            opt,
            e: raw[2],
            b1: raw[3],
            b2: raw[4],
            b3: raw[5],
            b4: raw[6],
        });
    }

    Ok(Cell {
        state,
        genome: Genome::from_instructions(instructions),
        pc,
        facing,
        energy,
        age,
        x: 0,
        y: 0,
        color,
        photosynthesis_count,
        attack_count,
        eating_dead_count,
    })
}

/// Serialize a grid captured at `tick`.
#[must_use]
pub fn encode(grid: &Grid, tick: Tick) -> Vec<u8> {
    let mut payload = Vec::with_capacity(grid.len() * RECORD_PREFIX_SIZE);
    for cell in grid.cells() {
        encode_cell(cell, &mut payload);
    }
    let header = Header {
        version: SNAPSHOT_VERSION,
        width: grid.width(),
        height: grid.height(),
        tick: tick.0,
        record_count: grid.len() as u32,
        payload_len: payload.len() as u32,
        checksum: checksum(&payload),
    };
    let mut output = Vec::with_capacity(HEADER_SIZE + payload.len());
    output.extend_from_slice(&header.to_bytes());
    output.extend(payload);
    output
}

/// Parse and validate a snapshot produced by [`encode`].
pub fn decode(data: &[u8]) -> Result<Snapshot, SnapshotError> {
    let header = Header::from_bytes(data)?;
    let expected_records = (header.width as usize) * (header.height as usize);
    if header.width == 0 || header.height == 0 || header.record_count as usize != expected_records
    {
        return Err(SnapshotError::DimensionMismatch {
            width: header.width,
            height: header.height,
            records: header.record_count as usize,
        });
    }

    let payload_end = HEADER_SIZE + header.payload_len as usize;
    let payload = data
        .get(HEADER_SIZE..payload_end)
        .ok_or(SnapshotError::Truncated {
            needed: payload_end,
            available: data.len(),
        })?;
    if data.len() > payload_end {
        return Err(SnapshotError::TrailingBytes {
            extra: data.len() - payload_end,
        });
    }
    // every record carries at least its fixed prefix
    let minimum = expected_records.saturating_mul(RECORD_PREFIX_SIZE);
    if payload.len() < minimum {
        return Err(SnapshotError::Truncated {
            needed: HEADER_SIZE.saturating_add(minimum),
            available: data.len(),
        });
    }
    let actual = checksum(payload);
    if actual != header.checksum {
        return Err(SnapshotError::ChecksumMismatch {
            expected: header.checksum,
            actual,
        });
    }

    let mut reader = Reader::new(payload);
    let mut cells = Vec::with_capacity(expected_records);
    for index in 0..expected_records {
        cells.push(decode_cell(&mut reader, index)?);
    }
    if reader.offset != payload.len() {
        return Err(SnapshotError::TrailingBytes {
            extra: payload.len() - reader.offset,
        });
    }
    let grid = Grid::from_cells(header.width, header.height, cells).map_err(|_| {
        SnapshotError::DimensionMismatch {
            width: header.width,
            height: header.height,
            records: expected_records,
        }
    })?;
    Ok(Snapshot {
        tick: Tick(header.tick),
        grid,
    })
}

/// 64-bit multiplicative fold over 8-byte little-endian words.
fn checksum(data: &[u8]) -> u64 {
    let mut hash = 0x9E37_79B9_7F4A_7C15u64;
    for chunk in data.chunks(8) {
        let mut word = 0u64;
        for (i, &byte) in chunk.iter().enumerate() {
            word |= u64::from(byte) << (i * 8);
        }
        hash = hash.wrapping_mul(0x85EB_CA6B).wrapping_add(word);
        hash = hash.rotate_left(31);
    }
    hash ^ data.len() as u64
}

/// Write a snapshot of `grid` to `path`.
pub fn save_to_file(grid: &Grid, tick: Tick, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
    let path = path.as_ref();
    let bytes = encode(grid, tick);
    let mut file = std::fs::File::create(path)?;
    file.write_all(&bytes)?;
    file.flush()?;
    info!(path = %path.display(), tick = tick.0, bytes = bytes.len(), "saved snapshot");
    Ok(())
}

/// Read a snapshot from `path`.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<Snapshot, SnapshotError> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    let snapshot = decode(&data)?;
    info!(
        path = %path.display(),
        tick = snapshot.tick.0,
        width = snapshot.grid.width(),
        height = snapshot.grid.height(),
        "loaded snapshot"
    );
    Ok(snapshot)
}
