//! Aligned read model consumed by the candidate finder

use crate::{VcallerError, VcallerResult};

pub const NUM_DIRECTIONS: usize = 3;

/// Direction a base was sequenced in. `Stitched` marks bases from the reconciled
/// overlap of a merged read pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DirectionType {
    Forward = 0,
    Reverse = 1,
    Stitched = 2,
}

impl DirectionType {
    pub const ALL: [DirectionType; NUM_DIRECTIONS] = [
        DirectionType::Forward,
        DirectionType::Reverse,
        DirectionType::Stitched,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Alignment operation with its length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarOp {
    Match(u32),
    Ins(u32),
    Del(u32),
    SoftClip(u32),
    HardClip(u32),
    RefSkip(u32),
    Pad(u32),
}

impl CigarOp {
    pub fn len(&self) -> u32 {
        match *self {
            CigarOp::Match(n)
            | CigarOp::Ins(n)
            | CigarOp::Del(n)
            | CigarOp::SoftClip(n)
            | CigarOp::HardClip(n)
            | CigarOp::RefSkip(n)
            | CigarOp::Pad(n) => n,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn consumes_read(&self) -> bool {
        matches!(self, CigarOp::Match(_) | CigarOp::Ins(_) | CigarOp::SoftClip(_))
    }

    pub fn consumes_reference(&self) -> bool {
        matches!(self, CigarOp::Match(_) | CigarOp::Del(_) | CigarOp::RefSkip(_))
    }

    pub fn is_clip(&self) -> bool {
        matches!(self, CigarOp::SoftClip(_) | CigarOp::HardClip(_))
    }
}

/// Parse a CIGAR string such as `3S10M2I5M` into operations
pub fn parse_cigar(cigar: &str) -> VcallerResult<Vec<CigarOp>> {
    if cigar == "*" || cigar.is_empty() {
        return Ok(Vec::new());
    }

    let mut ops = Vec::new();
    let mut num_start = 0;

    for (i, c) in cigar.char_indices() {
        if c.is_ascii_digit() {
            continue;
        }
        let len: u32 = cigar[num_start..i]
            .parse()
            .map_err(|_| VcallerError::InvalidRead(format!("Invalid CIGAR length in '{}'", cigar)))?;
        let op = match c {
            'M' | '=' | 'X' => CigarOp::Match(len),
            'I' => CigarOp::Ins(len),
            'D' => CigarOp::Del(len),
            'N' => CigarOp::RefSkip(len),
            'S' => CigarOp::SoftClip(len),
            'H' => CigarOp::HardClip(len),
            'P' => CigarOp::Pad(len),
            _ => {
                return Err(VcallerError::InvalidRead(format!(
                    "Unknown CIGAR operation '{}' in '{}'",
                    c, cigar
                )))
            }
        };
        ops.push(op);
        num_start = i + 1;
    }

    if num_start != cigar.len() {
        return Err(VcallerError::InvalidRead(format!(
            "Trailing length without operation in CIGAR '{}'",
            cigar
        )));
    }

    Ok(ops)
}

/// Expand a stitched-direction string such as `5F10S5R` into per-base directions
pub fn parse_direction_string(directions: &str) -> VcallerResult<Vec<DirectionType>> {
    let mut expanded = Vec::new();
    let mut num_start = 0;

    for (i, c) in directions.char_indices() {
        if c.is_ascii_digit() {
            continue;
        }
        let len: usize = directions[num_start..i].parse().map_err(|_| {
            VcallerError::InvalidRead(format!("Invalid direction string '{}'", directions))
        })?;
        let direction = match c {
            'F' => DirectionType::Forward,
            'R' => DirectionType::Reverse,
            'S' => DirectionType::Stitched,
            _ => {
                return Err(VcallerError::InvalidRead(format!(
                    "Unknown direction '{}' in '{}'",
                    c, directions
                )))
            }
        };
        expanded.extend(std::iter::repeat(direction).take(len));
        num_start = i + 1;
    }

    Ok(expanded)
}

/// An aligned read on one contig
#[derive(Debug, Clone)]
pub struct Read {
    pub contig: String,
    /// 1-based reference position of the first aligned base
    pub position: u32,
    pub sequence: Vec<u8>,
    pub qualities: Vec<u8>,
    pub cigar: Vec<CigarOp>,
    pub direction_map: Vec<DirectionType>,
    /// Read index to 1-based reference coordinate; `None` for inserted or clipped bases
    pub position_map: Vec<Option<u32>>,
    pub is_duplex: bool,
}

impl Read {
    pub fn new(
        contig: &str,
        position: u32,
        sequence: Vec<u8>,
        qualities: Vec<u8>,
        cigar: Vec<CigarOp>,
        direction_map: Vec<DirectionType>,
        is_duplex: bool,
    ) -> VcallerResult<Self> {
        if contig.is_empty() {
            return Err(VcallerError::InvalidRead("Contig name is empty".to_string()));
        }
        if position == 0 {
            return Err(VcallerError::InvalidRead(
                "Read position must be 1-based and positive".to_string(),
            ));
        }
        if sequence.len() != qualities.len() {
            return Err(VcallerError::InvalidRead(format!(
                "Sequence length {} does not match quality length {}",
                sequence.len(),
                qualities.len()
            )));
        }
        if direction_map.len() != sequence.len() {
            return Err(VcallerError::InvalidRead(format!(
                "Direction map length {} does not match sequence length {}",
                direction_map.len(),
                sequence.len()
            )));
        }

        let cigar_read_length: usize = cigar
            .iter()
            .filter(|op| op.consumes_read())
            .map(|op| op.len() as usize)
            .sum();
        if !cigar.is_empty() && cigar_read_length != sequence.len() {
            return Err(VcallerError::InvalidRead(format!(
                "CIGAR read length {} does not match sequence length {}",
                cigar_read_length,
                sequence.len()
            )));
        }

        let position_map = Self::build_position_map(position, &cigar, sequence.len());

        Ok(Read {
            contig: contig.to_string(),
            position,
            sequence: sequence.to_ascii_uppercase(),
            qualities,
            cigar,
            direction_map,
            position_map,
            is_duplex,
        })
    }

    /// Build a read whose bases all share one direction
    pub fn with_direction(
        contig: &str,
        position: u32,
        sequence: &str,
        qualities: Vec<u8>,
        cigar: &str,
        direction: DirectionType,
    ) -> VcallerResult<Self> {
        let cigar = parse_cigar(cigar)?;
        let directions = vec![direction; sequence.len()];
        Self::new(
            contig,
            position,
            sequence.as_bytes().to_vec(),
            qualities,
            cigar,
            directions,
            false,
        )
    }

    fn build_position_map(position: u32, cigar: &[CigarOp], length: usize) -> Vec<Option<u32>> {
        let mut map = vec![None; length];
        let mut read_index = 0usize;
        let mut reference = position;

        for op in cigar {
            let len = op.len();
            if let CigarOp::Match(_) = op {
                for i in 0..len as usize {
                    if read_index + i < length {
                        map[read_index + i] = Some(reference + i as u32);
                    }
                }
            }
            if op.consumes_read() {
                read_index += len as usize;
            }
            if op.consumes_reference() {
                reference += len;
            }
        }

        map
    }

    /// 1-based reference position of the last aligned base
    pub fn end_position(&self) -> u32 {
        let span: u32 = self
            .cigar
            .iter()
            .filter(|op| op.consumes_reference())
            .map(|op| op.len())
            .sum();
        (self.position + span).saturating_sub(1).max(self.position)
    }

    /// Index of the first operation that is not a clip
    pub fn first_aligned_op(&self) -> Option<usize> {
        self.cigar.iter().position(|op| !op.is_clip())
    }

    /// Index of the last operation that is not a clip
    pub fn last_aligned_op(&self) -> Option<usize> {
        self.cigar.iter().rposition(|op| !op.is_clip())
    }
}
