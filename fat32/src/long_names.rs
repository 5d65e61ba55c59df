// VFAT long filename support
// Fragments arrive last-first; each carries 13 UTF-16 units and a 1-based sequence
// number. The accumulator places them by sequence, then hands the name to the
// short record that follows.

use byteorder::{ByteOrder, LittleEndian};
use fatscope_core::{FatError, FatResult, LongNamePolicy};
use log::warn;

pub const LFN_UNITS_PER_ENTRY: usize = 13;
/// FAT32 long names are limited to 255 UTF-16 units
pub const MAX_LFN_UNITS: usize = 255;
pub const LFN_LAST_ENTRY: u8 = 0x40;
pub const LFN_SEQUENCE_MASK: u8 = 0x1F;
/// 20 fragments are enough for 255 units
const MAX_LFN_ENTRIES: u8 = 20;

// Byte offsets of the 13 UTF-16 units inside a fragment record (1-10, 14-25, 28-31)
const LFN_UNIT_OFFSETS: [usize; LFN_UNITS_PER_ENTRY] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];
const LFN_CHECKSUM_OFFSET: usize = 13;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongNameFragment {
    pub sequence: u8,
    /// Logically the final fragment of the name (stored first on disk)
    pub is_last: bool,
    pub checksum: u8,
    pub units: [u16; LFN_UNITS_PER_ENTRY],
}

impl LongNameFragment {
    /// Decode a 32-byte record whose attribute byte is 0x0F
    pub fn parse(record: &[u8]) -> Self {
        let mut units = [0u16; LFN_UNITS_PER_ENTRY];
        for (unit, &offset) in units.iter_mut().zip(LFN_UNIT_OFFSETS.iter()) {
            *unit = LittleEndian::read_u16(&record[offset..offset + 2]);
        }

        LongNameFragment {
            sequence: record[0] & LFN_SEQUENCE_MASK,
            is_last: record[0] & LFN_LAST_ENTRY != 0,
            checksum: record[LFN_CHECKSUM_OFFSET],
            units,
        }
    }
}

/// Checksum of an 11-byte short name, as stored in each of its fragments
pub fn lfn_checksum(short_name: &[u8; 11]) -> u8 {
    short_name
        .iter()
        .fold(0u8, |sum, &b| ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(b))
}

/// Collects fragments until the short record they belong to turns up
#[derive(Debug, Default)]
pub struct LongNameAccumulator {
    units: Vec<u16>,
    terminal_len: Option<usize>,
    expected: Option<u8>,
    seen: u32,
    checksum: Option<u8>,
    problem: Option<String>,
}

impl LongNameAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.seen == 0 && self.problem.is_none()
    }

    pub fn push(&mut self, fragment: &LongNameFragment) {
        let sequence = fragment.sequence;
        if sequence == 0 || sequence > MAX_LFN_ENTRIES {
            self.note(format!("fragment sequence number {} out of range", sequence));
            return;
        }

        let start = (sequence as usize - 1) * LFN_UNITS_PER_ENTRY;
        let end = start + LFN_UNITS_PER_ENTRY;
        if self.units.len() < end {
            self.units.resize(end, 0);
        }
        self.units[start..end].copy_from_slice(&fragment.units);

        if self.seen & (1 << (sequence - 1)) != 0 {
            self.note(format!("fragment {} appears twice", sequence));
        }
        self.seen |= 1 << (sequence - 1);

        if fragment.is_last {
            if self.expected.is_some() {
                self.note("more than one fragment carries the last-entry flag".to_string());
            }
            self.expected = Some(sequence);
            self.terminal_len = Some(end);
        }

        match self.checksum {
            None => self.checksum = Some(fragment.checksum),
            Some(sum) if sum != fragment.checksum => {
                self.note("fragments disagree on the short-name checksum".to_string());
            }
            Some(_) => {}
        }
    }

    fn note(&mut self, problem: String) {
        if self.problem.is_none() {
            self.problem = Some(problem);
        }
    }

    fn validate(&self, short_name: &[u8; 11]) -> Result<(), String> {
        if let Some(problem) = &self.problem {
            return Err(problem.clone());
        }
        let expected = self
            .expected
            .ok_or_else(|| "no fragment carries the last-entry flag".to_string())?;
        let full_mask = (1u32 << expected) - 1;
        if self.seen != full_mask {
            return Err(format!(
                "fragments {:#b} do not cover sequence 1..={}",
                self.seen, expected
            ));
        }
        if self.checksum != Some(lfn_checksum(short_name)) {
            return Err("checksum does not match the short name".to_string());
        }
        Ok(())
    }

    /// Hand over the accumulated name for `short_name` and reset.
    /// Returns None when no fragments preceded the short record.
    pub fn take(&mut self, short_name: &[u8; 11], policy: LongNamePolicy) -> FatResult<Option<String>> {
        let state = std::mem::take(self);
        if state.is_empty() {
            return Ok(None);
        }

        let short_display = String::from_utf8_lossy(short_name).into_owned();
        if let Err(reason) = state.validate(short_name) {
            match policy {
                LongNamePolicy::Strict => {
                    return Err(FatError::MalformedLongName(format!("{}: {}", short_display.trim_end(), reason)));
                }
                LongNamePolicy::Lenient => {
                    warn!("Accepting malformed long name for '{}': {}", short_display.trim_end(), reason);
                }
            }
        }

        let limit = state.terminal_len.unwrap_or(state.units.len()).min(state.units.len());
        let mut units = &state.units[..limit];
        if let Some(nul) = units.iter().position(|&u| u == 0x0000) {
            units = &units[..nul];
        }
        while let [rest @ .., 0xFFFF] = units {
            units = rest;
        }

        if units.len() > MAX_LFN_UNITS {
            if policy == LongNamePolicy::Strict {
                return Err(FatError::MalformedLongName(format!(
                    "{}: name is {} units long",
                    short_display.trim_end(),
                    units.len()
                )));
            }
            units = &units[..MAX_LFN_UNITS];
        }

        if units.is_empty() {
            return Ok(None);
        }
        Ok(Some(String::from_utf16_lossy(units)))
    }
}
