// MBR partition table
// Four 16-byte slots at 0x1BE. Only the fields needed to locate a FAT32 volume
// are decoded; CHS addresses are ignored.

use crate::geometry::{BOOT_SIGNATURE, SECTOR_SIZE};
use byteorder::{ByteOrder, LittleEndian};
use fatscope_core::{BlockSource, FatError, FatResult};
use log::debug;
use serde::Serialize;

const PARTITION_TABLE_OFFSET: usize = 0x1BE;
const PARTITION_ENTRY_SIZE: usize = 16;
const DISK_SIGNATURE_OFFSET: usize = 0x1B8;
const MBR_SIGNATURE_OFFSET: usize = 0x1FE;

pub const PARTITION_SLOTS: usize = 4;
pub const FAT32_CHS: u8 = 0x0B;
pub const FAT32_LBA: u8 = 0x0C;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionEntry {
    pub slot: usize,
    pub boot_indicator: u8,
    pub system_id: u8,
    pub lba_start: u32,
    pub sector_count: u32,
}

impl PartitionEntry {
    fn parse(slot: usize, raw: &[u8]) -> Self {
        PartitionEntry {
            slot,
            boot_indicator: raw[0],
            system_id: raw[4],
            lba_start: LittleEndian::read_u32(&raw[8..12]),
            sector_count: LittleEndian::read_u32(&raw[12..16]),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.system_id == 0 || self.sector_count == 0
    }

    pub fn is_fat32(&self) -> bool {
        matches!(self.system_id, FAT32_CHS | FAT32_LBA) && !self.is_empty()
    }

    pub fn is_bootable(&self) -> bool {
        self.boot_indicator == 0x80
    }

    pub fn size_bytes(&self) -> u64 {
        self.sector_count as u64 * SECTOR_SIZE as u64
    }

    pub fn type_name(&self) -> &'static str {
        match self.system_id {
            0x00 => "Empty",
            0x01 => "FAT12",
            0x04 | 0x06 | 0x0E => "FAT16",
            0x05 | 0x0F => "Extended",
            0x07 => "NTFS/exFAT",
            FAT32_CHS => "FAT32 (CHS)",
            FAT32_LBA => "FAT32 (LBA)",
            0x82 => "Linux swap",
            0x83 => "Linux",
            0xEE => "GPT protective",
            0xEF => "EFI System",
            _ => "Unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionTable {
    pub disk_signature: u32,
    pub entries: [PartitionEntry; PARTITION_SLOTS],
}

impl PartitionTable {
    /// Decode the MBR in `sector` (the first 512 bytes of the disk)
    pub fn parse(sector: &[u8]) -> FatResult<Self> {
        if sector.len() < SECTOR_SIZE as usize {
            return Err(FatError::ShortRead {
                offset: 0,
                expected: SECTOR_SIZE as usize,
                actual: sector.len(),
            });
        }

        let signature = LittleEndian::read_u16(&sector[MBR_SIGNATURE_OFFSET..]);
        if signature != BOOT_SIGNATURE {
            return Err(FatError::BadSignature(signature));
        }

        let entries = std::array::from_fn(|slot| {
            let start = PARTITION_TABLE_OFFSET + slot * PARTITION_ENTRY_SIZE;
            PartitionEntry::parse(slot, &sector[start..start + PARTITION_ENTRY_SIZE])
        });

        Ok(PartitionTable {
            disk_signature: LittleEndian::read_u32(&sector[DISK_SIGNATURE_OFFSET..]),
            entries,
        })
    }

    pub fn read<S: BlockSource + ?Sized>(source: &S) -> FatResult<Self> {
        let sector = source.read_vec_at(0, SECTOR_SIZE as usize)?;
        let table = Self::parse(&sector)?;
        for entry in table.entries.iter().filter(|e| !e.is_empty()) {
            debug!(
                "Partition {}: type {:#04x} ({}), start LBA {}, {} sectors",
                entry.slot,
                entry.system_id,
                entry.type_name(),
                entry.lba_start,
                entry.sector_count
            );
        }
        Ok(table)
    }

    pub fn used(&self) -> impl Iterator<Item = &PartitionEntry> {
        self.entries.iter().filter(|entry| !entry.is_empty())
    }

    /// The FAT32 partition in `slot`, or the first FAT32 slot when `slot` is None
    pub fn find_fat32(&self, slot: Option<usize>) -> FatResult<&PartitionEntry> {
        match slot {
            Some(index) => {
                let entry = self.entries.get(index).ok_or_else(|| {
                    FatError::NoPartition(format!(
                        "slot {} does not exist (MBR has {} slots)",
                        index, PARTITION_SLOTS
                    ))
                })?;
                if !entry.is_fat32() {
                    return Err(FatError::NoPartition(format!(
                        "slot {} holds type {:#04x} ({}), not FAT32",
                        index,
                        entry.system_id,
                        entry.type_name()
                    )));
                }
                Ok(entry)
            }
            None => self
                .entries
                .iter()
                .find(|entry| entry.is_fat32())
                .ok_or_else(|| FatError::NoPartition("no FAT32 partition in the MBR".to_string())),
        }
    }
}
