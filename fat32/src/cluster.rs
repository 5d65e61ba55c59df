// Cluster address arithmetic and FAT entry interpretation

use crate::geometry::VolumeGeometry;
use byteorder::{ByteOrder, LittleEndian};
use fatscope_core::{BlockSource, FatResult};
use log::trace;

/// Only the low 28 bits of a FAT32 entry are significant
pub const CLUSTER_MASK: u32 = 0x0FFF_FFFF;
pub const FIRST_DATA_CLUSTER: u32 = 2;
pub const MAX_DATA_CLUSTER: u32 = 0x0FFF_FFEF;
pub const BAD_CLUSTER: u32 = 0x0FFF_FFF7;
pub const END_OF_CHAIN: u32 = 0x0FFF_FFF8;

const FAT_ENTRY_SIZE: u64 = 4;

pub fn mask_cluster_value(raw: u32) -> u32 {
    raw & CLUSTER_MASK
}

pub fn is_end_of_chain(raw: u32) -> bool {
    mask_cluster_value(raw) >= END_OF_CHAIN
}

/// Byte offset of the first byte of `cluster`
pub fn cluster_to_offset(geometry: &VolumeGeometry, cluster: u32) -> u64 {
    let index = cluster.saturating_sub(FIRST_DATA_CLUSTER) as u64;
    geometry.data_begin_offset + index * geometry.cluster_size() as u64
}

/// Cluster containing the byte at `offset`, or None before the data region
pub fn offset_to_cluster(geometry: &VolumeGeometry, offset: u64) -> Option<u32> {
    let relative = offset.checked_sub(geometry.data_begin_offset)?;
    let index = relative / geometry.cluster_size() as u64;
    u32::try_from(index + FIRST_DATA_CLUSTER as u64).ok()
}

/// Byte offset of the FAT entry describing `cluster` (first FAT copy)
pub fn fat_entry_offset(geometry: &VolumeGeometry, cluster: u32) -> u64 {
    geometry.fat_begin_offset + cluster as u64 * FAT_ENTRY_SIZE
}

/// Meaning of a FAT entry once the reserved bits are masked off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatEntry {
    Free,
    Next(u32),
    /// Cluster 1 and the 0x0FFFFFF0..=0x0FFFFFF6 range
    Reserved,
    Bad,
    EndOfChain,
}

impl FatEntry {
    pub fn from_raw(raw: u32) -> Self {
        match mask_cluster_value(raw) {
            0 => FatEntry::Free,
            1 => FatEntry::Reserved,
            cluster @ FIRST_DATA_CLUSTER..=MAX_DATA_CLUSTER => FatEntry::Next(cluster),
            BAD_CLUSTER => FatEntry::Bad,
            value if value >= END_OF_CHAIN => FatEntry::EndOfChain,
            _ => FatEntry::Reserved,
        }
    }
}

/// Look up the FAT entry for `cluster`
pub fn read_fat_entry<S: BlockSource + ?Sized>(
    source: &S,
    geometry: &VolumeGeometry,
    cluster: u32,
) -> FatResult<FatEntry> {
    let offset = fat_entry_offset(geometry, cluster);
    let mut raw = [0u8; FAT_ENTRY_SIZE as usize];
    source.read_exact_at(offset, &mut raw)?;

    let entry = FatEntry::from_raw(LittleEndian::read_u32(&raw));
    trace!("FAT[{}] at {:#x} -> {:?}", cluster, offset, entry);
    Ok(entry)
}
