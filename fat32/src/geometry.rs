// FAT32 volume geometry
// Derived once from the boot sector; every address calculation starts here

use byteorder::{ByteOrder, LittleEndian};
use fatscope_core::{BlockSource, FatError, FatResult};
use log::info;
use serde::Serialize;

pub const SECTOR_SIZE: u32 = 512;
pub const BOOT_SIGNATURE: u16 = 0xAA55;
pub const SUPPORTED_FAT_COUNT: u8 = 2;

// Boot sector field offsets
const BPB_BYTES_PER_SECTOR: usize = 0x0B;
const BPB_SECTORS_PER_CLUSTER: usize = 0x0D;
const BPB_RESERVED_SECTORS: usize = 0x0E;
const BPB_NUM_FATS: usize = 0x10;
const BPB_TOTAL_SECTORS_16: usize = 0x13;
const BPB_TOTAL_SECTORS_32: usize = 0x20;
const BPB_SECTORS_PER_FAT_32: usize = 0x24;
const BPB_ROOT_CLUSTER: usize = 0x2C;
const BS_VOLUME_ID: usize = 0x43;
const BS_VOLUME_LABEL: usize = 0x47;
const BS_SIGNATURE: usize = 0x1FE;

/// Constants needed for all FAT32 address arithmetic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeGeometry {
    /// Byte offset of the partition within the block source
    pub partition_offset: u64,
    pub fat_begin_offset: u64,
    /// Byte offset of cluster 2
    pub data_begin_offset: u64,
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub sectors_per_fat: u32,
    pub root_dir_first_cluster: u32,
    /// Number of data clusters (valid clusters are 2..=cluster_count + 1)
    pub cluster_count: u32,
    pub volume_id: u32,
    pub volume_label: String,
}

impl VolumeGeometry {
    /// Parse a 512-byte boot sector of a partition starting at `start_lba`
    pub fn derive(boot_sector: &[u8], start_lba: u64) -> FatResult<Self> {
        let partition_offset = start_lba * SECTOR_SIZE as u64;
        if boot_sector.len() < SECTOR_SIZE as usize {
            return Err(FatError::ShortRead {
                offset: partition_offset,
                expected: SECTOR_SIZE as usize,
                actual: boot_sector.len(),
            });
        }

        let signature = LittleEndian::read_u16(&boot_sector[BS_SIGNATURE..]);
        if signature != BOOT_SIGNATURE {
            return Err(FatError::BadSignature(signature));
        }

        let bytes_per_sector = LittleEndian::read_u16(&boot_sector[BPB_BYTES_PER_SECTOR..]) as u32;
        let sectors_per_cluster = boot_sector[BPB_SECTORS_PER_CLUSTER] as u32;
        let reserved_sectors = LittleEndian::read_u16(&boot_sector[BPB_RESERVED_SECTORS..]) as u64;
        let num_fats = boot_sector[BPB_NUM_FATS];
        let sectors_per_fat = LittleEndian::read_u32(&boot_sector[BPB_SECTORS_PER_FAT_32..]);
        let root_cluster = LittleEndian::read_u32(&boot_sector[BPB_ROOT_CLUSTER..]);

        if bytes_per_sector != SECTOR_SIZE {
            return Err(FatError::UnsupportedLayout(format!(
                "{} bytes per sector (only {} is supported)",
                bytes_per_sector, SECTOR_SIZE
            )));
        }
        if num_fats != SUPPORTED_FAT_COUNT {
            return Err(FatError::UnsupportedLayout(format!(
                "{} FAT copies (only {} is supported)",
                num_fats, SUPPORTED_FAT_COUNT
            )));
        }
        if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
            return Err(FatError::UnsupportedLayout(format!(
                "invalid sectors per cluster: {}",
                sectors_per_cluster
            )));
        }
        if sectors_per_fat == 0 {
            // FAT12/FAT16 keep their FAT size in the 16-bit field instead
            return Err(FatError::UnsupportedLayout(
                "32-bit FAT size is zero (not a FAT32 volume)".to_string(),
            ));
        }

        let fat_sectors = num_fats as u64 * sectors_per_fat as u64;
        let fat_begin_offset = (start_lba + reserved_sectors) * SECTOR_SIZE as u64;
        let data_begin_offset = (start_lba + reserved_sectors + fat_sectors) * SECTOR_SIZE as u64;

        let total_sectors = match LittleEndian::read_u16(&boot_sector[BPB_TOTAL_SECTORS_16..]) {
            0 => LittleEndian::read_u32(&boot_sector[BPB_TOTAL_SECTORS_32..]) as u64,
            small => small as u64,
        };
        // The FAT cannot describe more clusters than it has entries for
        let fat_capacity = (sectors_per_fat as u64 * (SECTOR_SIZE as u64 / 4)).saturating_sub(2);
        let data_clusters = total_sectors.saturating_sub(reserved_sectors + fat_sectors)
            / sectors_per_cluster as u64;
        let cluster_count = match data_clusters {
            0 => fat_capacity,
            n => n.min(fat_capacity),
        }
        .min(crate::cluster::MAX_DATA_CLUSTER as u64 - 1) as u32;

        if root_cluster < 2 || root_cluster > cluster_count + 1 {
            return Err(FatError::UnsupportedLayout(format!(
                "root directory cluster {} is outside the data region",
                root_cluster
            )));
        }

        let volume_label = String::from_utf8_lossy(&boot_sector[BS_VOLUME_LABEL..BS_VOLUME_LABEL + 11])
            .trim()
            .to_string();

        Ok(VolumeGeometry {
            partition_offset,
            fat_begin_offset,
            data_begin_offset,
            bytes_per_sector,
            sectors_per_cluster,
            sectors_per_fat,
            root_dir_first_cluster: root_cluster,
            cluster_count,
            volume_id: LittleEndian::read_u32(&boot_sector[BS_VOLUME_ID..]),
            volume_label,
        })
    }

    /// Read and parse the boot sector of the partition starting at `start_lba`
    pub fn read<S: BlockSource + ?Sized>(source: &S, start_lba: u64) -> FatResult<Self> {
        let boot = source.read_vec_at(start_lba * SECTOR_SIZE as u64, SECTOR_SIZE as usize)?;
        let geometry = Self::derive(&boot, start_lba)?;

        info!("FAT32 volume at LBA {}:", start_lba);
        info!("  Sectors per cluster: {}", geometry.sectors_per_cluster);
        info!("  FAT start: byte {:#x}", geometry.fat_begin_offset);
        info!("  Data start: byte {:#x}", geometry.data_begin_offset);
        info!("  Root cluster: {}", geometry.root_dir_first_cluster);
        info!("  Data clusters: {}", geometry.cluster_count);
        info!("  Volume label: '{}'", geometry.volume_label);

        Ok(geometry)
    }

    /// Cluster size in bytes
    pub fn cluster_size(&self) -> u32 {
        self.sectors_per_cluster * self.bytes_per_sector
    }

    /// Highest cluster number inside the data region
    pub fn max_cluster(&self) -> u32 {
        self.cluster_count + 1
    }

    pub fn is_valid_cluster(&self, cluster: u32) -> bool {
        (crate::cluster::FIRST_DATA_CLUSTER..=self.max_cluster()).contains(&cluster)
    }
}
