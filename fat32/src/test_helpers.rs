// In-memory FAT32 image builder for tests
// Only depends on std and byteorder so integration tests can pull it in by path.

#![allow(dead_code)]

use byteorder::{ByteOrder, LittleEndian};

pub const SECTOR: usize = 512;
pub const RESERVED_SECTORS: u16 = 32;
pub const EOC: u32 = 0x0FFF_FFFF;

pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;
pub const ATTR_LONG_NAME: u8 = 0x0F;

const LFN_UNIT_OFFSETS: [usize; 13] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];

// 2024-03-15 12:30:10
pub const TEST_DATE: u16 = ((2024 - 1980) << 9) | (3 << 5) | 15;
pub const TEST_TIME: u16 = (12 << 11) | (30 << 5) | 5;

/// A FAT32 volume laid out in a byte vector, optionally behind an MBR
pub struct TestImage {
    pub start_lba: u32,
    pub sectors_per_cluster: u8,
    pub sectors_per_fat: u32,
    pub data_clusters: u32,
    pub root_cluster: u32,
    next_free: u32,
    bytes: Vec<u8>,
}

impl TestImage {
    /// Unpartitioned volume with 200 data clusters
    pub fn new(sectors_per_cluster: u8) -> Self {
        Self::with_layout(0, sectors_per_cluster, 200)
    }

    /// Volume behind an MBR whose first slot is a FAT32 (LBA) partition
    pub fn partitioned(start_lba: u32, sectors_per_cluster: u8) -> Self {
        Self::with_layout(start_lba, sectors_per_cluster, 200)
    }

    pub fn with_layout(start_lba: u32, sectors_per_cluster: u8, data_clusters: u32) -> Self {
        let sectors_per_fat = ((data_clusters + 2) * 4 + SECTOR as u32 - 1) / SECTOR as u32;
        let total_sectors = RESERVED_SECTORS as u32
            + 2 * sectors_per_fat
            + data_clusters * sectors_per_cluster as u32;
        let size = (start_lba + total_sectors) as usize * SECTOR;

        let mut image = Self {
            start_lba,
            sectors_per_cluster,
            sectors_per_fat,
            data_clusters,
            root_cluster: 2,
            next_free: 2,
            bytes: vec![0u8; size],
        };

        image.write_boot_sector(total_sectors);
        if start_lba > 0 {
            image.write_mbr(0, 0x0C, start_lba, total_sectors);
        }
        image.set_fat(0, 0x0FFF_FFF8);
        image.set_fat(1, EOC);

        let root = image.allocate(1);
        image.root_cluster = root[0];
        image
    }

    fn write_boot_sector(&mut self, total_sectors: u32) {
        let base = self.partition_base();
        let bs = &mut self.bytes[base..base + SECTOR];
        bs[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
        bs[3..11].copy_from_slice(b"MSWIN4.1");
        LittleEndian::write_u16(&mut bs[0x0B..], SECTOR as u16);
        bs[0x0D] = self.sectors_per_cluster;
        LittleEndian::write_u16(&mut bs[0x0E..], RESERVED_SECTORS);
        bs[0x10] = 2;
        bs[0x15] = 0xF8;
        LittleEndian::write_u32(&mut bs[0x20..], total_sectors);
        LittleEndian::write_u32(&mut bs[0x24..], self.sectors_per_fat);
        LittleEndian::write_u32(&mut bs[0x2C..], 2);
        bs[0x42] = 0x29;
        LittleEndian::write_u32(&mut bs[0x43..], 0xCAFE_F00D);
        bs[0x47..0x52].copy_from_slice(b"TESTVOL    ");
        bs[0x52..0x5A].copy_from_slice(b"FAT32   ");
        LittleEndian::write_u16(&mut bs[0x1FE..], 0xAA55);
    }

    /// Write one MBR partition slot (and the MBR signature)
    pub fn write_mbr(&mut self, slot: usize, system_id: u8, lba_start: u32, sectors: u32) {
        let entry = 0x1BE + slot * 16;
        self.bytes[entry] = 0x80;
        self.bytes[entry + 4] = system_id;
        LittleEndian::write_u32(&mut self.bytes[entry + 8..], lba_start);
        LittleEndian::write_u32(&mut self.bytes[entry + 12..], sectors);
        LittleEndian::write_u16(&mut self.bytes[0x1FE..], 0xAA55);
    }

    pub fn partition_base(&self) -> usize {
        self.start_lba as usize * SECTOR
    }

    pub fn boot_sector_mut(&mut self) -> &mut [u8] {
        let base = self.partition_base();
        &mut self.bytes[base..base + SECTOR]
    }

    pub fn cluster_size(&self) -> usize {
        self.sectors_per_cluster as usize * SECTOR
    }

    pub fn fat_begin(&self) -> usize {
        self.partition_base() + RESERVED_SECTORS as usize * SECTOR
    }

    pub fn data_begin(&self) -> usize {
        self.fat_begin() + 2 * self.sectors_per_fat as usize * SECTOR
    }

    pub fn cluster_offset(&self, cluster: u32) -> usize {
        self.data_begin() + (cluster as usize - 2) * self.cluster_size()
    }

    /// Set a FAT entry in both FAT copies
    pub fn set_fat(&mut self, cluster: u32, value: u32) {
        let fat_bytes = self.sectors_per_fat as usize * SECTOR;
        for copy in 0..2 {
            let offset = self.fat_begin() + copy * fat_bytes + cluster as usize * 4;
            LittleEndian::write_u32(&mut self.bytes[offset..offset + 4], value);
        }
    }

    pub fn fat_entry(&self, cluster: u32) -> u32 {
        let offset = self.fat_begin() + cluster as usize * 4;
        LittleEndian::read_u32(&self.bytes[offset..offset + 4])
    }

    /// Allocate `count` consecutive clusters linked into one chain
    pub fn allocate(&mut self, count: usize) -> Vec<u32> {
        let chain: Vec<u32> = (0..count as u32).map(|i| self.next_free + i).collect();
        assert!(
            self.next_free + count as u32 <= self.data_clusters + 2,
            "test image out of clusters"
        );
        self.next_free += count as u32;
        self.link(&chain);
        chain
    }

    /// Link arbitrary clusters into a chain ending in EOC
    pub fn link(&mut self, chain: &[u32]) {
        for pair in chain.windows(2) {
            self.set_fat(pair[0], pair[1]);
        }
        if let Some(&last) = chain.last() {
            self.set_fat(last, EOC);
        }
    }

    /// Reserve a cluster without linking it (for hand-built chains)
    pub fn reserve(&mut self) -> u32 {
        let cluster = self.next_free;
        self.next_free += 1;
        cluster
    }

    /// Write `data` across the clusters of `chain`
    pub fn write_chain(&mut self, chain: &[u32], data: &[u8]) {
        let cluster_size = self.cluster_size();
        assert!(data.len() <= chain.len() * cluster_size, "data does not fit in chain");
        for (cluster, chunk) in chain.iter().zip(data.chunks(cluster_size)) {
            let offset = self.cluster_offset(*cluster);
            self.bytes[offset..offset + chunk.len()].copy_from_slice(chunk);
        }
    }

    /// Follow the FAT from `first` to the end of its chain
    pub fn chain_of(&self, first: u32) -> Vec<u32> {
        let mut chain = vec![first];
        let mut current = first;
        loop {
            let next = self.fat_entry(current) & 0x0FFF_FFFF;
            if next >= 0x0FFF_FFF8 || next < 2 || chain.contains(&next) {
                break;
            }
            chain.push(next);
            current = next;
        }
        chain
    }

    /// Store file content; returns its first cluster (0 for an empty file)
    pub fn add_file(&mut self, content: &[u8]) -> u32 {
        if content.is_empty() {
            return 0;
        }
        let clusters = (content.len() + self.cluster_size() - 1) / self.cluster_size();
        let chain = self.allocate(clusters);
        self.write_chain(&chain, content);
        chain[0]
    }

    /// Create a directory holding `records`; returns its first cluster
    pub fn add_directory(&mut self, records: &[[u8; 32]]) -> u32 {
        let chain = self.allocate(1);
        self.write_directory(chain[0], records);
        chain[0]
    }

    /// Rewrite the records of an existing directory, growing its chain as needed
    pub fn write_directory(&mut self, first_cluster: u32, records: &[[u8; 32]]) {
        let data: Vec<u8> = records.iter().flat_map(|r| r.iter().copied()).collect();
        let needed = ((data.len() + self.cluster_size() - 1) / self.cluster_size()).max(1);
        let mut chain = self.chain_of(first_cluster);
        while chain.len() < needed {
            let extra = self.allocate(1)[0];
            let last = *chain.last().unwrap();
            self.set_fat(last, extra);
            chain.push(extra);
        }
        self.write_chain(&chain, &data);
    }

    pub fn write_root(&mut self, records: &[[u8; 32]]) {
        let root = self.root_cluster;
        self.write_directory(root, records);
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// "FILE.TXT" -> b"FILE    TXT"
pub fn short_name(name: &str) -> [u8; 11] {
    let mut raw = [b' '; 11];
    if name == "." || name == ".." {
        raw[..name.len()].copy_from_slice(name.as_bytes());
        return raw;
    }
    let (base, ext) = match name.rfind('.') {
        Some(pos) => (&name[..pos], &name[pos + 1..]),
        None => (name, ""),
    };
    raw[..base.len().min(8)].copy_from_slice(&base.as_bytes()[..base.len().min(8)]);
    raw[8..8 + ext.len().min(3)].copy_from_slice(&ext.as_bytes()[..ext.len().min(3)]);
    raw
}

/// A regular 32-byte directory record
pub fn entry(name: &str, attributes: u8, cluster: u32, size: u32) -> [u8; 32] {
    raw_entry(short_name(name), attributes, cluster, size)
}

pub fn raw_entry(name: [u8; 11], attributes: u8, cluster: u32, size: u32) -> [u8; 32] {
    let mut record = [0u8; 32];
    record[0..11].copy_from_slice(&name);
    record[11] = attributes;
    LittleEndian::write_u16(&mut record[14..], TEST_TIME);
    LittleEndian::write_u16(&mut record[16..], TEST_DATE);
    LittleEndian::write_u16(&mut record[18..], TEST_DATE);
    LittleEndian::write_u16(&mut record[20..], (cluster >> 16) as u16);
    LittleEndian::write_u16(&mut record[22..], TEST_TIME);
    LittleEndian::write_u16(&mut record[24..], TEST_DATE);
    LittleEndian::write_u16(&mut record[26..], (cluster & 0xFFFF) as u16);
    LittleEndian::write_u32(&mut record[28..], size);
    record
}

pub fn file_entry(name: &str, cluster: u32, size: u32) -> [u8; 32] {
    entry(name, ATTR_ARCHIVE, cluster, size)
}

pub fn dir_entry(name: &str, cluster: u32) -> [u8; 32] {
    entry(name, ATTR_DIRECTORY, cluster, 0)
}

/// "." and ".." records for a subdirectory (parent 0 means the root)
pub fn dot_entries(own_cluster: u32, parent_cluster: u32) -> [[u8; 32]; 2] {
    [dir_entry(".", own_cluster), dir_entry("..", parent_cluster)]
}

pub fn deleted(mut record: [u8; 32]) -> [u8; 32] {
    record[0] = 0xE5;
    record
}

pub fn lfn_checksum(short: &[u8; 11]) -> u8 {
    short
        .iter()
        .fold(0u8, |sum, &b| ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(b))
}

/// One long-name fragment record carrying exactly the given 13 units
pub fn lfn_fragment(sequence: u8, last: bool, units: &[u16; 13], checksum: u8) -> [u8; 32] {
    let mut record = [0u8; 32];
    record[0] = sequence | if last { 0x40 } else { 0 };
    record[11] = ATTR_LONG_NAME;
    record[13] = checksum;
    for (unit, &offset) in units.iter().zip(LFN_UNIT_OFFSETS.iter()) {
        LittleEndian::write_u16(&mut record[offset..offset + 2], *unit);
    }
    record
}

/// Long-name fragments for `long` in on-disk order (last fragment first)
pub fn lfn_records(long: &str, short: &[u8; 11]) -> Vec<[u8; 32]> {
    let units: Vec<u16> = long.encode_utf16().collect();
    let count = (units.len() + 12) / 13;
    let checksum = lfn_checksum(short);

    (1..=count)
        .rev()
        .map(|sequence| {
            let mut chunk = [0xFFFFu16; 13];
            let start = (sequence - 1) * 13;
            for (i, slot) in chunk.iter_mut().enumerate() {
                match units.get(start + i) {
                    Some(&unit) => *slot = unit,
                    None if start + i == units.len() => *slot = 0x0000,
                    None => {}
                }
            }
            lfn_fragment(sequence as u8, sequence == count, &chunk, checksum)
        })
        .collect()
}

/// Long-name fragments followed by the short record they describe
pub fn named_entry(long: &str, short: &str, attributes: u8, cluster: u32, size: u32) -> Vec<[u8; 32]> {
    let raw = short_name(short);
    let mut records = lfn_records(long, &raw);
    records.push(raw_entry(raw, attributes, cluster, size));
    records
}

/// Deterministic non-repeating file content
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
