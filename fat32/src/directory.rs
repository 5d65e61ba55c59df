// FAT32 directory records
// Decodes 32-byte records from a directory's cluster chain, classifies them and
// pairs each regular record with the long name assembled from the fragments
// in front of it.

use crate::chain::ChainReader;
use crate::geometry::SECTOR_SIZE;
use crate::long_names::{LongNameAccumulator, LongNameFragment};
use crate::timestamps::{parse_creation_time, parse_date, parse_datetime};
use byteorder::{ByteOrder, LittleEndian};
use chrono::{NaiveDate, NaiveDateTime};
use fatscope_core::{BlockSource, FatError, FatResult, LongNamePolicy};
use serde::Serialize;
use static_assertions::const_assert_eq;
use std::fmt;

pub const DIR_ENTRY_SIZE: usize = 32;
pub const END_OF_DIRECTORY: u8 = 0x00;
pub const DELETED_ENTRY: u8 = 0xE5;
/// A name really starting with 0xE5 is stored as 0x05
pub const ESCAPED_E5: u8 = 0x05;

// Records never straddle a sector, so never a cluster either
const_assert_eq!(SECTOR_SIZE as usize % DIR_ENTRY_SIZE, 0);

/// Directory record attribute bits
#[derive(Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FileAttributes(pub u8);

impl FileAttributes {
    pub const READ_ONLY: u8 = 0x01;
    pub const HIDDEN: u8 = 0x02;
    pub const SYSTEM: u8 = 0x04;
    pub const VOLUME_ID: u8 = 0x08;
    pub const DIRECTORY: u8 = 0x10;
    pub const ARCHIVE: u8 = 0x20;
    pub const LONG_NAME: u8 = 0x0F;

    pub fn is_read_only(&self) -> bool { self.0 & Self::READ_ONLY != 0 }
    pub fn is_hidden(&self) -> bool { self.0 & Self::HIDDEN != 0 }
    pub fn is_system(&self) -> bool { self.0 & Self::SYSTEM != 0 }
    pub fn is_volume_id(&self) -> bool { self.0 & Self::VOLUME_ID != 0 }
    pub fn is_directory(&self) -> bool { self.0 & Self::DIRECTORY != 0 }
    pub fn is_archive(&self) -> bool { self.0 & Self::ARCHIVE != 0 }
    pub fn is_long_name(&self) -> bool { self.0 == Self::LONG_NAME }
}

impl fmt::Debug for FileAttributes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Attributes(0x{:02x})", self.0)
    }
}

impl fmt::Display for FileAttributes {
    /// Flag letters in `ls`-like columns, e.g. `d----a`
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let flags = [
            (self.is_directory(), 'd'),
            (self.is_read_only(), 'r'),
            (self.is_hidden(), 'h'),
            (self.is_system(), 's'),
            (self.is_volume_id(), 'v'),
            (self.is_archive(), 'a'),
        ];
        for (set, letter) in flags {
            write!(f, "{}", if set { letter } else { '-' })?;
        }
        Ok(())
    }
}

/// The fields of a regular (non-fragment) record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortEntry {
    pub name: [u8; 11],
    pub attributes: FileAttributes,
    pub start_cluster: u32,
    pub file_size: u32,
    pub creation_tenths: u8,
    pub creation_time: u16,
    pub creation_date: u16,
    pub access_date: u16,
    pub write_time: u16,
    pub write_date: u16,
}

impl ShortEntry {
    fn parse(record: &[u8]) -> Self {
        let mut name = [0u8; 11];
        name.copy_from_slice(&record[0..11]);

        let high = LittleEndian::read_u16(&record[20..22]) as u32;
        let low = LittleEndian::read_u16(&record[26..28]) as u32;

        ShortEntry {
            name,
            attributes: FileAttributes(record[11]),
            start_cluster: low | (high << 16),
            file_size: LittleEndian::read_u32(&record[28..32]),
            creation_tenths: record[13],
            creation_time: LittleEndian::read_u16(&record[14..16]),
            creation_date: LittleEndian::read_u16(&record[16..18]),
            access_date: LittleEndian::read_u16(&record[18..20]),
            write_time: LittleEndian::read_u16(&record[22..24]),
            write_date: LittleEndian::read_u16(&record[24..26]),
        }
    }

    /// "README  TXT" -> "README.TXT"; the dot only appears with an extension
    pub fn short_name(&self) -> String {
        let decode = |bytes: &[u8]| -> String {
            bytes.iter().map(|&b| b as char).collect::<String>().trim_end_matches(' ').to_string()
        };

        let mut base_bytes = [0u8; 8];
        base_bytes.copy_from_slice(&self.name[0..8]);
        if base_bytes[0] == ESCAPED_E5 {
            base_bytes[0] = DELETED_ENTRY;
        }

        let base = decode(&base_bytes);
        let ext = decode(&self.name[8..11]);
        if ext.is_empty() {
            base
        } else {
            format!("{}.{}", base, ext)
        }
    }
}

/// One 32-byte record, classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirRecord {
    /// First name byte 0x00: nothing after this record is live
    EndOfDirectory,
    Deleted,
    LongName(LongNameFragment),
    Entry(ShortEntry),
}

impl DirRecord {
    pub fn parse(record: &[u8]) -> Self {
        match record[0] {
            END_OF_DIRECTORY => DirRecord::EndOfDirectory,
            DELETED_ENTRY => DirRecord::Deleted,
            _ if record[11] == FileAttributes::LONG_NAME => {
                DirRecord::LongName(LongNameFragment::parse(record))
            }
            _ => DirRecord::Entry(ShortEntry::parse(record)),
        }
    }
}

/// A live directory entry with its long name, if any
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub short_name: String,
    pub long_name: Option<String>,
    pub attributes: FileAttributes,
    pub start_cluster: u32,
    pub file_size: u32,
    pub created: Option<NaiveDateTime>,
    pub modified: Option<NaiveDateTime>,
    pub accessed: Option<NaiveDate>,
}

impl DirEntry {
    fn from_short(entry: &ShortEntry, long_name: Option<String>) -> Self {
        DirEntry {
            short_name: entry.short_name(),
            long_name,
            attributes: entry.attributes,
            start_cluster: entry.start_cluster,
            file_size: entry.file_size,
            created: parse_creation_time(entry.creation_date, entry.creation_time, entry.creation_tenths),
            modified: parse_datetime(entry.write_date, entry.write_time),
            accessed: parse_date(entry.access_date),
        }
    }

    /// Long name when present, otherwise the 8.3 name
    pub fn name(&self) -> &str {
        self.long_name.as_deref().unwrap_or(&self.short_name)
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.is_directory()
    }

    /// Volume label records live in the root directory but name no file
    pub fn is_volume_label(&self) -> bool {
        self.attributes.is_volume_id() && !self.attributes.is_directory()
    }

    pub fn is_dot_entry(&self) -> bool {
        self.short_name == "." || self.short_name == ".."
    }
}

/// Lazy iterator over the live entries of one directory.
/// Finite and not restartable: open a new one to list again.
pub struct DirectoryEntries<'a, S: BlockSource + ?Sized> {
    reader: ChainReader<'a, S>,
    long_name: LongNameAccumulator,
    policy: LongNamePolicy,
    done: bool,
}

impl<'a, S: BlockSource + ?Sized> DirectoryEntries<'a, S> {
    /// `reader` must be positioned at the directory's first cluster
    pub fn new(reader: ChainReader<'a, S>, policy: LongNamePolicy) -> Self {
        Self {
            reader,
            long_name: LongNameAccumulator::new(),
            policy,
            done: false,
        }
    }

    /// Next live entry, or None once the terminator (or end of chain) is reached
    pub fn next_entry(&mut self) -> FatResult<Option<DirEntry>> {
        if self.done {
            return Ok(None);
        }

        loop {
            let mut record = [0u8; DIR_ENTRY_SIZE];
            match self.reader.read_into(&mut record) {
                Ok(()) => {}
                // A directory filling its last cluster has no terminator record
                Err(FatError::EndOfChain) => {
                    self.done = true;
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }

            match DirRecord::parse(&record) {
                DirRecord::EndOfDirectory => {
                    self.done = true;
                    return Ok(None);
                }
                DirRecord::Deleted => continue,
                DirRecord::LongName(fragment) => self.long_name.push(&fragment),
                DirRecord::Entry(entry) => {
                    let long_name = self.long_name.take(&entry.name, self.policy)?;
                    return Ok(Some(DirEntry::from_short(&entry, long_name)));
                }
            }
        }
    }
}

impl<'a, S: BlockSource + ?Sized> Iterator for DirectoryEntries<'a, S> {
    type Item = FatResult<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
