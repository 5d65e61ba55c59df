// Read-only FAT32 volume
// Owns the block source together with the geometry derived from it, and hands
// out path resolution, directory listings and file streams.

use crate::chain::{collect_chain, ChainReader};
use crate::directory::DirectoryEntries;
use crate::geometry::VolumeGeometry;
use crate::partition::PartitionTable;
use crate::resolver::{PathResolver, ResolvedEntry};
use fatscope_core::{BlockSource, FatError, FatResult, ReaderOptions};
use log::{debug, info};
use std::io;

pub struct Fat32Volume<S: BlockSource> {
    source: S,
    geometry: VolumeGeometry,
    options: ReaderOptions,
}

impl<S: BlockSource> Fat32Volume<S> {
    /// Open the volume whose boot sector sits at `start_lba` (0 for an unpartitioned image)
    pub fn open(source: S, start_lba: u64) -> FatResult<Self> {
        Self::open_with_options(source, start_lba, ReaderOptions::default())
    }

    pub fn open_with_options(source: S, start_lba: u64, options: ReaderOptions) -> FatResult<Self> {
        options.validate()?;
        let geometry = VolumeGeometry::read(&source, start_lba)?;
        Ok(Self {
            source,
            geometry,
            options,
        })
    }

    /// Locate a FAT32 partition through the MBR, then open it
    pub fn open_partition(source: S, slot: Option<usize>, options: ReaderOptions) -> FatResult<Self> {
        let start_lba = {
            let table = PartitionTable::read(&source)?;
            let entry = table.find_fat32(slot)?;
            info!(
                "Using partition {} ({}) at LBA {}",
                entry.slot,
                entry.type_name(),
                entry.lba_start
            );
            entry.lba_start as u64
        };
        Self::open_with_options(source, start_lba, options)
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    fn resolver(&self) -> PathResolver<'_, S> {
        PathResolver::new(&self.source, &self.geometry, &self.options)
    }

    pub fn root(&self) -> ResolvedEntry {
        ResolvedEntry::root(&self.geometry)
    }

    pub fn resolve(&self, path: &str) -> FatResult<ResolvedEntry> {
        self.resolver().resolve(path)
    }

    /// Lazily list a resolved directory
    pub fn list(&self, dir: &ResolvedEntry) -> FatResult<DirectoryEntries<'_, S>> {
        self.resolver().entries(dir)
    }

    pub fn list_path(&self, path: &str) -> FatResult<DirectoryEntries<'_, S>> {
        let dir = self.resolve(path)?;
        self.list(&dir)
    }

    /// Stream the content of a regular file
    pub fn open_file(&self, entry: &ResolvedEntry) -> FatResult<FileStream<'_, S>> {
        if entry.is_directory() {
            return Err(FatError::IsADirectory(entry.display_name().to_string()));
        }

        let reader = if entry.start_cluster == 0 {
            if entry.file_size > 0 {
                return Err(FatError::CorruptChain(format!(
                    "'{}' declares {} bytes but has no clusters",
                    entry.name, entry.file_size
                )));
            }
            None
        } else {
            Some(self.resolver().open_chain(entry)?)
        };

        debug!(
            "Opening '{}' ({} bytes from cluster {})",
            entry.name, entry.file_size, entry.start_cluster
        );
        Ok(FileStream {
            reader,
            declared: entry.file_size,
            delivered: 0,
        })
    }

    pub fn open_path(&self, path: &str) -> FatResult<FileStream<'_, S>> {
        let entry = self.resolve(path)?;
        self.open_file(&entry)
    }

    /// Read a whole file into memory
    pub fn read_file(&self, path: &str) -> FatResult<Vec<u8>> {
        let entry = self.resolve(path)?;
        let mut stream = self.open_file(&entry)?;
        let mut content = Vec::with_capacity(entry.file_size as usize);
        while let Some(chunk) = stream.read_chunk()? {
            content.extend_from_slice(&chunk);
        }
        Ok(content)
    }

    /// Cluster numbers occupied by an entry (empty for an empty file)
    pub fn cluster_chain(&self, entry: &ResolvedEntry) -> FatResult<Vec<u32>> {
        if entry.start_cluster == 0 && !entry.is_directory() {
            return Ok(Vec::new());
        }
        let limit = self.resolver().chain_limit();
        collect_chain(&self.source, &self.geometry, entry.start_cluster, limit)
    }
}

/// Sequential reader over one file's content.
/// Reads never cross a cluster boundary and stop at the declared file size.
pub struct FileStream<'a, S: BlockSource + ?Sized> {
    reader: Option<ChainReader<'a, S>>,
    declared: u32,
    delivered: u64,
}

impl<'a, S: BlockSource + ?Sized> FileStream<'a, S> {
    /// Declared file size
    pub fn len(&self) -> u64 {
        self.declared as u64
    }

    pub fn is_empty(&self) -> bool {
        self.declared == 0
    }

    pub fn remaining(&self) -> u64 {
        self.len() - self.delivered
    }

    pub fn fat_lookups(&self) -> u32 {
        self.reader.as_ref().map_or(0, |reader| reader.fat_lookups())
    }

    /// Largest read that stays within the current cluster and the file
    fn next_read_len(&self, reader: &ChainReader<'a, S>, limit: usize) -> usize {
        let remaining = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        reader.remaining_in_cluster().min(remaining).min(limit)
    }

    /// Read into `buf`; returns 0 once the whole file was delivered
    pub fn read_into(&mut self, buf: &mut [u8]) -> FatResult<usize> {
        if self.remaining() == 0 || buf.is_empty() {
            return Ok(0);
        }
        let declared = self.declared;
        let delivered = self.delivered;

        let Some(reader) = self.reader.as_mut() else {
            return Err(FatError::TruncatedFile { declared, delivered });
        };
        if reader.is_exhausted() {
            return Err(FatError::TruncatedFile { declared, delivered });
        }

        let remaining = usize::try_from(declared as u64 - delivered).unwrap_or(usize::MAX);
        let len = reader.remaining_in_cluster().min(remaining).min(buf.len());
        reader.read_into(&mut buf[..len])?;
        self.delivered += len as u64;
        Ok(len)
    }

    /// Next piece of the file, at most one cluster long; None at end of file
    pub fn read_chunk(&mut self) -> FatResult<Option<Vec<u8>>> {
        let len = match &self.reader {
            Some(reader) if self.remaining() > 0 => self.next_read_len(reader, usize::MAX),
            _ => 0,
        };
        if self.remaining() > 0 && len == 0 {
            return Err(FatError::TruncatedFile {
                declared: self.declared,
                delivered: self.delivered,
            });
        }
        if len == 0 {
            return Ok(None);
        }

        let mut chunk = vec![0u8; len];
        let read = self.read_into(&mut chunk)?;
        chunk.truncate(read);
        Ok(Some(chunk))
    }
}

impl<'a, S: BlockSource + ?Sized> io::Read for FileStream<'a, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_into(buf).map_err(|e| match e {
            FatError::IoError(inner) => inner,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        })
    }
}
