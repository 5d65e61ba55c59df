// FAT32 read-only traversal

pub mod chain;
pub mod cluster;
pub mod directory;
pub mod geometry;
pub mod long_names;
pub mod partition;
pub mod resolver;
pub mod timestamps;
pub mod volume;

#[cfg(test)]
mod test_helpers;

pub use chain::{collect_chain, ChainReader};
pub use cluster::FatEntry;
pub use directory::{DirEntry, DirectoryEntries, FileAttributes};
pub use geometry::VolumeGeometry;
pub use partition::{PartitionEntry, PartitionTable};
pub use resolver::{PathResolver, ResolvedEntry};
pub use volume::{Fat32Volume, FileStream};

pub use fatscope_core::{BlockSource, FatError, FatResult, FileBlockSource, LongNamePolicy, ReaderOptions};
