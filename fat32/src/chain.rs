// Cluster chain traversal
// A ChainReader turns one FAT chain into a byte stream. Each physical read stays
// inside the current cluster; finishing a cluster pulls the next link from the FAT.

use crate::cluster::{cluster_to_offset, read_fat_entry, FatEntry};
use crate::geometry::VolumeGeometry;
use fatscope_core::{BlockSource, FatError, FatResult};
use log::debug;

fn check_cluster(geometry: &VolumeGeometry, cluster: u32) -> FatResult<()> {
    if !geometry.is_valid_cluster(cluster) {
        return Err(FatError::CorruptChain(format!(
            "cluster {} is outside the data region (2..={})",
            cluster,
            geometry.max_cluster()
        )));
    }
    Ok(())
}

/// Decide where a chain goes after `cluster`, enforcing the cycle guards.
/// `visited` counts the clusters already in the chain, including `cluster`.
fn follow_link(
    geometry: &VolumeGeometry,
    first: u32,
    cluster: u32,
    entry: FatEntry,
    visited: u32,
    max_clusters: u32,
) -> FatResult<Option<u32>> {
    match entry {
        FatEntry::EndOfChain => Ok(None),
        FatEntry::Next(next) => {
            if next == first || next == cluster {
                return Err(FatError::CorruptChain(format!(
                    "chain starting at cluster {} loops back to cluster {}",
                    first, next
                )));
            }
            check_cluster(geometry, next)?;
            if visited >= max_clusters {
                return Err(FatError::CorruptChain(format!(
                    "chain starting at cluster {} exceeds {} clusters",
                    first, max_clusters
                )));
            }
            Ok(Some(next))
        }
        other => Err(FatError::CorruptChain(format!(
            "cluster {} links to a {:?} FAT entry",
            cluster, other
        ))),
    }
}

/// Cursor over one cluster chain
pub struct ChainReader<'a, S: BlockSource + ?Sized> {
    source: &'a S,
    geometry: &'a VolumeGeometry,
    first_cluster: u32,
    /// None once the FAT reported end of chain
    current: Option<u32>,
    position: u64,
    clusters_visited: u32,
    max_clusters: u32,
    fat_lookups: u32,
}

impl<'a, S: BlockSource + ?Sized> ChainReader<'a, S> {
    /// Position a reader at the start of the chain beginning at `start_cluster`
    pub fn new(source: &'a S, geometry: &'a VolumeGeometry, start_cluster: u32) -> FatResult<Self> {
        Self::with_limit(source, geometry, start_cluster, geometry.cluster_count)
    }

    /// Like `new`, but reject chains longer than `max_clusters`
    pub fn with_limit(
        source: &'a S,
        geometry: &'a VolumeGeometry,
        start_cluster: u32,
        max_clusters: u32,
    ) -> FatResult<Self> {
        check_cluster(geometry, start_cluster)?;
        debug!("Opening cluster chain at cluster {}", start_cluster);

        Ok(Self {
            source,
            geometry,
            first_cluster: start_cluster,
            current: Some(start_cluster),
            position: cluster_to_offset(geometry, start_cluster),
            clusters_visited: 1,
            max_clusters: max_clusters.max(1),
            fat_lookups: 0,
        })
    }

    pub fn first_cluster(&self) -> u32 {
        self.first_cluster
    }

    pub fn current_cluster(&self) -> Option<u32> {
        self.current
    }

    /// Absolute byte offset of the next read
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn fat_lookups(&self) -> u32 {
        self.fat_lookups
    }

    pub fn is_exhausted(&self) -> bool {
        self.current.is_none()
    }

    /// Bytes left before the current cluster boundary (0 once the chain ended)
    pub fn remaining_in_cluster(&self) -> usize {
        match self.current {
            Some(cluster) => {
                let used = self.position - cluster_to_offset(self.geometry, cluster);
                (self.geometry.cluster_size() as u64 - used) as usize
            }
            None => 0,
        }
    }

    /// Fill `buf` from the chain. The read must fit in the current cluster.
    pub fn read_into(&mut self, buf: &mut [u8]) -> FatResult<()> {
        let cluster = self.current.ok_or(FatError::EndOfChain)?;
        let cluster_size = self.geometry.cluster_size();
        let cluster_offset = (self.position - cluster_to_offset(self.geometry, cluster)) as u32;

        if cluster_offset as u64 + buf.len() as u64 > cluster_size as u64 {
            return Err(FatError::CrossesUnmappedBoundary {
                offset: cluster_offset,
                len: buf.len(),
                cluster_size,
            });
        }
        if buf.is_empty() {
            return Ok(());
        }

        self.source.read_exact_at(self.position, buf)?;
        self.position += buf.len() as u64;

        if cluster_offset as u64 + buf.len() as u64 == cluster_size as u64 {
            self.advance(cluster)?;
        }
        Ok(())
    }

    /// Read exactly `len` bytes from the current cluster
    pub fn read_exact(&mut self, len: usize) -> FatResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(&mut buf)?;
        Ok(buf)
    }

    fn advance(&mut self, cluster: u32) -> FatResult<()> {
        self.fat_lookups += 1;
        let entry = read_fat_entry(self.source, self.geometry, cluster)?;

        match follow_link(
            self.geometry,
            self.first_cluster,
            cluster,
            entry,
            self.clusters_visited,
            self.max_clusters,
        )? {
            Some(next) => {
                self.clusters_visited += 1;
                self.current = Some(next);
                self.position = cluster_to_offset(self.geometry, next);
            }
            None => {
                debug!(
                    "Chain starting at cluster {} ended after {} clusters",
                    self.first_cluster, self.clusters_visited
                );
                self.current = None;
            }
        }
        Ok(())
    }
}

/// Collect the cluster numbers of a whole chain
pub fn collect_chain<S: BlockSource + ?Sized>(
    source: &S,
    geometry: &VolumeGeometry,
    start_cluster: u32,
    max_clusters: u32,
) -> FatResult<Vec<u32>> {
    check_cluster(geometry, start_cluster)?;
    let max_clusters = max_clusters.max(1);

    let mut chain = vec![start_cluster];
    let mut current = start_cluster;
    loop {
        let entry = read_fat_entry(source, geometry, current)?;
        match follow_link(geometry, start_cluster, current, entry, chain.len() as u32, max_clusters)? {
            Some(next) => {
                chain.push(next);
                current = next;
            }
            None => return Ok(chain),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{pattern, TestImage};

    fn open(image: &TestImage) -> (Vec<u8>, VolumeGeometry) {
        let geometry = VolumeGeometry::derive(&image.bytes()[..512], 0).unwrap();
        (image.bytes().to_vec(), geometry)
    }

    #[test]
    fn test_reads_across_clusters_as_one_stream() {
        let mut image = TestImage::new(1);
        let data = pattern(512 * 3);
        let first = image.add_file(&data);
        let (source, geometry) = open(&image);

        let mut reader = ChainReader::new(&source, &geometry, first).unwrap();
        let mut collected = Vec::new();
        for _ in 0..(512 * 3 / 64) {
            collected.extend(reader.read_exact(64).unwrap());
        }

        assert_eq!(collected, data);
        assert_eq!(reader.fat_lookups(), 3);
        assert!(reader.is_exhausted());
        assert!(matches!(reader.read_exact(32), Err(FatError::EndOfChain)));
    }

    #[test]
    fn test_follows_non_contiguous_chain() {
        let mut image = TestImage::new(1);
        let a = image.reserve();
        let _gap = image.reserve();
        let b = image.reserve();
        image.link(&[b, a]);
        image.write_chain(&[b, a], &[[1u8; 512], [2u8; 512]].concat());
        let (source, geometry) = open(&image);

        let mut reader = ChainReader::new(&source, &geometry, b).unwrap();
        assert_eq!(reader.read_exact(512).unwrap(), vec![1u8; 512]);
        assert_eq!(reader.current_cluster(), Some(a));
        assert_eq!(reader.read_exact(512).unwrap(), vec![2u8; 512]);
        assert_eq!(reader.current_cluster(), None);
    }

    #[test]
    fn test_rejects_read_crossing_cluster_boundary() {
        let mut image = TestImage::new(1);
        let first = image.add_file(&pattern(1024));
        let (source, geometry) = open(&image);

        let mut reader = ChainReader::new(&source, &geometry, first).unwrap();
        reader.read_exact(500).unwrap();
        let err = reader.read_exact(20).unwrap_err();
        assert!(matches!(
            err,
            FatError::CrossesUnmappedBoundary { offset: 500, len: 20, cluster_size: 512 }
        ));
        // A failed read leaves the cursor where it was
        assert_eq!(reader.remaining_in_cluster(), 12);
        assert_eq!(reader.read_exact(12).unwrap(), pattern(512)[500..].to_vec());
    }

    #[test]
    fn test_detects_loop_back_to_first_cluster() {
        let mut image = TestImage::new(1);
        let chain = image.allocate(3);
        image.set_fat(chain[2], chain[0]);
        let (source, geometry) = open(&image);

        let mut reader = ChainReader::new(&source, &geometry, chain[0]).unwrap();
        reader.read_exact(512).unwrap();
        reader.read_exact(512).unwrap();
        let err = reader.read_exact(512).unwrap_err();
        assert!(matches!(err, FatError::CorruptChain(_)));
    }

    #[test]
    fn test_inner_cycle_is_bounded() {
        let mut image = TestImage::new(1);
        let chain = image.allocate(3);
        // 0 -> 1 -> 2 -> 1 never returns to the first cluster
        image.set_fat(chain[2], chain[1]);
        let (source, geometry) = open(&image);

        let mut reader = ChainReader::with_limit(&source, &geometry, chain[0], 10).unwrap();
        let mut result = Ok(());
        for _ in 0..20 {
            result = reader.read_into(&mut [0u8; 512]);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(FatError::CorruptChain(_))));
        assert!(reader.fat_lookups() <= 10);
    }

    #[test]
    fn test_link_to_free_cluster_is_corrupt() {
        let mut image = TestImage::new(1);
        let chain = image.allocate(1);
        image.set_fat(chain[0], 0);
        let (source, geometry) = open(&image);

        let mut reader = ChainReader::new(&source, &geometry, chain[0]).unwrap();
        assert!(matches!(reader.read_exact(512), Err(FatError::CorruptChain(_))));
    }

    #[test]
    fn test_invalid_start_cluster() {
        let image = TestImage::new(1);
        let (source, geometry) = open(&image);
        assert!(matches!(
            ChainReader::new(&source, &geometry, 0),
            Err(FatError::CorruptChain(_))
        ));
        assert!(matches!(
            ChainReader::new(&source, &geometry, geometry.max_cluster() + 1),
            Err(FatError::CorruptChain(_))
        ));
    }

    #[test]
    fn test_truncated_source_is_short_read() {
        let mut image = TestImage::new(1);
        let first = image.add_file(&pattern(512));
        let geometry = VolumeGeometry::derive(&image.bytes()[..512], 0).unwrap();
        let cut = image.cluster_offset(first) + 100;
        let source = image.bytes()[..cut].to_vec();

        let mut reader = ChainReader::new(&source, &geometry, first).unwrap();
        assert!(matches!(
            reader.read_exact(200),
            Err(FatError::ShortRead { expected: 200, actual: 100, .. })
        ));
    }

    #[test]
    fn test_collect_chain() {
        let mut image = TestImage::new(2);
        let chain = image.allocate(4);
        let (source, geometry) = open(&image);

        assert_eq!(collect_chain(&source, &geometry, chain[0], 100).unwrap(), chain);
        assert!(matches!(
            collect_chain(&source, &geometry, chain[0], 2),
            Err(FatError::CorruptChain(_))
        ));
    }
}
