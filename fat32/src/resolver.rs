// FAT32 path resolution
// Walks a slash-separated path from the root directory one component at a time,
// opening a fresh chain reader for every directory it descends into.

use crate::chain::ChainReader;
use crate::directory::{DirEntry, DirectoryEntries, FileAttributes};
use crate::geometry::VolumeGeometry;
use chrono::NaiveDateTime;
use fatscope_core::{BlockSource, FatError, FatResult, ReaderOptions};
use log::debug;
use serde::Serialize;

/// Result of resolving a path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedEntry {
    /// Long name if the entry has one, otherwise the 8.3 name; empty for the root
    pub name: String,
    pub short_name: String,
    pub attributes: FileAttributes,
    pub start_cluster: u32,
    pub file_size: u32,
    pub modified: Option<NaiveDateTime>,
    /// Set only on the synthetic root, which has no record of its own
    #[serde(skip)]
    root: bool,
}

impl ResolvedEntry {
    /// The root directory has no record of its own
    pub fn root(geometry: &VolumeGeometry) -> Self {
        ResolvedEntry {
            name: String::new(),
            short_name: String::new(),
            attributes: FileAttributes(FileAttributes::DIRECTORY),
            start_cluster: geometry.root_dir_first_cluster,
            file_size: 0,
            modified: None,
            root: true,
        }
    }

    pub fn from_dir_entry(entry: &DirEntry, geometry: &VolumeGeometry) -> Self {
        // ".." in a first-level directory stores cluster 0 for the root.
        // Any other record with cluster 0 keeps it and fails when opened.
        let points_to_root = entry.is_directory() && entry.start_cluster == 0 && entry.short_name == "..";
        let start_cluster = if points_to_root {
            geometry.root_dir_first_cluster
        } else {
            entry.start_cluster
        };

        ResolvedEntry {
            name: entry.name().to_string(),
            short_name: entry.short_name.clone(),
            attributes: entry.attributes,
            start_cluster,
            file_size: entry.file_size,
            modified: entry.modified,
            root: false,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.is_directory()
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Name for messages; the root prints as "/"
    pub fn display_name(&self) -> &str {
        if self.is_root() {
            "/"
        } else {
            &self.name
        }
    }
}

/// Non-empty components of a slash-separated path
pub fn path_components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|component| !component.is_empty())
}

/// Case-insensitive name comparison (full Unicode lowercase folding)
pub fn names_match(name: &str, wanted: &str) -> bool {
    if name.is_ascii() && wanted.is_ascii() {
        return name.eq_ignore_ascii_case(wanted);
    }
    name.chars()
        .flat_map(char::to_lowercase)
        .eq(wanted.chars().flat_map(char::to_lowercase))
}

/// Short name first, then long name
fn entry_matches(entry: &DirEntry, component: &str) -> bool {
    names_match(&entry.short_name, component)
        || entry
            .long_name
            .as_deref()
            .is_some_and(|long| names_match(long, component))
}

pub struct PathResolver<'a, S: BlockSource + ?Sized> {
    source: &'a S,
    geometry: &'a VolumeGeometry,
    options: &'a ReaderOptions,
}

impl<'a, S: BlockSource + ?Sized> PathResolver<'a, S> {
    pub fn new(source: &'a S, geometry: &'a VolumeGeometry, options: &'a ReaderOptions) -> Self {
        Self {
            source,
            geometry,
            options,
        }
    }

    pub fn root(&self) -> ResolvedEntry {
        ResolvedEntry::root(self.geometry)
    }

    /// Chain length bound for every chain this resolver opens
    pub fn chain_limit(&self) -> u32 {
        self.options
            .max_chain_clusters
            .unwrap_or(self.geometry.cluster_count)
    }

    /// Open a chain reader over the clusters of `entry`
    pub fn open_chain(&self, entry: &ResolvedEntry) -> FatResult<ChainReader<'a, S>> {
        ChainReader::with_limit(self.source, self.geometry, entry.start_cluster, self.chain_limit())
    }

    /// Lazily list the entries of a directory in on-disk order
    pub fn entries(&self, dir: &ResolvedEntry) -> FatResult<DirectoryEntries<'a, S>> {
        if !dir.is_directory() {
            return Err(FatError::NotADirectory(dir.display_name().to_string()));
        }
        let reader = self.open_chain(dir)?;
        Ok(DirectoryEntries::new(reader, self.options.long_names))
    }

    /// Find `component` among the entries of `dir`
    pub fn lookup(&self, dir: &ResolvedEntry, component: &str) -> FatResult<Option<DirEntry>> {
        for entry in self.entries(dir)? {
            let entry = entry?;
            if entry.is_volume_label() {
                continue;
            }
            if entry_matches(&entry, component) {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Resolve `path` from the root. "" and "/" give the root without any I/O.
    pub fn resolve(&self, path: &str) -> FatResult<ResolvedEntry> {
        let mut current = self.root();
        let mut current_component = "/";

        for component in path_components(path) {
            if !current.is_directory() {
                return Err(FatError::NotADirectory(current_component.to_string()));
            }

            debug!(
                "Resolving '{}' in directory at cluster {}",
                component, current.start_cluster
            );
            let found = self
                .lookup(&current, component)?
                .ok_or_else(|| FatError::NotFound(component.to_string()))?;

            current = ResolvedEntry::from_dir_entry(&found, self.geometry);
            current_component = component;
        }

        Ok(current)
    }
}
