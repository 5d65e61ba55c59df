use thiserror::Error;

pub type FatResult<T> = Result<T, FatError>;

#[derive(Debug, Error)]
pub enum FatError {
    #[error("Invalid boot signature: expected 0xAA55, found {0:#06x}")]
    BadSignature(u16),

    #[error("Unsupported layout: {0}")]
    UnsupportedLayout(String),

    #[error("Read of {len} bytes at offset {offset} into a {cluster_size}-byte cluster crosses the cluster boundary")]
    CrossesUnmappedBoundary {
        offset: u32,
        len: usize,
        cluster_size: u32,
    },

    #[error("End of cluster chain")]
    EndOfChain,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    #[error("Corrupt cluster chain: {0}")]
    CorruptChain(String),

    #[error("Cluster chain ended after {delivered} of {declared} declared bytes")]
    TruncatedFile {
        declared: u32,
        delivered: u64,
    },

    #[error("Malformed long name: {0}")]
    MalformedLongName(String),

    #[error("No usable partition: {0}")]
    NoPartition(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl FatError {
    /// Volume-level errors abort every traversal on the volume
    pub fn is_volume_fatal(&self) -> bool {
        matches!(self, FatError::BadSignature(_) | FatError::UnsupportedLayout(_))
    }

    /// Errors that mean the on-disk structures cannot be trusted
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            FatError::CorruptChain(_) | FatError::TruncatedFile { .. } | FatError::MalformedLongName(_)
        )
    }
}
