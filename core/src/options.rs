use crate::error::{FatError, FatResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How strictly VFAT long-name fragment runs are checked
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LongNamePolicy {
    /// Use whatever the fragments assembled, gaps and all
    #[default]
    Lenient,
    /// Reject non-contiguous runs, missing terminal fragments and checksum mismatches
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ReaderOptions {
    pub long_names: LongNamePolicy,
    /// Upper bound on clusters in any one chain; defaults to the volume's cluster count
    pub max_chain_clusters: Option<u32>,
}

impl ReaderOptions {
    pub fn strict() -> Self {
        Self {
            long_names: LongNamePolicy::Strict,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> FatResult<Self> {
        let options: ReaderOptions = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> FatResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            FatError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> FatResult<()> {
        if self.max_chain_clusters == Some(0) {
            return Err(FatError::Configuration(
                "max_chain_clusters must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
