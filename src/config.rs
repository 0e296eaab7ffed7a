use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::MergeError;
use crate::overlap_graph::EdgePolicy;

/// Merge pipeline configuration, loaded from a JSON file. Every field has
/// a default, so a config file only needs to state what it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Directory of per-block volumes and metadata from the segmentation step.
    pub store_dir: PathBuf,
    /// Directory for merge state: the persisted pool and the progress ledger.
    pub merge_dir: PathBuf,
    /// Directory of the chunked global output volume.
    pub output_dir: PathBuf,
    /// Edge acceptance thresholds for the overlap scan.
    pub edges: EdgePolicy,
    /// Worker threads for the pools-phase pair scan. 0 means one per core.
    pub workers: usize,
    /// Chunk size of the output volume.
    pub output_chunk_zyx: (u32, u32, u32),
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("./merge_state/blocks"),
            merge_dir: PathBuf::from("./merge_state/merge"),
            output_dir: PathBuf::from("./merge_state/output"),
            edges: EdgePolicy::default(),
            workers: 0,
            output_chunk_zyx: (64, 64, 64),
        }
    }
}

impl MergeConfig {
    pub fn load(path: &Path) -> Result<Self, MergeError> {
        if !path.exists() {
            return Err(MergeError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let raw = fs::read_to_string(path).map_err(MergeError::Io)?;
        let config: MergeConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, MergeError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), MergeError> {
        let (cz, cy, cx) = self.output_chunk_zyx;
        if cz == 0 || cy == 0 || cx == 0 {
            return Err(MergeError::Config("output_chunk_zyx must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&self.edges.min_frac_local)
            || !(0.0..=1.0).contains(&self.edges.min_frac_global)
        {
            return Err(MergeError::Config(
                "Edge fraction floors must lie in [0, 1]".into(),
            ));
        }
        Ok(())
    }

    pub fn pool_path(&self) -> PathBuf {
        self.merge_dir.join("pool.bin")
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.merge_dir.join("ledger")
    }
}
