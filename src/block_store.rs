use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::MergeError;
use crate::geometry::{BlockBox, BlockIndex};
use crate::volume::LabelVolume;

/// Metadata describing one segmented block, as emitted by the external
/// segmentation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub index: BlockIndex,
    pub coords: BlockBox,
    /// Volume file name relative to the store directory.
    pub volume: String,
    pub done: bool,
    pub max_label: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreIndex {
    blocks: Vec<BlockMeta>,
}

/// Read-only view over the per-block outputs an external segmentation step
/// leaves in one directory: `block_{index:04}.json` metadata files, an
/// `index.json` rollup, and bincode label volumes.
///
/// Blocks may arrive in any order, and a partial store is valid; listing
/// only reports blocks whose metadata is marked done.
pub struct BlockStore {
    dir: PathBuf,
}

impl BlockStore {
    pub fn open(dir: &Path) -> Self {
        Self { dir: dir.to_path_buf() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn meta_path(&self, index: BlockIndex) -> PathBuf {
        self.dir.join(format!("block_{:04}.json", index))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.json")
    }

    /// All completed blocks, sorted by block index.
    pub fn list_done(&self) -> Result<Vec<BlockMeta>, MergeError> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path).map_err(MergeError::Io)?;
        let index: StoreIndex = serde_json::from_str(&raw)?;
        let mut done: Vec<BlockMeta> = index.blocks.into_iter().filter(|b| b.done).collect();
        done.sort_by_key(|b| b.index);
        Ok(done)
    }

    pub fn meta(&self, index: BlockIndex) -> Result<BlockMeta, MergeError> {
        let path = self.meta_path(index);
        if !path.exists() {
            return Err(MergeError::NotFound(index));
        }
        let raw = fs::read_to_string(&path).map_err(MergeError::Io)?;
        let meta: BlockMeta = serde_json::from_str(&raw)?;
        Ok(meta)
    }

    pub fn load_volume(&self, meta: &BlockMeta) -> Result<LabelVolume, MergeError> {
        let path = self.dir.join(&meta.volume);
        if !path.exists() {
            return Err(MergeError::NotFound(meta.index));
        }
        LabelVolume::load(&path)
    }

    /// Extract the part of a block's volume covering `region`.
    pub fn read_region(&self, meta: &BlockMeta, region: &BlockBox) -> Result<LabelVolume, MergeError> {
        let volume = self.load_volume(meta)?;
        volume.read_region(region)
    }

    /// Record a completed block: write its volume, its metadata file, and
    /// fold the metadata into `index.json`. This is the publishing side of
    /// the store contract, called by segmentation workers and tests; the
    /// merge pipeline itself only reads.
    pub fn publish_block(&self, index: BlockIndex, volume: &LabelVolume) -> Result<BlockMeta, MergeError> {
        fs::create_dir_all(&self.dir).map_err(MergeError::Io)?;

        let volume_name = format!("block_{:04}.vol", index);
        volume.save(&self.dir.join(&volume_name))?;

        let meta = BlockMeta {
            index,
            coords: volume.bounds,
            volume: volume_name,
            done: true,
            max_label: volume.max_label(),
        };
        fs::write(self.meta_path(index), serde_json::to_string_pretty(&meta)?)
            .map_err(MergeError::Io)?;

        // Update or append within the rollup.
        let mut store_index = if self.index_path().exists() {
            let raw = fs::read_to_string(self.index_path()).map_err(MergeError::Io)?;
            serde_json::from_str::<StoreIndex>(&raw)?
        } else {
            StoreIndex::default()
        };
        match store_index.blocks.iter_mut().find(|b| b.index == index) {
            Some(existing) => *existing = meta.clone(),
            None => store_index.blocks.push(meta.clone()),
        }
        fs::write(self.index_path(), serde_json::to_string_pretty(&store_index)?)
            .map_err(MergeError::Io)?;

        Ok(meta)
    }
}
