use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use bincode::{Decode, Encode};

use crate::MergeError;
use crate::block_store::BlockMeta;
use crate::geometry::BlockIndex;

/// Canonical cross-block segment identifier. 0 is background.
pub type GlobalId = u64;

/// One block's slice of the global label range, plus the max local label
/// observed when the pool was built (the staleness fingerprint).
#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct BlockRange {
    pub index: BlockIndex,
    pub offset: GlobalId,
    pub max_label: u32,
}

/// The persisted local-to-global mapping.
///
/// Local labels are lifted into a single global space by per-block offsets
/// (prefix sums of each block's max label, in block-index order, starting
/// at 1), making every block's label range disjoint. `reps` carries the
/// non-identity part of the representative map for merged classes, sorted
/// by key; labels absent from it are singletons and map through the offset
/// alone. Both vectors are sorted, so identical inputs serialize to
/// identical bytes.
#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct IdPool {
    pub ranges: Vec<BlockRange>,
    pub next_gid: GlobalId,
    pub reps: Vec<(GlobalId, GlobalId)>,
}

/// Assign each done block a starting offset in the global label space.
/// Offsets are prefix sums of max labels in block-index order; `blocks`
/// must already be index-sorted (as `BlockStore::list_done` returns them).
pub fn compute_offsets(blocks: &[BlockMeta]) -> (Vec<BlockRange>, GlobalId) {
    let mut ranges = Vec::with_capacity(blocks.len());
    let mut cur: GlobalId = 1;
    for meta in blocks {
        ranges.push(BlockRange {
            index: meta.index,
            offset: cur,
            max_label: meta.max_label,
        });
        cur += meta.max_label as GlobalId;
    }
    (ranges, cur)
}

impl IdPool {
    pub fn new(ranges: Vec<BlockRange>, next_gid: GlobalId, mut reps: Vec<(GlobalId, GlobalId)>) -> Self {
        reps.sort_unstable();
        Self { ranges, next_gid, reps }
    }

    pub fn range_of(&self, index: BlockIndex) -> Option<&BlockRange> {
        self.ranges
            .binary_search_by_key(&index, |r| r.index)
            .ok()
            .map(|i| &self.ranges[i])
    }

    /// Lift a block-local label into the offset global space. Fails with
    /// StalePool when the pool predates the block or the label is outside
    /// the fingerprinted range.
    pub fn offset_label(&self, block: BlockIndex, label: u32) -> Result<GlobalId, MergeError> {
        if label == 0 {
            return Ok(0);
        }
        let range = self
            .range_of(block)
            .ok_or(MergeError::StalePool { block, label })?;
        if label > range.max_label {
            return Err(MergeError::StalePool { block, label });
        }
        Ok(range.offset + label as GlobalId)
    }

    /// Representative of an offset global label; identity for singletons.
    pub fn rep_of(&self, gid: GlobalId) -> GlobalId {
        match self.reps.binary_search_by_key(&gid, |&(k, _)| k) {
            Ok(i) => self.reps[i].1,
            Err(_) => gid,
        }
    }

    /// Full resolution: block-local label to canonical GlobalID.
    pub fn resolve(&self, block: BlockIndex, label: u32) -> Result<GlobalId, MergeError> {
        Ok(self.rep_of(self.offset_label(block, label)?))
    }

    /// Check a block's current metadata against the pool fingerprint.
    pub fn covers(&self, meta: &BlockMeta) -> Result<(), MergeError> {
        let range = self.range_of(meta.index).ok_or(MergeError::StalePool {
            block: meta.index,
            label: meta.max_label,
        })?;
        if meta.max_label > range.max_label {
            return Err(MergeError::StalePool {
                block: meta.index,
                label: meta.max_label,
            });
        }
        Ok(())
    }

    /// Persist atomically: write to a temp file, then rename over the
    /// target so a crash never leaves a half-written pool.
    pub fn save(&self, path: &Path) -> Result<(), MergeError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(MergeError::Io)?;
        }
        let tmp = path.with_extension("tmp");
        {
            let file = File::create(&tmp).map_err(MergeError::Io)?;
            let mut writer = BufWriter::new(file);
            bincode::encode_into_std_write(self, &mut writer, bincode::config::standard())?;
            writer.flush().map_err(MergeError::Io)?;
        }
        fs::rename(&tmp, path).map_err(MergeError::Io)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, MergeError> {
        let file = File::open(path).map_err(MergeError::Io)?;
        let mut reader = BufReader::new(file);
        let pool = bincode::decode_from_std_read(&mut reader, bincode::config::standard())?;
        Ok(pool)
    }
}
