use rustc_hash::FxHashMap;
use tracing::{info, warn};

use crate::MergeError;
use crate::block_store::{BlockMeta, BlockStore};
use crate::geometry::BlockIndex;
use crate::id_pool::{GlobalId, IdPool};
use crate::ledger::{BlockState, ProgressLedger};
use crate::output_volume::OutputVolume;
use crate::volume::LabelVolume;

/// Budget for the per-block dense relabel table; past it the writer falls
/// back to a hash lookup per distinct label.
const DENSE_TABLE_MAX_BYTES: usize = 128 * 1024 * 1024;

/// What happened to one block during an apply pass.
#[derive(Debug)]
pub enum BlockOutcome {
    Applied,
    AlreadyApplied,
    SkippedPending,
    SkippedClaimed,
    Failed(MergeError),
}

#[derive(Debug, Default)]
pub struct ApplySummary {
    pub applied: Vec<BlockIndex>,
    pub already_applied: usize,
    pub skipped_pending: usize,
    pub failures: Vec<(BlockIndex, MergeError)>,
}

impl ApplySummary {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Relabel one block's voxels from local labels to canonical GlobalIDs.
///
/// Uses a dense table indexed by local label when it fits the budget, a
/// hash map keyed by distinct label otherwise. Fails with StalePool when
/// the volume carries a label outside the pool's fingerprinted range.
pub fn relabel_block(
    volume: &LabelVolume,
    block: BlockIndex,
    pool: &IdPool,
) -> Result<Vec<GlobalId>, MergeError> {
    let max_label = volume.max_label();
    let table_bytes = (max_label as usize + 1) * std::mem::size_of::<GlobalId>();

    if table_bytes <= DENSE_TABLE_MAX_BYTES {
        let mut table: Vec<GlobalId> = vec![0; max_label as usize + 1];
        for label in 1..=max_label {
            table[label as usize] = pool.resolve(block, label)?;
        }
        Ok(volume.data.iter().map(|&l| table[l as usize]).collect())
    } else {
        let mut cache: FxHashMap<u32, GlobalId> = FxHashMap::default();
        let mut out = Vec::with_capacity(volume.data.len());
        for &label in &volume.data {
            if label == 0 {
                out.push(0);
                continue;
            }
            let gid = match cache.get(&label) {
                Some(&gid) => gid,
                None => {
                    let gid = pool.resolve(block, label)?;
                    cache.insert(label, gid);
                    gid
                }
            };
            out.push(gid);
        }
        Ok(out)
    }
}

/// Streams the persisted pool back over pooled blocks, writing relabeled
/// regions into the output volume and advancing the ledger per block.
///
/// Write-then-mark: a crash between the region write and the ledger update
/// leaves the block pooled, and the next run redoes it. The rewrite is
/// byte-identical, so nothing is corrupted.
pub struct ApplyWriter<'a> {
    store: &'a BlockStore,
    ledger: &'a ProgressLedger,
    pool: &'a IdPool,
    output: &'a OutputVolume,
}

impl<'a> ApplyWriter<'a> {
    pub fn new(
        store: &'a BlockStore,
        ledger: &'a ProgressLedger,
        pool: &'a IdPool,
        output: &'a OutputVolume,
    ) -> Self {
        Self { store, ledger, pool, output }
    }

    /// Apply one block according to its ledger state. Never panics a run:
    /// every per-block failure is returned as an outcome.
    pub fn apply_block(&self, meta: &BlockMeta) -> BlockOutcome {
        match self.ledger.state(meta.index) {
            Ok(BlockState::Applied) => {
                // Verify the claim before trusting it.
                if self.output.region_present(&meta.coords) {
                    BlockOutcome::AlreadyApplied
                } else {
                    BlockOutcome::Failed(MergeError::InconsistentLedger(meta.index))
                }
            }
            Ok(BlockState::Pending) => BlockOutcome::SkippedPending,
            Ok(BlockState::Pooled) => self.apply_pooled(meta),
            Err(e) => BlockOutcome::Failed(e),
        }
    }

    fn apply_pooled(&self, meta: &BlockMeta) -> BlockOutcome {
        match self.ledger.try_claim(meta.index) {
            Ok(true) => {}
            Ok(false) => return BlockOutcome::SkippedClaimed,
            Err(e) => return BlockOutcome::Failed(e),
        }
        let outcome = self.apply_claimed(meta);
        if let Err(e) = self.ledger.release(meta.index) {
            warn!(block = meta.index, error = %e, "Failed to release block claim");
        }
        outcome
    }

    fn apply_claimed(&self, meta: &BlockMeta) -> BlockOutcome {
        if let Err(e) = self.pool.covers(meta) {
            return BlockOutcome::Failed(e);
        }
        let result = (|| -> Result<(), MergeError> {
            let volume = self.store.load_volume(meta)?;
            let relabeled = relabel_block(&volume, meta.index, self.pool)?;
            self.output.write_region(&meta.coords, &relabeled)?;
            self.ledger.mark_applied(meta.index)?;
            Ok(())
        })();
        match result {
            Ok(()) => BlockOutcome::Applied,
            Err(e) => BlockOutcome::Failed(e),
        }
    }

    /// Apply every block in index order, isolating per-block failures.
    pub fn run(&self, blocks: &[BlockMeta]) -> ApplySummary {
        let mut summary = ApplySummary::default();
        for meta in blocks {
            match self.apply_block(meta) {
                BlockOutcome::Applied => {
                    info!(block = meta.index, "Applied block");
                    summary.applied.push(meta.index);
                }
                BlockOutcome::AlreadyApplied => summary.already_applied += 1,
                BlockOutcome::SkippedPending => {
                    warn!(block = meta.index, "Block not pooled yet; skipping");
                    summary.skipped_pending += 1;
                }
                BlockOutcome::SkippedClaimed => {
                    info!(block = meta.index, "Block claimed by another worker; skipping");
                }
                BlockOutcome::Failed(e) => {
                    warn!(block = meta.index, error = %e, "Block apply failed");
                    summary.failures.push((meta.index, e));
                }
            }
        }
        summary
    }
}
