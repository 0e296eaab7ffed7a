use rayon::prelude::*;
use tracing::{info, warn};

use crate::MergeError;
use crate::apply_writer::{ApplySummary, ApplyWriter};
use crate::block_store::{BlockMeta, BlockStore};
use crate::config::MergeConfig;
use crate::geometry::{BlockBox, BlockIndex};
use crate::id_pool::{IdPool, compute_offsets};
use crate::ledger::{BlockState, ProgressLedger};
use crate::output_volume::OutputVolume;
use crate::overlap_graph::{OverlapEdge, neighbor_pairs, scan_pair};
use crate::resolver::resolve_edges;

#[derive(Debug)]
pub struct PoolSummary {
    pub blocks: usize,
    pub pairs: usize,
    pub edges: usize,
    pub merged_labels: usize,
}

#[derive(Debug)]
pub struct StatusRow {
    pub index: BlockIndex,
    pub state: BlockState,
    pub pooled_covered: bool,
    pub output_present: bool,
}

#[derive(Debug)]
pub struct StatusReport {
    pub rows: Vec<StatusRow>,
    pub pool_exists: bool,
}

impl StatusReport {
    pub fn count(&self, state: BlockState) -> usize {
        self.rows.iter().filter(|r| r.state == state).count()
    }
}

/// Drives the two-phase merge over one configured state layout.
pub struct MergePipeline {
    config: MergeConfig,
    store: BlockStore,
    ledger: ProgressLedger,
}

impl MergePipeline {
    pub fn open(config: MergeConfig) -> Result<Self, MergeError> {
        let store = BlockStore::open(&config.store_dir);
        let ledger = ProgressLedger::open(&config.ledger_dir())?;
        Ok(Self { config, store, ledger })
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub fn ledger(&self) -> &ProgressLedger {
        &self.ledger
    }

    /// Phase 1: scan overlaps, resolve classes, persist the pool, and mark
    /// covered blocks pooled. Cheap, deterministic, safe to re-run; with
    /// `restart` it also resets previously applied blocks to pooled.
    pub fn build_pools(&self, restart: bool) -> Result<PoolSummary, MergeError> {
        let blocks = self.store.list_done()?;
        info!(blocks = blocks.len(), "Building ID pool");

        let (ranges, next_gid) = compute_offsets(&blocks);
        let offset_of = |index: BlockIndex| -> u64 {
            ranges
                .binary_search_by_key(&index, |r| r.index)
                .map(|i| ranges[i].offset)
                .unwrap_or(0)
        };

        let pairs = neighbor_pairs(&blocks);
        info!(pairs = pairs.len(), "Scanning overlap pairs");

        let workers = if self.config.workers == 0 {
            rayon::current_num_threads()
        } else {
            self.config.workers
        };
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| MergeError::Other(format!("Failed to build scan pool: {}", e)))?;

        let results: Vec<Result<Vec<OverlapEdge>, MergeError>> = thread_pool.install(|| {
            pairs
                .par_iter()
                .map(|&(i, j, overlap)| {
                    scan_pair(
                        &self.store,
                        &blocks[i],
                        &blocks[j],
                        &overlap,
                        offset_of(blocks[i].index),
                        offset_of(blocks[j].index),
                        &self.config.edges,
                    )
                })
                .collect()
        });

        let mut edges: Vec<OverlapEdge> = Vec::new();
        for result in results {
            match result {
                Ok(pair_edges) => edges.extend(pair_edges),
                // A vanished neighbor volume demotes the pair to a
                // boundary, it does not poison the pool.
                Err(MergeError::NotFound(block)) => {
                    warn!(block, "Neighbor volume missing during scan; edge omitted");
                }
                Err(e) => return Err(e),
            }
        }
        edges.sort_unstable();
        edges.dedup();

        let reps = resolve_edges(&edges);
        let pool = IdPool::new(ranges, next_gid, reps);
        pool.save(&self.config.pool_path())?;
        info!(
            path = %self.config.pool_path().display(),
            edges = edges.len(),
            merged = pool.reps.len(),
            "Pool persisted"
        );

        for meta in &blocks {
            if restart {
                self.ledger.force_pooled(meta.index)?;
            } else if self.ledger.state(meta.index)? != BlockState::Applied {
                self.ledger.mark_pooled(meta.index)?;
            }
        }

        Ok(PoolSummary {
            blocks: blocks.len(),
            pairs: pairs.len(),
            edges: edges.len(),
            merged_labels: pool.reps.len(),
        })
    }

    /// Phase 2: stream the persisted pool over every pooled block.
    pub fn apply(&self) -> Result<ApplySummary, MergeError> {
        let pool_path = self.config.pool_path();
        if !pool_path.exists() {
            return Err(MergeError::Config(format!(
                "No pool at {}; run pools first",
                pool_path.display()
            )));
        }
        let pool = IdPool::load(&pool_path)?;

        let blocks: Vec<BlockMeta> = self
            .store
            .list_done()?
            .into_iter()
            .filter(|meta| pool.range_of(meta.index).is_some())
            .collect();

        let shape = output_shape(&blocks).ok_or_else(|| {
            MergeError::Config("No pooled blocks to apply".into())
        })?;
        let output = OutputVolume::create(&self.config.output_dir, shape, self.config.output_chunk_zyx)?;

        let writer = ApplyWriter::new(&self.store, &self.ledger, &pool, &output);
        let summary = writer.run(&blocks);
        info!(
            applied = summary.applied.len(),
            already = summary.already_applied,
            failed = summary.failures.len(),
            "Apply pass finished"
        );
        Ok(summary)
    }

    /// Per-block view joining the store, the ledger, the pool fingerprint,
    /// and the output volume.
    pub fn status(&self) -> Result<StatusReport, MergeError> {
        let blocks = self.store.list_done()?;
        let pool_path = self.config.pool_path();
        let pool = if pool_path.exists() {
            Some(IdPool::load(&pool_path)?)
        } else {
            None
        };
        let output = OutputVolume::open(&self.config.output_dir).ok();

        let mut rows = Vec::with_capacity(blocks.len());
        for meta in &blocks {
            rows.push(StatusRow {
                index: meta.index,
                state: self.ledger.state(meta.index)?,
                pooled_covered: pool
                    .as_ref()
                    .map(|p| p.covers(meta).is_ok())
                    .unwrap_or(false),
                output_present: output
                    .as_ref()
                    .map(|o| o.region_present(&meta.coords))
                    .unwrap_or(false),
            });
        }
        Ok(StatusReport { rows, pool_exists: pool.is_some() })
    }

    /// Clean one block (ledger entry only) or the whole merge state
    /// (ledger, pool, and output volume).
    pub fn clean(&self, block: Option<BlockIndex>) -> Result<(), MergeError> {
        match block {
            Some(index) => {
                self.ledger.clean(index)?;
                info!(block = index, "Cleaned block");
            }
            None => {
                self.ledger.clean_all()?;
                let pool_path = self.config.pool_path();
                if pool_path.exists() {
                    std::fs::remove_file(&pool_path).map_err(MergeError::Io)?;
                }
                if self.config.output_dir.exists() {
                    std::fs::remove_dir_all(&self.config.output_dir).map_err(MergeError::Io)?;
                }
                info!("Cleaned merge state");
            }
        }
        Ok(())
    }
}

/// Output geometry spanning the given blocks: the volume runs from the
/// origin to the far corner of the farthest block.
fn output_shape(blocks: &[BlockMeta]) -> Option<(u32, u32, u32)> {
    if blocks.is_empty() {
        return None;
    }
    let mut far = (0, 0, 0);
    for meta in blocks {
        let BlockBox { z2, y2, x2, .. } = meta.coords;
        far = (far.0.max(z2), far.1.max(y2), far.2.max(x2));
    }
    Some(far)
}
