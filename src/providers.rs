use std::path::Path;

use tracing::info;

use crate::MergeError;
use crate::block_store::BlockStore;
use crate::geometry::{BlockBox, BlockIndex};
use crate::ledger::{BlockState, ProgressLedger};

/// External instance-segmentation step. The pipeline never implements the
/// numerics; it only asks a provider to turn an input region into a block
/// volume on disk, through paths alone.
pub trait SegmentationProvider {
    fn segment_block(
        &self,
        input_path: &Path,
        output_path: &Path,
        config_path: &Path,
        block: BlockIndex,
        coords: &BlockBox,
    ) -> Result<(), MergeError>;
}

/// External model training step, same narrow contract: data in, weights
/// out, behavior governed by an opaque config file.
pub trait TrainingProvider {
    fn train(
        &self,
        dataset_path: &Path,
        weights_path: &Path,
        config_path: &Path,
    ) -> Result<(), MergeError>;
}

/// Drive a provider over every block of the grid that the store does not
/// yet hold, skipping blocks in flight or already past segmentation. One
/// block's failure is reported and does not stop the sweep.
pub fn segment_missing<P: SegmentationProvider>(
    provider: &P,
    store: &BlockStore,
    ledger: &ProgressLedger,
    grid: &[BlockBox],
    input_path: &Path,
    config_path: &Path,
) -> Result<Vec<BlockIndex>, MergeError> {
    let done: Vec<BlockIndex> = store.list_done()?.iter().map(|m| m.index).collect();
    let mut segmented = Vec::new();

    for (index, coords) in grid.iter().enumerate() {
        let index = index as BlockIndex;
        if done.binary_search(&index).is_ok() {
            continue;
        }
        if ledger.state(index)? != BlockState::Pending {
            continue;
        }
        let output_path = store.dir().join(format!("block_{:04}.vol", index));
        match provider.segment_block(input_path, &output_path, config_path, index, coords) {
            Ok(()) => {
                info!(block = index, "Segmented block");
                segmented.push(index);
            }
            Err(e) => {
                tracing::warn!(block = index, error = %e, "Segmentation failed");
            }
        }
    }
    Ok(segmented)
}
