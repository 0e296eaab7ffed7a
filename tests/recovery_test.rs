use segmerge::apply_writer::{ApplyWriter, BlockOutcome};
use segmerge::block_store::BlockStore;
use segmerge::config::MergeConfig;
use segmerge::geometry::BlockBox;
use segmerge::id_pool::IdPool;
use segmerge::ledger::{BlockState, ProgressLedger};
use segmerge::output_volume::OutputVolume;
use segmerge::pipeline::MergePipeline;
use segmerge::volume::LabelVolume;

fn test_config(dir: &std::path::Path) -> MergeConfig {
    let mut config = MergeConfig {
        store_dir: dir.join("blocks"),
        merge_dir: dir.join("merge"),
        output_dir: dir.join("output"),
        output_chunk_zyx: (4, 4, 4),
        ..Default::default()
    };
    config.edges.min_overlap_voxels = 4;
    config.edges.min_frac_local = 0.5;
    config.edges.min_frac_global = 0.5;
    config
}

fn publish_two_blocks(store: &BlockStore) {
    let bounds_a = BlockBox::new(0, 4, 0, 4, 0, 6);
    let bounds_b = BlockBox::new(0, 4, 0, 4, 2, 8);
    let mut vol_a = LabelVolume::zeros(bounds_a);
    let mut vol_b = LabelVolume::zeros(bounds_b);
    for z in 0..4 {
        for y in 0..2 {
            for x in 2..6 {
                vol_a.set(z, y, x, 1);
                vol_b.set(z, y, x, 9);
            }
        }
    }
    store.publish_block(0, &vol_a).unwrap();
    store.publish_block(1, &vol_b).unwrap();
}

/// Simulates a crash between the pools and apply phases: the first run
/// applies only block 0, then dies. The restarted run must process exactly
/// the remaining block and leave block 0's output bytes untouched.
#[test]
fn test_restart_processes_only_unapplied_blocks() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let pipeline = MergePipeline::open(config.clone()).unwrap();
    publish_two_blocks(pipeline.store());
    pipeline.build_pools(false).unwrap();

    // First run: apply block 0 directly, then "crash" before block 1.
    {
        let store = BlockStore::open(&config.store_dir);
        let ledger = ProgressLedger::open(&config.ledger_dir()).unwrap();
        let pool = IdPool::load(&config.pool_path()).unwrap();
        let output = OutputVolume::create(&config.output_dir, (4, 4, 8), config.output_chunk_zyx).unwrap();
        let writer = ApplyWriter::new(&store, &ledger, &pool, &output);

        let blocks = store.list_done().unwrap();
        assert!(matches!(writer.apply_block(&blocks[0]), BlockOutcome::Applied));
    }

    assert_eq!(pipeline.ledger().state(0).unwrap(), BlockState::Applied);
    assert_eq!(pipeline.ledger().state(1).unwrap(), BlockState::Pooled);

    // Snapshot block 0's region before the restarted run.
    let output = OutputVolume::open(&config.output_dir).unwrap();
    let region_a = BlockBox::new(0, 4, 0, 4, 0, 2);
    let before = output.read_region(&region_a).unwrap();

    // Restarted run: the ledger alone decides what is redone.
    let restarted = MergePipeline::open(config.clone()).unwrap();
    let summary = restarted.apply().unwrap();
    assert!(summary.is_clean());
    assert_eq!(summary.applied, vec![1]);
    assert_eq!(summary.already_applied, 1);

    // Block 0's exclusive region (x 0..2, outside the overlap) is untouched.
    let after = output.read_region(&region_a).unwrap();
    assert_eq!(before, after);
}

/// A crash between the region write and the ledger mark leaves the block
/// pooled; the next run rewrites it identically.
#[test]
fn test_interrupted_mark_is_reapplied() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let pipeline = MergePipeline::open(config.clone()).unwrap();
    publish_two_blocks(pipeline.store());
    pipeline.build_pools(false).unwrap();
    pipeline.apply().unwrap();

    // Rewind block 1's ledger entry to pooled, as if the run died after
    // writing its region but before marking it.
    pipeline.ledger().force_pooled(1).unwrap();

    let output = OutputVolume::open(&config.output_dir).unwrap();
    let whole = BlockBox::new(0, 4, 0, 4, 0, 8);
    let before = output.read_region(&whole).unwrap();

    let summary = pipeline.apply().unwrap();
    assert!(summary.is_clean());
    assert_eq!(summary.applied, vec![1]);

    let after = output.read_region(&whole).unwrap();
    assert_eq!(before, after, "reapplying a block must be byte-identical");
    assert_eq!(pipeline.ledger().state(1).unwrap(), BlockState::Applied);
}

/// Clean on an applied block removes its ledger entry; status stops
/// reporting it applied, and the normal lifecycle restarts from pending.
#[test]
fn test_clean_applied_block_returns_to_pending() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let pipeline = MergePipeline::open(config.clone()).unwrap();
    publish_two_blocks(pipeline.store());
    pipeline.build_pools(false).unwrap();
    pipeline.apply().unwrap();

    pipeline.clean(Some(1)).unwrap();

    let report = pipeline.status().unwrap();
    assert_eq!(report.count(BlockState::Applied), 1);
    let row = report.rows.iter().find(|r| r.index == 1).unwrap();
    assert_eq!(row.state, BlockState::Pending);

    // Re-pooling picks the block back up; apply redoes just that block.
    pipeline.build_pools(false).unwrap();
    let summary = pipeline.apply().unwrap();
    assert_eq!(summary.applied, vec![1]);
}

/// Clean with no block wipes the pool, the ledger, and the output volume.
#[test]
fn test_clean_all_resets_everything() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let pipeline = MergePipeline::open(config.clone()).unwrap();
    publish_two_blocks(pipeline.store());
    pipeline.build_pools(false).unwrap();
    pipeline.apply().unwrap();

    pipeline.clean(None).unwrap();

    assert!(!config.pool_path().exists());
    assert!(!config.output_dir.exists());
    let report = pipeline.status().unwrap();
    assert!(!report.pool_exists);
    assert_eq!(report.count(BlockState::Pending), 2);

    // The store itself is untouched: blocks are still there to re-merge.
    assert_eq!(pipeline.store().list_done().unwrap().len(), 2);
}

/// pools --restart supersedes earlier applies: previously applied blocks
/// drop back to pooled so the new pool is re-applied everywhere.
#[test]
fn test_pools_restart_resets_applied_blocks() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let pipeline = MergePipeline::open(config.clone()).unwrap();
    publish_two_blocks(pipeline.store());
    pipeline.build_pools(false).unwrap();
    pipeline.apply().unwrap();
    assert_eq!(pipeline.ledger().state(0).unwrap(), BlockState::Applied);

    pipeline.build_pools(true).unwrap();
    assert_eq!(pipeline.ledger().state(0).unwrap(), BlockState::Pooled);
    assert_eq!(pipeline.ledger().state(1).unwrap(), BlockState::Pooled);

    let summary = pipeline.apply().unwrap();
    assert_eq!(summary.applied, vec![0, 1]);
}
