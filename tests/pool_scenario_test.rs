use segmerge::block_store::BlockStore;
use segmerge::config::MergeConfig;
use segmerge::geometry::BlockBox;
use segmerge::id_pool::IdPool;
use segmerge::pipeline::MergePipeline;
use segmerge::volume::LabelVolume;

/// The canonical two-block merge scenario: a 3x3x3 overlap where labels
/// 1 (block A) and 5 (block B) co-occur in 20 voxels and labels 2 and 6 in
/// a single voxel. With a 10-voxel floor, only the first pair merges.
#[test]
fn test_two_block_pool_merges_heavy_pair_only() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = MergeConfig {
        store_dir: temp_dir.path().join("blocks"),
        merge_dir: temp_dir.path().join("merge"),
        output_dir: temp_dir.path().join("output"),
        output_chunk_zyx: (4, 4, 4),
        ..Default::default()
    };
    config.edges.min_overlap_voxels = 10;
    config.edges.min_frac_local = 0.0;
    config.edges.min_frac_global = 0.0;

    let store = BlockStore::open(&config.store_dir);

    // Block A covers x 0..6, block B covers x 3..9; they share x 3..6.
    let bounds_a = BlockBox::new(0, 3, 0, 3, 0, 6);
    let bounds_b = BlockBox::new(0, 3, 0, 3, 3, 9);
    let mut vol_a = LabelVolume::zeros(bounds_a);
    let mut vol_b = LabelVolume::zeros(bounds_b);

    // First 20 overlap voxels in z-major order carry the heavy pair, the
    // 21st carries the light pair, the rest stay background.
    let mut placed = 0;
    'outer: for z in 0..3 {
        for y in 0..3 {
            for x in 3..6 {
                if placed < 20 {
                    vol_a.set(z, y, x, 1);
                    vol_b.set(z, y, x, 5);
                } else if placed == 20 {
                    vol_a.set(z, y, x, 2);
                    vol_b.set(z, y, x, 6);
                } else {
                    break 'outer;
                }
                placed += 1;
            }
        }
    }

    store.publish_block(0, &vol_a).unwrap();
    store.publish_block(1, &vol_b).unwrap();

    let pipeline = MergePipeline::open(config.clone()).unwrap();
    let summary = pipeline.build_pools(false).unwrap();
    assert_eq!(summary.blocks, 2);
    assert_eq!(summary.pairs, 1);
    assert_eq!(summary.edges, 1, "only the 20-voxel pair clears the floor");

    let pool = IdPool::load(&config.pool_path()).unwrap();

    // (A,1) and (B,5) share one GlobalID.
    let merged = pool.resolve(0, 1).unwrap();
    assert_eq!(pool.resolve(1, 5).unwrap(), merged);

    // (A,2) and (B,6) stay distinct singletons.
    let a2 = pool.resolve(0, 2).unwrap();
    let b6 = pool.resolve(1, 6).unwrap();
    assert_ne!(a2, b6);
    assert_ne!(a2, merged);
    assert_ne!(b6, merged);
}

/// Blocks with no geometric overlap never produce an edge, however similar
/// their contents.
#[test]
fn test_disjoint_blocks_produce_no_edges() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = MergeConfig {
        store_dir: temp_dir.path().join("blocks"),
        merge_dir: temp_dir.path().join("merge"),
        output_dir: temp_dir.path().join("output"),
        ..Default::default()
    };
    config.edges.min_overlap_voxels = 1;
    config.edges.min_frac_local = 0.0;
    config.edges.min_frac_global = 0.0;

    let store = BlockStore::open(&config.store_dir);

    let bounds_a = BlockBox::new(0, 2, 0, 2, 0, 2);
    let bounds_b = BlockBox::new(0, 2, 0, 2, 10, 12);
    let mut vol_a = LabelVolume::zeros(bounds_a);
    let mut vol_b = LabelVolume::zeros(bounds_b);
    for z in 0..2 {
        for y in 0..2 {
            vol_a.set(z, y, 0, 1);
            vol_b.set(z, y, 10, 1);
        }
    }
    store.publish_block(0, &vol_a).unwrap();
    store.publish_block(1, &vol_b).unwrap();

    let pipeline = MergePipeline::open(config.clone()).unwrap();
    let summary = pipeline.build_pools(false).unwrap();
    assert_eq!(summary.pairs, 0);
    assert_eq!(summary.edges, 0);

    let pool = IdPool::load(&config.pool_path()).unwrap();
    assert_ne!(pool.resolve(0, 1).unwrap(), pool.resolve(1, 1).unwrap());
}

/// Every local label present in the store resolves to exactly one GlobalID
/// once the pool is built.
#[test]
fn test_pool_is_total_over_store_labels() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = MergeConfig {
        store_dir: temp_dir.path().join("blocks"),
        merge_dir: temp_dir.path().join("merge"),
        output_dir: temp_dir.path().join("output"),
        ..Default::default()
    };
    let store = BlockStore::open(&config.store_dir);

    let bounds_a = BlockBox::new(0, 2, 0, 2, 0, 4);
    let bounds_b = BlockBox::new(0, 2, 0, 2, 2, 6);
    let mut vol_a = LabelVolume::zeros(bounds_a);
    let mut vol_b = LabelVolume::zeros(bounds_b);
    vol_a.set(0, 0, 0, 1);
    vol_a.set(1, 1, 3, 2);
    vol_b.set(0, 0, 5, 1);
    vol_b.set(1, 1, 2, 3);
    store.publish_block(0, &vol_a).unwrap();
    store.publish_block(1, &vol_b).unwrap();

    let pipeline = MergePipeline::open(config.clone()).unwrap();
    pipeline.build_pools(false).unwrap();
    let pool = IdPool::load(&config.pool_path()).unwrap();

    for meta in store.list_done().unwrap() {
        let volume = store.load_volume(&meta).unwrap();
        for &label in volume.data.iter().filter(|&&l| l != 0) {
            let gid = pool.resolve(meta.index, label).unwrap();
            assert_ne!(gid, 0, "label ({}, {}) must map to a non-background id", meta.index, label);
        }
    }
}
