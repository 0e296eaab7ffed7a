use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::MergeError;
use crate::block_store::{BlockMeta, BlockStore};
use crate::geometry::BlockBox;
use crate::id_pool::GlobalId;
use crate::volume::LabelVolume;

/// Edge acceptance rules for the overlap scan. An observed label pair
/// becomes an edge when its voxel count clears `min_overlap_voxels` and at
/// least one side's overlap fraction clears its floor. With
/// `unique_pairing` set, candidates are additionally thinned to at most one
/// winning partner per label side, heaviest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgePolicy {
    pub min_overlap_voxels: u64,
    pub min_frac_local: f64,
    pub min_frac_global: f64,
    pub unique_pairing: bool,
}

impl Default for EdgePolicy {
    fn default() -> Self {
        Self {
            min_overlap_voxels: 20,
            min_frac_local: 0.7,
            min_frac_global: 0.7,
            unique_pairing: false,
        }
    }
}

/// A union candidate between two offset global labels from adjacent blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OverlapEdge {
    pub a: GlobalId,
    pub b: GlobalId,
    pub weight: u64,
}

/// Enumerate block pairs whose boxes intersect, as (position in `blocks`,
/// position in `blocks`, overlap box).
///
/// Sweeps along z instead of testing all pairs: with `blocks` index-sorted
/// (z-major grid order) the inner scan stops as soon as a candidate starts
/// past the current block's far face, so only geometric neighborhoods are
/// visited.
pub fn neighbor_pairs(blocks: &[BlockMeta]) -> Vec<(usize, usize, BlockBox)> {
    let mut order: Vec<usize> = (0..blocks.len()).collect();
    order.sort_by_key(|&i| (blocks[i].coords.z1, blocks[i].index));

    let mut pairs = Vec::new();
    for (pos, &i) in order.iter().enumerate() {
        let a = &blocks[i].coords;
        for &j in &order[pos + 1..] {
            let b = &blocks[j].coords;
            if b.z1 >= a.z2 {
                break;
            }
            if let Some(overlap) = a.intersect(b) {
                // Canonical orientation: lower block index first.
                let (lo, hi) = if blocks[i].index <= blocks[j].index { (i, j) } else { (j, i) };
                pairs.push((lo, hi, overlap));
            }
        }
    }
    pairs.sort_by_key(|&(i, j, _)| (blocks[i].index, blocks[j].index));
    pairs
}

/// Count co-occurring non-background label pairs over two reads of the same
/// overlap region. Both volumes must share identical bounds.
pub fn tally_cooccurrence(
    a: &LabelVolume,
    b: &LabelVolume,
) -> Result<FxHashMap<(u32, u32), u64>, MergeError> {
    if a.bounds != b.bounds {
        return Err(MergeError::Other(format!(
            "Overlap reads disagree on bounds: {:?} vs {:?}",
            a.bounds, b.bounds
        )));
    }
    let mut counts: FxHashMap<(u32, u32), u64> = FxHashMap::default();
    for (&la, &lb) in a.data.iter().zip(&b.data) {
        if la != 0 && lb != 0 {
            *counts.entry((la, lb)).or_insert(0) += 1;
        }
    }
    Ok(counts)
}

/// Filter tallied pairs through the policy, returning accepted local-label
/// edges sorted for deterministic output.
pub fn select_edges(
    counts: &FxHashMap<(u32, u32), u64>,
    policy: &EdgePolicy,
) -> Vec<(u32, u32, u64)> {
    if counts.is_empty() {
        return Vec::new();
    }

    let mut total_a: FxHashMap<u32, u64> = FxHashMap::default();
    let mut total_b: FxHashMap<u32, u64> = FxHashMap::default();
    for (&(la, lb), &c) in counts {
        *total_a.entry(la).or_insert(0) += c;
        *total_b.entry(lb).or_insert(0) += c;
    }

    let mut candidates: Vec<(u32, u32, u64, f64)> = Vec::new();
    for (&(la, lb), &c) in counts {
        if c < policy.min_overlap_voxels {
            continue;
        }
        let tot_a = total_a[&la];
        let tot_b = total_b[&lb];
        let frac_local = c as f64 / tot_a as f64;
        let frac_global = c as f64 / tot_b as f64;
        if frac_local < policy.min_frac_local && frac_global < policy.min_frac_global {
            continue;
        }
        let iou = c as f64 / (tot_a + tot_b - c) as f64;
        candidates.push((la, lb, c, iou));
    }

    let mut selected: Vec<(u32, u32, u64)> = if policy.unique_pairing {
        // Heaviest first, IoU then label pair breaking ties so the greedy
        // pass is reproducible; a candidate is dropped only once both of
        // its labels are already spoken for.
        candidates.sort_by(|x, y| {
            (y.2, y.3)
                .partial_cmp(&(x.2, x.3))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| (x.0, x.1).cmp(&(y.0, y.1)))
        });
        let mut used_a = rustc_hash::FxHashSet::default();
        let mut used_b = rustc_hash::FxHashSet::default();
        let mut kept = Vec::new();
        for (la, lb, c, _) in candidates {
            if used_a.contains(&la) && used_b.contains(&lb) {
                continue;
            }
            used_a.insert(la);
            used_b.insert(lb);
            kept.push((la, lb, c));
        }
        kept
    } else {
        candidates.into_iter().map(|(la, lb, c, _)| (la, lb, c)).collect()
    };

    selected.sort_unstable();
    selected
}

/// Scan one adjacent block pair: read both sides of the overlap region,
/// tally co-occurrence, apply the policy, and lift surviving edges into the
/// offset global space.
///
/// A missing volume on either side surfaces as NotFound; the pools driver
/// demotes that pair to a boundary instead of failing the scan.
pub fn scan_pair(
    store: &BlockStore,
    meta_a: &BlockMeta,
    meta_b: &BlockMeta,
    overlap: &BlockBox,
    offset_a: GlobalId,
    offset_b: GlobalId,
    policy: &EdgePolicy,
) -> Result<Vec<OverlapEdge>, MergeError> {
    let side_a = store.read_region(meta_a, overlap)?;
    let side_b = store.read_region(meta_b, overlap)?;

    let counts = tally_cooccurrence(&side_a, &side_b)?;
    let mut edges: Vec<OverlapEdge> = select_edges(&counts, policy)
        .into_iter()
        .map(|(la, lb, weight)| OverlapEdge {
            a: offset_a + la as GlobalId,
            b: offset_b + lb as GlobalId,
            weight,
        })
        .collect();
    edges.sort_unstable();
    Ok(edges)
}
