use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Linear block index in z-major grid order. Offsets (and therefore the
/// canonical global ID tie-break) follow this ordering.
pub type BlockIndex = u32;

/// Half-open voxel box `[z1,z2) x [y1,y2) x [x1,x2)` in global coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct BlockBox {
    pub z1: u32,
    pub z2: u32,
    pub y1: u32,
    pub y2: u32,
    pub x1: u32,
    pub x2: u32,
}

impl BlockBox {
    pub fn new(z1: u32, z2: u32, y1: u32, y2: u32, x1: u32, x2: u32) -> Self {
        Self { z1, z2, y1, y2, x1, x2 }
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (
            (self.z2 - self.z1) as usize,
            (self.y2 - self.y1) as usize,
            (self.x2 - self.x1) as usize,
        )
    }

    pub fn voxel_count(&self) -> usize {
        let (dz, dy, dx) = self.shape();
        dz * dy * dx
    }

    pub fn contains_box(&self, other: &BlockBox) -> bool {
        self.z1 <= other.z1
            && other.z2 <= self.z2
            && self.y1 <= other.y1
            && other.y2 <= self.y2
            && self.x1 <= other.x1
            && other.x2 <= self.x2
    }

    /// Intersection of two boxes, or None when they do not overlap.
    pub fn intersect(&self, other: &BlockBox) -> Option<BlockBox> {
        let (z1, z2) = intersect_1d(self.z1, self.z2, other.z1, other.z2)?;
        let (y1, y2) = intersect_1d(self.y1, self.y2, other.y1, other.y2)?;
        let (x1, x2) = intersect_1d(self.x1, self.x2, other.x1, other.x2)?;
        Some(BlockBox::new(z1, z2, y1, y2, x1, x2))
    }
}

fn intersect_1d(a1: u32, a2: u32, b1: u32, b2: u32) -> Option<(u32, u32)> {
    let c1 = a1.max(b1);
    let c2 = a2.min(b2);
    if c2 <= c1 { None } else { Some((c1, c2)) }
}

/// Partition a volume shape into an overlapping block grid.
///
/// Blocks step by `block - overlap` along each axis and are clamped to the
/// volume bounds, so edge blocks may be smaller than `block_size`. Returned
/// in z-major order; the position in the returned vec is the block index.
pub fn generate_block_grid(
    vol_shape_zyx: (u32, u32, u32),
    block_size_zyx: (u32, u32, u32),
    overlap_zyx: (u32, u32, u32),
) -> Vec<BlockBox> {
    let (zs, ys, xs) = vol_shape_zyx;
    let (bz, by, bx) = block_size_zyx;
    let (oz, oy, ox) = overlap_zyx;
    let (stepz, stepy, stepx) = (
        bz.saturating_sub(oz).max(1),
        by.saturating_sub(oy).max(1),
        bx.saturating_sub(ox).max(1),
    );

    (0..zs)
        .step_by(stepz as usize)
        .cartesian_product((0..ys).step_by(stepy as usize))
        .cartesian_product((0..xs).step_by(stepx as usize))
        .map(|((z, y), x)| {
            BlockBox::new(z, (z + bz).min(zs), y, (y + by).min(ys), x, (x + bx).min(xs))
        })
        .collect()
}
