use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use bincode::{Decode, Encode};

use crate::MergeError;
use crate::geometry::BlockBox;

/// A dense 3D label volume anchored at a global bounding box.
///
/// Voxels are stored z-major (`data[(z * dy + y) * dx + x]`), label 0 is
/// background.
#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct LabelVolume {
    pub bounds: BlockBox,
    pub data: Vec<u32>,
}

impl LabelVolume {
    pub fn new(bounds: BlockBox, data: Vec<u32>) -> Result<Self, MergeError> {
        if data.len() != bounds.voxel_count() {
            return Err(MergeError::Other(format!(
                "Volume data length {} does not match bounds voxel count {}",
                data.len(),
                bounds.voxel_count()
            )));
        }
        Ok(Self { bounds, data })
    }

    pub fn zeros(bounds: BlockBox) -> Self {
        let data = vec![0; bounds.voxel_count()];
        Self { bounds, data }
    }

    /// Largest label present, 0 for an all-background volume.
    pub fn max_label(&self) -> u32 {
        self.data.iter().copied().max().unwrap_or(0)
    }

    /// Voxel at global coordinates. Caller must stay inside the bounds.
    pub fn get(&self, z: u32, y: u32, x: u32) -> u32 {
        self.data[self.linear_index(z, y, x)]
    }

    pub fn set(&mut self, z: u32, y: u32, x: u32, value: u32) {
        let idx = self.linear_index(z, y, x);
        self.data[idx] = value;
    }

    fn linear_index(&self, z: u32, y: u32, x: u32) -> usize {
        let (_, dy, dx) = self.bounds.shape();
        let lz = (z - self.bounds.z1) as usize;
        let ly = (y - self.bounds.y1) as usize;
        let lx = (x - self.bounds.x1) as usize;
        (lz * dy + ly) * dx + lx
    }

    /// Copy of the sub-volume covered by `region` (global coordinates).
    /// The region must lie entirely inside this volume's bounds.
    pub fn read_region(&self, region: &BlockBox) -> Result<LabelVolume, MergeError> {
        if !self.bounds.contains_box(region) {
            return Err(MergeError::Other(format!(
                "Region {:?} is not contained in volume bounds {:?}",
                region, self.bounds
            )));
        }
        let mut out = Vec::with_capacity(region.voxel_count());
        for z in region.z1..region.z2 {
            for y in region.y1..region.y2 {
                for x in region.x1..region.x2 {
                    out.push(self.get(z, y, x));
                }
            }
        }
        Ok(LabelVolume { bounds: *region, data: out })
    }

    pub fn save(&self, path: &Path) -> Result<(), MergeError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(MergeError::Io)?;
        }
        let file = File::create(path).map_err(MergeError::Io)?;
        let mut writer = BufWriter::new(file);
        bincode::encode_into_std_write(self, &mut writer, bincode::config::standard())?;
        writer.flush().map_err(MergeError::Io)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, MergeError> {
        let file = File::open(path).map_err(MergeError::Io)?;
        let mut reader = BufReader::new(file);
        let volume = bincode::decode_from_std_read(&mut reader, bincode::config::standard())?;
        Ok(volume)
    }
}
