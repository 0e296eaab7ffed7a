use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::MergeError;
use crate::geometry::BlockBox;
use crate::id_pool::GlobalId;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VolumeInfo {
    shape_zyx: (u32, u32, u32),
    chunk_zyx: (u32, u32, u32),
}

/// One chunk of the global segmentation, anchored at its global box.
#[derive(PartialEq, Debug, Clone, Encode, Decode)]
struct Chunk {
    bounds: BlockBox,
    data: Vec<GlobalId>,
}

impl Chunk {
    fn zeros(bounds: BlockBox) -> Self {
        Self { data: vec![0; bounds.voxel_count()], bounds }
    }

    fn linear_index(&self, z: u32, y: u32, x: u32) -> usize {
        let (_, dy, dx) = self.bounds.shape();
        let lz = (z - self.bounds.z1) as usize;
        let ly = (y - self.bounds.y1) as usize;
        let lx = (x - self.bounds.x1) as usize;
        (lz * dy + ly) * dx + lx
    }
}

/// A region read back out of the volume, for verification and export.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRegion {
    pub bounds: BlockBox,
    pub data: Vec<GlobalId>,
}

impl OutputRegion {
    pub fn get(&self, z: u32, y: u32, x: u32) -> GlobalId {
        let (_, dy, dx) = self.bounds.shape();
        let lz = (z - self.bounds.z1) as usize;
        let ly = (y - self.bounds.y1) as usize;
        let lx = (x - self.bounds.x1) as usize;
        self.data[(lz * dy + ly) * dx + lx]
    }
}

/// The single progressively-written global segmentation: a directory of
/// fixed-size bincode chunks plus an `info.json` describing the grid.
/// Chunks come into existence on first write; a chunk file is replaced
/// atomically on every region write, so interrupted writes never leave a
/// torn chunk behind.
pub struct OutputVolume {
    dir: PathBuf,
    info: VolumeInfo,
}

impl OutputVolume {
    /// Create (or re-open, when the on-disk info matches) the output volume.
    pub fn create(dir: &Path, shape_zyx: (u32, u32, u32), chunk_zyx: (u32, u32, u32)) -> Result<Self, MergeError> {
        if chunk_zyx.0 == 0 || chunk_zyx.1 == 0 || chunk_zyx.2 == 0 {
            return Err(MergeError::Config("Output chunk size must be non-zero".into()));
        }
        fs::create_dir_all(dir).map_err(MergeError::Io)?;
        let info_path = dir.join("info.json");
        let info = VolumeInfo { shape_zyx, chunk_zyx };
        if info_path.exists() {
            let raw = fs::read_to_string(&info_path).map_err(MergeError::Io)?;
            let existing: VolumeInfo = serde_json::from_str(&raw)?;
            if existing.shape_zyx != shape_zyx || existing.chunk_zyx != chunk_zyx {
                return Err(MergeError::Config(format!(
                    "Output volume at {} already exists with different geometry",
                    dir.display()
                )));
            }
        } else {
            fs::write(&info_path, serde_json::to_string_pretty(&info)?).map_err(MergeError::Io)?;
        }
        Ok(Self { dir: dir.to_path_buf(), info })
    }

    pub fn open(dir: &Path) -> Result<Self, MergeError> {
        let info_path = dir.join("info.json");
        if !info_path.exists() {
            return Err(MergeError::Config(format!(
                "No output volume at {}",
                dir.display()
            )));
        }
        let raw = fs::read_to_string(&info_path).map_err(MergeError::Io)?;
        let info: VolumeInfo = serde_json::from_str(&raw)?;
        Ok(Self { dir: dir.to_path_buf(), info })
    }

    pub fn bounds(&self) -> BlockBox {
        let (zs, ys, xs) = self.info.shape_zyx;
        BlockBox::new(0, zs, 0, ys, 0, xs)
    }

    fn chunk_path(&self, cz: u32, cy: u32, cx: u32) -> PathBuf {
        self.dir.join(format!("chunk_{}_{}_{}.bin", cz, cy, cx))
    }

    fn chunk_bounds(&self, cz: u32, cy: u32, cx: u32) -> BlockBox {
        let (zs, ys, xs) = self.info.shape_zyx;
        let (bz, by, bx) = self.info.chunk_zyx;
        BlockBox::new(
            cz * bz,
            (cz * bz + bz).min(zs),
            cy * by,
            (cy * by + by).min(ys),
            cx * bx,
            (cx * bx + bx).min(xs),
        )
    }

    /// Chunk grid indices whose boxes intersect `region`. A block region
    /// rarely touches more than a couple of chunks per axis.
    fn chunks_for(&self, region: &BlockBox) -> SmallVec<[(u32, u32, u32); 8]> {
        let (bz, by, bx) = self.info.chunk_zyx;
        let mut out = SmallVec::new();
        if region.voxel_count() == 0 {
            return out;
        }
        for cz in region.z1 / bz..=(region.z2 - 1) / bz {
            for cy in region.y1 / by..=(region.y2 - 1) / by {
                for cx in region.x1 / bx..=(region.x2 - 1) / bx {
                    out.push((cz, cy, cx));
                }
            }
        }
        out
    }

    fn load_chunk(&self, cz: u32, cy: u32, cx: u32) -> Result<Chunk, MergeError> {
        let path = self.chunk_path(cz, cy, cx);
        if !path.exists() {
            return Ok(Chunk::zeros(self.chunk_bounds(cz, cy, cx)));
        }
        let file = File::open(&path).map_err(MergeError::Io)?;
        let mut reader = BufReader::new(file);
        let chunk = bincode::decode_from_std_read(&mut reader, bincode::config::standard())?;
        Ok(chunk)
    }

    fn store_chunk(&self, cz: u32, cy: u32, cx: u32, chunk: &Chunk) -> Result<(), MergeError> {
        let path = self.chunk_path(cz, cy, cx);
        let tmp = path.with_extension("tmp");
        {
            let file = File::create(&tmp).map_err(MergeError::Io)?;
            let mut writer = BufWriter::new(file);
            bincode::encode_into_std_write(chunk, &mut writer, bincode::config::standard())?;
            writer.flush().map_err(MergeError::Io)?;
        }
        fs::rename(&tmp, &path).map_err(MergeError::Io)?;
        Ok(())
    }

    /// Write a relabeled region (z-major voxel order over `region`) into
    /// the volume, read-modify-writing each intersecting chunk.
    pub fn write_region(&self, region: &BlockBox, data: &[GlobalId]) -> Result<(), MergeError> {
        if !self.bounds().contains_box(region) {
            return Err(MergeError::Other(format!(
                "Region {:?} exceeds output bounds {:?}",
                region,
                self.bounds()
            )));
        }
        if data.len() != region.voxel_count() {
            return Err(MergeError::Other(format!(
                "Region data length {} does not match voxel count {}",
                data.len(),
                region.voxel_count()
            )));
        }

        let (_, dy, dx) = region.shape();
        for (cz, cy, cx) in self.chunks_for(region) {
            let mut chunk = self.load_chunk(cz, cy, cx)?;
            let part = match chunk.bounds.intersect(region) {
                Some(part) => part,
                None => continue,
            };
            for z in part.z1..part.z2 {
                for y in part.y1..part.y2 {
                    for x in part.x1..part.x2 {
                        let lz = (z - region.z1) as usize;
                        let ly = (y - region.y1) as usize;
                        let lx = (x - region.x1) as usize;
                        let value = data[(lz * dy + ly) * dx + lx];
                        let idx = chunk.linear_index(z, y, x);
                        chunk.data[idx] = value;
                    }
                }
            }
            self.store_chunk(cz, cy, cx, &chunk)?;
        }
        Ok(())
    }

    /// Read a region back; unwritten chunks read as background.
    pub fn read_region(&self, region: &BlockBox) -> Result<OutputRegion, MergeError> {
        if !self.bounds().contains_box(region) {
            return Err(MergeError::Other(format!(
                "Region {:?} exceeds output bounds {:?}",
                region,
                self.bounds()
            )));
        }
        let (_, dy, dx) = region.shape();
        let mut data = vec![0; region.voxel_count()];
        for (cz, cy, cx) in self.chunks_for(region) {
            let path = self.chunk_path(cz, cy, cx);
            if !path.exists() {
                continue;
            }
            let chunk = self.load_chunk(cz, cy, cx)?;
            let part = match chunk.bounds.intersect(region) {
                Some(part) => part,
                None => continue,
            };
            for z in part.z1..part.z2 {
                for y in part.y1..part.y2 {
                    for x in part.x1..part.x2 {
                        let lz = (z - region.z1) as usize;
                        let ly = (y - region.y1) as usize;
                        let lx = (x - region.x1) as usize;
                        data[(lz * dy + ly) * dx + lx] = chunk.data[chunk.linear_index(z, y, x)];
                    }
                }
            }
        }
        Ok(OutputRegion { bounds: *region, data })
    }

    /// Whether every chunk covering `region` has been written. Used to
    /// cross-check ledger entries that claim a block is applied.
    pub fn region_present(&self, region: &BlockBox) -> bool {
        self.chunks_for(region)
            .iter()
            .all(|&(cz, cy, cx)| self.chunk_path(cz, cy, cx).exists())
    }
}
