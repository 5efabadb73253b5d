//! Minecraft Anvil region file format (.mca).
//!
//! Region files contain 32x32 chunks in a specific binary format:
//! - Bytes 0-4095: Location table (1024 entries × 4 bytes)
//! - Bytes 4096-8191: Timestamp table (1024 entries × 4 bytes)
//! - Bytes 8192+: Chunk data (variable size sectors)
//!
//! The sweeper only ever touches the 8 KiB header; chunk payloads are
//! opaque.

mod codec;

pub use codec::{RegionCodec, RegionHeader};

use std::path::Path;

use crate::error::{Error, Result};

/// Size of one sector in bytes (4 KB).
pub const SECTOR_SIZE: usize = 4096;

/// Total header size (location table + timestamp table).
pub const HEADER_SIZE: usize = SECTOR_SIZE * 2; // 8192 bytes

/// Number of chunks per region dimension.
pub const REGION_SIZE: i32 = 32;

/// Number of chunks in one region.
pub const CHUNKS_PER_REGION: usize = 1024;

/// Region file extension.
pub const REGION_EXT: &str = "mca";

/// Convert chunk coordinates to local region coordinates (0-31).
#[inline]
pub fn chunk_to_local(chunk_coord: i32) -> i32 {
    chunk_coord.rem_euclid(REGION_SIZE)
}

/// Convert chunk coordinates to region coordinates.
#[inline]
pub fn chunk_to_region(chunk_coord: i32) -> i32 {
    chunk_coord.div_euclid(REGION_SIZE)
}

/// Calculate linear index for a chunk within a region (0-1023).
#[inline]
pub fn local_to_index(local_x: i32, local_z: i32) -> usize {
    (local_z * REGION_SIZE + local_x) as usize
}

/// Calculate local coordinates from linear index.
#[inline]
pub fn index_to_local(index: usize) -> (i32, i32) {
    let local_x = (index % REGION_SIZE as usize) as i32;
    let local_z = (index / REGION_SIZE as usize) as i32;
    (local_x, local_z)
}

/// Region file coordinates (parsed from filename like "r.0.-1.mca").
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct RegionPos {
    pub x: i32,
    pub z: i32,
}

impl RegionPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Parse region position from filename (e.g., "r.0.-1.mca").
    ///
    /// This exact pattern is the sole mechanism for discovering regions
    /// on disk; anything else in the folder is ignored.
    pub fn from_filename(name: &str) -> Option<Self> {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() == 4 && parts[0] == "r" && parts[3] == REGION_EXT {
            let x = parts[1].parse().ok()?;
            let z = parts[2].parse().ok()?;
            Some(Self { x, z })
        } else {
            None
        }
    }

    /// Canonical filename for this region.
    pub fn filename(&self) -> String {
        format!("r.{}.{}.{}", self.x, self.z, REGION_EXT)
    }

    /// Lowest chunk X coordinate contained in this region.
    #[inline]
    pub fn min_chunk_x(&self) -> i32 {
        self.x << 5
    }

    /// Lowest chunk Z coordinate contained in this region.
    #[inline]
    pub fn min_chunk_z(&self) -> i32 {
        self.z << 5
    }

    /// Convert local chunk coordinates to world chunk coordinates.
    pub fn local_to_world(&self, local_x: i32, local_z: i32) -> (i32, i32) {
        (
            self.x * REGION_SIZE + local_x,
            self.z * REGION_SIZE + local_z,
        )
    }

    /// Whether the given world chunk coordinates fall in this region.
    pub fn contains_chunk(&self, chunk_x: i32, chunk_z: i32) -> bool {
        chunk_to_region(chunk_x) == self.x && chunk_to_region(chunk_z) == self.z
    }
}

impl std::fmt::Display for RegionPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r.{}.{}", self.x, self.z)
    }
}

/// List every region present in a world's region folder.
///
/// A missing folder is fatal for that world: the caller must not
/// schedule deletion for it until the folder exists.
pub fn discover_regions(world: &str, dir: &Path) -> Result<Vec<RegionPos>> {
    if !dir.is_dir() {
        return Err(Error::MissingRegionFolder {
            world: world.to_string(),
            path: dir.to_path_buf(),
        });
    }

    let mut regions = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(name) = name.to_str() {
            if let Some(pos) = RegionPos::from_filename(name) {
                regions.push(pos);
            }
        }
    }

    log::debug!("world {}: discovered {} region files", world, regions.len());
    Ok(regions)
}
