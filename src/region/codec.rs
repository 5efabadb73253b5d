//! Reader/writer for the sector-addressed region header.
//!
//! Only the header is ever parsed or mutated. Deleting a chunk means
//! zeroing its four location bytes, which orphans the pointer exactly
//! the way the vanilla engine's own compaction does; the payload
//! sectors are left in place and reclaimed by the engine later.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{HEADER_SIZE, SECTOR_SIZE, local_to_index};
use crate::error::{Error, Result};

/// In-memory copy of the 8 KiB region header.
///
/// Location table: bytes 0..4096, one big-endian 4-byte entry per chunk
/// packing a 3-byte sector offset and a 1-byte sector count. Timestamp
/// table: bytes 4096..8192, big-endian seconds since epoch. Entry index
/// is `local_x + local_z * 32` for both tables.
///
/// The buffer is exclusively owned by the codec call processing its
/// region; views handed out borrow from it and must not outlive one
/// check/delete cycle.
pub struct RegionHeader {
    data: Box<[u8; HEADER_SIZE]>,
}

impl RegionHeader {
    /// Header of a region with no chunks.
    pub fn empty() -> Self {
        Self {
            data: Box::new([0u8; HEADER_SIZE]),
        }
    }

    #[inline]
    fn location_offset(local_x: i32, local_z: i32) -> usize {
        local_to_index(local_x, local_z) * 4
    }

    #[inline]
    fn timestamp_offset(local_x: i32, local_z: i32) -> usize {
        SECTOR_SIZE + local_to_index(local_x, local_z) * 4
    }

    /// Packed location entry (sector offset << 8 | sector count).
    pub fn location(&self, local_x: i32, local_z: i32) -> u32 {
        let off = Self::location_offset(local_x, local_z);
        u32::from_be_bytes([
            self.data[off],
            self.data[off + 1],
            self.data[off + 2],
            self.data[off + 3],
        ])
    }

    /// A chunk is orphaned iff all four location bytes are zero. This
    /// is the only "absent" signal the format provides.
    pub fn is_orphaned(&self, local_x: i32, local_z: i32) -> bool {
        self.location(local_x, local_z) == 0
    }

    /// Last modification time of a chunk in milliseconds since epoch.
    /// The on-disk value is an unsigned big-endian seconds count.
    pub fn last_modified_ms(&self, local_x: i32, local_z: i32) -> i64 {
        let off = Self::timestamp_offset(local_x, local_z);
        let seconds = u32::from_be_bytes([
            self.data[off],
            self.data[off + 1],
            self.data[off + 2],
            self.data[off + 3],
        ]);
        seconds as i64 * 1000
    }

    /// Zero a chunk's location entry in memory. Does not free the
    /// payload sectors; it only orphans the pointer.
    pub fn delete_chunk(&mut self, local_x: i32, local_z: i32) {
        let off = Self::location_offset(local_x, local_z);
        self.data[off..off + 4].fill(0);
    }

    /// Write a location entry. Used when synthesizing region files.
    pub fn set_location(&mut self, local_x: i32, local_z: i32, sector_offset: u32, sector_count: u8) {
        let off = Self::location_offset(local_x, local_z);
        self.data[off] = ((sector_offset >> 16) & 0xFF) as u8;
        self.data[off + 1] = ((sector_offset >> 8) & 0xFF) as u8;
        self.data[off + 2] = (sector_offset & 0xFF) as u8;
        self.data[off + 3] = sector_count;
    }

    /// Write a timestamp entry (seconds since epoch).
    pub fn set_timestamp(&mut self, local_x: i32, local_z: i32, epoch_seconds: u32) {
        let off = Self::timestamp_offset(local_x, local_z);
        self.data[off..off + 4].copy_from_slice(&epoch_seconds.to_be_bytes());
    }

    /// True when every location entry is zero, i.e. the region holds
    /// nothing at all.
    pub fn is_empty(&self) -> bool {
        self.data[..SECTOR_SIZE].iter().all(|&b| b == 0)
    }

    /// Number of chunks present in the region.
    pub fn present_count(&self) -> usize {
        self.data[..SECTOR_SIZE]
            .chunks_exact(4)
            .filter(|entry| entry.iter().any(|&b| b != 0))
            .count()
    }

    /// The 4096-byte location table slice.
    pub fn location_table(&self) -> &[u8] {
        &self.data[..SECTOR_SIZE]
    }

    /// Full 8192-byte header.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..]
    }
}

/// Codec bound to one region file.
///
/// Holds no locks: the caller guarantees single-writer access per
/// region file. The file does not have to exist; a missing file reads
/// as an all-zero header.
pub struct RegionCodec {
    path: PathBuf,
}

impl RegionCodec {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the 8192-byte header in a single call.
    ///
    /// A missing or truncated file is treated as a region with no
    /// chunks, not as an error.
    pub fn read_header(&self) -> Result<RegionHeader> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RegionHeader::empty()),
            Err(e) => {
                return Err(Error::HeaderRead {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };

        let mut header = RegionHeader::empty();
        match file.read_exact(&mut header.data[..]) {
            Ok(()) => Ok(header),
            // Shorter than 8 KiB: nothing addressable inside.
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(RegionHeader::empty()),
            Err(e) => Err(Error::HeaderRead {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    /// Persist an edited header.
    ///
    /// If the location table is entirely zero the file is deleted
    /// instead: a header pointing at nothing is dead weight. Otherwise
    /// the whole 4096-byte location table is overwritten in one write;
    /// per-chunk seeks would be slower and widen the partial-write
    /// corruption window.
    ///
    /// Returns `true` when the file was removed rather than written.
    pub fn write_header(&self, header: &RegionHeader) -> Result<bool> {
        if header.is_empty() {
            self.delete_file()?;
            return Ok(true);
        }

        self.ensure_writable()?;
        let mut file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| Error::HeaderWrite {
                path: self.path.clone(),
                source: e,
            })?;
        file.seek(SeekFrom::Start(0)).map_err(|e| Error::HeaderWrite {
            path: self.path.clone(),
            source: e,
        })?;
        file.write_all(header.location_table())
            .map_err(|e| Error::HeaderWrite {
                path: self.path.clone(),
                source: e,
            })?;
        Ok(false)
    }

    /// Delete the whole region file. Returns `true` if a file was
    /// actually removed.
    pub fn delete_file(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        self.ensure_writable()?;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Clear the read-only bit if set. Some platforms hand region
    /// files over with write permission stripped; failing to restore
    /// it is a distinct error so the caller can tell it apart from
    /// ordinary write failures.
    fn ensure_writable(&self) -> Result<()> {
        let meta = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(Error::NotWritable {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };

        let mut perms = meta.permissions();
        if perms.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            std::fs::set_permissions(&self.path, perms).map_err(|e| Error::NotWritable {
                path: self.path.clone(),
                source: e,
            })?;
        }
        Ok(())
    }
}
