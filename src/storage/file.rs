//! JSON-file storage backends.
//!
//! A single flat JSON object per file, keyed by the canonical chunk
//! key (or world name for cycles). Writes go through a sibling temp
//! file and a rename, so a crash mid-write never truncates the store.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{CycleStore, FlagStorage};
use crate::error::{Error, Result};
use crate::flags::{ChunkKey, DEFAULT_FLAG, replaces};

fn load_map(path: &Path) -> Result<HashMap<String, i64>> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| Error::Storage(format!("invalid JSON in {}: {}", path.display(), e))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e.into()),
    }
}

fn store_map(path: &Path, map: &HashMap<String, i64>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(map)
        .map_err(|e| Error::Storage(format!("failed to encode {}: {}", path.display(), e)))?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Flag storage backed by one JSON file.
///
/// The whole map is kept in memory and rewritten on every batch, which
/// is fine for the batch sizes the cache produces but makes this a
/// single-server backend only.
pub struct FileFlagStorage {
    path: PathBuf,
    flags: Mutex<HashMap<String, i64>>,
}

impl FileFlagStorage {
    /// Open the store, loading any existing file. A missing file is an
    /// empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let flags = load_map(&path)?;
        Ok(Self {
            path,
            flags: Mutex::new(flags),
        })
    }
}

impl FlagStorage for FileFlagStorage {
    fn update(&self, batch: &[(ChunkKey, i64)]) -> Result<()> {
        let mut flags = self.flags.lock().unwrap();
        let mut changed = false;
        for (key, value) in batch {
            let key = key.to_string();
            if *value == DEFAULT_FLAG {
                changed |= flags.remove(&key).is_some();
            } else {
                match flags.get(&key) {
                    Some(&stored) if !replaces(stored, *value) => {}
                    _ => {
                        flags.insert(key, *value);
                        changed = true;
                    }
                }
            }
        }
        if changed {
            store_map(&self.path, &flags)?;
        }
        Ok(())
    }

    fn get(&self, key: &ChunkKey) -> Result<Option<i64>> {
        Ok(self.flags.lock().unwrap().get(&key.to_string()).copied())
    }
}

/// Cycle store backed by one JSON file, keyed by world name.
pub struct FileCycleStore {
    path: PathBuf,
    cycles: Mutex<HashMap<String, i64>>,
}

impl FileCycleStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cycles = load_map(&path)?;
        Ok(Self {
            path,
            cycles: Mutex::new(cycles),
        })
    }
}

impl CycleStore for FileCycleStore {
    fn last_cycle(&self, world: &str) -> Option<i64> {
        self.cycles.lock().unwrap().get(world).copied()
    }

    fn set_last_cycle(&self, world: &str, timestamp_ms: i64) -> Result<()> {
        let mut cycles = self.cycles.lock().unwrap();
        cycles.insert(world.to_string(), timestamp_ms);
        store_map(&self.path, &cycles)
    }
}
