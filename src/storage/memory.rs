//! In-memory storage backends using HashMap.
//!
//! Useful for development and testing. Data is lost on restart.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{CycleStore, FlagStorage};
use crate::error::Result;
use crate::flags::{ChunkKey, DEFAULT_FLAG, replaces};

/// In-memory flag storage using a thread-safe HashMap.
///
/// The simplest backend - all records live in RAM and are lost when
/// the process exits.
pub struct MemoryFlagStorage {
    flags: RwLock<HashMap<ChunkKey, i64>>,
}

impl MemoryFlagStorage {
    pub fn new() -> Self {
        Self {
            flags: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.flags.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.read().unwrap().is_empty()
    }
}

impl Default for MemoryFlagStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl FlagStorage for MemoryFlagStorage {
    fn update(&self, batch: &[(ChunkKey, i64)]) -> Result<()> {
        let mut flags = self.flags.write().unwrap();
        for (key, value) in batch {
            if *value == DEFAULT_FLAG {
                flags.remove(key);
            } else {
                match flags.get(key) {
                    Some(&stored) if !replaces(stored, *value) => {}
                    _ => {
                        flags.insert(key.clone(), *value);
                    }
                }
            }
        }
        Ok(())
    }

    fn get(&self, key: &ChunkKey) -> Result<Option<i64>> {
        Ok(self.flags.read().unwrap().get(key).copied())
    }
}

/// In-memory cycle store.
pub struct MemoryCycleStore {
    cycles: RwLock<HashMap<String, i64>>,
}

impl MemoryCycleStore {
    pub fn new() -> Self {
        Self {
            cycles: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCycleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleStore for MemoryCycleStore {
    fn last_cycle(&self, world: &str) -> Option<i64> {
        self.cycles.read().unwrap().get(world).copied()
    }

    fn set_last_cycle(&self, world: &str, timestamp_ms: i64) -> Result<()> {
        self.cycles.write().unwrap().insert(world.to_string(), timestamp_ms);
        Ok(())
    }
}
