mod file;
mod memory;
mod postgres;

pub use file::{FileCycleStore, FileFlagStorage};
pub use memory::{MemoryCycleStore, MemoryFlagStorage};
pub use postgres::PostgresFlagStorage;

use crate::error::Result;
use crate::flags::ChunkKey;

/// Abstract durable store for per-chunk visit flags.
///
/// Implementations of this trait can keep flags in various backends:
/// - `MemoryFlagStorage` - In-memory HashMap (for testing/development)
/// - `FileFlagStorage` - JSON file on disk
/// - `PostgresFlagStorage` - PostgreSQL
///
/// Overwrite semantics are monotonic: a stored value is only replaced
/// by a greater one, except that a stored `GENERATED_FLAG` yields to
/// any real timestamp (generated chunks are flagged only until
/// visited), an incoming `GENERATED_FLAG` only fills an absent record,
/// and `DEFAULT_FLAG` always deletes the record.
pub trait FlagStorage: Send + Sync {
    /// Apply a batch of (chunk key, last visit) records.
    fn update(&self, batch: &[(ChunkKey, i64)]) -> Result<()>;

    /// Retrieve the stored last-visit value for a chunk.
    /// Returns None if the chunk was never flagged.
    fn get(&self, key: &ChunkKey) -> Result<Option<i64>>;
}

/// Remembers when each world last completed a full sweep cycle, so the
/// cooldown survives restarts.
pub trait CycleStore: Send + Sync {
    fn last_cycle(&self, world: &str) -> Option<i64>;

    fn set_last_cycle(&self, world: &str, timestamp_ms: i64) -> Result<()>;
}
