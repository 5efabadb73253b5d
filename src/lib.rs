//! mc-anvil-sweeper: reclaims abandoned chunk data from Anvil region files.
//!
//! Tracks per-chunk visitation flags through a write-behind cache, then
//! incrementally scans each world's region folder and deletes chunks
//! nobody has visited within the configured flag duration. Deletion is
//! header-only: location entries are zeroed in a single write, and a
//! region file whose location table ends up empty is removed outright.
//!
//! The core is synchronous and tick-driven so it can sit inside a game
//! server's main loop; durable flag storage may be a JSON file or
//! PostgreSQL.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod flags;
pub mod protect;
pub mod region;
pub mod status;
pub mod storage;
pub mod sweep;

pub use config::SweeperConfig;
pub use context::SweeperContext;
pub use error::{Error, Result};
pub use flags::{ChunkKey, DEFAULT_FLAG, ETERNAL_FLAG, GENERATED_FLAG, VisitFlagStore};
pub use protect::{HookRegistry, MainThreadHandle, MainThreadQueue, ProtectionHook};
pub use status::{ChunkRecord, VisitStatus, resolve};
pub use storage::{
    CycleStore, FileCycleStore, FileFlagStorage, FlagStorage, MemoryCycleStore, MemoryFlagStorage,
    PostgresFlagStorage,
};
pub use sweep::{DeletionListener, LoadedChunks, SweepState, Sweeper, WorldSweeper};
