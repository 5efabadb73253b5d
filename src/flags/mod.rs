//! Per-chunk "last visited" timestamp store.
//!
//! Flags live in a write-back cache in front of durable storage. A
//! background saver persists expired entries in batches; while a save
//! pass is in flight, mutations are queued instead of applied so the
//! snapshot being written stays consistent, then flushed back in.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::cache::BatchedCache;
use crate::config::SweeperConfig;
use crate::error::{Error, Result};
use crate::region::REGION_SIZE;
use crate::storage::FlagStorage;

/// Never flagged / record absent. Persisting this value deletes the
/// record instead.
pub const DEFAULT_FLAG: i64 = -1;

/// Manually pinned: never expires.
pub const ETERNAL_FLAG: i64 = i64::MAX - 1;

/// Chunk was generated but never actually visited. Kept only until a
/// real visit replaces it.
pub const GENERATED_FLAG: i64 = i64::MAX;

/// Internal marker for a failed backing-store load. Never persisted;
/// surfaces as an error from [`VisitFlagStore::get`].
pub(crate) const LOAD_FAILED: i64 = i64::MIN;

/// Whether `new` may replace `stored`.
///
/// Monotonic, with carve-outs for the sentinels: `DEFAULT_FLAG` always
/// wins because it is a delete; a `GENERATED_FLAG` never downgrades an
/// existing record (it only marks chunks with no meaningful flag); a
/// stored `GENERATED_FLAG` yields to any real timestamp because
/// generated chunks are flagged only until visited.
pub fn replaces(stored: i64, new: i64) -> bool {
    if new == DEFAULT_FLAG {
        return true;
    }
    if new == GENERATED_FLAG {
        return stored == DEFAULT_FLAG;
    }
    if stored == GENERATED_FLAG {
        return true;
    }
    new > stored
}

/// Identifies a chunk across worlds.
///
/// Canonical string form is `world.x_z`, used as the durable storage
/// key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub world: String,
    pub x: i32,
    pub z: i32,
}

impl ChunkKey {
    pub fn new(world: impl Into<String>, x: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            z,
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}_{}", self.world, self.x, self.z)
    }
}

impl FromStr for ChunkKey {
    type Err = ();

    /// Parse the canonical form. World names may contain dots, so the
    /// coordinate part is taken from the last separator.
    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        let dot = s.rfind('.').ok_or(())?;
        let (world, coords) = (&s[..dot], &s[dot + 1..]);
        let (x, z) = coords.split_once('_').ok_or(())?;
        Ok(Self {
            world: world.to_string(),
            x: x.parse().map_err(|_| ())?,
            z: z.parse().map_err(|_| ())?,
        })
    }
}

/// Mutation deferred while a save pass is in flight.
enum Mutation {
    Flag { key: ChunkKey, until: i64 },
    FlagGenerated { key: ChunkKey },
    Unflag { key: ChunkKey },
}

/// Visit flag store backed by [`BatchedCache`] and durable storage.
pub struct VisitFlagStore {
    cache: Mutex<BatchedCache<ChunkKey, i64>>,
    storage: Arc<dyn FlagStorage>,
    /// Set while a persistence pass is in flight.
    saving: AtomicBool,
    queued: Mutex<Vec<Mutation>>,
}

impl VisitFlagStore {
    pub fn new(storage: Arc<dyn FlagStorage>, config: &SweeperConfig) -> Self {
        let loader_storage = storage.clone();
        let cache = BatchedCache::new(
            config.cache_retention,
            config.evict_batch_size,
            config.evict_batch_delay,
            Box::new(move |key: &ChunkKey| match loader_storage.get(key) {
                Ok(Some(value)) => value,
                Ok(None) => DEFAULT_FLAG,
                Err(e) => {
                    log::error!("failed to load flag for {}: {}", key, e);
                    LOAD_FAILED
                }
            }),
        );

        Self {
            cache: Mutex::new(cache),
            storage,
            saving: AtomicBool::new(false),
            queued: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn now_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    /// Record a visit lasting until `until_ms`.
    pub fn flag(&self, key: ChunkKey, until_ms: i64) {
        if self.saving.load(Ordering::Acquire) {
            self.queued
                .lock()
                .unwrap()
                .push(Mutation::Flag { key, until: until_ms });
            return;
        }
        self.apply_flag(key, until_ms);
    }

    /// Mark a chunk as generated-but-unvisited. Only takes effect when
    /// no meaningful flag exists; it never downgrades a visit or an
    /// eternal pin.
    pub fn flag_generated(&self, key: ChunkKey) {
        if self.saving.load(Ordering::Acquire) {
            self.queued.lock().unwrap().push(Mutation::FlagGenerated { key });
            return;
        }
        self.apply_flag_generated(key);
    }

    /// Flag the `(2*radius+1)²` chunk square centered on the given
    /// chunk. Radius 0 flags exactly one chunk.
    pub fn flag_radius(&self, world: &str, center_x: i32, center_z: i32, radius: i32, until_ms: i64) {
        let radius = radius.max(0);
        for dx in -radius..=radius {
            for dz in -radius..=radius {
                self.flag(ChunkKey::new(world, center_x + dx, center_z + dz), until_ms);
            }
        }
    }

    /// Drop a chunk's flag and delete its durable record.
    pub fn unflag(&self, key: ChunkKey) {
        if self.saving.load(Ordering::Acquire) {
            self.queued.lock().unwrap().push(Mutation::Unflag { key });
            return;
        }
        self.apply_unflag(key);
    }

    /// Bulk-unflag the 1024 chunks of a region. Called right after a
    /// whole-region delete so dead entries do not pile up in storage.
    pub fn unflag_region(&self, world: &str, min_chunk_x: i32, min_chunk_z: i32) {
        for dx in 0..REGION_SIZE {
            for dz in 0..REGION_SIZE {
                self.unflag(ChunkKey::new(world, min_chunk_x + dx, min_chunk_z + dz));
            }
        }
    }

    /// Current flag value for a chunk, loading from durable storage on
    /// a cache miss. `DEFAULT_FLAG` means never flagged.
    pub fn get(&self, key: &ChunkKey) -> Result<i64> {
        let now = Self::now_ms();
        let mut cache = self.cache.lock().unwrap();
        let value = *cache.get(key, now);
        if value == LOAD_FAILED {
            // Drop the marker so the next cycle retries the load.
            cache.remove(key);
            return Err(Error::Storage(format!("flag load failed for {}", key)));
        }
        Ok(value)
    }

    fn apply_flag(&self, key: ChunkKey, until_ms: i64) {
        let now = Self::now_ms();
        let mut cache = self.cache.lock().unwrap();
        // A save pass may have begun since the caller's fast-path
        // check; re-verify under the lock so the mutation is queued.
        if self.saving.load(Ordering::Acquire) {
            self.queued
                .lock()
                .unwrap()
                .push(Mutation::Flag { key, until: until_ms });
            return;
        }
        let stored = *cache.get(&key, now);
        if stored == LOAD_FAILED || replaces(stored, until_ms) {
            cache.put(key, until_ms, now);
        }
    }

    fn apply_flag_generated(&self, key: ChunkKey) {
        let now = Self::now_ms();
        let mut cache = self.cache.lock().unwrap();
        if self.saving.load(Ordering::Acquire) {
            self.queued.lock().unwrap().push(Mutation::FlagGenerated { key });
            return;
        }
        let stored = *cache.get(&key, now);
        if stored == DEFAULT_FLAG || stored == LOAD_FAILED {
            cache.put(key, GENERATED_FLAG, now);
        }
    }

    fn apply_unflag(&self, key: ChunkKey) {
        let now = Self::now_ms();
        let mut cache = self.cache.lock().unwrap();
        if self.saving.load(Ordering::Acquire) {
            self.queued.lock().unwrap().push(Mutation::Unflag { key });
            return;
        }
        cache.remove(&key);
        // Route the tombstone through the eviction batch so the
        // durable record is deleted on the next flush.
        cache.queue_eviction(key, DEFAULT_FLAG, now);
    }

    /// One persistence pass: collect expired entries under the lock,
    /// then write them with the lock released so readers are never
    /// stalled behind the durable write. Mutations arriving during the
    /// pass are queued, then flushed.
    pub fn maintain(&self) {
        self.saving.store(true, Ordering::Release);
        let batch = {
            let mut cache = self.cache.lock().unwrap();
            cache.sweep(Self::now_ms())
        };
        self.persist(batch);
        self.saving.store(false, Ordering::Release);
        self.flush_queued();
    }

    fn persist(&self, batch: Vec<(ChunkKey, i64)>) {
        if batch.is_empty() {
            return;
        }
        let count = batch.len();
        if let Err(e) = self.storage.update(&batch) {
            // Best effort: the entries are not retried.
            log::error!("failed to persist {} flag entries: {}", count, e);
        }
    }

    fn flush_queued(&self) {
        let queued = std::mem::take(&mut *self.queued.lock().unwrap());
        for mutation in queued {
            match mutation {
                Mutation::Flag { key, until } => self.apply_flag(key, until),
                Mutation::FlagGenerated { key } => self.apply_flag_generated(key),
                Mutation::Unflag { key } => self.apply_unflag(key),
            }
        }
    }

    /// Synchronous shutdown flush: queued mutations first, then every
    /// cached entry is persisted, bypassing batching.
    pub fn close(&self) {
        self.saving.store(false, Ordering::Release);
        self.flush_queued();
        let batch = { self.cache.lock().unwrap().invalidate_all() };
        self.persist(batch);
    }

    #[cfg(test)]
    pub(crate) fn cached_len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    #[cfg(test)]
    pub(crate) fn set_saving(&self, saving: bool) {
        self.saving.store(saving, Ordering::Release);
    }
}

/// Background thread driving [`VisitFlagStore::maintain`] at a fixed
/// interval.
pub struct FlagSaver {
    handle: Option<JoinHandle<()>>,
    stop_tx: mpsc::Sender<()>,
}

impl FlagSaver {
    pub fn spawn(store: Arc<VisitFlagStore>, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("flag-saver".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => store.maintain(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::debug!("flag saver stopped");
            })
            .expect("failed to spawn flag-saver thread");

        Self {
            handle: Some(handle),
            stop_tx,
        }
    }

    /// Stop the saver and wait for it to exit. Does not flush; the
    /// caller closes the store afterwards.
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
