use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the sweeper.
///
/// Serializable so hosts can load it from their own config files;
/// durations use serde's native `{secs, nanos}` form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    /// How long a visit protects a chunk from deletion (default: 30 days).
    pub flag_duration: Duration,

    /// Whether generated-but-never-visited chunks may be deleted (default: false).
    pub delete_fresh_chunks: bool,

    /// Maximum chunk-status checks performed per tick (default: 64).
    pub checks_per_tick: usize,

    /// Delay between full scan cycles of a world (default: 6h).
    pub cycle_cooldown: Duration,

    /// How often the background saver persists flag mutations (default: 30s).
    pub save_interval: Duration,

    /// How long an untouched flag stays cached (default: 5 min).
    pub cache_retention: Duration,

    /// Evicted entries are persisted once this many accumulate... (default: 256)
    pub evict_batch_size: usize,

    /// ...or once the oldest evicted entry has waited this long (default: 10s).
    pub evict_batch_delay: Duration,

    /// Allow cycles of different worlds to run concurrently (default: true).
    pub concurrent_worlds: bool,

    /// Bound on main-thread round trips for protection hooks (default: 5s).
    pub main_thread_timeout: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            flag_duration: Duration::from_secs(30 * 24 * 60 * 60),
            delete_fresh_chunks: false,
            checks_per_tick: 64,
            cycle_cooldown: Duration::from_secs(6 * 60 * 60),
            save_interval: Duration::from_secs(30),
            cache_retention: Duration::from_secs(5 * 60),
            evict_batch_size: 256,
            evict_batch_delay: Duration::from_secs(10),
            concurrent_worlds: true,
            main_thread_timeout: Duration::from_secs(5),
        }
    }
}

impl SweeperConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how long a visit protects a chunk.
    pub fn flag_duration(mut self, duration: Duration) -> Self {
        self.flag_duration = duration;
        self
    }

    /// Allow deletion of generated-but-never-visited chunks.
    pub fn delete_fresh_chunks(mut self, enabled: bool) -> Self {
        self.delete_fresh_chunks = enabled;
        self
    }

    /// Set the per-tick chunk check budget.
    pub fn checks_per_tick(mut self, checks: usize) -> Self {
        self.checks_per_tick = checks.max(1);
        self
    }

    /// Set the delay between full cycles.
    pub fn cycle_cooldown(mut self, cooldown: Duration) -> Self {
        self.cycle_cooldown = cooldown;
        self
    }

    /// Set the background save interval.
    pub fn save_interval(mut self, interval: Duration) -> Self {
        self.save_interval = interval;
        self
    }

    /// Set the flag cache retention.
    pub fn cache_retention(mut self, retention: Duration) -> Self {
        self.cache_retention = retention;
        self
    }

    /// Set the eviction batch size.
    pub fn evict_batch_size(mut self, size: usize) -> Self {
        self.evict_batch_size = size.max(1);
        self
    }

    /// Set the maximum age of a queued eviction before it is flushed.
    pub fn evict_batch_delay(mut self, delay: Duration) -> Self {
        self.evict_batch_delay = delay;
        self
    }

    /// Allow or forbid concurrent cycles across worlds.
    pub fn concurrent_worlds(mut self, enabled: bool) -> Self {
        self.concurrent_worlds = enabled;
        self
    }

    /// Set the main-thread round-trip timeout.
    pub fn main_thread_timeout(mut self, timeout: Duration) -> Self {
        self.main_thread_timeout = timeout;
        self
    }

    pub(crate) fn flag_duration_ms(&self) -> i64 {
        self.flag_duration.as_millis() as i64
    }
}
