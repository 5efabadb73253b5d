//! Incremental, resumable deletion scheduler.
//!
//! One [`WorldSweeper`] per world walks region files with a persistent
//! cursor, checking a bounded number of chunks per tick so the host
//! loop never stalls. Once every chunk of a region has been checked, a
//! single decision is made for the whole region: nothing, zero the
//! deletable location entries with one header write, or drop the file
//! entirely when all 1024 chunks qualify.

use std::path::PathBuf;

use crate::context::SweeperContext;
use crate::error::Result;
use crate::flags::{ChunkKey, FlagSaver, VisitFlagStore};
use crate::region::{
    CHUNKS_PER_REGION, RegionCodec, RegionHeader, RegionPos, discover_regions, index_to_local,
};
use crate::status::{ChunkRecord, resolve};

/// Host boundary: which chunks are currently loaded in memory. Loaded
/// chunks are never deleted regardless of computed status.
pub trait LoadedChunks: Send + Sync {
    fn is_loaded(&self, world: &str, chunk_x: i32, chunk_z: i32) -> bool;
}

/// For offline worlds nothing is loaded.
pub struct NoLoadedChunks;

impl LoadedChunks for NoLoadedChunks {
    fn is_loaded(&self, _world: &str, _chunk_x: i32, _chunk_z: i32) -> bool {
        false
    }
}

/// Notified once per deleted chunk, after the in-memory deletion has
/// already happened. Consumers cannot cancel it.
pub trait DeletionListener: Send + Sync {
    fn chunk_deleted(&self, world: &str, chunk_x: i32, chunk_z: i32);
}

/// Cursor of a sweep cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    Idle,
    Scanning { region: usize, chunk: usize },
    Completed { next_run_at: i64 },
}

/// Per-region accumulator while its 1024 chunks are being checked.
struct RegionScan {
    pos: RegionPos,
    header: RegionHeader,
    deletable: Vec<usize>,
}

/// Scans one world's region folder and reclaims unvisited chunks.
pub struct WorldSweeper {
    world: String,
    region_dir: PathBuf,
    regions: Vec<RegionPos>,
    state: SweepState,
    scan: Option<RegionScan>,
    paused: bool,
}

impl WorldSweeper {
    /// Register a world. Fails when the region folder is missing;
    /// deletion must never be scheduled for such a world.
    pub fn new(
        world: impl Into<String>,
        region_dir: impl Into<PathBuf>,
        ctx: &SweeperContext,
    ) -> Result<Self> {
        let world = world.into();
        let region_dir = region_dir.into();
        // Probe the folder now so a misconfigured world is rejected at
        // registration instead of silently idling.
        discover_regions(&world, &region_dir)?;

        // Resume the cooldown from the previous run if known.
        let state = match ctx.cycles.last_cycle(&world) {
            Some(last) => SweepState::Completed {
                next_run_at: last + ctx.config.cycle_cooldown.as_millis() as i64,
            },
            None => SweepState::Idle,
        };

        Ok(Self {
            world,
            region_dir,
            regions: Vec::new(),
            state,
            scan: None,
            paused: false,
        })
    }

    pub fn world(&self) -> &str {
        &self.world
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    pub fn is_scanning(&self) -> bool {
        matches!(self.state, SweepState::Scanning { .. })
    }

    /// Whether a tick at `now` would perform work.
    pub fn is_due(&self, now_ms: i64) -> bool {
        if self.paused && self.scan.is_none() {
            return false;
        }
        match self.state {
            SweepState::Idle | SweepState::Scanning { .. } => true,
            SweepState::Completed { next_run_at } => now_ms >= next_run_at,
        }
    }

    /// Halt new check work. An already-started region is allowed to
    /// finish its final batch so no region is left partially checked.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Advance the sweep by one bounded invocation: at most
    /// `checks_per_tick` chunk-status checks.
    pub fn tick(&mut self, ctx: &SweeperContext, now_ms: i64) {
        let mut budget = ctx.config.checks_per_tick;

        loop {
            match self.state {
                SweepState::Idle => {
                    if self.paused {
                        return;
                    }
                    match discover_regions(&self.world, &self.region_dir) {
                        Ok(mut regions) => {
                            regions.sort_by_key(|r| (r.x, r.z));
                            log::info!(
                                "world {}: starting sweep cycle over {} regions",
                                self.world,
                                regions.len()
                            );
                            self.regions = regions;
                            self.state = SweepState::Scanning { region: 0, chunk: 0 };
                        }
                        Err(e) => {
                            // Fatal for this world until corrected.
                            log::error!("world {}: cannot start cycle: {}", self.world, e);
                            return;
                        }
                    }
                }

                SweepState::Scanning { region, chunk } => {
                    if region >= self.regions.len() {
                        self.complete_cycle(ctx, now_ms);
                        return;
                    }

                    if self.scan.is_none() {
                        if self.paused {
                            return;
                        }
                        let pos = self.regions[region];
                        match self.start_region(pos) {
                            Ok(scan) => self.scan = Some(scan),
                            Err(e) => {
                                // Abandon this region for the cycle;
                                // the cursor still advances so the
                                // scan completes.
                                log::warn!("world {}: skipping region {}: {}", self.world, pos, e);
                                self.state = SweepState::Scanning { region: region + 1, chunk: 0 };
                                continue;
                            }
                        }
                    }

                    let Self { world, scan, state, .. } = self;
                    let scan_ref = scan.as_mut().expect("scan present while scanning");
                    let mut chunk = chunk;
                    while chunk < CHUNKS_PER_REGION {
                        if budget == 0 {
                            *state = SweepState::Scanning { region, chunk };
                            return;
                        }
                        check_chunk(world, ctx, scan_ref, chunk, now_ms);
                        budget -= 1;
                        chunk += 1;
                    }

                    let finished = scan.take().expect("scan present while scanning");
                    self.finish_region(ctx, finished);
                    self.state = SweepState::Scanning { region: region + 1, chunk: 0 };

                    if self.paused {
                        return;
                    }
                }

                SweepState::Completed { next_run_at } => {
                    if self.paused || now_ms < next_run_at {
                        return;
                    }
                    self.state = SweepState::Idle;
                }
            }
        }
    }

    fn start_region(&self, pos: RegionPos) -> Result<RegionScan> {
        let codec = RegionCodec::open(self.region_dir.join(pos.filename()));
        let header = codec.read_header()?;
        Ok(RegionScan {
            pos,
            header,
            deletable: Vec::new(),
        })
    }

    /// Apply the per-region decision once all 1024 chunks are checked.
    fn finish_region(&self, ctx: &SweeperContext, scan: RegionScan) {
        let deletable = scan.deletable.len();
        if deletable == 0 {
            return;
        }

        let codec = RegionCodec::open(self.region_dir.join(scan.pos.filename()));

        if deletable == CHUNKS_PER_REGION {
            // Dropping the file is cheaper than 1024 pointer edits and
            // reclaims the payload sectors immediately.
            if let Err(e) = codec.delete_file() {
                log::warn!("world {}: failed to delete region {}: {}", self.world, scan.pos, e);
                return;
            }
            log::info!("world {}: deleted region file {}", self.world, scan.pos);
            for index in 0..CHUNKS_PER_REGION {
                let (lx, lz) = index_to_local(index);
                let (cx, cz) = scan.pos.local_to_world(lx, lz);
                ctx.notify_deleted(&self.world, cx, cz);
            }
            ctx.flags
                .unflag_region(&self.world, scan.pos.min_chunk_x(), scan.pos.min_chunk_z());
            return;
        }

        let mut header = scan.header;
        for &index in &scan.deletable {
            let (lx, lz) = index_to_local(index);
            header.delete_chunk(lx, lz);
        }
        match codec.write_header(&header) {
            Ok(file_removed) => {
                log::debug!(
                    "world {}: region {}: deleted {} chunks{}",
                    self.world,
                    scan.pos,
                    deletable,
                    if file_removed { ", file removed" } else { "" }
                );
            }
            Err(e) => {
                // Retried on the next full cycle.
                log::warn!("world {}: failed to update region {}: {}", self.world, scan.pos, e);
                return;
            }
        }

        for &index in &scan.deletable {
            let (lx, lz) = index_to_local(index);
            let (cx, cz) = scan.pos.local_to_world(lx, lz);
            ctx.notify_deleted(&self.world, cx, cz);
            ctx.flags.unflag(ChunkKey::new(&self.world, cx, cz));
        }
    }

    fn complete_cycle(&mut self, ctx: &SweeperContext, now_ms: i64) {
        if let Err(e) = ctx.cycles.set_last_cycle(&self.world, now_ms) {
            log::warn!("world {}: failed to persist cycle time: {}", self.world, e);
        }
        let next_run_at = now_ms + ctx.config.cycle_cooldown.as_millis() as i64;
        self.state = SweepState::Completed { next_run_at };
        log::info!("world {}: sweep cycle complete", self.world);
    }
}

/// Check one chunk and record it as deletable when status and the
/// loaded-chunk boundary both allow it.
fn check_chunk(
    world: &str,
    ctx: &SweeperContext,
    scan: &mut RegionScan,
    chunk_index: usize,
    now_ms: i64,
) {
    let (lx, lz) = index_to_local(chunk_index);
    let (cx, cz) = scan.pos.local_to_world(lx, lz);

    let record = ChunkRecord {
        world,
        chunk_x: cx,
        chunk_z: cz,
        orphaned: scan.header.is_orphaned(lx, lz),
        last_modified_ms: scan.header.last_modified_ms(lx, lz),
    };
    if record.orphaned {
        // Already absent, nothing to decide.
        return;
    }

    let flag_value = match ctx.flags.get(&ChunkKey::new(world, cx, cz)) {
        Ok(value) => value,
        Err(e) => {
            // Indeterminate: retried next cycle.
            log::warn!("world {}: flag lookup failed for chunk {},{}: {}", world, cx, cz, e);
            return;
        }
    };

    let status = resolve(&record, flag_value, now_ms, &ctx.config, &ctx.hooks);
    if status.is_deletable(ctx.config.delete_fresh_chunks)
        && !ctx.loaded.is_loaded(world, cx, cz)
    {
        scan.deletable.push(chunk_index);
    }
}

/// Coordinates the per-world sweepers and the background flag saver.
pub struct Sweeper {
    ctx: SweeperContext,
    worlds: Vec<WorldSweeper>,
    saver: Option<FlagSaver>,
}

impl Sweeper {
    pub fn new(ctx: SweeperContext) -> Self {
        Self {
            ctx,
            worlds: Vec::new(),
            saver: None,
        }
    }

    pub fn context(&self) -> &SweeperContext {
        &self.ctx
    }

    pub fn flags(&self) -> &std::sync::Arc<VisitFlagStore> {
        &self.ctx.flags
    }

    /// Register a world for sweeping. Rejects worlds whose region
    /// folder is missing; other worlds are unaffected.
    pub fn add_world(&mut self, world: impl Into<String>, region_dir: impl Into<PathBuf>) -> Result<()> {
        let sweeper = WorldSweeper::new(world, region_dir, &self.ctx)?;
        log::info!("registered world {}", sweeper.world());
        self.worlds.push(sweeper);
        Ok(())
    }

    /// Start the background flag saver.
    pub fn start(&mut self) {
        if self.saver.is_none() {
            self.saver = Some(FlagSaver::spawn(
                self.ctx.flags.clone(),
                self.ctx.config.save_interval,
            ));
        }
    }

    /// One bounded invocation from the host loop.
    ///
    /// With `concurrent_worlds` disabled, at most one world advances
    /// per tick: a mid-cycle world first, otherwise the first world
    /// whose cooldown has elapsed.
    pub fn tick(&mut self, now_ms: i64) {
        if self.ctx.config.concurrent_worlds {
            for world in &mut self.worlds {
                world.tick(&self.ctx, now_ms);
            }
        } else if let Some(world) = self.worlds.iter_mut().find(|w| w.is_scanning()) {
            world.tick(&self.ctx, now_ms);
        } else if let Some(world) = self.worlds.iter_mut().find(|w| w.is_due(now_ms)) {
            world.tick(&self.ctx, now_ms);
        }
    }

    pub fn pause(&mut self) {
        for world in &mut self.worlds {
            world.pause();
        }
    }

    pub fn resume(&mut self) {
        for world in &mut self.worlds {
            world.resume();
        }
    }

    pub fn world_state(&self, world: &str) -> Option<SweepState> {
        self.worlds.iter().find(|w| w.world() == world).map(|w| w.state())
    }

    /// Stop the saver and synchronously flush every pending flag
    /// mutation and cache write.
    pub fn shutdown(mut self) {
        if let Some(saver) = self.saver.take() {
            saver.stop();
        }
        self.ctx.flags.close();
        log::info!("sweeper shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SweeperConfig;
    use crate::flags::{ETERNAL_FLAG, GENERATED_FLAG};
    use crate::region::{REGION_SIZE, RegionHeader, local_to_index};
    use crate::storage::{FlagStorage, MemoryFlagStorage};
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::{TempDir, tempdir};

    const NOW: i64 = 1_700_000_000_000;

    fn test_config() -> SweeperConfig {
        SweeperConfig::default()
            .checks_per_tick(4096)
            .flag_duration(std::time::Duration::from_secs(3600))
    }

    fn context(config: SweeperConfig) -> SweeperContext {
        SweeperContext::new(config, Arc::new(MemoryFlagStorage::new()))
    }

    /// Write a region file where every chunk is present and stale.
    fn write_full_region(dir: &Path, pos: RegionPos) {
        let mut header = RegionHeader::empty();
        for index in 0..CHUNKS_PER_REGION {
            let (x, z) = index_to_local(index);
            header.set_location(x, z, 2 + index as u32, 1);
            // Old enough to be far outside any flag duration.
            header.set_timestamp(x, z, 1_000_000);
        }
        std::fs::write(dir.join(pos.filename()), header.as_bytes()).unwrap();
    }

    fn run_to_completion(sweeper: &mut WorldSweeper, ctx: &SweeperContext) {
        for _ in 0..10_000 {
            sweeper.tick(ctx, NOW);
            if matches!(sweeper.state(), SweepState::Completed { .. }) {
                return;
            }
        }
        panic!("sweep did not complete");
    }

    struct RecordingListener(Mutex<Vec<(i32, i32)>>);

    impl DeletionListener for RecordingListener {
        fn chunk_deleted(&self, _world: &str, chunk_x: i32, chunk_z: i32) {
            self.0.lock().unwrap().push((chunk_x, chunk_z));
        }
    }

    fn world_dir() -> TempDir {
        tempdir().unwrap()
    }

    #[test]
    fn test_missing_region_folder_rejected() {
        let ctx = context(test_config());
        let err = WorldSweeper::new("world", "/nonexistent/region", &ctx).err().unwrap();
        assert!(matches!(err, crate::error::Error::MissingRegionFolder { .. }));
    }

    #[test]
    fn test_fully_stale_region_is_deleted_as_file() {
        let dir = world_dir();
        let pos = RegionPos::new(0, 0);
        write_full_region(dir.path(), pos);

        let listener = Arc::new(RecordingListener(Mutex::new(Vec::new())));
        let mut ctx = context(test_config());
        ctx.add_listener(listener.clone());

        let mut sweeper = WorldSweeper::new("world", dir.path(), &ctx).unwrap();
        run_to_completion(&mut sweeper, &ctx);

        assert!(!dir.path().join(pos.filename()).exists());
        assert_eq!(listener.0.lock().unwrap().len(), 1024);
    }

    #[test]
    fn test_partial_region_gets_one_header_write() {
        let dir = world_dir();
        let pos = RegionPos::new(0, 0);
        write_full_region(dir.path(), pos);

        let listener = Arc::new(RecordingListener(Mutex::new(Vec::new())));
        let mut ctx = context(test_config());
        ctx.add_listener(listener.clone());

        // 24 chunks are recently visited, 1000 are stale.
        for index in 0..24 {
            let (lx, lz) = index_to_local(index);
            let (cx, cz) = pos.local_to_world(lx, lz);
            ctx.flags.flag(ChunkKey::new("world", cx, cz), NOW + 1_000_000);
        }

        let mut sweeper = WorldSweeper::new("world", dir.path(), &ctx).unwrap();
        run_to_completion(&mut sweeper, &ctx);

        let path = dir.path().join(pos.filename());
        assert!(path.exists());
        assert_eq!(listener.0.lock().unwrap().len(), 1000);

        let header = RegionCodec::open(&path).read_header().unwrap();
        assert_eq!(header.present_count(), 24);
        for index in 0..24 {
            let (lx, lz) = index_to_local(index);
            assert!(!header.is_orphaned(lx, lz));
        }
    }

    #[test]
    fn test_loaded_chunks_are_spared() {
        struct OneLoaded;
        impl LoadedChunks for OneLoaded {
            fn is_loaded(&self, _world: &str, chunk_x: i32, chunk_z: i32) -> bool {
                chunk_x == 0 && chunk_z == 0
            }
        }

        let dir = world_dir();
        let pos = RegionPos::new(0, 0);
        write_full_region(dir.path(), pos);

        let ctx = context(test_config()).with_loaded_chunks(Arc::new(OneLoaded));
        let mut sweeper = WorldSweeper::new("world", dir.path(), &ctx).unwrap();
        run_to_completion(&mut sweeper, &ctx);

        // 1023 deleted via header write; the loaded chunk survives.
        let path = dir.path().join(pos.filename());
        assert!(path.exists());
        let header = RegionCodec::open(&path).read_header().unwrap();
        assert_eq!(header.present_count(), 1);
        assert!(!header.is_orphaned(0, 0));
    }

    #[test]
    fn test_flagged_chunks_block_region() {
        let dir = world_dir();
        let pos = RegionPos::new(-1, 2);
        write_full_region(dir.path(), pos);

        let ctx = context(test_config());
        // Pin one chunk eternally: the rest is deletable, so the
        // region goes the header-write path, not whole-file delete.
        let (cx, cz) = pos.local_to_world(5, 5);
        ctx.flags.flag(ChunkKey::new("world", cx, cz), ETERNAL_FLAG);

        let mut sweeper = WorldSweeper::new("world", dir.path(), &ctx).unwrap();
        run_to_completion(&mut sweeper, &ctx);

        let header = RegionCodec::open(dir.path().join(pos.filename()))
            .read_header()
            .unwrap();
        assert_eq!(header.present_count(), 1);
        assert!(!header.is_orphaned(5, 5));
    }

    #[test]
    fn test_generated_chunks_spared_by_policy() {
        let dir = world_dir();
        let pos = RegionPos::new(0, 0);
        write_full_region(dir.path(), pos);

        let ctx = context(test_config().delete_fresh_chunks(false));
        for x in 0..REGION_SIZE {
            for z in 0..REGION_SIZE {
                ctx.flags.flag_generated(ChunkKey::new("world", x, z));
            }
        }

        let mut sweeper = WorldSweeper::new("world", dir.path(), &ctx).unwrap();
        run_to_completion(&mut sweeper, &ctx);

        // Policy spares every generated chunk: file untouched.
        assert!(dir.path().join(pos.filename()).exists());
        let header = RegionCodec::open(dir.path().join(pos.filename()))
            .read_header()
            .unwrap();
        assert_eq!(header.present_count(), 1024);
    }

    #[test]
    fn test_generated_chunks_deleted_when_policy_allows() {
        let dir = world_dir();
        let pos = RegionPos::new(0, 0);
        write_full_region(dir.path(), pos);

        let ctx = context(test_config().delete_fresh_chunks(true));
        for x in 0..REGION_SIZE {
            for z in 0..REGION_SIZE {
                ctx.flags.flag_generated(ChunkKey::new("world", x, z));
            }
        }

        let mut sweeper = WorldSweeper::new("world", dir.path(), &ctx).unwrap();
        run_to_completion(&mut sweeper, &ctx);

        assert!(!dir.path().join(pos.filename()).exists());
    }

    #[test]
    fn test_budget_bounds_each_tick() {
        let dir = world_dir();
        write_full_region(dir.path(), RegionPos::new(0, 0));

        let ctx = context(test_config().checks_per_tick(100));
        let mut sweeper = WorldSweeper::new("world", dir.path(), &ctx).unwrap();

        sweeper.tick(&ctx, NOW);
        assert_eq!(sweeper.state(), SweepState::Scanning { region: 0, chunk: 100 });
        sweeper.tick(&ctx, NOW);
        assert_eq!(sweeper.state(), SweepState::Scanning { region: 0, chunk: 200 });
    }

    #[test]
    fn test_pause_finishes_current_region_only() {
        let dir = world_dir();
        write_full_region(dir.path(), RegionPos::new(0, 0));
        write_full_region(dir.path(), RegionPos::new(1, 0));

        let ctx = context(test_config().checks_per_tick(100));
        let mut sweeper = WorldSweeper::new("world", dir.path(), &ctx).unwrap();

        // Get partway into the first region, then pause.
        sweeper.tick(&ctx, NOW);
        assert_eq!(sweeper.state(), SweepState::Scanning { region: 0, chunk: 100 });
        sweeper.pause();

        // The started region is allowed to finish...
        for _ in 0..20 {
            sweeper.tick(&ctx, NOW);
        }
        assert_eq!(sweeper.state(), SweepState::Scanning { region: 1, chunk: 0 });
        assert!(!dir.path().join("r.0.0.mca").exists());

        // ...but the next region is not started while paused.
        assert!(dir.path().join("r.1.0.mca").exists());

        sweeper.resume();
        run_to_completion(&mut sweeper, &ctx);
        assert!(!dir.path().join("r.1.0.mca").exists());
    }

    #[test]
    fn test_cycle_cooldown_and_persistence() {
        let dir = world_dir();
        let config = test_config();
        let cooldown = config.cycle_cooldown.as_millis() as i64;
        let ctx = context(config);

        let mut sweeper = WorldSweeper::new("world", dir.path(), &ctx).unwrap();
        run_to_completion(&mut sweeper, &ctx);
        assert_eq!(sweeper.state(), SweepState::Completed { next_run_at: NOW + cooldown });
        assert_eq!(ctx.cycles.last_cycle("world"), Some(NOW));

        // Not due yet.
        sweeper.tick(&ctx, NOW + 1000);
        assert!(matches!(sweeper.state(), SweepState::Completed { .. }));

        // Due: a new cycle starts (and, the folder being empty,
        // completes within the same tick with a fresh cooldown).
        sweeper.tick(&ctx, NOW + cooldown);
        assert_eq!(
            sweeper.state(),
            SweepState::Completed { next_run_at: NOW + 2 * cooldown }
        );
        assert_eq!(ctx.cycles.last_cycle("world"), Some(NOW + cooldown));

        // A fresh sweeper resumes the cooldown from the cycle store.
        let resumed = WorldSweeper::new("world", dir.path(), &ctx).unwrap();
        assert_eq!(
            resumed.state(),
            SweepState::Completed { next_run_at: NOW + 2 * cooldown }
        );
    }

    #[test]
    fn test_deleted_region_unflags_chunks() {
        let dir = world_dir();
        let pos = RegionPos::new(0, 0);
        write_full_region(dir.path(), pos);

        let ctx = context(test_config());
        // Expired flags: chunks are deletable, but records exist.
        for x in 0..REGION_SIZE {
            for z in 0..REGION_SIZE {
                ctx.flags.flag(ChunkKey::new("world", x, z), NOW - 1_000_000_000);
            }
        }

        let mut sweeper = WorldSweeper::new("world", dir.path(), &ctx).unwrap();
        run_to_completion(&mut sweeper, &ctx);
        assert!(!dir.path().join(pos.filename()).exists());

        // Every flag is gone from the store after the region delete.
        for x in 0..REGION_SIZE {
            for z in 0..REGION_SIZE {
                let value = ctx.flags.get(&ChunkKey::new("world", x, z)).unwrap();
                assert_eq!(value, crate::flags::DEFAULT_FLAG);
            }
        }
    }

    #[test]
    fn test_empty_folder_completes_immediately() {
        let dir = world_dir();
        let ctx = context(test_config());
        let mut sweeper = WorldSweeper::new("world", dir.path(), &ctx).unwrap();
        sweeper.tick(&ctx, NOW);
        assert!(matches!(sweeper.state(), SweepState::Completed { .. }));
    }

    #[test]
    fn test_non_concurrent_mode_runs_one_world() {
        let dir_a = world_dir();
        let dir_b = world_dir();
        write_full_region(dir_a.path(), RegionPos::new(0, 0));
        write_full_region(dir_b.path(), RegionPos::new(0, 0));

        let ctx = context(test_config().checks_per_tick(100).concurrent_worlds(false));
        let mut sweeper = Sweeper::new(ctx);
        sweeper.add_world("alpha", dir_a.path()).unwrap();
        sweeper.add_world("beta", dir_b.path()).unwrap();

        sweeper.tick(NOW);
        sweeper.tick(NOW);

        // Only alpha has advanced; beta has not started.
        assert!(matches!(
            sweeper.world_state("alpha"),
            Some(SweepState::Scanning { .. })
        ));
        assert_eq!(sweeper.world_state("beta"), Some(SweepState::Idle));
    }

    #[test]
    fn test_concurrent_mode_advances_all_worlds() {
        let dir_a = world_dir();
        let dir_b = world_dir();
        write_full_region(dir_a.path(), RegionPos::new(0, 0));
        write_full_region(dir_b.path(), RegionPos::new(0, 0));

        let ctx = context(test_config().checks_per_tick(100));
        let mut sweeper = Sweeper::new(ctx);
        sweeper.add_world("alpha", dir_a.path()).unwrap();
        sweeper.add_world("beta", dir_b.path()).unwrap();

        sweeper.tick(NOW);
        assert!(matches!(
            sweeper.world_state("alpha"),
            Some(SweepState::Scanning { .. })
        ));
        assert!(matches!(
            sweeper.world_state("beta"),
            Some(SweepState::Scanning { .. })
        ));
    }

    #[test]
    fn test_generated_flag_value_round_trip_through_sweep() {
        // A GENERATED flag on a recently written chunk must survive a
        // cycle with delete_fresh_chunks=false.
        let dir = world_dir();
        let pos = RegionPos::new(0, 0);
        let mut header = RegionHeader::empty();
        header.set_location(0, 0, 2, 1);
        header.set_timestamp(0, 0, (NOW / 1000) as u32);
        std::fs::write(dir.path().join(pos.filename()), header.as_bytes()).unwrap();

        let ctx = context(test_config());
        ctx.flags.flag_generated(ChunkKey::new("world", 0, 0));

        let mut sweeper = WorldSweeper::new("world", dir.path(), &ctx).unwrap();
        run_to_completion(&mut sweeper, &ctx);

        assert!(dir.path().join(pos.filename()).exists());
        assert_eq!(
            ctx.flags.get(&ChunkKey::new("world", 0, 0)).unwrap(),
            GENERATED_FLAG
        );
    }

    #[test]
    fn test_shutdown_flushes_flags() {
        let dir = world_dir();
        let storage = Arc::new(MemoryFlagStorage::new());
        let ctx = SweeperContext::new(test_config(), storage.clone());
        let mut sweeper = Sweeper::new(ctx);
        sweeper.add_world("world", dir.path()).unwrap();
        sweeper.start();

        let key = ChunkKey::new("world", 9, 9);
        sweeper.flags().flag(key.clone(), NOW + 5000);
        sweeper.shutdown();

        assert_eq!(storage.get(&key).unwrap(), Some(NOW + 5000));
    }

    #[test]
    fn test_local_index_matches_wire_format() {
        // index = x + z * 32 in both tables.
        assert_eq!(local_to_index(1, 0), 1);
        assert_eq!(local_to_index(0, 1), 32);
    }
}
