//! mc-anvil-sweeper: standalone sweeper daemon for Anvil region folders.
//!
//! Periodically scans the configured worlds and reclaims chunk data
//! that nobody has visited within the flag duration. Intended for
//! offline maintenance; inside a live server the library is driven
//! from the server's own tick loop instead.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::Parser;

use mc_anvil_sweeper::{
    FileCycleStore, FileFlagStorage, FlagStorage, MainThreadQueue, PostgresFlagStorage,
    Sweeper, SweeperConfig, SweeperContext,
};

#[derive(Parser)]
#[command(name = "mc-anvil-sweeper", about = "Reclaims unvisited chunk data from Anvil region files")]
struct Args {
    /// Worlds to sweep, as repeated NAME=REGION_DIR pairs.
    #[arg(long = "world", value_name = "NAME=DIR", required = true)]
    worlds: Vec<String>,

    /// Directory for the JSON flag and cycle stores.
    #[arg(long, default_value = "sweeper-data")]
    data_dir: PathBuf,

    /// PostgreSQL connection string for flag storage.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Milliseconds between scheduler ticks.
    #[arg(long, default_value_t = 1000)]
    tick_interval_ms: u64,

    /// Chunk-status checks per tick.
    #[arg(long, default_value_t = 64)]
    checks_per_tick: usize,

    /// Also delete chunks that were generated but never visited.
    #[arg(long)]
    delete_fresh_chunks: bool,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    // Create flag storage based on environment
    let storage: Arc<dyn FlagStorage> = match &args.database_url {
        Some(url) => {
            log::info!("using PostgreSQL flag storage");
            Arc::new(PostgresFlagStorage::connect(url)?)
        }
        None => {
            log::warn!(
                "DATABASE_URL not set, using JSON file storage in {}",
                args.data_dir.display()
            );
            Arc::new(FileFlagStorage::open(args.data_dir.join("flags.json"))?)
        }
    };
    let cycles = Arc::new(FileCycleStore::open(args.data_dir.join("cycles.json"))?);

    let config = SweeperConfig::default()
        .checks_per_tick(args.checks_per_tick)
        .delete_fresh_chunks(args.delete_fresh_chunks);

    // This process owns the logical main thread, so protection hooks
    // that require it are serviced from the loop below.
    let (queue, handle) = MainThreadQueue::new();
    let mut ctx = SweeperContext::new(config, storage).with_cycle_store(cycles);
    ctx.hooks.set_main_thread(handle);

    let mut sweeper = Sweeper::new(ctx);
    for entry in &args.worlds {
        let (name, dir) = entry
            .split_once('=')
            .with_context(|| format!("invalid world argument {entry:?}, expected NAME=DIR"))?;
        sweeper.add_world(name, dir)?;
    }
    sweeper.start();

    log::info!(
        "sweeping {} world(s), one tick every {}ms",
        args.worlds.len(),
        args.tick_interval_ms
    );
    loop {
        queue.run_pending();
        sweeper.tick(now_ms());
        std::thread::sleep(Duration::from_millis(args.tick_interval_ms));
    }
}
