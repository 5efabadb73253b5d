//! Explicit dependency container passed to every component.
//!
//! There is no global plugin instance: everything a sweeper needs is
//! wired here at startup and handed down by reference.

use std::sync::Arc;

use crate::config::SweeperConfig;
use crate::flags::VisitFlagStore;
use crate::protect::HookRegistry;
use crate::storage::{CycleStore, FlagStorage, MemoryCycleStore};
use crate::sweep::{DeletionListener, LoadedChunks, NoLoadedChunks};

pub struct SweeperContext {
    pub config: SweeperConfig,
    pub flags: Arc<VisitFlagStore>,
    pub hooks: HookRegistry,
    pub loaded: Arc<dyn LoadedChunks>,
    pub listeners: Vec<Arc<dyn DeletionListener>>,
    pub cycles: Arc<dyn CycleStore>,
}

impl SweeperContext {
    /// Build a context around the given flag storage. Hooks, listeners
    /// and the loaded-chunk boundary start empty and are attached with
    /// the setters below.
    pub fn new(config: SweeperConfig, storage: Arc<dyn FlagStorage>) -> Self {
        let flags = Arc::new(VisitFlagStore::new(storage, &config));
        let hooks = HookRegistry::new(config.main_thread_timeout);
        Self {
            config,
            flags,
            hooks,
            loaded: Arc::new(NoLoadedChunks),
            listeners: Vec::new(),
            cycles: Arc::new(MemoryCycleStore::new()),
        }
    }

    pub fn with_cycle_store(mut self, cycles: Arc<dyn CycleStore>) -> Self {
        self.cycles = cycles;
        self
    }

    pub fn with_loaded_chunks(mut self, loaded: Arc<dyn LoadedChunks>) -> Self {
        self.loaded = loaded;
        self
    }

    pub fn add_listener(&mut self, listener: Arc<dyn DeletionListener>) {
        self.listeners.push(listener);
    }

    pub(crate) fn notify_deleted(&self, world: &str, chunk_x: i32, chunk_z: i32) {
        for listener in &self.listeners {
            listener.chunk_deleted(world, chunk_x, chunk_z);
        }
    }
}
