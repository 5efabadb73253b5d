//! Pluggable protection predicates ("hooks").
//!
//! Other subsystems can veto deletion of a chunk for domain-specific
//! reasons. Hooks are registered explicitly through a name → factory
//! table; there is no dynamic loading. Hooks that declare themselves
//! not async-capable are evaluated on the host's logical main thread
//! through [`MainThreadQueue`] with a bounded round trip.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::error::{Error, Result};

/// External boolean check contributed by another subsystem.
pub trait ProtectionHook: Send + Sync {
    /// Name used for registration and logging.
    fn name(&self) -> &str;

    /// Whether the chunk must not be deleted.
    fn is_chunk_protected(&self, world: &str, chunk_x: i32, chunk_z: i32) -> Result<bool>;

    /// Whether the hook may be queried off the main thread.
    fn is_async_capable(&self) -> bool {
        false
    }

    /// Dependency/availability check, probed at registration and on
    /// revalidation. Implementations may answer by issuing a harmless
    /// dummy coordinate query against their backing plugin.
    fn is_usable(&self) -> bool {
        true
    }
}

/// Factory for a named hook. Returns None when the integration's
/// dependency is absent.
pub type HookFactory = fn() -> Option<Arc<dyn ProtectionHook>>;

struct RegisteredHook {
    hook: Arc<dyn ProtectionHook>,
    usable: AtomicBool,
}

/// Explicit hook registry, populated at startup.
pub struct HookRegistry {
    hooks: Vec<RegisteredHook>,
    main_thread: Option<MainThreadHandle>,
    timeout: Duration,
}

impl HookRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            hooks: Vec::new(),
            main_thread: None,
            timeout,
        }
    }

    /// Route non-async-capable hooks through the given host queue.
    /// Without a handle they are called inline, which is only correct
    /// when the caller itself is the main thread.
    pub fn set_main_thread(&mut self, handle: MainThreadHandle) {
        self.main_thread = Some(handle);
    }

    /// Register a hook, probing its usability once.
    pub fn register(&mut self, hook: Arc<dyn ProtectionHook>) {
        let usable = hook.is_usable();
        if !usable {
            log::warn!("protection hook {} is not usable, disabled", hook.name());
        } else {
            log::info!("registered protection hook {}", hook.name());
        }
        self.hooks.push(RegisteredHook {
            hook,
            usable: AtomicBool::new(usable),
        });
    }

    /// Instantiate and register every hook from a static factory
    /// table. Factories returning None (missing dependency) are
    /// skipped.
    pub fn register_table(&mut self, table: &[(&str, HookFactory)]) {
        for (name, factory) in table {
            match factory() {
                Some(hook) => self.register(hook),
                None => log::debug!("protection hook {} unavailable, skipped", name),
            }
        }
    }

    /// Re-probe disabled hooks.
    pub fn revalidate(&self) {
        for entry in &self.hooks {
            if !entry.usable.load(Ordering::Acquire) && entry.hook.is_usable() {
                log::info!("protection hook {} re-enabled", entry.hook.name());
                entry.usable.store(true, Ordering::Release);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Query hooks in registration order; the first one answering
    /// "protected" short-circuits.
    ///
    /// A hook failing on its own account is disabled until
    /// revalidation and the query continues. A failed or timed-out
    /// main-thread round trip aborts the whole query with an error:
    /// the caller must treat the chunk as indeterminate, never as
    /// deletable.
    pub fn is_protected(&self, world: &str, chunk_x: i32, chunk_z: i32) -> Result<bool> {
        for entry in &self.hooks {
            if !entry.usable.load(Ordering::Acquire) {
                continue;
            }

            let answer = if entry.hook.is_async_capable() || self.main_thread.is_none() {
                entry.hook.is_chunk_protected(world, chunk_x, chunk_z)
            } else {
                let handle = self.main_thread.as_ref().expect("checked above");
                let hook = entry.hook.clone();
                let world = world.to_string();
                // Transport failure propagates; only the inner result
                // is the hook's own answer.
                handle.query(
                    move || hook.is_chunk_protected(&world, chunk_x, chunk_z),
                    self.timeout,
                )?
            };

            match answer {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => {
                    log::warn!(
                        "protection hook {} failed, disabling until revalidation: {}",
                        entry.hook.name(),
                        e
                    );
                    entry.usable.store(false, Ordering::Release);
                }
            }
        }
        Ok(false)
    }
}

type MainTask = Box<dyn FnOnce() + Send>;

/// Receiving side of the main-thread bridge; owned by the host loop.
pub struct MainThreadQueue {
    rx: mpsc::Receiver<MainTask>,
    owner: Arc<Mutex<ThreadId>>,
}

/// Sending side; cheap to clone into worker contexts.
#[derive(Clone)]
pub struct MainThreadHandle {
    tx: mpsc::Sender<MainTask>,
    owner: Arc<Mutex<ThreadId>>,
}

impl MainThreadQueue {
    pub fn new() -> (MainThreadQueue, MainThreadHandle) {
        let (tx, rx) = mpsc::channel();
        let owner = Arc::new(Mutex::new(thread::current().id()));
        (
            MainThreadQueue {
                rx,
                owner: owner.clone(),
            },
            MainThreadHandle { tx, owner },
        )
    }

    /// Run every queued task. Called from the host loop each tick; the
    /// calling thread is recorded as the owner so its own queries run
    /// inline instead of waiting on a loop that cannot turn.
    pub fn run_pending(&self) {
        *self.owner.lock().unwrap() = thread::current().id();
        loop {
            match self.rx.try_recv() {
                Ok(task) => task(),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }
}

impl MainThreadHandle {
    /// Run `job` on the host thread and wait for its result, bounded
    /// by `timeout`. A query issued from the host thread itself runs
    /// inline. The wait is cancelable: on timeout the reply is simply
    /// dropped when it eventually arrives.
    pub fn query<T, F>(&self, job: F, timeout: Duration) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if *self.owner.lock().unwrap() == thread::current().id() {
            return Ok(job());
        }

        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.tx
            .send(Box::new(move || {
                let _ = reply_tx.try_send(job());
            }))
            .map_err(|_| Error::MainThreadClosed)?;

        reply_rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => Error::MainThreadTimeout,
            RecvTimeoutError::Disconnected => Error::MainThreadClosed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FixedHook {
        name: &'static str,
        protects: bool,
        async_capable: bool,
        calls: AtomicUsize,
    }

    impl FixedHook {
        fn new(name: &'static str, protects: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                protects,
                async_capable: true,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl ProtectionHook for FixedHook {
        fn name(&self) -> &str {
            self.name
        }

        fn is_chunk_protected(&self, _world: &str, _x: i32, _z: i32) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.protects)
        }

        fn is_async_capable(&self) -> bool {
            self.async_capable
        }
    }

    struct FailingHook;

    impl ProtectionHook for FailingHook {
        fn name(&self) -> &str {
            "failing"
        }

        fn is_chunk_protected(&self, _world: &str, _x: i32, _z: i32) -> Result<bool> {
            Err(Error::Hook("failing".to_string(), "boom".to_string()))
        }

        fn is_async_capable(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_first_match_short_circuits() {
        let mut registry = HookRegistry::new(Duration::from_secs(1));
        let first = FixedHook::new("first", true);
        let second = FixedHook::new("second", true);
        registry.register(first.clone());
        registry.register(second.clone());

        assert!(registry.is_protected("world", 0, 0).unwrap());
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failing_hook_disabled_not_fatal() {
        let mut registry = HookRegistry::new(Duration::from_secs(1));
        registry.register(Arc::new(FailingHook));
        let fallback = FixedHook::new("fallback", true);
        registry.register(fallback.clone());

        // The failing hook does not abort the check.
        assert!(registry.is_protected("world", 0, 0).unwrap());

        // Second query skips the disabled hook entirely.
        assert!(registry.is_protected("world", 0, 0).unwrap());
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_factory_table() {
        fn make() -> Option<Arc<dyn ProtectionHook>> {
            Some(FixedHook::new("made", false))
        }
        fn missing() -> Option<Arc<dyn ProtectionHook>> {
            None
        }

        let mut registry = HookRegistry::new(Duration::from_secs(1));
        registry.register_table(&[("made", make), ("missing", missing)]);
        assert!(!registry.is_protected("world", 0, 0).unwrap());
    }

    #[test]
    fn test_main_thread_round_trip() {
        let (queue, handle) = MainThreadQueue::new();

        let worker = std::thread::spawn(move || {
            handle.query(|| 7 * 6, Duration::from_secs(1))
        });

        // Simulate the host loop until the worker got its answer.
        let result = loop {
            queue.run_pending();
            if worker.is_finished() {
                break worker.join().unwrap();
            }
            std::thread::sleep(Duration::from_millis(1));
        };
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_main_thread_timeout() {
        let (_queue, handle) = MainThreadQueue::new();
        // Nobody drains the queue: a worker's query must time out, not
        // hang.
        let err = std::thread::spawn(move || handle.query(|| true, Duration::from_millis(20)))
            .join()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, Error::MainThreadTimeout));
    }

    #[test]
    fn test_sync_hook_routed_through_queue() {
        struct SyncHook;
        impl ProtectionHook for SyncHook {
            fn name(&self) -> &str {
                "sync"
            }
            fn is_chunk_protected(&self, _w: &str, _x: i32, _z: i32) -> Result<bool> {
                Ok(true)
            }
        }

        let (queue, handle) = MainThreadQueue::new();
        let mut registry = HookRegistry::new(Duration::from_secs(1));
        registry.set_main_thread(handle);
        registry.register(Arc::new(SyncHook));
        let registry = Arc::new(registry);

        let worker = {
            let registry = registry.clone();
            std::thread::spawn(move || registry.is_protected("world", 1, 2))
        };

        let result = loop {
            queue.run_pending();
            if worker.is_finished() {
                break worker.join().unwrap();
            }
            std::thread::sleep(Duration::from_millis(1));
        };
        assert!(result.unwrap());
    }

    #[test]
    fn test_unroutable_sync_hook_times_out_as_error() {
        struct SyncHook;
        impl ProtectionHook for SyncHook {
            fn name(&self) -> &str {
                "sync"
            }
            fn is_chunk_protected(&self, _w: &str, _x: i32, _z: i32) -> Result<bool> {
                Ok(true)
            }
        }

        let (_queue, handle) = MainThreadQueue::new();
        let mut registry = HookRegistry::new(Duration::from_millis(20));
        registry.set_main_thread(handle);
        registry.register(Arc::new(SyncHook));

        // Queue never drained and the caller is not the owner: the
        // transport failure is fatal for the query, not swallowed.
        let result = std::thread::spawn(move || registry.is_protected("world", 0, 0))
            .join()
            .unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn test_owner_thread_query_runs_inline() {
        struct SyncHook;
        impl ProtectionHook for SyncHook {
            fn name(&self) -> &str {
                "sync"
            }
            fn is_chunk_protected(&self, _w: &str, _x: i32, _z: i32) -> Result<bool> {
                Ok(true)
            }
        }

        let (queue, handle) = MainThreadQueue::new();
        let mut registry = HookRegistry::new(Duration::from_millis(20));
        registry.set_main_thread(handle);
        registry.register(Arc::new(SyncHook));

        // The thread draining the queue cannot service its own round
        // trip; its queries must be answered directly, not time out.
        queue.run_pending();
        assert!(registry.is_protected("world", 0, 0).unwrap());
    }
}
