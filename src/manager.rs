//! The Manager: owner of the fiber pool, worker pool, job intake, and the
//! shutdown protocol.
//!
//! Construction is split conceptually between a cheap struct build and a
//! thread-pool-spawning step, but [`Manager::initialize`] does both in one
//! call, since this crate has no use for a Manager that exists without its
//! workers running.

use crate::counter::Counter;
use crate::error::Error;
use crate::fiber::{run_dispatch_loop, FiberSlotTable, WaitPool, FIBER_COUNT};
use crate::job::Job;
use crate::log::{LogLevel, LogSink};
use crate::worker::{Worker, WORKER_THREAD_NAME};
use smol::Executor;
use smol_str::SmolStr;
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, available_parallelism, JoinHandle};
use std::time::Duration;

thread_local! {
    /// Set for the lifetime of a worker OS thread's tick loop so `enqueue`
    /// can route a same-thread submission onto that worker's own queue
    /// rather than round-robin placement.
    static CURRENT_WORKER: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Bound placed on how long a worker OS thread sleeps between checks of the
/// shutdown flag when the executor has no ready task to tick. Bounded so
/// shutdown does not depend on a notify actually arriving.
const QUEUE_CV_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Builder-style configuration for [`Manager::initialize_with_config`].
pub struct ManagerConfig {
    thread_count: usize,
    fiber_count: usize,
    log_sink: LogSink,
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of worker OS threads. Zero means "one per core".
    pub fn thread_count(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count;
        self
    }

    /// Size of the fiber slot pool. Defaults to [`FIBER_COUNT`].
    pub fn fiber_count(mut self, fiber_count: usize) -> Self {
        self.fiber_count = fiber_count;
        self
    }

    pub fn log_sink(mut self, log_sink: LogSink) -> Self {
        self.log_sink = log_sink;
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            thread_count: 0,
            fiber_count: FIBER_COUNT,
            log_sink: LogSink::noop(),
        }
    }
}

/// Owner of the fiber pool, worker pool, job intake, completion counters,
/// and shutdown protocol.
pub struct Manager {
    workers: Vec<Worker>,
    fiber_slots: FiberSlotTable,
    wait_pool: WaitPool,
    executor: Arc<Executor<'static>>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
    enqueue_index: AtomicUsize,
    queue_cv: Arc<(Mutex<()>, Condvar)>,
    group_map: Mutex<HashMap<SmolStr, Arc<Counter>>>,
    thread_handles: Mutex<Vec<JoinHandle<()>>>,
    /// Count of worker OS threads that have started and not yet returned.
    /// Exists so shutdown liveness (spec §8 "Shutdown liveness") is
    /// something a caller can actually observe, rather than inferring
    /// "threads are gone" from how quickly `Drop`/`shutdown` merely
    /// *returned* — which, before the Manager/children ownership cycle was
    /// broken, returned quickly without the threads having stopped at all.
    active_worker_threads: Arc<AtomicUsize>,
    log_sink: LogSink,
}

impl Manager {
    /// Construct a Manager and spin up its worker thread pool.
    /// `thread_count == 0` defaults to hardware concurrency.
    ///
    /// # Panics
    /// Panics if `thread_count` exceeds hardware concurrency: this is a
    /// fatal configuration error, not a recoverable one.
    pub fn initialize(thread_count: usize) -> Arc<Manager> {
        Self::initialize_with_config(ManagerConfig::new().thread_count(thread_count))
    }

    pub fn initialize_with_config(config: ManagerConfig) -> Arc<Manager> {
        let available = available_parallelism().map_or(1, |n| n.get());
        if config.thread_count > available {
            panic!(
                "{}",
                Error::thread_count_exceeds_hardware_concurrency(config.thread_count, available)
            );
        }
        let thread_count = if config.thread_count == 0 {
            available
        } else {
            config.thread_count
        };

        let manager = Arc::new(Manager {
            workers: (0..thread_count).map(Worker::new).collect(),
            fiber_slots: FiberSlotTable::new(config.fiber_count),
            wait_pool: WaitPool::new(),
            executor: Arc::new(Executor::new()),
            shutdown: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            enqueue_index: AtomicUsize::new(0),
            queue_cv: Arc::new((Mutex::new(()), Condvar::new())),
            group_map: Mutex::new(HashMap::new()),
            thread_handles: Mutex::new(Vec::new()),
            active_worker_threads: Arc::new(AtomicUsize::new(0)),
            log_sink: config.log_sink,
        });

        manager.log(LogLevel::Log, &format!("initializing {thread_count} worker threads"));

        let mut handles = Vec::with_capacity(thread_count);
        for worker_id in 0..thread_count {
            // One fiber slot claimed for the lifetime of this worker's
            // dispatch loop (see `fiber::types` module docs).
            let slot = manager.fiber_slots.acquire();
            // Weak, not Arc: this task is detached and runs for the
            // worker's whole lifetime, so an owned `Arc<Manager>` captured
            // here would hold the Manager's strong count above zero
            // forever, and `Manager::drop` (which sets the shutdown flag
            // these very loops wait on) would never run. See
            // `run_dispatch_loop`'s doc comment.
            let dispatch_manager = Arc::downgrade(&manager);
            manager.executor.spawn(async move {
                run_dispatch_loop(dispatch_manager.clone(), worker_id).await;
                // If the Manager is already fully dropped there is no table
                // left to release this slot back into.
                if let Some(manager) = dispatch_manager.upgrade() {
                    manager.fiber_slots.release(slot);
                }
            }).detach();

            let executor = Arc::clone(&manager.executor);
            let shutdown = Arc::clone(&manager.shutdown);
            let queue_cv = Arc::clone(&manager.queue_cv);
            let active_worker_threads = Arc::clone(&manager.active_worker_threads);
            // Weak for the same reason as `dispatch_manager` above: this
            // closure runs for the worker OS thread's entire lifetime, so
            // only a non-owning handle is safe to hold across it. It is
            // only ever upgraded for the brief, synchronous diagnostic
            // logging calls below, never held across a blocking wait.
            let thread_manager = Arc::downgrade(&manager);

            let handle = thread::Builder::new()
                .name(WORKER_THREAD_NAME.to_string())
                .spawn(move || {
                    CURRENT_WORKER.with(|current| current.set(Some(worker_id)));
                    active_worker_threads.fetch_add(1, Ordering::SeqCst);
                    // Decrements `active_worker_threads` when this thread's
                    // closure returns, including via an unwinding panic, so
                    // "the thread actually terminated" is something callers
                    // can observe rather than infer from `join()` returning.
                    struct ActiveGuard(Arc<AtomicUsize>);
                    impl Drop for ActiveGuard {
                        fn drop(&mut self) {
                            self.0.fetch_sub(1, Ordering::SeqCst);
                        }
                    }
                    let _active_guard = ActiveGuard(Arc::clone(&active_worker_threads));

                    // Best-effort: pin this worker to the core matching its
                    // id, mirroring the teacher's per-worker thread setup.
                    // A missing or already-claimed core id is not fatal.
                    if let Some(manager) = thread_manager.upgrade() {
                        match core_affinity::get_core_ids().and_then(|ids| ids.into_iter().nth(worker_id)) {
                            Some(core_id) => {
                                if !core_affinity::set_for_current(core_id) {
                                    manager.log(
                                        LogLevel::Warning,
                                        &format!("failed to pin worker {worker_id} to core {core_id:?}"),
                                    );
                                }
                            }
                            None => manager.log(
                                LogLevel::Warning,
                                &format!("no core id available for worker {worker_id}; running unpinned"),
                            ),
                        }
                    }
                    smol::block_on(async {
                        loop {
                            if shutdown.load(Ordering::SeqCst) {
                                break;
                            }
                            if !executor.try_tick() {
                                let (lock, condvar) = &*queue_cv;
                                let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
                                if shutdown.load(Ordering::SeqCst) {
                                    break;
                                }
                                let _ = condvar.wait_timeout(guard, QUEUE_CV_POLL_INTERVAL);
                            }
                        }
                    });
                })
                .expect("failed to spawn worker OS thread");
            handles.push(handle);
        }
        *manager.thread_handles.lock().unwrap_or_else(|e| e.into_inner()) = handles;

        manager
    }

    /// A Manager with no worker threads running, for unit tests that drive
    /// jobs or counters directly.
    pub fn new_for_test() -> Arc<Manager> {
        Arc::new(Manager {
            workers: vec![Worker::new(0)],
            fiber_slots: FiberSlotTable::new(FIBER_COUNT),
            wait_pool: WaitPool::new(),
            executor: Arc::new(Executor::new()),
            shutdown: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            enqueue_index: AtomicUsize::new(0),
            queue_cv: Arc::new((Mutex::new(()), Condvar::new())),
            group_map: Mutex::new(HashMap::new()),
            thread_handles: Mutex::new(Vec::new()),
            active_worker_threads: Arc::new(AtomicUsize::new(0)),
            log_sink: LogSink::noop(),
        })
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of worker OS threads that have started and not yet returned.
    /// Used to assert genuine shutdown liveness: unlike timing how fast
    /// `shutdown`/`Drop` returns, this can't be fooled by a return that was
    /// merely fast rather than actually having joined every thread.
    pub fn active_worker_threads(&self) -> usize {
        self.active_worker_threads.load(Ordering::SeqCst)
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.log_sink.log(level, message);
    }

    /// Fire-and-forget submission: no completion counter is attached.
    pub fn enqueue(&self, job: Job) {
        self.place(job);
    }

    /// Submit a job that increments `counter` at enqueue and decrements it
    /// exactly once after the job's entry returns.
    pub fn enqueue_with_counter(&self, mut job: Job, counter: &Arc<Counter>) {
        counter.increment();
        job.set_completion_counter(counter);
        self.place(job);
    }

    /// Submit a job against the named group's shared counter, creating it
    /// on first use. An empty name degenerates to a fresh private counter.
    pub fn enqueue_group(&self, mut job: Job, group_name: &str) -> Arc<Counter> {
        let counter = if group_name.is_empty() {
            Arc::new(Counter::new())
        } else {
            let mut group_map = self.group_map.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(
                group_map
                    .entry(SmolStr::new(group_name))
                    .or_insert_with(|| Arc::new(Counter::new())),
            )
        };

        counter.increment();
        job.set_completion_counter(&counter);
        self.place(job);
        counter
    }

    fn place(&self, job: Job) {
        match CURRENT_WORKER.with(Cell::get) {
            Some(worker_id) => self.workers[worker_id].push(job),
            None => {
                let idx = self.enqueue_index.fetch_add(1, Ordering::Relaxed) % self.workers.len();
                self.workers[idx].push(job);
            }
        }

        // Notified without holding queue_cv's lock: a narrow race lets a
        // newly-sleeping worker miss this wake, but any subsequent enqueue
        // re-notifies, and the bounded `QUEUE_CV_POLL_INTERVAL` wait bounds
        // the cost even then.
        self.queue_cv.1.notify_one();
    }

    pub(crate) fn try_dequeue_job(&self, worker_id: usize) -> Option<Job> {
        if let Some(job) = self.workers[worker_id].try_pop() {
            return Some(job);
        }
        let n = self.workers.len();
        for offset in 1..n {
            let idx = (offset + worker_id) % n;
            if let Some(job) = self.workers[idx].try_pop() {
                return Some(job);
            }
        }
        None
    }

    pub(crate) fn wait_pool(&self) -> &WaitPool {
        &self.wait_pool
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Signal shutdown and block until every worker OS thread has actually
    /// joined.
    ///
    /// Takes `&self`, not `self`, so it can run while the caller still holds
    /// an `Arc<Manager>` — this is the only way to meaningfully test
    /// shutdown liveness: a test that instead calls `drop(manager)` on a
    /// non-last `Arc` is an O(1) refcount decrement that never runs
    /// [`Drop::drop`] at all, so it can't observe whether the threads
    /// actually stopped. Idempotent: calling it again after the threads are
    /// already joined just re-stores the flag and finds an empty handle
    /// list. [`Drop::drop`] calls this too, so the same path runs whether
    /// shutdown is triggered explicitly or by dropping the last `Arc`.
    pub fn shutdown(&self) {
        // Lock before the flag write and the notify so a worker about to
        // sleep either observes shutdown under its own lock acquisition or
        // receives this notify. Closes the race where a worker checks the
        // flag, sees it false, and only then goes to sleep.
        {
            let (lock, condvar) = &*self.queue_cv;
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            self.shutdown.store(true, Ordering::SeqCst);
            condvar.notify_all();
        }

        for handle in self
            .thread_handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            if let Err(e) = handle.join() {
                self.log(LogLevel::Error, &format!("error joining worker thread: {e:?}"));
            }
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("thread_count", &self.thread_count())
            .field("shutdown", &self.is_shutting_down())
            .finish()
    }
}
