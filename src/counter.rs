//! Completion counters: the synchronization primitive jobs decrement on
//! completion and other jobs (or the main thread) wait on as a dependency.
//!
//! A `Counter` has two wait disciplines:
//! - [`Counter::wait`] / [`Counter::wait_for`]: OS-blocking, for non-fiber
//!   callers such as the main thread awaiting a batch of submitted work.
//! - [`Counter::poll_satisfied`]: a non-blocking point-in-time check used by
//!   the fiber dispatch loop, which never blocks the worker thread and
//!   instead composes with `.await` via `DependencyWait`.
//!
//! `decrement` wakes both channels; `increment` wakes neither.

use std::sync::{Arc, Condvar, Mutex};
use std::task::Waker;
use std::time::{Duration, Instant};

/// A monotonic-per-epoch integer with two wait disciplines.
///
/// The "satisfied" predicate for a dependency with threshold `T` is
/// `value <= T`, not `value == T`: a job that over-delivers completions
/// still satisfies a waiter looking for "at least this many done".
pub struct Counter {
    value: Mutex<u64>,
    condvar: Condvar,
    fiber_waiters: Mutex<Vec<Waker>>,
}

impl Counter {
    /// Create a new counter starting at zero.
    pub fn new() -> Self {
        Self::with_initial(0)
    }

    /// Create a new counter with a caller-supplied initial value.
    pub fn with_initial(initial: u64) -> Self {
        Self {
            value: Mutex::new(initial),
            condvar: Condvar::new(),
            fiber_waiters: Mutex::new(Vec::new()),
        }
    }

    /// Non-notifying increment; used at enqueue time.
    pub fn increment(&self) {
        let mut guard = self.value.lock().unwrap_or_else(|e| e.into_inner());
        *guard += 1;
    }

    /// Decrement, then wake every OS-blocking and fiber waiter.
    ///
    /// Called exactly once per job that referenced this counter as its
    /// completion counter, after the job's entry returns.
    pub fn decrement(&self) {
        {
            let mut guard = self.value.lock().unwrap_or_else(|e| e.into_inner());
            *guard = guard.saturating_sub(1);
        }
        self.condvar.notify_all();
        for waker in self
            .fiber_waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            waker.wake();
        }
    }

    /// Register a fiber-side waker to be woken by the next [`decrement`](Self::decrement).
    ///
    /// Rather than a fiber re-polling this counter on a bounded timeout, it
    /// registers its `Waker` directly here and is woken precisely once the
    /// value it's waiting on actually changes.
    pub fn register_waker(&self, waker: Waker) {
        self.fiber_waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(waker);
    }

    /// Atomic load of the current value.
    pub fn get(&self) -> u64 {
        *self.value.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Point-in-time check of the dependency predicate `value <= expected`.
    ///
    /// Never blocks; this is the primitive the fiber dispatch loop polls
    /// repeatedly (with a short timeout between polls) rather than blocking
    /// the worker thread outright.
    pub fn poll_satisfied(&self, expected: u64) -> bool {
        self.get() <= expected
    }

    /// OS-blocking wait until `value <= expected`. For non-fiber callers.
    pub fn wait(&self, expected: u64) {
        let mut guard = self.value.lock().unwrap_or_else(|e| e.into_inner());
        while *guard > expected {
            guard = self
                .condvar
                .wait(guard)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// OS-blocking wait with a timeout. Returns `false` if the timeout
    /// elapses before `value <= expected`.
    ///
    /// Timeout arithmetic is `elapsed >= timeout`, i.e.
    /// `Instant::now().duration_since(start) >= timeout`, rather than
    /// comparing `start` and `now` directly, which cannot ever cross a
    /// finite timeout.
    pub fn wait_for(&self, expected: u64, timeout: Duration) -> bool {
        let start = Instant::now();
        let mut guard = self.value.lock().unwrap_or_else(|e| e.into_inner());

        loop {
            if *guard <= expected {
                return true;
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return false;
            }

            let (next_guard, timeout_result) = self
                .condvar
                .wait_timeout(guard, timeout - elapsed)
                .unwrap_or_else(|e| e.into_inner());
            guard = next_guard;

            if timeout_result.timed_out() && *guard > expected {
                return false;
            }
        }
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Counter").field("value", &self.get()).finish()
    }
}

/// A `(counter, threshold)` pair as referenced by a job's dependency list.
///
/// Dependencies hold a weak reference so that a group counter with no more
/// live jobs referencing it can be dropped without resurrecting it. A
/// dependency whose counter has already been dropped is treated as
/// satisfied: the producing job group completed and was cleaned up.
#[derive(Clone)]
pub struct Dependency {
    pub counter: std::sync::Weak<Counter>,
    pub threshold: u64,
}

impl Dependency {
    pub fn new(counter: &Arc<Counter>, threshold: u64) -> Self {
        Self {
            counter: Arc::downgrade(counter),
            threshold,
        }
    }

    /// Point-in-time satisfaction check, treating an expired counter as
    /// satisfied.
    pub fn poll_satisfied(&self) -> bool {
        match self.counter.upgrade() {
            Some(counter) => counter.poll_satisfied(self.threshold),
            None => true,
        }
    }
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependency")
            .field("threshold", &self.threshold)
            .field("alive", &self.counter.upgrade().is_some())
            .finish()
    }
}
