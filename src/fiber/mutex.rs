//! `FiberMutex`: mutual exclusion that suspends the waiting fiber, not the
//! OS thread.
//!
//! A contending fiber parks itself onto the shared wait pool, and the
//! dispatch loop retries `try_lock` the next time that pool is drained.
//! `unlock` deliberately does not wake anyone, so there is no thundering
//! herd: [`WaitPool`] holds pending lock attempts as plain `Waker`s, and
//! [`Manager`](crate::manager::Manager)'s dispatch loop drains one entry
//! per iteration, calling `try_lock` on the caller's behalf and waking it
//! only once the lock is actually held.

use concurrent_queue::ConcurrentQueue;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// A fiber-aware mutex. Always used behind an `Arc` so a parked waiter's
/// retry entry can outlive the `lock()` call stack frame that created it.
pub struct FiberMutex {
    locked: AtomicBool,
}

impl FiberMutex {
    pub fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Test-and-set with acquire ordering. Returns whether the lock was
    /// free and is now held by the caller.
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Release the lock. Deliberately does not wake anyone: parked
    /// contenders are retried the next time the wait pool is drained.
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Acquire the lock, suspending (not blocking) on contention.
    ///
    /// `wait_pool` is the manager's shared pool of parked mutex attempts;
    /// passing it explicitly keeps `FiberMutex` free of any back-reference
    /// to the manager that owns it.
    pub fn lock<'a>(self: &'a Arc<Self>, wait_pool: &'a WaitPool) -> LockFuture<'a> {
        LockFuture {
            mutex: self,
            wait_pool,
            granted: None,
        }
    }
}

impl Default for FiberMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FiberMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiberMutex")
            .field("locked", &self.locked.load(Ordering::Relaxed))
            .finish()
    }
}

/// RAII guard releasing a [`FiberMutex`] on drop.
pub struct FiberMutexGuard<'a> {
    mutex: &'a Arc<FiberMutex>,
}

impl Drop for FiberMutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

/// One parked lock attempt, queued on the [`WaitPool`] until the dispatch
/// loop's wait-pool drain (Step D) succeeds at `try_lock` on its behalf.
struct MutexWaiter {
    mutex: Arc<FiberMutex>,
    waker: Waker,
    granted: Arc<AtomicBool>,
}

/// FIFO pool of suspended fiber work: currently, parked `FiberMutex`
/// contenders. Draining one entry per dispatch-loop iteration gives
/// approximately-FIFO fairness without ever blocking a worker thread.
pub struct WaitPool {
    queue: ConcurrentQueue<MutexWaiter>,
}

impl WaitPool {
    pub fn new() -> Self {
        Self {
            queue: ConcurrentQueue::unbounded(),
        }
    }

    pub fn is_approximately_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn push(&self, waiter: MutexWaiter) {
        // An unbounded queue never rejects a push.
        let _ = self.queue.push(waiter);
    }

    /// Drain a single parked waiter, if any, attempting `try_lock` on its
    /// behalf. Returns `true` if an entry was processed (granted or
    /// re-queued), `false` if the pool was empty.
    pub fn drain_one(&self) -> bool {
        match self.queue.pop() {
            Ok(waiter) => {
                if waiter.mutex.try_lock() {
                    waiter.granted.store(true, Ordering::Release);
                    waiter.waker.wake();
                } else {
                    self.push(waiter);
                }
                true
            }
            Err(_) => false,
        }
    }
}

impl Default for WaitPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WaitPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitPool")
            .field("len", &self.queue.len())
            .finish()
    }
}

/// Future returned by [`FiberMutex::lock`].
pub struct LockFuture<'a> {
    mutex: &'a Arc<FiberMutex>,
    wait_pool: &'a WaitPool,
    granted: Option<Arc<AtomicBool>>,
}

impl<'a> Future for LockFuture<'a> {
    type Output = FiberMutexGuard<'a>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(granted) = &this.granted {
            if granted.load(Ordering::Acquire) {
                return Poll::Ready(FiberMutexGuard { mutex: this.mutex });
            }
            return Poll::Pending;
        }

        if this.mutex.try_lock() {
            return Poll::Ready(FiberMutexGuard { mutex: this.mutex });
        }

        let granted = Arc::new(AtomicBool::new(false));
        this.wait_pool.push(MutexWaiter {
            mutex: Arc::clone(this.mutex),
            waker: cx.waker().clone(),
            granted: Arc::clone(&granted),
        });
        this.granted = Some(granted);
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn test_try_lock_succeeds_once() {
        let mutex = FiberMutex::new();
        assert!(mutex.try_lock());
        assert!(!mutex.try_lock());
    }

    #[test]
    fn test_unlock_allows_relock() {
        let mutex = FiberMutex::new();
        assert!(mutex.try_lock());
        mutex.unlock();
        assert!(mutex.try_lock());
    }

    #[test]
    fn test_lock_uncontended_resolves_immediately() {
        smol::block_on(async {
            let mutex = Arc::new(FiberMutex::new());
            let wait_pool = WaitPool::new();
            let _guard = mutex.lock(&wait_pool).await;
            assert!(!mutex.try_lock());
        });
    }

    #[test]
    fn test_guard_drop_releases_lock() {
        smol::block_on(async {
            let mutex = Arc::new(FiberMutex::new());
            let wait_pool = WaitPool::new();
            {
                let _guard = mutex.lock(&wait_pool).await;
            }
            assert!(mutex.try_lock());
        });
    }

    #[test]
    fn test_contended_lock_parks_on_wait_pool_and_is_granted_by_drain() {
        smol::block_on(async {
            let mutex = Arc::new(FiberMutex::new());
            let wait_pool = Arc::new(WaitPool::new());
            let held = mutex.try_lock();
            assert!(held);

            let waiting_mutex = Arc::clone(&mutex);
            let waiting_pool = Arc::clone(&wait_pool);
            let log: Arc<StdMutex<Vec<&'static str>>> = Arc::new(StdMutex::new(Vec::new()));
            let log_clone = Arc::clone(&log);

            let task = smol::spawn(async move {
                let _guard = waiting_mutex.lock(&waiting_pool).await;
                log_clone.lock().unwrap().push("acquired");
            });

            // Give the task a chance to register itself on the wait pool.
            smol::Timer::after(std::time::Duration::from_millis(20)).await;
            assert!(!wait_pool.is_approximately_empty());

            mutex.unlock();
            // Draining is what actually grants the lock and wakes the task.
            while wait_pool.drain_one() {}

            task.await;
            assert_eq!(*log.lock().unwrap(), vec!["acquired"]);
        });
    }

    #[test]
    fn test_drain_one_on_empty_pool_returns_false() {
        let wait_pool = WaitPool::new();
        assert!(!wait_pool.drain_one());
    }
}
