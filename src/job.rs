//! Jobs: passive, immutable-after-enqueue descriptors of work to run.
//!
//! A [`Job`] pairs a function pointer with an opaque data pointer rather
//! than a trait object, to keep the enqueue contract cheap.
//! [`Job::from_closure`] is the type-safe wrapper: it erases an async
//! closure into the raw entry/data pair so callers never have to touch a
//! raw pointer themselves.
//!
//! An entry returns a future rather than running to completion
//! synchronously, because a job's entry may itself suspend by calling into
//! a suspending primitive (a [`FiberMutex`](crate::fiber::FiberMutex) lock,
//! a dependency wait). That's only possible if the entry is itself
//! `.await`-able from inside the dispatch loop.

use crate::counter::{Counter, Dependency};
use crate::manager::Manager;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

type BoxedEntryFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type RawEntry = unsafe fn(Arc<Manager>, *mut ()) -> BoxedEntryFuture;

/// A unit of work submitted to the [`Manager`].
///
/// Immutable after construction. Consumed exactly once, at dequeue: running
/// `entry` to completion and then (if a completion counter is attached)
/// decrementing that counter exactly once is the whole contract.
pub struct Job {
    entry: RawEntry,
    data: *mut (),
    pub(crate) completion_counter: Option<Weak<Counter>>,
    pub(crate) dependencies: Vec<Dependency>,
}

// SAFETY: `Job` is sent across worker queues; the raw `data` pointer is
// either null, or owned by a `Box` that only `entry` ever reconstructs and
// only once, so there is no aliasing across threads.
unsafe impl Send for Job {}

impl Job {
    /// Build a job from an owned async closure, erasing it into the raw
    /// entry/data pair. This is the safe, ergonomic constructor most callers
    /// should use. The closure is handed an owned `Arc<Manager>` (rather
    /// than a borrow) precisely because its returned future may suspend
    /// across worker-thread boundaries and must not outlive a borrow.
    pub fn from_closure<F, Fut>(closure: F) -> Self
    where
        F: FnOnce(Arc<Manager>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        unsafe fn call_and_drop<F, Fut>(manager: Arc<Manager>, data: *mut ()) -> BoxedEntryFuture
        where
            F: FnOnce(Arc<Manager>) -> Fut + Send + 'static,
            Fut: Future<Output = ()> + Send + 'static,
        {
            // SAFETY: `data` was produced by `Box::into_raw(Box::new(closure))`
            // below and is only ever reconstructed here, exactly once.
            let boxed = unsafe { Box::from_raw(data as *mut F) };
            Box::pin(boxed(manager))
        }

        let data = Box::into_raw(Box::new(closure)) as *mut ();
        Self {
            entry: call_and_drop::<F, Fut>,
            data,
            completion_counter: None,
            dependencies: Vec::new(),
        }
    }

    /// Attach a dependency: the job may not run until `counter`'s value is
    /// `<= threshold`.
    pub fn with_dependency(mut self, counter: &Arc<Counter>, threshold: u64) -> Self {
        self.dependencies.push(Dependency::new(counter, threshold));
        self
    }

    pub(crate) fn set_completion_counter(&mut self, counter: &Arc<Counter>) {
        self.completion_counter = Some(Arc::downgrade(counter));
    }

    /// True iff every dependency currently holds. Must be re-evaluated as a
    /// fresh full pass after any individual wait times out: dependencies can
    /// only regress between passes, never mid-pass.
    pub fn dependencies_satisfied(&self) -> bool {
        self.dependencies.iter().all(Dependency::poll_satisfied)
    }

    /// Run the job's entry to completion, then decrement its completion
    /// counter exactly once if one is attached.
    ///
    /// # Safety
    /// Must only be called once per job, and only after
    /// [`dependencies_satisfied`](Self::dependencies_satisfied) holds.
    pub(crate) unsafe fn execute(self, manager: Arc<Manager>) -> BoxedEntryFuture {
        Box::pin(async move {
            let entry_future = unsafe { (self.entry)(Arc::clone(&manager), self.data) };
            entry_future.await;
            if let Some(counter) = self.completion_counter.as_ref().and_then(Weak::upgrade) {
                counter.decrement();
            }
        })
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("dependencies", &self.dependencies.len())
            .field("has_completion_counter", &self.completion_counter.is_some())
            .finish()
    }
}
