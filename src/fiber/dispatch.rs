//! The dispatch protocol: the loop every worker-bound dispatch task runs.
//!
//! There is no predecessor-cleanup handoff here, unlike a stackful fiber
//! implementation: an `async fn` returning `Poll::Pending` already gives
//! the "free the worker thread, resume elsewhere later" property without
//! one. What remains is the core protocol: alternate between job-queue
//! work and wait-pool draining so neither starves the other, execute a job
//! once its dependencies hold, and yield briefly when there is truly
//! nothing to do.

use crate::job::Job;
use crate::manager::Manager;
use smol::Timer;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

/// Short yield used when neither the job queue nor the wait pool produced
/// anything: the async analogue of parking on `queue_cv`.
const IDLE_YIELD: Duration = Duration::from_millis(1);

/// Future that resolves once every dependency in a job's list is satisfied.
///
/// Registers itself on the counters behind any currently-unsatisfied
/// dependency so `Counter::decrement` wakes it directly, rather than
/// re-polling on a fixed schedule.
struct DependencyWait<'a> {
    job: &'a Job,
}

impl<'a> DependencyWait<'a> {
    fn new(job: &'a Job) -> Self {
        Self { job }
    }
}

impl Future for DependencyWait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut all_satisfied = true;
        for dependency in &self.job.dependencies {
            if dependency.poll_satisfied() {
                continue;
            }

            if let Some(counter) = dependency.counter.upgrade() {
                counter.register_waker(cx.waker().clone());
            }

            // Re-check after registering: a `decrement` landing between the
            // check above and the registration would otherwise wake an
            // empty waiter list and be lost, parking this dispatch loop
            // forever. Registering first and re-checking after is the
            // standard way to close that window; the worst case is one
            // redundant (harmless) wake later.
            if !dependency.poll_satisfied() {
                all_satisfied = false;
            }
        }

        if all_satisfied {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Run one worker's dispatch loop until the manager shuts down.
///
/// `worker_id` identifies this worker's own job queue for the
/// producer-affinity fast path in [`Manager::try_dequeue_job`].
/// `wait_pool_priority` is the fiber-local toggle of spec §4.4 Step B,
/// living as a plain local rather than a field on a shared struct because
/// exactly one dispatch loop ever owns it.
///
/// `manager` is a `Weak` handle, not an owned `Arc`: this loop runs for the
/// lifetime of the worker, i.e. until the Manager itself shuts down, so an
/// owned `Arc` held for the whole function would keep the Manager's strong
/// count above zero forever and its `Drop` (which is what sets the shutdown
/// flag in the first place) would never run — exactly the Manager/Worker
/// ownership cycle spec §9 calls out as needing to be designed away. Each
/// iteration upgrades just long enough to make its synchronous checks and,
/// if a job is dequeued, to hand the job's entry an owned `Arc<Manager>` for
/// the bounded duration of that one job's execution; the upgraded strong
/// reference is dropped again before the idle-yield `.await`.
pub(crate) async fn run_dispatch_loop(manager: Weak<Manager>, worker_id: usize) {
    let mut wait_pool_priority = false;

    loop {
        let Some(manager) = manager.upgrade() else {
            // The Manager has been fully dropped; nothing left to serve.
            return;
        };

        if manager.is_shutting_down() {
            return;
        }

        wait_pool_priority = !wait_pool_priority;
        let drain_wait_pool_first = wait_pool_priority && !manager.wait_pool().is_approximately_empty();

        let mut did_work = false;

        if drain_wait_pool_first {
            did_work |= manager.wait_pool().drain_one();
        }

        if !did_work {
            if let Some(job) = manager.try_dequeue_job(worker_id) {
                DependencyWait::new(&job).await;
                // SAFETY: dependencies were just confirmed satisfied above,
                // and this job was dequeued exactly once.
                let execute_future = unsafe { job.execute(Arc::clone(&manager)) };
                execute_future.await;
                did_work = true;
            }
        }

        if !did_work && !drain_wait_pool_first {
            did_work |= manager.wait_pool().drain_one();
        }

        if !did_work {
            let shutting_down = manager.is_shutting_down();
            // Drop the upgraded strong reference before parking so this
            // loop never holds the Manager alive across an idle sleep.
            drop(manager);
            if shutting_down {
                return;
            }
            Timer::after(IDLE_YIELD).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::Counter;
    use std::sync::Arc;

    #[test]
    fn test_dependency_wait_resolves_immediately_with_no_dependencies() {
        smol::block_on(async {
            let job = Job::from_closure(|_| async {});
            DependencyWait::new(&job).await;
        });
    }

    #[test]
    fn test_dependency_wait_resolves_after_decrement() {
        smol::block_on(async {
            let counter = Arc::new(Counter::with_initial(1));
            let job = Job::from_closure(|_| async {}).with_dependency(&counter, 0);

            let waiter = smol::spawn(async move {
                DependencyWait::new(&job).await;
            });

            smol::Timer::after(Duration::from_millis(10)).await;
            counter.decrement();
            waiter.await;
        });
    }
}
