//! Worker: one OS thread bound to one numeric id and one local job queue.
//!
//! A `Worker` exposes its queue for both its own producer-affinity fast
//! path and for other workers' steal dequeues, and is a lightweight
//! `Clone`-of-an-`Arc` handle: the OS thread itself, its name, and its
//! lifetime are set up by [`Manager::initialize`](crate::manager::Manager::initialize),
//! which keeps thread-spawning centralized on the owning scheduler rather
//! than on a per-worker constructor.

use crate::job::Job;
use concurrent_queue::ConcurrentQueue;
use std::sync::Arc;

/// Thread name every worker OS thread is given.
pub const WORKER_THREAD_NAME: &str = "Jobs Worker";

/// One worker's identity and local MPMC job queue.
///
/// Queue ownership is `Arc`-shared rather than moved into the spawned
/// thread closure alone, since the [`Manager`](crate::manager::Manager)
/// also needs a handle to every worker's queue for enqueue placement and
/// for other workers' steal dequeues.
#[derive(Clone)]
pub struct Worker {
    id: usize,
    queue: Arc<ConcurrentQueue<Job>>,
}

impl Worker {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            queue: Arc::new(ConcurrentQueue::unbounded()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn queue(&self) -> &ConcurrentQueue<Job> {
        &self.queue
    }

    pub fn push(&self, job: Job) {
        // An unbounded queue never rejects a push.
        let _ = self.queue.push(job);
    }

    pub fn try_pop(&self) -> Option<Job> {
        self.queue.pop().ok()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_push_and_pop() {
        let worker = Worker::new(0);
        worker.push(Job::from_closure(|_| async {}));
        assert_eq!(worker.queue_len(), 1);
        assert!(worker.try_pop().is_some());
        assert_eq!(worker.queue_len(), 0);
    }

    #[test]
    fn test_worker_pop_on_empty_queue_returns_none() {
        let worker = Worker::new(3);
        assert!(worker.try_pop().is_none());
    }

    #[test]
    fn test_worker_clone_shares_queue() {
        let worker = Worker::new(1);
        let cloned = worker.clone();
        worker.push(Job::from_closure(|_| async {}));
        assert_eq!(cloned.queue_len(), 1);
    }

    #[test]
    fn test_worker_id() {
        let worker = Worker::new(7);
        assert_eq!(worker.id(), 7);
    }
}
