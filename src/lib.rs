//! fiberjobs
//!
//! A fiber-based job scheduler: a fixed pool of cooperatively-scheduled
//! fibers multiplexed over a fixed pool of OS worker threads, coordinated
//! by a central [`Manager`]. Jobs run in parallel and may suspend
//! cooperatively, on an unmet dependency or on [`FiberMutex`] contention,
//! and resume later, possibly on a different worker, without ever blocking
//! the underlying OS thread.
//!
//! ```no_run
//! use fiberjobs::{Job, Manager};
//!
//! let manager = Manager::initialize(4);
//! let counter = std::sync::Arc::new(fiberjobs::Counter::new());
//! manager.enqueue_with_counter(
//!     Job::from_closure(|_manager| async {
//!         println!("running on a worker thread");
//!     }),
//!     &counter,
//! );
//! counter.wait(0);
//! ```

pub mod counter;
pub mod error;
pub mod fiber;
pub mod job;
pub mod log;
pub mod manager;
pub mod worker;

pub use counter::{Counter, Dependency};
pub use error::{Error, Result};
pub use fiber::{FiberMutex, FiberMutexGuard, WaitPool, FIBER_COUNT};
pub use job::Job;
pub use log::{LogLevel, LogSink};
pub use manager::{Manager, ManagerConfig};
pub use worker::Worker;
