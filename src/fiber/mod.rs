//! Fiber bookkeeping and the dispatch protocol that runs on top of it.
//!
//! "Fiber" names a cooperatively-scheduled unit of execution that can
//! suspend without blocking its worker thread, implemented here with
//! `async`/`await` rather than a stackful context switch.

mod dispatch;
mod mutex;
mod types;

pub(crate) use dispatch::run_dispatch_loop;
pub use mutex::{FiberMutex, FiberMutexGuard, WaitPool};
pub use types::{FiberId, FiberSlotTable, FIBER_COUNT};
