//! Error handling for the fiber job scheduler
//!
//! Almost every named failure mode in this scheduler is either a fatal
//! programmer error (terminate immediately, no unwinding through a
//! suspended fiber) or an explicit non-error return (a timed-out wait
//! returns `false`; a dependency on an expired counter is treated as
//! satisfied). Recoverable, `Result`-returning conditions are
//! correspondingly narrow here: a plain `Error` enum plus `Display` plus
//! `std::error::Error` plus a `Result<T>` alias, no `thiserror`, rather
//! than inventing error kinds with no caller that can ever observe them.

use std::fmt;

/// Error types for the fiber job scheduler
#[derive(Debug, Clone)]
pub enum Error {
    /// `Manager::initialize` was asked for more threads than the host has.
    /// Detected at construction time and raised as a panic, but kept as a
    /// typed value so the panic message and its tests share one source of
    /// truth.
    ThreadCountExceedsHardwareConcurrency { requested: usize, available: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ThreadCountExceedsHardwareConcurrency {
                requested,
                available,
            } => write!(
                f,
                "requested thread count {requested} exceeds hardware concurrency {available}"
            ),
        }
    }
}

impl std::error::Error for Error {}

/// Result type alias for fiber job scheduler operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn thread_count_exceeds_hardware_concurrency(requested: usize, available: usize) -> Self {
        Self::ThreadCountExceedsHardwareConcurrency {
            requested,
            available,
        }
    }
}
