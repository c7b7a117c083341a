//! Core bookkeeping types for the fiber pool.
//!
//! A fiber pool needs a fixed, bounded set of slots, each allocated via
//! compare-and-swap before a worker may schedule into it, so that pool
//! exhaustion has a concrete, testable meaning. This crate keeps that same
//! bounded-slot bookkeeping even though a slot no longer stores a raw stack
//! and switch context: the suspend/resume mechanism here is an `async`
//! continuation driven by `smol`'s executor. Each worker's dispatch loop
//! claims exactly one slot for its own lifetime; suspending at an `.await`
//! point is free (it returns control to the executor without needing a
//! fresh slot), so the table's role narrows to what its name always meant:
//! a fixed bound on concurrently live dispatch loops.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Default number of fiber slots, matching the original `FiberCount`.
pub const FIBER_COUNT: usize = 64;

/// Unique identifier for a fiber slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(usize);

impl FiberId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// Fixed-size pool of fiber slot availability flags.
///
/// A slot's flag is `true` iff the slot may be claimed by
/// [`FiberSlotTable::acquire`]. `false` whenever some dispatch loop has
/// claimed that slot and not yet released it.
pub struct FiberSlotTable {
    slots: Vec<AtomicBool>,
    next_scan_hint: AtomicU64,
}

impl FiberSlotTable {
    pub fn new(count: usize) -> Self {
        let slots = (0..count).map(|_| AtomicBool::new(true)).collect();
        Self {
            slots,
            next_scan_hint: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Scan the pool for an available slot and claim it via CAS.
    ///
    /// Pool exhaustion is a fatal configuration error: the pool is sized to
    /// exceed the maximum number of concurrently live dispatch loops a
    /// correct caller can produce.
    pub fn acquire(&self) -> FiberId {
        // Round-robin scan start so repeated acquire/release churn doesn't
        // always re-check the same low indices first.
        let start = (self.next_scan_hint.fetch_add(1, Ordering::Relaxed) as usize) % self.slots.len();

        for offset in 0..self.slots.len() {
            let index = (start + offset) % self.slots.len();
            if self.slots[index]
                .compare_exchange(true, false, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return FiberId::new(index);
            }
        }

        panic!(
            "fiber pool exhausted: no free slot among {} fibers; the pool must be sized to \
             exceed the maximum number of concurrently suspended fibers",
            self.slots.len()
        );
    }

    /// Release a previously acquired slot back to the pool.
    pub fn release(&self, id: FiberId) {
        self.slots[id.index()].store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for FiberSlotTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let available = self
            .slots
            .iter()
            .filter(|slot| slot.load(Ordering::Relaxed))
            .count();
        f.debug_struct("FiberSlotTable")
            .field("total", &self.slots.len())
            .field("available", &available)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_claims_a_distinct_slot() {
        let table = FiberSlotTable::new(4);
        let a = table.acquire();
        let b = table.acquire();
        assert_ne!(a, b);
    }

    #[test]
    fn test_release_makes_slot_reacquirable() {
        let table = FiberSlotTable::new(1);
        let id = table.acquire();
        table.release(id);
        let id2 = table.acquire();
        assert_eq!(id, id2);
    }

    #[test]
    #[should_panic(expected = "fiber pool exhausted")]
    fn test_acquire_past_capacity_panics() {
        let table = FiberSlotTable::new(2);
        let _a = table.acquire();
        let _b = table.acquire();
        let _c = table.acquire();
    }

    #[test]
    fn test_at_most_one_holder_per_slot() {
        // Acquiring N times from a table of size N claims N distinct slots,
        // and a further acquire must fail since none are available.
        let table = FiberSlotTable::new(8);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..8 {
            let id = table.acquire();
            assert!(seen.insert(id), "slot {id:?} double-claimed");
        }
    }
}
