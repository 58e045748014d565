//! Identifier allocation.
//!
//! Three monotonic id spaces (processes, tasks, external applications) and
//! one random id space (terminals). Each lives in an explicit allocator
//! object instead of package-level state.
//!
//! # Monotonic spaces
//!
//! Counters are seeded at 1 and incremented *before* each issuance, so the
//! first id handed out is 2. Values are never 0 and never reused within the
//! lifetime of the allocator. Allocation is atomic so any thread may draw
//! ids.
//!
//! # Terminal ids
//!
//! Terminal ids are drawn uniformly from `1..=i64::MAX`. Uniqueness is
//! probabilistic: with `n` live terminals the chance that a fresh draw
//! collides is `n / 2^63`. The terminal stack rejects colliding draws and
//! redraws, see [`crate::terminal::TerminalStack`].

// Rust guideline compliant 2026-02

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Value every monotonic counter starts from.
const COUNTER_SEED: u64 = 1;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

define_id!(
    /// Identifier of a process in the [`crate::process::ProcessRegistry`].
    ProcessId
);
define_id!(
    /// Identifier of a task.
    TaskId
);
define_id!(
    /// Identifier of an application addressed by the network monitor.
    ExternalAppId
);
define_id!(
    /// Identifier of a terminal. Random, see the module docs.
    TerminalId
);

/// Allocator for the monotonic id spaces.
#[derive(Debug)]
pub struct IdAllocator {
    process: AtomicU64,
    task: AtomicU64,
    external_app: AtomicU64,
}

impl IdAllocator {
    /// Create an allocator with every counter at its seed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            process: AtomicU64::new(COUNTER_SEED),
            task: AtomicU64::new(COUNTER_SEED),
            external_app: AtomicU64::new(COUNTER_SEED),
        }
    }

    /// Issue a fresh process id.
    pub fn next_process_id(&self) -> ProcessId {
        ProcessId(bump(&self.process))
    }

    /// Issue a fresh task id.
    pub fn next_task_id(&self) -> TaskId {
        TaskId(bump(&self.task))
    }

    /// Issue a fresh external application id.
    pub fn next_external_app_id(&self) -> ExternalAppId {
        ExternalAppId(bump(&self.external_app))
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Increment-then-read. Panics only after 2^64 allocations.
fn bump(counter: &AtomicU64) -> u64 {
    let previous = counter.fetch_add(1, Ordering::Relaxed);
    assert!(previous != u64::MAX, "id space exhausted");
    previous + 1
}

/// Random source for terminal ids.
#[derive(Debug)]
pub struct TerminalIdSource {
    rng: StdRng,
}

impl TerminalIdSource {
    /// Source seeded from the operating system.
    #[must_use]
    pub fn from_os() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic source, for tests and reproducible layouts.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Draw a terminal id in `1..=i64::MAX`. Never 0.
    pub fn next_terminal_id(&mut self) -> TerminalId {
        TerminalId(self.rng.random_range(1..=i64::MAX as u64))
    }
}

impl Default for TerminalIdSource {
    fn default() -> Self {
        Self::from_os()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_first_issued_id_is_two() {
        let ids = IdAllocator::new();
        assert_eq!(ids.next_process_id(), ProcessId(2));
        assert_eq!(ids.next_task_id(), TaskId(2));
        assert_eq!(ids.next_external_app_id(), ExternalAppId(2));
    }

    #[test]
    fn test_id_spaces_are_independent() {
        let ids = IdAllocator::new();
        ids.next_process_id();
        ids.next_process_id();
        assert_eq!(ids.next_task_id(), TaskId(2));
        assert_eq!(ids.next_process_id(), ProcessId(4));
    }

    #[test]
    fn test_concurrent_allocation_never_repeats() {
        let ids = Arc::new(IdAllocator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..500).map(|_| ids.next_process_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert_ne!(id.0, 0);
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 2000);
    }

    #[test]
    fn test_terminal_ids_are_nonzero_and_positive() {
        let mut source = TerminalIdSource::seeded(7);
        for _ in 0..1000 {
            let id = source.next_terminal_id();
            assert!(id.0 >= 1);
            assert!(id.0 <= i64::MAX as u64);
        }
    }

    #[test]
    fn test_seeded_sources_are_reproducible() {
        let mut a = TerminalIdSource::seeded(42);
        let mut b = TerminalIdSource::seeded(42);
        assert_eq!(a.next_terminal_id(), b.next_terminal_id());
    }

    #[test]
    fn test_display_is_decimal() {
        assert_eq!(TerminalId(123).to_string(), "123");
        assert_eq!(ProcessId(9).to_string(), "9");
    }
}
