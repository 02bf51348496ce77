use std::time::Duration;

use crate::lisp::DEFAULT_ITERATION_CAP;

/// Hard bounds on one program execution.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Wall-clock budget for the whole execution.
    pub wall_timeout: Duration,
    /// Approximate heap ceiling, charged at builtin boundaries.
    pub heap_bytes: u64,
    /// Soft iteration cap; the hard cap of
    /// [`crate::lisp::HARD_ITERATION_CAP`] applies on top.
    pub iteration_cap: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            wall_timeout: Duration::from_millis(1000),
            heap_bytes: 64 * 1024 * 1024,
            iteration_cap: DEFAULT_ITERATION_CAP,
        }
    }
}

impl Limits {
    pub fn with_wall_timeout(mut self, wall_timeout: Duration) -> Self {
        self.wall_timeout = wall_timeout;
        self
    }

    pub fn with_heap_bytes(mut self, heap_bytes: u64) -> Self {
        self.heap_bytes = heap_bytes;
        self
    }

    pub fn with_iteration_cap(mut self, iteration_cap: u64) -> Self {
        self.iteration_cap = iteration_cap;
        self
    }
}
