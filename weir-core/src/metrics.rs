use std::collections::HashMap;
use std::sync::Mutex;

/// Elements discarded because their window had already closed.
pub const DROPPED_DUE_TO_CLOSED_WINDOW: &str = "dropped_due_to_closed_window";
/// Elements discarded because the watermark had passed their window's
/// lateness horizon.
pub const DROPPED_DUE_TO_LATENESS: &str = "dropped_due_to_lateness";
/// Panes emitted to the sink.
pub const PANES_FIRED: &str = "panes_fired";
/// Bytes accounted when a (key, window) group is opened for emission.
pub const GROUPED_BYTES_READ: &str = "grouped_bytes_read";
/// Duplicate fires of a once trigger coerced into no-ops.
pub const COERCED_DUPLICATE_FIRES: &str = "coerced_duplicate_fires";

/// Counter surface the embedding runtime supplies. Thin on purpose: the
/// core only ever increments.
pub trait Counters: Send {
    fn increment(&self, name: &'static str, n: u64);
}

/// Discards all counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCounters;

impl Counters for NoopCounters {
    fn increment(&self, _name: &'static str, _n: u64) {}
}

/// Accumulates counts in memory. Used by the tester and in tests.
#[derive(Debug, Default)]
pub struct InMemoryCounters {
    counts: Mutex<HashMap<&'static str, u64>>,
}

impl InMemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `name`, zero if never incremented.
    pub fn get(&self, name: &str) -> u64 {
        self.counts
            .lock()
            .map(|c| c.get(name).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

impl Counters for InMemoryCounters {
    fn increment(&self, name: &'static str, n: u64) {
        if let Ok(mut counts) = self.counts.lock() {
            *counts.entry(name).or_insert(0) += n;
        }
    }
}
