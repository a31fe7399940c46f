use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::state::StateNamespace;
use crate::types::EventTime;

mod clock;
mod timer_service;

pub use clock::*;
pub use timer_service::*;

/// Minimum possible event time. Used as the initial "no watermark" sentinel.
pub const EVENT_TIME_MIN: EventTime = i64::MIN;

/// Maximum possible event time. Used to represent no upper bound.
pub const EVENT_TIME_MAX: EventTime = i64::MAX;

/// End of the global window. The global window spans
/// `[EVENT_TIME_MIN, END_OF_GLOBAL_WINDOW)`.
pub const END_OF_GLOBAL_WINDOW: EventTime = EVENT_TIME_MAX;

/// The clock a timer or timestamp is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeDomain {
    /// Timestamps of elements; advances when the input watermark advances.
    EventTime,
    /// Wall-clock time as observed by the worker.
    ProcessingTime,
    /// Processing time gated on upstream stages having caught up: a timer
    /// set for `T` does not fire until the upstream synchronized time has
    /// also reached `T`.
    SynchronizedProcessingTime,
}

#[cfg(test)]
#[path = "tests/time_tests.rs"]
mod tests;
