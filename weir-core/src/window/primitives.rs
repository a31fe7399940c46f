use super::*;

/// A half-open event-time window `[start, end)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Window {
    pub start: EventTime,
    pub end: EventTime,
}

impl Window {
    pub fn new(start: EventTime, end: EventTime) -> Self {
        Self { start, end }
    }

    /// The single window spanning all of event time.
    pub fn global() -> Self {
        Self::new(EVENT_TIME_MIN, END_OF_GLOBAL_WINDOW)
    }

    /// The maximum timestamp that belongs to this window.
    pub fn max_timestamp(&self) -> EventTime {
        self.end - 1
    }

    /// Return true if `timestamp` falls inside this window.
    pub fn contains(&self, timestamp: EventTime) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Return true if the two windows share at least one timestamp.
    /// Touching windows (`a.end == b.start`) do not overlap.
    pub fn intersects(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Smallest window covering both `self` and `other`.
    pub fn span(&self, other: &Window) -> Window {
        Window::new(self.start.min(other.start), self.end.max(other.end))
    }

    /// The timestamp past which elements for this window can no longer
    /// contribute: `end + allowed_lateness`. Saturates at the maximum.
    pub fn lateness_horizon(&self, allowed_lateness_ms: i64) -> EventTime {
        self.end.saturating_add(allowed_lateness_ms)
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
