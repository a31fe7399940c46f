use super::*;

/// The three clocks a per-key task observes, advanced only through the
/// runner's `advance_*` entry points.
///
/// All clocks start at [`EVENT_TIME_MIN`] and are monotonically
/// non-decreasing; an advance below the current value is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockState {
    /// The input event-time watermark.
    pub event_time: EventTime,
    /// Current processing time.
    pub processing_time: EventTime,
    /// Current synchronized processing time. Never ahead of
    /// `processing_time`.
    pub synchronized_time: EventTime,
}

impl ClockState {
    pub fn new() -> Self {
        Self {
            event_time: EVENT_TIME_MIN,
            processing_time: EVENT_TIME_MIN,
            synchronized_time: EVENT_TIME_MIN,
        }
    }

    /// Advance the watermark, clamping regressions.
    pub fn advance_event_time(&mut self, to: EventTime) {
        self.event_time = self.event_time.max(to);
    }

    /// Advance processing time and the synchronized clock.
    ///
    /// `upstream` is the synchronized time reported by an upstream source,
    /// if any; the synchronized clock moves to `min(to, upstream)` so it
    /// never runs ahead of stages feeding this one.
    pub fn advance_processing_time(&mut self, to: EventTime, upstream: Option<EventTime>) {
        self.processing_time = self.processing_time.max(to);
        let synchronized = match upstream {
            Some(up) => to.min(up),
            None => to,
        };
        self.synchronized_time = self.synchronized_time.max(synchronized);
    }
}

impl Default for ClockState {
    fn default() -> Self {
        Self::new()
    }
}

/// Source of the upstream synchronized processing time.
///
/// The synchronized domain depends on how far *earlier* stages have
/// progressed, which only the embedding runtime knows. When no source is
/// installed the synchronized clock simply tracks processing time.
pub trait SyncTimeSource: Send {
    /// The latest processing time all upstream stages have passed, or
    /// `None` if unknown.
    fn upstream_synchronized_time(&self) -> Option<EventTime>;
}
