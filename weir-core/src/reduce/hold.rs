use super::*;

// ── OutputTimeFn ──────────────────────────────────────────────────────────────

/// Policy combining the timestamps of a pane's elements into the single
/// timestamp the emitted pane carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputTimeFn {
    /// Earliest contributing timestamp.
    #[default]
    Earliest,
    /// Latest contributing timestamp.
    Latest,
    /// Always the window's maximum timestamp.
    EndOfWindow,
}

impl OutputTimeFn {
    /// The contribution a single element at `timestamp` makes for `window`.
    pub fn assigned_output_time(&self, timestamp: EventTime, window: &Window) -> EventTime {
        match self {
            OutputTimeFn::Earliest | OutputTimeFn::Latest => timestamp,
            OutputTimeFn::EndOfWindow => window.max_timestamp(),
        }
    }

    /// Fold two contributions. Also the merge policy when windows merge,
    /// except `EndOfWindow`, whose merged hold is recomputed for the
    /// result window.
    pub fn combine(&self, a: EventTime, b: EventTime) -> EventTime {
        match self {
            OutputTimeFn::Earliest => a.min(b),
            OutputTimeFn::Latest => a.max(b),
            OutputTimeFn::EndOfWindow => a.max(b),
        }
    }
}

// ── WatermarkHold ─────────────────────────────────────────────────────────────

const HOLD_TAG: ValueTag<EventTime> = ValueTag::new("watermark-hold");

/// Holds the output watermark back so panes are emitted with correct
/// event-time timestamps.
///
/// Each non-late element contributes its (policy-assigned) timestamp. A
/// late element instead contributes the window's garbage-collection bound
/// `max_timestamp + allowed_lateness`, so an old straggler never pins the
/// output watermark far enough back to stall the pipeline.
#[derive(Debug, Clone)]
pub struct WatermarkHold {
    allowed_lateness_ms: i64,
    output_time_fn: OutputTimeFn,
}

impl WatermarkHold {
    pub fn new(allowed_lateness_ms: i64, output_time_fn: OutputTimeFn) -> Self {
        Self {
            allowed_lateness_ms,
            output_time_fn,
        }
    }

    /// Fold one element's contribution into the hold for `window`.
    pub fn add_hold(
        &self,
        backend: &mut dyn StateBackend,
        ns: &StateNamespace,
        window: &Window,
        timestamp: EventTime,
        is_late: bool,
    ) -> Result<()> {
        let contribution = if is_late {
            window
                .max_timestamp()
                .saturating_add(self.allowed_lateness_ms)
        } else {
            self.output_time_fn.assigned_output_time(timestamp, window)
        };
        let hold = match HOLD_TAG.read(backend, ns)? {
            Some(existing) => self.output_time_fn.combine(existing, contribution),
            None => contribution,
        };
        HOLD_TAG.write(backend, ns, &hold)
    }

    /// The timestamp the next pane for `window` will carry, without
    /// releasing the hold.
    pub fn read(
        &self,
        backend: &dyn StateBackend,
        ns: &StateNamespace,
    ) -> Result<Option<EventTime>> {
        HOLD_TAG.read(backend, ns)
    }

    /// Read the hold for emission and release it. Defaults to the window's
    /// maximum timestamp when the hold is absent or past it. Elements
    /// arriving after this and before the window closes start a new hold.
    pub fn extract_and_release(
        &self,
        backend: &mut dyn StateBackend,
        ns: &StateNamespace,
        window: &Window,
    ) -> Result<EventTime> {
        let hold = match HOLD_TAG.read(backend, ns)? {
            Some(hold) if hold <= window.max_timestamp() => hold,
            _ => window.max_timestamp(),
        };
        HOLD_TAG.clear(backend, ns)?;
        Ok(hold)
    }

    /// Merge policy when windows merge: fold the source holds, except
    /// `EndOfWindow`, which re-anchors to the result window's maximum
    /// timestamp.
    pub fn on_merge(
        &self,
        backend: &mut dyn StateBackend,
        sources: &[StateNamespace],
        result_ns: &StateNamespace,
        result_window: &Window,
    ) -> Result<()> {
        let mut merged: Option<EventTime> = HOLD_TAG.read(backend, result_ns)?;
        let mut any = merged.is_some();
        for source in sources {
            if source == result_ns {
                continue;
            }
            if let Some(hold) = HOLD_TAG.read(backend, source)? {
                any = true;
                merged = Some(match merged {
                    Some(m) => self.output_time_fn.combine(m, hold),
                    None => hold,
                });
                HOLD_TAG.clear(backend, source)?;
            }
        }
        if any {
            let hold = match self.output_time_fn {
                OutputTimeFn::EndOfWindow => result_window.max_timestamp(),
                _ => merged.expect("merged hold present when any source held"),
            };
            HOLD_TAG.write(backend, result_ns, &hold)?;
        }
        Ok(())
    }

    pub fn clear(&self, backend: &mut dyn StateBackend, ns: &StateNamespace) -> Result<()> {
        HOLD_TAG.clear(backend, ns)
    }
}
