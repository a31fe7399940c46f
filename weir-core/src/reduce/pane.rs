use super::*;

// ── Pane metadata ─────────────────────────────────────────────────────────────

/// When a pane fired relative to the watermark passing the end of its
/// window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaneTiming {
    /// Fired before the watermark reached the end of the window.
    Early,
    /// The first firing at or after the watermark passed the end of the
    /// window.
    OnTime,
    /// Any firing after the on-time pane.
    Late,
}

/// Metadata carried by every emitted pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaneInfo {
    pub timing: PaneTiming,
    /// 0-based count of all firings for this (key, window).
    pub index: u64,
    /// 0-based count of non-speculative (on-time or late) firings;
    /// -1 for early panes.
    pub non_speculative_index: i64,
    pub is_first: bool,
    /// True only when the window will fire no more.
    pub is_last: bool,
}

/// Persisted firing counters for one (key, window).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct PaneState {
    next_index: u64,
    next_non_speculative: u64,
    on_time_fired: bool,
}

const PANE_STATE_TAG: ValueTag<PaneState> = ValueTag::new("pane-state");

/// Tracks pane indices and timing per (key, window).
pub(crate) struct PaneTracker;

impl PaneTracker {
    /// Build the metadata for the firing that is about to emit and advance
    /// the persisted counters.
    pub(crate) fn next_pane(
        backend: &mut dyn StateBackend,
        ns: &StateNamespace,
        clock: &ClockState,
        window: &Window,
        is_last: bool,
    ) -> Result<PaneInfo> {
        let mut state = PANE_STATE_TAG.read(backend, ns)?.unwrap_or_default();

        let timing = if clock.event_time < window.end {
            PaneTiming::Early
        } else if !state.on_time_fired {
            state.on_time_fired = true;
            PaneTiming::OnTime
        } else {
            PaneTiming::Late
        };

        let non_speculative_index = match timing {
            PaneTiming::Early => -1,
            _ => {
                let idx = state.next_non_speculative as i64;
                state.next_non_speculative += 1;
                idx
            }
        };

        let info = PaneInfo {
            timing,
            index: state.next_index,
            non_speculative_index,
            is_first: state.next_index == 0,
            is_last,
        };
        state.next_index += 1;
        PANE_STATE_TAG.write(backend, ns, &state)?;
        Ok(info)
    }

    /// Merge policy when windows merge: keep the largest counters so pane
    /// indices stay strictly increasing for the merged window.
    pub(crate) fn on_merge(
        backend: &mut dyn StateBackend,
        sources: &[StateNamespace],
        result: &StateNamespace,
    ) -> Result<()> {
        let mut merged = PANE_STATE_TAG.read(backend, result)?.unwrap_or_default();
        let mut any = false;
        for source in sources {
            if source == result {
                continue;
            }
            if let Some(state) = PANE_STATE_TAG.read(backend, source)? {
                any = true;
                merged.next_index = merged.next_index.max(state.next_index);
                merged.next_non_speculative =
                    merged.next_non_speculative.max(state.next_non_speculative);
                merged.on_time_fired |= state.on_time_fired;
                PANE_STATE_TAG.clear(backend, source)?;
            }
        }
        if any {
            PANE_STATE_TAG.write(backend, result, &merged)?;
        }
        Ok(())
    }
}
