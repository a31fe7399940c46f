use super::*;

// ── WindowFn ──────────────────────────────────────────────────────────────────

/// Assigns each element to one or more [`Window`]s based on its event-time
/// timestamp, and defines how windows merge for session-style shapes.
///
/// The four standard shapes:
/// - `Fixed`    — fixed-size, non-overlapping, aligned to multiples of `size`
/// - `Sliding`  — fixed-size, overlapping every `period`, non-merging
/// - `Sessions` — gap-based, merging
/// - `Global`   — a single window spanning all time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowFn {
    Fixed { size_ms: i64 },
    Sliding { size_ms: i64, period_ms: i64 },
    Sessions { gap_ms: i64 },
    Global,
}

/// A merge the [`WindowFn`] wants applied to an active set: replace
/// `to_merge` with the single covering `result` window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeProposal {
    pub to_merge: Vec<Window>,
    pub result: Window,
}

impl WindowFn {
    /// Fixed windows of the given `size`.
    pub fn fixed(size: Duration) -> Self {
        Self::Fixed {
            size_ms: size.as_millis() as i64,
        }
    }

    /// Sliding windows of the given `size` advancing every `period`.
    pub fn sliding(size: Duration, period: Duration) -> Self {
        Self::Sliding {
            size_ms: size.as_millis() as i64,
            period_ms: period.as_millis() as i64,
        }
    }

    /// Session windows with the given minimum `gap` between sessions.
    pub fn sessions(gap: Duration) -> Self {
        Self::Sessions {
            gap_ms: gap.as_millis() as i64,
        }
    }

    /// Return the windows containing an element with the given timestamp.
    ///
    /// Pure: depends only on the timestamp and this function's parameters.
    pub fn assign(&self, timestamp: EventTime) -> Vec<Window> {
        match *self {
            WindowFn::Fixed { size_ms } => {
                let start = timestamp - timestamp.rem_euclid(size_ms);
                vec![Window::new(start, start + size_ms)]
            }
            WindowFn::Sliding { size_ms, period_ms } => {
                // Walk back from the last period-aligned start until no
                // window covers the timestamp.
                let last_start = timestamp - timestamp.rem_euclid(period_ms);
                let mut windows = Vec::new();
                let mut start = last_start;
                while start > timestamp - size_ms {
                    windows.push(Window::new(start, start + size_ms));
                    start -= period_ms;
                }
                windows
            }
            WindowFn::Sessions { gap_ms } => vec![Window::new(timestamp, timestamp + gap_ms)],
            WindowFn::Global => vec![Window::global()],
        }
    }

    /// Whether this shape produces windows that must be merged.
    pub fn is_merging(&self) -> bool {
        matches!(self, WindowFn::Sessions { .. })
    }

    /// Compute the minimal set of merges that leaves `active` free of
    /// overlaps: sort by start, coalesce runs of strictly overlapping
    /// windows into their span, never split.
    ///
    /// Non-merging shapes always return no proposals.
    pub fn merge_proposals(&self, active: &[Window]) -> Vec<MergeProposal> {
        if !self.is_merging() || active.len() < 2 {
            return Vec::new();
        }

        let mut sorted = active.to_vec();
        sorted.sort();

        let mut proposals = Vec::new();
        let mut group: Vec<Window> = vec![sorted[0]];
        let mut span = sorted[0];
        for w in &sorted[1..] {
            if w.intersects(&span) {
                group.push(*w);
                span = span.span(w);
            } else {
                if group.len() > 1 {
                    proposals.push(MergeProposal {
                        to_merge: std::mem::take(&mut group),
                        result: span,
                    });
                } else {
                    group.clear();
                }
                group.push(*w);
                span = *w;
            }
        }
        if group.len() > 1 {
            proposals.push(MergeProposal {
                to_merge: group,
                result: span,
            });
        }
        proposals
    }

    /// Deterministic projection used when this windowing looks up state
    /// kept under a foreign windowing: the window of `main.max_timestamp()`
    /// for fixed/sliding shapes, the global window otherwise.
    pub fn side_input_window(&self, main: &Window) -> Window {
        match self {
            WindowFn::Fixed { .. } => self.assign(main.max_timestamp())[0],
            WindowFn::Sliding { .. } => {
                // The latest-starting window containing the timestamp.
                self.assign(main.max_timestamp())
                    .into_iter()
                    .max_by_key(|w| w.start)
                    .expect("sliding assignment is never empty")
            }
            WindowFn::Sessions { .. } | WindowFn::Global => Window::global(),
        }
    }

    /// Sanity-check assignment and merging at initialisation.
    ///
    /// Windowing never fails on the data path, so shape bugs (zero sizes,
    /// non-convex merges) must surface here instead.
    pub fn self_check(&self) -> Result<()> {
        match *self {
            WindowFn::Fixed { size_ms } if size_ms <= 0 => {
                return Err(anyhow!("fixed window size must be positive, got {size_ms}ms"));
            }
            WindowFn::Sliding { size_ms, period_ms } if size_ms <= 0 || period_ms <= 0 => {
                return Err(anyhow!(
                    "sliding window size and period must be positive, got size={size_ms}ms period={period_ms}ms"
                ));
            }
            WindowFn::Sessions { gap_ms } if gap_ms <= 0 => {
                return Err(anyhow!("session gap must be positive, got {gap_ms}ms"));
            }
            _ => {}
        }

        for &probe in &[0i64, 1, 999, 86_400_000] {
            let assigned = self.assign(probe);
            if assigned.is_empty() {
                return Err(anyhow!("{self:?} assigned no window to timestamp {probe}"));
            }
            if assigned != self.assign(probe) {
                return Err(anyhow!("{self:?} assignment is not deterministic at {probe}"));
            }
            for w in &assigned {
                if !w.contains(probe) {
                    return Err(anyhow!("{self:?} assigned {w} which does not contain {probe}"));
                }
            }
        }

        // Merging must produce convex covers and be idempotent.
        if self.is_merging() {
            let active: Vec<Window> = [0i64, 5, 40].iter().flat_map(|ts| self.assign(*ts)).collect();
            let proposals = self.merge_proposals(&active);
            let mut merged: Vec<Window> = active.clone();
            for p in &proposals {
                for w in &p.to_merge {
                    if !p.result.contains(w.start) || p.result.end < w.end {
                        return Err(anyhow!(
                            "{self:?} proposed non-convex merge of {w} into {}",
                            p.result
                        ));
                    }
                }
                merged.retain(|w| !p.to_merge.contains(w));
                merged.push(p.result);
            }
            if !self.merge_proposals(&merged).is_empty() {
                return Err(anyhow!("{self:?} merging is not idempotent"));
            }
        }

        Ok(())
    }
}
