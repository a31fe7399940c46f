use super::*;

// ── ActiveWindowSet ───────────────────────────────────────────────────────────

/// Bookkeeping for one window in the set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ActiveWindow {
    /// Windows whose state addresses still hold data for this window.
    /// `{self}` except mid-merge, before state has been coalesced.
    sources: BTreeSet<Window>,
    /// A closed window fires no more; it stays in the set so that session
    /// merges can observe it (merging never revives a closed window).
    closed: bool,
}

/// The set of currently-active windows for a single key.
///
/// For non-merging shapes each window is its own state address. For merging
/// shapes, a window may be the merged result of several earlier windows;
/// between the physical merge and the coalescing of state, reads must union
/// over [`sources_of`](Self::sources_of).
///
/// # Invariant
/// After merges are applied, no two open windows of a merging shape overlap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveWindowSet {
    windows: BTreeMap<Window, ActiveWindow>,
}

/// The outcome of physically merging one [`MergeProposal`]: the state still
/// lives under `source_state_windows` until the caller coalesces it into
/// `result` and calls [`ActiveWindowSet::collapse`].
#[derive(Debug, Clone, PartialEq)]
pub struct MergeBinding {
    pub result: Window,
    pub source_state_windows: Vec<Window>,
    pub any_closed: bool,
}

impl ActiveWindowSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `window` if not already tracked. Returns true if it was new.
    pub fn ensure(&mut self, window: Window) -> bool {
        if self.windows.contains_key(&window) {
            return false;
        }
        self.windows.insert(
            window,
            ActiveWindow {
                sources: BTreeSet::from([window]),
                closed: false,
            },
        );
        true
    }

    /// All tracked windows, closed ones included, in ascending order.
    pub fn windows(&self) -> Vec<Window> {
        self.windows.keys().copied().collect()
    }

    pub fn contains(&self, window: &Window) -> bool {
        self.windows.contains_key(window)
    }

    pub fn is_closed(&self, window: &Window) -> bool {
        self.windows.get(window).map(|aw| aw.closed).unwrap_or(false)
    }

    /// Windows whose state addresses hold data for `window`.
    pub fn sources_of(&self, window: &Window) -> Vec<Window> {
        self.windows
            .get(window)
            .map(|aw| aw.sources.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Physically apply one merge proposal: the merged-away windows leave
    /// the set and `result` takes over their source state addresses.
    ///
    /// Merging an already-merged set is a no-op at the proposal level (the
    /// window fn proposes nothing), so applying proposals is idempotent.
    pub fn begin_merge(&mut self, proposal: &MergeProposal) -> MergeBinding {
        let mut sources = BTreeSet::new();
        let mut any_closed = false;
        for w in &proposal.to_merge {
            if let Some(aw) = self.windows.remove(w) {
                any_closed |= aw.closed;
                sources.extend(aw.sources);
            } else {
                sources.insert(*w);
            }
        }
        let binding = MergeBinding {
            result: proposal.result,
            source_state_windows: sources.iter().copied().collect(),
            any_closed,
        };
        self.windows.insert(
            proposal.result,
            ActiveWindow {
                sources,
                closed: any_closed,
            },
        );
        binding
    }

    /// Record that state for `window` has been coalesced into its own
    /// address; reads no longer need to union over old sources.
    pub fn collapse(&mut self, window: &Window) {
        if let Some(aw) = self.windows.get_mut(window) {
            aw.sources = BTreeSet::from([*window]);
        }
    }

    /// Mark `window` closed. It keeps poisoning future merges until it is
    /// garbage-collected with [`remove`](Self::remove).
    pub fn mark_closed(&mut self, window: &Window) {
        if let Some(aw) = self.windows.get_mut(window) {
            aw.closed = true;
        }
    }

    /// Drop `window` entirely (garbage collection).
    pub fn remove(&mut self, window: &Window) {
        self.windows.remove(window);
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
