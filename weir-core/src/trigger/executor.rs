use super::*;

// ── Per-node persisted cells ──────────────────────────────────────────────────

/// Target instant for the time-based triggers: set on the first element of
/// the pane, cleared when the node fires.
const DELAYED_UNTIL: ValueTag<EventTime> = ValueTag::new("delayed-until");

/// Element count for `AfterCount`. Monotonic; merges by sum.
const ELEMENTS_IN_PANE: CombiningTag<CountCombineFn<()>> = CombiningTag::new("elements-in-pane");
const COUNT: CountCombineFn<()> = CountCombineFn::new();

// ── Contexts ──────────────────────────────────────────────────────────────────

/// Everything one trigger event may touch, borrowed for the duration of
/// that event. Child nodes see the same context; there is no parent
/// back-reference and no shared mutability beyond these borrows.
pub struct TriggerContext<'a> {
    pub window: &'a Window,
    pub state: &'a mut dyn StateBackend,
    pub timers: &'a mut TimerService,
    pub clock: ClockState,
    pub finished: &'a mut FinishedBits,
    pub counters: &'a dyn Counters,
}

/// Per-node aggregation of the source windows' finished bits, computed
/// before a merge coalesces state.
#[derive(Debug, Clone)]
pub struct MergeSignals {
    /// Bit was set in at least one source window.
    pub finished_in_any: Vec<bool>,
    /// Bit was set in every source window.
    pub finished_in_all: Vec<bool>,
}

impl MergeSignals {
    /// Aggregate the finished bits of the merging source windows.
    /// A source with no recorded bits counts as all-unfinished.
    pub fn aggregate(tree: &TriggerTree, sources: &[FinishedBits]) -> Self {
        let len = tree.len();
        let mut any = vec![false; len];
        let mut all = vec![!sources.is_empty(); len];
        for bits in sources {
            for idx in 0..len {
                let b = bits.get(idx);
                any[idx] |= b;
                all[idx] &= b;
            }
        }
        Self {
            finished_in_any: any,
            finished_in_all: all,
        }
    }
}

// ── Executor ──────────────────────────────────────────────────────────────────

impl TriggerTree {
    /// Deliver an element to the subtree rooted at `idx`.
    ///
    /// Composites forward to unfinished children in DFS order; leaves
    /// update their persisted cells and arm timers. No node fires here —
    /// firing is decided by [`should_fire`](Self::should_fire) after the
    /// event.
    pub fn on_element(
        &self,
        ctx: &mut TriggerContext<'_>,
        idx: usize,
        timestamp: EventTime,
    ) -> Result<()> {
        if ctx.finished.get(idx) {
            return Ok(());
        }
        let ns = self.namespace(ctx.window, idx);
        match &self.node(idx).kind {
            NodeKind::AfterEndOfWindow => {
                ctx.timers.set(ns, ctx.window.end, TimeDomain::EventTime);
            }
            NodeKind::AfterFirstElementInPane { delay_ms } => {
                if DELAYED_UNTIL.read(&*ctx.state, &ns)?.is_none() {
                    let target = timestamp.saturating_add(*delay_ms);
                    DELAYED_UNTIL.write(ctx.state, &ns, &target)?;
                    ctx.timers.set(ns, target, TimeDomain::EventTime);
                }
            }
            NodeKind::AfterProcessingTime { delay_ms } => {
                if DELAYED_UNTIL.read(&*ctx.state, &ns)?.is_none() {
                    let target = ctx.clock.processing_time.saturating_add(*delay_ms);
                    DELAYED_UNTIL.write(ctx.state, &ns, &target)?;
                    ctx.timers.set(ns, target, TimeDomain::ProcessingTime);
                }
            }
            NodeKind::AfterSynchronizedProcessingTime => {
                if DELAYED_UNTIL.read(&*ctx.state, &ns)?.is_none() {
                    // Target the processing time the first element arrived
                    // at; the node becomes ready once the synchronized
                    // clock (which lags behind on upstream backlog)
                    // catches up to it.
                    let target = ctx.clock.processing_time;
                    DELAYED_UNTIL.write(ctx.state, &ns, &target)?;
                    ctx.timers
                        .set(ns, target, TimeDomain::SynchronizedProcessingTime);
                }
            }
            NodeKind::AfterCount(_) => {
                ELEMENTS_IN_PANE.add(ctx.state, &ns, &COUNT, &())?;
            }
            NodeKind::Scripted(script) => match script.next_element_result() {
                ScriptedResult::Continue => {}
                ScriptedResult::Fire => script.set_pending_fire(),
                ScriptedResult::FireAndFinish => {
                    script.set_pending_fire();
                    ctx.finished.set(idx, true);
                }
                ScriptedResult::Finish => ctx.finished.set(idx, true),
            },
            NodeKind::AfterEach => {
                // Only the current position in the sequence sees elements.
                let current = self
                    .node(idx)
                    .children
                    .iter()
                    .copied()
                    .find(|c| !ctx.finished.get(*c));
                if let Some(child) = current {
                    self.on_element(ctx, child, timestamp)?;
                }
            }
            NodeKind::Repeatedly | NodeKind::OrFinally | NodeKind::AfterFirst
            | NodeKind::AfterAll => {
                for child in self.node(idx).children.clone() {
                    if !ctx.finished.get(child) {
                        self.on_element(ctx, child, timestamp)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Rebuild the subtree's finished bits after windows merged.
    ///
    /// Called after the active set physically merged and per-node state was
    /// coalesced by [`merge_persisted_state`](Self::merge_persisted_state).
    /// Children are merged before their parent inspects the outcome.
    pub fn on_merge(
        &self,
        ctx: &mut TriggerContext<'_>,
        signals: &MergeSignals,
        idx: usize,
    ) -> Result<()> {
        for child in self.node(idx).children.clone() {
            self.on_merge(ctx, signals, child)?;
        }

        let ns = self.namespace(ctx.window, idx);
        match &self.node(idx).kind {
            NodeKind::AfterEndOfWindow => {
                // A firing implies the watermark already passed some source
                // window's end, so the merged window reports finished
                // without firing again on the same data.
                if signals.finished_in_any[idx] {
                    ctx.finished.set(idx, true);
                    ctx.timers.delete(&ns, TimeDomain::EventTime);
                } else {
                    ctx.finished.set(idx, false);
                    ctx.timers.set(ns, ctx.window.end, TimeDomain::EventTime);
                }
            }
            NodeKind::AfterFirstElementInPane { .. } => {
                self.merge_time_leaf(ctx, signals, idx, &ns, TimeDomain::EventTime)?;
            }
            NodeKind::AfterProcessingTime { .. } => {
                self.merge_time_leaf(ctx, signals, idx, &ns, TimeDomain::ProcessingTime)?;
            }
            NodeKind::AfterSynchronizedProcessingTime => {
                self.merge_time_leaf(
                    ctx,
                    signals,
                    idx,
                    &ns,
                    TimeDomain::SynchronizedProcessingTime,
                )?;
            }
            NodeKind::AfterCount(_) => {
                if signals.finished_in_any[idx] {
                    ctx.finished.set(idx, true);
                    ELEMENTS_IN_PANE.clear(ctx.state, &ns)?;
                } else {
                    ctx.finished.set(idx, false);
                }
            }
            NodeKind::Scripted(script) => match script.next_merge_result() {
                ScriptedResult::Continue => ctx.finished.set(idx, false),
                ScriptedResult::Fire => script.set_pending_fire(),
                ScriptedResult::FireAndFinish => {
                    script.set_pending_fire();
                    ctx.finished.set(idx, true);
                }
                ScriptedResult::Finish => ctx.finished.set(idx, true),
            },
            NodeKind::Repeatedly => {
                ctx.finished.set(idx, false);
            }
            NodeKind::OrFinally | NodeKind::AfterEach | NodeKind::AfterFirst
            | NodeKind::AfterAll => {
                // A composite stays finished only if it was finished in
                // every source window; otherwise children re-evaluate.
                ctx.finished.set(idx, signals.finished_in_all[idx]);
            }
        }
        Ok(())
    }

    fn merge_time_leaf(
        &self,
        ctx: &mut TriggerContext<'_>,
        signals: &MergeSignals,
        idx: usize,
        ns: &StateNamespace,
        domain: TimeDomain,
    ) -> Result<()> {
        if signals.finished_in_any[idx] {
            ctx.finished.set(idx, true);
            DELAYED_UNTIL.clear(ctx.state, ns)?;
            ctx.timers.delete(ns, domain);
        } else {
            ctx.finished.set(idx, false);
            // The target was min-merged with the rest of the node state.
            if let Some(target) = DELAYED_UNTIL.read(&*ctx.state, ns)? {
                ctx.timers.set(ns.clone(), target, domain);
            }
        }
        Ok(())
    }

    /// Whether the subtree rooted at `idx` is ready to fire.
    ///
    /// Pure with respect to execution state: reads cells and clocks, writes
    /// nothing.
    pub fn should_fire(&self, ctx: &TriggerContext<'_>, idx: usize) -> Result<bool> {
        if ctx.finished.get(idx) {
            // A scripted fire-and-finish records both halves when its
            // decision is consumed; the pending fire must stay observable
            // until the event's evaluation.
            if let NodeKind::Scripted(script) = &self.node(idx).kind {
                return Ok(script.pending_fire());
            }
            return Ok(false);
        }
        let ns = self.namespace(ctx.window, idx);
        let node = self.node(idx);
        Ok(match &node.kind {
            NodeKind::AfterEndOfWindow => ctx.clock.event_time >= ctx.window.end,
            NodeKind::AfterFirstElementInPane { .. } => match DELAYED_UNTIL.read(&*ctx.state, &ns)? {
                Some(target) => ctx.clock.event_time >= target,
                None => false,
            },
            NodeKind::AfterProcessingTime { .. } => match DELAYED_UNTIL.read(&*ctx.state, &ns)? {
                Some(target) => ctx.clock.processing_time >= target,
                None => false,
            },
            NodeKind::AfterSynchronizedProcessingTime => {
                match DELAYED_UNTIL.read(&*ctx.state, &ns)? {
                    Some(target) => ctx.clock.synchronized_time >= target,
                    None => false,
                }
            }
            NodeKind::AfterCount(n) => {
                let count = ELEMENTS_IN_PANE.extract(&*ctx.state, &ns, &COUNT)?.unwrap_or(0);
                count >= *n
            }
            NodeKind::Scripted(script) => script.pending_fire(),
            NodeKind::Repeatedly => self.should_fire(ctx, node.children[0])?,
            NodeKind::OrFinally => {
                self.should_fire(ctx, node.children[0])? || self.should_fire(ctx, node.children[1])?
            }
            NodeKind::AfterEach => match node.children.iter().find(|c| !ctx.finished.get(**c)) {
                Some(child) => self.should_fire(ctx, *child)?,
                None => false,
            },
            NodeKind::AfterFirst => {
                let mut any = false;
                for child in &node.children {
                    if !ctx.finished.get(*child) && self.should_fire(ctx, *child)? {
                        any = true;
                        break;
                    }
                }
                // A child that finished inside this event (a scripted
                // fire-and-finish) also satisfies "any child fired".
                any || node.children.iter().any(|c| ctx.finished.get(*c))
            }
            NodeKind::AfterAll => {
                let mut all = true;
                for child in &node.children {
                    if !(ctx.finished.get(*child) || self.should_fire(ctx, *child)?) {
                        all = false;
                        break;
                    }
                }
                all
            }
        })
    }

    /// Adjust state for the firing that is about to emit: finished bits are
    /// set, one-shot cells are cleared, `Repeatedly` resets a finished
    /// child.
    ///
    /// Only invoked on nodes whose `should_fire` is true. Firing a node
    /// whose finished bit is already set is a contract violation: coerced
    /// to a no-op and counted.
    pub fn on_fire(&self, ctx: &mut TriggerContext<'_>, idx: usize) -> Result<()> {
        if ctx.finished.get(idx) {
            if let NodeKind::Scripted(script) = &self.node(idx).kind {
                // The fire was recorded when the decision was consumed.
                script.clear_pending_fire();
                return Ok(());
            }
            debug_assert!(false, "on_fire invoked on finished trigger node {idx}");
            ctx.counters.increment(COERCED_DUPLICATE_FIRES, 1);
            tracing::warn!("coerced duplicate fire of trigger node {idx} into a no-op");
            return Ok(());
        }
        let ns = self.namespace(ctx.window, idx);
        let node = self.node(idx);
        match &node.kind {
            NodeKind::AfterEndOfWindow => {
                ctx.finished.set(idx, true);
                ctx.timers.delete(&ns, TimeDomain::EventTime);
            }
            NodeKind::AfterFirstElementInPane { .. } => {
                ctx.finished.set(idx, true);
                DELAYED_UNTIL.clear(ctx.state, &ns)?;
                ctx.timers.delete(&ns, TimeDomain::EventTime);
            }
            NodeKind::AfterProcessingTime { .. } => {
                ctx.finished.set(idx, true);
                DELAYED_UNTIL.clear(ctx.state, &ns)?;
                ctx.timers.delete(&ns, TimeDomain::ProcessingTime);
            }
            NodeKind::AfterSynchronizedProcessingTime => {
                ctx.finished.set(idx, true);
                DELAYED_UNTIL.clear(ctx.state, &ns)?;
                ctx.timers.delete(&ns, TimeDomain::SynchronizedProcessingTime);
            }
            NodeKind::AfterCount(_) => {
                ctx.finished.set(idx, true);
                ELEMENTS_IN_PANE.clear(ctx.state, &ns)?;
            }
            NodeKind::Scripted(script) => {
                // The finished bit (for a fire-and-finish) was recorded
                // when the decision was consumed.
                script.clear_pending_fire();
            }
            NodeKind::Repeatedly => {
                let child = node.children[0];
                if self.should_fire(ctx, child)? {
                    self.on_fire(ctx, child)?;
                }
                if ctx.finished.get(child) {
                    self.reset_subtree(ctx, child)?;
                }
            }
            NodeKind::OrFinally => {
                let (main, until) = (node.children[0], node.children[1]);
                let until_fired = ctx.finished.get(until) || self.should_fire(ctx, until)?;
                if until_fired {
                    if !ctx.finished.get(until) {
                        self.on_fire(ctx, until)?;
                    }
                    ctx.finished.set(idx, true);
                } else {
                    if self.should_fire(ctx, main)? {
                        self.on_fire(ctx, main)?;
                    }
                    if ctx.finished.get(main) {
                        ctx.finished.set(idx, true);
                    }
                }
            }
            NodeKind::AfterEach => {
                if let Some(child) = node.children.iter().copied().find(|c| !ctx.finished.get(*c))
                {
                    if self.should_fire(ctx, child)? {
                        self.on_fire(ctx, child)?;
                    }
                }
                if node.children.iter().all(|c| ctx.finished.get(*c)) {
                    ctx.finished.set(idx, true);
                }
            }
            NodeKind::AfterFirst | NodeKind::AfterAll => {
                for child in node.children.clone() {
                    if !ctx.finished.get(child) && self.should_fire(ctx, child)? {
                        self.on_fire(ctx, child)?;
                    }
                }
                ctx.finished.set(idx, true);
            }
        }
        Ok(())
    }

    /// Clear the finished bits and persisted state of the subtree rooted at
    /// `idx`, returning it to its initial condition. Used by `Repeatedly`.
    pub fn reset_subtree(&self, ctx: &mut TriggerContext<'_>, idx: usize) -> Result<()> {
        let end = self.node(idx).subtree_end;
        ctx.finished.clear_range(idx, end);
        for node_idx in idx..end {
            let ns = self.namespace(ctx.window, node_idx);
            match &self.node(node_idx).kind {
                NodeKind::AfterEndOfWindow => {
                    ctx.timers.delete(&ns, TimeDomain::EventTime);
                }
                NodeKind::AfterFirstElementInPane { .. } => {
                    DELAYED_UNTIL.clear(ctx.state, &ns)?;
                    ctx.timers.delete(&ns, TimeDomain::EventTime);
                }
                NodeKind::AfterProcessingTime { .. } => {
                    DELAYED_UNTIL.clear(ctx.state, &ns)?;
                    ctx.timers.delete(&ns, TimeDomain::ProcessingTime);
                }
                NodeKind::AfterSynchronizedProcessingTime => {
                    DELAYED_UNTIL.clear(ctx.state, &ns)?;
                    ctx.timers.delete(&ns, TimeDomain::SynchronizedProcessingTime);
                }
                NodeKind::AfterCount(_) => {
                    ELEMENTS_IN_PANE.clear(ctx.state, &ns)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Coalesce per-node persisted cells of the merging source windows into
    /// the result window: counts sum, target instants keep the earliest.
    pub fn merge_persisted_state(
        &self,
        backend: &mut dyn StateBackend,
        source_windows: &[Window],
        result: &Window,
    ) -> Result<()> {
        for idx in 0..self.len() {
            let result_ns = self.namespace(result, idx);
            let sources: Vec<StateNamespace> = source_windows
                .iter()
                .map(|w| self.namespace(w, idx))
                .collect();
            match &self.node(idx).kind {
                NodeKind::AfterCount(_) => {
                    ELEMENTS_IN_PANE.merge_into(backend, &sources, &result_ns, &COUNT)?;
                }
                NodeKind::AfterFirstElementInPane { .. }
                | NodeKind::AfterProcessingTime { .. }
                | NodeKind::AfterSynchronizedProcessingTime => {
                    let mut earliest = DELAYED_UNTIL.read(&*backend, &result_ns)?;
                    for source in &sources {
                        if source == &result_ns {
                            continue;
                        }
                        if let Some(target) = DELAYED_UNTIL.read(&*backend, source)? {
                            earliest = Some(earliest.map_or(target, |e: EventTime| e.min(target)));
                            DELAYED_UNTIL.clear(backend, source)?;
                        }
                    }
                    if let Some(target) = earliest {
                        DELAYED_UNTIL.write(backend, &result_ns, &target)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Hint the cells the next event will read, so a batched backend can
    /// amortize the fetches.
    pub fn prefetch_state(&self, backend: &mut dyn StateBackend, window: &Window) {
        for idx in 0..self.len() {
            let ns = self.namespace(window, idx);
            match &self.node(idx).kind {
                NodeKind::AfterFirstElementInPane { .. }
                | NodeKind::AfterProcessingTime { .. }
                | NodeKind::AfterSynchronizedProcessingTime => {
                    backend.prefetch(&ns, &[DELAYED_UNTIL.name()]);
                }
                NodeKind::AfterCount(_) => {
                    backend.prefetch(&ns, &[ELEMENTS_IN_PANE.name()]);
                }
                _ => {}
            }
        }
    }

    /// Drop per-event transient state (scripted pending-fire flags). Called
    /// by the runner once an event and its evaluation are done.
    pub fn clear_transient(&self) {
        for node in self.nodes() {
            if let NodeKind::Scripted(script) = &node.kind {
                script.clear_pending_fire();
            }
        }
    }
}
