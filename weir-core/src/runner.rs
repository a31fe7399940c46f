use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::metrics::{
    Counters, DROPPED_DUE_TO_CLOSED_WINDOW, DROPPED_DUE_TO_LATENESS, GROUPED_BYTES_READ,
    PANES_FIRED,
};
use crate::output::{OutputSink, WindowedValue};
use crate::reduce::{PaneTracker, ReduceFn, WatermarkHold};
use crate::state::{StateBackend, StateNamespace, ValueTag};
use crate::strategy::WindowingStrategy;
use crate::time::{ClockState, SyncTimeSource, TimeDomain, TimerFiring, TimerService};
use crate::trigger::{FinishedBits, MergeSignals, TriggerContext, TriggerTree, ROOT_TRIGGER};
use crate::types::{EventTime, StreamData};
use crate::window::{ActiveWindowSet, MergeBinding, Window};

/// Per-(key, window) finished bitmap. A stored bitmap with the root bit set
/// is the closed marker a window leaves behind.
const FINISHED_BITS_TAG: ValueTag<FinishedBits> = ValueTag::new("finished-bits");

#[cfg(test)]
#[path = "tests/runner_tests.rs"]
mod tests;

/// Per-key bookkeeping held by the runner. State cells live in the backend;
/// this is only what the runner needs resident to route events.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyContext<K> {
    key: K,
    active: ActiveWindowSet,
    timers: TimerService,
}

#[derive(Serialize, Deserialize)]
struct RunnerSnapshot<K> {
    keys: Vec<(Vec<u8>, KeyContext<K>)>,
    clock: ClockState,
}

/// The windowing and trigger execution core for a set of keys.
///
/// All work for one key happens synchronously inside the entry points —
/// assignment, merging, buffering, trigger evaluation, and pane emission —
/// on a single logical task. Across keys the embedding runtime may shard
/// runners freely.
///
/// Entry points: [`process_element`](Self::process_element),
/// [`advance_input_watermark`](Self::advance_input_watermark),
/// [`advance_processing_time`](Self::advance_processing_time),
/// [`persist`](Self::persist).
pub struct WindowRunner<K, V, R, S, O, C>
where
    K: StreamData,
    V: StreamData,
    R: ReduceFn<V>,
    S: StateBackend,
    O: OutputSink<K, R::Output>,
    C: Counters,
{
    strategy: WindowingStrategy,
    tree: TriggerTree,
    reduce_fn: R,
    hold: WatermarkHold,
    backend: S,
    sink: O,
    counters: C,
    keys: HashMap<Vec<u8>, KeyContext<K>, ahash::RandomState>,
    clock: ClockState,
    sync_source: Option<Box<dyn SyncTimeSource>>,
    /// If an event runs longer than this (processing time), log and move
    /// on. The core itself never deadlines.
    soft_event_timeout: Option<Duration>,
    _marker: PhantomData<fn() -> V>,
}

impl<K, V, R, S, O, C> WindowRunner<K, V, R, S, O, C>
where
    K: StreamData,
    V: StreamData,
    R: ReduceFn<V>,
    S: StateBackend,
    O: OutputSink<K, R::Output>,
    C: Counters,
{
    /// Build a runner, validating the strategy eagerly. Configuration
    /// errors are fatal and name both offending sides.
    pub fn new(
        strategy: WindowingStrategy,
        reduce_fn: R,
        backend: S,
        sink: O,
        counters: C,
    ) -> Result<Self> {
        strategy.validate()?;
        let tree = TriggerTree::new(&strategy.trigger);
        let hold = WatermarkHold::new(strategy.allowed_lateness_ms, strategy.output_time_fn);
        Ok(Self {
            strategy,
            tree,
            reduce_fn,
            hold,
            backend,
            sink,
            counters,
            keys: HashMap::default(),
            clock: ClockState::new(),
            sync_source: None,
            soft_event_timeout: None,
            _marker: PhantomData,
        })
    }

    /// Install the upstream synchronized-time source. Without one the
    /// synchronized clock tracks processing time.
    pub fn with_sync_time_source(mut self, source: Box<dyn SyncTimeSource>) -> Self {
        self.sync_source = Some(source);
        self
    }

    pub fn with_soft_event_timeout(mut self, bound: Duration) -> Self {
        self.soft_event_timeout = Some(bound);
        self
    }

    // ── Entry points ──────────────────────────────────────────────────────

    /// Assign `value` to its windows, merge session windows, buffer it, run
    /// the trigger tree, and emit any pane that becomes ready —
    /// synchronously.
    pub fn process_element(&mut self, key: K, value: V, timestamp: EventTime) -> Result<()> {
        let started = std::time::Instant::now();
        let key_bytes = bincode::serialize(&key)?;
        self.backend.set_current_key(key_bytes.clone());
        let kc = self
            .keys
            .entry(key_bytes.clone())
            .or_insert_with(|| KeyContext {
                key: key.clone(),
                active: ActiveWindowSet::new(),
                timers: TimerService::new(),
            });

        let is_late = timestamp < self.clock.event_time;
        for window in self.strategy.window_fn.assign(timestamp) {
            if self.clock.event_time > window.lateness_horizon(self.strategy.allowed_lateness_ms) {
                self.counters.increment(DROPPED_DUE_TO_LATENESS, 1);
                tracing::debug!("dropped element at {timestamp}: window {window} expired");
                continue;
            }

            let target = Self::add_and_merge(
                &self.tree,
                &self.strategy,
                &self.reduce_fn,
                &self.hold,
                &mut self.backend,
                &self.counters,
                self.clock,
                kc,
                window,
            )?;

            if kc.active.is_closed(&target) {
                self.counters.increment(DROPPED_DUE_TO_CLOSED_WINDOW, 1);
                tracing::debug!("dropped element at {timestamp}: window {target} is closed");
                continue;
            }

            self.tree.prefetch_state(&mut self.backend, &target);
            let ns = StateNamespace::Window(target);
            self.reduce_fn
                .process_value(&mut self.backend, &ns, &value)
                .with_context(|| format!("reduce fn failed in window {target}"))?;
            self.hold
                .add_hold(&mut self.backend, &ns, &target, timestamp, is_late)?;

            let tree = &self.tree;
            Self::window_event(
                tree,
                &self.reduce_fn,
                &self.hold,
                &mut self.backend,
                &mut self.sink,
                &self.counters,
                self.clock,
                &key,
                key_bytes.len(),
                kc,
                &target,
                true,
                |tctx| tree.on_element(tctx, ROOT_TRIGGER, timestamp),
            )?;
        }

        if let Some(bound) = self.soft_event_timeout {
            let elapsed = started.elapsed();
            if elapsed > bound {
                tracing::warn!(
                    "element at {timestamp} took {elapsed:?}, over the {bound:?} soft timeout"
                );
            }
        }
        Ok(())
    }

    /// Advance the input watermark, firing due event-time timers per key in
    /// nondecreasing timestamp order, then garbage-collect expired windows.
    pub fn advance_input_watermark(&mut self, to: EventTime) -> Result<()> {
        self.clock.advance_event_time(to);
        let clock = self.clock;
        for key_bytes in self.sorted_keys() {
            self.backend.set_current_key(key_bytes.clone());
            let Some(kc) = self.keys.get_mut(&key_bytes) else {
                continue;
            };
            let firings = kc.timers.drain_due(TimeDomain::EventTime, clock.event_time);
            for firing in firings {
                Self::handle_timer_firing(
                    &self.tree,
                    &self.reduce_fn,
                    &self.hold,
                    &mut self.backend,
                    &mut self.sink,
                    &self.counters,
                    clock,
                    key_bytes.len(),
                    kc,
                    &firing,
                )?;
            }
            Self::garbage_collect(
                &self.tree,
                &mut self.backend,
                kc,
                clock,
                self.strategy.allowed_lateness_ms,
            )?;
        }
        Ok(())
    }

    /// Advance processing time, firing due processing-time timers and the
    /// synchronized timers the upstream has caught up to.
    pub fn advance_processing_time(&mut self, to: EventTime) -> Result<()> {
        let upstream = self
            .sync_source
            .as_ref()
            .and_then(|s| s.upstream_synchronized_time());
        self.clock.advance_processing_time(to, upstream);
        let clock = self.clock;
        for key_bytes in self.sorted_keys() {
            self.backend.set_current_key(key_bytes.clone());
            let Some(kc) = self.keys.get_mut(&key_bytes) else {
                continue;
            };
            let mut firings = kc
                .timers
                .drain_due(TimeDomain::ProcessingTime, clock.processing_time);
            firings.extend(kc.timers.drain_due(
                TimeDomain::SynchronizedProcessingTime,
                clock.synchronized_time,
            ));
            for firing in firings {
                Self::handle_timer_firing(
                    &self.tree,
                    &self.reduce_fn,
                    &self.hold,
                    &mut self.backend,
                    &mut self.sink,
                    &self.counters,
                    clock,
                    key_bytes.len(),
                    kc,
                    &firing,
                )?;
            }
        }
        Ok(())
    }

    /// Evaluate pending merges for `key` now, without waiting for the next
    /// element. Windows whose triggers became ready through the merge fire.
    pub fn merge_active_windows(&mut self, key: &K) -> Result<()> {
        let key_bytes = bincode::serialize(key)?;
        self.backend.set_current_key(key_bytes.clone());
        let Some(kc) = self.keys.get_mut(&key_bytes) else {
            return Ok(());
        };

        let proposals = self
            .strategy
            .window_fn
            .merge_proposals(&kc.active.windows());
        let mut results = Vec::new();
        for proposal in proposals {
            let binding = kc.active.begin_merge(&proposal);
            Self::apply_merge(
                &self.tree,
                &self.reduce_fn,
                &self.hold,
                &mut self.backend,
                &self.counters,
                self.clock,
                kc,
                &binding,
            )?;
            results.push(binding.result);
        }
        let key = kc.key.clone();
        for result in results {
            if kc.active.is_closed(&result) {
                continue;
            }
            Self::window_event(
                &self.tree,
                &self.reduce_fn,
                &self.hold,
                &mut self.backend,
                &mut self.sink,
                &self.counters,
                self.clock,
                &key,
                key_bytes.len(),
                kc,
                &result,
                true,
                |_| Ok(()),
            )?;
        }
        Ok(())
    }

    /// Deliver a timer firing directly, cancelling any pending timer for
    /// the same `(namespace, domain)`. Exists for the trigger tester.
    pub fn fire_timer(
        &mut self,
        key: &K,
        namespace: StateNamespace,
        timestamp: EventTime,
        domain: TimeDomain,
    ) -> Result<()> {
        let key_bytes = bincode::serialize(key)?;
        self.backend.set_current_key(key_bytes.clone());
        let Some(kc) = self.keys.get_mut(&key_bytes) else {
            return Err(anyhow!("no state for key"));
        };
        kc.timers.delete(&namespace, domain);
        let firing = TimerFiring {
            namespace,
            domain,
            timestamp,
        };
        Self::handle_timer_firing(
            &self.tree,
            &self.reduce_fn,
            &self.hold,
            &mut self.backend,
            &mut self.sink,
            &self.counters,
            self.clock,
            key_bytes.len(),
            kc,
            &firing,
        )
    }

    /// Flush staged state writes for `key`.
    pub fn persist(&mut self, key: &K) -> Result<()> {
        let key_bytes = bincode::serialize(key)?;
        self.backend.set_current_key(key_bytes);
        self.backend
            .persist()
            .context("state backend persist failed")
    }

    /// Flush staged state writes for every key the runner has seen.
    pub fn persist_all(&mut self) -> Result<()> {
        for key_bytes in self.sorted_keys() {
            self.backend.set_current_key(key_bytes);
            self.backend
                .persist()
                .context("state backend persist failed")?;
        }
        Ok(())
    }

    // ── Clocks and introspection ──────────────────────────────────────────

    pub fn current_event_time(&self) -> EventTime {
        self.clock.event_time
    }

    pub fn current_processing_time(&self) -> EventTime {
        self.clock.processing_time
    }

    pub fn current_synchronized_processing_time(&self) -> EventTime {
        self.clock.synchronized_time
    }

    /// The minimum watermark hold across all keys and open windows, each
    /// window defaulting to its lateness horizon when it holds nothing.
    /// `None` means the output watermark is unconstrained.
    pub fn output_watermark_hold(&mut self) -> Result<Option<EventTime>> {
        let mut min: Option<EventTime> = None;
        for key_bytes in self.sorted_keys() {
            self.backend.set_current_key(key_bytes.clone());
            let Some(kc) = self.keys.get(&key_bytes) else {
                continue;
            };
            for window in kc.active.windows() {
                if kc.active.is_closed(&window) {
                    continue;
                }
                let ns = StateNamespace::Window(window);
                let value = match self.hold.read(&self.backend, &ns)? {
                    Some(hold) => hold,
                    None => window
                        .max_timestamp()
                        .saturating_add(self.strategy.allowed_lateness_ms),
                };
                min = Some(min.map_or(value, |m| m.min(value)));
            }
        }
        Ok(min)
    }

    /// The foreign-window projection of this strategy's windowing.
    pub fn side_input_window(&self, main: &Window) -> Window {
        self.strategy.window_fn.side_input_window(main)
    }

    /// Whether the trigger root has finished for `(key, window)` — the
    /// closed marker.
    pub fn is_root_finished(&mut self, key: &K, window: &Window) -> Result<bool> {
        let key_bytes = bincode::serialize(key)?;
        self.backend.set_current_key(key_bytes);
        Ok(FINISHED_BITS_TAG
            .read(&self.backend, &StateNamespace::Window(*window))?
            .map(|bits| bits.get(ROOT_TRIGGER))
            .unwrap_or(false))
    }

    /// Namespaces holding state for `key`. Exists for the trigger tester.
    pub fn state_in_use(&mut self, key: &K) -> Result<Vec<StateNamespace>> {
        let key_bytes = bincode::serialize(key)?;
        self.backend.set_current_key(key_bytes);
        self.backend.namespaces_in_use()
    }

    /// Fire time of the pending timer for `(key, namespace, domain)`.
    pub fn pending_timer(
        &self,
        key: &K,
        namespace: &StateNamespace,
        domain: TimeDomain,
    ) -> Result<Option<EventTime>> {
        let key_bytes = bincode::serialize(key)?;
        Ok(self
            .keys
            .get(&key_bytes)
            .and_then(|kc| kc.timers.pending(namespace, domain)))
    }

    /// Number of pending timers for `key` across all domains.
    pub fn pending_timer_count(&self, key: &K) -> Result<usize> {
        let key_bytes = bincode::serialize(key)?;
        Ok(self
            .keys
            .get(&key_bytes)
            .map(|kc| kc.timers.len())
            .unwrap_or(0))
    }

    /// Currently tracked windows for `key`, closed ones included.
    pub fn active_windows(&self, key: &K) -> Result<Vec<Window>> {
        let key_bytes = bincode::serialize(key)?;
        Ok(self
            .keys
            .get(&key_bytes)
            .map(|kc| kc.active.windows())
            .unwrap_or_default())
    }

    pub fn strategy(&self) -> &WindowingStrategy {
        &self.strategy
    }

    pub fn sink(&self) -> &O {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut O {
        &mut self.sink
    }

    pub fn counters(&self) -> &C {
        &self.counters
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut S {
        &mut self.backend
    }

    // ── Snapshot / restore ────────────────────────────────────────────────

    /// Serialize the runner's bookkeeping (active sets, timers, clocks).
    /// State cells are the backend's concern; persist before snapshotting.
    pub fn snapshot_state(&self) -> Result<Vec<u8>> {
        let mut keys: Vec<(Vec<u8>, KeyContext<K>)> = self
            .keys
            .iter()
            .map(|(kb, kc)| (kb.clone(), kc.clone()))
            .collect();
        keys.sort_by(|a, b| a.0.cmp(&b.0));
        bincode::serialize(&RunnerSnapshot {
            keys,
            clock: self.clock,
        })
        .context("runner snapshot failed")
    }

    /// Restore bookkeeping from [`snapshot_state`](Self::snapshot_state).
    pub fn restore_state(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            self.keys.clear();
            self.clock = ClockState::new();
            return Ok(());
        }
        let snapshot: RunnerSnapshot<K> =
            bincode::deserialize(data).context("runner restore failed")?;
        self.keys = snapshot.keys.into_iter().collect();
        self.clock = snapshot.clock;
        Ok(())
    }

    // ── Internals ─────────────────────────────────────────────────────────

    fn sorted_keys(&self) -> Vec<Vec<u8>> {
        let mut keys: Vec<Vec<u8>> = self.keys.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Track `window` in the active set and apply any merges it causes.
    /// Returns the window that ended up containing it.
    #[allow(clippy::too_many_arguments)]
    fn add_and_merge(
        tree: &TriggerTree,
        strategy: &WindowingStrategy,
        reduce_fn: &R,
        hold: &WatermarkHold,
        backend: &mut S,
        counters: &C,
        clock: ClockState,
        kc: &mut KeyContext<K>,
        window: Window,
    ) -> Result<Window> {
        kc.active.ensure(window);
        if !strategy.window_fn.is_merging() {
            return Ok(window);
        }

        let proposals = strategy.window_fn.merge_proposals(&kc.active.windows());
        let mut target = window;
        for proposal in proposals {
            let absorbs_target = proposal.to_merge.contains(&target);
            let binding = kc.active.begin_merge(&proposal);
            Self::apply_merge(tree, reduce_fn, hold, backend, counters, clock, kc, &binding)?;
            if absorbs_target {
                target = binding.result;
            }
        }
        Ok(target)
    }

    /// Coalesce the state of physically-merged windows into the result and
    /// rebuild the trigger's finished bits through its merge protocol.
    #[allow(clippy::too_many_arguments)]
    fn apply_merge(
        tree: &TriggerTree,
        reduce_fn: &R,
        hold: &WatermarkHold,
        backend: &mut S,
        counters: &C,
        clock: ClockState,
        kc: &mut KeyContext<K>,
        binding: &MergeBinding,
    ) -> Result<()> {
        let result = binding.result;
        let result_ns = StateNamespace::Window(result);

        // Merging never revives a closed window: the result is closed and
        // whatever unfired state the open sources carried is discarded.
        if binding.any_closed {
            for source in &binding.source_state_windows {
                Self::clear_window_state(tree, backend, source)?;
            }
            let mut bits = FinishedBits::new(tree.len());
            bits.set(ROOT_TRIGGER, true);
            FINISHED_BITS_TAG.write(backend, &result_ns, &bits)?;
            for source in &binding.source_state_windows {
                let sw = *source;
                kc.timers.retain(|tk| tk.namespace.window() != Some(&sw));
            }
            kc.active.collapse(&result);
            return Ok(());
        }

        for source in &binding.source_state_windows {
            tree.prefetch_state(backend, source);
        }

        let mut source_bits = Vec::new();
        for source in &binding.source_state_windows {
            let ns = StateNamespace::Window(*source);
            source_bits.push(
                FINISHED_BITS_TAG
                    .read(&*backend, &ns)?
                    .unwrap_or_else(|| FinishedBits::new(tree.len())),
            );
        }
        let signals = MergeSignals::aggregate(tree, &source_bits);

        // Coalesce state by the per-cell merge policy before the trigger's
        // on_merge runs.
        let sources_ns: Vec<StateNamespace> = binding
            .source_state_windows
            .iter()
            .map(|w| StateNamespace::Window(*w))
            .collect();
        reduce_fn
            .on_merge(backend, &sources_ns, &result_ns)
            .with_context(|| format!("merging buffers into window {result}"))?;
        hold.on_merge(backend, &sources_ns, &result_ns, &result)?;
        PaneTracker::on_merge(backend, &sources_ns, &result_ns)?;
        tree.merge_persisted_state(backend, &binding.source_state_windows, &result)?;

        for source in &binding.source_state_windows {
            if *source == result {
                continue;
            }
            Self::clear_window_state(tree, backend, source)?;
            let sw = *source;
            kc.timers.retain(|tk| tk.namespace.window() != Some(&sw));
        }

        let mut finished = FinishedBits::new(tree.len());
        {
            let mut tctx = TriggerContext {
                window: &result,
                state: &mut *backend,
                timers: &mut kc.timers,
                clock,
                finished: &mut finished,
                counters,
            };
            tree.on_merge(&mut tctx, &signals, ROOT_TRIGGER)?;
        }
        FINISHED_BITS_TAG.write(backend, &result_ns, &finished)?;
        kc.active.collapse(&result);
        Ok(())
    }

    /// One trigger event against one window: dispatch, then (optionally)
    /// evaluate `should_fire` and emit.
    ///
    /// A timer firing dispatches nothing: the time-based nodes read their
    /// targets lazily in `should_fire`, so the firing is purely the wake-up
    /// that forces an evaluation.
    #[allow(clippy::too_many_arguments)]
    fn window_event(
        tree: &TriggerTree,
        reduce_fn: &R,
        hold: &WatermarkHold,
        backend: &mut S,
        sink: &mut O,
        counters: &C,
        clock: ClockState,
        key: &K,
        key_len: usize,
        kc: &mut KeyContext<K>,
        window: &Window,
        evaluate: bool,
        dispatch: impl FnOnce(&mut TriggerContext<'_>) -> Result<()>,
    ) -> Result<()> {
        let ns = StateNamespace::Window(*window);
        let mut finished = FINISHED_BITS_TAG
            .read(&*backend, &ns)?
            .unwrap_or_else(|| FinishedBits::new(tree.len()));

        let mut fired = false;
        {
            let mut tctx = TriggerContext {
                window,
                state: &mut *backend,
                timers: &mut kc.timers,
                clock,
                finished: &mut finished,
                counters,
            };
            dispatch(&mut tctx)?;
            if evaluate
                && !tctx.finished.get(ROOT_TRIGGER)
                && tree.should_fire(&tctx, ROOT_TRIGGER)?
            {
                tree.on_fire(&mut tctx, ROOT_TRIGGER)?;
                fired = true;
            }
        }

        if fired {
            let root_finished = finished.get(ROOT_TRIGGER);
            if let Some(out) = reduce_fn
                .on_trigger(&*backend, &ns)
                .with_context(|| format!("reading pane for window {window}"))?
            {
                counters.increment(
                    GROUPED_BYTES_READ,
                    out.stored_bytes + out.element_reads * key_len as u64,
                );
                let timestamp = hold.extract_and_release(backend, &ns, window)?;
                let pane = PaneTracker::next_pane(backend, &ns, &clock, window, root_finished)?;
                sink.emit(
                    key,
                    WindowedValue {
                        value: out.value,
                        timestamp,
                        window: *window,
                        pane,
                    },
                )
                .context("output sink emit failed")?;
                counters.increment(PANES_FIRED, 1);
                // Discarding mode: the pane's state does not carry over.
                reduce_fn.clear(backend, &ns)?;
            }

            if root_finished {
                Self::clear_window_state(tree, backend, window)?;
                FINISHED_BITS_TAG.write(backend, &ns, &finished)?;
                let w = *window;
                kc.timers.retain(|tk| tk.namespace.window() != Some(&w));
                kc.active.mark_closed(window);
                if evaluate {
                    tree.clear_transient();
                }
                return Ok(());
            }
        }

        FINISHED_BITS_TAG.write(backend, &ns, &finished)?;
        if evaluate {
            tree.clear_transient();
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_timer_firing(
        tree: &TriggerTree,
        reduce_fn: &R,
        hold: &WatermarkHold,
        backend: &mut S,
        sink: &mut O,
        counters: &C,
        clock: ClockState,
        key_len: usize,
        kc: &mut KeyContext<K>,
        firing: &TimerFiring,
    ) -> Result<()> {
        let Some(window) = firing.namespace.window().copied() else {
            return Ok(());
        };
        if !kc.active.contains(&window) || kc.active.is_closed(&window) {
            return Ok(());
        }
        tree.prefetch_state(backend, &window);
        let key = kc.key.clone();
        Self::window_event(
            tree, reduce_fn, hold, backend, sink, counters, clock, &key, key_len, kc, &window,
            true, |_| Ok(()),
        )
    }

    /// Remove every state cell of `window`: its own namespace and each
    /// trigger node's.
    fn clear_window_state(tree: &TriggerTree, backend: &mut S, window: &Window) -> Result<()> {
        backend.clear_namespace(&StateNamespace::Window(*window))?;
        for idx in 0..tree.len() {
            backend.clear_namespace(&tree.namespace(window, idx))?;
        }
        Ok(())
    }

    /// Drop windows the watermark has passed the lateness horizon of. No
    /// pane is emitted; even the closed marker goes.
    fn garbage_collect(
        tree: &TriggerTree,
        backend: &mut S,
        kc: &mut KeyContext<K>,
        clock: ClockState,
        allowed_lateness_ms: i64,
    ) -> Result<()> {
        let expired: Vec<Window> = kc
            .active
            .windows()
            .into_iter()
            .filter(|w| clock.event_time > w.lateness_horizon(allowed_lateness_ms))
            .collect();
        for window in expired {
            tracing::debug!("garbage collecting window {window}");
            Self::clear_window_state(tree, backend, &window)?;
            kc.timers
                .retain(|tk| tk.namespace.window() != Some(&window));
            kc.active.remove(&window);
        }
        Ok(())
    }
}
