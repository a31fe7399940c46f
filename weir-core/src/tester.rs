//! Single-key harness for end-to-end windowing and trigger tests.

use anyhow::Result;

use crate::metrics::InMemoryCounters;
use crate::output::{VecSink, WindowedValue};
use crate::reduce::BufferingReduceFn;
use crate::runner::WindowRunner;
use crate::state::{InMemoryStateBackend, StateNamespace};
use crate::strategy::WindowingStrategy;
use crate::time::TimeDomain;
use crate::trigger::Trigger;
use crate::types::{EventTime, StreamData};
use crate::window::{Window, WindowFn};

/// The key every element injected through the tester belongs to.
const TEST_KEY: &str = "k";

/// Drives a buffering [`WindowRunner`] for one key over the in-memory
/// backend, with every knob a windowing test needs: inject elements,
/// advance clocks, fire timers, force merges, and inspect emitted panes,
/// finished windows, and the keyed state in use.
///
/// Scripted triggers ([`crate::trigger::ScriptedTrigger`]) slot into the
/// trigger tree to stand in for real triggers when a test wants to dictate
/// decisions per event.
pub struct TriggerTester<V: StreamData> {
    runner: WindowRunner<
        String,
        V,
        BufferingReduceFn<V>,
        InMemoryStateBackend,
        VecSink<String, Vec<V>>,
        InMemoryCounters,
    >,
}

impl<V: StreamData> TriggerTester<V> {
    /// Tester over raw (buffering) grouping with the given windowing and
    /// trigger, no allowed lateness.
    pub fn buffering(window_fn: WindowFn, trigger: Trigger) -> Result<Self> {
        Self::with_strategy(WindowingStrategy::new(window_fn).with_trigger(trigger))
    }

    /// Tester over an explicit strategy, for tests that need lateness or a
    /// non-default output time.
    pub fn with_strategy(strategy: WindowingStrategy) -> Result<Self> {
        Ok(Self {
            runner: WindowRunner::new(
                strategy,
                BufferingReduceFn::new(),
                InMemoryStateBackend::new(),
                VecSink::new(),
                InMemoryCounters::new(),
            )?,
        })
    }

    /// Feed one element through assignment, merging, and the trigger tree.
    pub fn inject_element(&mut self, value: V, timestamp: EventTime) -> Result<()> {
        self.runner
            .process_element(TEST_KEY.to_string(), value, timestamp)
    }

    /// Advance the input watermark, firing due event-time timers.
    pub fn advance_watermark(&mut self, to: EventTime) -> Result<()> {
        self.runner.advance_input_watermark(to)
    }

    /// Advance processing time, firing due processing-time and
    /// synchronized timers.
    pub fn advance_processing_time(&mut self, to: EventTime) -> Result<()> {
        self.runner.advance_processing_time(to)
    }

    /// Deliver a timer for `namespace` directly.
    pub fn fire_timer(
        &mut self,
        namespace: StateNamespace,
        timestamp: EventTime,
        domain: TimeDomain,
    ) -> Result<()> {
        self.runner
            .fire_timer(&TEST_KEY.to_string(), namespace, timestamp, domain)
    }

    /// Apply and evaluate any pending window merges now.
    pub fn merge_windows(&mut self) -> Result<()> {
        self.runner.merge_active_windows(&TEST_KEY.to_string())
    }

    /// Drain everything emitted since the last call.
    pub fn extract_output(&mut self) -> Vec<WindowedValue<Vec<V>>> {
        self.runner
            .sink_mut()
            .drain()
            .into_iter()
            .map(|(_, wv)| wv)
            .collect()
    }

    /// Whether the trigger root has finished for `window` — i.e. the
    /// window is marked closed.
    pub fn is_marked_finished(&mut self, window: &Window) -> Result<bool> {
        self.runner.is_root_finished(&TEST_KEY.to_string(), window)
    }

    /// Namespaces currently holding state for the test key. A closed
    /// window shows up with exactly its finished-bits marker.
    pub fn keyed_state_in_use(&mut self) -> Result<Vec<StateNamespace>> {
        self.runner.state_in_use(&TEST_KEY.to_string())
    }

    /// Tracked windows, closed ones included.
    pub fn active_windows(&self) -> Result<Vec<Window>> {
        self.runner.active_windows(&TEST_KEY.to_string())
    }

    /// Value of a diagnostic counter.
    pub fn counter(&self, name: &str) -> u64 {
        self.runner.counters().get(name)
    }

    /// The minimum output-watermark hold, if any window holds one.
    pub fn output_watermark_hold(&mut self) -> Result<Option<EventTime>> {
        self.runner.output_watermark_hold()
    }

    /// Flush staged state writes for the test key.
    pub fn persist(&mut self) -> Result<()> {
        self.runner.persist(&TEST_KEY.to_string())
    }

    /// Fire time of the pending timer for `(namespace, domain)`, if one is
    /// set for the test key.
    pub fn pending_timer(
        &self,
        namespace: &StateNamespace,
        domain: TimeDomain,
    ) -> Result<Option<EventTime>> {
        self.runner
            .pending_timer(&TEST_KEY.to_string(), namespace, domain)
    }

    /// Total pending timers for the test key. Zero once every window has
    /// closed.
    pub fn pending_timer_count(&self) -> Result<usize> {
        self.runner.pending_timer_count(&TEST_KEY.to_string())
    }
}
