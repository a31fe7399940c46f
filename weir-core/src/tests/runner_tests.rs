use super::*;

use std::time::Duration as StdDuration;

use crate::metrics::InMemoryCounters;
use crate::output::VecSink;
use crate::reduce::{BufferingReduceFn, CombiningReduceFn, SumCombineFn};
use crate::state::InMemoryStateBackend;
use crate::trigger::Trigger;
use crate::window::WindowFn;

type BufferingRunner = WindowRunner<
    String,
    i64,
    BufferingReduceFn<i64>,
    InMemoryStateBackend,
    VecSink<String, Vec<i64>>,
    InMemoryCounters,
>;

fn buffering_runner(strategy: WindowingStrategy) -> BufferingRunner {
    WindowRunner::new(
        strategy,
        BufferingReduceFn::new(),
        InMemoryStateBackend::new(),
        VecSink::new(),
        InMemoryCounters::new(),
    )
    .unwrap()
}

fn key() -> String {
    "k".to_string()
}

#[test]
fn test_rejects_invalid_configuration() {
    // A sequence trigger cannot pair with merging session windows; the
    // error names both sides.
    let strategy = WindowingStrategy::new(WindowFn::sessions(StdDuration::from_millis(10)))
        .with_trigger(Trigger::after_each(vec![Trigger::after_count(2)]));
    let err = WindowRunner::<String, i64, BufferingReduceFn<i64>, _, _, _>::new(
        strategy,
        BufferingReduceFn::new(),
        InMemoryStateBackend::new(),
        VecSink::<String, Vec<i64>>::new(),
        InMemoryCounters::new(),
    )
    .err()
    .expect("pairing a sequence trigger with merging windows must fail");
    let msg = format!("{err}");
    assert!(msg.contains("AfterEach"), "{msg}");
    assert!(msg.contains("Sessions"), "{msg}");
}

#[test]
fn test_default_trigger_fires_when_watermark_passes_end() {
    let mut runner =
        buffering_runner(WindowingStrategy::new(WindowFn::fixed(StdDuration::from_millis(10))));

    runner.process_element(key(), 1, 1).unwrap();
    runner.process_element(key(), 2, 9).unwrap();
    runner.advance_input_watermark(9).unwrap();
    assert!(runner.sink().is_empty());

    runner.advance_input_watermark(10).unwrap();
    let panes = runner.sink_mut().drain();
    assert_eq!(panes.len(), 1);
    let (k, pane) = &panes[0];
    assert_eq!(k, "k");
    assert_eq!(pane.window, Window::new(0, 10));
    let mut values = pane.value.clone();
    values.sort();
    assert_eq!(values, vec![1, 2]);
    assert_eq!(pane.pane.timing, crate::reduce::PaneTiming::OnTime);
    assert!(pane.pane.is_first);
    assert!(pane.pane.is_last);
}

#[test]
fn test_window_closes_after_default_trigger_fires() {
    let mut runner =
        buffering_runner(WindowingStrategy::new(WindowFn::fixed(StdDuration::from_millis(10))));
    runner.process_element(key(), 1, 5).unwrap();
    runner.advance_input_watermark(10).unwrap();

    assert!(runner.is_root_finished(&key(), &Window::new(0, 10)).unwrap());
    assert_eq!(runner.pending_timer_count(&key()).unwrap(), 0);
    // Only the closed marker remains.
    assert_eq!(
        runner.state_in_use(&key()).unwrap(),
        vec![StateNamespace::Window(Window::new(0, 10))]
    );

    // A straggler for the closed window is dropped and counted.
    runner.process_element(key(), 2, 5).unwrap();
    assert_eq!(runner.counters().get(DROPPED_DUE_TO_CLOSED_WINDOW), 1);
    assert!(runner.sink().is_empty());
}

#[test]
fn test_expired_window_drops_element_and_counts() {
    let mut runner =
        buffering_runner(WindowingStrategy::new(WindowFn::fixed(StdDuration::from_millis(10))));
    runner.advance_input_watermark(50).unwrap();

    // Window [0,10) is past its horizon entirely.
    runner.process_element(key(), 1, 5).unwrap();
    assert_eq!(runner.counters().get(DROPPED_DUE_TO_LATENESS), 1);
    assert!(runner.sink().is_empty());
    assert_eq!(runner.state_in_use(&key()).unwrap(), vec![]);
}

#[test]
fn test_garbage_collection_removes_closed_marker() {
    let mut runner =
        buffering_runner(WindowingStrategy::new(WindowFn::fixed(StdDuration::from_millis(10))));
    runner.process_element(key(), 1, 5).unwrap();
    runner.advance_input_watermark(10).unwrap();
    assert!(runner.is_root_finished(&key(), &Window::new(0, 10)).unwrap());

    // One tick past the horizon the marker goes too.
    runner.advance_input_watermark(11).unwrap();
    assert!(!runner.is_root_finished(&key(), &Window::new(0, 10)).unwrap());
    assert_eq!(runner.state_in_use(&key()).unwrap(), vec![]);
    assert_eq!(runner.active_windows(&key()).unwrap(), vec![]);
}

#[test]
fn test_combining_runner_emits_extracted_output() {
    let mut runner: WindowRunner<
        String,
        i64,
        CombiningReduceFn<SumCombineFn>,
        InMemoryStateBackend,
        VecSink<String, i64>,
        InMemoryCounters,
    > = WindowRunner::new(
        WindowingStrategy::new(WindowFn::fixed(StdDuration::from_millis(10))),
        CombiningReduceFn::new(SumCombineFn),
        InMemoryStateBackend::new(),
        VecSink::new(),
        InMemoryCounters::new(),
    )
    .unwrap();

    for (v, ts) in [(1, 1), (2, 5), (3, 9)] {
        runner.process_element(key(), v, ts).unwrap();
    }
    runner.advance_input_watermark(10).unwrap();
    let panes = runner.sink_mut().drain();
    assert_eq!(panes.len(), 1);
    assert_eq!(panes[0].1.value, 6);
    assert_eq!(panes[0].1.timestamp, 1); // earliest element
}

#[test]
fn test_keys_are_independent() {
    let mut runner =
        buffering_runner(WindowingStrategy::new(WindowFn::fixed(StdDuration::from_millis(10))));
    runner.process_element("a".to_string(), 10, 1).unwrap();
    runner.process_element("b".to_string(), 20, 2).unwrap();
    runner.advance_input_watermark(10).unwrap();

    let mut emitted: Vec<(String, Vec<i64>)> = runner
        .sink_mut()
        .drain()
        .into_iter()
        .map(|(k, wv)| (k, wv.value))
        .collect();
    emitted.sort();
    assert_eq!(
        emitted,
        vec![("a".to_string(), vec![10]), ("b".to_string(), vec![20])]
    );
}

#[test]
fn test_output_watermark_hold_tracks_earliest_open_window() {
    let mut runner =
        buffering_runner(WindowingStrategy::new(WindowFn::fixed(StdDuration::from_millis(10))));
    assert_eq!(runner.output_watermark_hold().unwrap(), None);

    runner.process_element(key(), 1, 7).unwrap();
    runner.process_element(key(), 2, 13).unwrap();
    assert_eq!(runner.output_watermark_hold().unwrap(), Some(7));

    runner.advance_input_watermark(10).unwrap();
    // [0,10) fired and released its hold; [10,20) still holds 13.
    assert_eq!(runner.output_watermark_hold().unwrap(), Some(13));
}

#[test]
fn test_snapshot_restore_roundtrip() {
    let mut runner =
        buffering_runner(WindowingStrategy::new(WindowFn::fixed(StdDuration::from_millis(10))));
    runner.process_element(key(), 1, 1).unwrap();
    runner.process_element(key(), 2, 9).unwrap();
    runner.persist(&key()).unwrap();

    let runner_snapshot = runner.snapshot_state().unwrap();
    let state_snapshot = runner.backend().snapshot().unwrap();

    let mut restored =
        buffering_runner(WindowingStrategy::new(WindowFn::fixed(StdDuration::from_millis(10))));
    restored.restore_state(&runner_snapshot).unwrap();
    restored.backend_mut().restore(&state_snapshot).unwrap();

    restored.advance_input_watermark(10).unwrap();
    let panes = restored.sink_mut().drain();
    assert_eq!(panes.len(), 1);
    let mut values = panes[0].1.value.clone();
    values.sort();
    assert_eq!(values, vec![1, 2]);
}

#[test]
fn test_processing_time_trigger_fires_after_delay() {
    let strategy = WindowingStrategy::new(WindowFn::fixed(StdDuration::from_millis(10)))
        .with_trigger(Trigger::after_processing_time(StdDuration::from_millis(50)));
    let mut runner = buffering_runner(strategy);

    runner.advance_processing_time(100).unwrap();
    runner.process_element(key(), 1, 5).unwrap();

    runner.advance_processing_time(149).unwrap();
    assert!(runner.sink().is_empty());

    runner.advance_processing_time(150).unwrap();
    let panes = runner.sink_mut().drain();
    assert_eq!(panes.len(), 1);
    assert_eq!(panes[0].1.value, vec![1]);
    // Fired before the watermark reached the end of the window.
    assert_eq!(panes[0].1.pane.timing, crate::reduce::PaneTiming::Early);
    assert_eq!(panes[0].1.pane.non_speculative_index, -1);
}

struct FixedLagSource(std::sync::Arc<std::sync::atomic::AtomicI64>);

impl crate::time::SyncTimeSource for FixedLagSource {
    fn upstream_synchronized_time(&self) -> Option<EventTime> {
        Some(self.0.load(std::sync::atomic::Ordering::SeqCst))
    }
}

#[test]
fn test_synchronized_trigger_waits_for_upstream() {
    let upstream = std::sync::Arc::new(std::sync::atomic::AtomicI64::new(60));
    let strategy = WindowingStrategy::new(WindowFn::fixed(StdDuration::from_millis(10)))
        .with_trigger(Trigger::AfterSynchronizedProcessingTime);
    let mut runner = buffering_runner(strategy)
        .with_sync_time_source(Box::new(FixedLagSource(upstream.clone())));

    runner.advance_processing_time(100).unwrap();
    assert_eq!(runner.current_synchronized_processing_time(), 60);

    // Target is the arrival processing time (100); upstream is behind.
    runner.process_element(key(), 1, 5).unwrap();
    upstream.store(90, std::sync::atomic::Ordering::SeqCst);
    runner.advance_processing_time(120).unwrap();
    assert!(runner.sink().is_empty());

    // Upstream catches up past the target.
    upstream.store(150, std::sync::atomic::Ordering::SeqCst);
    runner.advance_processing_time(150).unwrap();
    let panes = runner.sink_mut().drain();
    assert_eq!(panes.len(), 1);
    assert_eq!(panes[0].1.value, vec![1]);
}

#[test]
fn test_repeatedly_emits_late_pane_for_admitted_straggler() {
    let strategy = WindowingStrategy::new(WindowFn::fixed(StdDuration::from_millis(10)))
        .with_trigger(Trigger::repeatedly(Trigger::AfterEndOfWindow))
        .with_allowed_lateness(StdDuration::from_millis(20));
    let mut runner = buffering_runner(strategy);

    runner.process_element(key(), 1, 5).unwrap();
    runner.advance_input_watermark(12).unwrap();
    let on_time = runner.sink_mut().drain();
    assert_eq!(on_time.len(), 1);
    assert_eq!(on_time[0].1.pane.timing, crate::reduce::PaneTiming::OnTime);
    assert!(!on_time[0].1.pane.is_last);

    // Late but inside the horizon: admitted, fires a late pane.
    runner.process_element(key(), 2, 3).unwrap();
    runner.advance_input_watermark(20).unwrap();
    let late = runner.sink_mut().drain();
    assert_eq!(late.len(), 1);
    assert_eq!(late[0].1.value, vec![2]);
    assert_eq!(late[0].1.pane.timing, crate::reduce::PaneTiming::Late);
    assert_eq!(late[0].1.pane.index, 1);
    assert_eq!(late[0].1.pane.non_speculative_index, 1);
}
