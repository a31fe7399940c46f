//! End-to-end windowing scenarios driven through the public surface.

use std::time::Duration;

use weir_core::metrics::{
    InMemoryCounters, DROPPED_DUE_TO_LATENESS, GROUPED_BYTES_READ,
};
use weir_core::output::VecSink;
use weir_core::reduce::{BufferingReduceFn, OutputTimeFn, PaneTiming};
use weir_core::runner::WindowRunner;
use weir_core::state::InMemoryStateBackend;
use weir_core::strategy::WindowingStrategy;
use weir_core::tester::TriggerTester;
use weir_core::trigger::{ScriptedResult, ScriptedTrigger, Trigger};
use weir_core::window::{Window, WindowFn};

fn sorted(mut values: Vec<i64>) -> Vec<i64> {
    values.sort();
    values
}

// ── Scenario 1: fixed windows, default trigger ────────────────────────────

#[test]
fn fixed_windows_default_trigger_fires_on_watermark() {
    // Latest-element output times give each pane the timestamp of its
    // newest value.
    let strategy = WindowingStrategy::new(WindowFn::fixed(Duration::from_millis(10)))
        .with_output_time_fn(OutputTimeFn::Latest);
    let mut tester: TriggerTester<i64> = TriggerTester::with_strategy(strategy).unwrap();

    for (v, ts) in [(1, 1), (2, 9), (3, 15), (4, 19), (5, 30)] {
        tester.inject_element(v, ts).unwrap();
    }

    tester.advance_watermark(9).unwrap();
    assert!(tester.extract_output().is_empty());

    tester.advance_watermark(10).unwrap();
    let panes = tester.extract_output();
    assert_eq!(panes.len(), 1);
    assert_eq!(panes[0].window, Window::new(0, 10));
    assert_eq!(sorted(panes[0].value.clone()), vec![1, 2]);
    assert_eq!(panes[0].timestamp, 9);
    assert_eq!(panes[0].pane.timing, PaneTiming::OnTime);

    tester.advance_watermark(100).unwrap();
    let panes = tester.extract_output();
    assert_eq!(panes.len(), 2);
    assert_eq!(panes[0].window, Window::new(10, 20));
    assert_eq!(sorted(panes[0].value.clone()), vec![3, 4]);
    assert_eq!(panes[0].timestamp, 19);
    assert_eq!(panes[1].window, Window::new(30, 40));
    assert_eq!(panes[1].value, vec![5]);
    assert_eq!(panes[1].timestamp, 30);
}

// ── Scenario 2: session windows ───────────────────────────────────────────

#[test]
fn session_windows_merge_via_gap() {
    let mut tester: TriggerTester<i64> =
        TriggerTester::buffering(WindowFn::sessions(Duration::from_millis(10)), Trigger::default())
            .unwrap();

    for (v, ts) in [(1, 1), (2, 9), (3, 15), (4, 30)] {
        tester.inject_element(v, ts).unwrap();
    }
    // [1,11), [9,19), [15,25) merged into [1,25); [30,40) apart.
    assert_eq!(
        tester.active_windows().unwrap(),
        vec![Window::new(1, 25), Window::new(30, 40)]
    );

    tester.advance_watermark(100).unwrap();
    let panes = tester.extract_output();
    assert_eq!(panes.len(), 2);
    assert_eq!(panes[0].window, Window::new(1, 25));
    assert_eq!(sorted(panes[0].value.clone()), vec![1, 2, 3]);
    assert_eq!(panes[0].timestamp, 1);
    assert_eq!(panes[1].window, Window::new(30, 40));
    assert_eq!(panes[1].value, vec![4]);
    assert_eq!(panes[1].timestamp, 30);
}

// ── Scenario 3: AfterAll over fixed windows ───────────────────────────────

#[test]
fn after_all_fires_once_both_children_fired() {
    let t1 = ScriptedTrigger::new();
    let t2 = ScriptedTrigger::new();
    let trigger = Trigger::after_all(vec![
        Trigger::Scripted(t1.clone()),
        Trigger::Scripted(t2.clone()),
    ]);
    let mut tester: TriggerTester<i64> =
        TriggerTester::buffering(WindowFn::fixed(Duration::from_millis(10)), trigger).unwrap();
    let window = Window::new(0, 10);

    t1.on_next_element(ScriptedResult::Continue);
    t2.on_next_element(ScriptedResult::Continue);
    tester.inject_element(1, 1).unwrap();
    assert!(tester.extract_output().is_empty());

    t1.on_next_element(ScriptedResult::FireAndFinish);
    t2.on_next_element(ScriptedResult::Continue);
    tester.inject_element(2, 2).unwrap();
    assert!(tester.extract_output().is_empty());

    // t1 is finished and no longer consulted; only t2 decides.
    t2.on_next_element(ScriptedResult::FireAndFinish);
    tester.inject_element(3, 3).unwrap();
    let panes = tester.extract_output();
    assert_eq!(panes.len(), 1);
    assert_eq!(sorted(panes[0].value.clone()), vec![1, 2, 3]);
    assert_eq!(panes[0].timestamp, 1);
    assert!(panes[0].pane.is_last);

    assert!(tester.is_marked_finished(&window).unwrap());
    // Closed: nothing but the finished-bits marker remains.
    assert_eq!(
        tester.keyed_state_in_use().unwrap(),
        vec![weir_core::state::StateNamespace::Window(window)]
    );
    assert_eq!(tester.pending_timer_count().unwrap(), 0);
}

// ── Scenario 4: Repeatedly until ──────────────────────────────────────────

#[test]
fn repeatedly_resets_child_and_or_finally_closes() {
    let t = ScriptedTrigger::new();
    let u = ScriptedTrigger::new();
    let trigger = Trigger::repeatedly(Trigger::Scripted(t.clone()))
        .or_finally(Trigger::Scripted(u.clone()));
    let mut tester: TriggerTester<i64> =
        TriggerTester::buffering(WindowFn::fixed(Duration::from_millis(10)), trigger).unwrap();
    let window = Window::new(0, 10);

    t.on_next_element(ScriptedResult::Continue);
    u.on_next_element(ScriptedResult::Continue);
    tester.inject_element(1, 1).unwrap();
    assert!(tester.extract_output().is_empty());

    t.on_next_element(ScriptedResult::FireAndFinish);
    u.on_next_element(ScriptedResult::Continue);
    tester.inject_element(2, 2).unwrap();
    let panes = tester.extract_output();
    assert_eq!(panes.len(), 1);
    assert_eq!(sorted(panes[0].value.clone()), vec![1, 2]);
    assert_eq!(panes[0].timestamp, 1);
    // Repeatedly reset its child; the root is still live.
    assert!(!tester.is_marked_finished(&window).unwrap());

    t.on_next_element(ScriptedResult::Fire);
    u.on_next_element(ScriptedResult::Fire);
    tester.inject_element(3, 3).unwrap();
    let panes = tester.extract_output();
    assert_eq!(panes.len(), 1);
    assert_eq!(panes[0].value, vec![3]);
    assert_eq!(panes[0].timestamp, 3);
    assert!(panes[0].pane.is_last);
    assert!(tester.is_marked_finished(&window).unwrap());
}

// ── Scenario 5: AfterFirst over merging sessions ──────────────────────────

#[test]
fn after_first_fires_out_of_session_merge() {
    let t1 = ScriptedTrigger::new();
    let t2 = ScriptedTrigger::new();
    let trigger = Trigger::after_first(vec![
        Trigger::Scripted(t1.clone()),
        Trigger::Scripted(t2.clone()),
    ]);
    let mut tester: TriggerTester<i64> =
        TriggerTester::buffering(WindowFn::sessions(Duration::from_millis(10)), trigger).unwrap();

    t1.on_next_element(ScriptedResult::Continue);
    t2.on_next_element(ScriptedResult::Continue);
    tester.inject_element(1, 1).unwrap();
    assert!(tester.extract_output().is_empty());

    // The second element merges [1,11) and [8,18); the merge decisions
    // fire t2.
    t1.on_next_merge(ScriptedResult::Continue);
    t2.on_next_merge(ScriptedResult::FireAndFinish);
    t1.on_next_element(ScriptedResult::Continue);
    tester.inject_element(8, 8).unwrap();

    let panes = tester.extract_output();
    assert_eq!(panes.len(), 1);
    assert_eq!(panes[0].window, Window::new(1, 18));
    assert_eq!(sorted(panes[0].value.clone()), vec![1, 8]);
    assert_eq!(panes[0].timestamp, 1);
    assert!(panes[0].pane.is_last);
    assert!(tester.is_marked_finished(&Window::new(1, 18)).unwrap());
}

// ── Scenario 6: bytes-read accounting ─────────────────────────────────────

#[test]
fn grouped_bytes_are_accounted_on_group_open() {
    let mut runner: WindowRunner<
        i32,
        i32,
        BufferingReduceFn<i32>,
        InMemoryStateBackend,
        VecSink<i32, Vec<i32>>,
        InMemoryCounters,
    > = WindowRunner::new(
        WindowingStrategy::new(WindowFn::fixed(Duration::from_millis(10))),
        BufferingReduceFn::new(),
        InMemoryStateBackend::new(),
        VecSink::new(),
        InMemoryCounters::new(),
    )
    .unwrap();

    for v in 0..10i32 {
        runner.process_element(7, v, 5).unwrap();
    }
    runner.advance_input_watermark(10).unwrap();

    // Ten (i32 key, i32 value) pairs: 8 bytes each, accounted when the
    // group opens, whether or not the consumer iterates the values.
    assert_eq!(runner.counters().get(GROUPED_BYTES_READ), 80);
    assert_eq!(runner.sink().len(), 1);
}

// ── Boundary behaviour ────────────────────────────────────────────────────

#[test]
fn element_at_end_of_window_goes_to_next_window() {
    let mut tester: TriggerTester<i64> =
        TriggerTester::buffering(WindowFn::fixed(Duration::from_millis(10)), Trigger::default())
            .unwrap();
    tester.inject_element(1, 10).unwrap();
    assert_eq!(tester.active_windows().unwrap(), vec![Window::new(10, 20)]);
}

#[test]
fn watermark_exactly_at_end_of_window_fires() {
    let mut tester: TriggerTester<i64> =
        TriggerTester::buffering(WindowFn::fixed(Duration::from_millis(10)), Trigger::default())
            .unwrap();
    tester.inject_element(1, 5).unwrap();
    tester.advance_watermark(10).unwrap();
    assert_eq!(tester.extract_output().len(), 1);
}

#[test]
fn lateness_horizon_is_inclusive() {
    let strategy = WindowingStrategy::new(WindowFn::fixed(Duration::from_millis(10)))
        .with_trigger(Trigger::repeatedly(Trigger::AfterEndOfWindow))
        .with_allowed_lateness(Duration::from_millis(5));
    let mut tester: TriggerTester<i64> = TriggerTester::with_strategy(strategy).unwrap();

    tester.inject_element(1, 5).unwrap();
    tester.advance_watermark(15).unwrap(); // == end + allowed lateness
    tester.extract_output();

    // At the horizon: late but admitted.
    tester.inject_element(2, 3).unwrap();
    assert_eq!(tester.counter(DROPPED_DUE_TO_LATENESS), 0);
    let panes = tester.extract_output();
    assert_eq!(panes.len(), 1);
    assert_eq!(panes[0].value, vec![2]);
    assert_eq!(panes[0].pane.timing, PaneTiming::Late);

    // One tick beyond: dropped.
    tester.advance_watermark(16).unwrap();
    tester.inject_element(3, 3).unwrap();
    assert_eq!(tester.counter(DROPPED_DUE_TO_LATENESS), 1);
    assert!(tester.extract_output().is_empty());
}

#[test]
fn premature_timer_delivery_consumes_but_does_not_fire() {
    let mut tester: TriggerTester<i64> =
        TriggerTester::buffering(WindowFn::fixed(Duration::from_millis(10)), Trigger::default())
            .unwrap();
    tester.inject_element(1, 5).unwrap();
    let eow_ns = weir_core::state::StateNamespace::WindowAndTrigger(Window::new(0, 10), 0);
    assert_eq!(
        tester
            .pending_timer(&eow_ns, weir_core::time::TimeDomain::EventTime)
            .unwrap(),
        Some(10)
    );

    // Delivered by hand before the watermark: the timer is consumed, the
    // evaluation sees no reason to fire.
    tester
        .fire_timer(eow_ns.clone(), 10, weir_core::time::TimeDomain::EventTime)
        .unwrap();
    assert!(tester.extract_output().is_empty());

    // The next element re-arms it; the watermark then fires normally.
    tester.inject_element(2, 7).unwrap();
    tester.advance_watermark(10).unwrap();
    let panes = tester.extract_output();
    assert_eq!(panes.len(), 1);
    assert_eq!(sorted(panes[0].value.clone()), vec![1, 2]);
}

#[test]
fn merging_is_idempotent_once_applied() {
    let mut tester: TriggerTester<i64> =
        TriggerTester::buffering(WindowFn::sessions(Duration::from_millis(10)), Trigger::default())
            .unwrap();
    tester.inject_element(1, 1).unwrap();
    tester.inject_element(2, 9).unwrap();
    let after_merge = tester.active_windows().unwrap();
    assert_eq!(after_merge, vec![Window::new(1, 19)]);

    // Re-running the merge pass changes nothing and emits nothing.
    tester.merge_windows().unwrap();
    tester.merge_windows().unwrap();
    assert_eq!(tester.active_windows().unwrap(), after_merge);
    assert!(tester.extract_output().is_empty());
}
