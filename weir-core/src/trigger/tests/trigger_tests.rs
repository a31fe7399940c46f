use super::*;

use crate::metrics::NoopCounters;
use crate::state::InMemoryStateBackend;

fn backend() -> InMemoryStateBackend {
    let mut b = InMemoryStateBackend::new();
    b.set_current_key(b"k".to_vec());
    b
}

fn clock_at(event_time: EventTime) -> ClockState {
    let mut c = ClockState::new();
    c.advance_event_time(event_time);
    c
}

/// Run `f` with a context over the given parts.
fn with_ctx<T>(
    window: &Window,
    backend: &mut InMemoryStateBackend,
    timers: &mut TimerService,
    clock: ClockState,
    finished: &mut FinishedBits,
    f: impl FnOnce(&mut TriggerContext<'_>) -> Result<T>,
) -> T {
    let mut ctx = TriggerContext {
        window,
        state: backend,
        timers,
        clock,
        finished,
        counters: &NoopCounters,
    };
    f(&mut ctx).unwrap()
}

// ── Tree shape ────────────────────────────────────────────────────────────

#[test]
fn test_flattening_is_depth_first() {
    // OrFinally(Repeatedly(Count(2)), EndOfWindow)
    //   0: OrFinally, 1: Repeatedly, 2: Count, 3: EndOfWindow
    let spec = Trigger::repeatedly(Trigger::after_count(2)).or_finally(Trigger::AfterEndOfWindow);
    let tree = TriggerTree::new(&spec);
    assert_eq!(tree.len(), 4);
    assert_eq!(tree.node(0).children, vec![1, 3]);
    assert_eq!(tree.node(1).children, vec![2]);
    assert_eq!(tree.node(1).subtree_end, 3);
    assert_eq!(tree.node(0).subtree_end, 4);
}

#[test]
fn test_finished_bits_roundtrip() {
    let mut bits = FinishedBits::new(70);
    assert!(!bits.any_set());
    bits.set(0, true);
    bits.set(69, true);
    assert!(bits.get(0));
    assert!(bits.get(69));
    assert!(!bits.get(35));

    bits.clear_range(60, 70);
    assert!(!bits.get(69));
    assert!(bits.get(0));
}

// ── Classification ────────────────────────────────────────────────────────

#[test]
fn test_once_classification() {
    assert!(Trigger::AfterEndOfWindow.is_once());
    assert!(Trigger::after_count(3).is_once());
    assert!(!Trigger::repeatedly(Trigger::after_count(3)).is_once());
    assert!(Trigger::after_first(vec![Trigger::AfterEndOfWindow, Trigger::after_count(2)]).is_once());
    assert!(
        !Trigger::after_all(vec![
            Trigger::AfterEndOfWindow,
            Trigger::repeatedly(Trigger::after_count(1)),
        ])
        .is_once()
    );
}

#[test]
fn test_after_each_rejects_merging_windows() {
    assert!(!Trigger::after_each(vec![Trigger::after_count(2)]).supports_merging());
    assert!(Trigger::repeatedly(Trigger::after_count(2)).supports_merging());
    // The incompatibility propagates through composites.
    assert!(!Trigger::repeatedly(Trigger::after_each(vec![Trigger::after_count(2)]))
        .supports_merging());
}

// ── Continuations ─────────────────────────────────────────────────────────

#[test]
fn test_continuation_rules() {
    assert_eq!(
        Trigger::after_count(100).continuation(),
        Trigger::AfterCount(1)
    );
    assert_eq!(
        Trigger::AfterEndOfWindow.continuation(),
        Trigger::AfterEndOfWindow
    );
    assert_eq!(
        Trigger::after_processing_time(Duration::from_secs(5)).continuation(),
        Trigger::AfterSynchronizedProcessingTime
    );
    assert_eq!(
        Trigger::repeatedly(Trigger::after_count(10)).continuation(),
        Trigger::repeatedly(Trigger::AfterCount(1))
    );
}

#[test]
fn test_continuation_of_once_is_once() {
    let triggers = [
        Trigger::AfterEndOfWindow,
        Trigger::after_count(5),
        Trigger::after_processing_time(Duration::from_secs(1)),
        Trigger::after_first(vec![Trigger::after_count(2), Trigger::AfterEndOfWindow]),
    ];
    for t in triggers {
        assert!(t.is_once(), "{t} should be once");
        assert!(t.continuation().is_once(), "{t} continuation should be once");
    }
}

#[test]
fn test_continuation_is_a_fixed_point() {
    let triggers = [
        Trigger::after_count(100),
        Trigger::repeatedly(Trigger::after_processing_time(Duration::from_secs(3))),
        Trigger::after_all(vec![Trigger::after_count(2), Trigger::AfterEndOfWindow])
            .or_finally(Trigger::after_count(1_000)),
    ];
    for t in triggers {
        let once = t.continuation();
        assert_eq!(once.continuation(), once, "{t} continuation not fixed");
    }
}

// ── Firing-guarantee watermarks ───────────────────────────────────────────

#[test]
fn test_watermark_guarantee_composition() {
    let w = Window::new(0, 10);
    assert_eq!(Trigger::AfterEndOfWindow.watermark_that_guarantees_firing(&w), 10);
    assert_eq!(
        Trigger::after_count(3).watermark_that_guarantees_firing(&w),
        EVENT_TIME_MAX
    );
    // AfterFirst takes the min of its children, AfterAll the max.
    assert_eq!(
        Trigger::after_first(vec![Trigger::AfterEndOfWindow, Trigger::after_count(3)])
            .watermark_that_guarantees_firing(&w),
        10
    );
    assert_eq!(
        Trigger::after_all(vec![Trigger::AfterEndOfWindow, Trigger::after_count(3)])
            .watermark_that_guarantees_firing(&w),
        EVENT_TIME_MAX
    );
    assert_eq!(
        Trigger::repeatedly(Trigger::AfterEndOfWindow).watermark_that_guarantees_firing(&w),
        10
    );
}

// ── Executor: leaves ──────────────────────────────────────────────────────

#[test]
fn test_end_of_window_fires_at_watermark() {
    let tree = TriggerTree::new(&Trigger::AfterEndOfWindow);
    let window = Window::new(0, 10);
    let mut backend = backend();
    let mut timers = TimerService::new();
    let mut finished = FinishedBits::new(tree.len());

    with_ctx(&window, &mut backend, &mut timers, clock_at(5), &mut finished, |ctx| {
        tree.on_element(ctx, ROOT_TRIGGER, 5)?;
        assert!(!tree.should_fire(ctx, ROOT_TRIGGER)?);
        Ok(())
    });
    // The element armed an event-time timer at the end of the window.
    assert_eq!(
        timers.pending(&tree.namespace(&window, 0), TimeDomain::EventTime),
        Some(10)
    );

    with_ctx(&window, &mut backend, &mut timers, clock_at(10), &mut finished, |ctx| {
        assert!(tree.should_fire(ctx, ROOT_TRIGGER)?);
        tree.on_fire(ctx, ROOT_TRIGGER)?;
        Ok(())
    });
    assert!(finished.get(ROOT_TRIGGER));
    assert!(timers.is_empty());
}

#[test]
fn test_after_count_fires_at_threshold() {
    let tree = TriggerTree::new(&Trigger::after_count(3));
    let window = Window::new(0, 10);
    let mut backend = backend();
    let mut timers = TimerService::new();
    let mut finished = FinishedBits::new(tree.len());

    for ts in [1, 2] {
        with_ctx(&window, &mut backend, &mut timers, clock_at(0), &mut finished, |ctx| {
            tree.on_element(ctx, ROOT_TRIGGER, ts)?;
            assert!(!tree.should_fire(ctx, ROOT_TRIGGER)?);
            Ok(())
        });
    }
    with_ctx(&window, &mut backend, &mut timers, clock_at(0), &mut finished, |ctx| {
        tree.on_element(ctx, ROOT_TRIGGER, 3)?;
        assert!(tree.should_fire(ctx, ROOT_TRIGGER)?);
        tree.on_fire(ctx, ROOT_TRIGGER)?;
        Ok(())
    });
    assert!(finished.get(ROOT_TRIGGER));
}

#[test]
fn test_after_first_element_in_pane_uses_first_timestamp() {
    let spec = Trigger::after_first_element_in_pane(Duration::from_millis(5));
    let tree = TriggerTree::new(&spec);
    let window = Window::new(0, 100);
    let mut backend = backend();
    let mut timers = TimerService::new();
    let mut finished = FinishedBits::new(tree.len());

    for ts in [20, 7] {
        with_ctx(&window, &mut backend, &mut timers, clock_at(0), &mut finished, |ctx| {
            tree.on_element(ctx, ROOT_TRIGGER, ts)
        });
    }
    // Target stays at first element + delay; the later element is ignored.
    assert_eq!(
        timers.pending(&tree.namespace(&window, 0), TimeDomain::EventTime),
        Some(25)
    );

    with_ctx(&window, &mut backend, &mut timers, clock_at(25), &mut finished, |ctx| {
        assert!(tree.should_fire(ctx, ROOT_TRIGGER)?);
        Ok(())
    });
}

// ── Executor: composites ──────────────────────────────────────────────────

#[test]
fn test_repeatedly_resets_finished_child() {
    let tree = TriggerTree::new(&Trigger::repeatedly(Trigger::after_count(2)));
    let window = Window::new(0, 10);
    let mut backend = backend();
    let mut timers = TimerService::new();
    let mut finished = FinishedBits::new(tree.len());

    for round in 0..3 {
        with_ctx(&window, &mut backend, &mut timers, clock_at(0), &mut finished, |ctx| {
            tree.on_element(ctx, ROOT_TRIGGER, 1)?;
            assert!(!tree.should_fire(ctx, ROOT_TRIGGER)?, "round {round}");
            tree.on_element(ctx, ROOT_TRIGGER, 2)?;
            assert!(tree.should_fire(ctx, ROOT_TRIGGER)?, "round {round}");
            tree.on_fire(ctx, ROOT_TRIGGER)?;
            Ok(())
        });
        // The child finished and was reset: root stays unfinished and the
        // count starts over.
        assert!(!finished.get(ROOT_TRIGGER));
        assert!(!finished.get(1));
    }
}

#[test]
fn test_or_finally_finishes_when_until_fires() {
    let t = ScriptedTrigger::new();
    let u = ScriptedTrigger::new();
    let spec = Trigger::repeatedly(Trigger::Scripted(t.clone()))
        .or_finally(Trigger::Scripted(u.clone()));
    let tree = TriggerTree::new(&spec);
    let window = Window::new(0, 10);
    let mut backend = backend();
    let mut timers = TimerService::new();
    let mut finished = FinishedBits::new(tree.len());

    t.on_next_element(ScriptedResult::Fire);
    u.on_next_element(ScriptedResult::Fire);
    with_ctx(&window, &mut backend, &mut timers, clock_at(0), &mut finished, |ctx| {
        tree.on_element(ctx, ROOT_TRIGGER, 1)?;
        assert!(tree.should_fire(ctx, ROOT_TRIGGER)?);
        tree.on_fire(ctx, ROOT_TRIGGER)?;
        Ok(())
    });
    assert!(finished.get(ROOT_TRIGGER));
    tree.clear_transient();
}

#[test]
fn test_merge_signals_aggregate_any_and_all() {
    let tree = TriggerTree::new(&Trigger::after_all(vec![
        Trigger::after_count(2),
        Trigger::AfterEndOfWindow,
    ]));
    let mut a = FinishedBits::new(tree.len());
    a.set(1, true);
    let b = FinishedBits::new(tree.len());

    let signals = MergeSignals::aggregate(&tree, &[a, b]);
    assert!(signals.finished_in_any[1]);
    assert!(!signals.finished_in_all[1]);
    assert!(!signals.finished_in_any[0]);
}

#[test]
fn test_end_of_window_merge_rearms_timer() {
    let tree = TriggerTree::new(&Trigger::AfterEndOfWindow);
    let merged = Window::new(1, 19);
    let mut backend = backend();
    let mut timers = TimerService::new();
    // Stale timer under a source window's namespace was already deleted by
    // the runner; the merge arms the result window's.
    let sources = [
        FinishedBits::new(tree.len()),
        FinishedBits::new(tree.len()),
    ];
    let signals = MergeSignals::aggregate(&tree, &sources);
    let mut finished = FinishedBits::new(tree.len());
    with_ctx(&merged, &mut backend, &mut timers, clock_at(0), &mut finished, |ctx| {
        tree.on_merge(ctx, &signals, ROOT_TRIGGER)
    });
    assert_eq!(
        timers.pending(&tree.namespace(&merged, 0), TimeDomain::EventTime),
        Some(19)
    );
    assert!(!finished.get(ROOT_TRIGGER));
}

#[test]
fn test_end_of_window_merge_stays_finished_if_any_source_fired() {
    let tree = TriggerTree::new(&Trigger::AfterEndOfWindow);
    let merged = Window::new(1, 19);
    let mut backend = backend();
    let mut timers = TimerService::new();
    let mut fired_source = FinishedBits::new(tree.len());
    fired_source.set(0, true);
    let signals = MergeSignals::aggregate(&tree, &[fired_source, FinishedBits::new(tree.len())]);
    let mut finished = FinishedBits::new(tree.len());
    with_ctx(&merged, &mut backend, &mut timers, clock_at(0), &mut finished, |ctx| {
        tree.on_merge(ctx, &signals, ROOT_TRIGGER)
    });
    assert!(finished.get(ROOT_TRIGGER));
    assert!(timers.is_empty());
}

#[test]
fn test_count_state_merges_by_sum() {
    let tree = TriggerTree::new(&Trigger::after_count(5));
    let (a, b, merged) = (Window::new(1, 11), Window::new(9, 19), Window::new(1, 19));
    let mut backend = backend();
    let mut timers = TimerService::new();

    // Two elements in one source window, two in the other.
    for (w, ts) in [(a, 1), (a, 2), (b, 9), (b, 10)] {
        let mut finished = FinishedBits::new(tree.len());
        with_ctx(&w, &mut backend, &mut timers, clock_at(0), &mut finished, |ctx| {
            tree.on_element(ctx, ROOT_TRIGGER, ts)
        });
    }

    tree.merge_persisted_state(&mut backend, &[a, b], &merged).unwrap();
    let signals = MergeSignals::aggregate(
        &tree,
        &[FinishedBits::new(tree.len()), FinishedBits::new(tree.len())],
    );
    let mut finished = FinishedBits::new(tree.len());
    with_ctx(&merged, &mut backend, &mut timers, clock_at(0), &mut finished, |ctx| {
        tree.on_merge(ctx, &signals, ROOT_TRIGGER)?;
        // 4 so far; the fifth element tips it over.
        assert!(!tree.should_fire(ctx, ROOT_TRIGGER)?);
        tree.on_element(ctx, ROOT_TRIGGER, 12)?;
        assert!(tree.should_fire(ctx, ROOT_TRIGGER)?);
        Ok(())
    });
}
