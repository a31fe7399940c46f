use std::time::Duration;

use weir_core::metrics::InMemoryCounters;
use weir_core::output::VecSink;
use weir_core::reduce::{CombiningReduceFn, SumCombineFn};
use weir_core::runner::WindowRunner;
use weir_core::state::InMemoryStateBackend;
use weir_core::strategy::WindowingStrategy;
use weir_core::window::WindowFn;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    // (user, ts_ms, value) — two bursts of clicks from u1 separated by more
    // than the session gap, and one from u2.
    let events: Vec<(String, i64, i64)> = vec![
        ("u1".to_string(), 1_000, 1),
        ("u1".to_string(), 3_500, 2),
        ("u2".to_string(), 2_000, 10),
        ("u1".to_string(), 6_000, 3),
        // Gap > 5s: a new session for u1.
        ("u1".to_string(), 20_000, 4),
    ];

    let strategy = WindowingStrategy::new(WindowFn::sessions(Duration::from_secs(5)));
    let mut runner = WindowRunner::new(
        strategy,
        CombiningReduceFn::new(SumCombineFn),
        InMemoryStateBackend::new(),
        VecSink::new(),
        InMemoryCounters::new(),
    )?;

    for (user, ts, value) in events {
        runner.process_element(user, value, ts)?;
    }

    // Drain the input: every session closes.
    runner.advance_input_watermark(i64::MAX)?;

    let mut panes = runner.sink_mut().drain();
    panes.sort_by_key(|(user, wv)| (user.clone(), wv.window.start));
    for (user, wv) in panes {
        println!(
            "user={user} window={} sum={} ts={} timing={:?}",
            wv.window, wv.value, wv.timestamp, wv.pane.timing
        );
    }

    Ok(())
}
