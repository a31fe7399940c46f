//! # Weir Core
//!
//! Per-key windowing and trigger execution for event-time stream grouping.
//!
//! A weir holds water back and releases it in controlled amounts; this crate
//! does the same for keyed, timestamped elements. Elements are assigned to
//! event-time windows, overlapping session windows are merged, a trigger tree
//! decides when each window releases a pane of grouped values, and a
//! watermark hold keeps the output watermark honest until the pane is out.
//!
//! The crate is a library, not a process. The embedding runtime supplies a
//! [`state::StateBackend`], an [`output::OutputSink`], and a
//! [`metrics::Counters`] implementation; the core drives everything else
//! through [`runner::WindowRunner`]:
//!
//! - [`types`] — [`EventTime`](types::EventTime) and the
//!   [`StreamData`](types::StreamData) trait bound.
//! - [`window`] — [`Window`](window::Window), the
//!   [`WindowFn`](window::WindowFn) assigners (fixed, sliding, sessions,
//!   global), and the per-key [`ActiveWindowSet`](window::ActiveWindowSet).
//! - [`trigger`] — the [`Trigger`](trigger::Trigger) tree, finished-bit
//!   bookkeeping, and the event-driven executor.
//! - [`state`] — namespaced per-key state cells and backends, plus the
//!   process-wide [`StateCache`](state::StateCache).
//! - [`time`] — [`TimerService`](time::TimerService) and time domains.
//! - [`reduce`] — buffering/combining [`ReduceFn`](reduce::ReduceFn)s,
//!   watermark holds, and pane metadata.
//! - [`runner`] — [`WindowRunner`](runner::WindowRunner): the per-key state
//!   machine and the crate's entry points.
//! - [`tester`] — [`TriggerTester`](tester::TriggerTester): a single-key
//!   harness that end-to-end windowing tests are built on.

pub mod metrics;
pub mod output;
pub mod reduce;
pub mod runner;
pub mod state;
pub mod strategy;
pub mod tester;
pub mod time;
pub mod trigger;
pub mod types;
pub mod window;
