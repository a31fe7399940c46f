use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::reduce::OutputTimeFn;
use crate::trigger::Trigger;
use crate::window::WindowFn;

/// What happens to a pane's buffered state after it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccumulationMode {
    /// State is cleared after every firing; each pane carries only the
    /// elements that arrived since the previous one.
    #[default]
    DiscardingFiredPanes,
}

/// The complete windowing configuration of one grouping.
///
/// Built with chained constructors and validated once, eagerly; an invalid
/// pairing (say, a sequence trigger over merging session windows) fails at
/// construction with a message naming both sides, never on the data path.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowingStrategy {
    pub window_fn: WindowFn,
    pub trigger: Trigger,
    pub allowed_lateness_ms: i64,
    pub accumulation_mode: AccumulationMode,
    pub output_time_fn: OutputTimeFn,
}

impl WindowingStrategy {
    /// Strategy with the default trigger (fire once the watermark passes
    /// the end of the window), no allowed lateness, discarding panes, and
    /// earliest-element output times.
    pub fn new(window_fn: WindowFn) -> Self {
        Self {
            window_fn,
            trigger: Trigger::default(),
            allowed_lateness_ms: 0,
            accumulation_mode: AccumulationMode::default(),
            output_time_fn: OutputTimeFn::default(),
        }
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_allowed_lateness(mut self, lateness: Duration) -> Self {
        self.allowed_lateness_ms = lateness.as_millis() as i64;
        self
    }

    pub fn with_output_time_fn(mut self, output_time_fn: OutputTimeFn) -> Self {
        self.output_time_fn = output_time_fn;
        self
    }

    /// Check the configuration as a whole. Run by the runner at
    /// construction; failures are fatal.
    pub fn validate(&self) -> Result<()> {
        self.window_fn.self_check()?;

        if self.window_fn.is_merging() && !self.trigger.supports_merging() {
            return Err(anyhow!(
                "trigger {} cannot merge windows but window fn {:?} produces merging windows",
                self.trigger,
                self.window_fn
            ));
        }

        validate_composition(&self.trigger)?;

        if self.allowed_lateness_ms < 0 {
            return Err(anyhow!(
                "allowed lateness must be non-negative, got {}ms",
                self.allowed_lateness_ms
            ));
        }
        Ok(())
    }
}

fn validate_composition(trigger: &Trigger) -> Result<()> {
    match trigger {
        Trigger::OrFinally { until, .. } if !until.is_once() => {
            return Err(anyhow!(
                "or_finally requires a trigger that fires at most once, got {until}"
            ));
        }
        Trigger::AfterFirst(ts) | Trigger::AfterAll(ts) => {
            if let Some(t) = ts.iter().find(|t| !t.is_once()) {
                return Err(anyhow!(
                    "{trigger} requires children that fire at most once, got {t}"
                ));
            }
            if ts.len() < 2 {
                return Err(anyhow!("{trigger} needs at least two children"));
            }
        }
        Trigger::AfterEach(ts) if ts.is_empty() => {
            return Err(anyhow!("AfterEach needs at least one child"));
        }
        Trigger::AfterCount(0) => {
            return Err(anyhow!("AfterCount needs a positive element count"));
        }
        _ => {}
    }
    for child in trigger.children() {
        validate_composition(child)?;
    }
    Ok(())
}
