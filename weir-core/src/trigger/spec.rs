use super::*;

// ── Trigger ───────────────────────────────────────────────────────────────────

/// Specification of when a window's pane is emitted.
///
/// A trigger is an immutable tree shared by every key and window; all
/// mutable execution state (finished bits, counts, target instants) lives
/// in the state backend, keyed per (key, window, node). Composition is by
/// value: composites own their children.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Fires once the input watermark reaches the end of the window.
    /// The default trigger.
    AfterEndOfWindow,
    /// Fires once the watermark passes the timestamp of the first element
    /// in the current pane, plus `delay`.
    AfterFirstElementInPane { delay_ms: i64 },
    /// Fires once processing time passes the arrival of the first element
    /// in the current pane by `delay`.
    AfterProcessingTime { delay_ms: i64 },
    /// Fires once the synchronized processing time reaches the first
    /// element's synchronized time.
    AfterSynchronizedProcessingTime,
    /// Fires once the current pane holds at least `n` elements.
    AfterCount(u64),
    /// Fires every time the child fires; resets the child when it
    /// finishes. Never finishes on its own.
    Repeatedly(Box<Trigger>),
    /// Fires whenever `main` fires; finishes (firing one last time) when
    /// `until` fires, or when `main` finishes.
    OrFinally {
        main: Box<Trigger>,
        until: Box<Trigger>,
    },
    /// Runs children in sequence: fires each time the current child fires,
    /// advances when it finishes, finishes after the last child does.
    AfterEach(Vec<Trigger>),
    /// Fires and finishes as soon as any child fires.
    AfterFirst(Vec<Trigger>),
    /// Fires and finishes once every child has fired.
    AfterAll(Vec<Trigger>),
    /// Driven externally through a [`ScriptedTrigger`] handle. Stands in
    /// for a real trigger in tests.
    Scripted(ScriptedTrigger),
}

impl Default for Trigger {
    fn default() -> Self {
        Trigger::AfterEndOfWindow
    }
}

impl Trigger {
    pub fn after_first_element_in_pane(delay: Duration) -> Self {
        Trigger::AfterFirstElementInPane {
            delay_ms: delay.as_millis() as i64,
        }
    }

    pub fn after_processing_time(delay: Duration) -> Self {
        Trigger::AfterProcessingTime {
            delay_ms: delay.as_millis() as i64,
        }
    }

    pub fn after_count(n: u64) -> Self {
        Trigger::AfterCount(n)
    }

    pub fn repeatedly(trigger: Trigger) -> Self {
        Trigger::Repeatedly(Box::new(trigger))
    }

    /// `self.or_finally(until)` fires every time `self` fires and finishes
    /// as soon as `until` fires (firing one last time) or `self` finishes.
    /// `until` must be a trigger that fires at most once; this is checked
    /// at strategy validation.
    pub fn or_finally(self, until: Trigger) -> Self {
        Trigger::OrFinally {
            main: Box::new(self),
            until: Box::new(until),
        }
    }

    pub fn after_each(triggers: Vec<Trigger>) -> Self {
        Trigger::AfterEach(triggers)
    }

    pub fn after_first(triggers: Vec<Trigger>) -> Self {
        Trigger::AfterFirst(triggers)
    }

    pub fn after_all(triggers: Vec<Trigger>) -> Self {
        Trigger::AfterAll(triggers)
    }

    /// Child triggers of a composite, empty for leaves.
    pub fn children(&self) -> Vec<&Trigger> {
        match self {
            Trigger::Repeatedly(t) => vec![t.as_ref()],
            Trigger::OrFinally { main, until } => vec![main.as_ref(), until.as_ref()],
            Trigger::AfterEach(ts) | Trigger::AfterFirst(ts) | Trigger::AfterAll(ts) => {
                ts.iter().collect()
            }
            _ => Vec::new(),
        }
    }

    /// Whether this trigger's contract is to fire at most once.
    pub fn is_once(&self) -> bool {
        match self {
            Trigger::AfterEndOfWindow
            | Trigger::AfterFirstElementInPane { .. }
            | Trigger::AfterProcessingTime { .. }
            | Trigger::AfterSynchronizedProcessingTime
            | Trigger::AfterCount(_)
            | Trigger::Scripted(_) => true,
            Trigger::Repeatedly(_) | Trigger::OrFinally { .. } | Trigger::AfterEach(_) => false,
            Trigger::AfterFirst(ts) | Trigger::AfterAll(ts) => ts.iter().all(Trigger::is_once),
        }
    }

    /// Whether every node in this tree can participate in window merging.
    pub fn supports_merging(&self) -> bool {
        match self {
            // A sequence position has no sound merge: two windows may be at
            // different children.
            Trigger::AfterEach(_) => false,
            other => other.children().iter().all(|t| t.supports_merging()),
        }
    }

    /// The trigger a downstream grouping should use to preserve this
    /// trigger's timing intention rather than its exact firing condition.
    ///
    /// The continuation of a trigger that fires at most once itself fires
    /// at most once, and taking the continuation twice is a fixed point.
    pub fn continuation(&self) -> Trigger {
        match self {
            Trigger::AfterEndOfWindow => Trigger::AfterEndOfWindow,
            Trigger::AfterFirstElementInPane { .. } => self.clone(),
            // Downstream, "some processing time after the element arrived"
            // degrades to "once upstream has caught up".
            Trigger::AfterProcessingTime { .. } => Trigger::AfterSynchronizedProcessingTime,
            Trigger::AfterSynchronizedProcessingTime => Trigger::AfterSynchronizedProcessingTime,
            Trigger::AfterCount(_) => Trigger::AfterCount(1),
            Trigger::Repeatedly(t) => Trigger::repeatedly(t.continuation()),
            Trigger::OrFinally { main, until } => Trigger::OrFinally {
                main: Box::new(main.continuation()),
                until: Box::new(until.continuation()),
            },
            Trigger::AfterEach(ts) => {
                Trigger::AfterEach(ts.iter().map(Trigger::continuation).collect())
            }
            Trigger::AfterFirst(ts) => {
                Trigger::AfterFirst(ts.iter().map(Trigger::continuation).collect())
            }
            Trigger::AfterAll(ts) => {
                Trigger::AfterAll(ts.iter().map(Trigger::continuation).collect())
            }
            Trigger::Scripted(s) => Trigger::Scripted(s.clone()),
        }
    }

    /// The minimum watermark at which this trigger is guaranteed to have
    /// fired at least once for `window`, had there been input. Triggers
    /// that do not fire off the watermark report [`EVENT_TIME_MAX`].
    ///
    /// Used to pick defaults for side-input windows with no elements.
    pub fn watermark_that_guarantees_firing(&self, window: &Window) -> EventTime {
        match self {
            Trigger::AfterEndOfWindow => window.end,
            Trigger::AfterFirstElementInPane { delay_ms } => {
                window.max_timestamp().saturating_add(*delay_ms)
            }
            Trigger::AfterProcessingTime { .. }
            | Trigger::AfterSynchronizedProcessingTime
            | Trigger::AfterCount(_)
            | Trigger::Scripted(_) => EVENT_TIME_MAX,
            Trigger::Repeatedly(t) => t.watermark_that_guarantees_firing(window),
            Trigger::OrFinally { main, until } => main
                .watermark_that_guarantees_firing(window)
                .min(until.watermark_that_guarantees_firing(window)),
            Trigger::AfterEach(ts) => ts
                .first()
                .map(|t| t.watermark_that_guarantees_firing(window))
                .unwrap_or(EVENT_TIME_MAX),
            Trigger::AfterFirst(ts) => ts
                .iter()
                .map(|t| t.watermark_that_guarantees_firing(window))
                .min()
                .unwrap_or(EVENT_TIME_MAX),
            Trigger::AfterAll(ts) => ts
                .iter()
                .map(|t| t.watermark_that_guarantees_firing(window))
                .max()
                .unwrap_or(EVENT_TIME_MAX),
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::AfterEndOfWindow => write!(f, "AfterEndOfWindow"),
            Trigger::AfterFirstElementInPane { delay_ms } => {
                write!(f, "AfterFirstElementInPane(+{delay_ms}ms)")
            }
            Trigger::AfterProcessingTime { delay_ms } => {
                write!(f, "AfterProcessingTime(+{delay_ms}ms)")
            }
            Trigger::AfterSynchronizedProcessingTime => {
                write!(f, "AfterSynchronizedProcessingTime")
            }
            Trigger::AfterCount(n) => write!(f, "AfterCount({n})"),
            Trigger::Repeatedly(t) => write!(f, "Repeatedly({t})"),
            Trigger::OrFinally { main, until } => write!(f, "{main}.OrFinally({until})"),
            Trigger::AfterEach(ts) => write_composite(f, "AfterEach", ts),
            Trigger::AfterFirst(ts) => write_composite(f, "AfterFirst", ts),
            Trigger::AfterAll(ts) => write_composite(f, "AfterAll", ts),
            Trigger::Scripted(_) => write!(f, "Scripted"),
        }
    }
}

fn write_composite(
    f: &mut std::fmt::Formatter<'_>,
    name: &str,
    children: &[Trigger],
) -> std::fmt::Result {
    write!(f, "{name}(")?;
    for (i, t) in children.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{t}")?;
    }
    write!(f, ")")
}

// ── ScriptedTrigger ───────────────────────────────────────────────────────────

/// A decision a scripted trigger returns for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedResult {
    /// Keep going.
    Continue,
    /// Ready to fire, not finished.
    Fire,
    /// Ready to fire and finished afterwards.
    FireAndFinish,
    /// Finished without firing.
    Finish,
}

#[derive(Debug, Default)]
struct Script {
    on_element: VecDeque<ScriptedResult>,
    on_merge: VecDeque<ScriptedResult>,
    pending_fire: bool,
}

/// Shared handle driving a [`Trigger::Scripted`] node from a test.
///
/// Decisions are queued per event kind and consumed one per delivery; an
/// empty queue yields [`ScriptedResult::Continue`]. Like the mocks it
/// replaces, one handle is shared across every key and window its node
/// executes in; finished bits still live per (key, window).
#[derive(Clone, Default)]
pub struct ScriptedTrigger {
    inner: Arc<Mutex<Script>>,
}

impl ScriptedTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the decision the next `on_element` delivery returns.
    pub fn on_next_element(&self, result: ScriptedResult) {
        self.lock().on_element.push_back(result);
    }

    /// Queue the decision the next `on_merge` delivery returns.
    pub fn on_next_merge(&self, result: ScriptedResult) {
        self.lock().on_merge.push_back(result);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        // Lock is local to the handle; poisoning only happens if a test
        // already panicked.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn next_element_result(&self) -> ScriptedResult {
        self.lock()
            .on_element
            .pop_front()
            .unwrap_or(ScriptedResult::Continue)
    }

    pub(crate) fn next_merge_result(&self) -> ScriptedResult {
        self.lock()
            .on_merge
            .pop_front()
            .unwrap_or(ScriptedResult::Continue)
    }

    pub(crate) fn set_pending_fire(&self) {
        self.lock().pending_fire = true;
    }

    pub(crate) fn pending_fire(&self) -> bool {
        self.lock().pending_fire
    }

    pub(crate) fn clear_pending_fire(&self) {
        self.lock().pending_fire = false;
    }
}

impl PartialEq for ScriptedTrigger {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ScriptedTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ScriptedTrigger")
    }
}
