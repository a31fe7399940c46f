use super::*;

/// Identifies a timer: at most one timer exists per `(namespace, domain)`
/// pair, so setting a timer again moves it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerKey {
    pub namespace: StateNamespace,
    pub domain: TimeDomain,
}

/// A matured timer handed back from a drain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerFiring {
    pub namespace: StateNamespace,
    pub domain: TimeDomain,
    pub timestamp: EventTime,
}

/// Manages the timers of a single key.
///
/// Timers are sorted by `(fire_at, insertion)` in a `BTreeMap`, so drains
/// observe nondecreasing timestamps and, within a timestamp, insertion
/// order.
///
/// # Invariant
/// A `(namespace, domain)` pair holds at most one timer; [`set`](Self::set)
/// replaces any earlier registration. A drained timer is removed before its
/// callback runs, so the callback may re-set the same pair without the new
/// timer being swallowed by the ongoing drain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimerService {
    /// Sorted map: (fire_at, seq) -> timer identity.
    timers: BTreeMap<(EventTime, u64), TimerKey>,
    /// Reverse index for replace-on-set and deletion.
    index: BTreeMap<TimerKey, (EventTime, u64)>,
    next_seq: u64,
}

impl TimerService {
    /// Create an empty `TimerService`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or move) the timer for `(namespace, domain)` to fire at
    /// `fire_at`.
    ///
    /// Setting a timestamp already in the past is allowed; the timer
    /// becomes eligible on the next clock advance.
    pub fn set(&mut self, namespace: StateNamespace, fire_at: EventTime, domain: TimeDomain) {
        let key = TimerKey { namespace, domain };
        if let Some(slot) = self.index.remove(&key) {
            self.timers.remove(&slot);
        }
        let slot = (fire_at, self.next_seq);
        self.next_seq += 1;
        self.index.insert(key.clone(), slot);
        self.timers.insert(slot, key);
    }

    /// Cancel the timer for `(namespace, domain)`. No-op if none is set.
    pub fn delete(&mut self, namespace: &StateNamespace, domain: TimeDomain) {
        let key = TimerKey {
            namespace: namespace.clone(),
            domain,
        };
        if let Some(slot) = self.index.remove(&key) {
            self.timers.remove(&slot);
        }
    }

    /// Return the pending fire time for `(namespace, domain)`, if any.
    pub fn pending(&self, namespace: &StateNamespace, domain: TimeDomain) -> Option<EventTime> {
        let key = TimerKey {
            namespace: namespace.clone(),
            domain,
        };
        self.index.get(&key).map(|(ts, _)| *ts)
    }

    /// Drain and return all timers in `domain` with `fire_at <= up_to`, in
    /// nondecreasing `(fire_at, insertion)` order.
    ///
    /// Drained timers are removed before this returns; timers set by the
    /// caller while processing the result fire on a later drain.
    pub fn drain_due(&mut self, domain: TimeDomain, up_to: EventTime) -> Vec<TimerFiring> {
        let due: Vec<(EventTime, u64)> = self
            .timers
            .range(..=(up_to, u64::MAX))
            .filter(|(_, key)| key.domain == domain)
            .map(|(slot, _)| *slot)
            .collect();

        let mut fired = Vec::with_capacity(due.len());
        for slot in due {
            if let Some(key) = self.timers.remove(&slot) {
                self.index.remove(&key);
                fired.push(TimerFiring {
                    namespace: key.namespace,
                    domain: key.domain,
                    timestamp: slot.0,
                });
            }
        }
        fired
    }

    /// Keep only the timers whose key satisfies `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&TimerKey) -> bool) {
        let dropped: Vec<TimerKey> = self
            .index
            .keys()
            .filter(|key| !keep(key))
            .cloned()
            .collect();
        for key in dropped {
            if let Some(slot) = self.index.remove(&key) {
                self.timers.remove(&slot);
            }
        }
    }

    /// Timestamp of the earliest pending timer in `domain`, or `None`.
    pub fn next_deadline(&self, domain: TimeDomain) -> Option<EventTime> {
        self.timers
            .iter()
            .find(|(_, key)| key.domain == domain)
            .map(|((ts, _), _)| *ts)
    }

    /// Total number of pending timers.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Return `true` if no timers are pending.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
