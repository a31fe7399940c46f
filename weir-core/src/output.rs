use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::reduce::PaneInfo;
use crate::types::EventTime;
use crate::window::Window;

/// One emitted pane: the grouped value plus the event-time coordinates it
/// was produced at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowedValue<T> {
    pub value: T,
    pub timestamp: EventTime,
    pub window: Window,
    pub pane: PaneInfo,
}

/// Destination for emitted panes, supplied by the embedding runtime.
///
/// The core appends panes for one key in strictly increasing pane-index
/// order; durability and downstream flushing are the sink's concern.
pub trait OutputSink<K, T>: Send {
    fn emit(&mut self, key: &K, value: WindowedValue<T>) -> Result<()>;
}

/// Collects emitted panes in memory. Used by the tester and in tests.
#[derive(Debug)]
pub struct VecSink<K, T> {
    emitted: Vec<(K, WindowedValue<T>)>,
}

impl<K, T> VecSink<K, T> {
    pub fn new() -> Self {
        Self {
            emitted: Vec::new(),
        }
    }

    /// Remove and return everything emitted so far.
    pub fn drain(&mut self) -> Vec<(K, WindowedValue<T>)> {
        std::mem::take(&mut self.emitted)
    }

    pub fn emitted(&self) -> &[(K, WindowedValue<T>)] {
        &self.emitted
    }

    pub fn len(&self) -> usize {
        self.emitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emitted.is_empty()
    }
}

impl<K, T> Default for VecSink<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Send, T: Send> OutputSink<K, T> for VecSink<K, T> {
    fn emit(&mut self, key: &K, value: WindowedValue<T>) -> Result<()> {
        self.emitted.push((key.clone(), value));
        Ok(())
    }
}
