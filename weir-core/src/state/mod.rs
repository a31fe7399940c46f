use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::StreamData;
use crate::window::Window;

mod cache;
mod cells;
mod memory;

pub use cache::*;
pub use cells::*;
pub use memory::*;

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;

/// Scope of a state cell within one key.
///
/// Every cell address is `(namespace, name)`: the window (or trigger node)
/// the data belongs to plus a short static name. Trigger nodes are
/// identified by their DFS index in the trigger tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StateNamespace {
    Global,
    Window(Window),
    WindowAndTrigger(Window, u32),
}

impl StateNamespace {
    /// The window this namespace is scoped to, if any.
    pub fn window(&self) -> Option<&Window> {
        match self {
            StateNamespace::Global => None,
            StateNamespace::Window(w) | StateNamespace::WindowAndTrigger(w, _) => Some(w),
        }
    }
}

/// Per-key namespaced state store, supplied by the embedding runtime.
///
/// Cells come in two raw shapes — single values and bags (unordered
/// multi-sets with O(1) append) — both holding opaque bytes. Typed access
/// and merge policies live in the cell tags ([`ValueTag`], [`BagTag`],
/// [`CombiningTag`]), which serialize at the boundary.
///
/// # Contract
/// - All operations apply to the key most recently given to
///   [`set_current_key`](Self::set_current_key).
/// - Writes are staged and must be visible to subsequent reads of the same
///   key; [`persist`](Self::persist) flushes all staged writes atomically.
/// - Operations on different addresses are independent; per-address
///   ordering within a key is preserved.
/// - The backend need not be thread-safe per key: all operations for a key
///   run on one logical task.
pub trait StateBackend: Send {
    fn set_current_key(&mut self, key: Vec<u8>);

    fn get_value(&self, namespace: &StateNamespace, name: &str) -> Result<Option<Vec<u8>>>;
    fn put_value(&mut self, namespace: &StateNamespace, name: &str, bytes: Vec<u8>) -> Result<()>;
    fn clear_value(&mut self, namespace: &StateNamespace, name: &str) -> Result<()>;

    fn read_bag(&self, namespace: &StateNamespace, name: &str) -> Result<Vec<Vec<u8>>>;
    fn append_bag(&mut self, namespace: &StateNamespace, name: &str, bytes: Vec<u8>) -> Result<()>;
    fn clear_bag(&mut self, namespace: &StateNamespace, name: &str) -> Result<()>;

    /// Remove every cell under `namespace` for the current key.
    fn clear_namespace(&mut self, namespace: &StateNamespace) -> Result<()>;

    /// Namespaces that hold at least one cell for the current key.
    fn namespaces_in_use(&self) -> Result<Vec<StateNamespace>>;

    /// Hint that the given cells are about to be read, so a remote backend
    /// can batch the fetches. Correctness must not depend on it.
    fn prefetch(&mut self, _namespace: &StateNamespace, _names: &[&str]) {}

    /// Atomically flush all staged writes for the current key.
    fn persist(&mut self) -> Result<()>;
}
