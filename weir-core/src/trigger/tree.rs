use super::*;

// ── TriggerTree ───────────────────────────────────────────────────────────────

/// A node's leaf parameters, with children referenced by DFS index instead
/// of ownership.
#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    AfterEndOfWindow,
    AfterFirstElementInPane { delay_ms: i64 },
    AfterProcessingTime { delay_ms: i64 },
    AfterSynchronizedProcessingTime,
    AfterCount(u64),
    Repeatedly,
    OrFinally,
    AfterEach,
    AfterFirst,
    AfterAll,
    Scripted(ScriptedTrigger),
}

#[derive(Debug, Clone)]
pub(crate) struct TriggerNode {
    pub kind: NodeKind,
    /// DFS indices of direct children.
    pub children: Vec<usize>,
    /// One past the last index of this node's subtree; `[idx, subtree_end)`
    /// is the contiguous DFS range rooted here.
    pub subtree_end: usize,
}

/// A [`Trigger`] specification flattened into DFS order.
///
/// The flattening is what gives per-node execution state a stable address:
/// finished bits are indexed by DFS position, and per-node cells live under
/// `StateNamespace::WindowAndTrigger(window, index)`.
#[derive(Debug, Clone)]
pub struct TriggerTree {
    nodes: Vec<TriggerNode>,
}

/// DFS index of the root node.
pub const ROOT_TRIGGER: usize = 0;

impl TriggerTree {
    pub fn new(spec: &Trigger) -> Self {
        let mut nodes = Vec::new();
        flatten(spec, &mut nodes);
        Self { nodes }
    }

    /// Number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn node(&self, idx: usize) -> &TriggerNode {
        &self.nodes[idx]
    }

    pub(crate) fn nodes(&self) -> &[TriggerNode] {
        &self.nodes
    }

    /// The state namespace of node `idx` in `window`.
    pub fn namespace(&self, window: &Window, idx: usize) -> StateNamespace {
        StateNamespace::WindowAndTrigger(*window, idx as u32)
    }
}

fn flatten(spec: &Trigger, nodes: &mut Vec<TriggerNode>) -> usize {
    let idx = nodes.len();
    let kind = match spec {
        Trigger::AfterEndOfWindow => NodeKind::AfterEndOfWindow,
        Trigger::AfterFirstElementInPane { delay_ms } => NodeKind::AfterFirstElementInPane {
            delay_ms: *delay_ms,
        },
        Trigger::AfterProcessingTime { delay_ms } => NodeKind::AfterProcessingTime {
            delay_ms: *delay_ms,
        },
        Trigger::AfterSynchronizedProcessingTime => NodeKind::AfterSynchronizedProcessingTime,
        Trigger::AfterCount(n) => NodeKind::AfterCount(*n),
        Trigger::Repeatedly(_) => NodeKind::Repeatedly,
        Trigger::OrFinally { .. } => NodeKind::OrFinally,
        Trigger::AfterEach(_) => NodeKind::AfterEach,
        Trigger::AfterFirst(_) => NodeKind::AfterFirst,
        Trigger::AfterAll(_) => NodeKind::AfterAll,
        Trigger::Scripted(s) => NodeKind::Scripted(s.clone()),
    };
    nodes.push(TriggerNode {
        kind,
        children: Vec::new(),
        subtree_end: 0,
    });

    let mut children = Vec::new();
    for child in spec.children() {
        children.push(flatten(child, nodes));
    }
    let end = nodes.len();
    let node = &mut nodes[idx];
    node.children = children;
    node.subtree_end = end;
    idx
}

// ── FinishedBits ──────────────────────────────────────────────────────────────

/// One finished bit per trigger node, indexed by DFS position. Persisted
/// per (key, window); a set root bit is what marks a window closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishedBits {
    len: usize,
    words: Vec<u64>,
}

impl FinishedBits {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            words: vec![0; len.div_ceil(64)],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, idx: usize) -> bool {
        debug_assert!(idx < self.len);
        self.words[idx / 64] >> (idx % 64) & 1 == 1
    }

    pub fn set(&mut self, idx: usize, value: bool) {
        debug_assert!(idx < self.len);
        if value {
            self.words[idx / 64] |= 1 << (idx % 64);
        } else {
            self.words[idx / 64] &= !(1 << (idx % 64));
        }
    }

    /// Clear every bit in `[from, to)`. Used when a subtree is reset.
    pub fn clear_range(&mut self, from: usize, to: usize) {
        for idx in from..to.min(self.len) {
            self.set(idx, false);
        }
    }

    pub fn any_set(&self) -> bool {
        self.words.iter().any(|w| *w != 0)
    }
}
