use super::*;

type CellKey = (Vec<u8>, StateNamespace, String);

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct BagOverlay {
    cleared: bool,
    appended: Vec<Vec<u8>>,
}

/// In-memory [`StateBackend`].
///
/// Writes are staged per key and only become part of the committed store on
/// [`persist`](StateBackend::persist); reads always see staged writes
/// layered over committed state, so a per-key task observes its own writes
/// immediately while `persist` stays an atomic batch boundary.
///
/// This is the "local mode" backend: no durability, no rescale, ~100ns
/// lookups. It also backs the `TriggerTester`.
#[derive(Debug, Default)]
pub struct InMemoryStateBackend {
    committed_values: HashMap<CellKey, Vec<u8>>,
    committed_bags: HashMap<CellKey, Vec<Vec<u8>>>,
    staged_values: HashMap<CellKey, Option<Vec<u8>>>,
    staged_bags: HashMap<CellKey, BagOverlay>,
    /// Namespaces cleared since the last persist: (key, namespace).
    cleared_namespaces: BTreeSet<(Vec<u8>, StateNamespace)>,
    current_key: Option<Vec<u8>>,
    prefetched_cells: u64,
}

/// Snapshot container for checkpointing. Staged writes are not included;
/// persist before snapshotting.
#[derive(Serialize, Deserialize)]
struct SnapshotData {
    values: HashMap<CellKey, Vec<u8>>,
    bags: HashMap<CellKey, Vec<Vec<u8>>>,
}

impl InMemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(&self) -> Result<&Vec<u8>> {
        self.current_key
            .as_ref()
            .ok_or_else(|| anyhow!("no current key set"))
    }

    fn cell_key(&self, namespace: &StateNamespace, name: &str) -> Result<CellKey> {
        Ok((self.key()?.clone(), namespace.clone(), name.to_string()))
    }

    fn namespace_cleared(&self, key: &[u8], namespace: &StateNamespace) -> bool {
        self.cleared_namespaces
            .contains(&(key.to_vec(), namespace.clone()))
    }

    /// Number of cells hinted through `prefetch` so far. In-memory reads
    /// need no batching; the count lets tests observe that the executor
    /// issues the hints.
    pub fn prefetched_cells(&self) -> u64 {
        self.prefetched_cells
    }

    /// Serialize the committed store. Staged writes are excluded; call
    /// `persist` first.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let data = SnapshotData {
            values: self.committed_values.clone(),
            bags: self.committed_bags.clone(),
        };
        bincode::serialize(&data).context("state snapshot failed")
    }

    /// Replace the committed store from a snapshot, discarding staged
    /// writes.
    pub fn restore(&mut self, data: &[u8]) -> Result<()> {
        let snap: SnapshotData = bincode::deserialize(data).context("state restore failed")?;
        self.committed_values = snap.values;
        self.committed_bags = snap.bags;
        self.staged_values.clear();
        self.staged_bags.clear();
        self.cleared_namespaces.clear();
        Ok(())
    }
}

impl StateBackend for InMemoryStateBackend {
    fn set_current_key(&mut self, key: Vec<u8>) {
        self.current_key = Some(key);
    }

    fn get_value(&self, namespace: &StateNamespace, name: &str) -> Result<Option<Vec<u8>>> {
        let cell = self.cell_key(namespace, name)?;
        if let Some(staged) = self.staged_values.get(&cell) {
            return Ok(staged.clone());
        }
        if self.namespace_cleared(&cell.0, namespace) {
            return Ok(None);
        }
        Ok(self.committed_values.get(&cell).cloned())
    }

    fn put_value(&mut self, namespace: &StateNamespace, name: &str, bytes: Vec<u8>) -> Result<()> {
        let cell = self.cell_key(namespace, name)?;
        self.staged_values.insert(cell, Some(bytes));
        Ok(())
    }

    fn clear_value(&mut self, namespace: &StateNamespace, name: &str) -> Result<()> {
        let cell = self.cell_key(namespace, name)?;
        self.staged_values.insert(cell, None);
        Ok(())
    }

    fn read_bag(&self, namespace: &StateNamespace, name: &str) -> Result<Vec<Vec<u8>>> {
        let cell = self.cell_key(namespace, name)?;
        let overlay = self.staged_bags.get(&cell);
        let base_suppressed = self.namespace_cleared(&cell.0, namespace)
            || overlay.map(|ov| ov.cleared).unwrap_or(false);

        let mut out = Vec::new();
        if !base_suppressed {
            if let Some(base) = self.committed_bags.get(&cell) {
                out.extend(base.iter().cloned());
            }
        }
        if let Some(ov) = overlay {
            out.extend(ov.appended.iter().cloned());
        }
        Ok(out)
    }

    fn append_bag(&mut self, namespace: &StateNamespace, name: &str, bytes: Vec<u8>) -> Result<()> {
        let cell = self.cell_key(namespace, name)?;
        self.staged_bags.entry(cell).or_default().appended.push(bytes);
        Ok(())
    }

    fn clear_bag(&mut self, namespace: &StateNamespace, name: &str) -> Result<()> {
        let cell = self.cell_key(namespace, name)?;
        let overlay = self.staged_bags.entry(cell).or_default();
        overlay.cleared = true;
        overlay.appended.clear();
        Ok(())
    }

    fn clear_namespace(&mut self, namespace: &StateNamespace) -> Result<()> {
        let key = self.key()?.clone();
        self.staged_values
            .retain(|(k, ns, _), _| !(k == &key && ns == namespace));
        self.staged_bags
            .retain(|(k, ns, _), _| !(k == &key && ns == namespace));
        self.cleared_namespaces.insert((key, namespace.clone()));
        Ok(())
    }

    fn namespaces_in_use(&self) -> Result<Vec<StateNamespace>> {
        let key = self.key()?.clone();
        let mut in_use = BTreeSet::new();

        for (k, ns, name) in self.committed_values.keys() {
            if k != &key || self.namespace_cleared(&key, ns) {
                continue;
            }
            let cell = (k.clone(), ns.clone(), name.clone());
            if matches!(self.staged_values.get(&cell), Some(None)) {
                continue;
            }
            in_use.insert(ns.clone());
        }
        for ((k, ns, name), bag) in &self.committed_bags {
            if k != &key || bag.is_empty() || self.namespace_cleared(&key, ns) {
                continue;
            }
            let cell = (k.clone(), ns.clone(), name.clone());
            let cleared = self
                .staged_bags
                .get(&cell)
                .map(|ov| ov.cleared && ov.appended.is_empty())
                .unwrap_or(false);
            if !cleared {
                in_use.insert(ns.clone());
            }
        }
        for ((k, ns, _), staged) in &self.staged_values {
            if k == &key && staged.is_some() {
                in_use.insert(ns.clone());
            }
        }
        for ((k, ns, _), ov) in &self.staged_bags {
            if k == &key && !ov.appended.is_empty() {
                in_use.insert(ns.clone());
            }
        }
        Ok(in_use.into_iter().collect())
    }

    fn prefetch(&mut self, _namespace: &StateNamespace, names: &[&str]) {
        self.prefetched_cells += names.len() as u64;
    }

    fn persist(&mut self) -> Result<()> {
        let key = self.key()?.clone();

        // Namespace tombstones apply first; cells staged after the clear
        // were re-added to the staging maps and apply below.
        let tombstones: Vec<(Vec<u8>, StateNamespace)> = self
            .cleared_namespaces
            .iter()
            .filter(|(k, _)| k == &key)
            .cloned()
            .collect();
        for (k, ns) in &tombstones {
            self.committed_values
                .retain(|(ck, cns, _), _| !(ck == k && cns == ns));
            self.committed_bags
                .retain(|(ck, cns, _), _| !(ck == k && cns == ns));
            self.cleared_namespaces.remove(&(k.clone(), ns.clone()));
        }

        let staged_values: Vec<(CellKey, Option<Vec<u8>>)> = self
            .staged_values
            .iter()
            .filter(|((k, _, _), _)| k == &key)
            .map(|(cell, v)| (cell.clone(), v.clone()))
            .collect();
        for (cell, staged) in staged_values {
            self.staged_values.remove(&cell);
            match staged {
                Some(bytes) => {
                    self.committed_values.insert(cell, bytes);
                }
                None => {
                    self.committed_values.remove(&cell);
                }
            }
        }

        let staged_bags: Vec<(CellKey, BagOverlay)> = self
            .staged_bags
            .iter()
            .filter(|((k, _, _), _)| k == &key)
            .map(|(cell, ov)| (cell.clone(), ov.clone()))
            .collect();
        for (cell, overlay) in staged_bags {
            self.staged_bags.remove(&cell);
            let base = self.committed_bags.entry(cell).or_default();
            if overlay.cleared {
                base.clear();
            }
            base.extend(overlay.appended);
        }
        self.committed_bags.retain(|_, bag| !bag.is_empty());

        Ok(())
    }
}
