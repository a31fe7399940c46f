use super::*;

use std::sync::Mutex;

struct CacheEntry<S> {
    /// `None` while the key is leased out to a worker.
    backend: Option<S>,
    weight: u64,
    last_used: u64,
}

struct CacheInner<S> {
    entries: HashMap<Vec<u8>, CacheEntry<S>, ahash::RandomState>,
    total_weight: u64,
    tick: u64,
}

/// Process-wide cache of per-key state, shared across worker threads.
///
/// Lifecycle: [`init`](Self::init) → [`lease`](Self::lease) →
/// [`release`](Self::release) → [`teardown`](Self::teardown). A key can be
/// leased by at most one worker at a time; leasing a key that is already
/// out is an error, which is what enforces per-key serialisability across
/// threads.
///
/// Eviction is weighted LRU: entry weight = key size + the value weight
/// reported at release. Leased entries are never evicted.
pub struct StateCache<S> {
    inner: Mutex<CacheInner<S>>,
    max_weight: u64,
}

impl<S> StateCache<S> {
    /// Create a cache that holds at most `max_weight` bytes of entries.
    pub fn init(max_weight: u64) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::default(),
                total_weight: 0,
                tick: 0,
            }),
            max_weight,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, CacheInner<S>>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("state cache lock poisoned"))
    }

    /// Take exclusive ownership of the cached state for `key`.
    ///
    /// Returns `Ok(None)` when the key is not cached (the caller builds a
    /// fresh backend and hands it back on release) and an error when the
    /// key is already leased.
    pub fn lease(&self, key: &[u8]) -> Result<Option<S>> {
        let mut inner = self.lock()?;
        inner.tick += 1;
        let tick = inner.tick;
        match inner.entries.get_mut(key) {
            Some(entry) => {
                let backend = entry
                    .backend
                    .take()
                    .ok_or_else(|| anyhow!("key {key:02x?} is already leased"))?;
                entry.last_used = tick;
                Ok(Some(backend))
            }
            None => Ok(None),
        }
    }

    /// Return a leased (or freshly built) backend to the cache.
    ///
    /// `value_weight` is the caller's estimate of the state's size; the
    /// entry is charged `key.len() + value_weight`. Unleased
    /// least-recently-used entries are evicted until the cache fits its
    /// budget again.
    pub fn release(&self, key: &[u8], backend: S, value_weight: u64) -> Result<()> {
        let mut inner = self.lock()?;
        inner.tick += 1;
        let tick = inner.tick;
        let weight = key.len() as u64 + value_weight;

        if let Some(entry) = inner.entries.get_mut(key) {
            if entry.backend.is_some() {
                return Err(anyhow!("key {key:02x?} released twice"));
            }
            let old_weight = entry.weight;
            entry.backend = Some(backend);
            entry.weight = weight;
            entry.last_used = tick;
            inner.total_weight = inner.total_weight - old_weight + weight;
        } else {
            inner.entries.insert(
                key.to_vec(),
                CacheEntry {
                    backend: Some(backend),
                    weight,
                    last_used: tick,
                },
            );
            inner.total_weight += weight;
        }

        while inner.total_weight > self.max_weight {
            let victim = inner
                .entries
                .iter()
                .filter(|(_, e)| e.backend.is_some())
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match victim {
                Some(k) => {
                    if let Some(entry) = inner.entries.remove(&k) {
                        inner.total_weight -= entry.weight;
                    }
                }
                None => break, // everything remaining is leased
            }
        }
        Ok(())
    }

    /// Drop the cached entry for `key`, if present and not leased.
    pub fn invalidate(&self, key: &[u8]) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(entry) = inner.entries.get(key) {
            if entry.backend.is_none() {
                return Err(anyhow!("cannot invalidate leased key {key:02x?}"));
            }
        }
        if let Some(entry) = inner.entries.remove(key) {
            inner.total_weight -= entry.weight;
        }
        Ok(())
    }

    /// Drop every unleased entry.
    pub fn teardown(&self) -> Result<()> {
        let mut inner = self.lock()?;
        let keep: Vec<Vec<u8>> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.backend.is_none())
            .map(|(k, _)| k.clone())
            .collect();
        let mut kept_weight = 0;
        inner.entries.retain(|k, e| {
            if keep.contains(k) {
                kept_weight += e.weight;
                true
            } else {
                false
            }
        });
        inner.total_weight = kept_weight;
        Ok(())
    }

    /// Number of cached keys, leased entries included.
    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current total weight of cached entries.
    pub fn weight(&self) -> u64 {
        self.lock().map(|inner| inner.total_weight).unwrap_or(0)
    }
}
