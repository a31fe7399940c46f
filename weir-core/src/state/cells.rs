use super::*;

use crate::reduce::CombineFn;

// ── Cell tags ─────────────────────────────────────────────────────────────────
//
// Descriptor pattern: a tag names a cell and knows its type, but holds no
// reference to the backend, so handles can be created once (often as
// constants) and used against any backend without borrow conflicts.

/// A cell holding a single value of type `T`.
pub struct ValueTag<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T: StreamData> ValueTag<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn read(&self, backend: &dyn StateBackend, ns: &StateNamespace) -> Result<Option<T>> {
        match backend.get_value(ns, self.name)? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes)
                    .with_context(|| format!("decoding value cell {:?}/{}", ns, self.name))?,
            )),
            None => Ok(None),
        }
    }

    pub fn write(&self, backend: &mut dyn StateBackend, ns: &StateNamespace, value: &T) -> Result<()> {
        backend.put_value(ns, self.name, bincode::serialize(value)?)
    }

    pub fn clear(&self, backend: &mut dyn StateBackend, ns: &StateNamespace) -> Result<()> {
        backend.clear_value(ns, self.name)
    }
}

/// A cell holding an unordered multi-set of values with O(1) append.
/// Read order is not specified.
pub struct BagTag<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T: StreamData> BagTag<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn append(&self, backend: &mut dyn StateBackend, ns: &StateNamespace, value: &T) -> Result<()> {
        backend.append_bag(ns, self.name, bincode::serialize(value)?)
    }

    pub fn read_all(&self, backend: &dyn StateBackend, ns: &StateNamespace) -> Result<Vec<T>> {
        let raw = backend.read_bag(ns, self.name)?;
        let mut out = Vec::with_capacity(raw.len());
        for bytes in raw {
            out.push(
                bincode::deserialize(&bytes)
                    .with_context(|| format!("decoding bag cell {:?}/{}", ns, self.name))?,
            );
        }
        Ok(out)
    }

    /// Serialized size plus element count, without deserializing. Used for
    /// read accounting at group open.
    pub fn stored_size(&self, backend: &dyn StateBackend, ns: &StateNamespace) -> Result<(u64, u64)> {
        let raw = backend.read_bag(ns, self.name)?;
        let bytes: u64 = raw.iter().map(|b| b.len() as u64).sum();
        Ok((bytes, raw.len() as u64))
    }

    pub fn is_empty(&self, backend: &dyn StateBackend, ns: &StateNamespace) -> Result<bool> {
        Ok(backend.read_bag(ns, self.name)?.is_empty())
    }

    pub fn clear(&self, backend: &mut dyn StateBackend, ns: &StateNamespace) -> Result<()> {
        backend.clear_bag(ns, self.name)
    }

    /// Merge policy: concatenate the source bags into `result` and empty
    /// the sources. Elements stay opaque, so no round trip through `T`.
    pub fn merge_into(
        &self,
        backend: &mut dyn StateBackend,
        sources: &[StateNamespace],
        result: &StateNamespace,
    ) -> Result<()> {
        for source in sources {
            if source == result {
                continue;
            }
            for bytes in backend.read_bag(source, self.name)? {
                backend.append_bag(result, self.name, bytes)?;
            }
            backend.clear_bag(source, self.name)?;
        }
        Ok(())
    }
}

/// A cell holding a lazily-created accumulator driven by a [`CombineFn`].
pub struct CombiningTag<C: CombineFn> {
    name: &'static str,
    _marker: PhantomData<fn() -> C>,
}

impl<C: CombineFn> CombiningTag<C> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn read_accumulator(
        &self,
        backend: &dyn StateBackend,
        ns: &StateNamespace,
    ) -> Result<Option<C::Acc>> {
        match backend.get_value(ns, self.name)? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes)
                    .with_context(|| format!("decoding accumulator {:?}/{}", ns, self.name))?,
            )),
            None => Ok(None),
        }
    }

    pub fn add(
        &self,
        backend: &mut dyn StateBackend,
        ns: &StateNamespace,
        combine: &C,
        input: &C::Input,
    ) -> Result<()> {
        let mut acc = match self.read_accumulator(backend, ns)? {
            Some(acc) => acc,
            None => combine.create_accumulator(),
        };
        combine.add_input(&mut acc, input);
        backend.put_value(ns, self.name, bincode::serialize(&acc)?)
    }

    /// Extract the output without clearing the accumulator. Returns `None`
    /// if nothing has been accumulated.
    pub fn extract(
        &self,
        backend: &dyn StateBackend,
        ns: &StateNamespace,
        combine: &C,
    ) -> Result<Option<C::Output>> {
        Ok(self
            .read_accumulator(backend, ns)?
            .map(|acc| combine.extract_output(acc)))
    }

    /// Serialized size of the stored accumulator, or 0 when absent.
    pub fn stored_size(&self, backend: &dyn StateBackend, ns: &StateNamespace) -> Result<u64> {
        Ok(backend
            .get_value(ns, self.name)?
            .map(|b| b.len() as u64)
            .unwrap_or(0))
    }

    pub fn is_empty(&self, backend: &dyn StateBackend, ns: &StateNamespace) -> Result<bool> {
        Ok(backend.get_value(ns, self.name)?.is_none())
    }

    pub fn clear(&self, backend: &mut dyn StateBackend, ns: &StateNamespace) -> Result<()> {
        backend.clear_value(ns, self.name)
    }

    /// Merge policy: fold the source accumulators into `result` via
    /// [`CombineFn::merge_accumulators`] and empty the sources.
    pub fn merge_into(
        &self,
        backend: &mut dyn StateBackend,
        sources: &[StateNamespace],
        result: &StateNamespace,
        combine: &C,
    ) -> Result<()> {
        let mut merged: Option<C::Acc> = self.read_accumulator(backend, result)?;
        for source in sources {
            if source == result {
                continue;
            }
            if let Some(acc) = self.read_accumulator(backend, source)? {
                merged = Some(match merged {
                    Some(mut into) => {
                        combine.merge_accumulators(&mut into, acc);
                        into
                    }
                    None => acc,
                });
                backend.clear_value(source, self.name)?;
            }
        }
        if let Some(acc) = merged {
            backend.put_value(result, self.name, bincode::serialize(&acc)?)?;
        }
        Ok(())
    }
}
