use super::*;

// ── ReduceFn ──────────────────────────────────────────────────────────────────

/// What a firing read out of a window's buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerOutput<O> {
    pub value: O,
    /// Serialized size of the stored values, accounted when the group is
    /// opened (whether or not the consumer iterates them).
    pub stored_bytes: u64,
    /// Number of stored entries read.
    pub element_reads: u64,
}

/// The content-carrying state of a (key, window): how values accumulate
/// between firings and what a firing emits.
///
/// Implementations are stateless strategies; everything element-dependent
/// lives in the [`StateBackend`] under the window's namespace.
pub trait ReduceFn<V: StreamData>: Send {
    type Output: StreamData;

    /// Fold one value into the window's buffer.
    fn process_value(
        &self,
        backend: &mut dyn StateBackend,
        ns: &StateNamespace,
        value: &V,
    ) -> Result<()>;

    /// Coalesce the buffers of merging windows into the result window.
    fn on_merge(
        &self,
        backend: &mut dyn StateBackend,
        sources: &[StateNamespace],
        result: &StateNamespace,
    ) -> Result<()>;

    /// Read the buffer for emission. Returns `None` when nothing is
    /// buffered. Does not clear; the caller decides per accumulation mode.
    fn on_trigger(
        &self,
        backend: &dyn StateBackend,
        ns: &StateNamespace,
    ) -> Result<Option<TriggerOutput<Self::Output>>>;

    /// Whether the window currently buffers anything.
    fn has_buffered(&self, backend: &dyn StateBackend, ns: &StateNamespace) -> Result<bool>;

    /// Remove all buffered state for the window.
    fn clear(&self, backend: &mut dyn StateBackend, ns: &StateNamespace) -> Result<()>;
}

// ── Buffering ─────────────────────────────────────────────────────────────────

/// Raw grouping: values are appended to a bag and a firing emits them all.
/// Read order is not specified.
pub struct BufferingReduceFn<V> {
    _marker: PhantomData<fn() -> V>,
}

impl<V: StreamData> BufferingReduceFn<V> {
    const BUFFER_TAG: BagTag<V> = BagTag::new("buffered-values");

    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<V: StreamData> Default for BufferingReduceFn<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: StreamData> ReduceFn<V> for BufferingReduceFn<V> {
    type Output = Vec<V>;

    fn process_value(
        &self,
        backend: &mut dyn StateBackend,
        ns: &StateNamespace,
        value: &V,
    ) -> Result<()> {
        Self::BUFFER_TAG.append(backend, ns, value)
    }

    fn on_merge(
        &self,
        backend: &mut dyn StateBackend,
        sources: &[StateNamespace],
        result: &StateNamespace,
    ) -> Result<()> {
        Self::BUFFER_TAG.merge_into(backend, sources, result)
    }

    fn on_trigger(
        &self,
        backend: &dyn StateBackend,
        ns: &StateNamespace,
    ) -> Result<Option<TriggerOutput<Vec<V>>>> {
        let (stored_bytes, element_reads) = Self::BUFFER_TAG.stored_size(backend, ns)?;
        if element_reads == 0 {
            return Ok(None);
        }
        let values = Self::BUFFER_TAG.read_all(backend, ns)?;
        Ok(Some(TriggerOutput {
            value: values,
            stored_bytes,
            element_reads,
        }))
    }

    fn has_buffered(&self, backend: &dyn StateBackend, ns: &StateNamespace) -> Result<bool> {
        Ok(!Self::BUFFER_TAG.is_empty(backend, ns)?)
    }

    fn clear(&self, backend: &mut dyn StateBackend, ns: &StateNamespace) -> Result<()> {
        Self::BUFFER_TAG.clear(backend, ns)
    }
}

// ── Combining ─────────────────────────────────────────────────────────────────

/// Incremental grouping: values fold into an accumulator as they arrive and
/// a firing extracts the output. Only the accumulator is stored.
pub struct CombiningReduceFn<C: CombineFn> {
    combine: C,
}

impl<C: CombineFn> CombiningReduceFn<C> {
    const ACC_TAG: CombiningTag<C> = CombiningTag::new("accumulator");

    pub fn new(combine: C) -> Self {
        Self { combine }
    }
}

impl<C: CombineFn> ReduceFn<C::Input> for CombiningReduceFn<C> {
    type Output = C::Output;

    fn process_value(
        &self,
        backend: &mut dyn StateBackend,
        ns: &StateNamespace,
        value: &C::Input,
    ) -> Result<()> {
        Self::ACC_TAG
            .add(backend, ns, &self.combine, value)
            .context("combine fn add_input failed")
    }

    fn on_merge(
        &self,
        backend: &mut dyn StateBackend,
        sources: &[StateNamespace],
        result: &StateNamespace,
    ) -> Result<()> {
        Self::ACC_TAG
            .merge_into(backend, sources, result, &self.combine)
            .context("combine fn merge_accumulators failed")
    }

    fn on_trigger(
        &self,
        backend: &dyn StateBackend,
        ns: &StateNamespace,
    ) -> Result<Option<TriggerOutput<C::Output>>> {
        let stored_bytes = Self::ACC_TAG.stored_size(backend, ns)?;
        match Self::ACC_TAG.extract(backend, ns, &self.combine)? {
            Some(value) => Ok(Some(TriggerOutput {
                value,
                stored_bytes,
                element_reads: 1,
            })),
            None => Ok(None),
        }
    }

    fn has_buffered(&self, backend: &dyn StateBackend, ns: &StateNamespace) -> Result<bool> {
        Ok(!Self::ACC_TAG.is_empty(backend, ns)?)
    }

    fn clear(&self, backend: &mut dyn StateBackend, ns: &StateNamespace) -> Result<()> {
        Self::ACC_TAG.clear(backend, ns)
    }
}
