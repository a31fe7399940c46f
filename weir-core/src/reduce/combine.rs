use super::*;

// ── CombineFn ─────────────────────────────────────────────────────────────────

/// An associative, incremental aggregation: inputs fold into an
/// accumulator, accumulators merge when windows do, and the output is
/// extracted when a pane fires. Only `O(1)` state is kept per window
/// instead of `O(n)`.
pub trait CombineFn: Send + Sync + 'static {
    type Input: StreamData;
    type Acc: StreamData;
    type Output: StreamData;

    /// Create a fresh accumulator.
    fn create_accumulator(&self) -> Self::Acc;
    /// Fold one input into the accumulator.
    fn add_input(&self, acc: &mut Self::Acc, input: &Self::Input);
    /// Merge another accumulator into `acc` (window merging).
    fn merge_accumulators(&self, acc: &mut Self::Acc, other: Self::Acc);
    /// Convert the final accumulator into the output.
    fn extract_output(&self, acc: Self::Acc) -> Self::Output;
}

/// Sums `i64` inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SumCombineFn;

impl CombineFn for SumCombineFn {
    type Input = i64;
    type Acc = i64;
    type Output = i64;

    fn create_accumulator(&self) -> i64 {
        0
    }

    fn add_input(&self, acc: &mut i64, input: &i64) {
        *acc += input;
    }

    fn merge_accumulators(&self, acc: &mut i64, other: i64) {
        *acc += other;
    }

    fn extract_output(&self, acc: i64) -> i64 {
        acc
    }
}

/// Minimum of `i64` inputs; identity is `i64::MAX`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinCombineFn;

impl CombineFn for MinCombineFn {
    type Input = i64;
    type Acc = i64;
    type Output = i64;

    fn create_accumulator(&self) -> i64 {
        i64::MAX
    }

    fn add_input(&self, acc: &mut i64, input: &i64) {
        *acc = (*acc).min(*input);
    }

    fn merge_accumulators(&self, acc: &mut i64, other: i64) {
        *acc = (*acc).min(other);
    }

    fn extract_output(&self, acc: i64) -> i64 {
        acc
    }
}

/// Counts inputs of any type. Accumulators merge by sum, which also makes
/// this the monotonic counter behind element-count triggers.
#[derive(Debug)]
pub struct CountCombineFn<T>(PhantomData<fn() -> T>);

impl<T> CountCombineFn<T> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for CountCombineFn<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: StreamData> CombineFn for CountCombineFn<T> {
    type Input = T;
    type Acc = u64;
    type Output = u64;

    fn create_accumulator(&self) -> u64 {
        0
    }

    fn add_input(&self, acc: &mut u64, _input: &T) {
        *acc += 1;
    }

    fn merge_accumulators(&self, acc: &mut u64, other: u64) {
        *acc += other;
    }

    fn extract_output(&self, acc: u64) -> u64 {
        acc
    }
}
