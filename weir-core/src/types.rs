use serde::{Deserialize, Serialize};

/// Event time in milliseconds since epoch.
pub type EventTime = i64;

/// Trait bound for keys and values that flow through the core.
/// All user data types must satisfy this.
pub trait StreamData: Send + Clone + Serialize + for<'de> Deserialize<'de> + 'static {}

// Blanket implementation: any type satisfying the bounds is StreamData.
impl<T> StreamData for T where T: Send + Clone + Serialize + for<'de> Deserialize<'de> + 'static {}

#[cfg(test)]
#[path = "tests/types_tests.rs"]
mod tests;
