use std::marker::PhantomData;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::state::{BagTag, CombiningTag, StateBackend, StateNamespace, ValueTag};
use crate::time::ClockState;
use crate::types::{EventTime, StreamData};
use crate::window::Window;

mod combine;
mod hold;
mod pane;
mod reduce_fn;

pub use combine::*;
pub use hold::*;
pub use pane::*;
pub use reduce_fn::*;

#[cfg(test)]
#[path = "tests/reduce_tests.rs"]
mod tests;
