use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::time::{END_OF_GLOBAL_WINDOW, EVENT_TIME_MIN};
use crate::types::EventTime;

mod active_set;
mod assigners;
mod primitives;

pub use active_set::*;
pub use assigners::*;
pub use primitives::*;

#[cfg(test)]
#[path = "tests/window_tests.rs"]
mod tests;
