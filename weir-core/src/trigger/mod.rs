use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::metrics::{Counters, COERCED_DUPLICATE_FIRES};
use crate::reduce::CountCombineFn;
use crate::state::{CombiningTag, StateBackend, StateNamespace, ValueTag};
use crate::time::{ClockState, TimeDomain, TimerService, EVENT_TIME_MAX};
use crate::types::EventTime;
use crate::window::Window;

mod executor;
mod spec;
mod tree;

pub use executor::*;
pub use spec::*;
pub use tree::*;

#[cfg(test)]
#[path = "tests/trigger_tests.rs"]
mod tests;
