//! Headless runner seam
//!
//! The controller hands each run to a [`HeadlessRunner`] and never waits on
//! it. Results come back later as reports; the runner's exit, if it has one,
//! comes back as a [`RunnerExit`].

pub mod process;

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};
use crate::engine::run::RunId;
use crate::engine::tree::StoryId;

pub use process::ProcessRunner;

/// Work handed to the headless runner for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub run_id: RunId,
    pub story_ids: Vec<StoryId>,
    pub include_coverage: bool,
}

/// Fire-and-forget executor for story tests
pub trait HeadlessRunner: Send {
    /// Start executing a run; must return without waiting for results
    fn dispatch(&mut self, request: &DispatchRequest) -> Result<()>;
}

/// The runner process for a run went away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerExit {
    pub run_id: RunId,
    pub success: bool,
    pub code: Option<i32>,
}

/// Runner that only remembers what it was asked to do
///
/// Used when results are fed in by hand: scenarios, tests, and daemons
/// without a runner command.
#[derive(Debug, Clone, Default)]
pub struct RecordingRunner {
    dispatched: Arc<Mutex<Vec<DispatchRequest>>>,
    fail: bool,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner whose every dispatch fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Requests dispatched so far, in order
    pub fn dispatched(&self) -> Vec<DispatchRequest> {
        self.dispatched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl HeadlessRunner for RecordingRunner {
    fn dispatch(&mut self, request: &DispatchRequest) -> Result<()> {
        if self.fail {
            return Err(Error::RunnerStartFailed(format!(
                "refusing to dispatch run {}",
                request.run_id
            )));
        }
        self.dispatched
            .lock()
            .map_err(|_| Error::Internal("dispatch log poisoned".to_string()))?
            .push(request.clone());
        Ok(())
    }
}
