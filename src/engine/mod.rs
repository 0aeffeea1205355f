//! Test orchestration and result reconciliation
//!
//! Leaves first: the story tree and scope resolver decide what a run covers,
//! the result store and discrepancy detector hold what each environment said,
//! and the run controller ties them together with the coverage aggregator.
//! The watch controller sits beside it and starts full runs on its own.

pub mod controller;
pub mod coverage;
pub mod discrepancy;
pub mod run;
pub mod scope;
pub mod snapshot;
pub mod status;
pub mod store;
pub mod tree;
pub mod watch;

pub use controller::{ControllerEvent, ControllerSettings, ReportOutcome, ResultReport, RunController};
pub use run::{RunId, RunState};
pub use scope::RunScope;
pub use snapshot::{Lifecycle, StatusSnapshot};
pub use status::{Environment, TestStatus};
pub use tree::StoryTree;
pub use watch::WatchController;
