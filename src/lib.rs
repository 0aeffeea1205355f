//! storyrun - component test orchestration and result reconciliation
//!
//! Runs story tests in a headless runner, listens for the same stories'
//! results from the browser, and reconciles both into one status tree with
//! discrepancy reporting, scoped reruns, watch mode and coverage tracking.

pub mod cli;
pub mod commands;
pub mod common;
pub mod daemon;
pub mod engine;
pub mod ipc;
pub mod runner;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use engine::{RunController, RunScope, StoryTree};
pub use ipc::protocol::Command;
