//! Scenario tests
//!
//! Reads YAML scenarios and plays them against an in-process run controller.
//! Reports, runner exits and source changes are steps; time only moves when a
//! scenario says so.

mod config;
mod runner;

pub use config::*;
pub use runner::{run_scenario, run_scenario_str, TestResult};
