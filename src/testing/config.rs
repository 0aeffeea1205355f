//! Test scenario configuration types
//!
//! Defines the data structures for deserializing YAML test scenarios.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::engine::coverage::{CoverageData, FileCoverage};
use crate::engine::run::RunState;
use crate::engine::snapshot::Lifecycle;
use crate::engine::status::{Environment, TestStatus};

/// A complete test scenario loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct TestScenario {
    /// Name of the test scenario
    pub name: String,
    /// Optional description of what the test verifies
    pub description: Option<String>,
    /// Timing and runner overrides
    #[serde(default)]
    pub settings: ScenarioSettings,
    /// Storybook index to load, relative to the scenario file
    pub index: Option<PathBuf>,
    /// Stories defined inline (used when no index is given)
    #[serde(default)]
    pub stories: Vec<StoryDef>,
    /// The sequence of test steps to execute
    pub steps: Vec<TestStep>,
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct ScenarioSettings {
    pub browser_grace_ms: u64,
    pub completed_dwell_ms: u64,
    pub debounce_ms: u64,
    /// Coverage flag for watch runs before any run started
    pub default_coverage: bool,
    /// Every dispatch to the headless runner fails
    pub runner_fails: bool,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            browser_grace_ms: 2000,
            completed_dwell_ms: 5000,
            debounce_ms: 500,
            default_coverage: false,
            runner_fails: false,
        }
    }
}

/// One story of an inline tree
#[derive(Deserialize, Debug)]
pub struct StoryDef {
    pub id: String,
    /// Slash-separated title; the last segment is the component
    pub title: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_testable")]
    pub testable: bool,
}

fn default_testable() -> bool {
    true
}

/// A single test step in the execution flow
#[derive(Deserialize, Debug)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Start a run
    Start {
        /// `all`, `story:<id>`, `component:<id>` or `group:<id>`
        #[serde(default = "default_scope")]
        scope: String,
        #[serde(default)]
        coverage: bool,
        /// Expected error code when the run must be refused
        expect_error: Option<String>,
    },
    /// Report a result for one or more stories
    Report {
        /// Run id; defaults to the last run started
        run: Option<u64>,
        story: Option<String>,
        #[serde(default)]
        stories: Vec<String>,
        #[serde(default = "default_env")]
        env: Environment,
        status: TestStatus,
        coverage: Option<CoverageData>,
        /// Expected outcome: accepted, stale, regressed or unknown_story
        expect: Option<String>,
    },
    /// Report coverage for a run on its own
    Coverage {
        run: Option<u64>,
        files: BTreeMap<String, FileCoverage>,
    },
    /// The headless runner process for a run exited
    RunnerExit {
        run: Option<u64>,
        #[serde(default)]
        success: bool,
    },
    /// Source change notifications
    Change {
        #[serde(default = "default_count")]
        count: usize,
        /// Time between consecutive notifications
        #[serde(default)]
        spacing_ms: u64,
    },
    /// Toggle watch mode
    Watch { enabled: bool },
    /// Move the clock forward, firing timers on the way
    Advance { ms: u64 },
    /// Assert on the current state
    Expect(Expectation),
}

fn default_scope() -> String {
    "all".to_string()
}

fn default_env() -> Environment {
    Environment::Cli
}

fn default_count() -> usize {
    1
}

/// Assertions against the controller; unset fields are not checked
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct Expectation {
    pub lifecycle: Option<Lifecycle>,
    pub counts: Option<CountsExpectation>,
    /// Derived status per story
    pub status: BTreeMap<String, TestStatus>,
    /// Exact set of failing stories (the error filter)
    pub failing: Option<Vec<String>>,
    pub discrepancies: Option<Vec<DiscrepancyExpectation>>,
    /// Persisted overall coverage
    pub coverage_overall: Option<f64>,
    /// No coverage has been persisted yet
    pub coverage_absent: bool,
    /// Run that produced the persisted coverage
    pub coverage_run: Option<u64>,
    /// Number of runs started so far, by steps or by watch mode
    pub runs_started: Option<usize>,
    pub description: Option<String>,
    pub run_state: Option<RunStateExpectation>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct CountsExpectation {
    pub pending: Option<usize>,
    pub running: Option<usize>,
    pub passed: Option<usize>,
    pub failed: Option<usize>,
    pub errored: Option<usize>,
}

#[derive(Deserialize, Debug)]
pub struct DiscrepancyExpectation {
    pub story: String,
    pub message_contains: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct RunStateExpectation {
    pub run: u64,
    pub state: RunState,
}
