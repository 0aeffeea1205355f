//! Scenario runner
//!
//! Drives an in-process run controller on a virtual clock, so timing-driven
//! behavior (browser grace, completed dwell, watch debounce) is exercised
//! without sleeping. Assertions are made against the controller's snapshot,
//! not against printed output.

use std::path::Path;
use std::time::{Duration, Instant};

use colored::Colorize;

use crate::common::error::IpcError;
use crate::common::{Error, Result};
use crate::engine::controller::{ControllerSettings, ReportOutcome, ResultReport, RunController};
use crate::engine::coverage::CoverageData;
use crate::engine::run::RunId;
use crate::engine::scope::RunScope;
use crate::engine::status::TestStatus;
use crate::engine::tree::{StoryId, StoryTree};
use crate::engine::watch::WatchController;
use crate::runner::{HeadlessRunner, RecordingRunner, RunnerExit};

use super::config::{Expectation, TestScenario, TestStep};

/// Timer resolution while advancing the virtual clock
const TICK: Duration = Duration::from_millis(10);

/// Result of a test run
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub steps_run: usize,
    pub steps_total: usize,
    pub error: Option<String>,
}

/// Run a test scenario from a YAML file
pub fn run_scenario(path: &Path, verbose: bool) -> Result<TestResult> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read test scenario '{}': {}",
            path.display(),
            e
        ))
    })?;

    let base_dir = path.parent().unwrap_or(Path::new("."));
    run_scenario_str(&content, base_dir, verbose)
}

/// Run a scenario given as YAML text; index paths resolve against `base_dir`
pub fn run_scenario_str(yaml: &str, base_dir: &Path, verbose: bool) -> Result<TestResult> {
    let scenario: TestScenario = serde_yaml::from_str(yaml)
        .map_err(|e| Error::Config(format!("Failed to parse test scenario: {}", e)))?;

    let steps_total = scenario.steps.len();

    println!(
        "\n{} {}",
        "Running Test:".blue().bold(),
        scenario.name.white().bold()
    );
    if let Some(desc) = &scenario.description {
        println!("  {}", desc.dimmed());
    }

    let tree = build_tree(&scenario, base_dir)?;
    if verbose {
        println!("  {} stories loaded", tree.len().to_string().dimmed());
    }
    let mut ctx = ScenarioContext::new(&scenario, tree);

    println!("\n{}", "Steps:".cyan());

    for (i, step) in scenario.steps.iter().enumerate() {
        let step_num = i + 1;

        match ctx.execute(step) {
            Ok(summary) => {
                println!("  {} Step {}: {}", "✓".green(), step_num, summary.dimmed());
                if verbose {
                    let snapshot = ctx.controller.snapshot(ctx.now);
                    println!(
                        "      {} [{}] {}",
                        "state:".dimmed(),
                        snapshot.lifecycle,
                        snapshot.description()
                    );
                }
            }
            Err(e) => {
                println!("  {} Step {}: {}", "✗".red(), step_num, e);
                return Ok(TestResult {
                    name: scenario.name.clone(),
                    passed: false,
                    steps_run: step_num,
                    steps_total,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    println!("\n{} {}\n", "✓".green().bold(), "Test Passed".green().bold());

    Ok(TestResult {
        name: scenario.name,
        passed: true,
        steps_run: steps_total,
        steps_total,
        error: None,
    })
}

fn build_tree(scenario: &TestScenario, base_dir: &Path) -> Result<StoryTree> {
    if let Some(index) = &scenario.index {
        let path = if index.is_relative() {
            base_dir.join(index)
        } else {
            index.clone()
        };
        return StoryTree::load(&path);
    }

    if scenario.stories.is_empty() {
        return Err(Error::Config(
            "Scenario needs either 'index' or 'stories'".to_string(),
        ));
    }

    let mut builder = StoryTree::builder();
    for story in &scenario.stories {
        let name = story
            .name
            .clone()
            .or_else(|| story.id.rsplit_once("--").map(|(_, n)| n.to_string()))
            .unwrap_or_else(|| story.id.clone());
        builder = builder.story_with(&story.id, &story.title, &name, story.testable);
    }
    Ok(builder.build())
}

struct ScenarioContext {
    controller: RunController,
    watch: WatchController,
    now: Instant,
    started: Vec<RunId>,
}

impl ScenarioContext {
    fn new(scenario: &TestScenario, tree: StoryTree) -> Self {
        let settings = &scenario.settings;
        let runner: Box<dyn HeadlessRunner> = if settings.runner_fails {
            Box::new(RecordingRunner::failing())
        } else {
            Box::new(RecordingRunner::new())
        };
        let controller = RunController::new(
            tree,
            runner,
            ControllerSettings {
                browser_grace: Duration::from_millis(settings.browser_grace_ms),
                completed_dwell: Duration::from_millis(settings.completed_dwell_ms),
                default_coverage: settings.default_coverage,
                ..ControllerSettings::default()
            },
        );

        Self {
            controller,
            watch: WatchController::new(Duration::from_millis(settings.debounce_ms)),
            now: Instant::now(),
            started: Vec::new(),
        }
    }

    fn run_id(&self, explicit: Option<u64>) -> Result<RunId> {
        explicit
            .map(RunId)
            .or_else(|| self.started.last().copied())
            .ok_or_else(|| Error::Config("Step needs a run but none was started".to_string()))
    }

    /// Move the clock, firing timers the way the daemon tick does
    fn advance(&mut self, by: Duration) -> Result<()> {
        let target = self.now + by;
        while self.now < target {
            self.now = (self.now + TICK).min(target);
            self.controller.tick(self.now);
            if let Some(run_id) = self.watch.poll(&mut self.controller, self.now)? {
                self.started.push(run_id);
            }
        }
        Ok(())
    }

    fn execute(&mut self, step: &TestStep) -> Result<String> {
        match step {
            TestStep::Start {
                scope,
                coverage,
                expect_error,
            } => {
                let parsed: RunScope = scope.parse().map_err(Error::Config)?;

                match (self.controller.start_at(parsed, *coverage, self.now), expect_error) {
                    (Ok(run_id), None) => {
                        self.started.push(run_id);
                        Ok(format!("start {} (run {})", scope, run_id))
                    }
                    (Ok(run_id), Some(code)) => Err(Error::TestAssertion(format!(
                        "Expected start of {} to fail with {}, but run {} started",
                        scope, code, run_id
                    ))),
                    (Err(e), Some(code)) => {
                        let actual = IpcError::from(&e).code;
                        if &actual == code {
                            Ok(format!("start {} refused ({})", scope, actual))
                        } else {
                            Err(Error::TestAssertion(format!(
                                "Expected error {}, got {}: {}",
                                code, actual, e
                            )))
                        }
                    }
                    (Err(e), None) => Err(Error::TestAssertion(format!(
                        "Start of {} failed: {}",
                        scope, e
                    ))),
                }
            }

            TestStep::Report {
                run,
                story,
                stories,
                env,
                status,
                coverage,
                expect,
            } => {
                let run_id = self.run_id(*run)?;
                let ids: Vec<&String> = story.iter().chain(stories.iter()).collect();
                if ids.is_empty() {
                    return Err(Error::Config("Report step needs 'story' or 'stories'".to_string()));
                }

                for id in &ids {
                    let outcome = self.controller.report_result_at(
                        ResultReport {
                            run_id,
                            story_id: StoryId::from(id.as_str()),
                            environment: *env,
                            status: *status,
                            duration_ms: None,
                            coverage: coverage.clone(),
                        },
                        self.now,
                    );

                    let actual = outcome_name(&outcome);
                    let wanted = expect.as_deref().unwrap_or("accepted");
                    if actual != wanted {
                        return Err(Error::TestAssertion(format!(
                            "Report {} {} for {} was {}, expected {}",
                            env, status, id, actual, wanted
                        )));
                    }
                }

                Ok(format!(
                    "report {} {} for {} (run {})",
                    env,
                    status,
                    describe_ids(&ids),
                    run_id
                ))
            }

            TestStep::Coverage { run, files } => {
                let run_id = self.run_id(*run)?;
                let data = CoverageData {
                    files: files.clone(),
                };
                let overall = data.overall_percent();
                self.controller.report_coverage_at(run_id, data, self.now)?;
                Ok(format!("coverage {} for run {}", overall, run_id))
            }

            TestStep::RunnerExit { run, success } => {
                let run_id = self.run_id(*run)?;
                self.controller.runner_exited_at(
                    RunnerExit {
                        run_id,
                        success: *success,
                        code: Some(if *success { 0 } else { 1 }),
                    },
                    self.now,
                );
                Ok(format!("runner exit for run {} (success={})", run_id, success))
            }

            TestStep::Change { count, spacing_ms } => {
                for i in 0..*count {
                    self.watch.notify(self.now);
                    if i + 1 < *count {
                        self.advance(Duration::from_millis(*spacing_ms))?;
                    }
                }
                Ok(format!("{} change(s), {}ms apart", count, spacing_ms))
            }

            TestStep::Watch { enabled } => {
                self.watch.set_enabled(*enabled);
                Ok(format!("watch {}", if *enabled { "on" } else { "off" }))
            }

            TestStep::Advance { ms } => {
                self.advance(Duration::from_millis(*ms))?;
                Ok(format!("advance {}ms", ms))
            }

            TestStep::Expect(expectation) => {
                let checked = self.check(expectation)?;
                Ok(format!("expect {}", checked.join(", ")))
            }
        }
    }

    /// Check every set field; all mismatches are reported together
    fn check(&self, expect: &Expectation) -> Result<Vec<&'static str>> {
        let snapshot = self.controller.snapshot(self.now);
        let mut checked = Vec::new();
        let mut failures = Vec::new();

        if let Some(lifecycle) = expect.lifecycle {
            checked.push("lifecycle");
            if snapshot.lifecycle != lifecycle {
                failures.push(format!("lifecycle is {}, expected {}", snapshot.lifecycle, lifecycle));
            }
        }

        if let Some(counts) = &expect.counts {
            checked.push("counts");
            let actual = snapshot.counts;
            for (label, wanted, got) in [
                ("pending", counts.pending, actual.pending),
                ("running", counts.running, actual.running),
                ("passed", counts.passed, actual.passed),
                ("failed", counts.failed, actual.failed),
                ("errored", counts.errored, actual.errored),
            ] {
                if let Some(wanted) = wanted {
                    if wanted != got {
                        failures.push(format!("{} count is {}, expected {}", label, got, wanted));
                    }
                }
            }
        }

        if !expect.status.is_empty() {
            checked.push("status");
            for (id, wanted) in &expect.status {
                let got = snapshot.status_of(id).unwrap_or(TestStatus::Pending);
                if got != *wanted {
                    failures.push(format!("{} is {}, expected {}", id, got, wanted));
                }
            }
        }

        if let Some(wanted) = &expect.failing {
            checked.push("failing");
            let mut wanted: Vec<&str> = wanted.iter().map(String::as_str).collect();
            wanted.sort_unstable();
            let got: Vec<&str> = snapshot
                .failing_stories()
                .into_iter()
                .map(StoryId::as_str)
                .collect();
            if got != wanted {
                failures.push(format!("failing stories are {:?}, expected {:?}", got, wanted));
            }
        }

        if let Some(wanted) = &expect.discrepancies {
            checked.push("discrepancies");
            if snapshot.discrepancies.len() != wanted.len() {
                failures.push(format!(
                    "{} discrepancies, expected {}",
                    snapshot.discrepancies.len(),
                    wanted.len()
                ));
            }
            for item in wanted {
                match snapshot
                    .discrepancies
                    .iter()
                    .find(|d| d.story_id.as_str() == item.story)
                {
                    None => failures.push(format!("no discrepancy for {}", item.story)),
                    Some(record) => {
                        if let Some(text) = &item.message_contains {
                            if !record.message.contains(text.as_str()) {
                                failures.push(format!(
                                    "discrepancy for {} says '{}', expected it to contain '{}'",
                                    item.story, record.message, text
                                ));
                            }
                        }
                    }
                }
            }
        }

        if let Some(wanted) = expect.coverage_overall {
            checked.push("coverage");
            match &snapshot.coverage {
                Some(agg) if (agg.overall_percent.0 - wanted).abs() < 1e-6 => {}
                Some(agg) => failures.push(format!(
                    "overall coverage is {}, expected {}",
                    agg.overall_percent.0, wanted
                )),
                None => failures.push(format!("no coverage, expected {}", wanted)),
            }
        }

        if expect.coverage_absent {
            checked.push("no coverage");
            if let Some(agg) = &snapshot.coverage {
                failures.push(format!(
                    "coverage is {} from run {}, expected none",
                    agg.overall_percent, agg.covered_run_id
                ));
            }
        }

        if let Some(wanted) = expect.coverage_run {
            checked.push("coverage run");
            let got = snapshot.coverage.as_ref().map(|c| c.covered_run_id);
            if got != Some(RunId(wanted)) {
                failures.push(format!("coverage is from run {:?}, expected {}", got, wanted));
            }
        }

        if let Some(wanted) = expect.runs_started {
            checked.push("runs");
            if self.started.len() != wanted {
                failures.push(format!("{} runs started, expected {}", self.started.len(), wanted));
            }
        }

        if let Some(wanted) = &expect.description {
            checked.push("description");
            let got = snapshot.description();
            if &got != wanted {
                failures.push(format!("description is '{}', expected '{}'", got, wanted));
            }
        }

        if let Some(wanted) = &expect.run_state {
            checked.push("run state");
            match self.controller.run(RunId(wanted.run)) {
                Some(run) if run.state == wanted.state => {}
                Some(run) => failures.push(format!(
                    "run {} is {}, expected {}",
                    wanted.run, run.state, wanted.state
                )),
                None => failures.push(format!("run {} not found", wanted.run)),
            }
        }

        if failures.is_empty() {
            Ok(checked)
        } else {
            Err(Error::TestAssertion(failures.join("; ")))
        }
    }
}

fn outcome_name(outcome: &ReportOutcome) -> &'static str {
    match outcome {
        ReportOutcome::Accepted { .. } => "accepted",
        ReportOutcome::Stale { .. } => "stale",
        ReportOutcome::Regressed { .. } => "regressed",
        ReportOutcome::UnknownStory => "unknown_story",
    }
}

fn describe_ids(ids: &[&String]) -> String {
    match ids {
        [one] => one.to_string(),
        many => format!("{} stories", many.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: &str = r#"
name: Browser grace period
settings:
  browser_grace_ms: 200
stories:
  - { id: card--plain, title: Card }
steps:
  - action: start
  - action: report
    story: card--plain
    status: passed
  - action: expect
    status: { card--plain: running }
    lifecycle: completed
  - action: advance
    ms: 250
  - action: expect
    status: { card--plain: passed }
    description: Ran 1 test
"#;

    #[test]
    fn test_grace_scenario_passes() {
        let result = run_scenario_str(GRACE, Path::new("."), false).unwrap();
        assert!(result.passed, "{:?}", result.error);
        assert_eq!(result.steps_run, 5);
    }

    #[test]
    fn test_failed_expectation_stops_scenario() {
        let yaml = r#"
name: Wrong expectation
stories:
  - { id: card--plain, title: Card }
steps:
  - action: start
  - action: expect
    lifecycle: idle
  - action: advance
    ms: 10
"#;
        let result = run_scenario_str(yaml, Path::new("."), false).unwrap();
        assert!(!result.passed);
        assert_eq!(result.steps_run, 2);
        assert!(result.error.unwrap().contains("lifecycle is running"));
    }

    #[test]
    fn test_expected_start_error() {
        let yaml = r#"
name: Untestable
stories:
  - { id: docs--intro, title: Docs, testable: false }
steps:
  - action: start
    scope: component:docs
    expect_error: NOT_TESTABLE
  - action: start
    scope: story:nope
    expect_error: UNKNOWN_NODE
"#;
        let result = run_scenario_str(yaml, Path::new("."), false).unwrap();
        assert!(result.passed, "{:?}", result.error);
    }

    #[test]
    fn test_missing_tree_is_config_error() {
        let yaml = "name: Empty\nsteps: []\n";
        assert!(matches!(
            run_scenario_str(yaml, Path::new("."), false),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_report_ids_default_to_last_run() {
        let yaml = r#"
name: Stale report
stories:
  - { id: a--one, title: A }
steps:
  - action: start
  - action: start
  - action: report
    run: 1
    story: a--one
    status: failed
    expect: stale
  - action: report
    story: a--one
    status: passed
  - action: expect
    run_state: { run: 1, state: cancelled }
    runs_started: 2
"#;
        let result = run_scenario_str(yaml, Path::new("."), false).unwrap();
        assert!(result.passed, "{:?}", result.error);
    }
}
