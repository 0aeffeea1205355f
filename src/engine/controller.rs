//! Run controller
//!
//! Single writer over everything the engine knows: the run records, the
//! result store and the coverage aggregate. Both producers (headless runner
//! and browser) feed reports in through [`RunController::report_result`] at
//! any time; correctness rests on run ownership in the store, not on locks.
//!
//! Every time-dependent operation has an `_at` variant taking the current
//! instant, so callers with their own clock (scenarios, tests) stay
//! deterministic.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::runner::{DispatchRequest, HeadlessRunner, RunnerExit};

use super::coverage::{CoverageAggregator, CoverageData, MergeOutcome};
use super::discrepancy::{self, DiscrepancyRecord};
use super::run::{Run, RunId, RunState};
use super::scope::{RunScope, ScopeResolver};
use super::snapshot::{Lifecycle, StatusCounts, StatusSnapshot, StoryView};
use super::status::{Environment, TestStatus};
use super::store::{PutOutcome, ResultStore};
use super::tree::{StoryId, StoryTree};

const EVENT_CAPACITY: usize = 64;

/// Timing and retention knobs
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// How long a CLI pass waits for the browser before counting alone
    pub browser_grace: Duration,
    /// How long `Completed` is shown before falling back to `Idle`
    pub completed_dwell: Duration,
    /// Coverage flag used by watch runs before any run has been started
    pub default_coverage: bool,
    /// Finished runs kept for status output
    pub history_limit: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            browser_grace: Duration::from_millis(2000),
            completed_dwell: Duration::from_millis(5000),
            default_coverage: false,
            history_limit: 20,
        }
    }
}

impl From<&Config> for ControllerSettings {
    fn from(config: &Config) -> Self {
        Self {
            browser_grace: config.results.browser_grace(),
            completed_dwell: config.results.completed_dwell(),
            default_coverage: config.coverage.enabled,
            ..Self::default()
        }
    }
}

/// A status report from either environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultReport {
    pub run_id: RunId,
    pub story_id: StoryId,
    pub environment: Environment,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Headless runner only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageData>,
}

/// What became of a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReportOutcome {
    /// Stored; carries the story's derived status after the update
    Accepted {
        status: TestStatus,
        discrepancy: Option<DiscrepancyRecord>,
    },
    /// Dropped: the run no longer owns the story
    Stale { owner: Option<RunId> },
    /// Dropped: would move the slot backwards
    Regressed { current: TestStatus },
    /// Dropped: no such story in the tree
    UnknownStory,
}

impl ReportOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControllerEvent {
    Snapshot(StatusSnapshot),
    /// A full run cancelled an active one; later reports for it are dropped
    RunSuperseded { run_id: RunId, superseded_by: RunId },
}

pub struct RunController {
    tree: StoryTree,
    store: ResultStore,
    coverage: CoverageAggregator,
    runner: Box<dyn HeadlessRunner>,
    runs: BTreeMap<RunId, Run>,
    next_run_id: u64,
    last_include_coverage: Option<bool>,
    /// Stories whose CLI passed while the browser has not reported yet
    grace_waiting: BTreeSet<StoryId>,
    published_lifecycle: Lifecycle,
    events: broadcast::Sender<ControllerEvent>,
    settings: ControllerSettings,
}

impl RunController {
    pub fn new(tree: StoryTree, runner: Box<dyn HeadlessRunner>, settings: ControllerSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tree,
            store: ResultStore::new(),
            coverage: CoverageAggregator::new(),
            runner,
            runs: BTreeMap::new(),
            next_run_id: 1,
            last_include_coverage: None,
            grace_waiting: BTreeSet::new(),
            published_lifecycle: Lifecycle::Idle,
            events,
            settings,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn tree(&self) -> &StoryTree {
        &self.tree
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn coverage(&self) -> &CoverageAggregator {
        &self.coverage
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn run(&self, run_id: RunId) -> Option<&Run> {
        self.runs.get(&run_id)
    }

    pub fn runs(&self) -> impl Iterator<Item = &Run> {
        self.runs.values()
    }

    pub fn has_active_runs(&self) -> bool {
        self.runs.values().any(Run::is_active)
    }

    /// Coverage flag of the most recent run, or the configured default
    pub fn previous_include_coverage(&self) -> bool {
        self.last_include_coverage
            .unwrap_or(self.settings.default_coverage)
    }

    pub fn start(&mut self, scope: RunScope, include_coverage: bool) -> Result<RunId> {
        self.start_at(scope, include_coverage, Instant::now())
    }

    /// Start a run
    ///
    /// A full run cancels every active run. A scoped run is refused while an
    /// active run holds any of the same stories.
    pub fn start_at(&mut self, scope: RunScope, include_coverage: bool, now: Instant) -> Result<RunId> {
        let story_ids = ScopeResolver::new(&self.tree).expand(&scope)?;

        if !scope.is_all() {
            if let Some(active) = self
                .runs
                .values()
                .find(|r| r.is_active() && r.overlap(&story_ids) > 0)
            {
                return Err(Error::ScopeConflict {
                    run_id: active.id.0,
                    overlap: active.overlap(&story_ids),
                });
            }
        }

        let run_id = RunId(self.next_run_id);
        self.next_run_id += 1;

        if scope.is_all() {
            self.supersede_active(run_id, now);
        }

        self.store.clear_for_scope(&story_ids, run_id);
        for id in &story_ids {
            self.grace_waiting.remove(id);
        }

        tracing::info!(%run_id, %scope, stories = story_ids.len(), include_coverage, "Starting run");
        let run = Run::new(run_id, scope, story_ids, include_coverage, now);
        let request = DispatchRequest {
            run_id,
            story_ids: run.story_ids.iter().cloned().collect(),
            include_coverage,
        };
        self.runs.insert(run_id, run);
        self.last_include_coverage = Some(include_coverage);
        self.publish(now);

        if let Some(run) = self.runs.get_mut(&run_id) {
            run.transition(RunState::Running, now);
        }

        if let Err(e) = self.runner.dispatch(&request) {
            tracing::warn!(%run_id, error = %e, "Dispatch failed, marking every story errored");
            for id in &request.story_ids {
                self.record_cli_error(run_id, id, now);
            }
        }

        self.prune_history();
        self.check_completion(run_id, now);
        self.publish(now);
        Ok(run_id)
    }

    fn supersede_active(&mut self, superseded_by: RunId, now: Instant) {
        let mut cancelled = Vec::new();
        for run in self.runs.values_mut().filter(|r| r.is_active()) {
            if run.transition(RunState::Cancelled, now) {
                run.superseded_by = Some(superseded_by);
                cancelled.push(run.id);
            }
        }
        for run_id in cancelled {
            tracing::info!(%run_id, %superseded_by, "Run superseded");
            // No subscribers is fine
            let _ = self.events.send(ControllerEvent::RunSuperseded {
                run_id,
                superseded_by,
            });
        }
    }

    pub fn report_result(&mut self, report: ResultReport) -> ReportOutcome {
        self.report_result_at(report, Instant::now())
    }

    /// Ingest one report from either environment
    pub fn report_result_at(&mut self, report: ResultReport, now: Instant) -> ReportOutcome {
        let ResultReport {
            run_id,
            story_id,
            environment,
            status,
            duration_ms,
            coverage,
        } = report;

        if self.tree.story(story_id.as_str()).is_none() {
            tracing::debug!(%run_id, %story_id, %environment, "Dropping result for unknown story");
            return ReportOutcome::UnknownStory;
        }

        let outcome = self.store.put(&story_id, environment, status, run_id, now);
        if let PutOutcome::Stale { owner } = outcome {
            return ReportOutcome::Stale { owner };
        }

        if let Some(data) = coverage {
            if let Some(run) = self.runs.get_mut(&run_id) {
                run.absorb_coverage(data);
            }
        }

        if let PutOutcome::Regressed { current } = outcome {
            return ReportOutcome::Regressed { current };
        }

        tracing::debug!(%run_id, %story_id, %environment, %status, duration_ms, "Result accepted");

        let (cli, browser, both_terminal) = match self.store.get(story_id.as_str()) {
            Some(result) => (result.cli_status(), result.browser_status(), result.both_terminal()),
            None => (None, None, false),
        };

        match environment {
            Environment::Cli if status.is_terminal() => {
                if let Some(run) = self.runs.get_mut(&run_id) {
                    run.mark_finished(&story_id);
                }
                if status == TestStatus::Passed && !browser.is_some_and(TestStatus::is_terminal) {
                    self.grace_waiting.insert(story_id.clone());
                }
            }
            Environment::Browser if status.is_terminal() => {
                self.grace_waiting.remove(&story_id);
            }
            _ => {}
        }

        let discrepancy = if both_terminal {
            discrepancy::detect(&story_id, cli, browser)
        } else {
            None
        };
        if let Some(record) = &discrepancy {
            tracing::info!(%story_id, cli = %record.cli_status, browser = %record.browser_status, "Environments disagree");
        }

        let aggregate = self
            .store
            .get(story_id.as_str())
            .map(|r| r.aggregate(now, self.settings.browser_grace))
            .unwrap_or(TestStatus::Pending);

        self.check_completion(run_id, now);
        self.publish(now);

        ReportOutcome::Accepted {
            status: aggregate,
            discrepancy,
        }
    }

    /// Coverage reported separately from any story result
    ///
    /// Absorbed into the run while it is active; for a run that already
    /// completed, the run's coverage is merged again right away.
    pub fn report_coverage(&mut self, run_id: RunId, data: CoverageData) -> Result<()> {
        self.report_coverage_at(run_id, data, Instant::now())
    }

    pub fn report_coverage_at(&mut self, run_id: RunId, data: CoverageData, now: Instant) -> Result<()> {
        let run = self.runs.get_mut(&run_id).ok_or(Error::RunNotFound(run_id.0))?;

        if !run.include_coverage {
            tracing::debug!(%run_id, "Ignoring coverage for run without coverage pass");
            return Ok(());
        }

        match run.state {
            RunState::Queued | RunState::Running => run.absorb_coverage(data),
            RunState::Completed => {
                run.absorb_coverage(data);
                let outcome = self.coverage.merge(&run.scope, run.id, run.coverage());
                tracing::debug!(%run_id, ?outcome, "Merged late coverage");
                self.publish(now);
            }
            RunState::Cancelled => {
                tracing::debug!(%run_id, "Dropping coverage for cancelled run");
            }
        }
        Ok(())
    }

    /// The runner process for a run is gone
    ///
    /// Stories it never finished are recorded as errored, so the run still
    /// completes.
    pub fn runner_exited_at(&mut self, exit: RunnerExit, now: Instant) {
        let Some(run) = self.runs.get(&exit.run_id).filter(|r| r.state == RunState::Running) else {
            tracing::debug!(run_id = %exit.run_id, "Runner exit for inactive run");
            return;
        };

        let unfinished: Vec<StoryId> = run
            .story_ids
            .iter()
            .filter(|id| self.store.owner(id.as_str()) == Some(exit.run_id))
            .filter(|id| {
                !self
                    .store
                    .get(id.as_str())
                    .is_some_and(|r| r.cli_terminal())
            })
            .cloned()
            .collect();

        if !unfinished.is_empty() {
            tracing::warn!(
                run_id = %exit.run_id,
                success = exit.success,
                code = ?exit.code,
                unfinished = unfinished.len(),
                "Headless runner exited before reporting every story"
            );
        }
        for id in &unfinished {
            self.record_cli_error(exit.run_id, id, now);
        }

        self.check_completion(exit.run_id, now);
        self.publish(now);
    }

    fn record_cli_error(&mut self, run_id: RunId, story_id: &StoryId, now: Instant) {
        if self.store.put(story_id, Environment::Cli, TestStatus::Errored, run_id, now)
            == PutOutcome::Accepted
        {
            if let Some(run) = self.runs.get_mut(&run_id) {
                run.mark_finished(story_id);
            }
        }
    }

    /// Every story of the run has a final headless result
    pub fn all_results_terminal(&self, run_id: RunId) -> bool {
        self.runs.get(&run_id).is_some_and(Run::all_finished)
    }

    fn check_completion(&mut self, run_id: RunId, now: Instant) {
        let Some(run) = self.runs.get_mut(&run_id) else {
            return;
        };
        if run.state != RunState::Running || !run.all_finished() {
            return;
        }

        run.transition(RunState::Completed, now);
        tracing::info!(
            %run_id,
            scope = %run.scope,
            stories = run.story_ids.len(),
            duration_ms = run.duration().map(|d| d.as_millis() as u64),
            "Run completed"
        );

        if run.include_coverage {
            match self.coverage.merge(&run.scope, run.id, run.coverage()) {
                MergeOutcome::Skipped => {
                    tracing::debug!(%run_id, "Run completed without coverage data")
                }
                outcome => tracing::debug!(%run_id, ?outcome, "Coverage merged"),
            }
        }
    }

    fn prune_history(&mut self) {
        let finished: Vec<RunId> = self
            .runs
            .values()
            .filter(|r| !r.is_active())
            .map(|r| r.id)
            .collect();
        let excess = finished.len().saturating_sub(self.settings.history_limit);
        for run_id in finished.into_iter().take(excess) {
            self.runs.remove(&run_id);
        }
    }

    pub fn lifecycle(&self, now: Instant) -> Lifecycle {
        if self.runs.values().any(|r| r.state == RunState::Running) {
            return Lifecycle::Running;
        }
        if self.runs.values().any(|r| r.state == RunState::Queued) {
            return Lifecycle::Queued;
        }

        let last_completed = self
            .runs
            .values()
            .filter(|r| r.state == RunState::Completed)
            .filter_map(|r| r.finished_at)
            .max();
        match last_completed {
            Some(at) if now.saturating_duration_since(at) < self.settings.completed_dwell => {
                Lifecycle::Completed
            }
            _ => Lifecycle::Idle,
        }
    }

    /// Advance timers; returns true when a new snapshot was published
    pub fn tick(&mut self, now: Instant) -> bool {
        let grace = self.settings.browser_grace;
        let store = &self.store;
        let before = self.grace_waiting.len();
        self.grace_waiting.retain(|id| {
            store
                .get(id.as_str())
                .is_some_and(|r| r.awaiting_browser(now, grace))
        });
        let grace_expired = self.grace_waiting.len() != before;

        if grace_expired || self.lifecycle(now) != self.published_lifecycle {
            self.publish(now);
            return true;
        }
        false
    }

    pub fn snapshot(&self, now: Instant) -> StatusSnapshot {
        let grace = self.settings.browser_grace;
        let mut counts = StatusCounts::default();
        let stories: BTreeMap<StoryId, StoryView> = self
            .store
            .iter()
            .map(|(id, owner, result)| {
                let status = result.aggregate(now, grace);
                counts.add(status);
                (
                    id.clone(),
                    StoryView {
                        status,
                        cli: result.cli_status(),
                        browser: result.browser_status(),
                        run_id: owner,
                    },
                )
            })
            .collect();

        let discrepancies = stories
            .iter()
            .filter_map(|(id, view)| discrepancy::detect(id, view.cli, view.browser))
            .collect();

        StatusSnapshot {
            lifecycle: self.lifecycle(now),
            runs: self.runs.values().map(Run::summary).collect(),
            stories,
            discrepancies,
            coverage: self.coverage.aggregate().cloned(),
            informational_coverage: self.coverage.informational().cloned(),
            counts,
        }
    }

    fn publish(&mut self, now: Instant) {
        let snapshot = self.snapshot(now);
        self.published_lifecycle = snapshot.lifecycle;
        let _ = self.events.send(ControllerEvent::Snapshot(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::coverage::{FileCoverage, Percent};
    use crate::engine::tree::ComponentId;
    use crate::runner::RecordingRunner;

    fn tree() -> StoryTree {
        StoryTree::builder()
            .story("button--primary", "Button", "Primary")
            .story("button--secondary", "Button", "Secondary")
            .story("card--plain", "Card", "Plain")
            .build()
    }

    fn controller() -> (RunController, RecordingRunner) {
        let runner = RecordingRunner::new();
        let settings = ControllerSettings {
            browser_grace: Duration::from_millis(100),
            completed_dwell: Duration::from_millis(1000),
            ..ControllerSettings::default()
        };
        (
            RunController::new(tree(), Box::new(runner.clone()), settings),
            runner,
        )
    }

    fn report(run: RunId, story: &str, env: Environment, status: TestStatus) -> ResultReport {
        ResultReport {
            run_id: run,
            story_id: StoryId::from(story),
            environment: env,
            status,
            duration_ms: None,
            coverage: None,
        }
    }

    fn coverage(covered: u64) -> CoverageData {
        CoverageData {
            files: [("src/button.tsx".to_string(), FileCoverage { covered, total: 100 })]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn test_start_dispatches_and_runs() {
        let (mut c, runner) = controller();
        let now = Instant::now();
        let id = c.start_at(RunScope::All, false, now).unwrap();

        assert_eq!(id, RunId(1));
        assert_eq!(c.lifecycle(now), Lifecycle::Running);
        let dispatched = runner.dispatched();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].story_ids.len(), 3);
    }

    #[test]
    fn test_run_completes_when_cli_terminal() {
        let (mut c, _) = controller();
        let now = Instant::now();
        let id = c.start_at(RunScope::Component(ComponentId::from("button")), false, now).unwrap();

        c.report_result_at(report(id, "button--primary", Environment::Cli, TestStatus::Passed), now);
        assert_eq!(c.run(id).unwrap().state, RunState::Running);
        c.report_result_at(report(id, "button--secondary", Environment::Cli, TestStatus::Errored), now);

        assert_eq!(c.run(id).unwrap().state, RunState::Completed);
        assert!(c.all_results_terminal(id));
        assert_eq!(c.lifecycle(now), Lifecycle::Completed);
        assert_eq!(c.lifecycle(now + Duration::from_millis(1000)), Lifecycle::Idle);
    }

    #[test]
    fn test_all_run_supersedes_and_drops_stale() {
        let (mut c, _) = controller();
        let now = Instant::now();
        let mut events = c.subscribe();
        let first = c.start_at(RunScope::All, false, now).unwrap();
        let second = c.start_at(RunScope::All, false, now).unwrap();

        assert_eq!(c.run(first).unwrap().state, RunState::Cancelled);
        assert_eq!(c.run(first).unwrap().superseded_by, Some(second));

        let outcome =
            c.report_result_at(report(first, "card--plain", Environment::Browser, TestStatus::Failed), now);
        assert_eq!(outcome, ReportOutcome::Stale { owner: Some(second) });
        assert_eq!(c.store().get("card--plain").unwrap().browser_status(), None);

        let mut superseded = false;
        while let Ok(event) = events.try_recv() {
            if let ControllerEvent::RunSuperseded { run_id, superseded_by } = event {
                assert_eq!((run_id, superseded_by), (first, second));
                superseded = true;
            }
        }
        assert!(superseded);
    }

    #[test]
    fn test_overlapping_scoped_runs_conflict() {
        let (mut c, _) = controller();
        let now = Instant::now();
        c.start_at(RunScope::Component(ComponentId::from("button")), false, now).unwrap();

        let err = c
            .start_at(RunScope::Story(StoryId::from("button--primary")), false, now)
            .unwrap_err();
        assert!(matches!(err, Error::ScopeConflict { run_id: 1, overlap: 1 }));

        // Disjoint scope runs alongside
        let card = c.start_at(RunScope::Component(ComponentId::from("card")), false, now).unwrap();
        assert_eq!(c.run(card).unwrap().state, RunState::Running);
        assert_eq!(c.runs().filter(|r| r.is_active()).count(), 2);
    }

    #[test]
    fn test_discrepancy_on_accept() {
        let (mut c, _) = controller();
        let now = Instant::now();
        let id = c.start_at(RunScope::All, false, now).unwrap();
        c.report_result_at(report(id, "card--plain", Environment::Cli, TestStatus::Passed), now);
        let outcome =
            c.report_result_at(report(id, "card--plain", Environment::Browser, TestStatus::Failed), now);

        match outcome {
            ReportOutcome::Accepted { status, discrepancy } => {
                assert_eq!(status, TestStatus::Failed);
                assert_eq!(discrepancy.unwrap().message, discrepancy::CLI_PASSED_BROWSER_FAILED);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(c.snapshot(now).discrepancies.len(), 1);
    }

    #[test]
    fn test_runner_exit_errors_unfinished_stories() {
        let (mut c, _) = controller();
        let now = Instant::now();
        let id = c.start_at(RunScope::Component(ComponentId::from("button")), false, now).unwrap();
        c.report_result_at(report(id, "button--primary", Environment::Cli, TestStatus::Passed), now);

        c.runner_exited_at(
            RunnerExit {
                run_id: id,
                success: false,
                code: Some(1),
            },
            now,
        );

        assert_eq!(c.run(id).unwrap().state, RunState::Completed);
        let store = c.store();
        assert_eq!(store.get("button--primary").unwrap().cli_status(), Some(TestStatus::Passed));
        assert_eq!(store.get("button--secondary").unwrap().cli_status(), Some(TestStatus::Errored));
    }

    #[test]
    fn test_failed_dispatch_errors_every_story() {
        let mut c = RunController::new(
            tree(),
            Box::new(RecordingRunner::failing()),
            ControllerSettings::default(),
        );
        let now = Instant::now();
        let id = c.start_at(RunScope::All, false, now).unwrap();
        assert_eq!(c.run(id).unwrap().state, RunState::Completed);
        assert_eq!(c.snapshot(now).counts.errored, 3);
    }

    #[test]
    fn test_grace_expiry_republishes() {
        let (mut c, _) = controller();
        let t0 = Instant::now();
        let id = c.start_at(RunScope::Story(StoryId::from("card--plain")), false, t0).unwrap();
        c.report_result_at(report(id, "card--plain", Environment::Cli, TestStatus::Passed), t0);
        assert_eq!(c.snapshot(t0).status_of("card--plain"), Some(TestStatus::Running));

        let mut events = c.subscribe();
        assert!(c.tick(t0 + Duration::from_millis(150)));
        match events.try_recv().unwrap() {
            ControllerEvent::Snapshot(snap) => {
                assert_eq!(snap.status_of("card--plain"), Some(TestStatus::Passed))
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(!c.tick(t0 + Duration::from_millis(200)));
    }

    #[test]
    fn test_coverage_merged_on_completion() {
        let (mut c, _) = controller();
        let now = Instant::now();
        let id = c.start_at(RunScope::Story(StoryId::from("card--plain")), true, now).unwrap();
        let mut r = report(id, "card--plain", Environment::Cli, TestStatus::Passed);
        r.coverage = Some(coverage(30));
        c.report_result_at(r, now);

        assert!(c.coverage().aggregate().is_none());
        assert_eq!(c.coverage().informational().unwrap().overall_percent, Percent(30.0));

        let all = c.start_at(RunScope::All, true, now).unwrap();
        c.report_coverage_at(all, coverage(70), now).unwrap();
        for story in ["button--primary", "button--secondary", "card--plain"] {
            c.report_result_at(report(all, story, Environment::Cli, TestStatus::Passed), now);
        }
        assert_eq!(c.coverage().aggregate().unwrap().overall_percent, Percent(70.0));

        // Late coverage for a completed run still lands
        c.report_coverage_at(all, coverage(60), now).unwrap();
        assert_eq!(c.coverage().aggregate().unwrap().overall_percent, Percent(60.0));
        assert!(matches!(
            c.report_coverage_at(RunId(99), coverage(1), now),
            Err(Error::RunNotFound(99))
        ));
    }

    #[test]
    fn test_previous_include_coverage() {
        let (mut c, _) = controller();
        assert!(!c.previous_include_coverage());
        c.start_at(RunScope::All, true, Instant::now()).unwrap();
        assert!(c.previous_include_coverage());
    }
}
