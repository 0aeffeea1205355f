//! Watch mode: re-run everything after source changes settle

use std::time::{Duration, Instant};

use crate::common::Result;

use super::controller::RunController;
use super::run::RunId;
use super::scope::RunScope;

/// Trailing debounce in front of full runs
///
/// Each change pushes the deadline out by the quiet interval. When it passes
/// and no run is active, one full run starts for however many changes piled
/// up. While runs are active the pending change just waits.
#[derive(Debug)]
pub struct WatchController {
    enabled: bool,
    quiet: Duration,
    deadline: Option<Instant>,
    coalesced: usize,
}

impl WatchController {
    pub fn new(quiet: Duration) -> Self {
        Self {
            enabled: false,
            quiet,
            deadline: None,
            coalesced: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turning watch off forgets pending changes
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            tracing::info!(enabled, "Watch mode toggled");
        }
        self.enabled = enabled;
        if !enabled {
            self.deadline = None;
            self.coalesced = 0;
        }
    }

    /// Record a change; returns false when watch mode is off
    pub fn notify(&mut self, now: Instant) -> bool {
        if !self.enabled {
            tracing::debug!("Ignoring change, watch mode is off");
            return false;
        }
        self.deadline = Some(now + self.quiet);
        self.coalesced += 1;
        tracing::debug!(pending = self.coalesced, "Change noted");
        true
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Changes waiting for the next run
    pub fn pending_changes(&self) -> usize {
        self.coalesced
    }

    /// Start the coalesced run if it is due
    pub fn poll(&mut self, controller: &mut RunController, now: Instant) -> Result<Option<RunId>> {
        let Some(deadline) = self.deadline else {
            return Ok(None);
        };
        if now < deadline {
            return Ok(None);
        }
        if controller.has_active_runs() {
            return Ok(None);
        }

        let changes = std::mem::take(&mut self.coalesced);
        self.deadline = None;

        let include_coverage = controller.previous_include_coverage();
        let run_id = controller.start_at(RunScope::All, include_coverage, now)?;
        tracing::info!(%run_id, changes, include_coverage, "Watch mode started run");
        Ok(Some(run_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::controller::{ControllerSettings, ResultReport};
    use crate::engine::status::{Environment, TestStatus};
    use crate::engine::tree::{StoryId, StoryTree};
    use crate::runner::RecordingRunner;

    fn controller(runner: &RecordingRunner) -> RunController {
        let tree = StoryTree::builder().story("a--one", "A", "One").build();
        RunController::new(tree, Box::new(runner.clone()), ControllerSettings::default())
    }

    #[test]
    fn test_rapid_changes_coalesce() {
        let runner = RecordingRunner::new();
        let mut c = controller(&runner);
        let mut watch = WatchController::new(Duration::from_millis(500));
        watch.set_enabled(true);

        let t0 = Instant::now();
        for i in 0..10 {
            watch.notify(t0 + Duration::from_millis(i * 100));
        }
        assert_eq!(watch.poll(&mut c, t0 + Duration::from_millis(1000)).unwrap(), None);
        assert!(watch
            .poll(&mut c, t0 + Duration::from_millis(1400))
            .unwrap()
            .is_some());
        assert_eq!(watch.poll(&mut c, t0 + Duration::from_millis(5000)).unwrap(), None);
        assert_eq!(runner.dispatched().len(), 1);
    }

    #[test]
    fn test_change_waits_for_active_run() {
        let runner = RecordingRunner::new();
        let mut c = controller(&runner);
        let mut watch = WatchController::new(Duration::from_millis(100));
        watch.set_enabled(true);

        let t0 = Instant::now();
        let first = c.start_at(RunScope::All, true, t0).unwrap();
        watch.notify(t0);
        watch.notify(t0 + Duration::from_millis(10));

        let later = t0 + Duration::from_millis(500);
        assert_eq!(watch.poll(&mut c, later).unwrap(), None);
        assert!(watch.is_pending());

        c.report_result_at(
            ResultReport {
                run_id: first,
                story_id: StoryId::from("a--one"),
                environment: Environment::Cli,
                status: TestStatus::Passed,
                duration_ms: Some(12),
                coverage: None,
            },
            later,
        );
        let second = watch.poll(&mut c, later).unwrap().unwrap();
        assert!(second > first);
        assert!(c.run(second).unwrap().include_coverage);
        assert_eq!(runner.dispatched().len(), 2);
    }

    #[test]
    fn test_disabled_ignores_changes() {
        let runner = RecordingRunner::new();
        let mut c = controller(&runner);
        let mut watch = WatchController::new(Duration::ZERO);

        assert!(!watch.notify(Instant::now()));
        assert_eq!(watch.poll(&mut c, Instant::now()).unwrap(), None);

        watch.set_enabled(true);
        watch.notify(Instant::now());
        watch.set_enabled(false);
        assert!(!watch.is_pending());
        assert!(runner.dispatched().is_empty());
    }
}
