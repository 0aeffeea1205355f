//! Command handler for processing IPC requests
//!
//! Translates IPC commands into run controller and watch operations. Runs on
//! the daemon's single writer loop, so nothing here needs locking.

use std::time::Instant;

use serde_json::json;

use crate::common::{error::IpcError, Result};
use crate::engine::snapshot::status_tree;
use crate::engine::{RunController, WatchController};
use crate::ipc::protocol::{Command, Response};

/// Everything the daemon mutates in response to requests
pub struct DaemonState {
    pub controller: RunController,
    pub watch: WatchController,
}

impl DaemonState {
    pub fn new(controller: RunController, watch: WatchController) -> Self {
        Self { controller, watch }
    }

    /// Drive grace, dwell and debounce timers
    pub fn tick(&mut self, now: Instant) {
        self.controller.tick(now);
        if let Err(e) = self.watch.poll(&mut self.controller, now) {
            tracing::warn!(error = %e, "Watch mode could not start a run");
        }
    }

    /// Nothing running, watching or listening
    pub fn is_quiet(&self) -> bool {
        !self.controller.has_active_runs()
            && !self.watch.is_enabled()
            && self.controller.subscriber_count() == 0
    }

    /// Status payload shared by `status` and `subscribe`
    pub fn status(&self, now: Instant) -> serde_json::Value {
        let snapshot = self.controller.snapshot(now);
        let tree = status_tree(self.controller.tree(), &snapshot);
        json!({
            "description": snapshot.description(),
            "watch": {
                "enabled": self.watch.is_enabled(),
                "pending_changes": self.watch.pending_changes(),
            },
            "snapshot": snapshot,
            "tree": tree,
        })
    }
}

/// Handle an IPC command
pub fn handle_command(state: &mut DaemonState, id: u64, command: Command, now: Instant) -> Response {
    match handle_command_inner(state, command, now) {
        Ok(result) => Response::success(id, result),
        Err(e) => Response::error(id, IpcError::from(&e)),
    }
}

fn handle_command_inner(
    state: &mut DaemonState,
    command: Command,
    now: Instant,
) -> Result<serde_json::Value> {
    match command {
        // === Runs ===
        Command::StartRun {
            scope,
            include_coverage,
        } => {
            let include_coverage =
                include_coverage.unwrap_or(state.controller.settings().default_coverage);
            let run_id = state.controller.start_at(scope.clone(), include_coverage, now)?;
            let stories = state
                .controller
                .run(run_id)
                .map(|r| r.story_ids.len())
                .unwrap_or(0);

            Ok(json!({
                "run_id": run_id,
                "scope": scope.to_string(),
                "stories": stories,
                "include_coverage": include_coverage,
            }))
        }

        Command::ReportResult(report) => {
            let outcome = state.controller.report_result_at(report, now);
            Ok(serde_json::to_value(outcome)?)
        }

        Command::ReportCoverage { run_id, coverage } => {
            state.controller.report_coverage_at(run_id, coverage, now)?;
            Ok(json!({ "run_id": run_id }))
        }

        Command::Status => Ok(state.status(now)),

        // === Watch mode ===
        Command::SetWatch { enabled } => {
            state.watch.set_enabled(enabled);
            Ok(json!({ "watch": enabled }))
        }

        Command::SourceChanged => {
            let queued = state.watch.notify(now);
            Ok(json!({
                "queued": queued,
                "pending_changes": state.watch.pending_changes(),
            }))
        }

        // Connection-level commands are answered by the server
        Command::Subscribe | Command::Shutdown => Err(crate::common::Error::Internal(format!(
            "'{}' must be handled by the server loop",
            command.name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::engine::controller::{ControllerSettings, ResultReport};
    use crate::engine::scope::RunScope;
    use crate::engine::status::{Environment, TestStatus};
    use crate::engine::tree::{ComponentId, StoryId, StoryTree};
    use crate::runner::RecordingRunner;

    fn state() -> DaemonState {
        let tree = StoryTree::builder()
            .story("button--primary", "Button", "Primary")
            .story("button--ghost", "Button", "Ghost")
            .build();
        let controller = RunController::new(
            tree,
            Box::new(RecordingRunner::new()),
            ControllerSettings::default(),
        );
        DaemonState::new(controller, WatchController::new(Duration::from_millis(50)))
    }

    #[test]
    fn test_start_and_report() {
        let mut state = state();
        let now = Instant::now();
        let response = handle_command(
            &mut state,
            1,
            Command::StartRun {
                scope: RunScope::Component(ComponentId::from("button")),
                include_coverage: None,
            },
            now,
        );
        assert!(response.success);
        let result = response.result.unwrap();
        assert_eq!(result["run_id"], 1);
        assert_eq!(result["stories"], 2);
        assert_eq!(result["include_coverage"], false);

        let response = handle_command(
            &mut state,
            2,
            Command::ReportResult(ResultReport {
                run_id: crate::engine::RunId(1),
                story_id: StoryId::from("button--ghost"),
                environment: Environment::Cli,
                status: TestStatus::Failed,
                duration_ms: Some(5),
                coverage: None,
            }),
            now,
        );
        assert_eq!(response.result.unwrap()["outcome"], "accepted");

        let status = handle_command(&mut state, 3, Command::Status, now).result.unwrap();
        assert_eq!(status["snapshot"]["counts"]["failed"], 1);
        assert_eq!(status["tree"][0]["components"][0]["stories"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_errors_carry_codes() {
        let mut state = state();
        let response = handle_command(
            &mut state,
            9,
            Command::StartRun {
                scope: RunScope::Story(StoryId::from("missing")),
                include_coverage: Some(false),
            },
            Instant::now(),
        );
        assert!(!response.success);
        assert_eq!(response.id, 9);
        assert_eq!(response.error.unwrap().code, "UNKNOWN_NODE");
    }

    #[test]
    fn test_watch_commands_drive_runs() {
        let mut state = state();
        let t0 = Instant::now();
        handle_command(&mut state, 1, Command::SetWatch { enabled: true }, t0);
        let response = handle_command(&mut state, 2, Command::SourceChanged, t0);
        assert_eq!(response.result.unwrap()["queued"], true);

        state.tick(t0 + Duration::from_millis(10));
        assert!(!state.controller.has_active_runs());
        state.tick(t0 + Duration::from_millis(60));
        assert!(state.controller.has_active_runs());
        assert!(!state.is_quiet());
    }
}
