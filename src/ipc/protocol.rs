//! IPC protocol message types
//!
//! Requests and responses are length-prefixed JSON frames. After a
//! `Subscribe` request the daemon keeps the connection open and pushes
//! [`ControllerEvent`] frames until either side hangs up.

use serde::{Deserialize, Serialize};

use crate::common::error::IpcError;
use crate::engine::controller::ResultReport;
use crate::engine::coverage::CoverageData;
use crate::engine::run::RunId;
use crate::engine::scope::RunScope;

pub use crate::engine::controller::ControllerEvent;

/// IPC request from a client to the daemon
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for matching responses
    pub id: u64,
    /// The command to execute
    pub command: Command,
}

/// IPC response from the daemon
#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    /// Request ID this response corresponds to
    pub id: u64,
    /// Whether the command succeeded
    pub success: bool,
    /// Result data on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error information on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcError>,
}

impl Response {
    /// Create a success response
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: u64, error: IpcError) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(error),
        }
    }

    /// Create a success response with no data
    pub fn ok(id: u64) -> Self {
        Self::success(id, serde_json::json!({}))
    }
}

/// Commands a client (the CLI, a runner script, a browser bridge) can send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    // === Runs ===
    /// Start a run; without a coverage flag the configured default applies
    StartRun {
        scope: RunScope,
        #[serde(default)]
        include_coverage: Option<bool>,
    },

    /// Result for one story from either environment
    ReportResult(ResultReport),

    /// Coverage measured by the headless runner for a run
    ReportCoverage { run_id: RunId, coverage: CoverageData },

    /// Current snapshot and status tree
    Status,

    // === Watch mode ===
    /// Turn watch mode on or off
    SetWatch { enabled: bool },

    /// Something in the source changed
    SourceChanged,

    // === Daemon ===
    /// Stream controller events on this connection
    Subscribe,

    /// Shut down the daemon
    Shutdown,
}

impl Command {
    /// Name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartRun { .. } => "start_run",
            Self::ReportResult(_) => "report_result",
            Self::ReportCoverage { .. } => "report_coverage",
            Self::Status => "status",
            Self::SetWatch { .. } => "set_watch",
            Self::SourceChanged => "source_changed",
            Self::Subscribe => "subscribe",
            Self::Shutdown => "shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::status::{Environment, TestStatus};
    use crate::engine::tree::{ComponentId, StoryId};

    #[test]
    fn test_start_run_wire_format() {
        let json = serde_json::to_value(Command::StartRun {
            scope: RunScope::Component(ComponentId::from("button")),
            include_coverage: Some(true),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "start_run",
                "scope": { "kind": "component", "id": "button" },
                "include_coverage": true
            })
        );
    }

    #[test]
    fn test_report_from_runner_script() {
        // What a runner script writes by hand: no duration, no coverage
        let raw = r#"{
            "type": "report_result",
            "run_id": 3,
            "story_id": "button--primary",
            "environment": "browser",
            "status": "failed"
        }"#;
        let command: Command = serde_json::from_str(raw).unwrap();
        assert_eq!(
            command,
            Command::ReportResult(ResultReport {
                run_id: RunId(3),
                story_id: StoryId::from("button--primary"),
                environment: Environment::Browser,
                status: TestStatus::Failed,
                duration_ms: None,
                coverage: None,
            })
        );
    }

    #[test]
    fn test_start_run_coverage_defaults_to_none() {
        let command: Command =
            serde_json::from_str(r#"{"type":"start_run","scope":{"kind":"all"}}"#).unwrap();
        assert_eq!(
            command,
            Command::StartRun {
                scope: RunScope::All,
                include_coverage: None
            }
        );
    }

    #[test]
    fn test_error_response_omits_result() {
        let response = Response::error(
            7,
            IpcError {
                code: "NOT_TESTABLE".to_string(),
                message: "nothing to test".to_string(),
            },
        );
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("result").is_none());
        assert_eq!(json["error"]["code"], "NOT_TESTABLE");
    }
}
