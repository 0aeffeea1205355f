//! Error types for storyrun
//!
//! Error messages are written for the person (or agent) driving test runs,
//! with a hint on how to recover where one exists.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for storyrun
#[derive(Error, Debug)]
pub enum Error {
    // === Daemon/Connection Errors ===
    #[error("Daemon not running. Start a run with 'storyrun run' to spawn it")]
    DaemonNotRunning,

    #[error("Failed to spawn daemon: timed out waiting for socket after {0} seconds")]
    DaemonSpawnTimeout(u64),

    #[error("Failed to connect to daemon: {0}")]
    DaemonConnectionFailed(#[source] io::Error),

    #[error("Daemon communication error: {0}")]
    DaemonCommunication(String),

    // === Scope Errors ===
    #[error("Unknown {kind} '{id}'. Check the story index for valid ids")]
    UnknownNode { kind: String, id: String },

    #[error("Nothing to test: {scope} contains no testable stories")]
    NotTestable { scope: String },

    #[error("Run {run_id} is already testing {overlap} of the requested stories. Wait for it to finish or run all tests")]
    ScopeConflict { run_id: u64, overlap: usize },

    #[error("Run {0} not found")]
    RunNotFound(u64),

    // === Runner Errors ===
    #[error("Test runner '{name}' not found. Searched: {searched}")]
    RunnerNotFound { name: String, searched: String },

    #[error("Test runner failed to start: {0}")]
    RunnerStartFailed(String),

    // === Index Errors ===
    #[error("Invalid story index '{path}': {reason}")]
    IndexParse { path: String, reason: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Test Errors ===
    #[error("Test assertion failed: {0}")]
    TestAssertion(String),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an unknown node error
    pub fn unknown_node(kind: &str, id: &str) -> Self {
        Self::UnknownNode {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    /// Create a not-testable error for a scope description
    pub fn not_testable(scope: impl std::fmt::Display) -> Self {
        Self::NotTestable {
            scope: scope.to_string(),
        }
    }

    /// Create a runner not found error with search paths
    pub fn runner_not_found<S: AsRef<str>>(name: &str, paths: &[S]) -> Self {
        Self::RunnerNotFound {
            name: name.to_string(),
            searched: paths.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(", "),
        }
    }

    /// Create an index parse error
    pub fn index_parse(path: &str, reason: impl std::fmt::Display) -> Self {
        Self::IndexParse {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// IPC-serializable error for daemon responses
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IpcError {
    pub code: String,
    pub message: String,
}

impl From<&Error> for IpcError {
    fn from(e: &Error) -> Self {
        let code = match e {
            Error::DaemonNotRunning => "DAEMON_NOT_RUNNING",
            Error::UnknownNode { .. } => "UNKNOWN_NODE",
            Error::NotTestable { .. } => "NOT_TESTABLE",
            Error::ScopeConflict { .. } => "SCOPE_CONFLICT",
            Error::RunNotFound(_) => "RUN_NOT_FOUND",
            Error::RunnerNotFound { .. } => "RUNNER_NOT_FOUND",
            Error::RunnerStartFailed(_) => "RUNNER_START_FAILED",
            Error::IndexParse { .. } => "INDEX_PARSE",
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG",
            _ => "INTERNAL_ERROR",
        }
        .to_string();

        Self {
            code,
            message: e.to_string(),
        }
    }
}

impl From<IpcError> for Error {
    fn from(e: IpcError) -> Self {
        // Only structured variants without payload survive the round trip;
        // everything else keeps the daemon's message verbatim
        match e.code.as_str() {
            "DAEMON_NOT_RUNNING" => Error::DaemonNotRunning,
            "CONFIG" => Error::Config(e.message),
            _ => Error::DaemonCommunication(e.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipc_error_codes() {
        let err = Error::unknown_node("component", "nope");
        assert_eq!(IpcError::from(&err).code, "UNKNOWN_NODE");

        let err = Error::ScopeConflict { run_id: 3, overlap: 2 };
        let ipc = IpcError::from(&err);
        assert_eq!(ipc.code, "SCOPE_CONFLICT");
        assert!(ipc.message.contains("Run 3"));
    }

    #[test]
    fn test_ipc_error_round_trip_keeps_message() {
        let ipc = IpcError::from(&Error::not_testable("story 'a--b'"));
        match Error::from(ipc) {
            Error::DaemonCommunication(msg) => assert!(msg.contains("no testable stories")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
