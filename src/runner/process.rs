//! Headless runner backed by an external command
//!
//! Each dispatch spawns the configured command once. The run id, story ids
//! and coverage flag travel as environment variables; the command reports
//! results back through `storyrun report` (or the socket directly).

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::engine::run::RunId;

use super::{DispatchRequest, HeadlessRunner, RunnerExit};

pub const RUN_ID_VAR: &str = "STORYRUN_RUN_ID";
pub const STORY_IDS_VAR: &str = "STORYRUN_STORY_IDS";
pub const COVERAGE_VAR: &str = "STORYRUN_COVERAGE";

pub struct ProcessRunner {
    program: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
    exits: mpsc::UnboundedSender<RunnerExit>,
}

impl ProcessRunner {
    pub fn new(
        program: PathBuf,
        args: Vec<String>,
        env: HashMap<String, String>,
        exits: mpsc::UnboundedSender<RunnerExit>,
    ) -> Self {
        Self {
            program,
            args,
            env,
            exits,
        }
    }

    /// Build from the `[runner]` section, resolving the command on PATH
    pub fn from_config(config: &Config, exits: mpsc::UnboundedSender<RunnerExit>) -> Result<Self> {
        let program = config.runner_path()?;
        Ok(Self::new(
            program,
            config.runner.args.clone(),
            config.runner.env.clone(),
            exits,
        ))
    }
}

impl HeadlessRunner for ProcessRunner {
    fn dispatch(&mut self, request: &DispatchRequest) -> Result<()> {
        let story_ids = request
            .story_ids
            .iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .env(RUN_ID_VAR, request.run_id.to_string())
            .env(STORY_IDS_VAR, story_ids)
            .env(COVERAGE_VAR, if request.include_coverage { "1" } else { "0" })
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            Error::RunnerStartFailed(format!("Failed to start {}: {}", self.program.display(), e))
        })?;

        tracing::info!(
            run_id = %request.run_id,
            stories = request.story_ids.len(),
            pid = child.id(),
            "Dispatched run to headless runner"
        );

        let run_id = request.run_id;
        let exits = self.exits.clone();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        tokio::spawn(async move {
            if let Some(stdout) = stdout {
                tokio::spawn(forward_output(run_id, "stdout", stdout));
            }
            if let Some(stderr) = stderr {
                tokio::spawn(forward_output(run_id, "stderr", stderr));
            }

            let exit = match child.wait().await {
                Ok(status) => RunnerExit {
                    run_id,
                    success: status.success(),
                    code: status.code(),
                },
                Err(e) => {
                    tracing::warn!(%run_id, error = %e, "Failed to wait for headless runner");
                    RunnerExit {
                        run_id,
                        success: false,
                        code: None,
                    }
                }
            };
            tracing::debug!(%run_id, success = exit.success, code = ?exit.code, "Headless runner exited");
            // The daemon may already be gone
            let _ = exits.send(exit);
        });

        Ok(())
    }
}

async fn forward_output<R: AsyncRead + Unpin>(run_id: RunId, stream: &'static str, reader: R) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(%run_id, stream, "{}", line);
    }
}
