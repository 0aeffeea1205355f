//! CLI command handling
//!
//! Dispatches CLI commands to the daemon and formats output.

mod spawn;

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;

use crate::commands::{Commands, WatchCommands};
use crate::common::{logging, Error, Result};
use crate::engine::controller::{ControllerEvent, ReportOutcome, ResultReport};
use crate::engine::coverage::CoverageData;
use crate::engine::snapshot::{GroupStatus, StatusSnapshot};
use crate::engine::status::TestStatus;
use crate::engine::tree::{ComponentId, GroupId, StoryId};
use crate::engine::{RunId, RunScope};
use crate::ipc::protocol::Command;
use crate::ipc::DaemonClient;
use crate::testing;

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Daemon => Err(Error::Internal(
            "daemon mode is started from main".to_string(),
        )),

        Commands::Run {
            story,
            component,
            group,
            coverage,
            no_coverage,
        } => {
            let scope = scope_from_flags(story, component, group);
            let include_coverage = match (coverage, no_coverage) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };

            let mut client = spawn::connect_or_spawn().await?;
            let result = client
                .send_command(Command::StartRun {
                    scope,
                    include_coverage,
                })
                .await?;

            println!(
                "Started run {} for {} ({} stories{})",
                result["run_id"],
                result["scope"].as_str().unwrap_or("?"),
                result["stories"],
                if result["include_coverage"].as_bool() == Some(true) {
                    ", with coverage"
                } else {
                    ""
                }
            );
            println!("Use 'storyrun status' or 'storyrun follow' to see results.");

            Ok(())
        }

        Commands::Report {
            run,
            story,
            env,
            status,
            duration_ms,
        } => {
            let mut client = DaemonClient::connect().await?;
            let result = client
                .send_command(Command::ReportResult(ResultReport {
                    run_id: RunId(run),
                    story_id: StoryId::new(story.clone()),
                    environment: env,
                    status,
                    duration_ms,
                    coverage: None,
                }))
                .await?;

            let outcome: ReportOutcome = serde_json::from_value(result)?;
            match outcome {
                ReportOutcome::Accepted { status, discrepancy } => {
                    println!("{}: {}", story, status);
                    if let Some(record) = discrepancy {
                        println!("  {}", record.message);
                    }
                }
                ReportOutcome::Stale { owner } => match owner {
                    Some(owner) => println!("Ignored: {} now belongs to run {}", story, owner),
                    None => println!("Ignored: {} is not part of any run", story),
                },
                ReportOutcome::Regressed { current } => {
                    println!("Ignored: {} is already {}", story, current)
                }
                ReportOutcome::UnknownStory => println!("Ignored: unknown story '{}'", story),
            }

            Ok(())
        }

        Commands::Coverage { run, file } => {
            let content = std::fs::read_to_string(&file).map_err(|e| Error::FileRead {
                path: file.display().to_string(),
                error: e.to_string(),
            })?;
            let coverage: CoverageData = serde_json::from_str(&content)?;
            let files = coverage.files.len();
            let overall = coverage.overall_percent();

            let mut client = DaemonClient::connect().await?;
            client
                .send_command(Command::ReportCoverage {
                    run_id: RunId(run),
                    coverage,
                })
                .await?;

            println!("Reported coverage for run {}: {} files, {}", run, files, overall);
            Ok(())
        }

        Commands::Status { errors, json } => {
            match DaemonClient::connect().await {
                Ok(mut client) => {
                    let result = client.send_command(Command::Status).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&result)?);
                    } else {
                        print_status(&result, errors)?;
                    }
                }
                Err(Error::DaemonNotRunning) => {
                    println!("Daemon: not running");
                    println!("Status: Not run");
                }
                Err(e) => return Err(e),
            }

            Ok(())
        }

        Commands::Watch(watch_cmd) => {
            let enabled = matches!(watch_cmd, WatchCommands::On);
            let mut client = spawn::connect_or_spawn().await?;
            client.send_command(Command::SetWatch { enabled }).await?;

            if enabled {
                println!("Watch mode on. Signal changes with 'storyrun changed'.");
            } else {
                println!("Watch mode off");
            }
            Ok(())
        }

        Commands::Changed => {
            let mut client = DaemonClient::connect().await?;
            let result = client.send_command(Command::SourceChanged).await?;

            if result["queued"].as_bool() == Some(true) {
                println!(
                    "Change noted ({} pending). A full run starts once changes settle.",
                    result["pending_changes"]
                );
            } else {
                println!("Watch mode is off, change ignored");
            }
            Ok(())
        }

        Commands::Follow => {
            let mut client = DaemonClient::connect().await?;
            let initial = client.subscribe().await?;
            if let Some(description) = initial["description"].as_str() {
                println!("{}", description);
            }

            while let Some(event) = client.next_event().await? {
                match event {
                    ControllerEvent::Snapshot(snapshot) => print_progress_line(&snapshot),
                    ControllerEvent::RunSuperseded {
                        run_id,
                        superseded_by,
                    } => println!("Run {} cancelled, superseded by run {}", run_id, superseded_by),
                }
            }

            println!("Daemon stopped");
            Ok(())
        }

        Commands::Stop => {
            match DaemonClient::connect().await {
                Ok(mut client) => {
                    client.send_command(Command::Shutdown).await?;
                    println!("Daemon stopped");
                }
                Err(Error::DaemonNotRunning) => println!("Daemon is not running"),
                Err(e) => return Err(e),
            }
            Ok(())
        }

        Commands::Logs {
            lines,
            follow,
            clear,
        } => show_logs(lines, follow, clear).await,

        Commands::Test { path, verbose } => {
            let result = testing::run_scenario(&path, verbose)?;
            if result.passed {
                Ok(())
            } else {
                Err(Error::TestAssertion(format!(
                    "scenario '{}' failed after {}/{} steps",
                    result.name, result.steps_run, result.steps_total
                )))
            }
        }
    }
}

/// Scope named by the `run` flags; no flag means every story
pub fn scope_from_flags(
    story: Option<String>,
    component: Option<String>,
    group: Option<String>,
) -> RunScope {
    if let Some(id) = story {
        RunScope::Story(StoryId::new(id))
    } else if let Some(id) = component {
        RunScope::Component(ComponentId::new(id))
    } else if let Some(id) = group {
        RunScope::Group(GroupId::new(id))
    } else {
        RunScope::All
    }
}

fn status_symbol(status: TestStatus) -> &'static str {
    match status {
        TestStatus::Pending => "·",
        TestStatus::Running => "…",
        TestStatus::Passed => "✓",
        TestStatus::Failed => "✗",
        TestStatus::Errored => "!",
    }
}

fn print_status(result: &serde_json::Value, errors_only: bool) -> Result<()> {
    let snapshot: StatusSnapshot = serde_json::from_value(result["snapshot"].clone())?;
    let tree: Vec<GroupStatus> = serde_json::from_value(result["tree"].clone())?;

    println!("Daemon: running");
    println!("State: {}", snapshot.lifecycle);
    println!("Status: {}", snapshot.description());
    println!(
        "Watch: {}",
        if result["watch"]["enabled"].as_bool() == Some(true) {
            "on"
        } else {
            "off"
        }
    );

    if errors_only {
        let failing = snapshot.failing_stories();
        if failing.is_empty() {
            println!("\nNo stories with errors");
        } else {
            println!("\nStories with errors:");
            for id in failing {
                if let Some(view) = snapshot.stories.get(id) {
                    println!("  {} {}  {}", status_symbol(view.status), id, view.status);
                }
            }
        }
    } else {
        for group in &tree {
            println!("\n{} ({})", group.title, group.counts);
            for component in &group.components {
                println!("  {} ({})", component.title, component.counts);
                for story in &component.stories {
                    println!("    {} {}", status_symbol(story.status), story.name);
                }
            }
        }
    }

    if !snapshot.discrepancies.is_empty() {
        println!("\nDiscrepancies:");
        for record in &snapshot.discrepancies {
            println!("  {}: {}", record.story_id, record.message);
        }
    }

    if let Some(coverage) = &snapshot.coverage {
        println!(
            "\nCoverage: {} (run {})",
            coverage.overall_percent, coverage.covered_run_id
        );
    }
    if let Some(info) = &snapshot.informational_coverage {
        println!(
            "Focused run coverage: {} (run {}, not saved)",
            info.overall_percent, info.covered_run_id
        );
    }

    Ok(())
}

fn print_progress_line(snapshot: &StatusSnapshot) {
    let failing = snapshot.counts.failing();
    if failing > 0 {
        println!(
            "[{}] {} ({} failing)",
            snapshot.lifecycle,
            snapshot.description(),
            failing
        );
    } else {
        println!("[{}] {}", snapshot.lifecycle, snapshot.description());
    }
}

async fn show_logs(lines: usize, follow: bool, clear: bool) -> Result<()> {
    let path = logging::daemon_log_path()
        .ok_or_else(|| Error::Config("could not determine the log directory".to_string()))?;

    if clear {
        logging::truncate_daemon_log()?;
        println!("Log cleared: {}", path.display());
        return Ok(());
    }

    if !path.exists() {
        println!("No daemon log yet at {}", path.display());
        return Ok(());
    }

    let content = std::fs::read_to_string(&path)?;
    for line in tail_lines(&content, lines) {
        println!("{}", line);
    }

    if follow {
        follow_file(&path, content.len() as u64).await?;
    }
    Ok(())
}

/// Last `n` lines of `content`
fn tail_lines(content: &str, n: usize) -> Vec<&str> {
    let all: Vec<&str> = content.lines().collect();
    all[all.len().saturating_sub(n)..].to_vec()
}

async fn follow_file(path: &Path, mut offset: u64) -> Result<()> {
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;

        let mut file = std::fs::File::open(path)?;
        let len = file.metadata()?.len();
        if len < offset {
            // Truncated by --clear
            offset = 0;
        }
        if len == offset {
            continue;
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut chunk = String::new();
        file.read_to_string(&mut chunk)?;
        offset = len;
        print!("{}", chunk);
    }
}
