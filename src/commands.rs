//! CLI command definitions
//!
//! Defines the clap commands for the storyrun CLI.

use clap::Subcommand;
use std::path::PathBuf;

use crate::engine::status::{Environment, TestStatus};

#[derive(Subcommand)]
pub enum Commands {
    /// Start a test run (all stories unless a scope is given)
    Run {
        /// Run a single story
        #[arg(long, conflicts_with_all = ["component", "group"])]
        story: Option<String>,

        /// Run every story of a component
        #[arg(long, conflicts_with = "group")]
        component: Option<String>,

        /// Run every story of a group
        #[arg(long)]
        group: Option<String>,

        /// Collect coverage during the run
        #[arg(long, conflicts_with = "no_coverage")]
        coverage: bool,

        /// Skip coverage even if enabled in the config
        #[arg(long)]
        no_coverage: bool,
    },

    /// Report a story result (used by runner scripts and browser bridges)
    Report {
        /// Run the result belongs to
        #[arg(long)]
        run: u64,

        /// Story id
        #[arg(long)]
        story: String,

        /// Environment that produced the result: cli or browser
        #[arg(long, default_value = "cli")]
        env: Environment,

        /// pending, running, passed, failed or errored
        #[arg(long)]
        status: TestStatus,

        /// Time the test took
        #[arg(long)]
        duration_ms: Option<u64>,
    },

    /// Report coverage for a run from a JSON file
    Coverage {
        /// Run the coverage belongs to
        #[arg(long)]
        run: u64,

        /// JSON file: { "files": { "<path>": { "covered": N, "total": M } } }
        file: PathBuf,
    },

    /// Show run state and per-story results
    Status {
        /// Only list stories with failures or errors
        #[arg(long)]
        errors: bool,

        /// Print the raw JSON snapshot
        #[arg(long)]
        json: bool,
    },

    /// Watch mode: re-run everything when sources change
    #[command(subcommand)]
    Watch(WatchCommands),

    /// Signal a source change (for file watchers and build hooks)
    Changed,

    /// Stream status updates until interrupted
    Follow,

    /// Stop the daemon
    Stop,

    /// View daemon logs
    Logs {
        /// Number of lines to show (default: 50)
        #[arg(long, short = 'n', default_value = "50")]
        lines: usize,

        /// Follow log output (like tail -f)
        #[arg(long, short)]
        follow: bool,

        /// Clear the log file
        #[arg(long)]
        clear: bool,
    },

    /// [Hidden] Run in daemon mode - spawned automatically
    #[command(hide = true)]
    Daemon,

    /// Run a YAML scenario against an in-process engine
    Test {
        /// Path to the YAML test scenario file
        path: PathBuf,

        /// Verbose output
        #[arg(long, short)]
        verbose: bool,
    },
}

#[derive(Subcommand)]
pub enum WatchCommands {
    /// Turn watch mode on
    On,
    /// Turn watch mode off
    Off,
}
