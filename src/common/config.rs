//! Configuration file handling

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Story index location
    #[serde(default)]
    pub index: IndexConfig,

    /// Headless runner settings
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Watch mode settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Result reconciliation timing
    #[serde(default)]
    pub results: ResultsConfig,

    /// Coverage collection settings
    #[serde(default)]
    pub coverage: CoverageConfig,

    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Where the story index is read from
#[derive(Debug, Deserialize)]
pub struct IndexConfig {
    /// Path to a Storybook-style `index.json`
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("storybook-static/index.json")
}

/// Headless runner command
#[derive(Debug, Deserialize, Clone)]
pub struct RunnerConfig {
    /// Executable name or path
    #[serde(default = "default_runner_command")]
    pub command: String,

    /// Arguments passed before anything the runner adds
    #[serde(default = "default_runner_args")]
    pub args: Vec<String>,

    /// Extra environment variables for the runner process
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: default_runner_command(),
            args: default_runner_args(),
            env: HashMap::new(),
        }
    }
}

fn default_runner_command() -> String {
    "npx".to_string()
}

fn default_runner_args() -> Vec<String> {
    vec!["vitest".to_string(), "run".to_string()]
}

/// Watch mode settings
#[derive(Debug, Deserialize)]
pub struct WatchConfig {
    /// Quiet interval after the last change before a run starts
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce(),
        }
    }
}

fn default_debounce() -> u64 {
    500
}

/// Timing for result reconciliation
#[derive(Debug, Deserialize)]
pub struct ResultsConfig {
    /// How long to wait for a browser result once the CLI result is in
    #[serde(default = "default_browser_grace")]
    pub browser_grace_ms: u64,

    /// How long a completed run is shown before the controller goes idle
    #[serde(default = "default_completed_dwell")]
    pub completed_dwell_ms: u64,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            browser_grace_ms: default_browser_grace(),
            completed_dwell_ms: default_completed_dwell(),
        }
    }
}

fn default_browser_grace() -> u64 {
    2_000
}
fn default_completed_dwell() -> u64 {
    5_000
}

/// Coverage settings
#[derive(Debug, Deserialize, Default)]
pub struct CoverageConfig {
    /// Collect coverage for runs that don't say otherwise
    #[serde(default)]
    pub enabled: bool,
}

/// Daemon configuration
#[derive(Debug, Deserialize)]
pub struct DaemonConfig {
    /// Auto-exit after this many minutes without activity or active runs
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_minutes: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: default_idle_timeout(),
        }
    }
}

fn default_idle_timeout() -> u64 {
    30
}

impl ResultsConfig {
    pub fn browser_grace(&self) -> Duration {
        Duration::from_millis(self.browser_grace_ms)
    }

    pub fn completed_dwell(&self) -> Duration {
        Duration::from_millis(self.completed_dwell_ms)
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Resolve the runner executable
    ///
    /// Explicit paths are used as-is; bare names are looked up in PATH
    pub fn runner_path(&self) -> Result<PathBuf> {
        let command = Path::new(&self.runner.command);
        if command.components().count() > 1 {
            return Ok(command.to_path_buf());
        }

        which::which(&self.runner.command)
            .map_err(|_| super::Error::runner_not_found(&self.runner.command, &["PATH"]))
    }
}
