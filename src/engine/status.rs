//! Per-environment test statuses and the derived story status

use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::run::RunId;

/// Where a result was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Headless runner, dispatched by the controller
    Cli,
    /// In-page runtime, reports on its own schedule
    Browser,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "cli"),
            Self::Browser => write!(f, "browser"),
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cli" | "headless" => Ok(Self::Cli),
            "browser" => Ok(Self::Browser),
            other => Err(format!("unknown environment '{}'. Expected cli or browser", other)),
        }
    }
}

/// Status of one story in one environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Errored,
}

impl TestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Errored)
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Errored)
    }

    /// Progress toward a terminal status; slots may only move up
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Passed | Self::Failed | Self::Errored => 2,
        }
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

impl FromStr for TestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "passed" | "success" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            "errored" | "error" => Ok(Self::Errored),
            other => Err(format!("unknown test status '{}'", other)),
        }
    }
}

/// One environment's latest result for a story
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSlot {
    pub environment: Environment,
    pub status: TestStatus,
    pub run_id: RunId,
    pub reported_at: Instant,
}

/// Both environments' slots for one story
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoryResult {
    pub cli: Option<ResultSlot>,
    pub browser: Option<ResultSlot>,
}

impl StoryResult {
    pub fn slot(&self, environment: Environment) -> Option<&ResultSlot> {
        match environment {
            Environment::Cli => self.cli.as_ref(),
            Environment::Browser => self.browser.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, environment: Environment) -> &mut Option<ResultSlot> {
        match environment {
            Environment::Cli => &mut self.cli,
            Environment::Browser => &mut self.browser,
        }
    }

    pub fn cli_status(&self) -> Option<TestStatus> {
        self.cli.as_ref().map(|s| s.status)
    }

    pub fn browser_status(&self) -> Option<TestStatus> {
        self.browser.as_ref().map(|s| s.status)
    }

    /// The mandatory (headless) slot has a final status
    pub fn cli_terminal(&self) -> bool {
        self.cli_status().is_some_and(TestStatus::is_terminal)
    }

    /// Both environments have a final status
    pub fn both_terminal(&self) -> bool {
        self.cli_terminal() && self.browser_status().is_some_and(TestStatus::is_terminal)
    }

    /// CLI passed and the browser result is still outstanding
    ///
    /// The grace period only covers a browser that has not reported at all;
    /// once it has started, its final status is waited for.
    pub fn awaiting_browser(&self, now: Instant, grace: Duration) -> bool {
        match (&self.cli, self.browser_status()) {
            (Some(cli), None) if cli.status == TestStatus::Passed => {
                now.saturating_duration_since(cli.reported_at) < grace
            }
            (Some(cli), Some(browser)) if cli.status == TestStatus::Passed => {
                !browser.is_terminal()
            }
            _ => false,
        }
    }

    /// Derived story status
    ///
    /// A failure on either side is final as soon as it arrives. A CLI pass
    /// counts once the browser also passed, or once the grace period runs
    /// out without any browser report.
    pub fn aggregate(&self, now: Instant, grace: Duration) -> TestStatus {
        let cli = self.cli_status().unwrap_or(TestStatus::Pending);
        let browser = self.browser_status();

        if cli.is_failure() {
            return cli;
        }
        if let Some(b) = browser.filter(|b| b.is_failure()) {
            return b;
        }
        if !cli.is_terminal() {
            return cli;
        }
        if self.awaiting_browser(now, grace) {
            return TestStatus::Running;
        }
        TestStatus::Passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(environment: Environment, status: TestStatus, at: Instant) -> Option<ResultSlot> {
        Some(ResultSlot {
            environment,
            status,
            run_id: RunId(1),
            reported_at: at,
        })
    }

    #[test]
    fn test_both_passed_is_passed() {
        let now = Instant::now();
        let result = StoryResult {
            cli: slot(Environment::Cli, TestStatus::Passed, now),
            browser: slot(Environment::Browser, TestStatus::Passed, now),
        };
        assert_eq!(result.aggregate(now, Duration::from_secs(5)), TestStatus::Passed);
    }

    #[test]
    fn test_any_failure_is_not_passed() {
        let now = Instant::now();
        let grace = Duration::ZERO;
        for (cli, browser) in [
            (TestStatus::Passed, TestStatus::Failed),
            (TestStatus::Failed, TestStatus::Passed),
            (TestStatus::Passed, TestStatus::Errored),
            (TestStatus::Errored, TestStatus::Running),
        ] {
            let result = StoryResult {
                cli: slot(Environment::Cli, cli, now),
                browser: slot(Environment::Browser, browser, now),
            };
            let status = result.aggregate(now, grace);
            assert!(status.is_failure(), "{cli}/{browser} aggregated to {status}");
        }
    }

    #[test]
    fn test_cli_only_waits_for_grace() {
        let t0 = Instant::now();
        let grace = Duration::from_millis(500);
        let result = StoryResult {
            cli: slot(Environment::Cli, TestStatus::Passed, t0),
            browser: None,
        };
        assert_eq!(result.aggregate(t0, grace), TestStatus::Running);
        assert_eq!(
            result.aggregate(t0 + Duration::from_millis(500), grace),
            TestStatus::Passed
        );
    }

    #[test]
    fn test_started_browser_outlasts_grace() {
        let t0 = Instant::now();
        let grace = Duration::from_millis(500);
        let mut result = StoryResult {
            cli: slot(Environment::Cli, TestStatus::Passed, t0),
            browser: slot(Environment::Browser, TestStatus::Running, t0),
        };
        let late = t0 + Duration::from_secs(10);
        assert!(result.awaiting_browser(late, grace));
        assert_eq!(result.aggregate(late, grace), TestStatus::Running);

        result.browser = slot(Environment::Browser, TestStatus::Passed, late);
        assert!(!result.awaiting_browser(late, grace));
        assert_eq!(result.aggregate(late, grace), TestStatus::Passed);
    }

    #[test]
    fn test_cli_not_terminal() {
        let now = Instant::now();
        let result = StoryResult {
            cli: slot(Environment::Cli, TestStatus::Running, now),
            browser: slot(Environment::Browser, TestStatus::Passed, now),
        };
        assert_eq!(result.aggregate(now, Duration::ZERO), TestStatus::Running);
        assert_eq!(StoryResult::default().aggregate(now, Duration::ZERO), TestStatus::Pending);
    }

    #[test]
    fn test_parse_status_aliases() {
        assert_eq!("success".parse::<TestStatus>().unwrap(), TestStatus::Passed);
        assert_eq!("error".parse::<TestStatus>().unwrap(), TestStatus::Errored);
        assert!("flaky".parse::<TestStatus>().is_err());
        assert_eq!("headless".parse::<Environment>().unwrap(), Environment::Cli);
    }
}
