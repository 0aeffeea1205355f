//! Disagreement between the headless runner and the browser

use serde::{Deserialize, Serialize};

use super::status::TestStatus;
use super::tree::StoryId;

/// Shown when the headless runner passed and the browser did not
pub const CLI_PASSED_BROWSER_FAILED: &str =
    "This component test passed in CLI, but the tests failed in this browser.";

/// Shown when the browser passed and the headless runner did not
pub const BROWSER_PASSED_CLI_FAILED: &str =
    "This component test passed in this browser, but the tests failed in CLI.";

/// Two environments reached different final statuses for one story
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscrepancyRecord {
    pub story_id: StoryId,
    pub cli_status: TestStatus,
    pub browser_status: TestStatus,
    pub message: String,
}

/// Compare both environments' statuses
///
/// Only final statuses are compared; anything still pending or running
/// yields no record.
pub fn detect(
    story_id: &StoryId,
    cli: Option<TestStatus>,
    browser: Option<TestStatus>,
) -> Option<DiscrepancyRecord> {
    let (cli, browser) = (cli?, browser?);
    if !cli.is_terminal() || !browser.is_terminal() || cli == browser {
        return None;
    }

    let message = match (cli, browser) {
        (TestStatus::Passed, _) => CLI_PASSED_BROWSER_FAILED.to_string(),
        (_, TestStatus::Passed) => BROWSER_PASSED_CLI_FAILED.to_string(),
        (cli, browser) => format!(
            "This component test {} in CLI, but {} in this browser.",
            outcome_verb(cli),
            outcome_verb(browser)
        ),
    };

    Some(DiscrepancyRecord {
        story_id: story_id.clone(),
        cli_status: cli,
        browser_status: browser,
        message,
    })
}

fn outcome_verb(status: TestStatus) -> &'static str {
    match status {
        TestStatus::Errored => "errored",
        _ => "failed",
    }
}
