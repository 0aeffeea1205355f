//! Observer-facing views of controller state

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::coverage::CoverageAggregate;
use super::discrepancy::DiscrepancyRecord;
use super::run::{RunId, RunState, RunSummary};
use super::status::TestStatus;
use super::tree::{ComponentId, GroupId, StoryId, StoryTree};

/// Controller-level lifecycle, derived from the runs it tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Idle,
    Queued,
    Running,
    Completed,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for Lifecycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown lifecycle state '{}'", other)),
        }
    }
}

/// One story's derived status plus the slots it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryView {
    pub status: TestStatus,
    pub cli: Option<TestStatus>,
    pub browser: Option<TestStatus>,
    pub run_id: RunId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: TestStatus) {
        match status {
            TestStatus::Pending => self.pending += 1,
            TestStatus::Running => self.running += 1,
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Errored => self.errored += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.passed + self.failed + self.errored
    }

    pub fn failing(&self) -> usize {
        self.failed + self.errored
    }
}

impl std::fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} passed, {} failed, {} errored, {} running, {} pending",
            self.passed, self.failed, self.errored, self.running, self.pending
        )
    }
}

/// Everything pushed to observers after a change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub lifecycle: Lifecycle,
    pub runs: Vec<RunSummary>,
    pub stories: BTreeMap<StoryId, StoryView>,
    pub discrepancies: Vec<DiscrepancyRecord>,
    pub coverage: Option<CoverageAggregate>,
    pub informational_coverage: Option<CoverageAggregate>,
    pub counts: StatusCounts,
}

impl StatusSnapshot {
    /// Stories whose derived status is a failure, in id order
    pub fn failing_stories(&self) -> Vec<&StoryId> {
        self.stories
            .iter()
            .filter(|(_, view)| view.status.is_failure())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn status_of(&self, story_id: &str) -> Option<TestStatus> {
        self.stories.get(story_id).map(|v| v.status)
    }

    /// One-line progress text
    pub fn description(&self) -> String {
        let active: Vec<&RunSummary> = self.runs.iter().filter(|r| r.state.is_active()).collect();
        if !active.is_empty() {
            let finished: usize = active.iter().map(|r| r.finished).sum();
            let total: usize = active.iter().map(|r| r.total).sum();
            return format!("Testing... {}/{}", finished, total);
        }

        let Some(last) = self
            .runs
            .iter()
            .filter(|r| r.state == RunState::Completed)
            .max_by_key(|r| r.id)
        else {
            return "Not run".to_string();
        };

        let mut text = format!("Ran {} {}", last.total, plural(last.total, "test", "tests"));
        // Only the run's own stories; a focused run says nothing about the rest
        let failing = self
            .stories
            .values()
            .filter(|view| view.run_id == last.id && view.status.is_failure())
            .count();
        if failing > 0 {
            text.push_str(&format!(
                ", {} {} with errors",
                failing,
                plural(failing, "story", "stories")
            ));
        }
        text
    }
}

fn plural<'a>(n: usize, one: &'a str, many: &'a str) -> &'a str {
    if n == 1 {
        one
    } else {
        many
    }
}

/// Group row of the status tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStatus {
    pub id: GroupId,
    pub title: String,
    pub counts: StatusCounts,
    pub components: Vec<ComponentStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub id: ComponentId,
    pub title: String,
    pub counts: StatusCounts,
    pub stories: Vec<StoryLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryLine {
    pub id: StoryId,
    pub name: String,
    pub status: TestStatus,
}

/// Roll a snapshot up into Group → Component → Story rows
///
/// Untestable stories are left out; stories never run show as pending.
pub fn status_tree(tree: &StoryTree, snapshot: &StatusSnapshot) -> Vec<GroupStatus> {
    let mut groups = Vec::new();
    for group in tree.groups() {
        let mut group_counts = StatusCounts::default();
        let mut components = Vec::new();

        for component in group.components.iter().filter_map(|c| tree.component(c.as_str())) {
            let mut counts = StatusCounts::default();
            let stories: Vec<StoryLine> = component
                .stories
                .iter()
                .filter_map(|id| tree.story(id.as_str()))
                .filter(|story| story.testable)
                .map(|story| {
                    let status = snapshot
                        .status_of(story.id.as_str())
                        .unwrap_or(TestStatus::Pending);
                    counts.add(status);
                    group_counts.add(status);
                    StoryLine {
                        id: story.id.clone(),
                        name: story.name.clone(),
                        status,
                    }
                })
                .collect();

            if !stories.is_empty() {
                components.push(ComponentStatus {
                    id: component.id.clone(),
                    title: component.title.clone(),
                    counts,
                    stories,
                });
            }
        }

        if !components.is_empty() {
            groups.push(GroupStatus {
                id: group.id.clone(),
                title: group.title.clone(),
                counts: group_counts,
                components,
            });
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scope::RunScope;

    fn view(status: TestStatus) -> StoryView {
        StoryView {
            status,
            cli: Some(status),
            browser: None,
            run_id: RunId(1),
        }
    }

    fn snapshot(stories: &[(&str, TestStatus)], runs: Vec<RunSummary>) -> StatusSnapshot {
        let mut counts = StatusCounts::default();
        let stories = stories
            .iter()
            .map(|(id, status)| {
                counts.add(*status);
                (StoryId::from(*id), view(*status))
            })
            .collect();
        StatusSnapshot {
            lifecycle: Lifecycle::Idle,
            runs,
            stories,
            discrepancies: Vec::new(),
            coverage: None,
            informational_coverage: None,
            counts,
        }
    }

    fn summary(state: RunState, total: usize, finished: usize) -> RunSummary {
        RunSummary {
            id: RunId(1),
            scope: RunScope::All,
            state,
            total,
            finished,
            include_coverage: false,
            duration_ms: None,
            superseded_by: None,
        }
    }

    #[test]
    fn test_failing_stories_is_error_filter() {
        let snap = snapshot(
            &[
                ("a", TestStatus::Passed),
                ("b", TestStatus::Failed),
                ("c", TestStatus::Errored),
                ("d", TestStatus::Running),
            ],
            Vec::new(),
        );
        let failing: Vec<&str> = snap.failing_stories().iter().map(|id| id.as_str()).collect();
        assert_eq!(failing, vec!["b", "c"]);
        assert_eq!(snap.counts.failing(), 2);
        assert_eq!(snap.counts.total(), 4);
    }

    #[test]
    fn test_description() {
        assert_eq!(snapshot(&[], Vec::new()).description(), "Not run");
        assert_eq!(
            snapshot(&[], vec![summary(RunState::Running, 5, 2)]).description(),
            "Testing... 2/5"
        );
        assert_eq!(
            snapshot(&[("a", TestStatus::Passed)], vec![summary(RunState::Completed, 1, 1)])
                .description(),
            "Ran 1 test"
        );
        assert_eq!(
            snapshot(
                &[("a", TestStatus::Passed), ("b", TestStatus::Failed)],
                vec![summary(RunState::Completed, 2, 2)]
            )
            .description(),
            "Ran 2 tests, 1 story with errors"
        );
    }

    #[test]
    fn test_description_counts_errors_of_last_run_only() {
        let mut snap = snapshot(
            &[
                ("a--one", TestStatus::Failed),
                ("b--one", TestStatus::Passed),
                ("b--two", TestStatus::Passed),
            ],
            vec![summary(RunState::Completed, 3, 3)],
        );
        let mut focused = summary(RunState::Completed, 2, 2);
        focused.id = RunId(2);
        snap.runs.push(focused);
        for id in ["b--one", "b--two"] {
            if let Some(view) = snap.stories.get_mut(id) {
                view.run_id = RunId(2);
            }
        }

        assert_eq!(snap.counts.failing(), 1);
        assert_eq!(snap.description(), "Ran 2 tests");
    }

    #[test]
    fn test_status_tree_rollup() {
        let tree = StoryTree::builder()
            .story("g-a--one", "g/a", "One")
            .story("g-a--two", "g/a", "Two")
            .story("g-b--three", "g/b", "Three")
            .story_with("g-b--docs", "g/b", "Docs", false)
            .build();
        let snap = snapshot(
            &[("g-a--one", TestStatus::Passed), ("g-b--three", TestStatus::Failed)],
            Vec::new(),
        );

        let rows = status_tree(&tree, &snap);
        assert_eq!(rows.len(), 1);
        let group = &rows[0];
        assert_eq!(group.counts.passed, 1);
        assert_eq!(group.counts.failed, 1);
        assert_eq!(group.counts.pending, 1);
        assert_eq!(group.components.len(), 2);
        assert_eq!(group.components[1].stories.len(), 1);
    }
}
