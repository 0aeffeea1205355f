//! Run records and their lifecycle

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::coverage::CoverageData;
use super::scope::RunScope;
use super::tree::StoryId;

/// Monotonic run identifier; later runs always compare greater
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub u64);

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Running,
    Completed,
    Cancelled,
}

impl RunState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    fn can_become(self, next: RunState) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Queued | Self::Running, Self::Cancelled)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A single test run, owned by the controller
#[derive(Debug, Clone)]
pub struct Run {
    pub id: RunId,
    pub scope: RunScope,
    /// Fixed at start, never changes afterwards
    pub story_ids: BTreeSet<StoryId>,
    pub started_at: Instant,
    pub finished_at: Option<Instant>,
    pub state: RunState,
    pub include_coverage: bool,
    pub superseded_by: Option<RunId>,
    /// Stories whose headless result is final
    finished: BTreeSet<StoryId>,
    /// Coverage reported by the headless runner so far
    coverage: Option<CoverageData>,
}

impl Run {
    pub fn new(
        id: RunId,
        scope: RunScope,
        story_ids: BTreeSet<StoryId>,
        include_coverage: bool,
        now: Instant,
    ) -> Self {
        Self {
            id,
            scope,
            story_ids,
            started_at: now,
            finished_at: None,
            state: RunState::Queued,
            include_coverage,
            superseded_by: None,
            finished: BTreeSet::new(),
            coverage: None,
        }
    }

    /// Move to `next`, returning false for transitions the lifecycle forbids
    pub fn transition(&mut self, next: RunState, now: Instant) -> bool {
        if !self.state.can_become(next) {
            tracing::warn!(run_id = %self.id, from = %self.state, to = %next, "Ignoring invalid run transition");
            return false;
        }
        tracing::debug!(run_id = %self.id, from = %self.state, to = %next, "Run transition");
        self.state = next;
        if !next.is_active() {
            self.finished_at = Some(now);
        }
        true
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Number of stories this run shares with `ids`
    pub fn overlap(&self, ids: &BTreeSet<StoryId>) -> usize {
        self.story_ids.intersection(ids).count()
    }

    pub fn mark_finished(&mut self, story_id: &StoryId) {
        if self.story_ids.contains(story_id) {
            self.finished.insert(story_id.clone());
        }
    }

    pub fn finished_count(&self) -> usize {
        self.finished.len()
    }

    pub fn all_finished(&self) -> bool {
        self.finished.len() == self.story_ids.len()
    }

    /// Fold a coverage report into what this run has measured; later files win
    pub fn absorb_coverage(&mut self, data: CoverageData) {
        match &mut self.coverage {
            Some(existing) => existing.extend(data),
            None => self.coverage = Some(data),
        }
    }

    pub fn coverage(&self) -> Option<&CoverageData> {
        self.coverage.as_ref()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.finished_at.map(|end| end.saturating_duration_since(self.started_at))
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id,
            scope: self.scope.clone(),
            state: self.state,
            total: self.story_ids.len(),
            finished: self.finished.len(),
            include_coverage: self.include_coverage,
            duration_ms: self.duration().map(|d| d.as_millis() as u64),
            superseded_by: self.superseded_by,
        }
    }
}

/// Serializable view of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: RunId,
    pub scope: RunScope,
    pub state: RunState,
    pub total: usize,
    pub finished: usize,
    pub include_coverage: bool,
    pub duration_ms: Option<u64>,
    pub superseded_by: Option<RunId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(ids: &[&str]) -> Run {
        Run::new(
            RunId(1),
            RunScope::All,
            ids.iter().map(|id| StoryId::from(*id)).collect(),
            false,
            Instant::now(),
        )
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut run = run(&["a"]);
        let now = Instant::now();
        assert!(!run.transition(RunState::Completed, now));
        assert!(run.transition(RunState::Running, now));
        assert!(run.transition(RunState::Completed, now));
        assert!(run.duration().is_some());
        assert!(!run.transition(RunState::Cancelled, now));
        assert_eq!(run.state, RunState::Completed);
    }

    #[test]
    fn test_finished_ignores_foreign_stories() {
        let mut run = run(&["a", "b"]);
        run.mark_finished(&StoryId::from("a"));
        run.mark_finished(&StoryId::from("zzz"));
        run.mark_finished(&StoryId::from("a"));
        assert_eq!(run.finished_count(), 1);
        assert!(!run.all_finished());
        run.mark_finished(&StoryId::from("b"));
        assert!(run.all_finished());
    }

    #[test]
    fn test_overlap() {
        let run = run(&["a", "b", "c"]);
        let other: BTreeSet<StoryId> = ["c", "d"].into_iter().map(StoryId::from).collect();
        assert_eq!(run.overlap(&other), 1);
    }
}
