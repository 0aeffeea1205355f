//! Result store: per-story dual-slot results, versioned by run
//!
//! Every story that has ever been scheduled is owned by exactly one run, the
//! last one that claimed it. Reports carrying any other run id are stale and
//! are dropped instead of overwriting newer data, which is what keeps late
//! browser reports from a superseded run out of the current results. No
//! locking is involved; ownership is the only guard.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use serde::Serialize;

use super::run::RunId;
use super::status::{Environment, ResultSlot, StoryResult, TestStatus};
use super::tree::StoryId;

/// What happened to a reported status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PutOutcome {
    Accepted,
    /// Report from a run that doesn't own the story (or never claimed it)
    Stale { owner: Option<RunId> },
    /// Report would move the slot back toward pending
    Regressed { current: TestStatus },
}

#[derive(Debug, Clone)]
struct Entry {
    owner: RunId,
    result: StoryResult,
}

/// Dual-slot result cache
#[derive(Debug, Default)]
pub struct ResultStore {
    entries: HashMap<StoryId, Entry>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a status for one environment
    pub fn put(
        &mut self,
        story_id: &StoryId,
        environment: Environment,
        status: TestStatus,
        run_id: RunId,
        now: Instant,
    ) -> PutOutcome {
        let Some(entry) = self.entries.get_mut(story_id) else {
            tracing::debug!(%story_id, %run_id, %environment, "Dropping result for unscheduled story");
            return PutOutcome::Stale { owner: None };
        };

        if entry.owner != run_id {
            tracing::debug!(
                %story_id,
                %run_id,
                owner = %entry.owner,
                %environment,
                "Dropping stale result"
            );
            return PutOutcome::Stale {
                owner: Some(entry.owner),
            };
        }

        let slot = entry.result.slot_mut(environment);
        if let Some(current) = slot.as_ref() {
            // Terminal slots are final for the run; progress never goes back
            if current.status.is_terminal() || status.rank() < current.status.rank() {
                if current.status != status {
                    tracing::debug!(
                        %story_id,
                        %run_id,
                        %environment,
                        current = %current.status,
                        reported = %status,
                        "Ignoring out-of-order status"
                    );
                }
                return PutOutcome::Regressed {
                    current: current.status,
                };
            }
        }

        *slot = Some(ResultSlot {
            environment,
            status,
            run_id,
            reported_at: now,
        });
        PutOutcome::Accepted
    }

    pub fn get(&self, story_id: &str) -> Option<&StoryResult> {
        self.entries.get(story_id).map(|e| &e.result)
    }

    /// Run currently owning a story's results
    pub fn owner(&self, story_id: &str) -> Option<RunId> {
        self.entries.get(story_id).map(|e| e.owner)
    }

    /// Reset the given stories and hand them to `run_id`
    ///
    /// Stories outside `story_ids` keep whatever results they had.
    pub fn clear_for_scope(&mut self, story_ids: &BTreeSet<StoryId>, run_id: RunId) {
        for id in story_ids {
            self.entries.insert(
                id.clone(),
                Entry {
                    owner: run_id,
                    result: StoryResult::default(),
                },
            );
        }
    }

    /// Every story with results, with its owning run
    pub fn iter(&self) -> impl Iterator<Item = (&StoryId, RunId, &StoryResult)> {
        self.entries.iter().map(|(id, e)| (id, e.owner, &e.result))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
