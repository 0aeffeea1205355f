//! Coverage aggregation
//!
//! The persisted aggregate only ever comes from a full (`All`) run and is
//! replaced wholesale, never smoothed. Scoped runs still measure coverage but
//! the result is kept on the side for display and never touches the aggregate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::run::RunId;
use super::scope::RunScope;

/// Line counts for one source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCoverage {
    pub covered: u64,
    pub total: u64,
}

impl FileCoverage {
    pub fn percent(&self) -> Percent {
        Percent::ratio(self.covered, self.total)
    }
}

/// Raw coverage reported by the headless runner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageData {
    pub files: BTreeMap<String, FileCoverage>,
}

impl CoverageData {
    /// Merge another report in; files present in both take the newer counts
    pub fn extend(&mut self, other: CoverageData) {
        self.files.extend(other.files);
    }

    pub fn overall_percent(&self) -> Percent {
        let (covered, total) = self
            .files
            .values()
            .fold((0u64, 0u64), |(c, t), f| (c + f.covered, t + f.total));
        Percent::ratio(covered, total)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Percentage in `0.0..=100.0`
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percent(pub f64);

impl Percent {
    /// Nothing to cover counts as fully covered
    pub fn ratio(covered: u64, total: u64) -> Self {
        if total == 0 {
            return Self(100.0);
        }
        Self((covered.min(total) as f64 / total as f64) * 100.0)
    }
}

impl std::fmt::Display for Percent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} %", self.0.floor() as u64)
    }
}

/// Coverage derived from one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageAggregate {
    pub per_file_percent: BTreeMap<String, Percent>,
    pub overall_percent: Percent,
    pub covered_run_id: RunId,
}

impl CoverageAggregate {
    fn from_data(run_id: RunId, data: &CoverageData) -> Self {
        Self {
            per_file_percent: data
                .files
                .iter()
                .map(|(file, counts)| (file.clone(), counts.percent()))
                .collect(),
            overall_percent: data.overall_percent(),
            covered_run_id: run_id,
        }
    }
}

/// Result of handing a run's coverage to the aggregator
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Full run; the aggregate now reflects it
    Replaced,
    /// Scoped run; kept for display, aggregate untouched
    Informational(CoverageAggregate),
    /// Run had no coverage pass
    Skipped,
    /// A newer full run already produced the aggregate
    OutOfOrder { current: RunId },
}

#[derive(Debug, Default)]
pub struct CoverageAggregator {
    aggregate: Option<CoverageAggregate>,
    informational: Option<CoverageAggregate>,
}

impl CoverageAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(
        &mut self,
        scope: &RunScope,
        run_id: RunId,
        data: Option<&CoverageData>,
    ) -> MergeOutcome {
        let Some(data) = data else {
            return MergeOutcome::Skipped;
        };

        if !scope.is_all() {
            let computed = CoverageAggregate::from_data(run_id, data);
            let newer = self
                .informational
                .as_ref()
                .map_or(true, |info| info.covered_run_id <= run_id);
            if newer {
                self.informational = Some(computed.clone());
            }
            tracing::debug!(%run_id, %scope, overall = %computed.overall_percent, "Scoped coverage kept as informational");
            return MergeOutcome::Informational(computed);
        }

        if let Some(current) = self.aggregate.as_ref().map(|a| a.covered_run_id) {
            if current > run_id {
                tracing::debug!(%run_id, %current, "Ignoring coverage from an older run");
                return MergeOutcome::OutOfOrder { current };
            }
        }

        let aggregate = CoverageAggregate::from_data(run_id, data);
        tracing::info!(%run_id, overall = %aggregate.overall_percent, files = aggregate.per_file_percent.len(), "Coverage aggregate replaced");
        self.aggregate = Some(aggregate);
        MergeOutcome::Replaced
    }

    pub fn aggregate(&self) -> Option<&CoverageAggregate> {
        self.aggregate.as_ref()
    }

    /// Coverage of the latest scoped run, for display only
    pub fn informational(&self) -> Option<&CoverageAggregate> {
        self.informational.as_ref()
    }
}
