//! Run summary, derived from the recorded task results.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::runner::{TaskOutcome, TaskResult};

/// Who ran what, and whether the run was cut short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub llm_provider: String,
    pub llm_model: String,
    pub random_seed: u64,
    pub n_task_combinations: u32,
    pub device_serial: String,
    pub emulator_name: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set when a run-fatal error stopped the task loop.
    pub aborted: Option<String>,
}

impl RunInfo {
    pub fn new(run_id: impl Into<String>, config: &RunConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            llm_provider: config.llm.provider.clone(),
            llm_model: config.llm.model.clone(),
            random_seed: config.random_seed,
            n_task_combinations: config.n_task_combinations,
            device_serial: config.device_serial(),
            emulator_name: config.emulator_name.clone(),
            started_at,
            finished_at: None,
            aborted: None,
        }
    }
}

/// Per-family counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errored: usize,
    pub success_rate: f64,
}

impl GroupStats {
    fn add(&mut self, outcome: TaskOutcome) {
        self.total += 1;
        match outcome {
            TaskOutcome::Succeeded => self.succeeded += 1,
            TaskOutcome::Failed => self.failed += 1,
            TaskOutcome::Errored => self.errored += 1,
        }
        self.success_rate = rate(self.succeeded, self.total);
    }
}

/// Aggregate over every result recorded in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<RunInfo>,
    pub total_tasks: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errored: usize,
    /// `succeeded / total_tasks`; errored tasks count in the denominator.
    pub success_rate: f64,
    pub avg_steps: f64,
    pub avg_duration_secs: f64,
    pub by_family: BTreeMap<String, GroupStats>,
}

impl Summary {
    pub fn from_results(results: &[TaskResult]) -> Self {
        let mut totals = GroupStats::default();
        let mut by_family: BTreeMap<String, GroupStats> = BTreeMap::new();
        let mut steps = 0u64;
        let mut duration = 0.0;

        for result in results {
            totals.add(result.outcome);
            by_family
                .entry(result.family.clone())
                .or_default()
                .add(result.outcome);
            steps += u64::from(result.steps_taken);
            duration += result.duration_secs;
        }

        let n = results.len();
        Self {
            run: None,
            total_tasks: n,
            succeeded: totals.succeeded,
            failed: totals.failed,
            errored: totals.errored,
            success_rate: totals.success_rate,
            avg_steps: if n == 0 { 0.0 } else { steps as f64 / n as f64 },
            avg_duration_secs: if n == 0 { 0.0 } else { duration / n as f64 },
            by_family,
        }
    }

    pub fn with_run_info(mut self, run: RunInfo) -> Self {
        self.run = Some(run);
        self
    }

    pub fn is_aborted(&self) -> bool {
        self.run.as_ref().is_some_and(|r| r.aborted.is_some())
    }
}

fn rate(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}
