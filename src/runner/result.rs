//! Result records for task instance runs.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{AgentAction, Completion};
use crate::catalog::TaskInstance;

/// Lifecycle of one task instance.
///
/// `Preparing → Running → {Succeeded, Failed, Errored} → Recorded`; setup
/// failures jump straight from `Preparing` to `Errored`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Preparing,
    Running,
    Succeeded,
    Failed,
    Errored,
    Recorded,
}

impl TaskState {
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Preparing, Running)
                | (Preparing, Errored)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Errored)
                | (Succeeded, Recorded)
                | (Failed, Recorded)
                | (Errored, Recorded)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == TaskState::Recorded
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Preparing => write!(f, "preparing"),
            TaskState::Running => write!(f, "running"),
            TaskState::Succeeded => write!(f, "succeeded"),
            TaskState::Failed => write!(f, "failed"),
            TaskState::Errored => write!(f, "errored"),
            TaskState::Recorded => write!(f, "recorded"),
        }
    }
}

/// Final outcome of a task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded,
    Failed,
    Errored,
}

impl TaskOutcome {
    pub fn is_success(self) -> bool {
        self == TaskOutcome::Succeeded
    }

    pub fn state(self) -> TaskState {
        match self {
            TaskOutcome::Succeeded => TaskState::Succeeded,
            TaskOutcome::Failed => TaskState::Failed,
            TaskOutcome::Errored => TaskState::Errored,
        }
    }
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.state().fmt(f)
    }
}

/// One agent step as recorded in a trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryStep {
    pub step: u32,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<AgentAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<Completion>,
    /// Success predicate after this step, if it was checked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_check: Option<bool>,
}

/// Aggregate counts over a trajectory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryStats {
    pub total_steps: u32,
    pub action_steps: u32,
    pub actions_by_type: BTreeMap<String, u32>,
}

impl TrajectoryStats {
    pub fn from_steps(steps: &[TrajectoryStep]) -> Self {
        let mut stats = Self {
            total_steps: steps.len() as u32,
            ..Default::default()
        };
        for action in steps.iter().filter_map(|s| s.action.as_ref()) {
            stats.action_steps += 1;
            *stats
                .actions_by_type
                .entry(action.action_type.clone())
                .or_insert(0) += 1;
        }
        stats
    }
}

/// Outcome of one task instance run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub run_id: String,
    pub task_id: u64,
    pub task_name: String,
    pub family: String,
    pub combination: u32,
    pub seed: u64,
    pub goal: Option<String>,
    pub outcome: TaskOutcome,
    /// `true` only for `Succeeded`.
    pub success: bool,
    /// The agent's own verdict, when it reported one.
    pub agent_success: Option<bool>,
    pub final_reason: Option<String>,
    pub steps_taken: u32,
    pub max_steps: u32,
    pub duration_secs: f64,
    /// When the instance started.
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
    pub trajectory_stats: TrajectoryStats,
    pub trajectory_path: Option<PathBuf>,
    #[serde(skip)]
    pub trajectory: Vec<TrajectoryStep>,
}

impl TaskResult {
    /// Starts a record for an instance; outcome defaults to errored until set.
    pub fn new(run_id: impl Into<String>, instance: &TaskInstance, max_steps: u32) -> Self {
        Self {
            run_id: run_id.into(),
            task_id: instance.spec.id,
            task_name: instance.spec.name.clone(),
            family: instance.spec.family.clone(),
            combination: instance.combination,
            seed: instance.seed,
            goal: None,
            outcome: TaskOutcome::Errored,
            success: false,
            agent_success: None,
            final_reason: None,
            steps_taken: 0,
            max_steps,
            duration_secs: 0.0,
            timestamp: Utc::now(),
            error: None,
            trajectory_stats: TrajectoryStats::default(),
            trajectory_path: None,
            trajectory: Vec::new(),
        }
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = Some(goal.into());
        self
    }

    pub fn with_outcome(mut self, outcome: TaskOutcome) -> Self {
        self.outcome = outcome;
        self.success = outcome.is_success();
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.with_outcome(TaskOutcome::Errored)
    }

    pub fn with_completion(mut self, completion: &Completion) -> Self {
        self.agent_success = Some(completion.success);
        self.final_reason = Some(completion.reason.clone());
        self
    }

    pub fn with_trajectory(mut self, trajectory: Vec<TrajectoryStep>) -> Self {
        self.steps_taken = trajectory.len() as u32;
        self.trajectory_stats = TrajectoryStats::from_steps(&trajectory);
        self.trajectory = trajectory;
        self
    }

    pub fn with_duration_secs(mut self, secs: f64) -> Self {
        self.duration_secs = secs;
        self
    }

    /// `TaskName#combination`.
    pub fn label(&self) -> String {
        format!("{}#{}", self.task_name, self.combination)
    }
}
