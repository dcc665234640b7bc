//! Task suite seam: task definitions, per-task resets and success checks.

pub mod http;

use std::time::Duration;

use async_trait::async_trait;

use crate::catalog::{SuiteTask, TaskInstance};
use crate::error::SuiteError;

pub use http::HttpTaskSuite;

/// What the suite hands back after preparing one task instance.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSetup {
    /// Natural-language goal given to the agent.
    pub goal: String,
}

/// Parameters the suite is (re)initialized with before a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SuiteParams {
    pub n_task_combinations: u32,
    pub seed: u64,
    pub family: String,
}

/// External provider of tasks, resets and success predicates.
///
/// Parameterizations are drawn once per run from the seed given to
/// [`TaskSuite::initialize`]; an instance is then addressed by task name and
/// combination index. [`TaskInstance::seed`] is a pure function of those
/// inputs and is recorded with each result rather than sent per task.
#[async_trait]
pub trait TaskSuite: Send + Sync {
    /// Blocks until the suite answers, or fails after `timeout`.
    async fn wait_ready(&self, _timeout: Duration) -> Result<(), SuiteError> {
        Ok(())
    }

    /// Rebuilds task parameterizations for a run.
    async fn initialize(&self, _params: &SuiteParams) -> Result<(), SuiteError> {
        Ok(())
    }

    async fn list_tasks(&self) -> Result<Vec<SuiteTask>, SuiteError>;

    /// Number of parameterizations the suite holds for a task, if it says.
    async fn instance_count(&self, _task: &str) -> Result<Option<u32>, SuiteError> {
        Ok(None)
    }

    /// Resets app state for the instance and returns its goal.
    async fn reset_task(&self, instance: &TaskInstance) -> Result<TaskSetup, SuiteError>;

    /// Evaluates the instance's success predicate against the current device state.
    async fn check_success(&self, instance: &TaskInstance) -> Result<bool, SuiteError>;

    /// Forwards a final answer for question-style tasks.
    async fn submit_answer(&self, answer: &str) -> Result<(), SuiteError>;

    /// Reports the agent's own verdict once it declares the task done.
    async fn report_status(&self, completed: bool) -> Result<(), SuiteError>;

    async fn tear_down(&self, instance: &TaskInstance) -> Result<(), SuiteError>;

    /// Returns the device to the home screen.
    async fn go_home(&self) -> Result<(), SuiteError>;
}
