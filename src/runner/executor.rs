//! Task runner: takes one task instance through its lifecycle.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::result::{TaskOutcome, TaskResult, TaskState, TrajectoryStep};
use crate::agent::{Agent, AgentFactory, AgentTask, Completion, Observation};
use crate::catalog::TaskInstance;
use crate::config::RunConfig;
use crate::device::{DeviceController, OverlayKeepalive};
use crate::error::{BenchError, Result};
use crate::suite::TaskSuite;

/// How the step loop ended.
struct Verdict {
    outcome: TaskOutcome,
    completion: Option<Completion>,
}

/// Runs task instances one at a time against a shared device and suite.
pub struct TaskRunner {
    device: Arc<DeviceController>,
    suite: Arc<dyn TaskSuite>,
    agents: Arc<dyn AgentFactory>,
    config: Arc<RunConfig>,
    run_id: String,
}

impl TaskRunner {
    pub fn new(
        device: Arc<DeviceController>,
        suite: Arc<dyn TaskSuite>,
        agents: Arc<dyn AgentFactory>,
        config: Arc<RunConfig>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            device,
            suite,
            agents,
            config,
            run_id: run_id.into(),
        }
    }

    /// Runs one instance to a recorded result.
    ///
    /// Per-task failures come back as `Ok` with an errored record. `Err` is
    /// returned only for failures that end the run, such as losing the device.
    pub async fn run(&self, instance: &TaskInstance) -> Result<TaskResult> {
        let clock = Instant::now();
        let max_steps = self.config.step_budget(&instance.spec);
        let record = TaskResult::new(&self.run_id, instance, max_steps);
        let mut state = TaskState::Preparing;

        info!(
            task = %instance.label(),
            seed = instance.seed,
            max_steps,
            "Preparing task"
        );

        // Device reset failures are run-fatal and propagate as-is.
        self.device.reset_accessibility_services().await?;

        let setup = match self.suite.reset_task(instance).await {
            Ok(setup) => setup,
            Err(e) => {
                warn!(task = %instance.label(), error = %e, "Task setup failed");
                advance(&mut state, TaskState::Errored, instance);
                let record = record
                    .with_error(BenchError::TaskSetup(e.to_string()).to_string())
                    .with_duration_secs(clock.elapsed().as_secs_f64());
                self.clean_up(instance).await;
                advance(&mut state, TaskState::Recorded, instance);
                return Ok(record);
            }
        };
        let record = record.with_goal(&setup.goal);
        info!(task = %instance.label(), goal = %setup.goal, "Task goal");

        let agent_task = AgentTask {
            task_name: instance.spec.name.clone(),
            goal: setup.goal.clone(),
            max_steps,
        };
        let mut agent = match self.agents.start(&agent_task).await {
            Ok(agent) => agent,
            Err(e) => {
                error!(task = %instance.label(), error = %e, "Failed to start agent");
                advance(&mut state, TaskState::Errored, instance);
                let record = record
                    .with_error(BenchError::Agent(e).to_string())
                    .with_duration_secs(clock.elapsed().as_secs_f64());
                self.clean_up(instance).await;
                advance(&mut state, TaskState::Recorded, instance);
                return Ok(record);
            }
        };

        advance(&mut state, TaskState::Running, instance);
        let timeout = self.config.task_timeout_for(&instance.spec);
        let mut trajectory = Vec::new();
        let keepalive = (!self.config.overlay_keepalive.is_zero())
            .then(|| OverlayKeepalive::start(self.device.clone(), self.config.overlay_keepalive));

        let run = tokio::time::timeout(
            timeout,
            self.drive(agent.as_mut(), instance, &setup.goal, max_steps, &mut trajectory),
        )
        .await;
        if let Some(keepalive) = keepalive {
            keepalive.stop().await;
        }
        agent.shutdown().await;

        let record = match run {
            Ok(Ok(verdict)) => {
                let record = match &verdict.completion {
                    Some(completion) => record.with_completion(completion),
                    None => record,
                };
                record.with_outcome(verdict.outcome)
            }
            Ok(Err(e)) => {
                warn!(task = %instance.label(), error = %e, "Task errored");
                record.with_error(e.to_string())
            }
            Err(_) => {
                warn!(
                    task = %instance.label(),
                    timeout_secs = timeout.as_secs(),
                    steps = trajectory.len(),
                    "Task exceeded its time limit"
                );
                record.with_error(format!(
                    "task timed out after {}s ({} steps taken)",
                    timeout.as_secs(),
                    trajectory.len()
                ))
            }
        };
        advance(&mut state, record.outcome.state(), instance);

        self.clean_up(instance).await;

        let record = record
            .with_trajectory(trajectory)
            .with_duration_secs(clock.elapsed().as_secs_f64());
        advance(&mut state, TaskState::Recorded, instance);

        info!(
            task = %instance.label(),
            outcome = %record.outcome,
            steps = record.steps_taken,
            duration_secs = format!("{:.1}", record.duration_secs),
            "Task finished"
        );
        Ok(record)
    }

    /// Steps the agent until the task is solved, the agent stops, or the
    /// budget runs out.
    async fn drive(
        &self,
        agent: &mut dyn Agent,
        instance: &TaskInstance,
        goal: &str,
        max_steps: u32,
        trajectory: &mut Vec<TrajectoryStep>,
    ) -> Result<Verdict> {
        let mut last_action = None;

        for step in 1..=max_steps {
            let started = Utc::now();
            let clock = Instant::now();
            let observation = Observation {
                step,
                steps_remaining: max_steps - step + 1,
                ui_state: self.observe_device(instance).await?,
                last_action: last_action.take(),
            };

            let reply = agent.run_step(goal, &observation).await?;

            if let Some(completion) = reply.finished {
                trajectory.push(TrajectoryStep {
                    step,
                    timestamp: started,
                    duration_ms: clock.elapsed().as_millis() as u64,
                    action: reply.action,
                    finished: Some(completion.clone()),
                    success_check: None,
                });
                if let Some(answer) = &completion.answer {
                    debug!(task = %instance.label(), answer = %answer, "Submitting answer");
                    self.suite.submit_answer(answer).await?;
                }
                self.suite.report_status(completion.success).await?;
                let solved = self.suite.check_success(instance).await?;
                record_check(trajectory, solved);
                debug!(
                    task = %instance.label(),
                    agent_success = completion.success,
                    solved,
                    "Agent finished"
                );
                return Ok(Verdict {
                    outcome: if solved {
                        TaskOutcome::Succeeded
                    } else {
                        TaskOutcome::Failed
                    },
                    completion: Some(completion),
                });
            }

            trajectory.push(TrajectoryStep {
                step,
                timestamp: started,
                duration_ms: clock.elapsed().as_millis() as u64,
                action: reply.action.clone(),
                finished: None,
                success_check: None,
            });
            let solved = self.suite.check_success(instance).await?;
            record_check(trajectory, solved);
            if solved {
                return Ok(Verdict {
                    outcome: TaskOutcome::Succeeded,
                    completion: None,
                });
            }
            last_action = reply.action;
        }

        debug!(task = %instance.label(), max_steps, "Step budget exhausted");
        Ok(Verdict {
            outcome: TaskOutcome::Failed,
            completion: None,
        })
    }

    /// Reads the UI state. A lost connection is rechecked once; if the device
    /// is still gone the task ends as errored.
    async fn observe_device(&self, instance: &TaskInstance) -> Result<Option<Value>> {
        let lost = match self.device.observe().await {
            Ok(state) => return Ok(state),
            Err(e) => e,
        };
        warn!(task = %instance.label(), error = %lost, "Lost contact with device, rechecking");
        match self.device.ensure_online().await {
            Ok(()) => Ok(None),
            Err(e) => Err(BenchError::DeviceUnreachable(format!("{} ({})", lost, e))),
        }
    }

    /// Tears down the task and returns home; failures only warn.
    async fn clean_up(&self, instance: &TaskInstance) {
        if let Err(e) = self.suite.tear_down(instance).await {
            warn!(task = %instance.label(), error = %e, "Task tear-down failed");
        }
        if let Err(e) = self.suite.go_home().await {
            warn!(task = %instance.label(), error = %e, "Failed to return to home screen");
        }
    }
}

fn record_check(trajectory: &mut [TrajectoryStep], solved: bool) {
    if let Some(last) = trajectory.last_mut() {
        last.success_check = Some(solved);
    }
}

fn advance(state: &mut TaskState, next: TaskState, instance: &TaskInstance) {
    debug_assert!(
        state.can_transition_to(next),
        "invalid task transition {} -> {}",
        state,
        next
    );
    debug!(task = %instance.label(), from = %state, to = %next, "Task state");
    *state = next;
}
