//! Benchmark orchestrator.
//!
//! Resolves the requested tasks, expands them into seeded instances and runs
//! them one after another against the single target device. Each result is
//! persisted as soon as it is recorded; the summary is written once at the
//! end, including when a run-fatal error cut the loop short.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::{AgentFactory, ProcessAgentFactory};
use crate::catalog::{expand_instances, TaskCatalog, TaskInstance};
use crate::config::RunConfig;
use crate::device::{AdbBridge, DeviceController};
use crate::error::{BenchError, Result};
use crate::results::{ResultStore, RunInfo, Summary};
use crate::runner::{TaskResult, TaskRunner};
use crate::suite::{HttpTaskSuite, SuiteParams, TaskSuite};

/// Called after each recorded result with `(result, index, total)`.
pub type ProgressFn = dyn Fn(&TaskResult, usize, usize) + Send + Sync;

/// What a completed (or aborted) run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub summary: Summary,
    pub summary_path: PathBuf,
    pub results: Vec<TaskResult>,
    /// The run-fatal error that stopped the loop, if any.
    pub fatal: Option<BenchError>,
}

pub struct BenchmarkOrchestrator {
    config: Arc<RunConfig>,
    device: Arc<DeviceController>,
    suite: Arc<dyn TaskSuite>,
    agents: Arc<dyn AgentFactory>,
    progress: Option<Box<ProgressFn>>,
}

impl BenchmarkOrchestrator {
    pub fn new(
        config: RunConfig,
        device: DeviceController,
        suite: Arc<dyn TaskSuite>,
        agents: Arc<dyn AgentFactory>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            device: Arc::new(device),
            suite,
            agents,
            progress: None,
        }
    }

    /// Wires the adb bridge, the HTTP task suite and the process agent.
    pub fn from_config(config: RunConfig) -> Result<Self> {
        config.validate()?;

        let serial = config.device_serial();
        let bridge = AdbBridge::new(&config.adb_path, &serial);
        let device = DeviceController::new(Arc::new(bridge), &config.portal_service);
        let suite = HttpTaskSuite::new(&config.env_url, config.suite_family())?;
        let agents = ProcessAgentFactory::from_command_line(
            &config.agent_command,
            config.llm.clone(),
            serial,
        )?
        .with_step_timeout(config.step_timeout)
        .with_debug(config.agent_debug);

        Ok(Self::new(config, device, Arc::new(suite), Arc::new(agents)))
    }

    pub fn with_progress(
        mut self,
        progress: impl Fn(&TaskResult, usize, usize) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Fetches the catalog from the suite. Never touches the device.
    pub async fn list_tasks(&self) -> Result<TaskCatalog> {
        self.suite.wait_ready(self.config.health_timeout).await?;
        let tasks = self.suite.list_tasks().await?;
        Ok(TaskCatalog::from_suite_tasks(tasks))
    }

    /// Initializes the suite and resolves the selection into ordered instances.
    ///
    /// Fails with `UnknownTask` before any device contact or file write.
    pub async fn plan(&self) -> Result<Vec<TaskInstance>> {
        self.suite.wait_ready(self.config.health_timeout).await?;
        self.suite
            .initialize(&SuiteParams {
                n_task_combinations: self.config.n_task_combinations,
                seed: self.config.random_seed,
                family: self.config.suite_family().to_string(),
            })
            .await?;

        let catalog = TaskCatalog::from_suite_tasks(self.suite.list_tasks().await?);
        info!(tasks = catalog.len(), "Loaded task catalog");

        let specs = catalog.resolve(&self.config.selection)?;
        for spec in &specs {
            match self.suite.instance_count(&spec.name).await {
                Ok(Some(n)) if n < self.config.n_task_combinations => warn!(
                    task = %spec.name,
                    available = n,
                    requested = self.config.n_task_combinations,
                    "Suite holds fewer combinations than requested"
                ),
                Ok(_) => {}
                Err(e) => debug!(task = %spec.name, error = %e, "Combination count unavailable"),
            }
        }

        let instances = expand_instances(
            &specs,
            self.config.n_task_combinations,
            self.config.random_seed,
        );
        info!(
            specs = specs.len(),
            instances = instances.len(),
            seed = self.config.random_seed,
            "Planned benchmark run"
        );
        Ok(instances)
    }

    /// Runs the whole benchmark.
    ///
    /// `Err` means nothing was run (bad selection, unreachable suite) or the
    /// summary itself could not be written. Run-fatal errors hit mid-run are
    /// reported in [`RunOutcome::fatal`] next to the partial summary.
    pub async fn run(&self) -> Result<RunOutcome> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();

        let instances = self.plan().await?;

        let store = ResultStore::new(&self.config.results_dir, started_at, &run_id)
            .with_trajectories(self.config.save_trajectories);
        let runner = TaskRunner::new(
            self.device.clone(),
            self.suite.clone(),
            self.agents.clone(),
            self.config.clone(),
            &run_id,
        );

        if self.config.perform_emulator_setup {
            info!("Performing first-run device setup");
            let report = self
                .device
                .perform_first_run_setup(self.config.portal_apk.as_deref())
                .await;
            debug!(warnings = report.warnings.len(), "Device setup report");
        }

        if let Err(e) = self.suite.go_home().await {
            warn!(error = %e, "Failed to return to home screen before run");
        }

        let total = instances.len();
        let mut results = Vec::with_capacity(total);
        let mut fatal = None;

        for (index, instance) in instances.iter().enumerate() {
            info!(
                task = %instance.label(),
                progress = format!("{}/{}", index + 1, total),
                "Running task"
            );

            let mut result = match runner.run(instance).await {
                Ok(result) => result,
                Err(e) => {
                    error!(task = %instance.label(), error = %e, "Run-fatal error, stopping");
                    fatal = Some(e);
                    break;
                }
            };

            if let Err(e) = store.save(&mut result).await {
                error!(task = %instance.label(), error = %e, "Failed to save result, stopping");
                fatal = Some(BenchError::ResultPersistence(e));
                break;
            }

            if let Some(progress) = &self.progress {
                progress(&result, index + 1, total);
            }
            results.push(result);
        }

        let mut info = RunInfo::new(&run_id, &self.config, started_at);
        info.finished_at = Some(Utc::now());
        info.aborted = fatal.as_ref().map(|e| e.to_string());

        let summary = Summary::from_results(&results).with_run_info(info);
        let summary_path = store.save_summary(&summary).await?;

        info!(
            total = summary.total_tasks,
            succeeded = summary.succeeded,
            success_rate = format!("{:.1}%", summary.success_rate * 100.0),
            aborted = fatal.is_some(),
            "Benchmark run finished"
        );

        Ok(RunOutcome {
            summary,
            summary_path,
            results,
            fatal,
        })
    }
}
