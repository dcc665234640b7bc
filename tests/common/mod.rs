//! In-memory collaborators for end-to-end runs.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use android_world_bench::agent::{
    Agent, AgentAction, AgentFactory, AgentStep, AgentTask, Observation,
};
use android_world_bench::catalog::{SuiteTask, TaskInstance};
use android_world_bench::config::{RunConfig, DEFAULT_PORTAL_SERVICE};
use android_world_bench::device::{DeviceBridge, DeviceController, RetryPolicy};
use android_world_bench::error::{AgentError, BridgeError, SuiteError};
use android_world_bench::orchestrator::BenchmarkOrchestrator;
use android_world_bench::results::SUMMARY_FILE;
use android_world_bench::suite::{SuiteParams, TaskSetup, TaskSuite};

/// Ordered record of device and suite events shared between fakes.
pub type Journal = Arc<Mutex<Vec<String>>>;

type ResetHook = Box<dyn Fn(&TaskInstance) + Send + Sync>;

/// Device bridge that keeps secure settings in memory and can drop offline.
#[derive(Default)]
pub struct FakeBridge {
    settings: Mutex<HashMap<String, String>>,
    calls: AtomicUsize,
    online_checks: AtomicUsize,
    /// Number of successful `state()` calls before the device goes offline.
    offline_after: Option<usize>,
    journal: Journal,
}

impl FakeBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offline_after(checks: usize) -> Self {
        Self {
            offline_after: Some(checks),
            ..Self::default()
        }
    }

    pub fn journaled(mut self, journal: &Journal) -> Self {
        self.journal = journal.clone();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn setting(&self, key: &str) -> Option<String> {
        self.settings.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl DeviceBridge for FakeBridge {
    async fn shell(&self, command: &str) -> Result<String, BridgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let parts: Vec<&str> = command.splitn(5, ' ').collect();
        match parts.as_slice() {
            ["settings", "get", "secure", key] => {
                Ok(self.setting(key).unwrap_or_else(|| "null".to_string()))
            }
            ["settings", "put", "secure", key, value] => {
                let value = value.trim_matches('\'').to_string();
                self.settings
                    .lock()
                    .unwrap()
                    .insert(key.to_string(), value);
                Ok(String::new())
            }
            _ => Ok(String::new()),
        }
    }

    async fn install(&self, _apk: &Path) -> Result<(), BridgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.journal.lock().unwrap().push("install".to_string());
        Ok(())
    }

    async fn root(&self) -> Result<(), BridgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.journal.lock().unwrap().push("root".to_string());
        Ok(())
    }

    async fn state(&self) -> Result<String, BridgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.offline_after {
            if self.online_checks.load(Ordering::SeqCst) >= limit {
                return Err(BridgeError::Offline("emulator-5554".to_string()));
            }
        }
        self.online_checks.fetch_add(1, Ordering::SeqCst);
        Ok("device".to_string())
    }
}

/// Task suite with scripted success and setup failures.
#[derive(Default)]
pub struct FakeSuite {
    tasks: Vec<SuiteTask>,
    /// Task name -> success after this many checks within one instance.
    solve_after: HashMap<String, usize>,
    failing_setup: HashSet<String>,
    checks: AtomicUsize,
    journal: Journal,
    on_reset: Option<ResetHook>,
    pub initialized: Mutex<Vec<SuiteParams>>,
    pub resets: Mutex<Vec<(String, u32)>>,
    pub tear_downs: AtomicUsize,
}

impl FakeSuite {
    pub fn with_tasks(names: &[&str]) -> Self {
        Self {
            tasks: names
                .iter()
                .map(|n| SuiteTask::new(*n, "android_world", 1))
                .collect(),
            ..Self::default()
        }
    }

    pub fn solved_after(mut self, task: &str, checks: usize) -> Self {
        self.solve_after.insert(task.to_string(), checks);
        self
    }

    pub fn failing_setup(mut self, task: &str) -> Self {
        self.failing_setup.insert(task.to_string());
        self
    }

    pub fn journaled(mut self, journal: &Journal) -> Self {
        self.journal = journal.clone();
        self
    }

    /// Runs `hook` at the start of every task reset.
    pub fn on_reset(mut self, hook: impl Fn(&TaskInstance) + Send + Sync + 'static) -> Self {
        self.on_reset = Some(Box::new(hook));
        self
    }
}

#[async_trait]
impl TaskSuite for FakeSuite {
    async fn initialize(&self, params: &SuiteParams) -> Result<(), SuiteError> {
        self.initialized.lock().unwrap().push(params.clone());
        Ok(())
    }

    async fn list_tasks(&self) -> Result<Vec<SuiteTask>, SuiteError> {
        Ok(self.tasks.clone())
    }

    async fn reset_task(&self, instance: &TaskInstance) -> Result<TaskSetup, SuiteError> {
        if let Some(hook) = &self.on_reset {
            hook(instance);
        }
        self.resets
            .lock()
            .unwrap()
            .push((instance.spec.name.clone(), instance.combination));
        self.journal
            .lock()
            .unwrap()
            .push(format!("reset {}", instance.label()));
        if self.failing_setup.contains(&instance.spec.name) {
            return Err(SuiteError::Status {
                endpoint: "/task/initialize".to_string(),
                status: 500,
                body: "app crashed".to_string(),
            });
        }
        self.checks.store(0, Ordering::SeqCst);
        Ok(TaskSetup {
            goal: format!("Complete {}", instance.spec.name),
        })
    }

    async fn check_success(&self, instance: &TaskInstance) -> Result<bool, SuiteError> {
        let n = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(self
            .solve_after
            .get(&instance.spec.name)
            .is_some_and(|after| n >= *after))
    }

    async fn submit_answer(&self, _answer: &str) -> Result<(), SuiteError> {
        Ok(())
    }

    async fn report_status(&self, _completed: bool) -> Result<(), SuiteError> {
        Ok(())
    }

    async fn tear_down(&self, _instance: &TaskInstance) -> Result<(), SuiteError> {
        self.tear_downs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn go_home(&self) -> Result<(), SuiteError> {
        Ok(())
    }
}

/// Agent that taps forever.
pub struct TappingAgent;

#[async_trait]
impl Agent for TappingAgent {
    async fn run_step(
        &mut self,
        _goal: &str,
        observation: &Observation,
    ) -> Result<AgentStep, AgentError> {
        Ok(AgentStep::action(
            AgentAction::new("tap").with_params(serde_json::json!({ "index": observation.step })),
        ))
    }
}

#[derive(Default)]
pub struct TappingAgentFactory {
    pub started: Mutex<Vec<AgentTask>>,
}

#[async_trait]
impl AgentFactory for TappingAgentFactory {
    async fn start(&self, task: &AgentTask) -> Result<Box<dyn Agent>, AgentError> {
        self.started.lock().unwrap().push(task.clone());
        Ok(Box::new(TappingAgent))
    }
}

pub struct Harness {
    pub bridge: Arc<FakeBridge>,
    pub suite: Arc<FakeSuite>,
    pub agents: Arc<TappingAgentFactory>,
    pub orchestrator: BenchmarkOrchestrator,
}

pub fn harness(config: RunConfig, bridge: FakeBridge, suite: FakeSuite) -> Harness {
    let bridge = Arc::new(bridge);
    let suite = Arc::new(suite);
    let agents = Arc::new(TappingAgentFactory::default());
    let device = DeviceController::new(bridge.clone(), DEFAULT_PORTAL_SERVICE)
        .with_retry_policy(RetryPolicy::immediate(3));
    let orchestrator = BenchmarkOrchestrator::new(config, device, suite.clone(), agents.clone());
    Harness {
        bridge,
        suite,
        agents,
        orchestrator,
    }
}

/// Per-task result files in `dir`, sorted; excludes the summary.
pub fn result_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .filter(|p| p.file_name().is_some_and(|n| n != SUMMARY_FILE))
            .collect(),
        Err(_) => Vec::new(),
    };
    files.sort();
    files
}

pub fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}
