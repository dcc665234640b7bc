//! Run configuration.
//!
//! A [`RunConfig`] is resolved once at startup (from CLI flags and the
//! environment), validated, and then shared read-only by every component.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::{TaskSelection, TaskSpec};
use crate::error::ConfigError;

/// Default AndroidWorld environment server.
pub const DEFAULT_ENV_URL: &str = "http://localhost:5000";

/// Default accessibility service of the DroidRun portal app.
pub const DEFAULT_PORTAL_SERVICE: &str =
    "com.droidrun.portal/com.droidrun.portal.DroidrunAccessibilityService";

/// Default family the suite is initialized with.
pub const DEFAULT_TASK_FAMILY: &str = "android_world";

/// Default results directory.
pub const DEFAULT_RESULTS_DIR: &str = "eval_results";

/// Steps allowed per unit of task complexity when `max_steps` is not set.
pub const DEFAULT_STEP_MULTIPLIER: u32 = 15;

/// Wall-clock allowance per unit of task complexity.
pub const DEFAULT_TIMEOUT_PER_COMPLEXITY: Duration = Duration::from_secs(300);

/// How often the portal overlay is hidden again while a task runs.
pub const DEFAULT_OVERLAY_KEEPALIVE: Duration = Duration::from_secs(5);

/// LLM settings handed to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub temperature: f64,
    pub reasoning: bool,
    /// Never written to result files.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl LlmConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            temperature: 0.2,
            reasoning: false,
            api_key: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_reasoning(mut self, reasoning: bool) -> Self {
        self.reasoning = reasoning;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Environment variable holding the API key for this provider, if known.
    pub fn api_key_env(&self) -> Option<&'static str> {
        api_key_env(&self.provider)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self::new("Gemini", "models/gemini-2.5-pro")
    }
}

/// Maps a provider name to its API key variable.
pub fn api_key_env(provider: &str) -> Option<&'static str> {
    match provider.to_lowercase().as_str() {
        "openai" => Some("OPENAI_API_KEY"),
        "gemini" | "google" | "googlegenai" => Some("GEMINI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        _ => None,
    }
}

/// Process-wide benchmark configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub llm: LlmConfig,

    // Device
    pub adb_path: PathBuf,
    pub console_port: u16,
    /// Overrides the `emulator-<console_port>` serial.
    pub device_serial: Option<String>,
    pub emulator_name: Option<String>,
    pub portal_service: String,
    pub portal_apk: Option<PathBuf>,
    pub perform_emulator_setup: bool,
    /// Zero disables the keepalive.
    pub overlay_keepalive: Duration,

    // Suite and agent
    pub env_url: String,
    pub agent_command: String,
    pub agent_debug: bool,
    pub selection: TaskSelection,
    pub n_task_combinations: u32,
    pub random_seed: u64,

    // Budgets
    pub max_steps: Option<u32>,
    pub step_multiplier: u32,
    pub task_timeout: Option<Duration>,
    pub timeout_per_complexity: Duration,
    pub step_timeout: Duration,
    pub health_timeout: Duration,

    // Output
    pub results_dir: PathBuf,
    pub save_trajectories: bool,
}

impl RunConfig {
    pub fn new(llm: LlmConfig) -> Self {
        Self {
            llm,
            adb_path: PathBuf::from("adb"),
            console_port: 5554,
            device_serial: None,
            emulator_name: None,
            portal_service: DEFAULT_PORTAL_SERVICE.to_string(),
            portal_apk: None,
            perform_emulator_setup: false,
            overlay_keepalive: DEFAULT_OVERLAY_KEEPALIVE,
            env_url: DEFAULT_ENV_URL.to_string(),
            agent_command: "droidrun-agent".to_string(),
            agent_debug: false,
            selection: TaskSelection::all(),
            n_task_combinations: 1,
            random_seed: 42,
            max_steps: None,
            step_multiplier: DEFAULT_STEP_MULTIPLIER,
            task_timeout: None,
            timeout_per_complexity: DEFAULT_TIMEOUT_PER_COMPLEXITY,
            step_timeout: Duration::from_secs(120),
            health_timeout: Duration::from_secs(300),
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            save_trajectories: false,
        }
    }

    pub fn with_selection(mut self, selection: TaskSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_combinations(mut self, n: u32) -> Self {
        self.n_task_combinations = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_step_multiplier(mut self, multiplier: u32) -> Self {
        self.step_multiplier = multiplier;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = dir.into();
        self
    }

    pub fn with_emulator_setup(mut self, setup: bool) -> Self {
        self.perform_emulator_setup = setup;
        self
    }

    pub fn with_trajectories(mut self, save: bool) -> Self {
        self.save_trajectories = save;
        self
    }

    pub fn with_overlay_keepalive(mut self, interval: Duration) -> Self {
        self.overlay_keepalive = interval;
        self
    }

    pub fn with_portal_service(mut self, service: impl Into<String>) -> Self {
        self.portal_service = service.into();
        self
    }

    /// Serial of the target device.
    pub fn device_serial(&self) -> String {
        self.device_serial
            .clone()
            .unwrap_or_else(|| format!("emulator-{}", self.console_port))
    }

    /// Family the suite is initialized with.
    pub fn suite_family(&self) -> &str {
        self.selection
            .family
            .as_deref()
            .unwrap_or(DEFAULT_TASK_FAMILY)
    }

    /// Step budget: `max_steps` if set, else `complexity * step_multiplier`.
    pub fn step_budget(&self, spec: &TaskSpec) -> u32 {
        self.max_steps
            .unwrap_or_else(|| spec.complexity.saturating_mul(self.step_multiplier))
    }

    /// Hard wall-clock limit for one task instance.
    pub fn task_timeout_for(&self, spec: &TaskSpec) -> Duration {
        self.task_timeout
            .unwrap_or_else(|| self.timeout_per_complexity * spec.complexity.max(1))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_task_combinations == 0 {
            return Err(invalid("n_task_combinations", "must be at least 1"));
        }
        if self.max_steps == Some(0) {
            return Err(invalid("max_steps", "must be at least 1"));
        }
        if self.max_steps.is_none() && self.step_multiplier == 0 {
            return Err(invalid("step_multiplier", "must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(invalid("temperature", "must be between 0.0 and 2.0"));
        }
        if self.portal_service.trim().is_empty() || !self.portal_service.contains('/') {
            return Err(invalid(
                "portal_service",
                "expected a component name like package/.Service",
            ));
        }
        if self.agent_command.trim().is_empty() {
            return Err(invalid("agent_command", "must not be empty"));
        }
        if self.step_timeout.is_zero() {
            return Err(invalid("step_timeout", "must be non-zero"));
        }
        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new(LlmConfig::default())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(complexity: u32) -> TaskSpec {
        TaskSpec {
            id: 1,
            name: "ContactsAddContact".into(),
            family: "android_world".into(),
            complexity,
        }
    }

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.device_serial(), "emulator-5554");
        assert_eq!(config.suite_family(), "android_world");
        assert_eq!(config.results_dir, PathBuf::from("eval_results"));
        assert_eq!(config.overlay_keepalive, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_step_budget() {
        let config = RunConfig::default();
        assert_eq!(config.step_budget(&spec(2)), 30);

        let config = config.with_max_steps(7);
        assert_eq!(config.step_budget(&spec(2)), 7);
    }

    #[test]
    fn test_task_timeout() {
        let config = RunConfig::default();
        assert_eq!(config.task_timeout_for(&spec(3)), Duration::from_secs(900));

        let config = config.with_task_timeout(Duration::from_secs(10));
        assert_eq!(config.task_timeout_for(&spec(3)), Duration::from_secs(10));
    }

    #[test]
    fn test_serial_override() {
        let mut config = RunConfig::default();
        config.device_serial = Some("R58M123".into());
        assert_eq!(config.device_serial(), "R58M123");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(RunConfig::default().with_combinations(0).validate().is_err());
        assert!(RunConfig::default().with_max_steps(0).validate().is_err());
        assert!(RunConfig::default()
            .with_portal_service("not-a-component")
            .validate()
            .is_err());

        let mut config = RunConfig::default();
        config.llm.temperature = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_env_mapping() {
        assert_eq!(api_key_env("OpenAI"), Some("OPENAI_API_KEY"));
        assert_eq!(api_key_env("Gemini"), Some("GEMINI_API_KEY"));
        assert_eq!(api_key_env("anthropic"), Some("ANTHROPIC_API_KEY"));
        assert_eq!(api_key_env("Ollama"), None);
    }

    #[test]
    fn test_api_key_not_serialized() {
        let llm = LlmConfig::new("OpenAI", "gpt-4o").with_api_key("sk-secret");
        let json = serde_json::to_string(&llm).unwrap();
        assert!(!json.contains("sk-secret"));
    }
}
