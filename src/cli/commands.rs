//! CLI definition and command handling for android-world-bench.
//!
//! The CLI is flat: one invocation either lists the task catalog
//! (`--list-tasks`) or runs the selected tasks.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use crate::catalog::TaskSelection;
use crate::config::{
    api_key_env, LlmConfig, RunConfig, DEFAULT_ENV_URL, DEFAULT_PORTAL_SERVICE,
    DEFAULT_RESULTS_DIR, DEFAULT_STEP_MULTIPLIER,
};
use crate::error::BenchError;
use crate::orchestrator::{BenchmarkOrchestrator, RunOutcome};
use crate::runner::{TaskOutcome, TaskResult};

/// Run AndroidWorld benchmark tasks with a UI-driving agent.
#[derive(Parser, Debug)]
#[command(name = "android-world-bench")]
#[command(about = "Run AndroidWorld benchmark tasks against an Android emulator")]
#[command(version)]
#[command(
    long_about = "android-world-bench drives an external UI agent through AndroidWorld tasks on a single emulator, one task at a time, and records a JSON result per task plus a run summary.\n\nExample usage:\n  android-world-bench --task-ids 1 2 --n-task-combinations 2 --llm-provider OpenAI --llm-model gpt-4o"
)]
pub struct Cli {
    // Task selection
    /// Task IDs to run (1-based, see --list-tasks).
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub task_ids: Vec<u64>,

    /// Task names to run.
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub task_names: Vec<String>,

    /// Task family the suite is initialized with; selects the whole family
    /// when no IDs or names are given.
    #[arg(long)]
    pub task_family: Option<String>,

    /// Print the task catalog and exit.
    #[arg(long)]
    pub list_tasks: bool,

    /// Parameter combinations per task.
    #[arg(long, default_value = "1")]
    pub n_task_combinations: u32,

    /// Run seed; per-instance seeds derive from it.
    #[arg(long, default_value = "42")]
    pub random_seed: u64,

    // LLM
    /// LLM provider passed to the agent (OpenAI, Gemini, Anthropic, ...).
    #[arg(long, default_value = "Gemini")]
    pub llm_provider: String,

    /// LLM model passed to the agent.
    #[arg(long, default_value = "models/gemini-2.5-pro")]
    pub llm_model: String,

    /// Sampling temperature.
    #[arg(long, default_value = "0.2")]
    pub temperature: f64,

    /// Ask the agent to plan before acting.
    #[arg(long)]
    pub reasoning: bool,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    // Device
    /// Path to the adb executable.
    #[arg(long, default_value = "adb")]
    pub adb_path: PathBuf,

    /// Emulator console port; the device serial is emulator-<port>.
    #[arg(long, default_value = "5554")]
    pub console_port: u16,

    /// Device serial, overriding the one derived from --console-port.
    #[arg(long)]
    pub device_serial: Option<String>,

    #[arg(long, env = "EMULATOR_NAME")]
    pub emulator_name: Option<String>,

    /// Install the portal app and root the device before the first task.
    #[arg(long)]
    pub perform_emulator_setup: bool,

    /// Portal APK installed by --perform-emulator-setup.
    #[arg(long)]
    pub portal_apk: Option<PathBuf>,

    /// Accessibility service enabled before every task.
    #[arg(long, default_value = DEFAULT_PORTAL_SERVICE)]
    pub portal_service: String,

    /// Seconds between overlay-hide broadcasts while a task runs; 0 disables.
    #[arg(long, default_value = "5")]
    pub overlay_keepalive: u64,

    // Suite and agent
    /// AndroidWorld environment server.
    #[arg(long, env = "ANDROID_WORLD_URL", default_value = DEFAULT_ENV_URL)]
    pub env_url: String,

    /// Agent command, started once per task.
    #[arg(long = "agent-cmd", default_value = "droidrun-agent")]
    pub agent_command: String,

    /// Forward debug mode to the agent.
    #[arg(long)]
    pub agent_debug: bool,

    // Budgets
    /// Fixed step budget per task; defaults to complexity * --step-multiplier.
    #[arg(long)]
    pub max_steps: Option<u32>,

    #[arg(long, default_value_t = DEFAULT_STEP_MULTIPLIER)]
    pub step_multiplier: u32,

    /// Hard time limit per task in seconds; defaults to complexity * 300.
    #[arg(long)]
    pub task_timeout: Option<u64>,

    /// Time limit for a single agent step in seconds.
    #[arg(long, default_value = "120")]
    pub step_timeout: u64,

    // Output
    /// Directory for result files and summary.json.
    #[arg(long, default_value = DEFAULT_RESULTS_DIR)]
    pub results_dir: PathBuf,

    /// Also write full agent trajectories.
    #[arg(long)]
    pub save_trajectories: bool,

    /// Print the summary (or task list) as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// API key for the selected provider, if one was supplied.
    fn api_key(&self) -> Option<String> {
        let key = match api_key_env(&self.llm_provider)? {
            "OPENAI_API_KEY" => &self.openai_api_key,
            "GEMINI_API_KEY" => &self.gemini_api_key,
            "ANTHROPIC_API_KEY" => &self.anthropic_api_key,
            _ => return None,
        };
        key.clone().filter(|k| !k.is_empty())
    }

    fn selection(&self) -> TaskSelection {
        let mut selection = TaskSelection::all()
            .with_ids(self.task_ids.iter().copied())
            .with_names(self.task_names.iter().cloned());
        if let Some(family) = &self.task_family {
            selection = selection.with_family(family);
        }
        selection
    }
}

impl RunConfig {
    /// Resolves the run configuration from parsed flags.
    pub fn from_cli(cli: &Cli) -> Self {
        let mut llm = LlmConfig::new(&cli.llm_provider, &cli.llm_model)
            .with_temperature(cli.temperature)
            .with_reasoning(cli.reasoning);
        match cli.api_key() {
            Some(key) => llm = llm.with_api_key(key),
            None => {
                if let Some(var) = llm.api_key_env() {
                    warn!("{} is not set; the agent may fail to reach the LLM", var);
                }
            }
        }

        let mut config = RunConfig::new(llm)
            .with_selection(cli.selection())
            .with_combinations(cli.n_task_combinations)
            .with_seed(cli.random_seed)
            .with_step_multiplier(cli.step_multiplier)
            .with_step_timeout(Duration::from_secs(cli.step_timeout))
            .with_results_dir(&cli.results_dir)
            .with_emulator_setup(cli.perform_emulator_setup)
            .with_trajectories(cli.save_trajectories)
            .with_portal_service(&cli.portal_service)
            .with_overlay_keepalive(Duration::from_secs(cli.overlay_keepalive));

        if let Some(max_steps) = cli.max_steps {
            config = config.with_max_steps(max_steps);
        }
        if let Some(secs) = cli.task_timeout {
            config = config.with_task_timeout(Duration::from_secs(secs));
        }
        config.adb_path = cli.adb_path.clone();
        config.console_port = cli.console_port;
        config.device_serial = cli.device_serial.clone();
        config.emulator_name = cli.emulator_name.clone();
        config.portal_apk = cli.portal_apk.clone();
        config.env_url = cli.env_url.clone();
        config.agent_command = cli.agent_command.clone();
        config.agent_debug = cli.agent_debug;
        config
    }
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
///
/// Returns an error (and so a non-zero exit) for an invalid selection or a
/// run-fatal error, after the partial summary has been printed.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let json = cli.json;
    let list_only = cli.list_tasks;

    let config = RunConfig::from_cli(&cli);
    let orchestrator = BenchmarkOrchestrator::from_config(config)?;

    if list_only {
        return run_list_command(&orchestrator, json).await;
    }

    let orchestrator = if json {
        orchestrator
    } else {
        orchestrator.with_progress(print_progress)
    };

    info!(
        provider = %orchestrator.config().llm.provider,
        model = %orchestrator.config().llm.model,
        results_dir = %orchestrator.config().results_dir.display(),
        "Starting benchmark run"
    );

    let outcome = match orchestrator.run().await {
        Ok(outcome) => outcome,
        Err(e @ BenchError::UnknownTask(_)) => {
            anyhow::bail!("{}. Use --list-tasks to see the available tasks", e)
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.summary)?);
    } else {
        print_summary(&outcome);
    }

    match outcome.fatal {
        Some(e) => Err(anyhow::anyhow!("Run aborted: {}", e)),
        None => Ok(()),
    }
}

async fn run_list_command(orchestrator: &BenchmarkOrchestrator, json: bool) -> anyhow::Result<()> {
    let catalog = orchestrator.list_tasks().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(catalog.list())?);
        return Ok(());
    }

    println!("Available tasks ({}):", catalog.len());
    for spec in catalog.list() {
        println!(
            "{:>4}: {} [{}] complexity {}",
            spec.id, spec.name, spec.family, spec.complexity
        );
    }
    Ok(())
}

fn print_progress(result: &TaskResult, index: usize, total: usize) {
    let status_icon = match result.outcome {
        TaskOutcome::Succeeded => "✓",
        TaskOutcome::Failed => "✗",
        TaskOutcome::Errored => "⚠",
    };
    println!(
        "[{}/{}] {} {} {} in {:.1}s ({}/{} steps)",
        index,
        total,
        status_icon,
        result.label(),
        result.outcome,
        result.duration_secs,
        result.steps_taken,
        result.max_steps
    );
    if let Some(ref err) = result.error {
        println!("   ⚠ {}", err);
    }
}

fn print_summary(outcome: &RunOutcome) {
    let summary = &outcome.summary;

    println!();
    println!("{}", "=".repeat(50));
    println!("📊 Benchmark Summary");
    println!("{}", "=".repeat(50));
    println!("Total tasks: {}", summary.total_tasks);
    println!("Succeeded: {}", summary.succeeded);
    println!("Failed: {}", summary.failed);
    println!("Errored: {}", summary.errored);
    println!("Success rate: {:.1}%", summary.success_rate * 100.0);
    println!("Average steps: {:.1}", summary.avg_steps);
    println!("Average duration: {:.1}s", summary.avg_duration_secs);

    if summary.by_family.len() > 1 {
        println!("\n📈 By family:");
        for (family, stats) in &summary.by_family {
            println!(
                "  {}: {}/{} ({:.1}%)",
                family,
                stats.succeeded,
                stats.total,
                stats.success_rate * 100.0
            );
        }
    }

    if let Some(ref e) = outcome.fatal {
        println!("\n⚠ Run aborted: {}", e);
    }
    println!("\n📁 Summary saved to: {}", outcome.summary_path.display());
}
