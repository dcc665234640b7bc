//! Agent running as an external process, spoken to over JSON lines.
//!
//! One request line per step on stdin, one response line per step on stdout:
//!
//! ```text
//! → {"type":"step","goal":"...","observation":{...}}
//! ← {"action":{"action_type":"tap","params":{...}},"finished":null}
//! ```
//!
//! A response carrying `"error"` is an unrecoverable agent failure.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::{Agent, AgentFactory, AgentStep, AgentTask, Observation};
use crate::config::LlmConfig;
use crate::error::AgentError;

#[derive(Debug, Deserialize)]
struct StepResponse {
    #[serde(flatten)]
    step: AgentStep,
    #[serde(default)]
    error: Option<String>,
}

/// Launches one agent process per task.
#[derive(Debug, Clone)]
pub struct ProcessAgentFactory {
    program: String,
    args: Vec<String>,
    llm: LlmConfig,
    device_serial: String,
    step_timeout: Duration,
    debug: bool,
}

impl ProcessAgentFactory {
    pub fn new(
        program: impl Into<String>,
        llm: LlmConfig,
        device_serial: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            llm,
            device_serial: device_serial.into(),
            step_timeout: Duration::from_secs(120),
            debug: false,
        }
    }

    /// Splits a command line like `python -m droidrun_agent` on whitespace.
    pub fn from_command_line(
        command: &str,
        llm: LlmConfig,
        device_serial: impl Into<String>,
    ) -> Result<Self, AgentError> {
        let mut parts = command.split_whitespace().map(String::from);
        let program = parts.next().ok_or_else(|| AgentError::Spawn {
            command: command.to_string(),
            message: "empty command".to_string(),
        })?;
        Ok(Self::new(program, llm, device_serial).with_args(parts.collect()))
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    fn command(&self, task: &AgentTask) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("DROIDRUN_LLM_PROVIDER", &self.llm.provider)
            .env("DROIDRUN_LLM_MODEL", &self.llm.model)
            .env("DROIDRUN_TEMPERATURE", self.llm.temperature.to_string())
            .env("DROIDRUN_REASONING", self.llm.reasoning.to_string())
            .env("DROIDRUN_DEBUG", self.debug.to_string())
            .env("DROIDRUN_DEVICE_SERIAL", &self.device_serial)
            .env("DROIDRUN_MAX_STEPS", task.max_steps.to_string())
            .env("DROIDRUN_TASK_NAME", &task.task_name);

        if let (Some(var), Some(key)) = (self.llm.api_key_env(), self.llm.api_key.as_ref()) {
            cmd.env(var, key);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl AgentFactory for ProcessAgentFactory {
    async fn start(&self, task: &AgentTask) -> Result<Box<dyn Agent>, AgentError> {
        let mut child = self.command(task).spawn().map_err(|e| AgentError::Spawn {
            command: self.program.clone(),
            message: e.to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| AgentError::Spawn {
            command: self.program.clone(),
            message: "stdin not captured".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| AgentError::Spawn {
            command: self.program.clone(),
            message: "stdout not captured".to_string(),
        })?;

        info!(agent = %self.program, task = %task.task_name, "Started agent process");
        Ok(Box::new(ProcessAgent {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            step_timeout: self.step_timeout,
        }))
    }
}

/// A live agent process for one task.
pub struct ProcessAgent {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    step_timeout: Duration,
}

impl ProcessAgent {
    async fn exchange(&mut self, request: String) -> Result<String, AgentError> {
        self.stdin.write_all(request.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;

        loop {
            let line = match tokio::time::timeout(self.step_timeout, self.stdout.next_line()).await
            {
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => return Err(AgentError::Exited),
                Ok(Err(e)) => return Err(AgentError::Io(e)),
                Err(_) => return Err(AgentError::StepTimeout(self.step_timeout)),
            };
            let line = line.trim();
            // Agents may log to stdout; only JSON objects are protocol lines.
            if line.starts_with('{') {
                return Ok(line.to_string());
            }
            if !line.is_empty() {
                debug!(output = line, "Agent output");
            }
        }
    }
}

#[async_trait]
impl Agent for ProcessAgent {
    async fn run_step(
        &mut self,
        goal: &str,
        observation: &Observation,
    ) -> Result<AgentStep, AgentError> {
        let request = json!({
            "type": "step",
            "goal": goal,
            "observation": observation,
        })
        .to_string();

        let line = self.exchange(request).await?;
        let response: StepResponse = serde_json::from_str(&line)
            .map_err(|e| AgentError::Protocol(format!("{}: {}", e, line)))?;

        if let Some(error) = response.error {
            return Err(AgentError::Failed(error));
        }
        Ok(response.step)
    }

    async fn shutdown(&mut self) {
        let _ = self.stdin.write_all(b"{\"type\":\"shutdown\"}\n").await;
        let _ = self.stdin.flush().await;
        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => debug!(?status, "Agent process exited"),
            _ => {
                warn!("Agent did not exit after shutdown, killing");
                let _ = self.child.kill().await;
            }
        }
    }
}
