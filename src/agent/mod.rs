//! UI-driving agent seam.
//!
//! The agent decides what to do; this crate only feeds it the goal and the
//! current observation, one discrete step at a time, and reads back what it did.

pub mod process;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentError;

pub use process::{ProcessAgent, ProcessAgentFactory};

/// One discrete UI action reported by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl AgentAction {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            params: Value::Null,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// The agent's own verdict when it stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub success: bool,
    #[serde(default)]
    pub reason: String,
    /// Final answer for question-style tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

/// Result of one agent step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    #[serde(default)]
    pub action: Option<AgentAction>,
    #[serde(default)]
    pub finished: Option<Completion>,
}

impl AgentStep {
    pub fn action(action: AgentAction) -> Self {
        Self {
            action: Some(action),
            finished: None,
        }
    }

    pub fn finish(success: bool, reason: impl Into<String>) -> Self {
        Self {
            action: None,
            finished: Some(Completion {
                success,
                reason: reason.into(),
                answer: None,
            }),
        }
    }

    pub fn answer(answer: impl Into<String>) -> Self {
        let answer = answer.into();
        Self {
            action: None,
            finished: Some(Completion {
                success: true,
                reason: format!("answered: {}", answer),
                answer: Some(answer),
            }),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }
}

/// What the agent sees before deciding its next step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// 1-based index of the step about to be taken.
    pub step: u32,
    pub steps_remaining: u32,
    /// UI state from the portal, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<AgentAction>,
}

/// What an agent session is started with.
#[derive(Debug, Clone)]
pub struct AgentTask {
    pub task_name: String,
    pub goal: String,
    pub max_steps: u32,
}

/// A running agent session for one task instance.
#[async_trait]
pub trait Agent: Send {
    /// Performs one UI action (or finishes) and reports back synchronously.
    async fn run_step(&mut self, goal: &str, observation: &Observation)
        -> Result<AgentStep, AgentError>;

    /// Releases the session. Called once per task, whatever the outcome.
    async fn shutdown(&mut self) {}
}

/// Starts a fresh agent session per task instance.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn start(&self, task: &AgentTask) -> Result<Box<dyn Agent>, AgentError>;
}
