//! Error types for benchmark runs.
//!
//! Each collaborator has its own error enum; [`BenchError`] is the run-level
//! taxonomy the orchestrator and CLI reason about:
//! - selection errors are reported before anything touches the device
//! - per-task errors become `ERRORED` result records
//! - device and persistence errors end the run

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by the device bridge (adb or a test double).
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("device bridge executable not found: {0}")]
    NotFound(String),

    #[error("device bridge command failed with exit {status}: {detail}")]
    CommandFailed { status: i32, detail: String },

    #[error("device bridge command timed out after {0:?}")]
    Timeout(Duration),

    #[error("device is offline: {0}")]
    Offline(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// True for errors that mean the bridge lost the device, as opposed to a
    /// single command failing.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            BridgeError::NotFound(_) | BridgeError::Timeout(_) | BridgeError::Offline(_)
        )
    }
}

/// Errors raised by the external task suite.
#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("task suite request failed: {0}")]
    Request(String),

    #[error("task suite returned {status} for {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("failed to parse task suite response from {endpoint}: {message}")]
    Parse { endpoint: String, message: String },

    #[error("task suite did not become healthy within {0:?}")]
    Unhealthy(Duration),

    #[error("task '{0}' is not known to the task suite")]
    UnknownTask(String),
}

impl From<reqwest::Error> for SuiteError {
    fn from(err: reqwest::Error) -> Self {
        SuiteError::Request(err.to_string())
    }
}

/// Errors raised by the UI-driving agent.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to start agent '{command}': {message}")]
    Spawn { command: String, message: String },

    #[error("agent protocol error: {0}")]
    Protocol(String),

    #[error("agent exited before completing the step")]
    Exited,

    #[error("agent step timed out after {0:?}")]
    StepTimeout(Duration),

    #[error("agent reported an unrecoverable error: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while writing results to disk.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create results directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration errors detected before a run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Run-level error taxonomy.
#[derive(Debug, Error)]
pub enum BenchError {
    /// A requested task ID or name is absent from the catalog.
    #[error("unknown task selection: {}", .0.join(", "))]
    UnknownTask(Vec<String>),

    /// The device bridge cannot be reached; no further task can run.
    #[error("device unreachable: {0}")]
    DeviceUnreachable(String),

    /// Task-specific setup failed; the task is recorded as errored.
    #[error("task setup failed: {0}")]
    TaskSetup(String),

    /// The agent failed; the task is recorded as errored.
    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    /// A result could not be written; the run cannot be trusted.
    #[error("failed to persist results: {0}")]
    ResultPersistence(#[from] StoreError),

    /// The task suite could not be queried before the run.
    #[error("task suite error: {0}")]
    Suite(#[from] SuiteError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl BenchError {
    /// Returns true if this error ends the whole run rather than one task.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            BenchError::DeviceUnreachable(_) | BenchError::ResultPersistence(_)
        )
    }
}

/// Result alias for run-level operations.
pub type Result<T> = std::result::Result<T, BenchError>;
