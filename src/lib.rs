//! android_world_bench: AndroidWorld benchmark runner.
//!
//! Drives an external UI agent through AndroidWorld tasks on a single Android
//! emulator, one task instance at a time, and records a JSON result per
//! instance plus an aggregated run summary.

// Core modules
pub mod agent;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod orchestrator;
pub mod results;
pub mod runner;
pub mod suite;

pub use catalog::{TaskCatalog, TaskInstance, TaskSelection, TaskSpec};
pub use config::{LlmConfig, RunConfig};
pub use error::{AgentError, BenchError, BridgeError, ConfigError, StoreError, SuiteError};
pub use orchestrator::{BenchmarkOrchestrator, RunOutcome};
pub use results::{ResultStore, Summary};
pub use runner::{TaskOutcome, TaskResult, TaskRunner};
