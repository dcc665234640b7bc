//! Task execution.
//!
//! Each task instance moves through a fixed lifecycle:
//!
//! ```text
//! PREPARING → RUNNING → {SUCCEEDED | FAILED | ERRORED} → RECORDED
//! ```
//!
//! `PREPARING` resets the device accessibility state and asks the suite for
//! a fresh task setup. `RUNNING` steps the agent until the success predicate
//! holds, the agent stops, or the step budget or time limit runs out.

pub mod executor;
pub mod result;

pub use executor::TaskRunner;
pub use result::{TaskOutcome, TaskResult, TaskState, TrajectoryStats, TrajectoryStep};
