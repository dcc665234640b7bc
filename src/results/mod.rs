//! Result persistence and run summaries.

pub mod store;
pub mod summary;

pub use store::{ResultStore, SUMMARY_FILE, TRAJECTORY_DIR};
pub use summary::{GroupStats, RunInfo, Summary};
