//! On-disk result store.
//!
//! Layout under the results directory:
//!
//! ```text
//! <dir>/<run-timestamp>_<run-id>_<task-name>_<combination>.json
//! <dir>/trajectories/<run-timestamp>_<run-id>_<task-name>_<combination>.json
//! <dir>/summary.json
//! ```
//!
//! `<run-id>` is the first eight characters of the run ID, so two runs
//! started in the same second never share file names.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::summary::Summary;
use crate::error::StoreError;
use crate::runner::TaskResult;

pub const SUMMARY_FILE: &str = "summary.json";
pub const TRAJECTORY_DIR: &str = "trajectories";

/// Writes result records for one run.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
    run_stamp: String,
    save_trajectories: bool,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>, started_at: DateTime<Utc>, run_id: &str) -> Self {
        let short_id: String = run_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(8)
            .collect();
        Self {
            dir: dir.into(),
            run_stamp: format!("{}_{}", started_at.format("%Y%m%d_%H%M%S"), short_id),
            save_trajectories: false,
        }
    }

    pub fn with_trajectories(mut self, save: bool) -> Self {
        self.save_trajectories = save;
        self
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join(SUMMARY_FILE)
    }

    /// File name for a result; stable for a given run and instance.
    pub fn file_name(&self, result: &TaskResult) -> String {
        format!(
            "{}_{}_{}.json",
            self.run_stamp,
            sanitize(&result.task_name),
            result.combination
        )
    }

    /// Persists one result (and its trajectory, if enabled) and returns the
    /// path of the result file.
    pub async fn save(&self, result: &mut TaskResult) -> Result<PathBuf, StoreError> {
        self.ensure_dir(&self.dir).await?;
        let name = self.file_name(result);

        if self.save_trajectories && !result.trajectory.is_empty() {
            let dir = self.dir.join(TRAJECTORY_DIR);
            self.ensure_dir(&dir).await?;
            let path = dir.join(&name);
            write_json(&path, &result.trajectory).await?;
            result.trajectory_path = Some(path);
        }

        let path = self.dir.join(&name);
        write_json(&path, &*result).await?;
        info!(path = %path.display(), "Saved task result");
        Ok(path)
    }

    /// Writes `summary.json`, replacing any earlier version.
    pub async fn save_summary(&self, summary: &Summary) -> Result<PathBuf, StoreError> {
        self.ensure_dir(&self.dir).await?;
        let path = self.summary_path();
        let tmp = self.dir.join(format!(".{}.tmp", SUMMARY_FILE));
        write_json(&tmp, summary).await?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|source| StoreError::Write {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "Saved summary");
        Ok(path)
    }

    async fn ensure_dir(&self, dir: &Path) -> Result<(), StoreError> {
        fs::create_dir_all(dir)
            .await
            .map_err(|source| StoreError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(value)?;
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs::File::create(path).await.map_err(write_err)?;
    file.write_all(&json).await.map_err(write_err)?;
    file.sync_all().await.map_err(write_err)?;
    Ok(())
}

/// Keeps task names filesystem-safe.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "task".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentAction;
    use crate::catalog::{TaskInstance, TaskSpec};
    use crate::runner::{TaskOutcome, TrajectoryStep};
    use chrono::TimeZone;

    const RUN_ID: &str = "3f2a9c1b-7d4e-4c1a-9b2e-5a6f7c8d9e0f";

    fn started() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap()
    }

    fn result(name: &str, combination: u32) -> TaskResult {
        let instance = TaskInstance::new(
            TaskSpec {
                id: 1,
                name: name.into(),
                family: "android_world".into(),
                complexity: 1,
            },
            combination,
            42,
        );
        TaskResult::new("run-1", &instance, 10).with_outcome(TaskOutcome::Failed)
    }

    #[test]
    fn test_file_name() {
        let store = ResultStore::new("/tmp/out", started(), RUN_ID);
        assert_eq!(
            store.file_name(&result("ContactsAddContact", 1)),
            "20260301_093000_3f2a9c1b_ContactsAddContact_1.json"
        );
        assert_eq!(
            store.file_name(&result("weird/name x", 0)),
            "20260301_093000_3f2a9c1b_weird_name_x_0.json"
        );
    }

    #[test]
    fn test_runs_in_same_second_do_not_collide() {
        let first = ResultStore::new("/tmp/out", started(), RUN_ID);
        let second = ResultStore::new("/tmp/out", started(), "9c0d1e2f-0000-4000-8000-00000000");
        let record = result("ContactsAddContact", 0);
        assert_ne!(first.file_name(&record), second.file_name(&record));
    }

    #[test]
    fn test_sanitize_empty() {
        assert_eq!(sanitize(""), "task");
    }

    #[tokio::test]
    async fn test_save_creates_directory_and_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("results");
        let store = ResultStore::new(&dir, started(), RUN_ID);

        let mut record = result("ContactsAddContact", 0);
        let path = store.save(&mut record).await.unwrap();

        assert!(path.starts_with(&dir));
        let saved: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(saved["task_name"], "ContactsAddContact");
        assert_eq!(saved["success"], false);
        assert!(record.trajectory_path.is_none());
    }

    #[tokio::test]
    async fn test_trajectory_written_when_enabled() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultStore::new(tmp.path(), started(), RUN_ID).with_trajectories(true);

        let mut record = result("ClockStopWatchRunning", 0).with_trajectory(vec![TrajectoryStep {
            step: 1,
            timestamp: started(),
            duration_ms: 5,
            action: Some(AgentAction::new("tap")),
            finished: None,
            success_check: Some(false),
        }]);
        store.save(&mut record).await.unwrap();

        let path = record.trajectory_path.clone().unwrap();
        assert!(path.starts_with(tmp.path().join(TRAJECTORY_DIR)));
        let steps: Vec<TrajectoryStep> =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(steps.len(), 1);
    }

    #[tokio::test]
    async fn test_summary_is_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultStore::new(tmp.path(), started(), RUN_ID);

        let mut summary = Summary::from_results(&[result("A", 0)]);
        store.save_summary(&summary).await.unwrap();
        summary = Summary::from_results(&[result("A", 0), result("B", 0)]);
        let path = store.save_summary(&summary).await.unwrap();

        let saved: Summary = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(saved.total_tasks, 2);
        let entries: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_unwritable_directory_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let store = ResultStore::new(blocker.join("results"), started(), RUN_ID);

        let err = store.save(&mut result("A", 0)).await.unwrap_err();
        assert!(matches!(err, StoreError::CreateDir { .. }));
    }
}
