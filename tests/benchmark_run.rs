//! End-to-end benchmark runs against in-memory collaborators.

mod common;

use android_world_bench::catalog::TaskSelection;
use android_world_bench::config::{RunConfig, DEFAULT_PORTAL_SERVICE};
use android_world_bench::error::BenchError;
use android_world_bench::results::{Summary, SUMMARY_FILE};

use common::{harness, read_json, result_files, FakeBridge, FakeSuite, Journal};

const TASKS: [&str; 5] = [
    "ClockStopWatchRunning",
    "ContactsAddContact",
    "MarkorCreateNote",
    "SystemBluetoothTurnOn",
    "SystemWifiTurnOn",
];

fn config(results_dir: &std::path::Path) -> RunConfig {
    RunConfig::default()
        .with_results_dir(results_dir)
        .with_max_steps(4)
}

#[tokio::test]
async fn test_two_combinations_of_one_task() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("results");
    let h = harness(
        config(&dir)
            .with_selection(TaskSelection::all().with_ids([1]))
            .with_combinations(2)
            .with_seed(42),
        FakeBridge::new(),
        FakeSuite::with_tasks(&TASKS).solved_after("ClockStopWatchRunning", 2),
    );

    let outcome = h.orchestrator.run().await.unwrap();
    assert!(outcome.fatal.is_none());

    let files = result_files(&dir);
    assert_eq!(files.len(), 2);
    assert!(dir.join(SUMMARY_FILE).is_file());

    let first = read_json(&files[0]);
    let second = read_json(&files[1]);
    assert_eq!(first["task_name"], "ClockStopWatchRunning");
    assert_eq!(first["combination"], 0);
    assert_eq!(second["combination"], 1);
    assert_eq!(first["seed"], 43);
    assert_eq!(second["seed"], 44);
    assert_eq!(first["success"], true);
    assert_eq!(first["steps_taken"], 2);

    assert_eq!(
        *h.suite.resets.lock().unwrap(),
        vec![
            ("ClockStopWatchRunning".to_string(), 0),
            ("ClockStopWatchRunning".to_string(), 1)
        ]
    );
    let init = h.suite.initialized.lock().unwrap();
    assert_eq!(init.len(), 1);
    assert_eq!(init[0].n_task_combinations, 2);
    assert_eq!(init[0].seed, 42);
}

#[tokio::test]
async fn test_list_tasks_never_touches_device() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(
        config(tmp.path()),
        FakeBridge::new(),
        FakeSuite::with_tasks(&["SystemWifiTurnOn", "ContactsAddContact"]),
    );

    let catalog = h.orchestrator.list_tasks().await.unwrap();
    let names: Vec<&str> = catalog.list().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["ContactsAddContact", "SystemWifiTurnOn"]);
    assert_eq!(catalog.list()[0].id, 1);
    assert_eq!(h.bridge.calls(), 0);
}

#[tokio::test]
async fn test_unknown_task_has_no_side_effects() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("results");
    let h = harness(
        config(&dir).with_selection(TaskSelection::all().with_ids([1, 99]).with_names(["Nope"])),
        FakeBridge::new(),
        FakeSuite::with_tasks(&TASKS),
    );

    let err = h.orchestrator.run().await.unwrap_err();
    match err {
        BenchError::UnknownTask(missing) => {
            assert_eq!(missing, vec!["id 99".to_string(), "name Nope".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.bridge.calls(), 0);
    assert!(!dir.exists());
    assert!(h.agents.started.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_device_loss_keeps_earlier_results() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("results");
    let h = harness(
        config(&dir),
        FakeBridge::offline_after(2),
        FakeSuite::with_tasks(&TASKS),
    );

    let outcome = h.orchestrator.run().await.unwrap();

    assert!(matches!(outcome.fatal, Some(BenchError::DeviceUnreachable(_))));
    assert_eq!(outcome.results.len(), 2);
    assert_eq!(result_files(&dir).len(), 2);

    let summary: Summary =
        serde_json::from_slice(&std::fs::read(dir.join(SUMMARY_FILE)).unwrap()).unwrap();
    assert_eq!(summary.total_tasks, 2);
    assert!(summary.is_aborted());
    assert_eq!(h.agents.started.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_result_write_failure_stops_run() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("results");
    let occupied = dir.clone();
    let h = harness(
        config(&dir).with_selection(TaskSelection::all().with_names([
            "ContactsAddContact",
            "MarkorCreateNote",
            "SystemWifiTurnOn",
        ])),
        FakeBridge::new(),
        FakeSuite::with_tasks(&TASKS).on_reset(move |instance| {
            if instance.spec.name != "MarkorCreateNote" {
                return;
            }
            // A directory where the next result file should go.
            let first = result_files(&occupied).pop().unwrap();
            let name = first
                .file_name()
                .unwrap()
                .to_string_lossy()
                .replace("ContactsAddContact", "MarkorCreateNote");
            std::fs::create_dir(occupied.join(name)).unwrap();
        }),
    );

    let outcome = h.orchestrator.run().await.unwrap();

    assert!(matches!(outcome.fatal, Some(BenchError::ResultPersistence(_))));
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.summary.total_tasks, 1);
    assert_eq!(h.suite.resets.lock().unwrap().len(), 2);

    let summary: Summary =
        serde_json::from_slice(&std::fs::read(dir.join(SUMMARY_FILE)).unwrap()).unwrap();
    assert_eq!(summary.total_tasks, 1);
    assert!(summary.is_aborted());
    assert_eq!(result_files(&dir).len(), 1);
}

#[tokio::test]
async fn test_emulator_setup_runs_once_before_first_task() {
    let tmp = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let h = harness(
        config(tmp.path())
            .with_selection(TaskSelection::all().with_ids([1, 2]))
            .with_emulator_setup(true),
        FakeBridge::new().journaled(&journal),
        FakeSuite::with_tasks(&TASKS).journaled(&journal),
    );

    h.orchestrator.run().await.unwrap();
    assert_eq!(
        *journal.lock().unwrap(),
        vec![
            "root".to_string(),
            "reset ClockStopWatchRunning#0".into(),
            "reset ContactsAddContact#0".into(),
        ]
    );
}

#[tokio::test]
async fn test_exhausted_budget_is_failed() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("results");
    let h = harness(
        config(&dir).with_selection(TaskSelection::all().with_names(["MarkorCreateNote"])),
        FakeBridge::new(),
        FakeSuite::with_tasks(&TASKS).solved_after("MarkorCreateNote", 5),
    );

    let outcome = h.orchestrator.run().await.unwrap();
    let result = &outcome.results[0];
    assert_eq!(result.outcome.to_string(), "failed");
    assert!(!result.success);
    assert_eq!(result.steps_taken, 4);
    assert!(result.error.is_none());
    assert_eq!(h.suite.tear_downs.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_errored_tasks_count_against_success_rate() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("results");
    let h = harness(
        config(&dir).with_selection(
            TaskSelection::all().with_names(["ContactsAddContact", "SystemWifiTurnOn"]),
        ),
        FakeBridge::new(),
        FakeSuite::with_tasks(&TASKS)
            .failing_setup("ContactsAddContact")
            .solved_after("SystemWifiTurnOn", 1),
    );

    let outcome = h.orchestrator.run().await.unwrap();
    assert!(outcome.fatal.is_none());
    assert_eq!(outcome.summary.total_tasks, 2);
    assert_eq!(outcome.summary.errored, 1);
    assert_eq!(outcome.summary.succeeded, 1);
    assert_eq!(outcome.summary.success_rate, 0.5);

    let errored = read_json(&result_files(&dir)[0]);
    assert_eq!(errored["task_name"], "ContactsAddContact");
    assert_eq!(errored["outcome"], "errored");
    assert!(errored["error"].as_str().unwrap().contains("app crashed"));
}

#[tokio::test]
async fn test_portal_is_the_only_enabled_service() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(
        config(tmp.path()).with_selection(TaskSelection::all().with_ids([2, 3])),
        FakeBridge::new(),
        FakeSuite::with_tasks(&TASKS),
    );

    h.orchestrator.run().await.unwrap();
    assert_eq!(
        h.bridge.setting("enabled_accessibility_services").as_deref(),
        Some(DEFAULT_PORTAL_SERVICE)
    );
    assert_eq!(h.bridge.setting("accessibility_enabled").as_deref(), Some("1"));
}

#[tokio::test]
async fn test_plan_is_deterministic() {
    let tmp = tempfile::tempdir().unwrap();
    let make = || {
        harness(
            config(tmp.path())
                .with_selection(TaskSelection::all().with_family("android_world"))
                .with_combinations(3)
                .with_seed(7),
            FakeBridge::new(),
            FakeSuite::with_tasks(&TASKS),
        )
    };

    let first = make().orchestrator.plan().await.unwrap();
    let second = make().orchestrator.plan().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 15);
    assert_eq!(first[0].spec.name, "ClockStopWatchRunning");
    assert_eq!(first[2].combination, 2);
    assert_eq!(first[3].spec.id, 2);
}

#[tokio::test]
async fn test_step_budget_scales_with_complexity() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(
        RunConfig::default()
            .with_results_dir(tmp.path())
            .with_selection(TaskSelection::all().with_ids([1])),
        FakeBridge::new(),
        FakeSuite::with_tasks(&TASKS).solved_after("ClockStopWatchRunning", 1),
    );

    h.orchestrator.run().await.unwrap();
    let started = h.agents.started.lock().unwrap();
    assert_eq!(started[0].max_steps, 15);
    assert_eq!(started[0].goal, "Complete ClockStopWatchRunning");
}
