//! HTTP client for an AndroidWorld environment server.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{SuiteParams, TaskSetup, TaskSuite};
use crate::catalog::{SuiteTask, TaskInstance};
use crate::error::SuiteError;

/// Score at or above which a task counts as solved.
const SUCCESS_THRESHOLD: f64 = 0.999;

/// Delay between health probes while waiting for the server.
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct TaskListResponse {
    task_list: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GoalResponse {
    goal: String,
}

#[derive(Debug, Deserialize)]
struct ComplexityResponse {
    complexity: f64,
}

#[derive(Debug, Deserialize)]
struct TaskLengthResponse {
    length: u32,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: f64,
}

/// Task suite served by the AndroidWorld environment server.
#[derive(Debug, Clone)]
pub struct HttpTaskSuite {
    client: Client,
    base_url: String,
    family: String,
}

impl HttpTaskSuite {
    pub fn new(base_url: impl Into<String>, family: impl Into<String>) -> Result<Self, SuiteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            family: family.into(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    pub async fn health(&self) -> bool {
        match self.client.get(self.url("/health")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Health probe failed");
                false
            }
        }
    }

    async fn check(endpoint: &str, resp: Response) -> Result<Response, SuiteError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(SuiteError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T, SuiteError> {
        let resp = self.client.get(self.url(endpoint)).query(query).send().await?;
        let resp = Self::check(endpoint, resp).await?;
        resp.json::<T>().await.map_err(|e| SuiteError::Parse {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })
    }

    async fn post(&self, endpoint: &str, query: &[(&str, String)]) -> Result<(), SuiteError> {
        let resp = self.client.post(self.url(endpoint)).query(query).send().await?;
        Self::check(endpoint, resp).await?;
        Ok(())
    }

    async fn execute_action(&self, action: serde_json::Value) -> Result<(), SuiteError> {
        let endpoint = "/execute_action";
        let resp = self
            .client
            .post(self.url(endpoint))
            .json(&action)
            .send()
            .await?;
        Self::check(endpoint, resp).await?;
        Ok(())
    }

    fn task_query(instance: &TaskInstance) -> [(&'static str, String); 2] {
        [
            ("task_type", instance.spec.name.clone()),
            ("task_idx", instance.combination.to_string()),
        ]
    }

    async fn complexity(&self, task: &str) -> Result<u32, SuiteError> {
        let resp: ComplexityResponse = self
            .get_json(
                "/task/complexity",
                &[("task_type", task.to_string()), ("task_idx", "0".to_string())],
            )
            .await?;
        Ok(resp.complexity.ceil().max(1.0) as u32)
    }
}

#[async_trait]
impl TaskSuite for HttpTaskSuite {
    async fn wait_ready(&self, timeout: Duration) -> Result<(), SuiteError> {
        let start = Instant::now();
        loop {
            if self.health().await {
                debug!(url = %self.base_url, "Task suite is healthy");
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(SuiteError::Unhealthy(timeout));
            }
            info!("Environment is not healthy, waiting for 1 second...");
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }
    }

    async fn initialize(&self, params: &SuiteParams) -> Result<(), SuiteError> {
        info!(
            family = %params.family,
            combinations = params.n_task_combinations,
            seed = params.seed,
            "Reinitializing task suite"
        );
        self.post(
            "/suite/reinitialize",
            &[
                ("n_task_combinations", params.n_task_combinations.to_string()),
                ("seed", params.seed.to_string()),
                ("task_family", params.family.clone()),
            ],
        )
        .await
    }

    async fn list_tasks(&self) -> Result<Vec<SuiteTask>, SuiteError> {
        let resp: TaskListResponse = self
            .get_json("/suite/task_list", &[("max_index", "-1".to_string())])
            .await?;

        let mut tasks = Vec::with_capacity(resp.task_list.len());
        for name in resp.task_list {
            let complexity = self.complexity(&name).await?;
            tasks.push(SuiteTask::new(name, self.family.clone(), complexity));
        }
        debug!(count = tasks.len(), "Fetched task list");
        Ok(tasks)
    }

    async fn instance_count(&self, task: &str) -> Result<Option<u32>, SuiteError> {
        let resp: TaskLengthResponse = self
            .get_json("/suite/task_length", &[("task_type", task.to_string())])
            .await?;
        Ok(Some(resp.length))
    }

    async fn reset_task(&self, instance: &TaskInstance) -> Result<TaskSetup, SuiteError> {
        let query = Self::task_query(instance);
        self.post("/task/initialize", &query).await?;
        let resp: GoalResponse = self.get_json("/task/goal", &query).await?;
        Ok(TaskSetup { goal: resp.goal })
    }

    async fn check_success(&self, instance: &TaskInstance) -> Result<bool, SuiteError> {
        let resp: ScoreResponse = self
            .get_json("/task/score", &Self::task_query(instance))
            .await?;
        Ok(resp.score >= SUCCESS_THRESHOLD)
    }

    async fn submit_answer(&self, answer: &str) -> Result<(), SuiteError> {
        self.execute_action(json!({ "action_type": "answer", "text": answer }))
            .await
    }

    async fn report_status(&self, completed: bool) -> Result<(), SuiteError> {
        let goal_status = if completed { "completed" } else { "failed" };
        self.execute_action(json!({ "action_type": "status", "goal_status": goal_status }))
            .await
    }

    async fn tear_down(&self, instance: &TaskInstance) -> Result<(), SuiteError> {
        self.post("/task/tear_down", &Self::task_query(instance)).await
    }

    async fn go_home(&self) -> Result<(), SuiteError> {
        self.post("/reset", &[("go_home", "true".to_string())]).await
    }
}
