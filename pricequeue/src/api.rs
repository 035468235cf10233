//! A JSON request/response surface over the queue.
//!
//! Requests name an `action`; responses always carry a `success` flag and, on failure, an
//! `error` message together with an http like status code. The module does not depend on any
//! transport, the CLI feeds it from stdin.
//!
//! ```
//! # use pricequeue::prelude::*;
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let backend = InMemoryBackend::new();
//! let queue = JobQueue::new(backend.clone());
//! let dispatcher = Dispatcher::new(backend, TaskRegistry::new());
//!
//! let response = api::handle_json(
//!     &queue,
//!     &dispatcher,
//!     r#"{ "action": "create", "job_type": "stock_load", "payload": { "symbol": "aapl" } }"#,
//! )
//! .await;
//! assert_eq!(response.status_code(), 200);
//! assert_eq!(response.body()["success"], true);
//! # });
//! ```
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::{
    backend::Backend,
    dispatcher::{Dispatcher, DEFAULT_TIMEOUT},
    job::{builder::EnqueueOptions, query::ListQuery, JobId},
    queue::JobQueue,
    QueueError,
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ApiRequest {
    List {
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        job_type: Option<String>,
        #[serde(default)]
        limit: Option<usize>,
    },
    Details {
        job_id: JobId,
    },
    Create {
        job_type: String,
        #[serde(default)]
        payload: Value,
        #[serde(default)]
        priority: Option<i32>,
        #[serde(default)]
        max_attempts: Option<u16>,
    },
    Process {
        #[serde(default)]
        timeout_seconds: Option<u64>,
    },
    Delete {
        job_id: JobId,
    },
    Stats,
    Pause {
        job_id: JobId,
    },
    Resume {
        job_id: JobId,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    status_code: u16,
    body: Value,
}

impl ApiResponse {
    fn ok(fields: Value) -> Self {
        let mut body = Map::new();
        body.insert("success".to_owned(), Value::Bool(true));
        if let Value::Object(fields) = fields {
            body.extend(fields);
        }
        Self {
            status_code: 200,
            body: Value::Object(body),
        }
    }

    fn error(status_code: u16, message: impl ToString) -> Self {
        Self {
            status_code,
            body: json!({ "success": false, "error": message.to_string() }),
        }
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn into_body(self) -> Value {
        self.body
    }
}

impl From<QueueError> for ApiResponse {
    fn from(error: QueueError) -> Self {
        let status_code = match &error {
            QueueError::Validation(_) => 400,
            QueueError::NotFound(_) => 404,
            QueueError::InvalidState { .. } => 409,
            QueueError::Backend(_) | QueueError::Encode(_) => 500,
        };
        if status_code == 500 {
            tracing::error!(?error, "Request failed: {error}");
        }
        Self::error(status_code, error)
    }
}

/// Parses and handles a raw request body. A body that is not a valid request is a `400`.
pub async fn handle_json<B>(
    queue: &JobQueue<B>,
    dispatcher: &Dispatcher<B>,
    request: &str,
) -> ApiResponse
where
    B: Backend + 'static,
{
    match serde_json::from_str(request) {
        Ok(request) => handle(queue, dispatcher, request).await,
        Err(error) => ApiResponse::error(400, format!("Invalid request: {error}")),
    }
}

pub async fn handle<B>(
    queue: &JobQueue<B>,
    dispatcher: &Dispatcher<B>,
    request: ApiRequest,
) -> ApiResponse
where
    B: Backend + 'static,
{
    execute(queue, dispatcher, request)
        .await
        .map_or_else(ApiResponse::from, ApiResponse::ok)
}

async fn execute<B>(
    queue: &JobQueue<B>,
    dispatcher: &Dispatcher<B>,
    request: ApiRequest,
) -> Result<Value, QueueError>
where
    B: Backend + 'static,
{
    match request {
        ApiRequest::List {
            status,
            job_type,
            limit,
        } => {
            let mut query = ListQuery::default();
            if let Some(status) = status {
                query = query.with_status(status.parse()?);
            }
            if let Some(job_type) = job_type {
                query = query.with_job_type(job_type.parse()?);
            }
            if let Some(limit) = limit {
                query = query.with_limit(limit);
            }
            let jobs = queue.list_jobs(&query).await?;
            Ok(json!({ "count": jobs.len(), "jobs": jobs }))
        }
        ApiRequest::Details { job_id } => {
            let job = queue.get_job(job_id).await?;
            Ok(json!({ "job": job }))
        }
        ApiRequest::Create {
            job_type,
            payload,
            priority,
            max_attempts,
        } => {
            let defaults = EnqueueOptions::default();
            let options = EnqueueOptions {
                priority: priority.unwrap_or(defaults.priority),
                max_attempts: max_attempts.unwrap_or(defaults.max_attempts),
                ..defaults
            };
            let job_id = queue.enqueue(&job_type, payload, options).await?;
            Ok(json!({ "job_id": job_id }))
        }
        ApiRequest::Process { timeout_seconds } => {
            let timeout = timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT);
            let outcome = dispatcher.process_next_job(timeout).await?;
            Ok(serde_json::to_value(outcome)?)
        }
        ApiRequest::Delete { job_id } => {
            queue.delete_job(job_id).await?;
            Ok(json!({ "job_id": job_id }))
        }
        ApiRequest::Stats => {
            let statistics = queue.statistics().await?;
            Ok(json!({ "statistics": statistics }))
        }
        ApiRequest::Pause { job_id } => {
            queue.pause_job(job_id).await?;
            Ok(json!({ "job_id": job_id }))
        }
        ApiRequest::Resume { job_id } => {
            queue.resume_job(job_id).await?;
            Ok(json!({ "job_id": job_id }))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        backend::memory::InMemoryBackend,
        job::JobType,
        task::{
            test::{MockOutcome, MockTask},
            TaskRegistry,
        },
    };

    fn setup() -> (JobQueue<InMemoryBackend>, Dispatcher<InMemoryBackend>) {
        let backend = InMemoryBackend::new();
        let task = MockTask::new(JobType::StockLoad, vec![MockOutcome::Done(json!({ "rows": 5 }))]);
        (
            JobQueue::new(backend.clone()),
            Dispatcher::new(backend, TaskRegistry::new().with_task(task)),
        )
    }

    #[test]
    fn parses_requests() {
        let request: ApiRequest =
            serde_json::from_str(r#"{ "action": "process" }"#).unwrap();
        assert_eq!(
            request,
            ApiRequest::Process {
                timeout_seconds: None
            }
        );

        let request: ApiRequest = serde_json::from_str(
            r#"{ "action": "list", "status": "failed", "limit": 5 }"#,
        )
        .unwrap();
        assert_eq!(
            request,
            ApiRequest::List {
                status: Some("failed".to_owned()),
                job_type: None,
                limit: Some(5)
            }
        );
    }

    #[tokio::test]
    async fn create_process_and_inspect() {
        let (queue, dispatcher) = setup();

        let response = handle_json(
            &queue,
            &dispatcher,
            r#"{ "action": "create", "job_type": "stock_load", "payload": { "symbol": "aapl " }, "priority": 2 }"#,
        )
        .await;
        assert_eq!(response.body(), &json!({ "success": true, "job_id": 1 }));

        let response = handle_json(&queue, &dispatcher, r#"{ "action": "process", "timeout_seconds": 30 }"#).await;
        assert_eq!(
            response.body(),
            &json!({
                "success": true,
                "status": "completed",
                "job_id": 1,
                "result": { "rows": 5 }
            })
        );

        let response = handle_json(&queue, &dispatcher, r#"{ "action": "process" }"#).await;
        assert_eq!(response.body(), &json!({ "success": true, "status": "no_job" }));

        let response = handle_json(&queue, &dispatcher, r#"{ "action": "details", "job_id": 1 }"#).await;
        assert_eq!(response.status_code(), 200);
        let job = &response.body()["job"];
        assert_eq!(job["status"], "completed");
        assert_eq!(job["job_type"], "stock_load");
        assert_eq!(job["payload"], json!({ "symbol": "AAPL" }));
        assert_eq!(job["priority"], 2);

        let response = handle_json(&queue, &dispatcher, r#"{ "action": "list", "status": "completed" }"#).await;
        assert_eq!(response.body()["count"], 1);

        let response = handle_json(&queue, &dispatcher, r#"{ "action": "stats" }"#).await;
        assert_eq!(response.body()["statistics"]["total"], 1);
        assert_eq!(response.body()["statistics"]["by_status"]["completed"], 1);
    }

    #[tokio::test]
    async fn error_status_codes() {
        let (queue, dispatcher) = setup();

        let response = handle_json(&queue, &dispatcher, "{ not json").await;
        assert_eq!(response.status_code(), 400);
        assert_eq!(response.body()["success"], false);

        let response = handle_json(&queue, &dispatcher, r#"{ "action": "explode" }"#).await;
        assert_eq!(response.status_code(), 400);

        let response = handle_json(
            &queue,
            &dispatcher,
            r#"{ "action": "create", "job_type": "stock_load", "payload": {} }"#,
        )
        .await;
        assert_eq!(response.status_code(), 400);
        assert_eq!(response.body()["error"], "Invalid request: A symbol is required");

        let response = handle_json(&queue, &dispatcher, r#"{ "action": "list", "status": "running" }"#).await;
        assert_eq!(response.status_code(), 400);

        let response = handle_json(&queue, &dispatcher, r#"{ "action": "details", "job_id": 3 }"#).await;
        assert_eq!(response.status_code(), 404);
        assert_eq!(
            response.body(),
            &json!({ "success": false, "error": "Job not found: 3" })
        );

        handle_json(
            &queue,
            &dispatcher,
            r#"{ "action": "create", "job_type": "stock_load", "payload": { "symbol": "IBM" } }"#,
        )
        .await;
        handle_json(&queue, &dispatcher, r#"{ "action": "process" }"#).await;
        let response = handle_json(&queue, &dispatcher, r#"{ "action": "delete", "job_id": 1 }"#).await;
        assert_eq!(response.status_code(), 409);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn pause_resume_and_delete() {
        let (queue, dispatcher) = setup();
        handle_json(
            &queue,
            &dispatcher,
            r#"{ "action": "create", "job_type": "portfolio_load", "payload": { "symbols": ["T"] } }"#,
        )
        .await;

        let response = handle_json(&queue, &dispatcher, r#"{ "action": "pause", "job_id": 1 }"#).await;
        assert!(response.is_success());
        let response = handle_json(&queue, &dispatcher, r#"{ "action": "process" }"#).await;
        assert_eq!(response.body()["status"], "no_job");

        let response = handle_json(&queue, &dispatcher, r#"{ "action": "resume", "job_id": 1 }"#).await;
        assert!(response.is_success());
        let response = handle_json(&queue, &dispatcher, r#"{ "action": "delete", "job_id": 1 }"#).await;
        assert_eq!(response.body(), &json!({ "success": true, "job_id": 1 }));
    }
}
