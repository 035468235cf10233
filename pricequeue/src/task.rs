//! The units of work run by the [`Dispatcher`](crate::Dispatcher).
//!
//! Each [`JobType`] is handled by exactly one [`Task`], looked up in a [`TaskRegistry`].
//!
//! # Example
//!
//! ```
//! # use pricequeue::prelude::*;
//! # use serde_json::{json, Value};
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl Task for Echo {
//!     fn job_type(&self) -> JobType {
//!         JobType::StockLoad
//!     }
//!
//!     async fn run(&self, payload: &Payload, ctx: JobContext) -> Result<Value, TaskError> {
//!         ctx.report_progress(1, 1).await?;
//!         Ok(json!({ "symbols": payload.symbols() }))
//!     }
//! }
//!
//! let registry = TaskRegistry::new().with_task(Echo);
//! assert!(registry.get(JobType::StockLoad).is_some());
//! ```
use std::{collections::HashMap, error::Error, fmt::Display, sync::Arc};

use async_trait::async_trait;

use crate::{
    backend::{Backend, ExecutionError},
    job::{ErrorType, JobId, JobType, Payload, ValidationError},
    queue::JobQueue,
    QueueError,
};

#[async_trait]
pub trait Task: Send + Sync {
    fn job_type(&self) -> JobType;

    /// Executes one attempt of a job.
    ///
    /// The returned value is stored as the job's result. An error fails the attempt, which is
    /// retried while the job has attempts left.
    async fn run(&self, payload: &Payload, ctx: JobContext) -> Result<serde_json::Value, TaskError>;
}

/// Handle given to a running task.
#[derive(Clone)]
pub struct JobContext {
    job_id: JobId,
    attempt: u16,
    priority: i32,
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("attempt", &self.attempt)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl JobContext {
    pub fn new(job_id: JobId, attempt: u16, priority: i32, backend: Arc<dyn Backend>) -> Self {
        Self {
            job_id,
            attempt,
            priority,
            backend,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// The attempt being executed, starting at 1.
    pub fn attempt(&self) -> u16 {
        self.attempt
    }

    /// Priority of the running job, handy when enqueueing follow up work.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Writes progress straight through to the store.
    pub async fn report_progress(&self, current: i64, total: i64) -> Result<(), QueueError> {
        self.backend
            .update_progress(self.job_id, current, total)
            .await
            .map_err(QueueError::during("report progress for"))
    }

    /// A queue over the same store, for tasks that fan out into further jobs.
    pub fn queue(&self) -> JobQueue<Arc<dyn Backend>> {
        JobQueue::new(self.backend.clone())
    }
}

/// Errors that carry their own [`ErrorType`] when recorded on a job.
pub trait TaskFailure: Error + Send {
    fn error_type(&self) -> ErrorType;
}

/// A failed task attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskError {
    pub error_type: ErrorType,
    pub message: String,
}

impl TaskError {
    pub fn new(error_type: impl Into<ErrorType>, message: impl Display) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.to_string(),
        }
    }
}

impl Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

impl<T> From<T> for TaskError
where
    T: TaskFailure,
{
    fn from(value: T) -> Self {
        Self::new(value.error_type(), value)
    }
}

impl From<TaskError> for ExecutionError {
    fn from(value: TaskError) -> Self {
        Self {
            error_type: value.error_type,
            message: value.message,
        }
    }
}

impl TaskFailure for QueueError {
    fn error_type(&self) -> ErrorType {
        ErrorType::Other("queue".to_owned())
    }
}

impl TaskFailure for ValidationError {
    fn error_type(&self) -> ErrorType {
        ErrorType::Other("validation".to_owned())
    }
}

/// The tasks known to a dispatcher, keyed by the job type they handle.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<JobType, Arc<dyn Task>>,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.tasks.keys()).finish()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `task` for its job type, replacing any task registered before.
    pub fn with_task(mut self, task: impl Task + 'static) -> Self {
        self.register(Arc::new(task));
        self
    }

    pub fn register(&mut self, task: Arc<dyn Task>) {
        self.tasks.insert(task.job_type(), task);
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn Task>> {
        self.tasks.get(&job_type).cloned()
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::atomic::{AtomicU16, Ordering};

    use chrono::Utc;

    use super::*;
    use crate::{
        backend::{memory::InMemoryBackend, NewJob},
        job::{JobStatus, StockLoad},
    };
    use assert_matches::assert_matches;

    /// Behaviour of [`MockTask`] for one attempt.
    #[derive(Debug, Clone)]
    pub(crate) enum MockOutcome {
        Done(serde_json::Value),
        Fail(&'static str),
        Panic,
        Sleep(std::time::Duration),
    }

    /// Plays back one outcome per attempt, repeating the last one.
    pub(crate) struct MockTask {
        job_type: JobType,
        outcomes: Vec<MockOutcome>,
        pub(crate) runs: AtomicU16,
    }

    impl MockTask {
        pub(crate) fn new(job_type: JobType, outcomes: Vec<MockOutcome>) -> Self {
            Self {
                job_type,
                outcomes,
                runs: AtomicU16::new(0),
            }
        }
    }

    #[async_trait]
    impl Task for MockTask {
        fn job_type(&self) -> JobType {
            self.job_type
        }

        async fn run(
            &self,
            _payload: &Payload,
            _ctx: JobContext,
        ) -> Result<serde_json::Value, TaskError> {
            let run = usize::from(self.runs.fetch_add(1, Ordering::SeqCst));
            let outcome = self
                .outcomes
                .get(run)
                .or(self.outcomes.last())
                .cloned()
                .unwrap_or(MockOutcome::Done(serde_json::Value::Null));
            match outcome {
                MockOutcome::Done(value) => Ok(value),
                MockOutcome::Fail(message) => Err(TaskError::new("mock", message)),
                MockOutcome::Panic => panic!("task panicked"),
                MockOutcome::Sleep(duration) => {
                    tokio::time::sleep(duration).await;
                    Ok(serde_json::Value::Null)
                }
            }
        }
    }

    #[test]
    fn registry_lookup() {
        let registry = TaskRegistry::new()
            .with_task(MockTask::new(JobType::StockLoad, vec![]))
            .with_task(MockTask::new(JobType::DataChunk, vec![]));

        assert!(registry.get(JobType::StockLoad).is_some());
        assert!(registry.get(JobType::DataChunk).is_some());
        assert!(registry.get(JobType::PortfolioLoad).is_none());
    }

    #[test]
    fn task_errors_from_failures() {
        let error = TaskError::from(ValidationError::MissingSymbol);
        assert_eq!(error.error_type, ErrorType::Other("validation".to_owned()));
        assert_eq!(error.message, "A symbol is required");

        let error = ExecutionError::from(TaskError::new("network", "connection refused"));
        assert_eq!(error.error_type, ErrorType::Other("network".to_owned()));
        assert_eq!(error.message, "connection refused");
    }

    #[tokio::test]
    async fn context_reports_progress_and_enqueues() {
        let backend = InMemoryBackend::new();
        let job_id = backend.insert(NewJob::mock_job()).await.unwrap();
        backend.claim_next(Utc::now()).await.unwrap();
        let ctx = JobContext::new(job_id, 1, 0, Arc::new(backend.clone()));

        ctx.report_progress(3, 4).await.unwrap();
        let job = backend.get(job_id).await.unwrap().unwrap();
        assert_eq!((job.progress_current, job.progress_total), (3, 4));

        let child = ctx
            .queue()
            .enqueue_payload(StockLoad::new("IBM").into(), Default::default())
            .await
            .unwrap();
        let child = backend.get(child).await.unwrap().unwrap();
        assert_eq!(child.status, JobStatus::Pending);
        assert_eq!(child.payload, StockLoad::new("IBM").into());
    }

    #[tokio::test]
    async fn context_progress_requires_running_job() {
        let backend = InMemoryBackend::new();
        let job_id = backend.insert(NewJob::mock_job()).await.unwrap();
        let ctx = JobContext::new(job_id, 1, 0, Arc::new(backend));

        assert_matches!(
            ctx.report_progress(1, 2).await,
            Err(QueueError::InvalidState {
                status: JobStatus::Pending,
                ..
            })
        );
    }
}
