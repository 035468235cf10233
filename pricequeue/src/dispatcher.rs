//! Claims and executes jobs, one per call.
//!
//! There is no long lived worker loop: every call of [`Dispatcher::process_next_job`] claims at
//! most one job, runs it to completion or timeout and records the outcome. Callers drive the
//! dispatcher from a schedule (see [`crate::schedule`]), a request handler or a test.
use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinError;
use tracing::{instrument, Instrument};

use crate::{
    backend::{Backend, ExecutionError},
    backoff::RetryPolicy,
    job::{ErrorType, Job, JobId},
    task::{JobContext, TaskRegistry},
    QueueError,
};

/// Default time a single job may run for.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

const ERROR_TYPE_UNREGISTERED_TASK: &str = "unregistered_task";

/// What a call of [`Dispatcher::process_next_job`] did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// No job was eligible for dispatch.
    #[serde(rename = "no_job")]
    NoJobAvailable,
    Completed {
        job_id: JobId,
        result: serde_json::Value,
    },
    /// The attempt failed and the job went back to `pending`.
    Retrying {
        job_id: JobId,
        attempt: u16,
        max_attempts: u16,
        error_type: ErrorType,
        error: String,
        retry_at: DateTime<Utc>,
    },
    /// The final attempt failed.
    Failed {
        job_id: JobId,
        attempts: u16,
        error_type: ErrorType,
        error: String,
    },
}

impl ProcessOutcome {
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            ProcessOutcome::NoJobAvailable => None,
            ProcessOutcome::Completed { job_id, .. }
            | ProcessOutcome::Retrying { job_id, .. }
            | ProcessOutcome::Failed { job_id, .. } => Some(*job_id),
        }
    }
}

/// Runs pending jobs with the [`Task`](crate::task::Task) registered for their job type.
pub struct Dispatcher<B> {
    backend: Arc<B>,
    tasks: TaskRegistry,
    retry_policy: RetryPolicy,
}

impl<B> std::fmt::Debug for Dispatcher<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tasks", &self.tasks)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl<B> Clone for Dispatcher<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            tasks: self.tasks.clone(),
            retry_policy: self.retry_policy.clone(),
        }
    }
}

impl<B> Dispatcher<B>
where
    B: Backend + 'static,
{
    pub fn new(backend: B, tasks: TaskRegistry) -> Self {
        Self {
            backend: Arc::new(backend),
            tasks,
            retry_policy: RetryPolicy::immediate(),
        }
    }

    pub fn with_retry_policy(self, retry_policy: RetryPolicy) -> Self {
        Self {
            retry_policy,
            ..self
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Claims the next eligible job and executes it within `timeout`.
    ///
    /// Failures of the task, including panics and timeouts, are recorded on the job and reported
    /// in the returned [`ProcessOutcome`]. Only errors of the backend are returned as `Err`.
    #[instrument(skip(self), fields(job_id))]
    pub async fn process_next_job(&self, timeout: Duration) -> Result<ProcessOutcome, QueueError> {
        let Some(job) = self.backend.claim_next(Utc::now()).await? else {
            tracing::debug!("No job available");
            return Ok(ProcessOutcome::NoJobAvailable);
        };
        let job_id = job.id;
        tracing::Span::current().record("job_id", tracing::field::display(&job_id));
        tracing::debug!(
            %job_id,
            job_type = %job.job_type,
            "Executing job {job_id}, attempt {} of {}",
            job.attempts,
            job.max_attempts
        );

        match self.execute(&job, timeout).await {
            Ok(result) => self.handle_job_complete(job_id, result).await,
            Err(error) => self.handle_job_error(&job, error).await,
        }
    }

    async fn execute(
        &self,
        job: &Job,
        timeout: Duration,
    ) -> Result<serde_json::Value, ExecutionError> {
        let Some(task) = self.tasks.get(job.job_type) else {
            return Err(ExecutionError {
                error_type: ErrorType::Other(ERROR_TYPE_UNREGISTERED_TASK.to_owned()),
                message: format!("No task registered for job type {}", job.job_type),
            });
        };
        let ctx = JobContext::new(job.id, job.attempts, job.priority, self.backend.clone());
        let payload = job.payload.clone();
        let fut = async move { task.run(&payload, ctx).await }.in_current_span();

        match tokio::spawn(tokio::time::timeout(timeout, fut)).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(error))) => Err(error.into()),
            Ok(Err(_elapsed)) => Err(timeout.into()),
            Err(error) => Err(error.into()),
        }
    }

    async fn handle_job_complete(
        &self,
        job_id: JobId,
        result: serde_json::Value,
    ) -> Result<ProcessOutcome, QueueError> {
        tracing::debug!(%job_id, "Job complete {job_id}");
        self.backend
            .mark_completed(job_id, result.clone())
            .await
            .inspect_err(|err| {
                tracing::error!(
                    ?err,
                    %job_id,
                    "Failed to mark job {job_id} as completed, error: {err:?}",
                )
            })
            .map_err(QueueError::during("complete"))?;
        Ok(ProcessOutcome::Completed { job_id, result })
    }

    async fn handle_job_error(
        &self,
        job: &Job,
        error: ExecutionError,
    ) -> Result<ProcessOutcome, QueueError> {
        let job_id = job.id;
        if job.is_final_attempt() {
            tracing::error!(
                %job_id,
                ?error,
                "Job {job_id} failed after {} attempts: error type: {}, message: {}",
                job.attempts,
                error.error_type,
                error.message
            );
            self.backend
                .mark_failed(job_id, error.clone())
                .await
                .inspect_err(|err| {
                    tracing::error!(
                        ?err,
                        %job_id,
                        "Failed to mark job {job_id} as failed, error: {err:?}",
                    )
                })
                .map_err(QueueError::during("fail"))?;
            Ok(ProcessOutcome::Failed {
                job_id,
                attempts: job.attempts,
                error_type: error.error_type,
                error: error.message,
            })
        } else {
            let retry_at = self.retry_policy.retry_at(Utc::now(), job.attempts);
            tracing::warn!(
                %job_id,
                ?error,
                "Job {job_id} failed and will be retried at {retry_at}: error type: {}, message: {}",
                error.error_type,
                error.message
            );
            self.backend
                .mark_retryable(job_id, retry_at, error.clone())
                .await
                .inspect_err(|err| {
                    tracing::error!(
                        ?err,
                        %job_id,
                        "Failed to mark job {job_id} as retryable, error: {err:?}",
                    )
                })
                .map_err(QueueError::during("retry"))?;
            Ok(ProcessOutcome::Retrying {
                job_id,
                attempt: job.attempts,
                max_attempts: job.max_attempts,
                error_type: error.error_type,
                error: error.message,
                retry_at,
            })
        }
    }
}

impl From<JoinError> for ExecutionError {
    fn from(value: JoinError) -> Self {
        let msg = value.to_string();
        let message = match value.try_into_panic() {
            Ok(panic) => panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or(msg),
            Err(_) => msg,
        };
        Self {
            error_type: ErrorType::Panic,
            message,
        }
    }
}

impl From<Duration> for ExecutionError {
    fn from(value: Duration) -> Self {
        Self {
            error_type: ErrorType::Timeout,
            message: format!("Job failed to complete within timeout: {value:?}"),
        }
    }
}
