//! The job record store.
//!
//! [`Backend`] is the seam between the queue logic and persistence. Every mutation is scoped to a
//! single job row and conditional on the row's current status, so a store that can perform a
//! conditional single row update is sufficient to make concurrent dispatchers safe.
//!
//! Two implementations exist: [`memory::InMemoryBackend`] in this crate and a PostgreSQL backend
//! in `pricequeue-sqlx`. Both run the conformance suite in [`testing`].
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::job::{
    payload::Payload, query::ListQuery, ErrorType, Job, JobId, JobStatus, JobType,
    ValidationError,
};

pub mod memory;
mod queryable;
pub mod testing;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    /// Inserts a new `pending` job with zero attempts.
    async fn insert(&self, job: NewJob) -> Result<JobId, BackendError>;
    async fn get(&self, id: JobId) -> Result<Option<Job>, BackendError>;
    /// Most recently created first.
    async fn list(&self, query: &ListQuery) -> Result<Vec<Job>, BackendError>;
    /// Atomically moves the next eligible `pending` job to `processing`.
    ///
    /// A job is eligible when it is `pending`, scheduled at or before `now` and has attempts
    /// left. Eligible jobs are ordered by priority (highest first) then creation time (oldest
    /// first). Claiming sets `started_at` to `now` and increments `attempts`.
    ///
    /// Two concurrent callers never receive the same job.
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, BackendError>;
    /// Records task progress while the job is `processing`.
    ///
    /// `current` is clamped to `total` when `total` is positive.
    async fn update_progress(&self, id: JobId, current: i64, total: i64)
        -> Result<(), BackendError>;
    async fn mark_completed(&self, id: JobId, result: serde_json::Value)
        -> Result<(), BackendError>;
    /// Returns a `processing` job to `pending`, to become eligible again at `scheduled_at`.
    async fn mark_retryable(
        &self,
        id: JobId,
        scheduled_at: DateTime<Utc>,
        error: ExecutionError,
    ) -> Result<(), BackendError>;
    async fn mark_failed(&self, id: JobId, error: ExecutionError) -> Result<(), BackendError>;
    /// `pending` to `paused`.
    async fn mark_paused(&self, id: JobId) -> Result<(), BackendError>;
    /// `paused` to `pending`.
    async fn mark_resumed(&self, id: JobId) -> Result<(), BackendError>;
    /// Removes a `pending` or `failed` job.
    async fn delete(&self, id: JobId) -> Result<(), BackendError>;
    async fn count_by_status(&self) -> Result<Vec<(JobStatus, u64)>, BackendError>;
    async fn count_by_type(&self) -> Result<Vec<(JobType, u64)>, BackendError>;
    /// Number of jobs created per UTC day, for days at or after `since`.
    async fn created_per_day(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(NaiveDate, u64)>, BackendError>;
}

#[async_trait]
impl<T> Backend for Arc<T>
where
    T: Backend + ?Sized,
{
    async fn insert(&self, job: NewJob) -> Result<JobId, BackendError> {
        self.as_ref().insert(job).await
    }
    async fn get(&self, id: JobId) -> Result<Option<Job>, BackendError> {
        self.as_ref().get(id).await
    }
    async fn list(&self, query: &ListQuery) -> Result<Vec<Job>, BackendError> {
        self.as_ref().list(query).await
    }
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, BackendError> {
        self.as_ref().claim_next(now).await
    }
    async fn update_progress(
        &self,
        id: JobId,
        current: i64,
        total: i64,
    ) -> Result<(), BackendError> {
        self.as_ref().update_progress(id, current, total).await
    }
    async fn mark_completed(
        &self,
        id: JobId,
        result: serde_json::Value,
    ) -> Result<(), BackendError> {
        self.as_ref().mark_completed(id, result).await
    }
    async fn mark_retryable(
        &self,
        id: JobId,
        scheduled_at: DateTime<Utc>,
        error: ExecutionError,
    ) -> Result<(), BackendError> {
        self.as_ref().mark_retryable(id, scheduled_at, error).await
    }
    async fn mark_failed(&self, id: JobId, error: ExecutionError) -> Result<(), BackendError> {
        self.as_ref().mark_failed(id, error).await
    }
    async fn mark_paused(&self, id: JobId) -> Result<(), BackendError> {
        self.as_ref().mark_paused(id).await
    }
    async fn mark_resumed(&self, id: JobId) -> Result<(), BackendError> {
        self.as_ref().mark_resumed(id).await
    }
    async fn delete(&self, id: JobId) -> Result<(), BackendError> {
        self.as_ref().delete(id).await
    }
    async fn count_by_status(&self) -> Result<Vec<(JobStatus, u64)>, BackendError> {
        self.as_ref().count_by_status().await
    }
    async fn count_by_type(&self) -> Result<Vec<(JobType, u64)>, BackendError> {
        self.as_ref().count_by_type().await
    }
    async fn created_per_day(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(NaiveDate, u64)>, BackendError> {
        self.as_ref().created_per_day(since).await
    }
}

/// A validated job ready to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub payload: Payload,
    pub priority: i32,
    pub max_attempts: u16,
    pub scheduled_at: DateTime<Utc>,
}

impl NewJob {
    pub fn job_type(&self) -> JobType {
        self.payload.job_type()
    }
}

/// Why an execution attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionError {
    pub error_type: ErrorType,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Error encoding or decoding data: {0}")]
    EncodeDecode(#[from] serde_json::Error),
    #[error("Stored payload is invalid: {0}")]
    InvalidPayload(#[from] ValidationError),
    #[error("Job not found: {0}")]
    JobNotFound(JobId),
    #[error("Job {id} does not allow this transition from status {status}")]
    InvalidTransition { id: JobId, status: JobStatus },
    #[error("System in bad state")]
    BadState,
    #[error("Store error: {0}")]
    Store(String),
}
