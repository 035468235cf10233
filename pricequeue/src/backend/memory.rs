//! Provides an in memory implementation of [`Backend`].
//!
//! Currently this is provided for testing purposes and not designed for use in a production system.
//!
//! It is not optimized instead is designed to be a correct implementation for use in a test setup.
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc, RwLock, RwLockWriteGuard,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::job::{query::ListQuery, Job, JobError, JobId, JobStatus, JobType};

use super::{
    queryable::{dispatch_order, listing_order, Eligible, Queryable},
    Backend, BackendError, ExecutionError, NewJob,
};

/// An in memory implementation of [`Backend`].
///
/// All mutations happen under a single write lock, which makes the claim trivially exclusive.
///
/// **This is not designed for use in a production systems.**
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    jobs: Arc<RwLock<Vec<Job>>>,
    id_counter: Arc<AtomicI32>,
}

impl InMemoryBackend {
    /// Creates a new instance of [`InMemoryBackend`].
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<Job>>, BackendError> {
        self.jobs.write().map_err(|_| BackendError::BadState)
    }

    fn matching_jobs(&self, queryable: &impl Queryable) -> Result<Vec<Job>, BackendError> {
        Ok(self
            .jobs
            .read()
            .map_err(|_| BackendError::BadState)?
            .iter()
            .filter(|job| queryable.matches(job))
            .cloned()
            .collect())
    }

    fn transition(
        &self,
        id: JobId,
        allowed: &[JobStatus],
        apply: impl FnOnce(&mut Job),
    ) -> Result<(), BackendError> {
        let mut jobs = self.write()?;
        let job = jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or(BackendError::JobNotFound(id))?;
        if !allowed.contains(&job.status) {
            return Err(BackendError::InvalidTransition {
                id,
                status: job.status,
            });
        }
        apply(job);
        Ok(())
    }
}

impl NewJob {
    pub(super) fn into_job(self, id: JobId, now: DateTime<Utc>) -> Job {
        Job {
            id,
            job_type: self.payload.job_type(),
            status: JobStatus::Pending,
            priority: self.priority,
            payload: self.payload,
            progress_current: 0,
            progress_total: 0,
            attempts: 0,
            max_attempts: self.max_attempts,
            result: None,
            error_message: None,
            errors: vec![],
            created_at: now,
            scheduled_at: self.scheduled_at,
            started_at: None,
            completed_at: None,
        }
    }
}

impl ExecutionError {
    fn into_job_error(self, attempt: u16) -> JobError {
        JobError {
            attempt,
            error_type: self.error_type,
            details: self.message,
            recorded_at: Utc::now(),
        }
    }
}

impl Job {
    fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.started_at = Some(now);
        self.attempts += 1;
    }

    fn record_progress(&mut self, current: i64, total: i64) {
        let total = total.max(0);
        let current = current.max(0);
        self.progress_total = total;
        self.progress_current = if total > 0 { current.min(total) } else { current };
    }

    fn mark_completed(&mut self, result: serde_json::Value) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
    }

    fn mark_retryable(&mut self, scheduled_at: DateTime<Utc>, error: ExecutionError) {
        self.status = JobStatus::Pending;
        self.scheduled_at = scheduled_at;
        self.errors.push(error.into_job_error(self.attempts));
    }

    fn mark_failed(&mut self, error: ExecutionError) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(error.message.clone());
        self.errors.push(error.into_job_error(self.attempts));
    }
}

fn counts<K: Ord>(keys: impl Iterator<Item = K>) -> Vec<(K, u64)> {
    keys.fold(BTreeMap::new(), |mut counts, key| {
        *counts.entry(key).or_insert(0) += 1;
        counts
    })
    .into_iter()
    .collect()
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn insert(&self, job: NewJob) -> Result<JobId, BackendError> {
        let mut jobs = self.write()?;
        let id = (self.id_counter.fetch_add(1, Ordering::SeqCst) + 1).into();
        jobs.push(job.into_job(id, Utc::now()));
        Ok(id)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, BackendError> {
        Ok(self
            .jobs
            .read()
            .map_err(|_| BackendError::BadState)?
            .iter()
            .find(|job| job.id == id)
            .cloned())
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Job>, BackendError> {
        let mut jobs = self.matching_jobs(query)?;
        jobs.sort_by(listing_order);
        jobs.truncate(query.limit);
        Ok(jobs)
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, BackendError> {
        let mut jobs = self.write()?;
        let eligible = Eligible(now);
        Ok(jobs
            .iter_mut()
            .filter(|job| eligible.matches(job))
            .min_by(|a, b| dispatch_order(a, b))
            .map(|job| {
                job.mark_processing(now);
                job.clone()
            }))
    }

    async fn update_progress(
        &self,
        id: JobId,
        current: i64,
        total: i64,
    ) -> Result<(), BackendError> {
        self.transition(id, &[JobStatus::Processing], |job| {
            job.record_progress(current, total)
        })
    }

    async fn mark_completed(
        &self,
        id: JobId,
        result: serde_json::Value,
    ) -> Result<(), BackendError> {
        self.transition(id, &[JobStatus::Processing], |job| job.mark_completed(result))
    }

    async fn mark_retryable(
        &self,
        id: JobId,
        scheduled_at: DateTime<Utc>,
        error: ExecutionError,
    ) -> Result<(), BackendError> {
        self.transition(id, &[JobStatus::Processing], |job| {
            job.mark_retryable(scheduled_at, error)
        })
    }

    async fn mark_failed(&self, id: JobId, error: ExecutionError) -> Result<(), BackendError> {
        self.transition(id, &[JobStatus::Processing], |job| job.mark_failed(error))
    }

    async fn mark_paused(&self, id: JobId) -> Result<(), BackendError> {
        self.transition(id, &[JobStatus::Pending], |job| {
            job.status = JobStatus::Paused
        })
    }

    async fn mark_resumed(&self, id: JobId) -> Result<(), BackendError> {
        self.transition(id, &[JobStatus::Paused], |job| {
            job.status = JobStatus::Pending
        })
    }

    async fn delete(&self, id: JobId) -> Result<(), BackendError> {
        let mut jobs = self.write()?;
        let index = jobs
            .iter()
            .position(|job| job.id == id)
            .ok_or(BackendError::JobNotFound(id))?;
        let status = jobs[index].status;
        if !status.is_deletable() {
            return Err(BackendError::InvalidTransition { id, status });
        }
        jobs.remove(index);
        Ok(())
    }

    async fn count_by_status(&self) -> Result<Vec<(JobStatus, u64)>, BackendError> {
        let jobs = self.jobs.read().map_err(|_| BackendError::BadState)?;
        Ok(counts(jobs.iter().map(|job| job.status)))
    }

    async fn count_by_type(&self) -> Result<Vec<(JobType, u64)>, BackendError> {
        let jobs = self.jobs.read().map_err(|_| BackendError::BadState)?;
        Ok(counts(jobs.iter().map(|job| job.job_type)))
    }

    async fn created_per_day(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(NaiveDate, u64)>, BackendError> {
        let jobs = self.jobs.read().map_err(|_| BackendError::BadState)?;
        Ok(counts(
            jobs.iter()
                .filter(|job| job.created_at >= since)
                .map(|job| job.created_at.date_naive()),
        ))
    }
}
