//! The caller facing api of the queue.
use chrono::Utc;
use tracing::instrument;

use crate::{
    backend::{Backend, NewJob},
    job::{builder::EnqueueOptions, query::ListQuery, Job, JobId, JobType, Payload, ValidationError},
    stats::Statistics,
    QueueError,
};

/// Enqueues, inspects and manages jobs held by a [`Backend`].
///
/// The queue owns no state besides the backend, so it is cheap to clone when the backend is.
#[derive(Debug, Clone)]
pub struct JobQueue<B> {
    backend: B,
}

impl<B> JobQueue<B>
where
    B: Backend,
{
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Validates a raw job request and stores it as a new `pending` job.
    ///
    /// Nothing is stored when a [`QueueError::Validation`] is returned.
    #[instrument(skip(self, payload))]
    pub async fn enqueue(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<JobId, QueueError> {
        let job_type: JobType = job_type.parse()?;
        let payload = Payload::parse(job_type, payload)?;
        self.insert(payload, options).await
    }

    /// Stores a typed payload as a new `pending` job, normalizing it first.
    pub async fn enqueue_payload(
        &self,
        payload: Payload,
        options: EnqueueOptions,
    ) -> Result<JobId, QueueError> {
        let payload = payload.validated()?;
        self.insert(payload, options).await
    }

    async fn insert(&self, payload: Payload, options: EnqueueOptions) -> Result<JobId, QueueError> {
        if options.max_attempts == 0 {
            return Err(ValidationError::InvalidMaxAttempts.into());
        }
        let job_type = payload.job_type();
        let job_id = self
            .backend
            .insert(NewJob {
                payload,
                priority: options.priority,
                max_attempts: options.max_attempts,
                scheduled_at: options.scheduled_at.unwrap_or_else(Utc::now),
            })
            .await?;
        tracing::debug!(%job_id, %job_type, "Enqueued job {job_id}");
        Ok(job_id)
    }

    /// Most recently created first.
    pub async fn list_jobs(&self, query: &ListQuery) -> Result<Vec<Job>, QueueError> {
        Ok(self.backend.list(query).await?)
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Job, QueueError> {
        self.backend
            .get(job_id)
            .await?
            .ok_or(QueueError::NotFound(job_id))
    }

    /// Deletes a job that is `pending` or `failed`.
    ///
    /// Jobs that are running or have a result are kept and [`QueueError::InvalidState`] is
    /// returned.
    #[instrument(skip(self))]
    pub async fn delete_job(&self, job_id: JobId) -> Result<(), QueueError> {
        self.backend
            .delete(job_id)
            .await
            .map_err(QueueError::during("delete"))?;
        tracing::debug!(%job_id, "Deleted job {job_id}");
        Ok(())
    }

    /// Holds a `pending` job back from dispatch until it is resumed.
    #[instrument(skip(self))]
    pub async fn pause_job(&self, job_id: JobId) -> Result<(), QueueError> {
        self.backend
            .mark_paused(job_id)
            .await
            .map_err(QueueError::during("pause"))
    }

    #[instrument(skip(self))]
    pub async fn resume_job(&self, job_id: JobId) -> Result<(), QueueError> {
        self.backend
            .mark_resumed(job_id)
            .await
            .map_err(QueueError::during("resume"))
    }

    pub async fn statistics(&self) -> Result<Statistics, QueueError> {
        Statistics::collect(&self.backend).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        backend::{memory::InMemoryBackend, BackendError, MockBackend},
        job::{JobStatus, StockLoad},
    };
    use assert_matches::assert_matches;
    use serde_json::json;

    #[tokio::test]
    async fn enqueue_normalizes_payload() {
        let queue = JobQueue::new(InMemoryBackend::new());

        let job_id = queue
            .enqueue(
                "portfolio_load",
                json!({ "symbols": ["msft", "aapl", "MSFT"], "start_date": "2020-01-01" }),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        let job = queue.get_job(job_id).await.unwrap();
        assert_eq!(job.job_type, JobType::PortfolioLoad);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.max_attempts, EnqueueOptions::DEFAULT_MAX_ATTEMPTS);
        assert_eq!(job.payload.symbols(), ["MSFT", "AAPL"]);
        assert_eq!(
            job.payload.to_value().unwrap(),
            json!({ "symbols": ["MSFT", "AAPL"], "start_date": "2020-01-01" })
        );
    }

    #[tokio::test]
    async fn invalid_requests_store_nothing() {
        let queue = JobQueue::new(InMemoryBackend::new());

        assert_matches!(
            queue.enqueue("", json!({ "symbol": "AAPL" }), Default::default()).await,
            Err(QueueError::Validation(ValidationError::EmptyJobType))
        );
        assert_matches!(
            queue.enqueue("crypto_load", json!({ "symbol": "BTC" }), Default::default()).await,
            Err(QueueError::Validation(ValidationError::UnknownJobType(_)))
        );
        assert_matches!(
            queue.enqueue("stock_load", json!({ "symbol": " " }), Default::default()).await,
            Err(QueueError::Validation(ValidationError::MissingSymbol))
        );
        assert_matches!(
            queue
                .enqueue(
                    "stock_load",
                    json!({ "symbol": "AAPL" }),
                    EnqueueOptions {
                        max_attempts: 0,
                        ..Default::default()
                    }
                )
                .await,
            Err(QueueError::Validation(ValidationError::InvalidMaxAttempts))
        );

        assert!(queue.list_jobs(&ListQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_jobs_defaults_to_fifty() {
        let queue = JobQueue::new(InMemoryBackend::new());
        for _ in 0..55 {
            queue
                .enqueue_payload(StockLoad::new("AAPL").into(), Default::default())
                .await
                .unwrap();
        }

        let jobs = queue.list_jobs(&ListQuery::default()).await.unwrap();
        assert_eq!(jobs.len(), 50);
        assert_eq!(i32::from(jobs[0].id), 55);
    }

    #[tokio::test]
    async fn get_job_not_found() {
        let queue = JobQueue::new(InMemoryBackend::new());

        assert_matches!(
            queue.get_job(9.into()).await,
            Err(QueueError::NotFound(id)) if id == JobId::from(9)
        );
    }

    #[tokio::test]
    async fn delete_job() {
        let queue = JobQueue::new(InMemoryBackend::new());
        let processing = queue
            .enqueue_payload(StockLoad::new("AAPL").into(), Default::default())
            .await
            .unwrap();
        let pending = queue
            .enqueue_payload(StockLoad::new("MSFT").into(), Default::default())
            .await
            .unwrap();
        let claimed = queue.backend().claim_next(Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.id, processing);

        assert_matches!(
            queue.delete_job(processing).await,
            Err(QueueError::InvalidState {
                status: JobStatus::Processing,
                operation: "delete",
                ..
            })
        );
        queue
            .backend()
            .mark_completed(processing, json!({}))
            .await
            .unwrap();
        assert_matches!(
            queue.delete_job(processing).await,
            Err(QueueError::InvalidState {
                status: JobStatus::Completed,
                ..
            })
        );
        assert_matches!(queue.get_job(processing).await, Ok(_));

        queue.delete_job(pending).await.unwrap();
        assert_matches!(queue.get_job(pending).await, Err(QueueError::NotFound(_)));
        assert_matches!(queue.delete_job(pending).await, Err(QueueError::NotFound(_)));
    }

    #[tokio::test]
    async fn pause_and_resume_job() {
        let queue = JobQueue::new(InMemoryBackend::new());
        let job_id = queue
            .enqueue_payload(StockLoad::new("AAPL").into(), Default::default())
            .await
            .unwrap();

        queue.pause_job(job_id).await.unwrap();
        assert_eq!(queue.get_job(job_id).await.unwrap().status, JobStatus::Paused);
        assert!(queue.backend().claim_next(Utc::now()).await.unwrap().is_none());
        assert_matches!(
            queue.pause_job(job_id).await,
            Err(QueueError::InvalidState {
                operation: "pause",
                ..
            })
        );

        queue.resume_job(job_id).await.unwrap();
        assert_eq!(queue.get_job(job_id).await.unwrap().status, JobStatus::Pending);
        assert_matches!(
            queue.resume_job(job_id).await,
            Err(QueueError::InvalidState {
                operation: "resume",
                ..
            })
        );
    }

    #[tokio::test]
    async fn store_errors_propagate() {
        let mut backend = MockBackend::new();
        backend
            .expect_insert()
            .times(1)
            .returning(|_| Err(BackendError::Store("connection reset".to_owned())));
        backend
            .expect_get()
            .returning(|_| Err(BackendError::BadState));
        let queue = JobQueue::new(backend);

        assert_matches!(
            queue
                .enqueue("stock_load", json!({ "symbol": "AAPL" }), Default::default())
                .await,
            Err(QueueError::Backend(BackendError::Store(_)))
        );
        assert_matches!(
            queue.get_job(1.into()).await,
            Err(QueueError::Backend(BackendError::BadState))
        );
    }
}
