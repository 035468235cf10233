use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use pricequeue::{
    backend::{Backend, BackendError, ExecutionError, NewJob},
    job::{query::ListQuery, Job, JobId, JobStatus, JobType},
};
use tracing::instrument;

use crate::{map_err, types, PgBackend};

impl PgBackend {
    /// Explains why a conditional update touched no row.
    async fn handle_update(
        &self,
        result: sqlx::Result<u64>,
        id: JobId,
    ) -> Result<(), BackendError> {
        match result.map_err(map_err)? {
            0 => match self.current_status(id).await.map_err(map_err)? {
                None => Err(BackendError::JobNotFound(id)),
                Some(status) => Err(BackendError::InvalidTransition {
                    id,
                    status: status.into(),
                }),
            },
            1 => Ok(()),
            _ => Err(BackendError::BadState),
        }
    }
}

fn count(value: i64) -> Result<u64, BackendError> {
    u64::try_from(value).map_err(|_| BackendError::BadState)
}

#[async_trait]
impl Backend for PgBackend {
    #[instrument(skip(self, job), fields(job_type = %job.job_type()))]
    async fn insert(&self, job: NewJob) -> Result<JobId, BackendError> {
        self.insert_job(job).await.map_err(map_err)
    }
    async fn get(&self, id: JobId) -> Result<Option<Job>, BackendError> {
        self.load_job(id)
            .await
            .map_err(map_err)?
            .map(TryFrom::try_from)
            .transpose()
    }
    async fn list(&self, query: &ListQuery) -> Result<Vec<Job>, BackendError> {
        self.run_query(query)
            .await
            .map_err(map_err)?
            .into_iter()
            .map(TryFrom::try_from)
            .collect()
    }
    #[instrument(skip(self))]
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, BackendError> {
        self.load_next_job_mark_as_processing(now)
            .await
            .map_err(map_err)?
            .map(TryFrom::try_from)
            .transpose()
    }
    async fn update_progress(
        &self,
        id: JobId,
        current: i64,
        total: i64,
    ) -> Result<(), BackendError> {
        let result = self._update_progress(id, current, total).await;
        self.handle_update(result, id).await
    }
    async fn mark_completed(
        &self,
        id: JobId,
        result: serde_json::Value,
    ) -> Result<(), BackendError> {
        let result = self._mark_completed(id, result).await;
        self.handle_update(result, id).await
    }
    async fn mark_retryable(
        &self,
        id: JobId,
        scheduled_at: DateTime<Utc>,
        error: ExecutionError,
    ) -> Result<(), BackendError> {
        let result = self._mark_retryable(id, scheduled_at, error).await;
        self.handle_update(result, id).await
    }
    async fn mark_failed(&self, id: JobId, error: ExecutionError) -> Result<(), BackendError> {
        let result = self._mark_failed(id, error).await;
        self.handle_update(result, id).await
    }
    async fn mark_paused(&self, id: JobId) -> Result<(), BackendError> {
        let result = self
            .set_status(id, types::JobStatus::Pending, types::JobStatus::Paused)
            .await;
        self.handle_update(result, id).await
    }
    async fn mark_resumed(&self, id: JobId) -> Result<(), BackendError> {
        let result = self
            .set_status(id, types::JobStatus::Paused, types::JobStatus::Pending)
            .await;
        self.handle_update(result, id).await
    }
    async fn delete(&self, id: JobId) -> Result<(), BackendError> {
        let result = self.delete_job(id).await;
        self.handle_update(result, id).await
    }
    async fn count_by_status(&self) -> Result<Vec<(JobStatus, u64)>, BackendError> {
        self.status_counts()
            .await
            .map_err(map_err)?
            .into_iter()
            .map(|(status, value)| -> Result<(JobStatus, u64), BackendError> {
                Ok((status.into(), count(value)?))
            })
            .collect()
    }
    async fn count_by_type(&self) -> Result<Vec<(JobType, u64)>, BackendError> {
        self.job_type_counts()
            .await
            .map_err(map_err)?
            .into_iter()
            .map(|(job_type, value)| -> Result<(JobType, u64), BackendError> {
                Ok((job_type.parse()?, count(value)?))
            })
            .collect()
    }
    async fn created_per_day(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(NaiveDate, u64)>, BackendError> {
        self.daily_counts(since)
            .await
            .map_err(map_err)?
            .into_iter()
            .map(|(day, value)| -> Result<(NaiveDate, u64), BackendError> {
                Ok((day, count(value)?))
            })
            .collect()
    }
}

#[cfg(all(test, feature = "postgres-tests"))]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use pricequeue::{job::StockLoad, queue::JobQueue};
    use serde_json::json;
    use sqlx::PgPool;

    pricequeue::test_suite!(
        attr: sqlx::test,
        args: (pool: PgPool),
        backend: PgBackend::from(pool)
    );

    fn new_job() -> NewJob {
        NewJob {
            payload: StockLoad::new("AAPL").into(),
            priority: 0,
            max_attempts: 3,
            scheduled_at: Utc::now(),
        }
    }

    #[sqlx::test]
    async fn claims_are_exclusive_across_connections(pool: PgPool) {
        let backend = PgBackend::from(pool);
        for _ in 0..10 {
            backend.insert(new_job()).await.unwrap();
        }

        let claims = (0..4).map(|_| {
            let backend = backend.clone();
            tokio::spawn(async move {
                let mut claimed = vec![];
                while let Some(job) = backend.claim_next(Utc::now()).await.unwrap() {
                    claimed.push(job.id);
                }
                claimed
            })
        });
        let mut claimed: Vec<_> = futures::future::join_all(claims)
            .await
            .into_iter()
            .flat_map(Result::unwrap)
            .collect();
        claimed.sort();
        claimed.dedup();

        assert_eq!(claimed.len(), 10);
    }

    #[sqlx::test]
    async fn error_history_round_trips(pool: PgPool) {
        let backend = PgBackend::from(pool);
        let id = backend.insert(new_job()).await.unwrap();

        for error_type in ["panic", "loader"] {
            backend.claim_next(Utc::now()).await.unwrap();
            backend
                .mark_retryable(
                    id,
                    Utc::now(),
                    ExecutionError {
                        error_type: error_type.into(),
                        message: format!("{error_type} happened"),
                    },
                )
                .await
                .unwrap();
        }

        let job = backend.get(id).await.unwrap().unwrap();
        assert_eq!(job.attempts, 2);
        assert_eq!(job.errors.len(), 2);
        assert_eq!(job.errors[0].error_type, pricequeue::job::ErrorType::Panic);
        assert_eq!(job.errors[1].attempt, 2);
        assert_eq!(job.errors[1].details, "loader happened");
    }

    #[sqlx::test]
    async fn serves_the_queue_api(pool: PgPool) {
        let queue = JobQueue::new(PgBackend::from(pool));

        let id = queue
            .enqueue("portfolio_load", json!({ "symbols": "aapl, msft" }), Default::default())
            .await
            .unwrap();

        let job = queue.get_job(id).await.unwrap();
        assert_eq!(job.payload.symbols(), ["AAPL", "MSFT"]);
        assert_matches!(
            queue.statistics().await,
            Ok(statistics) if statistics.total == 1
        );
    }
}
