//! Test suite for ensuring a correct implementation of a backend.
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::json;

use crate::job::{DataChunk, PortfolioLoad, StockLoad};

use super::*;

impl NewJob {
    pub(crate) fn mock_job() -> Self {
        Self {
            payload: StockLoad::new("AAPL").into(),
            priority: 0,
            max_attempts: 3,
            scheduled_at: Utc::now(),
        }
    }

    pub(crate) fn with_payload(self, payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
            ..self
        }
    }

    pub(crate) fn with_priority(self, priority: i32) -> Self {
        Self { priority, ..self }
    }

    pub(crate) fn with_max_attempts(self, max_attempts: u16) -> Self {
        Self {
            max_attempts,
            ..self
        }
    }

    pub(crate) fn with_scheduled_at(self, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            scheduled_at,
            ..self
        }
    }
}

impl ExecutionError {
    pub(crate) fn mock_error() -> Self {
        Self {
            error_type: ErrorType::Other("custom".to_owned()),
            message: "Something went wrong".to_owned(),
        }
    }
}

#[cfg(test)]
impl Job {
    pub(crate) fn raw_job() -> Self {
        NewJob::mock_job().into_job(0.into(), Utc::now())
    }

    pub(crate) fn with_id(self, id: i32) -> Self {
        Self {
            id: id.into(),
            ..self
        }
    }

    pub(crate) fn with_status(self, status: JobStatus) -> Self {
        Self { status, ..self }
    }

    pub(crate) fn with_priority(self, priority: i32) -> Self {
        Self { priority, ..self }
    }

    pub(crate) fn with_created_at(self, created_at: DateTime<Utc>) -> Self {
        Self { created_at, ..self }
    }

    pub(crate) fn with_scheduled_at(self, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            scheduled_at,
            ..self
        }
    }
}

fn mock_chunk() -> DataChunk {
    DataChunk {
        symbol: "MSFT".to_owned(),
        start_date: chrono::NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
        end_date: chrono::NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
    }
}

/// Create test suite for a pricequeue backend.
///
/// For backend implementors, it is useful to include this as part of your test suites.
///
/// # Example
///
/// ```
/// use pricequeue::test_suite;
/// use pricequeue::backend::memory::InMemoryBackend;
/// test_suite!(for: InMemoryBackend::new());
/// ```
///
/// If you using a different async test attribute you can configure the marco to use that instead.
/// For example when using `sqlx::test` you could do the following:
///
/// ```ignore
/// use pricequeue::test_suite;
/// test_suite!(
///     attr: sqlx::test,
///     args: (pool: PgPool),
///     backend: BackendImplementation::from_pool(pool).await.unwrap()
/// );
/// ```
#[macro_export]
macro_rules! test_suite {
    (for: $backend:expr) => {
        $crate::test_suite!(attr: tokio::test, args: (), backend: $backend);
    };
    (attr: $attr:meta, args: $args:tt, backend: $backend:expr) => {
        $crate::test_suite!(
            @tests $attr, $args, $backend,
            insert,
            get_not_found,
            list_most_recent_first,
            list_filters,
            list_limit,
            claim_next_empty,
            claim_next,
            claim_next_by_priority,
            claim_next_skips_scheduled_later,
            claim_next_skips_exhausted_and_paused,
            claim_next_concurrent,
            update_progress,
            update_progress_requires_processing,
            mark_completed,
            mark_completed_not_found,
            mark_completed_twice,
            mark_retryable,
            mark_failed,
            pause_and_resume,
            pause_requires_pending,
            delete,
            delete_refused_while_processing_or_completed,
            delete_not_found,
            count_by_status,
            count_by_type,
            created_per_day
        );
    };
    (@tests $attr:meta, $args:tt, $backend:expr, $($name:ident),+) => {
        $(
            #[$attr]
            async fn $name $args {
                let backend = $backend;
                $crate::backend::testing::$name(backend).await;
            }
        )+
    };
}

#[doc(hidden)]
pub async fn insert(backend: impl Backend) {
    let id1 = backend.insert(NewJob::mock_job()).await.unwrap();
    let id2 = backend
        .insert(NewJob::mock_job().with_payload(PortfolioLoad::new(["AAPL", "MSFT"])))
        .await
        .unwrap();

    assert_ne!(id1, id2);

    let job = backend.get(id1).await.unwrap().unwrap();
    assert_eq!(job.id, id1);
    assert_eq!(job.job_type, JobType::StockLoad);
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.max_attempts, 3);
    assert_eq!(job.progress_current, 0);
    assert_eq!(job.progress_total, 0);
    assert_eq!(job.payload, StockLoad::new("AAPL").into());
    assert!(job.result.is_none());
    assert!(job.error_message.is_none());
    assert!(job.errors.is_empty());
    assert!(job.started_at.is_none());
    assert!(job.completed_at.is_none());

    let job = backend.get(id2).await.unwrap().unwrap();
    assert_eq!(job.job_type, JobType::PortfolioLoad);
    assert_eq!(job.payload.symbols(), ["AAPL", "MSFT"]);
}

#[doc(hidden)]
pub async fn get_not_found(backend: impl Backend) {
    assert!(backend.get(42.into()).await.unwrap().is_none());
}

#[doc(hidden)]
pub async fn list_most_recent_first(backend: impl Backend) {
    let id1 = backend.insert(NewJob::mock_job()).await.unwrap();
    let id2 = backend.insert(NewJob::mock_job()).await.unwrap();
    let id3 = backend.insert(NewJob::mock_job()).await.unwrap();

    let ids: Vec<_> = backend
        .list(&ListQuery::default())
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.id)
        .collect();
    assert_eq!(ids, [id3, id2, id1]);
}

#[doc(hidden)]
pub async fn list_filters(backend: impl Backend) {
    let stock = backend.insert(NewJob::mock_job()).await.unwrap();
    let portfolio = backend
        .insert(NewJob::mock_job().with_payload(PortfolioLoad::new(["T"])))
        .await
        .unwrap();
    let chunk = backend
        .insert(NewJob::mock_job().with_payload(mock_chunk()))
        .await
        .unwrap();
    backend.mark_paused(portfolio).await.unwrap();

    let by_type = backend
        .list(&ListQuery::default().with_job_type(JobType::DataChunk))
        .await
        .unwrap();
    assert_eq!(by_type.len(), 1);
    assert_eq!(by_type[0].id, chunk);
    assert_eq!(by_type[0].payload, mock_chunk().into());

    let by_status: Vec<_> = backend
        .list(&ListQuery::default().with_status(JobStatus::Pending))
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.id)
        .collect();
    assert_eq!(by_status, [chunk, stock]);

    let both = backend
        .list(
            &ListQuery::default()
                .with_status(JobStatus::Paused)
                .with_job_type(JobType::StockLoad),
        )
        .await
        .unwrap();
    assert!(both.is_empty());
}

#[doc(hidden)]
pub async fn list_limit(backend: impl Backend) {
    for _ in 0..5 {
        backend.insert(NewJob::mock_job()).await.unwrap();
    }

    let jobs = backend
        .list(&ListQuery::default().with_limit(2))
        .await
        .unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs[0].id > jobs[1].id);
}

#[doc(hidden)]
pub async fn claim_next_empty(backend: impl Backend) {
    assert!(backend.claim_next(Utc::now()).await.unwrap().is_none());
}

#[doc(hidden)]
pub async fn claim_next(backend: impl Backend) {
    let id = backend.insert(NewJob::mock_job()).await.unwrap();

    let job = backend.claim_next(Utc::now()).await.unwrap().unwrap();
    assert_eq!(job.id, id);
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.attempts, 1);
    assert!(job.started_at.is_some());

    let stored = backend.get(id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Processing);
    assert_eq!(stored.attempts, 1);

    assert!(backend.claim_next(Utc::now()).await.unwrap().is_none());
}

#[doc(hidden)]
pub async fn claim_next_by_priority(backend: impl Backend) {
    let a = backend
        .insert(NewJob::mock_job().with_priority(1))
        .await
        .unwrap();
    let b = backend
        .insert(NewJob::mock_job().with_priority(5))
        .await
        .unwrap();
    let c = backend
        .insert(NewJob::mock_job().with_priority(5))
        .await
        .unwrap();

    let mut claimed = vec![];
    while let Some(job) = backend.claim_next(Utc::now()).await.unwrap() {
        claimed.push(job.id);
    }
    assert_eq!(claimed, [b, c, a]);
}

#[doc(hidden)]
pub async fn claim_next_skips_scheduled_later(backend: impl Backend) {
    let later = backend
        .insert(NewJob::mock_job().with_scheduled_at(Utc::now() + TimeDelta::hours(1)))
        .await
        .unwrap();

    assert!(backend.claim_next(Utc::now()).await.unwrap().is_none());

    let job = backend
        .claim_next(Utc::now() + TimeDelta::hours(2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.id, later);
}

#[doc(hidden)]
pub async fn claim_next_skips_exhausted_and_paused(backend: impl Backend) {
    let exhausted = backend
        .insert(NewJob::mock_job().with_max_attempts(1))
        .await
        .unwrap();
    let paused = backend.insert(NewJob::mock_job()).await.unwrap();
    backend.mark_paused(paused).await.unwrap();

    let job = backend.claim_next(Utc::now()).await.unwrap().unwrap();
    assert_eq!(job.id, exhausted);
    backend
        .mark_retryable(exhausted, Utc::now(), ExecutionError::mock_error())
        .await
        .unwrap();

    assert!(backend.claim_next(Utc::now()).await.unwrap().is_none());
}

#[doc(hidden)]
pub async fn claim_next_concurrent(backend: impl Backend) {
    let id = backend.insert(NewJob::mock_job()).await.unwrap();
    let now = Utc::now();

    let (first, second) =
        futures::future::join(backend.claim_next(now), backend.claim_next(now)).await;
    let claimed: Vec<_> = [first.unwrap(), second.unwrap()]
        .into_iter()
        .flatten()
        .collect();

    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, id);
    assert_eq!(claimed[0].attempts, 1);
}

#[doc(hidden)]
pub async fn update_progress(backend: impl Backend) {
    let id = backend.insert(NewJob::mock_job()).await.unwrap();
    backend.claim_next(Utc::now()).await.unwrap();

    backend.update_progress(id, 2, 5).await.unwrap();
    let job = backend.get(id).await.unwrap().unwrap();
    assert_eq!((job.progress_current, job.progress_total), (2, 5));

    backend.update_progress(id, 9, 5).await.unwrap();
    let job = backend.get(id).await.unwrap().unwrap();
    assert_eq!((job.progress_current, job.progress_total), (5, 5));
}

#[doc(hidden)]
pub async fn update_progress_requires_processing(backend: impl Backend) {
    let id = backend.insert(NewJob::mock_job()).await.unwrap();

    assert!(matches!(
        backend.update_progress(id, 1, 2).await,
        Err(BackendError::InvalidTransition {
            status: JobStatus::Pending,
            ..
        })
    ));
    assert!(matches!(
        backend.update_progress(42.into(), 1, 2).await,
        Err(BackendError::JobNotFound(_))
    ));
}

#[doc(hidden)]
pub async fn mark_completed(backend: impl Backend) {
    let id = backend.insert(NewJob::mock_job()).await.unwrap();
    backend.claim_next(Utc::now()).await.unwrap();

    backend
        .mark_completed(id, json!({ "rows": 1260 }))
        .await
        .unwrap();

    let job = backend.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(json!({ "rows": 1260 })));
    assert!(job.completed_at.is_some());
    assert!(job.error_message.is_none());
}

#[doc(hidden)]
pub async fn mark_completed_not_found(backend: impl Backend) {
    assert!(matches!(
        backend.mark_completed(42.into(), json!(null)).await,
        Err(BackendError::JobNotFound(_))
    ));
}

#[doc(hidden)]
pub async fn mark_completed_twice(backend: impl Backend) {
    let id = backend.insert(NewJob::mock_job()).await.unwrap();
    backend.claim_next(Utc::now()).await.unwrap();
    backend.mark_completed(id, json!(1)).await.unwrap();

    assert!(matches!(
        backend.mark_completed(id, json!(2)).await,
        Err(BackendError::InvalidTransition {
            status: JobStatus::Completed,
            ..
        })
    ));
    assert_eq!(backend.get(id).await.unwrap().unwrap().result, Some(json!(1)));
}

#[doc(hidden)]
pub async fn mark_retryable(backend: impl Backend) {
    let id = backend.insert(NewJob::mock_job()).await.unwrap();
    backend.claim_next(Utc::now()).await.unwrap();
    let retry_at = Utc::now() + TimeDelta::minutes(10);

    backend
        .mark_retryable(id, retry_at, ExecutionError::mock_error())
        .await
        .unwrap();

    let job = backend.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 1);
    assert!(job.error_message.is_none());
    assert_eq!(job.errors.len(), 1);
    assert_eq!(job.errors[0].attempt, 1);
    assert_eq!(job.errors[0].error_type, ErrorType::Other("custom".to_owned()));
    assert_eq!(job.errors[0].details, "Something went wrong");

    assert!(backend.claim_next(Utc::now()).await.unwrap().is_none());
    let job = backend
        .claim_next(retry_at + TimeDelta::seconds(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.attempts, 2);
}

#[doc(hidden)]
pub async fn mark_failed(backend: impl Backend) {
    let id = backend.insert(NewJob::mock_job()).await.unwrap();
    backend.claim_next(Utc::now()).await.unwrap();

    backend
        .mark_failed(
            id,
            ExecutionError {
                error_type: ErrorType::Timeout,
                message: "Job failed to complete within timeout: 1s".to_owned(),
            },
        )
        .await
        .unwrap();

    let job = backend.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error_message.as_deref(),
        Some("Job failed to complete within timeout: 1s")
    );
    assert!(job.completed_at.is_some());
    assert_eq!(job.errors.len(), 1);
    assert_eq!(job.errors[0].error_type, ErrorType::Timeout);

    assert!(matches!(
        backend.mark_failed(id, ExecutionError::mock_error()).await,
        Err(BackendError::InvalidTransition { .. })
    ));
}

#[doc(hidden)]
pub async fn pause_and_resume(backend: impl Backend) {
    let id = backend.insert(NewJob::mock_job()).await.unwrap();

    backend.mark_paused(id).await.unwrap();
    assert_eq!(
        backend.get(id).await.unwrap().unwrap().status,
        JobStatus::Paused
    );
    assert!(matches!(
        backend.mark_paused(id).await,
        Err(BackendError::InvalidTransition {
            status: JobStatus::Paused,
            ..
        })
    ));

    backend.mark_resumed(id).await.unwrap();
    assert_eq!(
        backend.get(id).await.unwrap().unwrap().status,
        JobStatus::Pending
    );
    assert!(matches!(
        backend.mark_resumed(id).await,
        Err(BackendError::InvalidTransition {
            status: JobStatus::Pending,
            ..
        })
    ));
}

#[doc(hidden)]
pub async fn pause_requires_pending(backend: impl Backend) {
    let id = backend.insert(NewJob::mock_job()).await.unwrap();
    backend.claim_next(Utc::now()).await.unwrap();

    assert!(matches!(
        backend.mark_paused(id).await,
        Err(BackendError::InvalidTransition {
            status: JobStatus::Processing,
            ..
        })
    ));
    assert!(matches!(
        backend.mark_paused(42.into()).await,
        Err(BackendError::JobNotFound(_))
    ));
}

#[doc(hidden)]
pub async fn delete(backend: impl Backend) {
    let pending = backend.insert(NewJob::mock_job()).await.unwrap();
    backend.delete(pending).await.unwrap();
    assert!(backend.get(pending).await.unwrap().is_none());

    let failed = backend.insert(NewJob::mock_job()).await.unwrap();
    backend.claim_next(Utc::now()).await.unwrap();
    backend
        .mark_failed(failed, ExecutionError::mock_error())
        .await
        .unwrap();
    backend.delete(failed).await.unwrap();
    assert!(backend.get(failed).await.unwrap().is_none());
}

#[doc(hidden)]
pub async fn delete_refused_while_processing_or_completed(backend: impl Backend) {
    let processing = backend.insert(NewJob::mock_job()).await.unwrap();
    backend.claim_next(Utc::now()).await.unwrap();

    assert!(matches!(
        backend.delete(processing).await,
        Err(BackendError::InvalidTransition {
            status: JobStatus::Processing,
            ..
        })
    ));

    backend.mark_completed(processing, json!({})).await.unwrap();
    assert!(matches!(
        backend.delete(processing).await,
        Err(BackendError::InvalidTransition {
            status: JobStatus::Completed,
            ..
        })
    ));
    assert!(backend.get(processing).await.unwrap().is_some());
}

#[doc(hidden)]
pub async fn delete_not_found(backend: impl Backend) {
    assert!(matches!(
        backend.delete(42.into()).await,
        Err(BackendError::JobNotFound(_))
    ));
}

#[doc(hidden)]
pub async fn count_by_status(backend: impl Backend) {
    assert!(backend.count_by_status().await.unwrap().is_empty());

    backend.insert(NewJob::mock_job()).await.unwrap();
    backend.insert(NewJob::mock_job()).await.unwrap();
    let paused = backend.insert(NewJob::mock_job()).await.unwrap();
    backend.mark_paused(paused).await.unwrap();
    backend.claim_next(Utc::now()).await.unwrap();

    let mut counts = backend.count_by_status().await.unwrap();
    counts.sort();
    assert_eq!(
        counts,
        [
            (JobStatus::Pending, 1),
            (JobStatus::Processing, 1),
            (JobStatus::Paused, 1)
        ]
    );
}

#[doc(hidden)]
pub async fn count_by_type(backend: impl Backend) {
    backend.insert(NewJob::mock_job()).await.unwrap();
    backend
        .insert(NewJob::mock_job().with_payload(mock_chunk()))
        .await
        .unwrap();
    backend
        .insert(NewJob::mock_job().with_payload(mock_chunk()))
        .await
        .unwrap();

    let mut counts = backend.count_by_type().await.unwrap();
    counts.sort();
    assert_eq!(
        counts,
        [(JobType::StockLoad, 1), (JobType::DataChunk, 2)]
    );
}

#[doc(hidden)]
pub async fn created_per_day(backend: impl Backend) {
    let before = Utc::now() - TimeDelta::seconds(1);
    backend.insert(NewJob::mock_job()).await.unwrap();
    backend.insert(NewJob::mock_job()).await.unwrap();

    let days = backend.created_per_day(before).await.unwrap();
    let total: u64 = days.iter().map(|(_, count)| count).sum();
    assert_eq!(total, 2);
    assert!(days.iter().all(|(day, _)| *day >= before.date_naive()));

    let days = backend
        .created_per_day(Utc::now() + TimeDelta::hours(1))
        .await
        .unwrap();
    assert!(days.is_empty());
}
