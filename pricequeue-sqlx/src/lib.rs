//! A PostgreSQL implementation of the [`pricequeue`] job store.
//!
//! The schema lives in `migrations/` and is applied with [`PgBackend::migrate`].
//!
//! ```no_run
//! # use pricequeue::prelude::*;
//! # use pricequeue_sqlx::PgBackend;
//! # async fn run() -> Result<(), BackendError> {
//! let backend = PgBackend::connect("postgres://localhost/pricequeue", 5).await?;
//! backend.migrate().await?;
//!
//! let queue = JobQueue::new(backend);
//! # Ok(())
//! # }
//! ```
use std::ops::Deref;

use chrono::{DateTime, NaiveDate, Utc};
use pricequeue::{
    backend::{BackendError, ExecutionError, NewJob},
    job::{query::ListQuery, JobId},
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::instrument;

macro_rules! job_columns {
    () => {
        "id, job_type, status, priority, payload, progress_current, progress_total, attempts, \
        max_attempts, result, error_message, errors, created_at, scheduled_at, started_at, \
        completed_at"
    };
}

mod backend;
mod query;
mod types;

use query::ToQuery;
use types::{Job, JobStatus};

#[derive(Clone, Debug)]
pub struct PgBackend {
    pool: PgPool,
}

impl Deref for PgBackend {
    type Target = PgPool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

impl From<PgPool> for PgBackend {
    fn from(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn map_err(error: sqlx::Error) -> BackendError {
    match error {
        sqlx::Error::RowNotFound => BackendError::BadState,
        error => BackendError::Store(error.to_string()),
    }
}

impl PgBackend {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, BackendError> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map(Self::from)
            .map_err(map_err)
    }

    /// Applies any pending schema migration.
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<(), BackendError> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(|error| BackendError::Store(error.to_string()))
    }

    async fn insert_job(&self, job: NewJob) -> sqlx::Result<JobId> {
        let id: i32 = sqlx::query_scalar(
            r#"INSERT INTO pricequeue_jobs (
                job_type,
                priority,
                payload,
                max_attempts,
                created_at,
                scheduled_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(job.job_type().to_string())
        .bind(job.priority)
        .bind(sqlx::types::Json(&job.payload))
        .bind(i32::from(job.max_attempts))
        .bind(Utc::now())
        .bind(job.scheduled_at)
        .fetch_one(self.deref())
        .await?;
        Ok(id.into())
    }

    async fn load_job(&self, id: JobId) -> sqlx::Result<Option<Job>> {
        sqlx::query_as(concat!(
            "SELECT ",
            job_columns!(),
            " FROM pricequeue_jobs WHERE id = $1"
        ))
        .bind(i32::from(id))
        .fetch_optional(self.deref())
        .await
    }

    async fn run_query(&self, query: &ListQuery) -> sqlx::Result<Vec<Job>> {
        query.query().build_query_as().fetch_all(self.deref()).await
    }

    async fn load_next_job_mark_as_processing(
        &self,
        now: DateTime<Utc>,
    ) -> sqlx::Result<Option<Job>> {
        sqlx::query_as(concat!(
            r#"UPDATE pricequeue_jobs
            SET
                status = 'processing',
                started_at = $1,
                attempts = attempts + 1
            WHERE id = (
                SELECT id FROM pricequeue_jobs
                WHERE status = 'pending'
                AND scheduled_at <= $1
                AND attempts < max_attempts
                ORDER BY priority DESC, created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            AND status = 'pending'
            RETURNING "#,
            job_columns!()
        ))
        .bind(now)
        .fetch_optional(self.deref())
        .await
    }

    async fn _update_progress(&self, id: JobId, current: i64, total: i64) -> sqlx::Result<u64> {
        Ok(sqlx::query(
            r#"UPDATE pricequeue_jobs
            SET
                progress_total = GREATEST($3, 0),
                progress_current = CASE
                    WHEN $3 > 0 THEN LEAST(GREATEST($2, 0), $3)
                    ELSE GREATEST($2, 0)
                END
            WHERE id = $1 AND status = 'processing'"#,
        )
        .bind(i32::from(id))
        .bind(current)
        .bind(total)
        .execute(self.deref())
        .await?
        .rows_affected())
    }

    async fn _mark_completed(&self, id: JobId, result: serde_json::Value) -> sqlx::Result<u64> {
        Ok(sqlx::query(
            r#"UPDATE pricequeue_jobs
            SET
                status = 'completed',
                result = $2,
                completed_at = $3
            WHERE id = $1 AND status = 'processing'"#,
        )
        .bind(i32::from(id))
        .bind(result)
        .bind(Utc::now())
        .execute(self.deref())
        .await?
        .rows_affected())
    }

    async fn _mark_retryable(
        &self,
        id: JobId,
        scheduled_at: DateTime<Utc>,
        error: ExecutionError,
    ) -> sqlx::Result<u64> {
        Ok(sqlx::query(
            r#"UPDATE pricequeue_jobs
            SET
                status = 'pending',
                scheduled_at = $2,
                errors = errors || jsonb_build_array(
                    jsonb_build_object(
                        'attempt', attempts,
                        'error_type', $3::text,
                        'details', $4::text,
                        'recorded_at', $5::timestamptz
                    )
                )
            WHERE id = $1 AND status = 'processing'"#,
        )
        .bind(i32::from(id))
        .bind(scheduled_at)
        .bind(error.error_type.as_str())
        .bind(error.message)
        .bind(Utc::now())
        .execute(self.deref())
        .await?
        .rows_affected())
    }

    async fn _mark_failed(&self, id: JobId, error: ExecutionError) -> sqlx::Result<u64> {
        let now = Utc::now();
        Ok(sqlx::query(
            r#"UPDATE pricequeue_jobs
            SET
                status = 'failed',
                completed_at = $4,
                error_message = $3,
                errors = errors || jsonb_build_array(
                    jsonb_build_object(
                        'attempt', attempts,
                        'error_type', $2::text,
                        'details', $3::text,
                        'recorded_at', $4::timestamptz
                    )
                )
            WHERE id = $1 AND status = 'processing'"#,
        )
        .bind(i32::from(id))
        .bind(error.error_type.as_str())
        .bind(error.message)
        .bind(now)
        .execute(self.deref())
        .await?
        .rows_affected())
    }

    async fn set_status(&self, id: JobId, from: JobStatus, to: JobStatus) -> sqlx::Result<u64> {
        Ok(
            sqlx::query("UPDATE pricequeue_jobs SET status = $3 WHERE id = $1 AND status = $2")
                .bind(i32::from(id))
                .bind(from)
                .bind(to)
                .execute(self.deref())
                .await?
                .rows_affected(),
        )
    }

    async fn delete_job(&self, id: JobId) -> sqlx::Result<u64> {
        Ok(
            sqlx::query("DELETE FROM pricequeue_jobs WHERE id = $1 AND status = ANY($2)")
                .bind(i32::from(id))
                .bind(vec![JobStatus::Pending, JobStatus::Failed])
                .execute(self.deref())
                .await?
                .rows_affected(),
        )
    }

    async fn current_status(&self, id: JobId) -> sqlx::Result<Option<JobStatus>> {
        sqlx::query_scalar("SELECT status FROM pricequeue_jobs WHERE id = $1")
            .bind(i32::from(id))
            .fetch_optional(self.deref())
            .await
    }

    async fn status_counts(&self) -> sqlx::Result<Vec<(JobStatus, i64)>> {
        sqlx::query_as("SELECT status, COUNT(*) FROM pricequeue_jobs GROUP BY status")
            .fetch_all(self.deref())
            .await
    }

    async fn job_type_counts(&self) -> sqlx::Result<Vec<(String, i64)>> {
        sqlx::query_as("SELECT job_type, COUNT(*) FROM pricequeue_jobs GROUP BY job_type")
            .fetch_all(self.deref())
            .await
    }

    async fn daily_counts(&self, since: DateTime<Utc>) -> sqlx::Result<Vec<(NaiveDate, i64)>> {
        sqlx::query_as(
            r#"SELECT (created_at AT TIME ZONE 'UTC')::date AS day, COUNT(*)
            FROM pricequeue_jobs
            WHERE created_at >= $1
            GROUP BY day
            ORDER BY day"#,
        )
        .bind(since)
        .fetch_all(self.deref())
        .await
    }
}
