use chrono::{DateTime, Utc};
use pricequeue::{
    backend::BackendError,
    job::{JobError, JobType, Payload},
};
use sqlx::{
    postgres::{PgHasArrayType, PgTypeInfo},
    prelude::FromRow,
    types::Json,
};

#[derive(sqlx::Type, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "pricequeue_job_status", rename_all = "lowercase")]
pub(crate) enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Paused,
}

impl PgHasArrayType for JobStatus {
    fn array_type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("_pricequeue_job_status")
    }
}

impl From<JobStatus> for pricequeue::job::JobStatus {
    fn from(value: JobStatus) -> Self {
        match value {
            JobStatus::Pending => Self::Pending,
            JobStatus::Processing => Self::Processing,
            JobStatus::Completed => Self::Completed,
            JobStatus::Failed => Self::Failed,
            JobStatus::Paused => Self::Paused,
        }
    }
}

impl From<pricequeue::job::JobStatus> for JobStatus {
    fn from(value: pricequeue::job::JobStatus) -> Self {
        match value {
            pricequeue::job::JobStatus::Pending => Self::Pending,
            pricequeue::job::JobStatus::Processing => Self::Processing,
            pricequeue::job::JobStatus::Completed => Self::Completed,
            pricequeue::job::JobStatus::Failed => Self::Failed,
            pricequeue::job::JobStatus::Paused => Self::Paused,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct Job {
    pub id: i32,
    pub job_type: String,
    pub status: JobStatus,
    pub priority: i32,
    pub payload: serde_json::Value,
    pub progress_current: i64,
    pub progress_total: i64,
    pub attempts: i32,
    pub max_attempts: i32,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub errors: Json<Vec<JobError>>,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<Job> for pricequeue::job::Job {
    type Error = BackendError;

    fn try_from(value: Job) -> Result<Self, Self::Error> {
        let job_type: JobType = value.job_type.parse()?;
        let payload = Payload::parse(job_type, value.payload)?;
        Ok(Self {
            id: value.id.into(),
            job_type,
            status: value.status.into(),
            priority: value.priority,
            payload,
            progress_current: value.progress_current,
            progress_total: value.progress_total,
            attempts: attempt_count(value.attempts)?,
            max_attempts: attempt_count(value.max_attempts)?,
            result: value.result,
            error_message: value.error_message,
            errors: value.errors.0,
            created_at: value.created_at,
            scheduled_at: value.scheduled_at,
            started_at: value.started_at,
            completed_at: value.completed_at,
        })
    }
}

fn attempt_count(value: i32) -> Result<u16, BackendError> {
    u16::try_from(value).map_err(|_| BackendError::BadState)
}

#[cfg(test)]
mod test {
    use chrono::NaiveDate;
    use pricequeue::job::{DataChunk, ErrorType};
    use serde_json::json;

    use super::*;

    fn row() -> Job {
        Job {
            id: 7,
            job_type: "data_chunk".to_owned(),
            status: JobStatus::Pending,
            priority: 2,
            payload: json!({
                "symbol": "MSFT",
                "start_date": "2023-01-01",
                "end_date": "2023-12-31",
            }),
            progress_current: 0,
            progress_total: 0,
            attempts: 1,
            max_attempts: 3,
            result: None,
            error_message: None,
            errors: Json(vec![JobError {
                attempt: 1,
                error_type: ErrorType::Timeout,
                details: "too slow".to_owned(),
                recorded_at: Utc::now(),
            }]),
            created_at: Utc::now(),
            scheduled_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn converts_rows_into_jobs() {
        let job = pricequeue::job::Job::try_from(row()).unwrap();

        assert_eq!(job.id, 7.into());
        assert_eq!(job.job_type, JobType::DataChunk);
        assert_eq!(job.status, pricequeue::job::JobStatus::Pending);
        assert_eq!(
            job.payload,
            DataChunk {
                symbol: "MSFT".to_owned(),
                start_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
            }
            .into()
        );
        assert_eq!(job.errors[0].error_type, ErrorType::Timeout);
    }

    #[test]
    fn rejects_corrupt_rows() {
        let corrupt = Job {
            job_type: "bond_load".to_owned(),
            ..row()
        };
        assert!(matches!(
            pricequeue::job::Job::try_from(corrupt),
            Err(BackendError::InvalidPayload(_))
        ));

        let corrupt = Job {
            payload: json!({ "symbol": "" }),
            ..row()
        };
        assert!(matches!(
            pricequeue::job::Job::try_from(corrupt),
            Err(BackendError::InvalidPayload(_))
        ));

        let corrupt = Job {
            attempts: -1,
            ..row()
        };
        assert!(matches!(
            pricequeue::job::Job::try_from(corrupt),
            Err(BackendError::BadState)
        ));
    }
}
