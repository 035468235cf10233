use super::{JobStatus, JobType};

/// Filters for listing jobs.
///
/// Results are always ordered most recently created first and truncated to `limit`.
///
/// ```
/// # use pricequeue::job::{query::ListQuery, JobStatus, JobType};
/// let query = ListQuery::default()
///     .with_status(JobStatus::Failed)
///     .with_job_type(JobType::PortfolioLoad)
///     .with_limit(10);
///
/// assert_eq!(query.limit, 10);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListQuery {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub limit: usize,
}

impl ListQuery {
    pub const DEFAULT_LIMIT: usize = 50;

    pub fn with_status(self, status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..self
        }
    }

    pub fn with_job_type(self, job_type: JobType) -> Self {
        Self {
            job_type: Some(job_type),
            ..self
        }
    }

    pub fn with_limit(self, limit: usize) -> Self {
        Self { limit, ..self }
    }
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            status: None,
            job_type: None,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}
