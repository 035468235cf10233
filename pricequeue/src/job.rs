//! The job record and the types it is made of.
use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod builder;
pub mod payload;
pub mod query;

pub use payload::{DataChunk, Payload, PortfolioLoad, StockLoad, ValidationError};

/// Identifier of a job, assigned by the store on insert.
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i32);

impl From<i32> for JobId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<JobId> for i32 {
    fn from(value: JobId) -> Self {
        value.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The lifecycle state of a job.
///
/// ```text
/// pending --(claimed)--> processing --(success)--> completed
/// pending --(claimed)--> processing --(failure, attempts < max)--> pending
/// pending --(claimed)--> processing --(failure, attempts == max)--> failed
/// pending <--(operator)--> paused
/// ```
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Paused,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Paused,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Paused => "paused",
        }
    }

    /// Only jobs that are not in flight and have not produced a result may be deleted.
    pub const fn is_deletable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Failed)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ValidationError::UnknownStatus(s.to_owned()))
    }
}

/// The tag selecting which task implementation runs a job.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Load the price history of a single symbol.
    StockLoad,
    /// Load the price history of every symbol of a portfolio.
    PortfolioLoad,
    /// Load one bounded date range of prices for one symbol.
    DataChunk,
}

impl JobType {
    pub const ALL: [JobType; 3] = [JobType::StockLoad, JobType::PortfolioLoad, JobType::DataChunk];

    pub const fn as_str(&self) -> &'static str {
        match self {
            JobType::StockLoad => "stock_load",
            JobType::PortfolioLoad => "portfolio_load",
            JobType::DataChunk => "data_chunk",
        }
    }
}

impl Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ValidationError::EmptyJobType);
        }
        Self::ALL
            .into_iter()
            .find(|job_type| job_type.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ValidationError::UnknownJobType(s.to_owned()))
    }
}

/// A unit of deferred work as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Higher values are dispatched first.
    pub priority: i32,
    pub payload: Payload,
    pub progress_current: i64,
    pub progress_total: i64,
    pub attempts: u16,
    pub max_attempts: u16,
    /// Only set once the job has completed.
    pub result: Option<serde_json::Value>,
    /// Only set once the job has failed for the last time.
    pub error_message: Option<String>,
    /// One entry per failed attempt, including the ones that were retried.
    pub errors: Vec<JobError>,
    pub created_at: DateTime<Utc>,
    /// The job is not eligible for dispatch before this instant.
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn is_final_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Completion ratio in the range `0.0..=1.0`, if the task reported a total.
    pub fn progress_ratio(&self) -> Option<f64> {
        (self.progress_total > 0)
            .then(|| self.progress_current as f64 / self.progress_total as f64)
    }
}

/// A failed execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub attempt: u16,
    pub error_type: ErrorType,
    pub details: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorType {
    Panic,
    Timeout,
    Other(String),
}

impl ErrorType {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorType::Panic => "panic",
            ErrorType::Timeout => "timeout",
            ErrorType::Other(other) => other,
        }
    }
}

impl Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ErrorType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "panic" => ErrorType::Panic,
            "timeout" => ErrorType::Timeout,
            _ => ErrorType::Other(value),
        }
    }
}

impl From<&str> for ErrorType {
    fn from(value: &str) -> Self {
        value.to_owned().into()
    }
}

impl From<ErrorType> for String {
    fn from(value: ErrorType) -> Self {
        match value {
            ErrorType::Other(other) => other,
            other => other.as_str().to_owned(),
        }
    }
}
