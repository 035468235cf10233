//! A persistent background job queue for long running market data loads.
//!
//! Work is enqueued through a [`JobQueue`], stored by a [`Backend`] and executed one job at a
//! time by a [`Dispatcher`], usually driven by a cron like [`schedule::DispatchSchedule`].
//!
//! ```
//! # use pricequeue::prelude::*;
//! # use serde_json::json;
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let backend = InMemoryBackend::new();
//! let queue = JobQueue::new(backend.clone());
//!
//! let job_id = queue
//!     .enqueue("stock_load", json!({ "symbol": "aapl " }), Default::default())
//!     .await
//!     .unwrap();
//!
//! let job = queue.get_job(job_id).await.unwrap();
//! assert_eq!(job.status, JobStatus::Pending);
//! assert_eq!(job.payload.symbols(), ["AAPL"]);
//! # });
//! ```
use backend::BackendError;
use job::{JobId, JobStatus, ValidationError};
use thiserror::Error;

pub mod api;
pub mod backend;
pub mod backoff;
pub mod dispatcher;
pub mod job;
pub mod prelude;
pub mod queue;
pub mod schedule;
pub mod stats;
pub mod task;
pub mod tasks;
pub mod testing;

pub use backend::Backend;
pub use dispatcher::Dispatcher;
pub use queue::JobQueue;

/// Errors returned by the queue api and the dispatcher.
///
/// Failures of the task being executed are not errors of the queue: they are recorded on the job
/// and reported through [`dispatcher::ProcessOutcome`].
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),
    #[error("Job not found: {0}")]
    NotFound(JobId),
    #[error("Cannot {operation} job {id} with status {status}")]
    InvalidState {
        id: JobId,
        status: JobStatus,
        operation: &'static str,
    },
    #[error("Error communicating with the backend: {0}")]
    Backend(BackendError),
    #[error("Error encoding or decoding value: {0}")]
    Encode(#[from] serde_json::Error),
}

impl QueueError {
    /// Maps a backend error raised while performing `operation` on a single job.
    pub(crate) fn during(operation: &'static str) -> impl FnOnce(BackendError) -> Self {
        move |error| match error {
            BackendError::JobNotFound(id) => Self::NotFound(id),
            BackendError::InvalidTransition { id, status } => Self::InvalidState {
                id,
                status,
                operation,
            },
            error => Self::Backend(error),
        }
    }
}

impl From<BackendError> for QueueError {
    fn from(error: BackendError) -> Self {
        Self::during("update")(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn backend_errors_map_to_queue_errors() {
        let id = JobId::from(7);

        assert_matches!(
            QueueError::from(BackendError::JobNotFound(id)),
            QueueError::NotFound(not_found) if not_found == id
        );
        assert_matches!(
            QueueError::during("delete")(BackendError::InvalidTransition {
                id,
                status: JobStatus::Processing
            }),
            QueueError::InvalidState {
                operation: "delete",
                status: JobStatus::Processing,
                ..
            }
        );
        assert_matches!(
            QueueError::from(BackendError::BadState),
            QueueError::Backend(BackendError::BadState)
        );
    }

    #[test]
    fn invalid_state_message() {
        let error = QueueError::InvalidState {
            id: 3.into(),
            status: JobStatus::Completed,
            operation: "delete",
        };
        assert_eq!(
            error.to_string(),
            "Cannot delete job 3 with status completed"
        );
    }
}
