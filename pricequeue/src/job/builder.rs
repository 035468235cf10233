use chrono::{DateTime, TimeDelta, Utc};

use crate::{backend::Backend, queue::JobQueue, QueueError};

use super::{payload::Payload, JobId};

/// Typed construction of a job, as an alternative to [`JobQueue::enqueue`] with a raw document.
///
/// ```
/// # use pricequeue::prelude::*;
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let queue = JobQueue::new(InMemoryBackend::new());
///
/// let job_id = JobBuilder::new(StockLoad::new("msft "))
///     .with_priority(5)
///     .with_max_attempts(2)
///     .enqueue(&queue)
///     .await
///     .unwrap();
///
/// let job = queue.get_job(job_id).await.unwrap();
/// assert_eq!(job.payload.symbols(), ["MSFT"]);
/// assert_eq!(job.priority, 5);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct JobBuilder {
    payload: Payload,
    options: EnqueueOptions,
}

/// Queue level settings of a job that are independent of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub priority: i32,
    pub max_attempts: u16,
    /// Defaults to now.
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl EnqueueOptions {
    pub const DEFAULT_MAX_ATTEMPTS: u16 = 3;
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            scheduled_at: None,
        }
    }
}

impl JobBuilder {
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
            options: Default::default(),
        }
    }

    pub fn with_priority(self, priority: i32) -> Self {
        Self {
            options: EnqueueOptions {
                priority,
                ..self.options
            },
            ..self
        }
    }

    pub fn with_max_attempts(self, max_attempts: u16) -> Self {
        Self {
            options: EnqueueOptions {
                max_attempts,
                ..self.options
            },
            ..self
        }
    }

    pub fn schedule_at(self, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            options: EnqueueOptions {
                scheduled_at: Some(scheduled_at),
                ..self.options
            },
            ..self
        }
    }

    pub fn schedule_in(self, delay: TimeDelta) -> Self {
        self.schedule_at(Utc::now() + delay)
    }

    pub fn into_parts(self) -> (Payload, EnqueueOptions) {
        (self.payload, self.options)
    }

    pub async fn enqueue<B>(self, queue: &JobQueue<B>) -> Result<JobId, QueueError>
    where
        B: Backend,
    {
        queue.enqueue_payload(self.payload, self.options).await
    }
}
