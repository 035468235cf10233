//! Drives a [`Dispatcher`] from a cron schedule.
//!
//! ```no_run
//! # use pricequeue::prelude::*;
//! # async fn run() -> Result<(), ScheduleError> {
//! let dispatcher = Dispatcher::new(InMemoryBackend::new(), TaskRegistry::new());
//! let handle = DispatchSchedule::parse(dispatcher, "0 * * * * *")?.spawn();
//! // ...
//! handle.graceful_shutdown().await
//! # }
//! ```
use std::{str::FromStr, time::Duration};

use chrono::Utc;
use cron::Schedule;
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    backend::Backend,
    dispatcher::{Dispatcher, ProcessOutcome, DEFAULT_TIMEOUT},
};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid cron expression: {0}")]
    InvalidCron(#[from] cron::error::Error),
    #[error("Failed to shut down the dispatch schedule")]
    GracefulShutdownFailed,
}

/// Runs the dispatcher on every tick of a cron schedule.
///
/// Each tick processes jobs until none is available or `batch_size` jobs have been processed.
pub struct DispatchSchedule<B> {
    dispatcher: Dispatcher<B>,
    schedule: Schedule,
    timeout: Duration,
    batch_size: usize,
}

impl<B> std::fmt::Debug for DispatchSchedule<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchSchedule")
            .field("dispatcher", &self.dispatcher)
            .field("schedule", &self.schedule.to_string())
            .field("timeout", &self.timeout)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl<B> DispatchSchedule<B>
where
    B: Backend + 'static,
{
    pub fn new(dispatcher: Dispatcher<B>, schedule: Schedule) -> Self {
        Self {
            dispatcher,
            schedule,
            timeout: DEFAULT_TIMEOUT,
            batch_size: 1,
        }
    }

    /// Parses a cron expression with a seconds field, e.g. `"0 */5 * * * *"`.
    pub fn parse(dispatcher: Dispatcher<B>, expression: &str) -> Result<Self, ScheduleError> {
        Ok(Self::new(dispatcher, Schedule::from_str(expression)?))
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            ..self
        }
    }

    pub fn spawn(self) -> ScheduleHandle {
        let (sender, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            loop {
                let Some(next) = self.schedule.upcoming(Utc).next() else {
                    tracing::warn!("No future tick in the dispatch schedule");
                    break;
                };
                let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => self.tick().await,
                    _ = rx.recv() => {
                        break;
                    },
                }
            }
            tracing::debug!("Shutting down dispatch schedule");
        });

        ScheduleHandle {
            sender,
            handle: Some(handle),
        }
    }

    async fn tick(&self) {
        for _ in 0..self.batch_size {
            match self.dispatcher.process_next_job(self.timeout).await {
                Ok(ProcessOutcome::NoJobAvailable) => break,
                Ok(outcome) => tracing::debug!(?outcome, "Processed scheduled job"),
                Err(err) => {
                    tracing::error!(?err, "Failed to process scheduled job: {err}");
                    break;
                }
            }
        }
    }
}

/// Stops a spawned [`DispatchSchedule`]. A job in flight is allowed to finish.
#[derive(Debug)]
pub struct ScheduleHandle {
    sender: mpsc::UnboundedSender<()>,
    handle: Option<JoinHandle<()>>,
}

impl ScheduleHandle {
    pub async fn graceful_shutdown(mut self) -> Result<(), ScheduleError> {
        self.sender
            .send(())
            .map_err(|_| ScheduleError::GracefulShutdownFailed)?;
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|_| ScheduleError::GracefulShutdownFailed)?;
        }
        Ok(())
    }
}
