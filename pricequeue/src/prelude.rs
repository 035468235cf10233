//! The purpose of this module is to alleviate the need to import many of the `[pricequeue]` types.
//!
//! ```
//! # #![allow(unused_imports)]
//! use pricequeue::prelude::*;
//! ```
pub use crate::api;
pub use crate::backend::memory::InMemoryBackend;
pub use crate::backend::{Backend, BackendError, ExecutionError};
pub use crate::backoff::{BackoffStrategy, Curve, Jitter, RetryPolicy, Strategy};
pub use crate::dispatcher::{Dispatcher, ProcessOutcome};
pub use crate::job::builder::{EnqueueOptions, JobBuilder};
pub use crate::job::query::ListQuery;
pub use crate::job::{
    DataChunk, ErrorType, Job, JobId, JobStatus, JobType, Payload, PortfolioLoad, StockLoad,
    ValidationError,
};
pub use crate::queue::JobQueue;
pub use crate::schedule::{DispatchSchedule, ScheduleError, ScheduleHandle};
pub use crate::stats::Statistics;
pub use crate::task::{JobContext, Task, TaskError, TaskFailure, TaskRegistry};
pub use crate::tasks::PriceLoader;
pub use crate::QueueError;
