//! Helpers for testing.

/// A macro for making assertions about what jobs should have been enqueued.
///
/// Facilitates making assertions about the jobs held by a backend. Assertions can be based on
/// job type, payload, symbol, status, priority and scheduled_at.
///
/// # Example
///
/// ```
/// # use pricequeue::prelude::*;
/// # use pricequeue::testing::assert_enqueued;
/// # use chrono::{Utc, TimeDelta};
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let backend = InMemoryBackend::new();
/// let queue = JobQueue::new(backend.clone());
///
/// JobBuilder::new(StockLoad::new("aapl"))
///     .with_priority(3)
///     .schedule_in(TimeDelta::minutes(5))
///     .enqueue(&queue)
///     .await
///     .unwrap();
///
/// JobBuilder::new(PortfolioLoad::new(["AAPL", "MSFT"]))
///     .enqueue(&queue)
///     .await
///     .unwrap();
///
/// assert_enqueued!(
///     to: backend,
///     with_payload: StockLoad::new("AAPL"),
///     with_priority: 3,
///     scheduled_after: Utc::now()
/// );
///
/// assert_enqueued!(
///     2 jobs,
///     to: backend,
///     for_symbol: "AAPL",
///     with_status: JobStatus::Pending
/// );
///
/// assert_enqueued!(
///     0 jobs,
///     to: backend,
///     of_type: JobType::DataChunk
/// );
/// # });
/// ```
#[macro_export]
macro_rules! assert_enqueued {
    (1 job, to: $backend:expr, $($tail:tt)*) => {
        $crate::assert_enqueued!(@internal 1 to: $backend, $($tail)*)
    };
    ($n:literal jobs, to: $backend:expr, $($tail:tt)*) => {
        $crate::assert_enqueued!(@internal $n to: $backend, $($tail)*)
    };
    (to: $backend:expr, $($tail:tt)*) => {
        $crate::assert_enqueued!(@at_least_one to: $backend, $($tail)*)
    };
    (@at_least_one to: $backend:expr, $($key:ident: $value:expr),+ $(,)?) => {{
        use $crate::backend::Backend;
        let all_jobs = $backend
            .list(&$crate::job::query::ListQuery::default().with_limit(usize::MAX))
            .await
            .unwrap();
        let jobs: Vec<_> = all_jobs
            .iter()
            .filter(|job| true $(&& $crate::assert_enqueued!(@matches job, $key, $value))+)
            .collect();
        assert!(
            !jobs.is_empty(),
            "No jobs enqueued {}\n\nAll enqueued jobs:\n{all_jobs:#?}",
            stringify!($($key: $value),+)
        );
    }};
    (@internal $n:literal to: $backend:expr, $($key:ident: $value:expr),+ $(,)?) => {{
        use $crate::backend::Backend;
        let all_jobs = $backend
            .list(&$crate::job::query::ListQuery::default().with_limit(usize::MAX))
            .await
            .unwrap();
        let jobs: Vec<_> = all_jobs
            .iter()
            .filter(|job| true $(&& $crate::assert_enqueued!(@matches job, $key, $value))+)
            .collect();
        assert!(
            jobs.len() == $n,
            "Unexpected number of jobs enqueued {},\n\n\
            Expected {} jobs, found {} matching job enqueued:\n\n\
            Matching jobs:\n\
            {jobs:#?}\n\n\
            All enqueued jobs:\n\
            {all_jobs:#?}",
            stringify!($($key: $value),+),
            $n,
            jobs.len(),
        );
    }};
    (@matches $job:ident, of_type, $value:expr) => {
        $job.job_type == $value
    };
    (@matches $job:ident, with_payload, $value:expr) => {
        $job.payload == $crate::job::Payload::from($value)
    };
    (@matches $job:ident, for_symbol, $value:expr) => {
        $job.payload.symbols().contains(&$value)
    };
    (@matches $job:ident, with_status, $value:expr) => {
        $job.status == $value
    };
    (@matches $job:ident, with_priority, $value:expr) => {
        $job.priority == $value
    };
    (@matches $job:ident, scheduled_at, $value:expr) => {
        $job.scheduled_at == $value
    };
    (@matches $job:ident, scheduled_after, $value:expr) => {
        $job.scheduled_at > $value
    };
    (@matches $job:ident, scheduled_before, $value:expr) => {
        $job.scheduled_at < $value
    };
}

pub use assert_enqueued;

#[cfg(test)]
mod test {
    use chrono::{TimeDelta, Utc};

    use crate::{
        backend::memory::InMemoryBackend,
        job::{builder::JobBuilder, DataChunk, JobStatus, JobType, StockLoad},
        queue::JobQueue,
    };

    #[tokio::test]
    async fn assert_enqueued() {
        let backend = InMemoryBackend::new();
        let queue = JobQueue::new(backend.clone());
        let scheduled_at = Utc::now() + TimeDelta::hours(1);
        let chunk = DataChunk {
            symbol: "IBM".to_owned(),
            start_date: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: chrono::NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        };

        JobBuilder::new(chunk.clone())
            .schedule_at(scheduled_at)
            .enqueue(&queue)
            .await
            .unwrap();
        JobBuilder::new(StockLoad::new("IBM"))
            .with_priority(-2)
            .enqueue(&queue)
            .await
            .unwrap();

        assert_enqueued!(to: backend, with_payload: chunk.clone());
        assert_enqueued!(1 job, to: backend, scheduled_at: scheduled_at);
        assert_enqueued!(
            1 job,
            to: backend,
            of_type: JobType::StockLoad,
            with_priority: -2,
            scheduled_before: Utc::now() + TimeDelta::seconds(1),
        );
        assert_enqueued!(2 jobs, to: backend, for_symbol: "IBM");
        assert_enqueued!(0 jobs, to: backend, with_status: JobStatus::Completed);
    }

    #[tokio::test]
    #[should_panic(expected = "No jobs enqueued")]
    async fn assert_enqueued_fails_without_match() {
        let backend = InMemoryBackend::new();

        assert_enqueued!(to: backend, of_type: JobType::PortfolioLoad);
    }
}
