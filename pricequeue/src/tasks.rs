//! Built in market data tasks.
//!
//! Loading a portfolio fans out into one `stock_load` job per symbol, and each `stock_load` fans
//! out into one `data_chunk` job per calendar year. Only `data_chunk` jobs talk to the price
//! provider, through a [`PriceLoader`], so a failure only retries one year of one symbol.
use async_trait::async_trait;
use chrono::{Datelike, Months, NaiveDate, Utc};
use serde_json::json;

use crate::{
    job::{builder::EnqueueOptions, DataChunk, JobType, Payload, PortfolioLoad, StockLoad},
    task::{JobContext, Task, TaskError, TaskRegistry},
};

/// Length of the history loaded when a `stock_load` has no start date.
pub const DEFAULT_HISTORY: Months = Months::new(5 * 12);

/// Fetches and persists the prices of one symbol over a date range.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceLoader: Send + Sync {
    /// Returns the number of rows stored.
    async fn load(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<usize, TaskError>;
}

/// A registry with every built in task, loading prices with `loader`.
pub fn registry(loader: impl PriceLoader + 'static) -> TaskRegistry {
    TaskRegistry::new()
        .with_task(PortfolioLoadTask)
        .with_task(StockLoadTask)
        .with_task(DataChunkTask::new(loader))
}

/// Splits an inclusive date range at calendar year boundaries.
///
/// ```
/// # use chrono::NaiveDate;
/// # use pricequeue::tasks::chunk_range;
/// let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
///
/// assert_eq!(
///     chunk_range(date(2022, 6, 1), date(2023, 3, 31)),
///     [
///         (date(2022, 6, 1), date(2022, 12, 31)),
///         (date(2023, 1, 1), date(2023, 3, 31)),
///     ]
/// );
/// ```
pub fn chunk_range(start: NaiveDate, end: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    let mut chunks = vec![];
    let mut chunk_start = start;
    while chunk_start <= end {
        let year_end = NaiveDate::from_ymd_opt(chunk_start.year(), 12, 31).unwrap_or(end);
        let chunk_end = year_end.min(end);
        chunks.push((chunk_start, chunk_end));
        match chunk_end.succ_opt() {
            Some(next) => chunk_start = next,
            None => break,
        }
    }
    chunks
}

fn resolve_range(
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    today: NaiveDate,
) -> (NaiveDate, NaiveDate) {
    let end = end_date.unwrap_or(today);
    let start = start_date.unwrap_or_else(|| end.checked_sub_months(DEFAULT_HISTORY).unwrap_or(end));
    (start, end)
}

fn unexpected_payload(expected: JobType, payload: &Payload) -> TaskError {
    TaskError::new(
        "unexpected_payload",
        format!(
            "Expected a {expected} payload, got {}",
            payload.job_type()
        ),
    )
}

fn child_options(ctx: &JobContext) -> EnqueueOptions {
    EnqueueOptions {
        priority: ctx.priority(),
        ..Default::default()
    }
}

/// Enqueues one `stock_load` job per symbol of the portfolio.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortfolioLoadTask;

#[async_trait]
impl Task for PortfolioLoadTask {
    fn job_type(&self) -> JobType {
        JobType::PortfolioLoad
    }

    async fn run(&self, payload: &Payload, ctx: JobContext) -> Result<serde_json::Value, TaskError> {
        let Payload::PortfolioLoad(PortfolioLoad {
            symbols,
            start_date,
            end_date,
        }) = payload
        else {
            return Err(unexpected_payload(JobType::PortfolioLoad, payload));
        };

        let queue = ctx.queue();
        let total = symbols.len() as i64;
        let mut jobs = Vec::with_capacity(symbols.len());
        for (index, symbol) in symbols.iter().enumerate() {
            let payload = StockLoad {
                symbol: symbol.clone(),
                start_date: *start_date,
                end_date: *end_date,
            };
            jobs.push(queue.enqueue_payload(payload.into(), child_options(&ctx)).await?);
            ctx.report_progress(index as i64 + 1, total).await?;
        }
        tracing::debug!(job_id = %ctx.job_id(), "Enqueued {} stock loads", jobs.len());

        Ok(json!({ "symbols": symbols, "jobs": jobs }))
    }
}

/// Enqueues one `data_chunk` job per calendar year of the requested range.
///
/// Without a start date the last [`DEFAULT_HISTORY`] up to the end date, or today, is loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct StockLoadTask;

#[async_trait]
impl Task for StockLoadTask {
    fn job_type(&self) -> JobType {
        JobType::StockLoad
    }

    async fn run(&self, payload: &Payload, ctx: JobContext) -> Result<serde_json::Value, TaskError> {
        let Payload::StockLoad(StockLoad {
            symbol,
            start_date,
            end_date,
        }) = payload
        else {
            return Err(unexpected_payload(JobType::StockLoad, payload));
        };

        let (start, end) = resolve_range(*start_date, *end_date, Utc::now().date_naive());
        let chunks = chunk_range(start, end);
        let queue = ctx.queue();
        let total = chunks.len() as i64;
        let mut jobs = Vec::with_capacity(chunks.len());
        for (index, (chunk_start, chunk_end)) in chunks.into_iter().enumerate() {
            let payload = DataChunk {
                symbol: symbol.clone(),
                start_date: chunk_start,
                end_date: chunk_end,
            };
            jobs.push(queue.enqueue_payload(payload.into(), child_options(&ctx)).await?);
            ctx.report_progress(index as i64 + 1, total).await?;
        }

        Ok(json!({
            "symbol": symbol,
            "start_date": start,
            "end_date": end,
            "chunks": jobs,
        }))
    }
}

/// Loads one chunk of prices with a [`PriceLoader`].
#[derive(Debug, Clone)]
pub struct DataChunkTask<L> {
    loader: L,
}

impl<L> DataChunkTask<L>
where
    L: PriceLoader,
{
    pub fn new(loader: L) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl<L> Task for DataChunkTask<L>
where
    L: PriceLoader,
{
    fn job_type(&self) -> JobType {
        JobType::DataChunk
    }

    async fn run(&self, payload: &Payload, ctx: JobContext) -> Result<serde_json::Value, TaskError> {
        let Payload::DataChunk(DataChunk {
            symbol,
            start_date,
            end_date,
        }) = payload
        else {
            return Err(unexpected_payload(JobType::DataChunk, payload));
        };

        ctx.report_progress(0, 1).await?;
        let rows = self.loader.load(symbol, *start_date, *end_date).await?;
        ctx.report_progress(1, 1).await?;
        tracing::debug!(job_id = %ctx.job_id(), %symbol, rows, "Loaded {start_date} to {end_date}");

        Ok(json!({
            "symbol": symbol,
            "start_date": start_date,
            "end_date": end_date,
            "rows": rows,
        }))
    }
}
