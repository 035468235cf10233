//! Aggregate counts over the whole queue.
use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde::Serialize;

use crate::{
    backend::Backend,
    job::{JobStatus, JobType},
    QueueError,
};

/// Number of trailing days, today included, covered by [`Statistics::recent_activity`].
pub const RECENT_ACTIVITY_DAYS: i64 = 7;

/// A point in time summary of the queue.
///
/// Every status and job type is present in the maps, with a count of zero when no job matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total: u64,
    pub by_status: BTreeMap<JobStatus, u64>,
    pub by_type: BTreeMap<JobType, u64>,
    /// Jobs created per UTC day over the last week, oldest first. Days without jobs are omitted.
    pub recent_activity: Vec<DailyActivity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyActivity {
    pub date: NaiveDate,
    pub count: u64,
}

fn zero_filled<K: Ord + Copy>(keys: &[K], counts: Vec<(K, u64)>) -> BTreeMap<K, u64> {
    let mut map: BTreeMap<K, u64> = keys.iter().map(|key| (*key, 0)).collect();
    for (key, count) in counts {
        *map.entry(key).or_insert(0) += count;
    }
    map
}

impl Statistics {
    pub async fn collect(backend: &impl Backend) -> Result<Self, QueueError> {
        Self::collect_at(backend, Utc::now()).await
    }

    pub(crate) async fn collect_at(
        backend: &impl Backend,
        now: DateTime<Utc>,
    ) -> Result<Self, QueueError> {
        let by_status = zero_filled(&JobStatus::ALL, backend.count_by_status().await?);
        let by_type = zero_filled(&JobType::ALL, backend.count_by_type().await?);

        let first_day = now.date_naive() - TimeDelta::days(RECENT_ACTIVITY_DAYS - 1);
        let since = first_day.and_time(NaiveTime::default()).and_utc();
        let mut recent_activity: Vec<_> = backend
            .created_per_day(since)
            .await?
            .into_iter()
            .filter(|(date, count)| *date >= first_day && *count > 0)
            .map(|(date, count)| DailyActivity { date, count })
            .collect();
        recent_activity.sort_by_key(|activity| activity.date);

        Ok(Self {
            total: by_status.values().sum(),
            by_status,
            by_type,
            recent_activity,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        backend::{memory::InMemoryBackend, BackendError, MockBackend},
        job::StockLoad,
        queue::JobQueue,
    };
    use assert_matches::assert_matches;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn empty_store() {
        let stats = Statistics::collect(&InMemoryBackend::new()).await.unwrap();

        assert_eq!(stats.total, 0);
        assert_eq!(stats.by_status.len(), 5);
        assert!(stats.by_status.values().all(|count| *count == 0));
        assert_eq!(stats.by_type.len(), 3);
        assert!(stats.by_type.values().all(|count| *count == 0));
        assert!(stats.recent_activity.is_empty());
    }

    #[tokio::test]
    async fn counts_jobs() {
        let queue = JobQueue::new(InMemoryBackend::new());
        for symbol in ["AAPL", "MSFT", "IBM"] {
            queue
                .enqueue_payload(StockLoad::new(symbol).into(), Default::default())
                .await
                .unwrap();
        }
        queue
            .enqueue(
                "portfolio_load",
                serde_json::json!({ "symbols": ["T"] }),
                Default::default(),
            )
            .await
            .unwrap();
        queue.pause_job(2.into()).await.unwrap();

        let stats = queue.statistics().await.unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.by_status[&JobStatus::Pending], 3);
        assert_eq!(stats.by_status[&JobStatus::Paused], 1);
        assert_eq!(stats.by_status[&JobStatus::Failed], 0);
        assert_eq!(stats.by_type[&JobType::StockLoad], 3);
        assert_eq!(stats.by_type[&JobType::PortfolioLoad], 1);
        assert_eq!(stats.by_type[&JobType::DataChunk], 0);
        assert_eq!(
            stats.recent_activity,
            [DailyActivity {
                date: Utc::now().date_naive(),
                count: 4
            }]
        );
    }

    #[tokio::test]
    async fn recent_activity_is_oldest_first_within_the_week() {
        let now = date(2024, 3, 10).and_hms_opt(15, 0, 0).unwrap().and_utc();
        let mut backend = MockBackend::new();
        backend.expect_count_by_status().returning(|| Ok(vec![]));
        backend.expect_count_by_type().returning(|| Ok(vec![]));
        backend
            .expect_created_per_day()
            .withf(move |since| *since == date(2024, 3, 4).and_hms_opt(0, 0, 0).unwrap().and_utc())
            .returning(|_| {
                Ok(vec![
                    (date(2024, 3, 10), 2),
                    (date(2024, 3, 1), 9),
                    (date(2024, 3, 4), 1),
                    (date(2024, 3, 7), 0),
                ])
            });

        let stats = Statistics::collect_at(&backend, now).await.unwrap();

        assert_eq!(
            stats.recent_activity,
            [
                DailyActivity {
                    date: date(2024, 3, 4),
                    count: 1
                },
                DailyActivity {
                    date: date(2024, 3, 10),
                    count: 2
                },
            ]
        );
    }

    #[tokio::test]
    async fn store_errors_propagate() {
        let mut backend = MockBackend::new();
        backend
            .expect_count_by_status()
            .returning(|| Err(BackendError::Store("timeout".to_owned())));

        assert_matches!(
            Statistics::collect(&backend).await,
            Err(QueueError::Backend(BackendError::Store(_)))
        );
    }

    #[test]
    fn serializes_with_named_keys() {
        let stats = Statistics {
            total: 1,
            by_status: zero_filled(&JobStatus::ALL, vec![(JobStatus::Completed, 1)]),
            by_type: zero_filled(&JobType::ALL, vec![(JobType::DataChunk, 1)]),
            recent_activity: vec![DailyActivity {
                date: date(2024, 1, 2),
                count: 1,
            }],
        };

        assert_eq!(
            serde_json::to_value(stats).unwrap(),
            serde_json::json!({
                "total": 1,
                "by_status": {
                    "pending": 0,
                    "processing": 0,
                    "completed": 1,
                    "failed": 0,
                    "paused": 0
                },
                "by_type": { "stock_load": 0, "portfolio_load": 0, "data_chunk": 1 },
                "recent_activity": [{ "date": "2024-01-02", "count": 1 }]
            })
        );
    }
}
