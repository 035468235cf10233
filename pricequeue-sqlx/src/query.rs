use pricequeue::job::query::ListQuery;
use sqlx::{Postgres, QueryBuilder};

use crate::types::JobStatus;

pub(crate) trait ToQuery {
    fn query(&self) -> QueryBuilder<'_, Postgres>;
}

impl ToQuery for ListQuery {
    fn query(&self) -> QueryBuilder<'_, Postgres> {
        let mut builder =
            QueryBuilder::new(concat!("SELECT ", job_columns!(), " FROM pricequeue_jobs"));
        let mut keyword = " WHERE";
        if let Some(status) = self.status {
            builder.push(keyword);
            builder.push(" status = ");
            builder.push_bind(JobStatus::from(status));
            keyword = " AND";
        }
        if let Some(job_type) = self.job_type {
            builder.push(keyword);
            builder.push(" job_type = ");
            builder.push_bind(job_type.to_string());
        }
        builder.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        builder.push_bind(i64::try_from(self.limit).unwrap_or(i64::MAX));
        builder
    }
}
