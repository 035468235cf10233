use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::job::{query::ListQuery, Job, JobStatus};

pub(super) trait Queryable {
    fn matches(&self, job: &Job) -> bool;
}

impl Queryable for ListQuery {
    fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |status| job.status == status)
            && self.job_type.map_or(true, |job_type| job.job_type == job_type)
    }
}

/// Selects the jobs the dispatcher may claim at a given instant.
pub(super) struct Eligible(pub(super) DateTime<Utc>);

impl Queryable for Eligible {
    fn matches(&self, job: &Job) -> bool {
        job.status == JobStatus::Pending
            && job.scheduled_at <= self.0
            && job.attempts < job.max_attempts
    }
}

/// Priority descending, then creation ascending, then id ascending.
pub(super) fn dispatch_order(a: &Job, b: &Job) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

/// Creation descending, then id descending.
pub(super) fn listing_order(a: &Job, b: &Job) -> Ordering {
    b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id))
}
