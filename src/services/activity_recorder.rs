//! Append-only audit log service.
//!
//! A failed write propagates to the caller; losing audit data is a
//! correctness failure, not a warning.

use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::retry::RetryPolicy;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ActivityCategory, ActivityFilter, ActivityRecord, Pagination};
use crate::domain::ports::ActivityRepository;

/// One page of query results plus the total count for the filter.
#[derive(Debug, Clone)]
pub struct ActivityPage {
    pub records: Vec<ActivityRecord>,
    pub total: u64,
    pub page: Pagination,
}

#[derive(Clone)]
pub struct ActivityRecorder {
    repository: Arc<dyn ActivityRepository>,
    retry: RetryPolicy,
}

impl ActivityRecorder {
    pub fn new(repository: Arc<dyn ActivityRepository>, retry: RetryPolicy) -> Self {
        Self { repository, retry }
    }

    /// Append one record.
    #[instrument(skip(self, record), fields(record_id = %record.id, category = record.category.as_str()))]
    pub async fn record(&self, record: ActivityRecord) -> DomainResult<ActivityRecord> {
        record.validate().map_err(DomainError::ValidationFailed)?;
        self.retry
            .execute("activity.record", || self.repository.append(&record))
            .await?;
        debug!(actor = %record.actor_id, "Activity recorded");
        Ok(record)
    }

    /// Append a correction that references `original`. The original row is
    /// never touched.
    pub async fn correct(
        &self,
        original: Uuid,
        actor_id: &str,
        description: impl Into<String>,
    ) -> DomainResult<ActivityRecord> {
        let target = self
            .get(original)
            .await?
            .ok_or(DomainError::ActivityNotFound(original))?;

        let mut correction = ActivityRecord::new(actor_id, ActivityCategory::Correction, description);
        correction.corrects = Some(target.id);
        correction.related_task = target.related_task;
        self.record(correction).await
    }

    pub async fn get(&self, id: Uuid) -> DomainResult<Option<ActivityRecord>> {
        self.retry
            .execute("activity.get", || self.repository.get(id))
            .await
    }

    /// Records matching `filter`, newest first.
    pub async fn query(&self, filter: &ActivityFilter, page: Pagination) -> DomainResult<ActivityPage> {
        let records = self
            .retry
            .execute("activity.query", || self.repository.query(filter, page))
            .await?;
        let total = self
            .retry
            .execute("activity.count", || self.repository.count(filter))
            .await?;
        Ok(ActivityPage {
            records,
            total,
            page,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteActivityRepository};
    use crate::domain::errors::ErrorKind;

    async fn recorder() -> ActivityRecorder {
        let pool = create_migrated_test_pool().await.unwrap();
        ActivityRecorder::new(
            Arc::new(SqliteActivityRepository::new(pool)),
            RetryPolicy::no_retry(),
        )
    }

    #[tokio::test]
    async fn test_record_and_query() {
        let recorder = recorder().await;
        let task = Uuid::new_v4();
        recorder
            .record(ActivityRecord::new("a1", ActivityCategory::WorkStarted, "start").with_task(task))
            .await
            .unwrap();
        recorder
            .record(ActivityRecord::new("a1", ActivityCategory::WorkFinished, "finish").with_task(task))
            .await
            .unwrap();

        let page = recorder
            .query(&ActivityFilter::for_task(task), Pagination::new(1, 0))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.records.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_record_is_rejected() {
        let recorder = recorder().await;
        let err = recorder
            .record(ActivityRecord::new("a1", ActivityCategory::Decision, "  "))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_correction_references_original() {
        let recorder = recorder().await;
        let original = recorder
            .record(ActivityRecord::new("a1", ActivityCategory::Decision, "picked option A"))
            .await
            .unwrap();
        let correction = recorder
            .correct(original.id, "a1", "option A was mislabeled; it was option B")
            .await
            .unwrap();
        assert_eq!(correction.corrects, Some(original.id));

        let stored = recorder.get(original.id).await.unwrap().unwrap();
        assert_eq!(stored.description, "picked option A");

        let err = recorder.correct(Uuid::new_v4(), "a1", "nothing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
