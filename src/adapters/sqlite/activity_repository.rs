//! SQLite implementation of the ActivityRepository.

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{format_timestamp, parse_datetime, parse_optional_uuid, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ActivityCategory, ActivityFilter, ActivityRecord, Outcome, Pagination};
use crate::domain::ports::ActivityRepository;

#[derive(Clone)]
pub struct SqliteActivityRepository {
    pool: SqlitePool,
}

impl SqliteActivityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn where_clause(filter: &ActivityFilter) -> (String, Vec<String>) {
    let mut clause = String::from(" WHERE 1=1");
    let mut bindings = Vec::new();

    if let Some(actor_id) = &filter.actor_id {
        clause.push_str(" AND actor_id = ?");
        bindings.push(actor_id.clone());
    }
    if let Some(category) = filter.category {
        clause.push_str(" AND category = ?");
        bindings.push(category.as_str().to_string());
    }
    if let Some(task_id) = filter.related_task {
        clause.push_str(" AND related_task = ?");
        bindings.push(task_id.to_string());
    }
    if let Some(outcome) = filter.outcome {
        clause.push_str(" AND outcome = ?");
        bindings.push(outcome.as_str().to_string());
    }
    if let Some(since) = filter.since {
        clause.push_str(" AND timestamp >= ?");
        bindings.push(format_timestamp(since));
    }
    if let Some(until) = filter.until {
        clause.push_str(" AND timestamp < ?");
        bindings.push(format_timestamp(until));
    }
    (clause, bindings)
}

/// Append on an open connection or transaction.
pub(super) async fn append_record(conn: &mut SqliteConnection, record: &ActivityRecord) -> DomainResult<()> {
    let input_json = serde_json::to_string(&record.input)?;
    let output_json = serde_json::to_string(&record.output)?;

    sqlx::query(
        r"INSERT INTO activity_records (id, actor_id, timestamp, category, description, reasoning,
          input, output, duration_ms, outcome, related_task, corrects)
          VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
          ON CONFLICT(id) DO NOTHING",
    )
    .bind(record.id.to_string())
    .bind(&record.actor_id)
    .bind(format_timestamp(record.timestamp))
    .bind(record.category.as_str())
    .bind(&record.description)
    .bind(&record.reasoning)
    .bind(&input_json)
    .bind(&output_json)
    .bind(record.duration_ms.map(|ms| i64::try_from(ms).unwrap_or(i64::MAX)))
    .bind(record.outcome.as_str())
    .bind(record.related_task.map(|id| id.to_string()))
    .bind(record.corrects.map(|id| id.to_string()))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl ActivityRepository for SqliteActivityRepository {
    async fn append(&self, record: &ActivityRecord) -> DomainResult<()> {
        let mut conn = self.pool.acquire().await?;
        append_record(&mut conn, record).await
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<ActivityRecord>> {
        let row: Option<ActivityRow> = sqlx::query_as("SELECT * FROM activity_records WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(ActivityRecord::try_from).transpose()
    }

    async fn query(&self, filter: &ActivityFilter, page: Pagination) -> DomainResult<Vec<ActivityRecord>> {
        let (clause, bindings) = where_clause(filter);
        let query = format!(
            "SELECT * FROM activity_records{clause} ORDER BY timestamp DESC, rowid DESC LIMIT {} OFFSET {}",
            page.limit, page.offset
        );

        let mut q = sqlx::query_as::<_, ActivityRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(ActivityRecord::try_from).collect()
    }

    async fn count(&self, filter: &ActivityFilter) -> DomainResult<u64> {
        let (clause, bindings) = where_clause(filter);
        let query = format!("SELECT COUNT(*) FROM activity_records{clause}");

        let mut q = sqlx::query_as::<_, (i64,)>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }
        let (count,) = q.fetch_one(&self.pool).await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[derive(sqlx::FromRow)]
struct ActivityRow {
    id: String,
    actor_id: String,
    timestamp: String,
    category: String,
    description: String,
    reasoning: Option<String>,
    input: Option<String>,
    output: Option<String>,
    duration_ms: Option<i64>,
    outcome: String,
    related_task: Option<String>,
    corrects: Option<String>,
}

impl TryFrom<ActivityRow> for ActivityRecord {
    type Error = DomainError;

    fn try_from(row: ActivityRow) -> Result<Self, Self::Error> {
        let category = ActivityCategory::from_str(&row.category).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid activity category: {}", row.category))
        })?;
        let outcome = Outcome::from_str(&row.outcome).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid outcome: {}", row.outcome))
        })?;
        let parse_value = |s: Option<String>| -> DomainResult<serde_json::Value> {
            Ok(s.map(|s| serde_json::from_str::<serde_json::Value>(&s)).transpose()?.unwrap_or_default())
        };

        Ok(ActivityRecord {
            id: parse_uuid(&row.id)?,
            actor_id: row.actor_id,
            timestamp: parse_datetime(&row.timestamp)?,
            category,
            description: row.description,
            reasoning: row.reasoning,
            input: parse_value(row.input)?,
            output: parse_value(row.output)?,
            duration_ms: row.duration_ms.and_then(|ms| u64::try_from(ms).ok()),
            outcome,
            related_task: parse_optional_uuid(row.related_task)?,
            corrects: parse_optional_uuid(row.corrects)?,
        })
    }
}
