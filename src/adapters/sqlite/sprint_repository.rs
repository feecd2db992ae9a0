//! SQLite implementation of the SprintRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_timestamp, parse_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Sprint, SprintStatus};
use crate::domain::ports::SprintRepository;

#[derive(Clone)]
pub struct SqliteSprintRepository {
    pool: SqlitePool,
}

impl SqliteSprintRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SprintRepository for SqliteSprintRepository {
    async fn insert(&self, sprint: &Sprint) -> DomainResult<()> {
        sqlx::query(
            r"INSERT INTO sprints (id, goal, owner, status, starts_at, ends_at, created_at, updated_at)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(sprint.id.to_string())
        .bind(&sprint.goal)
        .bind(&sprint.owner)
        .bind(sprint.status.as_str())
        .bind(format_timestamp(sprint.starts_at))
        .bind(format_timestamp(sprint.ends_at))
        .bind(format_timestamp(sprint.created_at))
        .bind(format_timestamp(sprint.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Sprint>> {
        let row: Option<SprintRow> = sqlx::query_as("SELECT * FROM sprints WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Sprint::try_from).transpose()
    }

    async fn transition(&self, id: Uuid, from: SprintStatus, to: SprintStatus) -> DomainResult<bool> {
        let result = sqlx::query("UPDATE sprints SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(format_timestamp(Utc::now()))
            .bind(id.to_string())
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list(&self, status: Option<SprintStatus>) -> DomainResult<Vec<Sprint>> {
        let rows: Vec<SprintRow> = match status {
            Some(status) => {
                sqlx::query_as("SELECT * FROM sprints WHERE status = ? ORDER BY starts_at DESC")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM sprints ORDER BY starts_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(Sprint::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct SprintRow {
    id: String,
    goal: String,
    owner: String,
    status: String,
    starts_at: String,
    ends_at: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SprintRow> for Sprint {
    type Error = DomainError;

    fn try_from(row: SprintRow) -> Result<Self, Self::Error> {
        let status = SprintStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid sprint status: {}", row.status))
        })?;

        Ok(Sprint {
            id: parse_uuid(&row.id)?,
            goal: row.goal,
            owner: row.owner,
            status,
            starts_at: parse_datetime(&row.starts_at)?,
            ends_at: parse_datetime(&row.ends_at)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}
