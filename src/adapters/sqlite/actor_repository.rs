//! SQLite implementation of the ActorRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::{format_timestamp, parse_datetime, parse_json_or_default, parse_optional_datetime};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Actor, CapabilitySet};
use crate::domain::ports::{ActorFilter, ActorRepository};

#[derive(Clone)]
pub struct SqliteActorRepository {
    pool: SqlitePool,
}

impl SqliteActorRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActorRepository for SqliteActorRepository {
    async fn insert(&self, actor: &Actor) -> DomainResult<()> {
        let capabilities = serde_json::to_string(&actor.capabilities)?;

        sqlx::query(
            r"INSERT INTO actors (id, role, capabilities, active, created_at, updated_at, deactivated_at)
              VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&actor.id)
        .bind(&actor.role)
        .bind(&capabilities)
        .bind(actor.active)
        .bind(format_timestamp(actor.created_at))
        .bind(format_timestamp(actor.updated_at))
        .bind(actor.deactivated_at.map(format_timestamp))
        .execute(&self.pool)
        .await
        .map_err(|e| match DomainError::from(e) {
            DomainError::Duplicate { .. } => DomainError::Duplicate {
                entity: "actor".to_string(),
                id: actor.id.clone(),
            },
            other => other,
        })?;

        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<Actor>> {
        let row: Option<ActorRow> = sqlx::query_as("SELECT * FROM actors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Actor::try_from).transpose()
    }

    async fn update(&self, actor: &Actor) -> DomainResult<()> {
        let capabilities = serde_json::to_string(&actor.capabilities)?;

        let result = sqlx::query(
            r"UPDATE actors SET role = ?, capabilities = ?, active = ?, updated_at = ?, deactivated_at = ?
              WHERE id = ?",
        )
        .bind(&actor.role)
        .bind(&capabilities)
        .bind(actor.active)
        .bind(format_timestamp(actor.updated_at))
        .bind(actor.deactivated_at.map(format_timestamp))
        .bind(&actor.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::ActorNotFound(actor.id.clone()));
        }
        Ok(())
    }

    async fn list(&self, filter: ActorFilter) -> DomainResult<Vec<Actor>> {
        let mut query = String::from("SELECT * FROM actors WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if filter.active_only {
            query.push_str(" AND active = 1");
        }
        if let Some(role) = &filter.role {
            query.push_str(" AND role = ?");
            bindings.push(role.clone());
        }
        query.push_str(" ORDER BY id");

        let mut q = sqlx::query_as::<_, ActorRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }

        let rows: Vec<ActorRow> = q.fetch_all(&self.pool).await?;
        let actors = rows
            .into_iter()
            .map(Actor::try_from)
            .collect::<DomainResult<Vec<_>>>()?;

        Ok(match &filter.capability {
            Some(capability) => actors
                .into_iter()
                .filter(|a| a.capabilities.contains(capability))
                .collect(),
            None => actors,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ActorRow {
    id: String,
    role: String,
    capabilities: Option<String>,
    active: bool,
    created_at: String,
    updated_at: String,
    deactivated_at: Option<String>,
}

impl TryFrom<ActorRow> for Actor {
    type Error = DomainError;

    fn try_from(row: ActorRow) -> Result<Self, Self::Error> {
        let capabilities: CapabilitySet = parse_json_or_default(row.capabilities)?;

        Ok(Actor {
            id: row.id,
            role: row.role,
            capabilities,
            active: row.active,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            deactivated_at: parse_optional_datetime(row.deactivated_at)?,
        })
    }
}
