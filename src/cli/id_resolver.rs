//! Short ID prefix resolution for CLI commands.
//!
//! Any unique prefix of a UUID is accepted, similar to git short hashes.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

const TASK_QUERY: &str = "SELECT id FROM tasks WHERE id LIKE ? LIMIT 10";
const SPRINT_QUERY: &str = "SELECT id FROM sprints WHERE id LIKE ? LIMIT 10";
const MESSAGE_QUERY: &str = "SELECT id FROM messages WHERE id LIKE ? LIMIT 10";

pub async fn resolve_task_id(pool: &SqlitePool, prefix: &str) -> Result<Uuid> {
    resolve_prefix(pool, prefix, "task", TASK_QUERY).await
}

pub async fn resolve_sprint_id(pool: &SqlitePool, prefix: &str) -> Result<Uuid> {
    resolve_prefix(pool, prefix, "sprint", SPRINT_QUERY).await
}

pub async fn resolve_message_id(pool: &SqlitePool, prefix: &str) -> Result<Uuid> {
    resolve_prefix(pool, prefix, "message", MESSAGE_QUERY).await
}

fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        bail!("ID prefix must not be empty");
    }
    if !prefix.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        bail!("Invalid ID prefix '{prefix}': must contain only hex characters and dashes");
    }
    Ok(())
}

async fn resolve_prefix(pool: &SqlitePool, prefix: &str, entity: &str, query: &str) -> Result<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(prefix) {
        return Ok(uuid);
    }
    validate_prefix(prefix)?;

    let pattern = format!("{}%", prefix.to_lowercase());
    let rows: Vec<(String,)> = sqlx::query_as(query).bind(&pattern).fetch_all(pool).await?;

    match rows.as_slice() {
        [] => bail!("No {entity} found matching '{prefix}'"),
        [(id,)] => Ok(Uuid::parse_str(id)?),
        _ => {
            let mut msg = format!("Ambiguous prefix '{prefix}': matches {} {entity}s:", rows.len());
            for (id,) in &rows {
                msg.push_str("\n  ");
                msg.push_str(id);
            }
            bail!("{msg}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    #[test]
    fn test_validate_prefix() {
        assert!(validate_prefix("").is_err());
        assert!(validate_prefix("xyz").is_err());
        assert!(validate_prefix("ab12-").is_ok());
    }

    #[tokio::test]
    async fn test_full_uuid_short_circuits() {
        let pool = create_migrated_test_pool().await.unwrap();
        let id = Uuid::new_v4();
        assert_eq!(resolve_task_id(&pool, &id.to_string()).await.unwrap(), id);
    }

    #[tokio::test]
    async fn test_unknown_prefix_errors() {
        let pool = create_migrated_test_pool().await.unwrap();
        let err = resolve_task_id(&pool, "abc").await.unwrap_err();
        assert!(err.to_string().contains("No task found"));
    }
}
