//! SQLite implementation of the TaskRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use super::activity_repository::append_record;
use super::message_repository::insert_message;
use super::{
    format_timestamp, parse_datetime, parse_json_or_default, parse_optional_datetime,
    parse_optional_uuid, parse_uuid,
};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ArtifactRef, CapabilitySet, Message, Metadata, Task, TaskStatus};
use crate::domain::ports::{TaskFilter, TaskOutbox, TaskRepository};

#[derive(Clone)]
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn insert(&self, task: &Task) -> DomainResult<()> {
        self.insert_batch(std::slice::from_ref(task)).await
    }

    async fn insert_batch(&self, tasks: &[Task]) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;
        for task in tasks {
            insert_row(&mut tx, task).await?;
        }
        // Edges after rows so batch members may reference each other.
        for task in tasks {
            write_dependencies(&mut tx, task).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let mut task: Task = r.try_into()?;
                self.load_dependencies(&mut task).await?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    async fn get_many(&self, ids: &[Uuid]) -> DomainResult<Vec<Task>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let query = format!("SELECT * FROM tasks WHERE id IN ({placeholders})");
        let mut q = sqlx::query_as::<_, TaskRow>(&query);
        for id in ids {
            q = q.bind(id.to_string());
        }
        let rows = q.fetch_all(&self.pool).await?;
        self.hydrate(rows).await
    }

    async fn get_by_idempotency_key(&self, key: &str) -> DomainResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let mut task: Task = r.try_into()?;
                self.load_dependencies(&mut task).await?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>> {
        let mut query = String::from("SELECT * FROM tasks WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(status) = &filter.status {
            query.push_str(" AND status = ?");
            bindings.push(status.as_str().to_string());
        }
        if let Some(sprint_id) = &filter.sprint_id {
            query.push_str(" AND sprint_id = ?");
            bindings.push(sprint_id.to_string());
        }
        if let Some(assignee) = &filter.assignee {
            query.push_str(" AND assignee = ?");
            bindings.push(assignee.clone());
        }
        if let Some(quarantined) = filter.quarantined {
            query.push_str(if quarantined {
                " AND quarantined = 1"
            } else {
                " AND quarantined = 0"
            });
        }

        query.push_str(" ORDER BY priority DESC, created_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        let mut q = sqlx::query_as::<_, TaskRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }

        let rows: Vec<TaskRow> = q.fetch_all(&self.pool).await?;
        self.hydrate(rows).await
    }

    async fn commit_transition(
        &self,
        expected: &Task,
        updated: &Task,
        outbox: &TaskOutbox,
    ) -> DomainResult<Option<Vec<Message>>> {
        if expected.id != updated.id {
            return Err(DomainError::ValidationFailed(format!(
                "compare_and_swap across different tasks: {} vs {}",
                expected.id, updated.id
            )));
        }

        let artifacts_json = serde_json::to_string(&updated.artifacts)?;
        let capabilities_json = serde_json::to_string(&updated.required_capabilities)?;
        let metadata_json = serde_json::to_string(&updated.metadata)?;

        let mut tx = self.pool.begin().await?;

        // Version, status and assignee together form the guard; `IS` so a
        // NULL assignee compares equal to NULL.
        let result = sqlx::query(
            r"UPDATE tasks SET title = ?, description = ?, priority = ?, status = ?,
              estimated_effort = ?, actual_effort = ?, assignee = ?, sprint_id = ?,
              artifacts = ?, required_capabilities = ?, metadata = ?, quarantined = ?,
              version = ?, updated_at = ?, status_changed_at = ?, started_at = ?, completed_at = ?
              WHERE id = ? AND version = ? AND status = ? AND assignee IS ?",
        )
        .bind(&updated.title)
        .bind(&updated.description)
        .bind(i64::from(updated.priority))
        .bind(updated.status.as_str())
        .bind(i64::from(updated.estimated_effort))
        .bind(updated.actual_effort.map(i64::from))
        .bind(&updated.assignee)
        .bind(updated.sprint_id.map(|id| id.to_string()))
        .bind(&artifacts_json)
        .bind(&capabilities_json)
        .bind(&metadata_json)
        .bind(updated.quarantined)
        .bind(i64::try_from(updated.version).unwrap_or(i64::MAX))
        .bind(format_timestamp(updated.updated_at))
        .bind(format_timestamp(updated.status_changed_at))
        .bind(updated.started_at.map(format_timestamp))
        .bind(updated.completed_at.map(format_timestamp))
        .bind(expected.id.to_string())
        .bind(i64::try_from(expected.version).unwrap_or(i64::MAX))
        .bind(expected.status.as_str())
        .bind(&expected.assignee)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        if expected.depends_on != updated.depends_on {
            sqlx::query("DELETE FROM task_dependencies WHERE task_id = ?")
                .bind(updated.id.to_string())
                .execute(&mut *tx)
                .await?;
            write_dependencies(&mut tx, updated).await?;
        }

        for record in &outbox.records {
            append_record(&mut tx, record).await?;
        }
        let mut stored = Vec::with_capacity(outbox.messages.len());
        for message in &outbox.messages {
            stored.push(insert_message(&mut tx, message).await?);
        }

        tx.commit().await?;
        Ok(Some(stored))
    }

    async fn set_quarantined(&self, id: Uuid, quarantined: bool) -> DomainResult<()> {
        let result = sqlx::query("UPDATE tasks SET quarantined = ?, updated_at = ? WHERE id = ?")
            .bind(quarantined)
            .bind(format_timestamp(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::TaskNotFound(id));
        }
        Ok(())
    }

    async fn get_dependents(&self, task_id: Uuid) -> DomainResult<Vec<Uuid>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT task_id FROM task_dependencies WHERE depends_on_id = ?")
                .bind(task_id.to_string())
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(|(id,)| parse_uuid(id)).collect()
    }

    async fn dependency_edges(&self) -> DomainResult<Vec<(Uuid, Uuid)>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT task_id, depends_on_id FROM task_dependencies")
                .fetch_all(&self.pool)
                .await?;

        rows.iter()
            .map(|(task, dep)| Ok((parse_uuid(task)?, parse_uuid(dep)?)))
            .collect()
    }

    async fn list_stalled(&self, before: DateTime<Utc>) -> DomainResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            r"SELECT * FROM tasks
              WHERE status IN ('assigned', 'in_progress')
                AND quarantined = 0
                AND status_changed_at < ?
              ORDER BY status_changed_at ASC",
        )
        .bind(format_timestamp(before))
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }
}

impl SqliteTaskRepository {
    async fn load_dependencies(&self, task: &mut Task) -> DomainResult<()> {
        let deps: Vec<(String,)> = sqlx::query_as(
            "SELECT depends_on_id FROM task_dependencies WHERE task_id = ? ORDER BY rowid",
        )
        .bind(task.id.to_string())
        .fetch_all(&self.pool)
        .await?;

        task.depends_on = deps
            .iter()
            .map(|(id,)| parse_uuid(id))
            .collect::<DomainResult<_>>()?;
        Ok(())
    }

    /// Convert rows and attach dependencies with one edge query.
    async fn hydrate(&self, rows: Vec<TaskRow>) -> DomainResult<Vec<Task>> {
        let mut tasks = rows
            .into_iter()
            .map(Task::try_from)
            .collect::<DomainResult<Vec<_>>>()?;
        if tasks.is_empty() {
            return Ok(tasks);
        }

        let placeholders = vec!["?"; tasks.len()].join(", ");
        let query = format!(
            "SELECT task_id, depends_on_id FROM task_dependencies WHERE task_id IN ({placeholders}) ORDER BY rowid"
        );
        let mut q = sqlx::query_as::<_, (String, String)>(&query);
        for task in &tasks {
            q = q.bind(task.id.to_string());
        }
        let edges = q.fetch_all(&self.pool).await?;

        let mut by_task: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (task_id, dep_id) in &edges {
            by_task
                .entry(parse_uuid(task_id)?)
                .or_default()
                .push(parse_uuid(dep_id)?);
        }
        for task in &mut tasks {
            task.depends_on = by_task.remove(&task.id).unwrap_or_default();
        }
        Ok(tasks)
    }
}

async fn insert_row(tx: &mut Transaction<'_, Sqlite>, task: &Task) -> DomainResult<()> {
    let artifacts_json = serde_json::to_string(&task.artifacts)?;
    let capabilities_json = serde_json::to_string(&task.required_capabilities)?;
    let metadata_json = serde_json::to_string(&task.metadata)?;

    sqlx::query(
        r"INSERT INTO tasks (id, title, description, priority, status, estimated_effort,
          actual_effort, created_by, assignee, sprint_id, artifacts, required_capabilities,
          metadata, quarantined, version, idempotency_key, created_at, updated_at,
          status_changed_at, started_at, completed_at)
          VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(task.id.to_string())
    .bind(&task.title)
    .bind(&task.description)
    .bind(i64::from(task.priority))
    .bind(task.status.as_str())
    .bind(i64::from(task.estimated_effort))
    .bind(task.actual_effort.map(i64::from))
    .bind(&task.created_by)
    .bind(&task.assignee)
    .bind(task.sprint_id.map(|id| id.to_string()))
    .bind(&artifacts_json)
    .bind(&capabilities_json)
    .bind(&metadata_json)
    .bind(task.quarantined)
    .bind(i64::try_from(task.version).unwrap_or(i64::MAX))
    .bind(&task.idempotency_key)
    .bind(format_timestamp(task.created_at))
    .bind(format_timestamp(task.updated_at))
    .bind(format_timestamp(task.status_changed_at))
    .bind(task.started_at.map(format_timestamp))
    .bind(task.completed_at.map(format_timestamp))
    .execute(&mut **tx)
    .await
    .map_err(|e| match DomainError::from(e) {
        DomainError::Duplicate { .. } => DomainError::Duplicate {
            entity: "task".to_string(),
            id: task.id.to_string(),
        },
        other => other,
    })?;
    Ok(())
}

async fn write_dependencies(tx: &mut Transaction<'_, Sqlite>, task: &Task) -> DomainResult<()> {
    for dep_id in &task.depends_on {
        sqlx::query("INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_id) VALUES (?, ?)")
            .bind(task.id.to_string())
            .bind(dep_id.to_string())
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    title: String,
    description: Option<String>,
    priority: i64,
    status: String,
    estimated_effort: i64,
    actual_effort: Option<i64>,
    created_by: String,
    assignee: Option<String>,
    sprint_id: Option<String>,
    artifacts: Option<String>,
    required_capabilities: Option<String>,
    metadata: Option<String>,
    quarantined: bool,
    version: i64,
    idempotency_key: Option<String>,
    created_at: String,
    updated_at: String,
    status_changed_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl TryFrom<TaskRow> for Task {
    type Error = DomainError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid status: {}", row.status))
        })?;
        let priority = u8::try_from(row.priority).map_err(|_| {
            DomainError::SerializationError(format!("Invalid priority: {}", row.priority))
        })?;
        let estimated_effort = u32::try_from(row.estimated_effort).map_err(|_| {
            DomainError::SerializationError(format!("Invalid effort: {}", row.estimated_effort))
        })?;
        let actual_effort = row
            .actual_effort
            .map(u32::try_from)
            .transpose()
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;
        let version = u64::try_from(row.version)
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;

        let artifacts: Vec<ArtifactRef> = parse_json_or_default(row.artifacts)?;
        let required_capabilities: CapabilitySet =
            parse_json_or_default(row.required_capabilities)?;
        let metadata: Metadata = parse_json_or_default(row.metadata)?;

        Ok(Task {
            id: parse_uuid(&row.id)?,
            title: row.title,
            description: row.description.unwrap_or_default(),
            priority,
            status,
            estimated_effort,
            actual_effort,
            created_by: row.created_by,
            assignee: row.assignee,
            depends_on: Vec::new(),
            sprint_id: parse_optional_uuid(row.sprint_id)?,
            artifacts,
            required_capabilities,
            metadata,
            quarantined: row.quarantined,
            version,
            idempotency_key: row.idempotency_key,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            status_changed_at: parse_datetime(&row.status_changed_at)?,
            started_at: parse_optional_datetime(row.started_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteActivityRepository, SqliteActorRepository, SqliteMessageRepository,
    };
    use crate::domain::models::{ActivityCategory, ActivityRecord, Actor, MessageIntent};
    use crate::domain::ports::{ActivityRepository, ActorRepository, MessageRepository};

    async fn setup() -> SqliteTaskRepository {
        let pool = create_migrated_test_pool().await.unwrap();
        let actors = SqliteActorRepository::new(pool.clone());
        for id in ["a1", "a2"] {
            actors.insert(&Actor::new(id, "developer")).await.unwrap();
        }
        SqliteTaskRepository::new(pool)
    }

    #[tokio::test]
    async fn test_insert_and_get_with_dependencies() {
        let repo = setup().await;
        let dep = Task::new("Schema", "planner");
        let task = Task::new("API", "planner")
            .with_dependency(dep.id)
            .with_priority(7)
            .with_effort(3);
        repo.insert_batch(&[task.clone(), dep.clone()]).await.unwrap();

        let loaded = repo.get(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "API");
        assert_eq!(loaded.priority, 7);
        assert_eq!(loaded.estimated_effort, 3);
        assert_eq!(loaded.depends_on, vec![dep.id]);
        assert_eq!(loaded.status, TaskStatus::Backlog);
        assert_eq!(repo.get_dependents(dep.id).await.unwrap(), vec![task.id]);
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let repo = setup().await;
        let ok = Task::new("Fine", "planner");
        let dangling = Task::new("Broken", "planner").with_dependency(Uuid::new_v4());

        assert!(repo.insert_batch(&[ok.clone(), dangling]).await.is_err());
        assert!(repo.get(ok.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_compare_and_swap_single_winner() {
        let repo = setup().await;
        let task = Task::new("Contended", "planner");
        repo.insert(&task).await.unwrap();

        let mut first = task.clone();
        first.assignee = Some("a1".to_string());
        first.transition_to(TaskStatus::Assigned).unwrap();

        let mut second = task.clone();
        second.assignee = Some("a2".to_string());
        second.transition_to(TaskStatus::Assigned).unwrap();

        assert!(repo.compare_and_swap(&task, &first).await.unwrap());
        assert!(!repo.compare_and_swap(&task, &second).await.unwrap());

        let stored = repo.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.assignee.as_deref(), Some("a1"));
        assert_eq!(stored.status, TaskStatus::Assigned);
        assert_eq!(stored.version, 2);
    }

    fn assignment_outbox(task: &Task) -> TaskOutbox {
        let mut outbox = TaskOutbox::default();
        outbox.record(ActivityRecord::new("a1", ActivityCategory::TaskAssigned, "assigned").with_task(task.id));
        outbox.message(
            Message::new("a2", "a1", MessageIntent::TaskAssigned, "yours")
                .with_task(task.id)
                .with_idempotency_key(format!("assigned:{}", task.id)),
        );
        outbox
    }

    #[tokio::test]
    async fn test_commit_transition_writes_outbox_with_task() {
        let repo = setup().await;
        let task = Task::new("Outbox", "planner");
        repo.insert(&task).await.unwrap();

        let mut assigned = task.clone();
        assigned.assignee = Some("a1".to_string());
        assigned.transition_to(TaskStatus::Assigned).unwrap();
        let outbox = assignment_outbox(&task);

        let stored = repo.commit_transition(&task, &assigned, &outbox).await.unwrap().unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].seq > 0);

        let messages = SqliteMessageRepository::new(repo.pool.clone());
        assert!(messages.get(outbox.messages[0].id).await.unwrap().is_some());
        let activity = SqliteActivityRepository::new(repo.pool.clone());
        assert!(activity.get(outbox.records[0].id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lost_guard_writes_nothing_from_outbox() {
        let repo = setup().await;
        let task = Task::new("Outbox", "planner");
        repo.insert(&task).await.unwrap();

        let mut first = task.clone();
        first.assignee = Some("a2".to_string());
        first.transition_to(TaskStatus::Assigned).unwrap();
        assert!(repo.compare_and_swap(&task, &first).await.unwrap());

        let mut second = task.clone();
        second.assignee = Some("a1".to_string());
        second.transition_to(TaskStatus::Assigned).unwrap();
        let outbox = assignment_outbox(&task);
        assert!(repo.commit_transition(&task, &second, &outbox).await.unwrap().is_none());

        let messages = SqliteMessageRepository::new(repo.pool.clone());
        assert!(messages.get(outbox.messages[0].id).await.unwrap().is_none());
        let activity = SqliteActivityRepository::new(repo.pool.clone());
        assert!(activity.get(outbox.records[0].id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_outbox_rolls_back_task_update() {
        let repo = setup().await;
        let task = Task::new("Outbox", "planner");
        repo.insert(&task).await.unwrap();

        let mut assigned = task.clone();
        assigned.assignee = Some("a1".to_string());
        assigned.transition_to(TaskStatus::Assigned).unwrap();
        let mut outbox = TaskOutbox::default();
        outbox.message(Message::new("a2", "nobody", MessageIntent::TaskAssigned, "lost"));

        assert!(repo.commit_transition(&task, &assigned, &outbox).await.is_err());
        let stored = repo.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Backlog);
        assert_eq!(stored.version, task.version);
        assert!(stored.assignee.is_none());
    }

    #[tokio::test]
    async fn test_compare_and_swap_rewrites_dependencies() {
        let repo = setup().await;
        let a = Task::new("A", "planner");
        let b = Task::new("B", "planner");
        repo.insert_batch(&[a.clone(), b.clone()]).await.unwrap();

        let mut updated = b.clone();
        updated.depends_on.push(a.id);
        updated.version += 1;
        assert!(repo.compare_and_swap(&b, &updated).await.unwrap());

        assert_eq!(repo.get(b.id).await.unwrap().unwrap().depends_on, vec![a.id]);
        assert_eq!(repo.dependency_edges().await.unwrap(), vec![(b.id, a.id)]);
    }

    #[tokio::test]
    async fn test_list_filters_and_order() {
        let repo = setup().await;
        let low = Task::new("Low", "planner").with_priority(1);
        let high = Task::new("High", "planner").with_priority(9);
        repo.insert_batch(&[low.clone(), high.clone()]).await.unwrap();

        let mut assigned = high.clone();
        assigned.assignee = Some("a1".to_string());
        assigned.transition_to(TaskStatus::Assigned).unwrap();
        assert!(repo.compare_and_swap(&high, &assigned).await.unwrap());

        let all = repo.list(TaskFilter::default()).await.unwrap();
        assert_eq!(all[0].id, high.id);
        assert_eq!(all[1].id, low.id);

        let mine = repo
            .list(TaskFilter::default().with_assignee("a1"))
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);

        let backlog = repo
            .list(TaskFilter::default().with_status(TaskStatus::Backlog))
            .await
            .unwrap();
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].id, low.id);
    }

    #[tokio::test]
    async fn test_list_stalled_skips_quarantined() {
        let repo = setup().await;
        let task = Task::new("Stale", "planner");
        repo.insert(&task).await.unwrap();

        let mut assigned = task.clone();
        assigned.assignee = Some("a1".to_string());
        assigned.transition_to(TaskStatus::Assigned).unwrap();
        assigned.status_changed_at = Utc::now() - chrono::Duration::hours(3);
        assert!(repo.compare_and_swap(&task, &assigned).await.unwrap());

        let cutoff = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(repo.list_stalled(cutoff).await.unwrap().len(), 1);

        repo.set_quarantined(task.id, true).await.unwrap();
        assert!(repo.list_stalled(cutoff).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_idempotency_key_lookup() {
        let repo = setup().await;
        let mut task = Task::new("Keyed", "planner");
        task.idempotency_key = Some("import-42".to_string());
        repo.insert(&task).await.unwrap();

        let found = repo.get_by_idempotency_key("import-42").await.unwrap();
        assert_eq!(found.map(|t| t.id), Some(task.id));
        assert!(repo.get_by_idempotency_key("other").await.unwrap().is_none());
    }
}
