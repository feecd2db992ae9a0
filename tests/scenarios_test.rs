//! End-to-end coordination scenarios over the assembled services.

mod common;

use foreman::domain::models::{
    ActivityCategory, ActivityFilter, MemoryEntity, MemoryFilter, Message, MessageFilter,
    MessageIntent, Pagination, TaskSpec, TaskStatus,
};
use foreman::domain::{DomainError, ErrorKind};

#[tokio::test]
async fn test_task_lifecycle_from_backlog_to_done() {
    let foreman = common::foreman().await;
    common::register(&foreman, "planner", "planner", &[]).await;
    common::register(&foreman, "a1", "implementer", &[]).await;
    let orchestrator = &foreman.orchestrator;

    let t1 = orchestrator
        .create_task(TaskSpec::new("T1", "planner").with_priority(1))
        .await
        .unwrap();
    assert_eq!(t1.status, TaskStatus::Backlog);
    assert!(t1.assignee.is_none());

    let assigned = orchestrator.assign_task(t1.id, "a1").await.unwrap();
    assert_eq!(assigned.status, TaskStatus::Assigned);
    assert_eq!(assigned.assignee.as_deref(), Some("a1"));

    let assignments = foreman
        .messages
        .receive("a1", &MessageFilter::default().with_intent(MessageIntent::TaskAssigned))
        .await
        .unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].related_task, Some(t1.id));

    orchestrator
        .update_status(t1.id, TaskStatus::InProgress, "a1")
        .await
        .unwrap();
    let done = orchestrator
        .update_status(t1.id, TaskStatus::Done, "a1")
        .await
        .unwrap();
    assert_eq!(done.status, TaskStatus::Done);
    assert!(done.completed_at.is_some());

    let changes = foreman
        .recorder
        .query(
            &ActivityFilter::for_task(t1.id).with_category(ActivityCategory::StatusChanged),
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(changes.total, 2);
    assert!(changes.records.iter().all(|r| r.actor_id == "a1"));
}

#[tokio::test]
async fn test_assignment_waits_for_dependencies() {
    let foreman = common::foreman().await;
    common::register(&foreman, "planner", "planner", &[]).await;
    common::register(&foreman, "a1", "implementer", &[]).await;
    let orchestrator = &foreman.orchestrator;

    let t1 = orchestrator
        .create_task(TaskSpec::new("T1", "planner"))
        .await
        .unwrap();
    let t2 = orchestrator
        .create_task(TaskSpec::new("T2", "planner").with_dependency(t1.id))
        .await
        .unwrap();

    let err = orchestrator.assign_task(t2.id, "a1").await.unwrap_err();
    match &err {
        DomainError::UnmetDependencies { task_id, pending } => {
            assert_eq!(*task_id, t2.id);
            assert_eq!(pending, &vec![(t1.id, TaskStatus::Backlog)]);
        }
        other => panic!("expected UnmetDependencies, got {other:?}"),
    }

    let t2 = orchestrator.require(t2.id).await.unwrap();
    assert_eq!(t2.status, TaskStatus::Backlog);
    assert!(t2.assignee.is_none());
}

#[tokio::test]
async fn test_racing_assignments_have_one_winner() {
    let foreman = common::foreman().await;
    common::register(&foreman, "planner", "planner", &[]).await;
    common::register(&foreman, "a1", "implementer", &[]).await;
    common::register(&foreman, "a2", "implementer", &[]).await;
    let orchestrator = &foreman.orchestrator;

    let t3 = orchestrator
        .create_task(TaskSpec::new("T3", "planner"))
        .await
        .unwrap();

    let (first, second) = tokio::join!(
        orchestrator.assign_task(t3.id, "a1"),
        orchestrator.assign_task(t3.id, "a2"),
    );

    let (winner, loser) = match (first, second) {
        (Ok(task), Err(err)) | (Err(err), Ok(task)) => (task, err),
        (a, b) => panic!("expected exactly one success, got {a:?} and {b:?}"),
    };
    assert_eq!(loser.kind(), ErrorKind::Conflict);

    let current = orchestrator.require(t3.id).await.unwrap();
    assert_eq!(current.status, TaskStatus::Assigned);
    assert_eq!(current.assignee, winner.assignee);
}

#[tokio::test]
async fn test_thread_returns_root_first() {
    let foreman = common::foreman().await;
    common::register(&foreman, "a1", "implementer", &[]).await;
    common::register(&foreman, "a2", "reviewer", &[]).await;

    let m1 = foreman
        .messages
        .send(Message::new("a1", "a2", MessageIntent::Request, "Can you review the parser?"))
        .await
        .unwrap();
    let m2 = foreman
        .messages
        .send(Message::reply_to(&m1, MessageIntent::Confirm, "On it"))
        .await
        .unwrap();
    assert_eq!(m2.sender, "a2");
    assert_eq!(m2.receiver, "a1");

    let thread = foreman.messages.thread(m2.id).await.unwrap();
    let ids: Vec<_> = thread.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![m1.id, m2.id]);
}

#[tokio::test]
async fn test_similarity_search_keeps_close_entities_in_order() {
    let foreman = common::foreman().await;
    let memory = &foreman.memory;

    memory
        .upsert(MemoryEntity::new("note", "close", "close").with_embedding(vec![1.0, 0.0, 0.0]))
        .await
        .unwrap();
    memory
        .upsert(MemoryEntity::new("note", "closer-ish", "near").with_embedding(vec![0.9, 0.3, 0.0]))
        .await
        .unwrap();
    memory
        .upsert(MemoryEntity::new("note", "far", "far").with_embedding(vec![0.0, 0.0, 1.0]))
        .await
        .unwrap();

    let hits = memory
        .similarity_search(&[1.0, 0.05, 0.0], &MemoryFilter::default(), 10, 0.7)
        .await
        .unwrap();

    let ids: Vec<&str> = hits.iter().map(|h| h.entity.entity_id.as_str()).collect();
    assert_eq!(ids, vec!["close", "closer-ish"]);
    assert!(hits[0].score >= hits[1].score);
    assert!(hits.iter().all(|h| h.score >= 0.7));
}
