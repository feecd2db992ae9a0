//! Assignment exclusivity under real concurrent writers.

mod common;

use std::collections::HashSet;

use futures::future::join_all;

use foreman::domain::models::{ActivityCategory, ActivityFilter, Pagination, TaskSpec, TaskStatus};
use foreman::domain::ErrorKind;
use tempfile::TempDir;

const CONTENDERS: usize = 8;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_actors_racing_for_one_task() {
    let dir = TempDir::new().unwrap();
    let foreman = common::file_foreman(&dir).await;
    common::register(&foreman, "planner", "planner", &[]).await;
    for i in 0..CONTENDERS {
        common::register(&foreman, &format!("worker-{i}"), "implementer", &[]).await;
    }

    let task = foreman
        .orchestrator
        .create_task(TaskSpec::new("contested", "planner"))
        .await
        .unwrap();

    let task_id = task.id;
    let handles: Vec<_> = (0..CONTENDERS)
        .map(|i| {
            let orchestrator = foreman.orchestrator.clone();
            tokio::spawn(async move { orchestrator.assign_task(task_id, &format!("worker-{i}")).await })
        })
        .collect();

    let mut winners = Vec::new();
    let mut conflicts = 0;
    for outcome in join_all(handles).await {
        match outcome.unwrap() {
            Ok(task) => winners.push(task),
            Err(err) => {
                assert_eq!(err.kind(), ErrorKind::Conflict, "unexpected error: {err}");
                conflicts += 1;
            }
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(conflicts, CONTENDERS - 1);

    let stored = foreman.orchestrator.require(task.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Assigned);
    assert_eq!(stored.assignee, winners[0].assignee);
    assert_eq!(stored.version, task.version + 1);

    let assigned = foreman
        .recorder
        .query(
            &ActivityFilter::for_task(task.id).with_category(ActivityCategory::TaskAssigned),
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(assigned.total, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_assignment_of_distinct_tasks() {
    let dir = TempDir::new().unwrap();
    let foreman = common::file_foreman(&dir).await;
    common::register(&foreman, "planner", "planner", &[]).await;

    let mut tasks = Vec::new();
    for i in 0..CONTENDERS {
        common::register(&foreman, &format!("worker-{i}"), "implementer", &[]).await;
        tasks.push(
            foreman
                .orchestrator
                .create_task(TaskSpec::new(format!("task {i}"), "planner"))
                .await
                .unwrap(),
        );
    }

    // Every worker goes after every task; each task still ends with one holder.
    let mut handles = Vec::new();
    for task in &tasks {
        for i in 0..CONTENDERS {
            let orchestrator = foreman.orchestrator.clone();
            let task_id = task.id;
            handles.push(tokio::spawn(async move {
                orchestrator.assign_task(task_id, &format!("worker-{i}")).await
            }));
        }
    }

    let mut won = HashSet::new();
    for outcome in join_all(handles).await {
        if let Ok(task) = outcome.unwrap() {
            assert!(won.insert(task.id), "task {} assigned twice", task.id);
        }
    }
    assert_eq!(won.len(), tasks.len());

    for task in &tasks {
        let stored = foreman.orchestrator.require(task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Assigned);
        assert!(stored.assignee.is_some());
    }
}
