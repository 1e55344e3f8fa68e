mod common;

use common::{new_job_init, ready_queue};
use sqlx::PgPool;
use stevedore_core::test_support::ops;

// Scenario: exactly one worker should ever observe a given PENDING job
// transition to RUNNING, even when several lease queries race against the
// same row. This is the crate's core correctness property.
#[sqlx::test(migrations = "./migrations")]
async fn test_at_most_one_leaser(db: PgPool) {
    let queue = ready_queue(db.clone(), "lease-race").await;
    queue.add(&new_job_init("only-job", "true", vec![])).await.unwrap();

    let pool_1 = db.clone();
    let pool_2 = db.clone();
    let queue_id = queue.id();

    let fut_1 = async move { ops::job::lease_jobs(&pool_1, queue_id, "lock-a", 5).await.unwrap() };
    let fut_2 = async move { ops::job::lease_jobs(&pool_2, queue_id, "lock-b", 5).await.unwrap() };

    let (leased_1, leased_2) = tokio::join!(fut_1, fut_2);

    assert_eq!(leased_1.len() + leased_2.len(), 1);
}

// Scenario: within a single lease batch, jobs come back ordered by
// (priority ASC, created_at ASC, id ASC).
#[sqlx::test(migrations = "./migrations")]
async fn test_lease_respects_priority_order(db: PgPool) {
    let queue = ready_queue(db.clone(), "priority-order").await;

    let mut low = new_job_init("low-priority", "true", vec![]);
    low.options.priority = Some(5);
    let mut high = new_job_init("high-priority", "true", vec![]);
    high.options.priority = Some(0);

    queue.add(&low).await.unwrap();
    queue.add(&high).await.unwrap();

    let leased = ops::job::lease_jobs(&db, queue.id(), "lock", 2).await.unwrap();

    assert_eq!(leased.len(), 2);
    assert_eq!(leased[0].name, "high-priority");
    assert_eq!(leased[1].name, "low-priority");
}

// Invariant: a lease query against an empty or fully-leased queue returns
// nothing, and never blocks forever.
#[sqlx::test(migrations = "./migrations")]
async fn test_lease_empty_queue_returns_nothing(db: PgPool) {
    let queue = ready_queue(db.clone(), "empty-queue").await;
    let leased = ops::job::lease_jobs(&db, queue.id(), "lock", 5).await.unwrap();
    assert!(leased.is_empty());
}

// Invariant: adding a job to a paused queue fails and inserts nothing.
#[sqlx::test(migrations = "./migrations")]
async fn test_add_to_paused_queue_fails(db: PgPool) {
    let mut queue = ready_queue(db.clone(), "pause-test").await;
    queue.pause().await.unwrap();

    let result = queue.add(&new_job_init("job", "true", vec![])).await;
    assert!(result.is_err());

    let leased = ops::job::lease_jobs(&db, queue.id(), "lock", 5).await.unwrap();
    assert!(leased.is_empty());
}

#[sqlx::test(migrations = "./migrations")]
async fn test_pause_then_resume_is_a_no_op(db: PgPool) {
    let mut queue = ready_queue(db.clone(), "pause-resume").await;
    queue.pause().await.unwrap();
    queue.resume().await.unwrap();

    assert!(!queue.is_paused());
    queue.add(&new_job_init("job", "true", vec![])).await.unwrap();
}
