mod common;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::{new_job_init, ready_queue};
use sqlx::PgPool;
use stevedore_core::test_support::ops;
use stevedore_core::{
    ExecutionResult, FakeExecutor, JobState, Queue, RemoteExecute, StorageAdapter, Worker,
    WorkerConfig,
};

fn worker_config(queue_name: &str) -> WorkerConfig {
    WorkerConfig {
        queue_name: queue_name.to_string(),
        concurrency: 2,
        poll_interval_ms: 50,
        stalled_timeout_ms: 60_000,
    }
}

/// Polls `check` until it resolves true or `timeout` elapses.
async fn wait_for<F, Fut>(mut check: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if check().await {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Runs `worker.run()` in the background for as long as `body` takes, then
/// stops it and waits for the loop to exit cleanly.
async fn with_running_worker<F, Fut>(worker: Arc<Worker>, body: F)
where
    F: FnOnce(Arc<Worker>) -> Fut,
    Fut: Future<Output = ()>,
{
    let handle = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    body(worker.clone()).await;

    worker.stop();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}

#[sqlx::test(migrations = "./migrations")]
async fn test_happy_path(db: PgPool) {
    let queue = ready_queue(db.clone(), "happy-path").await;
    let job = queue
        .add(&new_job_init("echo-hello", "echo", vec!["hello"]))
        .await
        .unwrap();

    let executor: Arc<dyn RemoteExecute> = Arc::new(FakeExecutor::new(vec![ExecutionResult {
        exit_code: 0,
        stdout: "hello\n".to_string(),
        stderr: String::new(),
        duration_ms: 5,
    }]));

    let storage = StorageAdapter::from_pool(db.clone());
    let worker = Arc::new(
        Worker::new(
            storage,
            queue,
            executor,
            "fake".to_string(),
            22,
            None,
            std::collections::HashMap::new(),
            worker_config("happy-path"),
        )
        .await
        .unwrap(),
    );

    with_running_worker(worker, |_| async {
        wait_for(
            || async {
                let row = sqlx::query!(
                    "SELECT status as \"status: JobState\" FROM job WHERE id = $1",
                    job.id
                )
                .fetch_one(&db)
                .await
                .unwrap();
                matches!(row.status, JobState::Completed)
            },
            Duration::from_secs(5),
        )
        .await;
    })
    .await;

    let final_job = sqlx::query!(
        "SELECT status as \"status: JobState\", exit_code, std_out FROM job WHERE id = $1",
        job.id
    )
    .fetch_one(&db)
    .await
    .unwrap();

    assert!(matches!(final_job.status, JobState::Completed));
    assert_eq!(final_job.exit_code, Some(0));
    assert_eq!(final_job.std_out.as_deref(), Some("hello\n"));
}

#[sqlx::test(migrations = "./migrations")]
async fn test_retry_then_succeed(db: PgPool) {
    let queue = ready_queue(db.clone(), "retry-then-succeed").await;
    let mut init = new_job_init("flaky", "flaky-cmd", vec![]);
    init.options.max_attempts = Some(2);
    let job = queue.add(&init).await.unwrap();

    let executor: Arc<dyn RemoteExecute> = Arc::new(FakeExecutor::new(vec![
        ExecutionResult {
            exit_code: 1,
            stdout: String::new(),
            stderr: "boom".to_string(),
            duration_ms: 1,
        },
        ExecutionResult {
            exit_code: 0,
            stdout: "ok".to_string(),
            stderr: String::new(),
            duration_ms: 1,
        },
    ]));

    let storage = StorageAdapter::from_pool(db.clone());
    let worker = Arc::new(
        Worker::new(
            storage,
            queue,
            executor,
            "fake".to_string(),
            22,
            None,
            std::collections::HashMap::new(),
            worker_config("retry-then-succeed"),
        )
        .await
        .unwrap(),
    );

    with_running_worker(worker, |_| async {
        wait_for(
            || async {
                let row = sqlx::query!(
                    "SELECT status as \"status: JobState\", attempts_made FROM job WHERE id = $1",
                    job.id
                )
                .fetch_one(&db)
                .await
                .unwrap();
                matches!(row.status, JobState::Completed) && row.attempts_made == 2
            },
            Duration::from_secs(5),
        )
        .await;
    })
    .await;

    let final_job = sqlx::query!(
        "SELECT status as \"status: JobState\", attempts_made FROM job WHERE id = $1",
        job.id
    )
    .fetch_one(&db)
    .await
    .unwrap();
    assert!(matches!(final_job.status, JobState::Completed));
    assert_eq!(final_job.attempts_made, 2);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_permanent_failure(db: PgPool) {
    let queue = ready_queue(db.clone(), "permanent-failure").await;
    let mut init = new_job_init("always-fails", "false", vec![]);
    init.options.max_attempts = Some(1);
    let job = queue.add(&init).await.unwrap();

    let executor: Arc<dyn RemoteExecute> = Arc::new(FakeExecutor::new(vec![ExecutionResult {
        exit_code: 127,
        stdout: String::new(),
        stderr: "command not found".to_string(),
        duration_ms: 1,
    }]));

    let storage = StorageAdapter::from_pool(db.clone());
    let worker = Arc::new(
        Worker::new(
            storage,
            queue,
            executor,
            "fake".to_string(),
            22,
            None,
            std::collections::HashMap::new(),
            worker_config("permanent-failure"),
        )
        .await
        .unwrap(),
    );

    with_running_worker(worker, |_| async {
        wait_for(
            || async {
                let row = sqlx::query!(
                    "SELECT status as \"status: JobState\" FROM job WHERE id = $1",
                    job.id
                )
                .fetch_one(&db)
                .await
                .unwrap();
                matches!(row.status, JobState::Failed)
            },
            Duration::from_secs(5),
        )
        .await;
    })
    .await;

    let final_job = sqlx::query!(
        "SELECT status as \"status: JobState\", exit_code, failed_reason FROM job WHERE id = $1",
        job.id
    )
    .fetch_one(&db)
    .await
    .unwrap();

    assert!(matches!(final_job.status, JobState::Failed));
    assert_eq!(final_job.exit_code, Some(127));
    assert!(final_job.failed_reason.is_some());
}

#[sqlx::test(migrations = "./migrations")]
async fn test_stall_recovery(db: PgPool) {
    let queue = ready_queue(db.clone(), "stall-recovery").await;
    let job = queue
        .add(&new_job_init("long-runner", "sleep", vec!["1000"]))
        .await
        .unwrap();

    ops::job::lease_jobs(&db, queue.id(), "stuck-lock", 1).await.unwrap();
    sqlx::query!(
        "UPDATE job SET processed_on = NOW() - INTERVAL '1 hour' WHERE id = $1",
        job.id
    )
    .execute(&db)
    .await
    .unwrap();

    let stalled = queue.mark_stalled_jobs(5_000).await.unwrap();
    assert_eq!(stalled, vec![job.id]);

    let row = sqlx::query!(
        "SELECT status as \"status: JobState\", lock_token FROM job WHERE id = $1",
        job.id
    )
    .fetch_one(&db)
    .await
    .unwrap();
    assert!(matches!(row.status, JobState::Stalled));
    assert!(row.lock_token.is_none());

    let retried = queue.retry_stalled_jobs().await.unwrap();
    assert_eq!(retried, 1);

    let leased = ops::job::lease_jobs(&db, queue.id(), "new-lock", 1).await.unwrap();
    assert_eq!(leased.len(), 1);
    assert_eq!(leased[0].id, job.id);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_log_retention(db: PgPool) {
    let queue = ready_queue(db.clone(), "log-retention").await;
    let mut init = new_job_init("chatty", "true", vec![]);
    init.options.keep_logs = Some(3);
    let job = queue.add(&init).await.unwrap();

    let storage = StorageAdapter::from_pool(db.clone());
    let jobs = stevedore_core::JobHandle::from_pool(storage.pool.clone());

    for i in 1..=5 {
        jobs.add_log(job.id, &format!("log {i}")).await.unwrap();
    }

    let logs = jobs.get_logs(job.id, None).await.unwrap();
    assert_eq!(logs.len(), 3);
    assert_eq!(
        logs.iter().map(|l| l.message.as_str()).collect::<Vec<_>>(),
        vec!["log 3", "log 4", "log 5"]
    );

    let sequences: Vec<i32> = logs.iter().map(|l| l.sequence).collect();
    assert_eq!(sequences, vec![3, 4, 5]);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_concurrency_throughput(db: PgPool) {
    let queue = ready_queue(db.clone(), "concurrency").await;
    for i in 0..3 {
        queue
            .add(&new_job_init(&format!("job-{i}"), "echo", vec!["hi"]))
            .await
            .unwrap();
    }

    let executor: Arc<dyn RemoteExecute> = Arc::new(FakeExecutor::new(
        (0..3)
            .map(|_| ExecutionResult {
                exit_code: 0,
                stdout: "hi\n".to_string(),
                stderr: String::new(),
                duration_ms: 500,
            })
            .collect(),
    ));

    let mut cfg = worker_config("concurrency");
    cfg.concurrency = 2;
    cfg.poll_interval_ms = 50;

    let storage = StorageAdapter::from_pool(db.clone());
    let worker = Arc::new(
        Worker::new(
            storage,
            queue.clone(),
            executor,
            "fake".to_string(),
            22,
            None,
            std::collections::HashMap::new(),
            cfg,
        )
        .await
        .unwrap(),
    );

    with_running_worker(worker, |_| async {
        wait_for(
            || async {
                let row = sqlx::query!("SELECT COUNT(*) AS \"count!\" FROM job WHERE status = 'COMPLETED'")
                    .fetch_one(&db)
                    .await
                    .unwrap();
                row.count == 3
            },
            Duration::from_secs(5),
        )
        .await;
    })
    .await;

    let stats = queue.get_stats().await.unwrap();
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.pending, 0);
}
