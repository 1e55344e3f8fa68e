use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use stevedore_core::{JobInit, JobOptions, Queue, StorageAdapter};

#[allow(dead_code)]
pub fn new_job_init(name: &str, command: &str, args: Vec<&str>) -> JobInit {
    JobInit {
        name: name.to_string(),
        command: command.to_string(),
        args: args.into_iter().map(str::to_string).collect(),
        options: JobOptions::default(),
    }
}

#[allow(dead_code)]
pub async fn ready_queue(db: PgPool, name: &str) -> Queue {
    let storage = StorageAdapter::from_pool(db);
    Queue::wait_until_ready(&storage, name, JobOptions::default())
        .await
        .expect("failed to create queue")
}

#[allow(dead_code)]
pub fn dates_match(left: &DateTime<Utc>, right: &DateTime<Utc>) -> bool {
    // Roundtripping a datetime to PG can cause sub-ms differences, so we need
    // to check within a margin of error.
    let diff = *left - *right;
    diff.abs() < Duration::milliseconds(1)
}
