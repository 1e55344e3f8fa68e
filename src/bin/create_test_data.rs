use std::env;

use chrono::Utc;
use stevedore_core::{JobInit, JobOptions, PoolConfig, Queue, StorageAdapter};

// Inserts jobs as fast as it can, choosing randomly between a couple of trivial
// shell commands and priorities. Prints every 100 jobs inserted. Useful for
// soak-testing the lease query under load.
#[tokio::main]
async fn main() {
    let db_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://postgres@localhost/stevedore".to_string());

    let pool_config = PoolConfig {
        db_url,
        max_connections: None,
        min_connections: None,
        acquire_timeout_seconds: None,
        max_lifetime_seconds: None,
        idle_timeout_seconds: None,
    };

    let storage = StorageAdapter::connect(&pool_config).await.unwrap();
    let queue = Queue::wait_until_ready(&storage, "default", JobOptions::default())
        .await
        .unwrap();

    let commands = ["echo", "uname", "date"];

    let start = Utc::now();
    let mut count: u64 = 0;
    loop {
        let command = commands[(rand::random::<u32>() as usize) % commands.len()];
        let priority = (rand::random::<u32>() % 3) as i32;

        let init = JobInit {
            name: format!("test-job-{count}"),
            command: command.to_string(),
            args: vec!["hello".to_string()],
            options: JobOptions {
                priority: Some(priority),
                max_attempts: Some(1),
                ..Default::default()
            },
        };

        queue.add(&init).await.unwrap();

        count += 1;
        if count % 100 == 0 {
            println!("Elapsed: {:?}, count: {}", Utc::now() - start, count);
        }
    }
}
