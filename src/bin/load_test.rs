use std::{
    env,
    sync::{atomic::AtomicUsize, Arc},
    time::Instant,
};

use chrono::Duration;
use futures::future::join_all;
use stevedore_core::{test_support::ops, JobInit, JobOptions, PoolConfig, Queue, StorageAdapter};

// Spins up a producer and two lease-and-complete loops against the database only
// (no SSH target involved) to simulate semi-realistic load on the lease query and
// the completion path. The producer never gets more than 10,000 jobs ahead of what
// the workers have completed.

struct SharedContext {
    jobs_inserted: AtomicUsize,
    jobs_completed: AtomicUsize,
}

async fn producer_loop(queue: Queue, shared_context: Arc<SharedContext>) {
    let mut time_spent_inserting = Duration::zero();
    let mut count = 0usize;
    loop {
        let priority = (rand::random::<u32>() % 3) as i32;
        let init = JobInit {
            name: format!("load-test-{count}"),
            command: "true".to_string(),
            args: vec![],
            options: JobOptions {
                priority: Some(priority),
                max_attempts: Some(1),
                ..Default::default()
            },
        };

        let start = Instant::now();
        queue.add(&init).await.unwrap();
        time_spent_inserting += Duration::from_std(start.elapsed()).unwrap();

        let inserted = shared_context
            .jobs_inserted
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        count += 1;

        if inserted % 100 == 0 {
            println!("Inserted: {inserted} in {time_spent_inserting}");
            let mut completed = shared_context
                .jobs_completed
                .load(std::sync::atomic::Ordering::Relaxed);
            while inserted > completed + 10_000 {
                println!("Waiting for workers to catch up, lagging by {}", inserted - completed);
                tokio::time::sleep(Duration::milliseconds(100).to_std().unwrap()).await;
                completed = shared_context
                    .jobs_completed
                    .load(std::sync::atomic::Ordering::Relaxed);
            }
        }
    }
}

async fn worker_loop(pool: sqlx::PgPool, queue_id: i32, shared_context: Arc<SharedContext>) {
    let mut time_spent_leasing = Duration::zero();
    loop {
        let start = Instant::now();
        let lock_token = format!("{:016x}", rand::random::<u64>());
        let jobs = ops::job::lease_jobs(&pool, queue_id, &lock_token, 1000)
            .await
            .unwrap();

        if jobs.is_empty() {
            tokio::time::sleep(Duration::milliseconds(100).to_std().unwrap()).await;
            continue;
        }

        let futs = jobs
            .iter()
            .map(|job| ops::job::move_to_completed(&pool, job.id, &lock_token, 0, "", ""));
        for res in join_all(futs).await {
            res.unwrap();
        }

        time_spent_leasing += Duration::from_std(start.elapsed()).unwrap();
        let completed = shared_context
            .jobs_completed
            .fetch_add(jobs.len(), std::sync::atomic::Ordering::Relaxed)
            + jobs.len();

        println!("Leased, completed {completed} jobs in {time_spent_leasing} total");

        if jobs.len() < 1000 {
            tokio::time::sleep(Duration::milliseconds(100).to_std().unwrap()).await;
        }
    }
}

#[tokio::main]
async fn main() {
    let db_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://postgres@localhost/stevedore".to_string());

    let pool_config = PoolConfig {
        db_url,
        max_connections: Some(20),
        min_connections: None,
        acquire_timeout_seconds: None,
        max_lifetime_seconds: None,
        idle_timeout_seconds: None,
    };

    let storage = StorageAdapter::connect(&pool_config).await.unwrap();
    let queue = Queue::wait_until_ready(&storage, "default", JobOptions::default())
        .await
        .unwrap();
    let queue_id = queue.id();

    let shared_context = Arc::new(SharedContext {
        jobs_inserted: AtomicUsize::new(0),
        jobs_completed: AtomicUsize::new(0),
    });

    let producer = producer_loop(queue, shared_context.clone());
    let worker_1 = worker_loop(storage.pool.clone(), queue_id, shared_context.clone());
    let worker_2 = worker_loop(storage.pool.clone(), queue_id, shared_context.clone());

    let producer = tokio::spawn(producer);
    let worker_1 = tokio::spawn(worker_1);
    let worker_2 = tokio::spawn(worker_2);

    tokio::try_join!(producer, worker_1, worker_2).unwrap();
}
