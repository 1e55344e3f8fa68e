use sqlx::types::Json;

use crate::error::QueueError;
use crate::types::{JobOptions, Queue, QueueState, QueueStats};

/// Lazily creates the named queue if it doesn't already exist. This is the
/// crate's only queue-creation entry point; there is no separate explicit
/// create call.
pub async fn wait_until_ready<'c, E>(
    executor: E,
    name: &str,
    default_job_options: &JobOptions,
) -> Result<Queue, QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let queue = sqlx::query_as!(
        Queue,
        r#"
INSERT INTO queue (name, default_job_options)
VALUES ($1, $2)
ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
RETURNING
    id, name, status as "status: QueueState",
    default_job_options as "default_job_options: Json<JobOptions>",
    created_at, updated_at, paused_at
        "#,
        name,
        serde_json::to_value(default_job_options)
            .map_err(|e| QueueError::InvalidConfig(e.to_string()))?,
    )
    .fetch_one(executor)
    .await?;

    Ok(queue)
}

pub async fn pause<'c, E>(executor: E, queue_id: i32) -> Result<(), QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    sqlx::query!(
        "UPDATE queue SET status = 'PAUSED', paused_at = NOW() WHERE id = $1",
        queue_id,
    )
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn resume<'c, E>(executor: E, queue_id: i32) -> Result<(), QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    sqlx::query!(
        "UPDATE queue SET status = 'ACTIVE', paused_at = NULL WHERE id = $1",
        queue_id,
    )
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn get_queue_by_name<'c, E>(executor: E, name: &str) -> Result<Option<Queue>, QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let queue = sqlx::query_as!(
        Queue,
        r#"
SELECT id, name, status as "status: QueueState",
    default_job_options as "default_job_options: Json<JobOptions>",
    created_at, updated_at, paused_at
FROM queue WHERE name = $1
        "#,
        name,
    )
    .fetch_optional(executor)
    .await?;

    Ok(queue)
}

pub async fn get_stats<'c, E>(executor: E, queue_id: i32) -> Result<QueueStats, QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let row = sqlx::query!(
        r#"
SELECT
    COUNT(*) FILTER (WHERE status = 'PENDING') AS "pending!",
    COUNT(*) FILTER (WHERE status = 'RUNNING') AS "running!",
    COUNT(*) FILTER (WHERE status = 'COMPLETED') AS "completed!",
    COUNT(*) FILTER (WHERE status = 'FAILED') AS "failed!",
    COUNT(*) FILTER (WHERE status = 'STALLED') AS "stalled!",
    COUNT(*) FILTER (WHERE status = 'CANCELLED') AS "cancelled!"
FROM job
WHERE queue_id = $1
        "#,
        queue_id,
    )
    .fetch_one(executor)
    .await?;

    Ok(QueueStats {
        pending: row.pending,
        running: row.running,
        completed: row.completed,
        failed: row.failed,
        stalled: row.stalled,
        cancelled: row.cancelled,
    })
}
