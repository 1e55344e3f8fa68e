use sqlx::types::Json;

use crate::error::{JobError, QueueError};
use crate::types::{Job, JobInit, JobOptions, JobState};

/// Inserts a PENDING job row under the given queue, merging `init.options`
/// over `queue_defaults`. Publishing the `new_job` notification is the
/// caller's responsibility (it needs a connection outside this transaction's
/// lifetime in some call paths, so it isn't folded in here).
pub async fn create_job<'c, E>(
    executor: E,
    queue_id: i32,
    init: &JobInit,
    queue_defaults: &JobOptions,
) -> Result<Job, QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let opts = init.options.merged_with_defaults(queue_defaults);

    let job = sqlx::query_as!(
        Job,
        r#"
INSERT INTO job (
    custom_id, queue_id, name, command, args, working_dir, timeout_seconds,
    priority, max_attempts, keep_logs
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
RETURNING
    id, custom_id, queue_id, name, command, args as "args: Json<Vec<String>>",
    working_dir, timeout_seconds, std_out, std_err, exit_code,
    status as "status: JobState", priority, max_attempts, attempts_made,
    keep_logs, lock_token, created_at, updated_at, processed_on, finished_on,
    failed_reason, stack_trace
        "#,
        opts.custom_id,
        queue_id,
        init.name,
        init.command,
        serde_json::to_value(&init.args).map_err(|e| QueueError::InvalidConfig(e.to_string()))?,
        opts.working_dir,
        opts.timeout_seconds,
        opts.priority.unwrap_or(0),
        opts.max_attempts.unwrap_or(1),
        opts.keep_logs.unwrap_or(50),
    )
    .fetch_one(executor)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            QueueError::DuplicateCustomId(opts.custom_id.clone().unwrap_or_default())
        }
        _ => QueueError::DatabaseError(e),
    })?;

    Ok(job)
}

/// Atomically leases up to `max` PENDING jobs for `queue_id`: selects
/// candidates ordered by (priority, created_at, id) under
/// `FOR UPDATE SKIP LOCKED`, then updates them to RUNNING in the same
/// statement. This single round trip is what guarantees at-most-one-leaser
/// under concurrent workers.
pub async fn lease_jobs<'c, E>(
    executor: E,
    queue_id: i32,
    lock_token: &str,
    max: i64,
) -> Result<Vec<Job>, QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let rows = sqlx::query_as!(
        Job,
        r#"
WITH next AS (
    SELECT id
    FROM job
    WHERE status = 'PENDING'
      AND queue_id = $1
      AND lock_token IS NULL
    ORDER BY priority ASC, created_at ASC, id ASC
    FOR UPDATE SKIP LOCKED
    LIMIT $2
)
UPDATE job
SET status = 'RUNNING',
    lock_token = $3,
    processed_on = NOW(),
    attempts_made = attempts_made + 1
FROM next
WHERE job.id = next.id
RETURNING
    job.id, job.custom_id, job.queue_id, job.name, job.command,
    job.args as "args: Json<Vec<String>>", job.working_dir, job.timeout_seconds,
    job.std_out, job.std_err, job.exit_code, job.status as "status: JobState",
    job.priority, job.max_attempts, job.attempts_made, job.keep_logs,
    job.lock_token, job.created_at, job.updated_at, job.processed_on,
    job.finished_on, job.failed_reason, job.stack_trace
        "#,
        queue_id,
        max,
        lock_token,
    )
    .fetch_all(executor)
    .await?;

    Ok(rows)
}

pub async fn move_to_completed<'c, E>(
    executor: E,
    job_id: i32,
    lock_token: &str,
    exit_code: i32,
    stdout: &str,
    stderr: &str,
) -> Result<(), JobError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let res = sqlx::query!(
        r#"
UPDATE job
SET status = 'COMPLETED', exit_code = $1, std_out = $2, std_err = $3,
    finished_on = NOW(), lock_token = NULL
WHERE id = $4 AND lock_token = $5 AND status = 'RUNNING'
        "#,
        exit_code,
        stdout,
        stderr,
        job_id,
        lock_token,
    )
    .execute(executor)
    .await?;

    throw_if_no_rows(res.rows_affected(), job_id)
}

/// Either re-arms the job as PENDING (if attempts remain) or terminates it
/// as FAILED. `attempts_made` is never touched here: it was already
/// incremented by the lease query, so a retried job's attempt count reflects
/// leases taken, not failures recorded.
pub async fn move_to_failed<'c, E>(
    executor: E,
    job_id: i32,
    lock_token: &str,
    exit_code: Option<i32>,
    stdout: Option<&str>,
    stderr: Option<&str>,
    failed_reason: &str,
    stack_trace: Option<&str>,
) -> Result<bool, JobError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres> + Copy,
{
    let row = sqlx::query!(
        r#"SELECT attempts_made, max_attempts FROM job WHERE id = $1 AND lock_token = $2 AND status = 'RUNNING'"#,
        job_id,
        lock_token,
    )
    .fetch_optional(executor)
    .await?
    .ok_or(JobError::InvalidLock(job_id))?;

    let will_retry = row.attempts_made < row.max_attempts;

    if will_retry {
        let res = sqlx::query!(
            r#"
UPDATE job
SET status = 'PENDING', lock_token = NULL, processed_on = NULL, finished_on = NULL,
    failed_reason = NULL, stack_trace = NULL, std_out = $1, std_err = $2, exit_code = $3
WHERE id = $4 AND lock_token = $5 AND status = 'RUNNING'
            "#,
            stdout,
            stderr,
            exit_code,
            job_id,
            lock_token,
        )
        .execute(executor)
        .await?;
        throw_if_no_rows(res.rows_affected(), job_id)?;
    } else {
        let res = sqlx::query!(
            r#"
UPDATE job
SET status = 'FAILED', exit_code = $1, std_out = $2, std_err = $3,
    failed_reason = $4, stack_trace = $5, finished_on = NOW(), lock_token = NULL
WHERE id = $6 AND lock_token = $7 AND status = 'RUNNING'
            "#,
            exit_code,
            stdout,
            stderr,
            failed_reason,
            stack_trace,
            job_id,
            lock_token,
        )
        .execute(executor)
        .await?;
        throw_if_no_rows(res.rows_affected(), job_id)?;
    }

    Ok(will_retry)
}

pub async fn move_to_cancelled<'c, E>(
    executor: E,
    job_id: i32,
    reason: &str,
) -> Result<(), JobError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let res = sqlx::query!(
        r#"
UPDATE job
SET status = 'CANCELLED', failed_reason = $1, finished_on = NOW()
WHERE id = $2 AND status = 'PENDING'
        "#,
        reason,
        job_id,
    )
    .execute(executor)
    .await?;

    throw_if_no_rows(res.rows_affected(), job_id)
}

/// Appends a log line under the parent job's row lock, then trims anything
/// beyond the newest `keep_logs` rows. The row lock is what keeps `sequence`
/// dense and gap-free under concurrent stdout/stderr callbacks for the same
/// job.
pub async fn add_log(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    job_id: i32,
    message: &str,
) -> Result<(), JobError> {
    let locked = sqlx::query!("SELECT keep_logs FROM job WHERE id = $1 FOR UPDATE", job_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(JobError::UnknownJobId(job_id))?;

    let next_seq = sqlx::query_scalar!(
        "SELECT COALESCE(MAX(sequence), 0) + 1 FROM job_log WHERE job_id = $1",
        job_id
    )
    .fetch_one(&mut **tx)
    .await?
    .unwrap_or(1);

    sqlx::query!(
        "INSERT INTO job_log (job_id, sequence, message) VALUES ($1, $2, $3)",
        job_id,
        next_seq,
        message,
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query!(
        r#"
DELETE FROM job_log
WHERE job_id = $1
  AND sequence <= (
      SELECT MAX(sequence) - $2 FROM job_log WHERE job_id = $1
  )
        "#,
        job_id,
        locked.keep_logs as i64,
    )
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn get_logs<'c, E>(
    executor: E,
    job_id: i32,
    limit: Option<i64>,
) -> Result<Vec<crate::types::JobLog>, JobError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let rows = sqlx::query_as!(
        crate::types::JobLog,
        r#"
SELECT id, job_id, sequence, message, created_at
FROM job_log
WHERE job_id = $1
ORDER BY sequence ASC
LIMIT $2
        "#,
        job_id,
        limit.unwrap_or(i64::MAX),
    )
    .fetch_all(executor)
    .await?;

    Ok(rows)
}

fn throw_if_no_rows(rows_affected: u64, job_id: i32) -> Result<(), JobError> {
    if rows_affected == 0 {
        Err(JobError::InvalidLock(job_id))
    } else {
        Ok(())
    }
}

/// Used by the worker's stall sweep: moves RUNNING jobs of `queue_id` whose
/// `processed_on` is older than `stalled_timeout_ms` to STALLED.
pub async fn sweep_stalled_jobs<'c, E>(
    executor: E,
    queue_id: i32,
    stalled_timeout_ms: i64,
) -> Result<Vec<i32>, QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let ids = sqlx::query_scalar!(
        r#"
WITH stalled AS (
    SELECT id
    FROM job
    WHERE status = 'RUNNING'
      AND queue_id = $1
      AND processed_on < NOW() - ($2 || ' milliseconds')::interval
    FOR UPDATE SKIP LOCKED
)
UPDATE job
SET status = 'STALLED', lock_token = NULL
FROM stalled
WHERE job.id = stalled.id
RETURNING job.id
        "#,
        queue_id,
        stalled_timeout_ms.to_string(),
    )
    .fetch_all(executor)
    .await?;

    Ok(ids)
}

pub async fn retry_stalled_jobs<'c, E>(executor: E, queue_id: i32) -> Result<u64, QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let res = sqlx::query!(
        "UPDATE job SET status = 'PENDING' WHERE status = 'STALLED' AND queue_id = $1",
        queue_id,
    )
    .execute(executor)
    .await?;

    Ok(res.rows_affected())
}
