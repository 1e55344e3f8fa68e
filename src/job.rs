use sqlx::PgPool;

use crate::error::{JobError, QueueError};
use crate::ops;
use crate::storage::StorageAdapter;
use crate::types::{Job as JobRow, JobInit, JobLog, JobOptions};

/// A thin façade over the raw `ops::job` SQL, bundling a pool so callers
/// don't thread an executor through every call.
#[derive(Clone)]
pub struct JobHandle {
    pool: PgPool,
}

impl JobHandle {
    pub fn new(storage: &StorageAdapter) -> Self {
        Self {
            pool: storage.pool.clone(),
        }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        queue_id: i32,
        init: &JobInit,
        queue_defaults: &JobOptions,
    ) -> Result<JobRow, QueueError> {
        let mut tx = self.pool.begin().await?;
        let job = ops::job::create_job(&mut *tx, queue_id, init, queue_defaults).await?;
        tx.commit().await?;

        StorageAdapter::from_pool(self.pool.clone())
            .notify(crate::storage::NEW_JOB_CHANNEL, &job.id.to_string())
            .await?;

        Ok(job)
    }

    pub async fn move_to_completed(
        &self,
        job_id: i32,
        lock_token: &str,
        exit_code: i32,
        stdout: &str,
        stderr: &str,
    ) -> Result<(), JobError> {
        ops::job::move_to_completed(&self.pool, job_id, lock_token, exit_code, stdout, stderr)
            .await
    }

    /// Returns `true` if the job was re-armed as PENDING (and should wake
    /// other workers), `false` if it terminated as FAILED.
    pub async fn move_to_failed(
        &self,
        job_id: i32,
        lock_token: &str,
        exit_code: Option<i32>,
        stdout: Option<&str>,
        stderr: Option<&str>,
        failed_reason: &str,
        stack_trace: Option<&str>,
    ) -> Result<bool, JobError> {
        let will_retry = ops::job::move_to_failed(
            &self.pool,
            job_id,
            lock_token,
            exit_code,
            stdout,
            stderr,
            failed_reason,
            stack_trace,
        )
        .await?;

        if will_retry {
            let _ = StorageAdapter::from_pool(self.pool.clone())
                .notify(crate::storage::NEW_JOB_CHANNEL, &job_id.to_string())
                .await;
        }

        Ok(will_retry)
    }

    pub async fn move_to_cancelled(&self, job_id: i32, reason: &str) -> Result<(), JobError> {
        ops::job::move_to_cancelled(&self.pool, job_id, reason).await
    }

    pub async fn add_log(&self, job_id: i32, message: &str) -> Result<(), JobError> {
        let mut tx = self.pool.begin().await?;
        ops::job::add_log(&mut tx, job_id, message).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_logs(&self, job_id: i32, limit: Option<i64>) -> Result<Vec<JobLog>, JobError> {
        ops::job::get_logs(&self.pool, job_id, limit).await
    }
}
