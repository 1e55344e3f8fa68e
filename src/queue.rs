use sqlx::PgPool;

use crate::error::QueueError;
use crate::ops;
use crate::storage::StorageAdapter;
use crate::types::{Job as JobRow, JobInit, JobOptions, Queue as QueueRow, QueueState, QueueStats};

/// A named container of jobs.
#[derive(Clone)]
pub struct Queue {
    pool: PgPool,
    row: QueueRow,
}

impl Queue {
    /// Lazily creates the named queue if absent, then returns a handle to it.
    pub async fn wait_until_ready(
        storage: &StorageAdapter,
        name: &str,
        default_job_options: JobOptions,
    ) -> Result<Self, QueueError> {
        let row = ops::queue::wait_until_ready(&storage.pool, name, &default_job_options).await?;
        Ok(Self {
            pool: storage.pool.clone(),
            row,
        })
    }

    pub fn id(&self) -> i32 {
        self.row.id
    }

    pub fn name(&self) -> &str {
        &self.row.name
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.row.status, QueueState::Paused)
    }

    pub async fn add(&self, init: &JobInit) -> Result<JobRow, QueueError> {
        if self.is_paused() {
            return Err(QueueError::QueuePaused(self.row.name.clone()));
        }

        let mut tx = self.pool.begin().await?;
        let job = ops::job::create_job(&mut *tx, self.row.id, init, &self.row.default_job_options.0)
            .await?;
        tx.commit().await?;

        StorageAdapter::from_pool(self.pool.clone())
            .notify(crate::storage::NEW_JOB_CHANNEL, &job.id.to_string())
            .await?;

        Ok(job)
    }

    pub async fn pause(&mut self) -> Result<(), QueueError> {
        ops::queue::pause(&self.pool, self.row.id).await?;
        self.row.status = QueueState::Paused;
        Ok(())
    }

    pub async fn resume(&mut self) -> Result<(), QueueError> {
        ops::queue::resume(&self.pool, self.row.id).await?;
        self.row.status = QueueState::Active;
        Ok(())
    }

    pub async fn get_stats(&self) -> Result<QueueStats, QueueError> {
        ops::queue::get_stats(&self.pool, self.row.id).await
    }

    /// Moves RUNNING jobs whose `processed_on` predates `stalled_timeout_ms`
    /// to STALLED. Returns the ids moved.
    pub async fn mark_stalled_jobs(&self, stalled_timeout_ms: i64) -> Result<Vec<i32>, QueueError> {
        let mut tx = self.pool.begin().await?;
        let ids = ops::job::sweep_stalled_jobs(&mut *tx, self.row.id, stalled_timeout_ms).await?;
        tx.commit().await?;
        Ok(ids)
    }

    /// Moves every STALLED job back to PENDING and wakes workers. A no-op
    /// (and no notification sent) if there were no STALLED jobs.
    pub async fn retry_stalled_jobs(&self) -> Result<u64, QueueError> {
        let retried = ops::job::retry_stalled_jobs(&self.pool, self.row.id).await?;
        if retried > 0 {
            StorageAdapter::from_pool(self.pool.clone())
                .notify(crate::storage::NEW_JOB_CHANNEL, &self.row.name)
                .await?;
        }
        Ok(retried)
    }
}
