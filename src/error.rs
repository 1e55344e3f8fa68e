use thiserror::Error;

/// Errors from the queue/storage layer: connection setup, transactions,
/// and queue-level invariants (pause, uniqueness).
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("queue '{0}' is paused")]
    QueuePaused(String),

    #[error("a job with custom_id '{0}' already exists")]
    DuplicateCustomId(String),

    #[error("failed to connect to remote host {host}:{port}: {source}")]
    SshConnectFailed {
        host: String,
        port: u16,
        source: String,
    },

    #[error("worker config invalid: {0}")]
    InvalidConfig(String),
}

/// Errors from an operation on a single, already-identified job.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("job {0} not found")]
    UnknownJobId(i32),

    #[error("job {job_id} is not in the expected state: wanted {expected}, found {found}")]
    InvalidStateTransition {
        job_id: i32,
        expected: &'static str,
        found: String,
    },

    #[error("job {0} lock token mismatch or already released")]
    InvalidLock(i32),

    #[error("job {job_id} timed out after {timeout_secs}s")]
    TimedOut { job_id: i32, timeout_secs: i64 },

    #[error("remote execution failed: {0}")]
    ExecutionFailed(String),
}
