use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Lifecycle states a job passes through. Transitions are one-directional
/// except RUNNING -> STALLED -> PENDING (retry) and PENDING -> RUNNING (lease).
#[derive(Debug, Clone, Copy, Deserialize, Serialize, sqlx::Type, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "job_status", rename_all = "UPPERCASE")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Stalled,
    Cancelled,
}

impl FromStr for JobState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobState::Pending),
            "RUNNING" => Ok(JobState::Running),
            "COMPLETED" => Ok(JobState::Completed),
            "FAILED" => Ok(JobState::Failed),
            "STALLED" => Ok(JobState::Stalled),
            "CANCELLED" => Ok(JobState::Cancelled),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Stalled => "STALLED",
            JobState::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, sqlx::Type, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "queue_status", rename_all = "UPPERCASE")]
pub enum QueueState {
    Active,
    Paused,
}

/// Recognized job options, mergeable with a queue's defaults. Every field is
/// optional so a job's options can be expressed as a sparse override over the
/// queue's `default_job_options`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct JobOptions {
    pub custom_id: Option<String>,
    pub priority: Option<i32>,
    pub max_attempts: Option<i32>,
    pub timeout_seconds: Option<i32>,
    pub working_dir: Option<String>,
    pub keep_logs: Option<i32>,
}

impl JobOptions {
    /// Shallow-merge `self` over `defaults`: any field `self` sets wins,
    /// otherwise the queue's default is used.
    pub fn merged_with_defaults(&self, defaults: &JobOptions) -> JobOptions {
        JobOptions {
            custom_id: self.custom_id.clone().or_else(|| defaults.custom_id.clone()),
            priority: self.priority.or(defaults.priority),
            max_attempts: self.max_attempts.or(defaults.max_attempts),
            timeout_seconds: self.timeout_seconds.or(defaults.timeout_seconds),
            working_dir: self
                .working_dir
                .clone()
                .or_else(|| defaults.working_dir.clone()),
            keep_logs: self.keep_logs.or(defaults.keep_logs),
        }
    }
}

/// The chunk of data needed to enqueue a job.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobInit {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub options: JobOptions,
}

#[derive(Debug, Clone, sqlx::FromRow, Deserialize, Serialize)]
pub struct Job {
    pub id: i32,
    pub custom_id: Option<String>,
    pub queue_id: i32,
    pub name: String,
    pub command: String,
    pub args: sqlx::types::Json<Vec<String>>,
    pub working_dir: Option<String>,
    pub timeout_seconds: Option<i32>,
    pub std_out: Option<String>,
    pub std_err: Option<String>,
    pub exit_code: Option<i32>,
    pub status: JobState,
    pub priority: i32,
    pub max_attempts: i32,
    pub attempts_made: i32,
    pub keep_logs: i32,
    pub lock_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_on: Option<DateTime<Utc>>,
    pub finished_on: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
    pub stack_trace: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow, Deserialize, Serialize)]
pub struct Queue {
    pub id: i32,
    pub name: String,
    pub status: QueueState,
    pub default_job_options: sqlx::types::Json<JobOptions>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paused_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow, Deserialize, Serialize)]
pub struct JobLog {
    pub id: uuid::Uuid,
    pub job_id: i32,
    pub sequence: i32,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Per-queue counts grouped by status, as returned by `Queue::get_stats`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub stalled: i64,
    pub cancelled: i64,
}

/// The result of a finished remote command, independent of how it is persisted.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
}

/// A name/value pair exported into the remote shell before the command runs.
pub type EnvMap = HashMap<String, String>;
