pub const JOB_INSERT_ATTEMPT: &str = "stevedore_job_insert_attempt";
pub const JOBS_INSERTED: &str = "stevedore_jobs_inserted";
pub const JOB_LEASE_ATTEMPT: &str = "stevedore_job_lease_attempt";
pub const JOBS_LEASED: &str = "stevedore_jobs_leased";
pub const JOB_COMPLETED: &str = "stevedore_job_completed";
pub const JOB_FAILED: &str = "stevedore_job_failed";
pub const JOB_RETRIED: &str = "stevedore_job_retried";
pub const JOBS_STALLED: &str = "stevedore_jobs_stalled";
pub const JOB_EXECUTION_DURATION_MS: &str = "stevedore_job_execution_duration_ms";
pub const SSH_CONNECT_ATTEMPT: &str = "stevedore_ssh_connect_attempt";
pub const SSH_CONNECT_FAILURE: &str = "stevedore_ssh_connect_failure";
