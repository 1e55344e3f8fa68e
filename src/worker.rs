use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{RemoteConfig, WorkerConfig};
use crate::error::QueueError;
use crate::events::{EventBus, WorkerEvent};
use crate::executor::{execute_with_timeout, RemoteExecute, SshExecutor};
use crate::job::JobHandle;
use crate::metrics_consts::*;
use crate::queue::Queue;
use crate::storage::StorageAdapter;
use crate::types::Job;

/// The scheduling engine: leases batches of jobs, dispatches each to the
/// remote executor, records terminal state, sweeps stalls, and wakes up
/// promptly on `new_job` notifications instead of purely polling. One
/// `Worker` owns one SSH target and one queue.
pub struct Worker {
    storage: StorageAdapter,
    queue: Queue,
    jobs: JobHandle,
    executor: Arc<dyn RemoteExecute>,
    remote_host: String,
    remote_port: u16,
    remote_working_dir: Option<String>,
    remote_env: HashMap<String, String>,
    config: WorkerConfig,
    events: EventBus,
    running: Arc<AtomicBool>,
    active_jobs: Arc<AtomicUsize>,
}

impl Worker {
    pub async fn connect(
        storage: StorageAdapter,
        queue: Queue,
        remote_config: RemoteConfig,
        config: WorkerConfig,
    ) -> Result<Self, QueueError> {
        let host = remote_config.ssh.host.clone();
        let port = remote_config.ssh.port;
        let working_dir = remote_config.working_dir.clone();
        let env = remote_config.env.clone();
        let executor: Arc<dyn RemoteExecute> = Arc::new(SshExecutor::new(remote_config.ssh));
        Self::new(storage, queue, executor, host, port, working_dir, env, config).await
    }

    /// Split out from `connect` so tests can inject a `FakeExecutor` instead
    /// of a real SSH session.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        storage: StorageAdapter,
        queue: Queue,
        executor: Arc<dyn RemoteExecute>,
        remote_host: String,
        remote_port: u16,
        remote_working_dir: Option<String>,
        remote_env: HashMap<String, String>,
        config: WorkerConfig,
    ) -> Result<Self, QueueError> {
        let jobs = JobHandle::from_pool(storage.pool.clone());
        Ok(Self {
            storage,
            queue,
            jobs,
            executor,
            remote_host,
            remote_port,
            remote_working_dir,
            remote_env,
            config,
            events: EventBus::new(),
            running: Arc::new(AtomicBool::new(false)),
            active_jobs: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    /// Runs the scheduling loop until `stop()` flips `running` to false.
    /// Connects the executor, verifies reachability, recovers any jobs left
    /// STALLED by a prior crash, then loops: sweep stalls, fill concurrency
    /// slots, sleep until `poll_interval_ms` elapses or a notification wakes
    /// us early.
    pub async fn run(&self) -> Result<(), QueueError> {
        metrics::counter!(SSH_CONNECT_ATTEMPT).increment(1);
        self.executor.connect().await.map_err(|e| {
            metrics::counter!(SSH_CONNECT_FAILURE).increment(1);
            QueueError::SshConnectFailed {
                host: self.remote_host.clone(),
                port: self.remote_port,
                source: e.to_string(),
            }
        })?;
        self.executor
            .test_connection()
            .await
            .map_err(|e| QueueError::SshConnectFailed {
                host: self.remote_host.clone(),
                port: self.remote_port,
                source: e.to_string(),
            })?;
        if let Ok(info) = self.executor.server_info().await {
            info!(hostname = %info.hostname, uptime = %info.uptime, "connected to remote host");
        }

        let retried = self.queue.retry_stalled_jobs().await?;
        if retried > 0 {
            info!(retried, "recovered stalled jobs from a prior run");
        }

        let mut listener = self.storage.listen(crate::storage::NEW_JOB_CHANNEL).await?;

        self.running.store(true, Ordering::SeqCst);
        let mut in_flight: JoinSet<()> = JoinSet::new();

        while self.running.load(Ordering::SeqCst) {
            let stalled = self
                .queue
                .mark_stalled_jobs(self.config.stalled_timeout_ms)
                .await?;
            if !stalled.is_empty() {
                warn!(count = stalled.len(), "marked jobs as stalled");
                metrics::counter!(JOBS_STALLED).increment(stalled.len() as u64);
                self.events.emit(WorkerEvent::JobStalled(stalled));
            }

            let slots = self
                .config
                .concurrency
                .saturating_sub(self.active_jobs.load(Ordering::SeqCst));

            if slots > 0 {
                let leased = crate::ops::job::lease_jobs(
                    &self.storage.pool,
                    self.queue.id(),
                    &lock_token(),
                    slots as i64,
                )
                .await?;

                metrics::counter!(JOB_LEASE_ATTEMPT).increment(1);
                if !leased.is_empty() {
                    metrics::counter!(JOBS_LEASED).increment(leased.len() as u64);
                }

                for job in leased {
                    self.active_jobs.fetch_add(1, Ordering::SeqCst);
                    self.events.emit(WorkerEvent::JobStarted(job.clone()));

                    let jobs = self.jobs.clone();
                    let executor = self.executor.clone();
                    let events = self.events.clone();
                    let active_jobs = self.active_jobs.clone();
                    let remote_working_dir = self.remote_working_dir.clone();
                    let remote_env = self.remote_env.clone();

                    in_flight.spawn(async move {
                        dispatch_job(job, jobs, executor, events, remote_working_dir, remote_env).await;
                        active_jobs.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            }

            tokio::select! {
                notification = listener.recv() => {
                    if notification.is_err() {
                        warn!("notification listener closed, falling back to polling");
                    }
                    debug!("woke up on new_job notification");
                }
                _ = tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)) => {}
            }

            // Drain any finished dispatch tasks without blocking the loop.
            while in_flight.try_join_next().is_some() {}
        }

        while in_flight.join_next().await.is_some() {}
        self.executor.disconnect().await.ok();
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

async fn dispatch_job(
    job: Job,
    jobs: JobHandle,
    executor: Arc<dyn RemoteExecute>,
    events: EventBus,
    remote_working_dir: Option<String>,
    remote_env: HashMap<String, String>,
) {
    let job_id = job.id;
    let lock_token = job.lock_token.clone().unwrap_or_default();
    let jobs_for_log = jobs.clone();
    let jobs_for_log_err = jobs.clone();

    let on_stdout: crate::executor::OutputSink = Box::new(move |chunk| {
        let jobs = jobs_for_log.clone();
        let chunk = chunk.to_string();
        tokio::spawn(async move {
            let _ = jobs.add_log(job_id, &format!("[stdout] {chunk}")).await;
        });
    });
    let on_stderr: crate::executor::OutputSink = Box::new(move |chunk| {
        let jobs = jobs_for_log_err.clone();
        let chunk = chunk.to_string();
        tokio::spawn(async move {
            let _ = jobs.add_log(job_id, &format!("[stderr] {chunk}")).await;
        });
    });

    let working_dir = job.working_dir.clone().or(remote_working_dir);

    let result = execute_with_timeout(
        executor.as_ref(),
        job_id,
        &job.command,
        &job.args.0,
        working_dir.as_deref(),
        &remote_env,
        job.timeout_seconds,
        on_stdout,
        on_stderr,
    )
    .await;

    match result {
        Ok(outcome) if outcome.exit_code == 0 => {
            metrics::counter!(JOB_COMPLETED).increment(1);
            metrics::histogram!(JOB_EXECUTION_DURATION_MS).record(outcome.duration_ms as f64);
            if let Err(e) = jobs
                .move_to_completed(
                    job_id,
                    &lock_token,
                    outcome.exit_code,
                    &outcome.stdout,
                    &outcome.stderr,
                )
                .await
            {
                warn!(job_id, error = %e, "failed to record job completion");
                return;
            }
            let mut completed = job;
            completed.status = crate::types::JobState::Completed;
            events.emit(WorkerEvent::JobCompleted(completed));
        }
        Ok(outcome) => {
            let reason = format!("command exited with status {}", outcome.exit_code);
            record_failure(
                &jobs,
                &events,
                job,
                &lock_token,
                Some(outcome.exit_code),
                Some(&outcome.stdout),
                Some(&outcome.stderr),
                &reason,
                None,
            )
            .await;
        }
        Err(e) => {
            let reason = e.to_string();
            record_failure(
                &jobs, &events, job, &lock_token, None, None, None, &reason, None,
            )
            .await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn record_failure(
    jobs: &JobHandle,
    events: &EventBus,
    job: Job,
    lock_token: &str,
    exit_code: Option<i32>,
    stdout: Option<&str>,
    stderr: Option<&str>,
    failed_reason: &str,
    stack_trace: Option<&str>,
) {
    metrics::counter!(JOB_FAILED).increment(1);
    let job_id = job.id;
    match jobs
        .move_to_failed(
            job_id,
            lock_token,
            exit_code,
            stdout,
            stderr,
            failed_reason,
            stack_trace,
        )
        .await
    {
        Ok(true) => {
            metrics::counter!(JOB_RETRIED).increment(1);
            events.emit(WorkerEvent::JobFailed(job, failed_reason.to_string()));
        }
        Ok(false) => {
            events.emit(WorkerEvent::JobFailed(job, failed_reason.to_string()));
        }
        Err(e) => warn!(job_id, error = %e, "failed to record job failure"),
    }
}

/// Opaque per-lease-batch token. Uniqueness, not unguessability, is the
/// requirement; a random hex string is sufficient and avoids pulling in a
/// UUID dependency just for this.
fn lock_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

