use std::time::Duration;

use envconfig::Envconfig;
use serde::{Deserialize, Serialize};
use sqlx::{pool::PoolOptions, PgPool};

/// A pool config object, designed to be passable across API boundaries.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoolConfig {
    pub db_url: String,
    pub max_connections: Option<u32>,         // Default to 10
    pub min_connections: Option<u32>,         // Default to 1
    pub acquire_timeout_seconds: Option<u64>, // Default to 30
    pub max_lifetime_seconds: Option<u64>,    // Default to 300
    pub idle_timeout_seconds: Option<u64>,    // Default to 60
}

impl PoolConfig {
    pub async fn connect(&self) -> Result<PgPool, sqlx::Error> {
        let builder = PoolOptions::new()
            .max_connections(self.max_connections.unwrap_or(10))
            .min_connections(self.min_connections.unwrap_or(1))
            .max_lifetime(Duration::from_secs(
                self.max_lifetime_seconds.unwrap_or(300),
            ))
            .idle_timeout(Duration::from_secs(self.idle_timeout_seconds.unwrap_or(60)))
            .acquire_timeout(Duration::from_secs(
                self.acquire_timeout_seconds.unwrap_or(30),
            ));

        builder.connect(&self.db_url).await
    }
}

/// How to authenticate to the remote host a worker executes jobs on.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum SshAuth {
    Password(String),
    PrivateKey {
        path: String,
        passphrase: Option<String>,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SshConfig {
    pub host: String,
    pub port: u16, // Default to 22
    pub username: String,
    pub auth: SshAuth,
    pub ready_timeout_ms: u64, // Default to 10_000
}

/// Remote-execution defaults applied to every job dispatched by a worker,
/// overridable per job via `JobOptions::working_dir`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RemoteConfig {
    pub ssh: SshConfig,
    pub working_dir: Option<String>,
    pub env: std::collections::HashMap<String, String>,
}

/// Tuning knobs for a single worker's scheduling loop.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkerConfig {
    pub queue_name: String,
    pub concurrency: usize,          // Default to 4
    pub poll_interval_ms: u64,       // Default to 5_000
    pub stalled_timeout_ms: i64,     // Default to 60_000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_name: "default".to_string(),
            concurrency: 4,
            poll_interval_ms: 5_000,
            stalled_timeout_ms: 60_000,
        }
    }
}

/// Flat environment-driven configuration for the `stevedore-worker` binary,
/// mapped into the nested structs above by
/// `get_worker_config`/`get_remote_config`.
#[derive(Envconfig, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,
    #[envconfig(from = "BIND_PORT", default = "3303")]
    pub port: u16,

    #[envconfig(from = "DATABASE_URL")]
    pub database_url: String,
    #[envconfig(from = "MAX_PG_CONNECTIONS", default = "10")]
    pub max_pg_connections: u32,

    #[envconfig(from = "QUEUE_NAME", default = "default")]
    pub queue_name: String,
    #[envconfig(from = "WORKER_CONCURRENCY", default = "4")]
    pub worker_concurrency: usize,
    #[envconfig(from = "POLL_INTERVAL_MS", default = "5000")]
    pub poll_interval_ms: u64,
    #[envconfig(from = "STALLED_TIMEOUT_MS", default = "60000")]
    pub stalled_timeout_ms: i64,

    #[envconfig(from = "SSH_HOST")]
    pub ssh_host: String,
    #[envconfig(from = "SSH_PORT", default = "22")]
    pub ssh_port: u16,
    #[envconfig(from = "SSH_USERNAME")]
    pub ssh_username: String,
    #[envconfig(from = "SSH_PASSWORD")]
    pub ssh_password: Option<String>,
    #[envconfig(from = "SSH_PRIVATE_KEY_PATH")]
    pub ssh_private_key_path: Option<String>,
    #[envconfig(from = "SSH_PRIVATE_KEY_PASSPHRASE")]
    pub ssh_private_key_passphrase: Option<String>,
    #[envconfig(from = "SSH_READY_TIMEOUT_MS", default = "10000")]
    pub ssh_ready_timeout_ms: u64,

    #[envconfig(from = "REMOTE_WORKING_DIR")]
    pub remote_working_dir: Option<String>,
}

impl Config {
    pub fn get_pool_config(&self) -> PoolConfig {
        PoolConfig {
            db_url: self.database_url.clone(),
            max_connections: Some(self.max_pg_connections),
            min_connections: None,
            acquire_timeout_seconds: None,
            max_lifetime_seconds: None,
            idle_timeout_seconds: None,
        }
    }

    pub fn get_worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            queue_name: self.queue_name.clone(),
            concurrency: self.worker_concurrency,
            poll_interval_ms: self.poll_interval_ms,
            stalled_timeout_ms: self.stalled_timeout_ms,
        }
    }

    /// Exactly one of `ssh_password`/`ssh_private_key_path` must be set;
    /// this is validated here rather than guessed at by the caller.
    pub fn get_remote_config(&self) -> Result<RemoteConfig, crate::error::QueueError> {
        let auth = match (&self.ssh_password, &self.ssh_private_key_path) {
            (Some(password), None) => SshAuth::Password(password.clone()),
            (None, Some(path)) => SshAuth::PrivateKey {
                path: path.clone(),
                passphrase: self.ssh_private_key_passphrase.clone(),
            },
            (None, None) => {
                return Err(crate::error::QueueError::InvalidConfig(
                    "one of SSH_PASSWORD or SSH_PRIVATE_KEY_PATH must be set".to_string(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(crate::error::QueueError::InvalidConfig(
                    "only one of SSH_PASSWORD or SSH_PRIVATE_KEY_PATH may be set".to_string(),
                ))
            }
        };

        Ok(RemoteConfig {
            ssh: SshConfig {
                host: self.ssh_host.clone(),
                port: self.ssh_port,
                username: self.ssh_username.clone(),
                auth,
                ready_timeout_ms: self.ssh_ready_timeout_ms,
            },
            working_dir: self.remote_working_dir.clone(),
            env: std::collections::HashMap::new(),
        })
    }
}
