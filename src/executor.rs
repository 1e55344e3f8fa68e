use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh_keys::key;
use russh_sftp::client::SftpSession;
use tokio::io::AsyncWriteExt;

use crate::config::{SshAuth, SshConfig};
use crate::error::JobError;
use crate::types::{EnvMap, ExecutionResult};

/// A callback invoked with each chunk of stdout/stderr as a command runs.
/// Boxed rather than generic so `RemoteExecute` stays object-safe.
pub type OutputSink = Box<dyn FnMut(&str) + Send>;

/// Abstraction over "a place that can run a shell command and stream its
/// output back", so the worker loop's dispatch logic can be exercised in
/// tests without a live SSH server. `SshExecutor` is the production
/// implementation; `FakeExecutor` (below, test-only) is the other.
#[async_trait]
pub trait RemoteExecute: Send + Sync {
    async fn connect(&self) -> Result<(), JobError>;
    async fn disconnect(&self) -> Result<(), JobError>;
    async fn test_connection(&self) -> Result<(), JobError>;
    async fn server_info(&self) -> Result<ServerInfo, JobError>;
    async fn upload_file(&self, local_path: &str, remote_path: &str) -> Result<(), JobError>;

    async fn execute(
        &self,
        command: &str,
        args: &[String],
        working_dir: Option<&str>,
        env: &EnvMap,
        on_stdout: OutputSink,
        on_stderr: OutputSink,
    ) -> Result<ExecutionResult, JobError>;
}

#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub hostname: String,
    pub uptime: String,
}

/// Races `execute` against `timeout_seconds`. A timeout does not kill the
/// remote process, it only stops waiting for it; see DESIGN.md for the
/// reasoning.
pub async fn execute_with_timeout(
    executor: &dyn RemoteExecute,
    job_id: i32,
    command: &str,
    args: &[String],
    working_dir: Option<&str>,
    env: &EnvMap,
    timeout_seconds: Option<i32>,
    on_stdout: OutputSink,
    on_stderr: OutputSink,
) -> Result<ExecutionResult, JobError> {
    let fut = executor.execute(command, args, working_dir, env, on_stdout, on_stderr);

    match timeout_seconds {
        None => fut.await,
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs as u64), fut)
            .await
            .map_err(|_| JobError::TimedOut {
                job_id,
                timeout_secs: secs as i64,
            })?,
    }
}

struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host key verification is an operational/deployment concern (known_hosts
        // management); out of scope for this engine.
        Ok(true)
    }
}

/// Production `RemoteExecute` implementation over a single SSH session.
pub struct SshExecutor {
    config: SshConfig,
    session: tokio::sync::Mutex<Option<client::Handle<ClientHandler>>>,
}

impl SshExecutor {
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            session: tokio::sync::Mutex::new(None),
        }
    }

    async fn open_channel(&self) -> Result<russh::Channel<client::Msg>, JobError> {
        let guard = self.session.lock().await;
        let session = guard
            .as_ref()
            .ok_or_else(|| JobError::ExecutionFailed("not connected".to_string()))?;
        session
            .channel_open_session()
            .await
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))
    }

    /// Builds the single command line run on the remote shell: `cd` into the
    /// working directory, falling back to `/tmp` when neither the job nor the
    /// worker's remote config set one, export the configured environment,
    /// then run the shell-escaped command and arguments. Every dynamic value
    /// is quoted via `shell_escape` rather than interpolated raw, so a value
    /// containing shell metacharacters cannot break out of its slot.
    fn build_command_line(command: &str, args: &[String], working_dir: Option<&str>, env: &EnvMap) -> String {
        let mut parts: Vec<String> = Vec::new();

        let dir = working_dir.unwrap_or("/tmp");
        parts.push(format!("cd {} &&", shell_escape::escape(dir.into())));

        for (key, value) in env {
            parts.push(format!(
                "export {}={};",
                key,
                shell_escape::escape(value.into())
            ));
        }

        let mut invocation = vec![shell_escape::escape(command.into()).into_owned()];
        invocation.extend(args.iter().map(|a| shell_escape::escape(a.into()).into_owned()));
        parts.push(invocation.join(" "));

        parts.join(" ")
    }
}

#[async_trait]
impl RemoteExecute for SshExecutor {
    async fn connect(&self) -> Result<(), JobError> {
        let client_config = Arc::new(client::Config {
            connection_timeout: Some(Duration::from_millis(self.config.ready_timeout_ms)),
            ..Default::default()
        });

        let mut handle = client::connect(
            client_config,
            (self.config.host.as_str(), self.config.port),
            ClientHandler,
        )
        .await
        .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        let authenticated = match &self.config.auth {
            SshAuth::Password(password) => handle
                .authenticate_password(&self.config.username, password)
                .await
                .map_err(|e| JobError::ExecutionFailed(e.to_string()))?,
            SshAuth::PrivateKey { path, passphrase } => {
                let key_pair = russh_keys::load_secret_key(path, passphrase.as_deref())
                    .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;
                handle
                    .authenticate_publickey(&self.config.username, Arc::new(key_pair))
                    .await
                    .map_err(|e| JobError::ExecutionFailed(e.to_string()))?
            }
        };

        if !authenticated {
            return Err(JobError::ExecutionFailed(
                "SSH authentication rejected".to_string(),
            ));
        }

        *self.session.lock().await = Some(handle);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), JobError> {
        if let Some(handle) = self.session.lock().await.take() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "English")
                .await;
        }
        Ok(())
    }

    async fn test_connection(&self) -> Result<(), JobError> {
        let result = self
            .execute("echo", &["ok".to_string()], None, &HashMap::new(), Box::new(|_| {}), Box::new(|_| {}))
            .await?;
        if result.exit_code == 0 {
            Ok(())
        } else {
            Err(JobError::ExecutionFailed(
                "test connection command exited non-zero".to_string(),
            ))
        }
    }

    async fn server_info(&self) -> Result<ServerInfo, JobError> {
        let hostname = self
            .execute("hostname", &[], None, &HashMap::new(), Box::new(|_| {}), Box::new(|_| {}))
            .await?
            .stdout
            .trim()
            .to_string();
        let uptime = self
            .execute("uptime", &[], None, &HashMap::new(), Box::new(|_| {}), Box::new(|_| {}))
            .await?
            .stdout
            .trim()
            .to_string();
        Ok(ServerInfo { hostname, uptime })
    }

    async fn upload_file(&self, local_path: &str, remote_path: &str) -> Result<(), JobError> {
        let data = tokio::fs::read(local_path)
            .await
            .map_err(|e| JobError::ExecutionFailed(format!("reading {local_path}: {e}")))?;

        let mut channel = self.open_channel().await?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        let mut remote_file = sftp
            .create(remote_path)
            .await
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        remote_file
            .write_all(&data)
            .await
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;
        remote_file
            .shutdown()
            .await
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        Ok(())
    }

    async fn execute(
        &self,
        command: &str,
        args: &[String],
        working_dir: Option<&str>,
        env: &EnvMap,
        mut on_stdout: OutputSink,
        mut on_stderr: OutputSink,
    ) -> Result<ExecutionResult, JobError> {
        let started = std::time::Instant::now();
        let command_line = Self::build_command_line(command, args, working_dir, env);

        let mut channel = self.open_channel().await?;
        channel
            .exec(true, command_line.as_bytes())
            .await
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut exit_code = 0i32;

        loop {
            let Some(msg) = channel.wait().await else {
                break;
            };
            match msg {
                russh::ChannelMsg::Data { data } => {
                    let chunk = String::from_utf8_lossy(&data).into_owned();
                    on_stdout(&chunk);
                    stdout.push_str(&chunk);
                }
                russh::ChannelMsg::ExtendedData { data, ext: 1 } => {
                    let chunk = String::from_utf8_lossy(&data).into_owned();
                    on_stderr(&chunk);
                    stderr.push_str(&chunk);
                }
                russh::ChannelMsg::ExitStatus { exit_status } => {
                    exit_code = exit_status as i32;
                }
                russh::ChannelMsg::Eof => {}
                _ => {}
            }
        }

        let _ = channel.eof().await;

        Ok(ExecutionResult {
            exit_code,
            stdout,
            stderr,
            duration_ms: started.elapsed().as_millis() as i64,
        })
    }
}

/// An in-memory stand-in for `SshExecutor` used by worker-loop tests. Each
/// call to `execute` pops the next scripted result, letting a scenario model
/// "fails once, then succeeds" without a real SSH server.
#[cfg(any(test, feature = "test-support"))]
pub struct FakeExecutor {
    pub scripted_results: std::sync::Mutex<std::collections::VecDeque<ExecutionResult>>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeExecutor {
    pub fn new(results: Vec<ExecutionResult>) -> Self {
        Self {
            scripted_results: std::sync::Mutex::new(results.into_iter().collect()),
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl RemoteExecute for FakeExecutor {
    async fn connect(&self) -> Result<(), JobError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), JobError> {
        Ok(())
    }

    async fn test_connection(&self) -> Result<(), JobError> {
        Ok(())
    }

    async fn server_info(&self) -> Result<ServerInfo, JobError> {
        Ok(ServerInfo {
            hostname: "fake-host".to_string(),
            uptime: "0 days".to_string(),
        })
    }

    async fn upload_file(&self, _local_path: &str, _remote_path: &str) -> Result<(), JobError> {
        Ok(())
    }

    async fn execute(
        &self,
        _command: &str,
        _args: &[String],
        _working_dir: Option<&str>,
        _env: &EnvMap,
        mut on_stdout: OutputSink,
        mut on_stderr: OutputSink,
    ) -> Result<ExecutionResult, JobError> {
        let result = self
            .scripted_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ExecutionResult {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 0,
            });

        if !result.stdout.is_empty() {
            on_stdout(&result.stdout);
        }
        if !result.stderr.is_empty() {
            on_stderr(&result.stderr);
        }

        Ok(result)
    }
}
