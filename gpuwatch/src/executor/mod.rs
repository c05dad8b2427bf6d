//! Remote query execution
//!
//! Runs the GPU query on one host through the configured remote-command
//! program (`ssh` by default):
//! - Bounded wait, the child is killed when the deadline passes
//! - Connection-level failures reported with the last stderr line
//! - No state kept between calls; multiplexing is left to ssh itself

use crate::config::RemoteCommand;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionErrorKind {
    Timeout,
    ConnectionFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("timed out after {}s (network/firewall?)", .after.as_secs_f64())]
    Timeout { after: Duration },
    #[error("{reason}")]
    ConnectionFailed { reason: String },
}

impl ExecutionError {
    pub fn kind(&self) -> ExecutionErrorKind {
        match self {
            ExecutionError::Timeout { .. } => ExecutionErrorKind::Timeout,
            ExecutionError::ConnectionFailed { .. } => ExecutionErrorKind::ConnectionFailed,
        }
    }

    pub fn connection(reason: impl Into<String>) -> Self {
        ExecutionError::ConnectionFailed {
            reason: reason.into(),
        }
    }
}

/// Anything able to run the GPU query on a host
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Returns captured stdout on success. Must give up after `timeout`.
    async fn execute(&self, host: &str, timeout: Duration) -> Result<String, ExecutionError>;
}

/// `program [options...] <host> <query_command>` as a child process
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    remote: RemoteCommand,
}

impl CommandExecutor {
    pub fn new(remote: RemoteCommand) -> Self {
        Self { remote }
    }

    fn command(&self, host: &str) -> AsyncCommand {
        let mut cmd = AsyncCommand::new(&self.remote.program);
        cmd.args(&self.remote.options)
            .arg(host)
            .arg(&self.remote.query_command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RemoteExecutor for CommandExecutor {
    #[instrument(skip(self))]
    async fn execute(&self, host: &str, timeout: Duration) -> Result<String, ExecutionError> {
        let start_time = Instant::now();

        let child = self.command(host).spawn().map_err(|e| {
            ExecutionError::connection(format!("failed to spawn {}: {e}", self.remote.program))
        })?;

        // Dropping the future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => {
                result.map_err(|e| ExecutionError::connection(format!("i/o error: {e}")))?
            }
            Err(_) => {
                debug!("query timed out after {:?}", timeout);
                return Err(ExecutionError::Timeout { after: timeout });
            }
        };

        debug!(
            "query finished in {}ms with {:?}",
            start_time.elapsed().as_millis(),
            output.status.code()
        );

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = last_line(&stderr)
            .map(str::to_string)
            .unwrap_or_else(|| match output.status.code() {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            });
        Err(ExecutionError::ConnectionFailed { reason })
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}

/// Looks the program up on `PATH` (or checks it directly if it has a separator)
pub fn program_available(program: &str) -> bool {
    let candidate = std::path::Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}
