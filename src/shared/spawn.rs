//! Launching worker processes.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::ProtocolConfig;
use crate::error::{Result, TransportError};
use crate::shared::channel::LaunchCommand;
use crate::types::ErrorCapsule;

/// What a finished (or abandoned) worker process produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnOutcome {
    /// Exit code, when the process exited normally.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Why the process did not finish, if it did not.
    pub error: Option<ErrorCapsule>,
}

impl SpawnOutcome {
    /// Outcome of a process killed after `limit`.
    pub fn timed_out(limit: Duration) -> Self {
        Self {
            error: Some(ErrorCapsule::timeout(limit)),
            ..Self::default()
        }
    }

    /// `true` when the process exited with code zero.
    pub fn success(&self) -> bool {
        self.error.is_none() && self.exit_code == Some(0)
    }
}

/// Starts a worker for a launch command and waits for it.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    /// Run `command` to completion.
    ///
    /// Failing to start the process is an error. Anything that happens once
    /// it is running, a timeout included, is reported in the outcome.
    async fn spawn(&self, command: &LaunchCommand) -> Result<SpawnOutcome>;
}

/// [`WorkerSpawner`] backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpawner {
    timeout: Option<Duration>,
}

impl ProcessSpawner {
    /// Spawner with no timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawner using the configured timeout.
    pub fn from_config(config: &ProtocolConfig) -> Self {
        Self {
            timeout: config.spawn_timeout(),
        }
    }

    /// Kill workers that run longer than `limit`.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    async fn spawn(&self, command: &LaunchCommand) -> Result<SpawnOutcome> {
        let program = command
            .program()
            .ok_or_else(|| TransportError::Spawn("launch command is empty".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(command.arguments())
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{program}: {e}")))?;
        tracing::debug!(program, pid = ?child.id(), "worker started");

        let wait = child.wait_with_output();
        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(output) => output.map_err(TransportError::from)?,
                Err(_) => {
                    tracing::warn!(program, ?limit, "worker timed out and was killed");
                    return Ok(SpawnOutcome::timed_out(limit));
                },
            },
            None => wait.await.map_err(TransportError::from)?,
        };

        let outcome = SpawnOutcome {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            error: None,
        };
        tracing::debug!(program, exit_code = ?outcome.exit_code, "worker exited");
        Ok(outcome)
    }
}
