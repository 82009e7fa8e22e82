//! Worker-side bookkeeping of in-flight runs.
//!
//! [`RunTracker`] admits runs, hands each one a [`RunHandle`] carrying a
//! cancellation token, and answers the [`WorkerApi`] calls from its table.
//! Cancellation is cooperative: the tracker only signals the token, the
//! run's own code observes it at safe points.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tokio_util::task::TaskTracker;

use crate::client::lifecycle::TerminalStatus;
use crate::config::ProtocolConfig;
use crate::error::Result;
use crate::server::api::WorkerApi;
use crate::types::{
    CanCancelExecutionRequest, CanCancelExecutionResult, CancelExecutionRequest,
    CancelExecutionResult, ErrorCapsule, GetCurrentImageResult, GetCurrentRunsResult,
    ShutdownServerResult, StartRunResult,
};

/// How long shutdown waits for in-flight runs to release their handles.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// How many finished runs a tracker remembers for `resume` and `cancel`.
pub const DEFAULT_FINISHED_RUN_RETENTION: usize = 1024;

/// Why a run was not admitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// The worker received a shutdown request.
    #[error("worker is shutting down and accepts no new runs")]
    ShuttingDown,

    /// The run is already tracked by this worker.
    #[error("run {0} is already in progress on this worker")]
    AlreadyRunning(String),
}

impl From<AdmissionError> for StartRunResult {
    fn from(err: AdmissionError) -> Self {
        StartRunResult::failed(err.to_string(), None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunStatus {
    InFlight,
    CancelRequested,
    Finished(TerminalStatus),
}

#[derive(Debug)]
struct RunEntry {
    status: RunStatus,
    token: CancellationToken,
}

/// Run entries plus the order finished runs were recorded in. Only the
/// newest `retention` finished runs are kept.
#[derive(Debug)]
struct RunTable {
    entries: HashMap<String, RunEntry>,
    finished: VecDeque<String>,
    retention: usize,
}

impl RunTable {
    fn new(retention: usize) -> Self {
        Self {
            entries: HashMap::new(),
            finished: VecDeque::new(),
            retention,
        }
    }

    fn get(&self, run_id: &str) -> Option<&RunEntry> {
        self.entries.get(run_id)
    }

    fn get_mut(&mut self, run_id: &str) -> Option<&mut RunEntry> {
        self.entries.get_mut(run_id)
    }

    fn admit(&mut self, run_id: &str, token: CancellationToken) {
        let replaced = self.entries.insert(
            run_id.to_string(),
            RunEntry {
                status: RunStatus::InFlight,
                token,
            },
        );
        if replaced.is_some() {
            self.finished.retain(|id| id != run_id);
        }
    }

    fn mark_finished(&mut self, run_id: &str) {
        self.finished.push_back(run_id.to_string());
        self.prune();
    }

    fn prune(&mut self) {
        while self.finished.len() > self.retention {
            let Some(oldest) = self.finished.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            tracing::debug!(run_id = %oldest, "forgot finished run");
        }
    }
}

#[derive(Debug)]
struct Shared {
    runs: Mutex<RunTable>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    current_image: Option<String>,
    drain_timeout: Duration,
}

impl Shared {
    fn record_finish(&self, run_id: &str, status: TerminalStatus) {
        let mut runs = self.runs.lock();
        let Some(entry) = runs.get_mut(run_id) else {
            return;
        };
        if !matches!(entry.status, RunStatus::Finished(_)) {
            entry.status = RunStatus::Finished(status);
            tracing::info!(run_id, %status, "run finished");
            runs.mark_finished(run_id);
        }
    }
}

/// Outcome of a resume request.
#[derive(Debug)]
pub enum ResumeDecision {
    /// The run already ended; report this status instead of executing.
    AlreadyFinished(TerminalStatus),
    /// The run is still executing on this worker.
    AlreadyRunning,
    /// The run is unknown to this worker; execute it with this handle.
    Execute(RunHandle),
}

/// A run admitted by a [`RunTracker`].
///
/// Dropping the handle without calling [`finish`](Self::finish) records the
/// run as failed, or as canceled if cancellation was requested.
#[derive(Debug)]
pub struct RunHandle {
    run_id: String,
    token: CancellationToken,
    shared: Arc<Shared>,
    finished: bool,
    _task: TaskTrackerToken,
}

impl RunHandle {
    /// Run identifier.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Token the run's code polls or awaits for cancellation.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// `true` once cancellation was requested or the worker is shutting down.
    pub fn is_cancel_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Record the run's terminal status and release the handle.
    pub fn finish(mut self, status: TerminalStatus) {
        self.shared.record_finish(&self.run_id, status);
        self.finished = true;
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if !self.finished {
            let status = if self.token.is_cancelled() {
                TerminalStatus::Canceled
            } else {
                TerminalStatus::Failure
            };
            self.shared.record_finish(&self.run_id, status);
        }
    }
}

/// Tracks the runs executing in one worker.
///
/// Cloning yields another handle onto the same table.
///
/// # Examples
///
/// ```
/// use stepwire::client::TerminalStatus;
/// use stepwire::server::RunTracker;
///
/// let tracker = RunTracker::new();
/// let run = tracker.begin_run("r1").unwrap();
/// assert!(tracker.can_cancel("r1"));
///
/// assert!(tracker.cancel("r1").success);
/// assert!(run.is_cancel_requested());
/// run.finish(TerminalStatus::Canceled);
///
/// let again = tracker.cancel("r1");
/// assert!(!again.success);
/// assert!(again.error_capsule.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct RunTracker {
    shared: Arc<Shared>,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RunTracker {
    /// Tracker with no current image and the default drain timeout.
    pub fn new() -> Self {
        Self::build(None, DEFAULT_DRAIN_TIMEOUT)
    }

    /// Tracker reporting the configured current image and keeping the
    /// configured number of finished runs.
    pub fn from_config(config: &ProtocolConfig) -> Self {
        Self::build(config.current_image.clone(), DEFAULT_DRAIN_TIMEOUT)
            .with_finished_retention(config.finished_run_retention)
    }

    /// Tracker with an explicit image and drain timeout.
    pub fn build(current_image: Option<String>, drain_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                runs: Mutex::new(RunTable::new(DEFAULT_FINISHED_RUN_RETENTION)),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
                current_image,
                drain_timeout,
            }),
        }
    }

    /// Keep at most `limit` finished runs. Older ones are forgotten, after
    /// which `resume` treats them as new and `cancel` as unknown.
    pub fn with_finished_retention(self, limit: usize) -> Self {
        {
            let mut runs = self.shared.runs.lock();
            runs.retention = limit;
            runs.prune();
        }
        self
    }

    /// Number of runs in the table, in flight or finished.
    pub fn tracked_runs(&self) -> usize {
        self.shared.runs.lock().entries.len()
    }

    /// `true` after a shutdown request.
    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Admit a run.
    pub fn begin_run(&self, run_id: &str) -> std::result::Result<RunHandle, AdmissionError> {
        if self.is_shutting_down() {
            return Err(AdmissionError::ShuttingDown);
        }

        let mut runs = self.shared.runs.lock();
        if let Some(entry) = runs.get(run_id) {
            if !matches!(entry.status, RunStatus::Finished(_)) {
                return Err(AdmissionError::AlreadyRunning(run_id.to_string()));
            }
        }

        let token = self.shared.shutdown.child_token();
        runs.admit(run_id, token.clone());
        tracing::info!(run_id, "run admitted");

        Ok(RunHandle {
            run_id: run_id.to_string(),
            token,
            shared: Arc::clone(&self.shared),
            finished: false,
            _task: self.shared.tasks.token(),
        })
    }

    /// Decide how to handle a resume request.
    ///
    /// A run that already reached a terminal state is reported, not re-run.
    pub fn resume(&self, run_id: &str) -> std::result::Result<ResumeDecision, AdmissionError> {
        match self.status(run_id) {
            Some(RunStatus::Finished(status)) => {
                tracing::info!(run_id, %status, "resume of finished run reports recorded state");
                Ok(ResumeDecision::AlreadyFinished(status))
            },
            Some(RunStatus::InFlight | RunStatus::CancelRequested) => {
                Ok(ResumeDecision::AlreadyRunning)
            },
            None => self.begin_run(run_id).map(ResumeDecision::Execute),
        }
    }

    fn status(&self, run_id: &str) -> Option<RunStatus> {
        self.shared.runs.lock().get(run_id).map(|entry| entry.status)
    }

    /// Recorded terminal status of a run.
    pub fn terminal_status(&self, run_id: &str) -> Option<TerminalStatus> {
        match self.status(run_id)? {
            RunStatus::Finished(status) => Some(status),
            _ => None,
        }
    }

    /// `true` while the run is in flight and not yet asked to stop.
    pub fn can_cancel(&self, run_id: &str) -> bool {
        self.status(run_id) == Some(RunStatus::InFlight)
    }

    /// Request cancellation of a run.
    pub fn cancel(&self, run_id: &str) -> CancelExecutionResult {
        let mut runs = self.shared.runs.lock();
        let Some(entry) = runs.get_mut(run_id) else {
            return CancelExecutionResult::rejected(format!(
                "Run {run_id} is not in progress on this worker"
            ));
        };

        match entry.status {
            RunStatus::InFlight => {
                entry.token.cancel();
                entry.status = RunStatus::CancelRequested;
                tracing::info!(run_id, "cancellation requested");
                CancelExecutionResult::canceled()
            },
            RunStatus::CancelRequested => CancelExecutionResult::rejected(format!(
                "Cancellation of run {run_id} was already requested"
            )),
            RunStatus::Finished(status) => {
                CancelExecutionResult::rejected(format!("Run {run_id} already finished ({status})"))
            },
        }
    }

    /// Ids of runs in flight, sorted.
    pub fn current_runs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .shared
            .runs
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| !matches!(entry.status, RunStatus::Finished(_)))
            .map(|(run_id, _)| run_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Image the worker runs in.
    pub fn current_image(&self) -> Option<&str> {
        self.shared.current_image.as_deref()
    }

    /// Stop admitting runs, cancel in-flight ones and wait for their handles
    /// to be released.
    pub async fn shutdown(&self) -> ShutdownServerResult {
        let in_flight = self.current_runs();
        tracing::info!(?in_flight, "worker shutting down");

        self.shared.shutdown.cancel();
        self.shared.tasks.close();
        let limit = self.shared.drain_timeout;
        match tokio::time::timeout(limit, self.shared.tasks.wait()).await {
            Ok(()) => ShutdownServerResult::ok(),
            Err(_) => {
                tracing::warn!(?limit, "in-flight runs did not drain before shutdown timeout");
                ShutdownServerResult::failed(ErrorCapsule::timeout(limit))
            },
        }
    }
}

#[async_trait]
impl WorkerApi for RunTracker {
    async fn can_cancel_execution(
        &self,
        request: CanCancelExecutionRequest,
    ) -> Result<CanCancelExecutionResult> {
        Ok(CanCancelExecutionResult {
            can_cancel: self.can_cancel(&request.run_id),
        })
    }

    async fn cancel_execution(
        &self,
        request: CancelExecutionRequest,
    ) -> Result<CancelExecutionResult> {
        Ok(self.cancel(&request.run_id))
    }

    async fn shutdown_server(&self) -> Result<ShutdownServerResult> {
        Ok(self.shutdown().await)
    }

    async fn get_current_image(&self) -> Result<GetCurrentImageResult> {
        Ok(GetCurrentImageResult {
            current_image: self.shared.current_image.clone(),
            error_capsule: None,
        })
    }

    async fn get_current_runs(&self) -> Result<GetCurrentRunsResult> {
        Ok(GetCurrentRunsResult {
            current_run_ids: self.current_runs(),
            error_capsule: None,
        })
    }
}
