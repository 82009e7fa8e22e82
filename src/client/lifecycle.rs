//! Orchestrator-side lifecycle of one run's remote execution.
//!
//! ```text
//! NotStarted -> Dispatched -> Running <-> ResumedDispatched
//!      |            |            |               |
//!      +------------+------------+---------------+--> Terminal(Success | Failure | Canceled)
//! ```
//!
//! `NotStarted` may only leave for `Dispatched` or `Terminal(Canceled)`.
//! Terminal states accept no transition and self-transitions are rejected.
//! The terminal transition itself is driven by the caller from the run's
//! event stream; this controller only builds dispatches and reconciles
//! resumption.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::error::{Error, Result};
use crate::shared::channel::{ChannelSelector, LaunchCommand};
use crate::types::{
    ErrorCapsule, ExecuteRunArgs, ExecuteStepArgs, InstanceRef, JobOrigin, KnownExecutionState,
    ResumeRunArgs, RetryMode, StartRunResult, StepOutputHandle,
};

/// Generate a run identifier.
pub fn make_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalStatus {
    /// Every step succeeded.
    Success,
    /// The run failed.
    Failure,
    /// The run was canceled.
    Canceled,
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// Where a run is in its remote execution.
///
/// # Examples
///
/// ```
/// use stepwire::client::{RunState, TerminalStatus};
///
/// assert!(RunState::NotStarted.can_transition_to(&RunState::Dispatched));
/// assert!(RunState::Running.can_transition_to(&RunState::ResumedDispatched));
/// assert!(!RunState::Running.can_transition_to(&RunState::Running));
/// assert!(!RunState::Terminal(TerminalStatus::Success).can_transition_to(&RunState::Running));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// Nothing has been sent yet.
    NotStarted,
    /// The run was handed to a worker.
    Dispatched,
    /// The worker reported the run started.
    Running,
    /// The run was re-dispatched after its status became unknown.
    ResumedDispatched,
    /// The run ended.
    Terminal(TerminalStatus),
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Dispatched => write!(f, "dispatched"),
            Self::Running => write!(f, "running"),
            Self::ResumedDispatched => write!(f, "resumed_dispatched"),
            Self::Terminal(status) => write!(f, "terminal({status})"),
        }
    }
}

impl RunState {
    /// `true` once the run has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    /// `true` if moving from this state to `next` is allowed.
    pub fn can_transition_to(&self, next: &Self) -> bool {
        if self == next {
            return false;
        }

        match self {
            Self::NotStarted => matches!(
                next,
                Self::Dispatched | Self::Terminal(TerminalStatus::Canceled)
            ),
            Self::Dispatched => matches!(
                next,
                Self::Running | Self::ResumedDispatched | Self::Terminal(_)
            ),
            Self::Running => matches!(next, Self::ResumedDispatched | Self::Terminal(_)),
            Self::ResumedDispatched => matches!(next, Self::Running | Self::Terminal(_)),
            Self::Terminal(_) => false,
        }
    }

    /// Check a transition, returning [`Error::InvalidTransition`] if it is
    /// not allowed.
    pub fn validate_transition(&self, run_id: &str, next: &Self) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                run_id: run_id.to_string(),
                from: *self,
                to: *next,
            })
        }
    }
}

/// The set of step keys a job's execution plan contains.
pub trait StepGraph {
    /// `true` if `step_key` is a step of the plan.
    fn contains_step(&self, step_key: &str) -> bool;
}

impl StepGraph for BTreeSet<String> {
    fn contains_step(&self, step_key: &str) -> bool {
        self.contains(step_key)
    }
}

impl StepGraph for HashSet<String> {
    fn contains_step(&self, step_key: &str) -> bool {
        self.contains(step_key)
    }
}

impl StepGraph for [&str] {
    fn contains_step(&self, step_key: &str) -> bool {
        self.iter().any(|key| *key == step_key)
    }
}

/// Which steps to execute and how.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepDispatch {
    /// Steps to execute. `None` or empty means every step.
    pub step_keys: Option<Vec<String>>,
    /// Retry handling inside the worker.
    pub retry_mode: Option<RetryMode>,
    /// Ask the worker to check run storage before executing.
    pub verify: bool,
}

impl StepDispatch {
    /// Dispatch of every step.
    pub fn all_steps() -> Self {
        Self::default()
    }

    /// Dispatch of `step_keys`.
    pub fn steps<I, S>(step_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            step_keys: Some(step_keys.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Set the retry mode.
    pub fn with_retry_mode(mut self, retry_mode: RetryMode) -> Self {
        self.retry_mode = Some(retry_mode);
        self
    }

    /// Set step verification.
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }
}

/// Builds the dispatches for one run and tracks its state.
///
/// # Examples
///
/// ```
/// use stepwire::client::{RunController, RunState};
/// use stepwire::types::{CodePointer, JobOrigin, RepositoryPythonOrigin, StartRunResult};
///
/// let origin = JobOrigin::new(
///     "etl",
///     RepositoryPythonOrigin::new("python3", CodePointer::module("jobs", "defs")),
/// );
/// let mut run = RunController::new("r1", origin);
///
/// let launch = run.execute_run(true).unwrap();
/// assert_eq!(launch.args[3..5], ["api", "execute_run"]);
/// assert_eq!(run.state(), RunState::Dispatched);
///
/// run.observe_start(&StartRunResult::started()).unwrap();
/// assert_eq!(run.state(), RunState::Running);
/// ```
#[derive(Debug, Clone)]
pub struct RunController {
    run_id: String,
    origin: JobOrigin,
    instance_ref: Option<InstanceRef>,
    known_state: KnownExecutionState,
    state: RunState,
    selector: ChannelSelector,
    failure: Option<ErrorCapsule>,
}

impl RunController {
    /// Controller for a run that has not been dispatched.
    pub fn new(run_id: impl Into<String>, origin: JobOrigin) -> Self {
        Self {
            run_id: run_id.into(),
            origin,
            instance_ref: None,
            known_state: KnownExecutionState::default(),
            state: RunState::NotStarted,
            selector: ChannelSelector::default(),
            failure: None,
        }
    }

    /// Controller for a new run with a freshly generated identifier.
    pub fn for_new_run(origin: JobOrigin) -> Self {
        Self::new(make_run_id(), origin)
    }

    /// Controller for a run observed in `state` by an earlier orchestrator.
    pub fn restore(
        run_id: impl Into<String>,
        origin: JobOrigin,
        state: RunState,
        known_state: KnownExecutionState,
    ) -> Self {
        Self {
            state,
            known_state,
            ..Self::new(run_id, origin)
        }
    }

    /// Set the instance passed to the worker.
    pub fn with_instance_ref(mut self, instance_ref: InstanceRef) -> Self {
        self.instance_ref = Some(instance_ref);
        self
    }

    /// Set the channel selector.
    pub fn with_selector(mut self, selector: ChannelSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Run identifier.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Current state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// State carried into the next step dispatch.
    pub fn known_state(&self) -> &KnownExecutionState {
        &self.known_state
    }

    /// Failure reported when the run could not start.
    pub fn failure(&self) -> Option<&ErrorCapsule> {
        self.failure.as_ref()
    }

    fn transition(&mut self, next: RunState) -> Result<()> {
        self.state.validate_transition(&self.run_id, &next)?;
        tracing::info!(run_id = %self.run_id, from = %self.state, to = %next, "run state changed");
        self.state = next;
        Ok(())
    }

    /// Build the launch for the whole run and mark it dispatched.
    pub fn execute_run(&mut self, set_exit_code_on_failure: bool) -> Result<LaunchCommand> {
        self.state
            .validate_transition(&self.run_id, &RunState::Dispatched)?;
        let args = ExecuteRunArgs::new(
            self.origin.clone(),
            self.run_id.clone(),
            self.instance_ref.clone(),
        )
        .with_exit_code_on_failure(set_exit_code_on_failure);
        let launch = self.selector.execute_run(&args)?;
        self.transition(RunState::Dispatched)?;
        Ok(launch)
    }

    /// Build the launch that resumes a run whose outcome is unknown.
    ///
    /// The worker reports the recorded terminal state instead of running
    /// again when the run already finished.
    pub fn resume_run(&mut self, set_exit_code_on_failure: bool) -> Result<LaunchCommand> {
        self.state
            .validate_transition(&self.run_id, &RunState::ResumedDispatched)?;
        let args = ResumeRunArgs::new(
            self.origin.clone(),
            self.run_id.clone(),
            self.instance_ref.clone(),
        )
        .with_exit_code_on_failure(set_exit_code_on_failure);
        let launch = self.selector.resume_run(&args)?;
        self.transition(RunState::ResumedDispatched)?;
        Ok(launch)
    }

    /// Build the launch for a subset of steps.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownStep`] if a requested key is not in `graph`, and
    /// [`Error::InvalidTransition`] if the run already ended.
    pub fn execute_step(
        &self,
        graph: &(impl StepGraph + ?Sized),
        dispatch: StepDispatch,
    ) -> Result<LaunchCommand> {
        if self.state.is_terminal() {
            return Err(Error::InvalidTransition {
                run_id: self.run_id.clone(),
                from: self.state,
                to: RunState::Running,
            });
        }

        let step_keys = dispatch.step_keys.filter(|keys| !keys.is_empty());
        if let Some(keys) = &step_keys {
            let unknown: Vec<String> = keys
                .iter()
                .filter(|key| !graph.contains_step(key))
                .cloned()
                .collect();
            if !unknown.is_empty() {
                return Err(Error::UnknownStep {
                    run_id: self.run_id.clone(),
                    step_keys: unknown,
                });
            }
        }

        let mut args = ExecuteStepArgs::new(self.origin.clone(), self.run_id.clone(), step_keys)
            .with_known_state(self.known_state.clone())
            .with_step_verification(dispatch.verify);
        args.instance_ref = self.instance_ref.clone();
        args.retry_mode = dispatch.retry_mode;

        tracing::debug!(
            run_id = %self.run_id,
            steps = ?args.step_keys_to_execute,
            verify = dispatch.verify,
            "dispatching steps"
        );
        self.selector.execute_step(&args)
    }

    fn update_known_state(
        &mut self,
        update: impl FnOnce(KnownExecutionState) -> KnownExecutionState,
    ) -> &KnownExecutionState {
        let current = std::mem::take(&mut self.known_state);
        self.known_state = update(current);
        &self.known_state
    }

    /// Record a durably stored step output.
    pub fn record_step_success(&mut self, handle: StepOutputHandle) -> &KnownExecutionState {
        self.update_known_state(|state| state.with_ready_output(handle))
    }

    /// Record a retry of `step_key`.
    pub fn record_retry(&mut self, step_key: impl Into<String>) -> &KnownExecutionState {
        let step_key = step_key.into();
        self.update_known_state(|state| state.with_retry_attempt(step_key))
    }

    /// Record the mapping keys a dynamic output emitted.
    pub fn record_dynamic_mapping(
        &mut self,
        step_key: impl Into<String>,
        output_name: impl Into<String>,
        mapping_keys: Vec<String>,
    ) -> &KnownExecutionState {
        let (step_key, output_name) = (step_key.into(), output_name.into());
        self.update_known_state(|state| {
            state.with_dynamic_mapping(step_key, output_name, mapping_keys)
        })
    }

    /// Apply the worker's reply to a run dispatch.
    pub fn observe_start(&mut self, result: &StartRunResult) -> Result<RunState> {
        if result.success {
            self.transition(RunState::Running)?;
        } else {
            let failure = result.error_capsule.clone().unwrap_or_else(|| {
                ErrorCapsule::new(
                    result
                        .message
                        .clone()
                        .unwrap_or_else(|| "run failed to start".to_string()),
                )
            });
            tracing::warn!(run_id = %self.run_id, error = %failure.message, "run failed to start");
            self.transition(RunState::Terminal(TerminalStatus::Failure))?;
            self.failure = Some(failure);
        }
        Ok(self.state)
    }

    /// Record the run's terminal status.
    pub fn finish(&mut self, status: TerminalStatus) -> Result<()> {
        self.transition(RunState::Terminal(status))
    }
}
