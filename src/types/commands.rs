//! Command messages sent from the orchestrator to a worker.
//!
//! Constructors validate the same invariants the decoder enforces, so a
//! command that can be built can also be read back by a peer.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::{Map, Value};

use crate::error::{Error, Result, SerdesError};
use crate::serdes::{wire_record, FieldReader, FieldSpec, FieldWriter, Record};
use crate::types::execution::{AssetKey, KnownExecutionState, RetryMode};
use crate::types::instance::InstanceRef;
use crate::types::origin::{CodeLocationOrigin, ExternalJobOrigin, JobOrigin, RepositoryOrigin};

/// Mode used when a snapshot request names none.
pub const DEFAULT_MODE_NAME: &str = "default";

/// Subcommands of the worker's `api` command group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiCommand {
    /// Execute a whole run in the worker process.
    ExecuteRun,
    /// Resume a run interrupted mid-flight.
    ResumeRun,
    /// Execute a subset of a run's steps.
    ExecuteStep,
}

impl ApiCommand {
    /// All subcommands.
    pub const ALL: [ApiCommand; 3] = [Self::ExecuteRun, Self::ResumeRun, Self::ExecuteStep];

    /// Subcommand name on the worker command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecuteRun => "execute_run",
            Self::ResumeRun => "resume_run",
            Self::ExecuteStep => "execute_step",
        }
    }

    /// Look a subcommand up by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|command| command.as_str() == name)
    }

    /// Whether this command's payload may move to the side channel.
    pub fn supports_side_channel(&self) -> bool {
        matches!(self, Self::ExecuteStep)
    }
}

impl fmt::Display for ApiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Older peers only understand `true` or an absent flag.
fn normalize_exit_code_flag(flag: Option<bool>) -> Option<bool> {
    flag.filter(|set| *set)
}

// ─── Run execution ──────────────────────────────────────────────────────────

/// Asks a worker for the execution plan of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlanSnapshotArgs {
    /// Job to plan.
    pub job_origin: ExternalJobOrigin,
    /// Op selection, empty for all.
    pub solid_selection: Vec<String>,
    /// Run configuration.
    pub run_config: Value,
    /// Steps to plan for, `None` for all.
    pub step_keys_to_execute: Option<Vec<String>>,
    /// Snapshot the plan must agree with.
    pub job_snapshot_id: String,
    /// Known state of a run in progress.
    pub known_state: Option<KnownExecutionState>,
    /// Orchestrator instance.
    pub instance_ref: Option<InstanceRef>,
    /// Asset selection, `None` for all.
    pub asset_selection: Option<BTreeSet<AssetKey>>,
    /// Execution mode.
    pub mode: String,
}

impl ExecutionPlanSnapshotArgs {
    /// Plan every step of `job_origin` with empty run config.
    pub fn new(job_origin: ExternalJobOrigin, job_snapshot_id: impl Into<String>) -> Self {
        Self {
            job_origin,
            solid_selection: Vec::new(),
            run_config: Value::Object(Map::new()),
            step_keys_to_execute: None,
            job_snapshot_id: job_snapshot_id.into(),
            known_state: None,
            instance_ref: None,
            asset_selection: None,
            mode: DEFAULT_MODE_NAME.to_string(),
        }
    }

    /// Set the run config.
    pub fn with_run_config(mut self, run_config: Value) -> Self {
        self.run_config = run_config;
        self
    }

    /// Restrict the plan to `step_keys`.
    pub fn with_step_keys(mut self, step_keys: Vec<String>) -> Self {
        self.step_keys_to_execute = Some(step_keys);
        self
    }

    /// Set the known state.
    pub fn with_known_state(mut self, known_state: KnownExecutionState) -> Self {
        self.known_state = Some(known_state);
        self
    }
}

impl Record for ExecutionPlanSnapshotArgs {
    const STORAGE_NAME: &'static str = "ExecutionPlanSnapshotArgs";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("job_origin").stored_as("pipeline_origin"),
        FieldSpec::optional("solid_selection"),
        FieldSpec::required("run_config"),
        FieldSpec::optional("step_keys_to_execute"),
        FieldSpec::required("job_snapshot_id").stored_as("pipeline_snapshot_id"),
        FieldSpec::optional("known_state"),
        FieldSpec::optional("instance_ref"),
        FieldSpec::optional("asset_selection"),
        FieldSpec::optional("mode"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("job_origin", &self.job_origin);
        fields.put("solid_selection", &self.solid_selection);
        fields.put("run_config", &self.run_config);
        fields.put("step_keys_to_execute", &self.step_keys_to_execute);
        fields.put("job_snapshot_id", &self.job_snapshot_id);
        fields.put("known_state", &self.known_state);
        fields.put("instance_ref", &self.instance_ref);
        fields.put("asset_selection", &self.asset_selection);
        fields.put("mode", &self.mode);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self {
            job_origin: fields.required("job_origin")?,
            solid_selection: fields.or_default("solid_selection", Vec::new())?,
            run_config: fields.required("run_config")?,
            step_keys_to_execute: fields.optional("step_keys_to_execute")?,
            job_snapshot_id: fields.required("job_snapshot_id")?,
            known_state: fields.optional("known_state")?,
            instance_ref: fields.optional("instance_ref")?,
            asset_selection: fields.optional("asset_selection")?,
            mode: fields.or_default("mode", DEFAULT_MODE_NAME.to_string())?,
        })
    }
}

/// Defines a whole-run command: `ExecuteRunArgs` and `ResumeRunArgs` share
/// their shape and differ only in class and subcommand.
macro_rules! run_command_args {
    ($(#[$meta:meta])* $name:ident, $class:literal, $command:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            /// Job to run.
            pub job_origin: JobOrigin,
            /// Run identifier.
            pub run_id: String,
            /// Orchestrator instance.
            pub instance_ref: Option<InstanceRef>,
            /// Exit non-zero when the run fails. Always `Some(true)` or `None`.
            pub set_exit_code_on_failure: Option<bool>,
        }

        impl $name {
            /// Create the command.
            pub fn new(
                job_origin: JobOrigin,
                run_id: impl Into<String>,
                instance_ref: Option<InstanceRef>,
            ) -> Self {
                Self {
                    job_origin,
                    run_id: run_id.into(),
                    instance_ref,
                    set_exit_code_on_failure: None,
                }
            }

            /// Request a failing exit code on run failure. `false` clears the flag.
            pub fn with_exit_code_on_failure(mut self, flag: bool) -> Self {
                self.set_exit_code_on_failure = normalize_exit_code_flag(Some(flag));
                self
            }

            /// Worker subcommand that consumes this payload.
            pub const COMMAND: ApiCommand = $command;
        }

        impl Record for $name {
            const STORAGE_NAME: &'static str = $class;
            const FIELDS: &'static [FieldSpec] = &[
                FieldSpec::required("job_origin").stored_as("pipeline_origin"),
                FieldSpec::required("run_id").stored_as("pipeline_run_id"),
                FieldSpec::optional("instance_ref"),
                FieldSpec::optional("set_exit_code_on_failure"),
            ];

            fn pack(&self, fields: &mut FieldWriter) {
                fields.put("job_origin", &self.job_origin);
                fields.put("run_id", &self.run_id);
                fields.put("instance_ref", &self.instance_ref);
                fields.put(
                    "set_exit_code_on_failure",
                    &normalize_exit_code_flag(self.set_exit_code_on_failure),
                );
            }

            fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
                Ok(Self {
                    job_origin: fields.required("job_origin")?,
                    run_id: fields.required("run_id")?,
                    instance_ref: fields.optional("instance_ref")?,
                    set_exit_code_on_failure: normalize_exit_code_flag(
                        fields.optional("set_exit_code_on_failure")?,
                    ),
                })
            }
        }
    };
}

run_command_args!(
    /// Execute a whole run in a fresh worker process.
    ExecuteRunArgs,
    "ExecuteRunArgs",
    ApiCommand::ExecuteRun
);

run_command_args!(
    /// Resume a run whose worker process was interrupted.
    ResumeRunArgs,
    "ResumeRunArgs",
    ApiCommand::ResumeRun
);

/// Execute a run through a served code location.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteExternalJobArgs {
    /// Job to run.
    pub job_origin: ExternalJobOrigin,
    /// Run identifier.
    pub run_id: String,
    /// Orchestrator instance.
    pub instance_ref: Option<InstanceRef>,
}

impl ExecuteExternalJobArgs {
    /// Create the command.
    pub fn new(
        job_origin: ExternalJobOrigin,
        run_id: impl Into<String>,
        instance_ref: Option<InstanceRef>,
    ) -> Self {
        Self {
            job_origin,
            run_id: run_id.into(),
            instance_ref,
        }
    }
}

impl Record for ExecuteExternalJobArgs {
    const STORAGE_NAME: &'static str = "ExecuteExternalPipelineArgs";
    const LEGACY_NAMES: &'static [&'static str] = &["ExecuteExternalJobArgs"];
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("job_origin").stored_as("pipeline_origin"),
        FieldSpec::required("run_id").stored_as("pipeline_run_id"),
        FieldSpec::optional("instance_ref"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("job_origin", &self.job_origin);
        fields.put("run_id", &self.run_id);
        fields.put("instance_ref", &self.instance_ref);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self {
            job_origin: fields.required("job_origin")?,
            run_id: fields.required("run_id")?,
            instance_ref: fields.optional("instance_ref")?,
        })
    }
}

/// Execute some steps of a run in a fresh worker process.
///
/// # Examples
///
/// ```
/// use stepwire::types::{CodePointer, ExecuteStepArgs, JobOrigin, RepositoryPythonOrigin};
///
/// let origin = JobOrigin::new(
///     "etl",
///     RepositoryPythonOrigin::new("python3", CodePointer::module("jobs", "defs")),
/// );
/// let args = ExecuteStepArgs::new(origin, "r1", Some(vec!["extract".to_string()]));
/// assert!(!args.should_verify_step);
/// assert!(args.retry_mode.is_none());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteStepArgs {
    /// Job the steps belong to.
    pub job_origin: JobOrigin,
    /// Run identifier.
    pub run_id: String,
    /// Steps to execute, `None` for all.
    pub step_keys_to_execute: Option<Vec<String>>,
    /// Orchestrator instance.
    pub instance_ref: Option<InstanceRef>,
    /// Retry handling inside the worker.
    pub retry_mode: Option<RetryMode>,
    /// Completed work the steps may depend on.
    pub known_state: Option<KnownExecutionState>,
    /// Check the step is still runnable before executing it.
    pub should_verify_step: bool,
}

impl ExecuteStepArgs {
    /// Create the command.
    pub fn new(
        job_origin: JobOrigin,
        run_id: impl Into<String>,
        step_keys_to_execute: Option<Vec<String>>,
    ) -> Self {
        Self {
            job_origin,
            run_id: run_id.into(),
            step_keys_to_execute,
            instance_ref: None,
            retry_mode: None,
            known_state: None,
            should_verify_step: false,
        }
    }

    /// Set the instance.
    pub fn with_instance_ref(mut self, instance_ref: InstanceRef) -> Self {
        self.instance_ref = Some(instance_ref);
        self
    }

    /// Set the retry mode.
    pub fn with_retry_mode(mut self, retry_mode: RetryMode) -> Self {
        self.retry_mode = Some(retry_mode);
        self
    }

    /// Set the known state.
    pub fn with_known_state(mut self, known_state: KnownExecutionState) -> Self {
        self.known_state = Some(known_state);
        self
    }

    /// Set step verification.
    pub fn with_step_verification(mut self, verify: bool) -> Self {
        self.should_verify_step = verify;
        self
    }
}

impl Record for ExecuteStepArgs {
    const STORAGE_NAME: &'static str = "ExecuteStepArgs";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("job_origin").stored_as("pipeline_origin"),
        FieldSpec::required("run_id").stored_as("pipeline_run_id"),
        FieldSpec::optional("step_keys_to_execute"),
        FieldSpec::optional("instance_ref"),
        FieldSpec::optional("retry_mode"),
        FieldSpec::optional("known_state"),
        FieldSpec::optional("should_verify_step"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("job_origin", &self.job_origin);
        fields.put("run_id", &self.run_id);
        fields.put("step_keys_to_execute", &self.step_keys_to_execute);
        fields.put("instance_ref", &self.instance_ref);
        fields.put("retry_mode", &self.retry_mode);
        fields.put("known_state", &self.known_state);
        fields.put("should_verify_step", &self.should_verify_step);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self {
            job_origin: fields.required("job_origin")?,
            run_id: fields.required("run_id")?,
            step_keys_to_execute: fields.optional("step_keys_to_execute")?,
            instance_ref: fields.optional("instance_ref")?,
            retry_mode: fields.optional("retry_mode")?,
            known_state: fields.optional("known_state")?,
            should_verify_step: fields.or_default("should_verify_step", false)?,
        })
    }
}

// ─── Code location queries ──────────────────────────────────────────────────

/// Asks a worker to enumerate the repositories in a module or file.
///
/// Exactly one of `module_name` and `python_file` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRepositoriesInput {
    /// Module to load.
    pub module_name: Option<String>,
    /// File to load.
    pub python_file: Option<String>,
    /// Directory to load from.
    pub working_directory: Option<String>,
    /// Single attribute to load.
    pub attribute: Option<String>,
}

impl ListRepositoriesInput {
    /// Create the request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOrigin`] when both or neither of
    /// `module_name` and `python_file` are set.
    pub fn new(
        module_name: Option<String>,
        python_file: Option<String>,
        working_directory: Option<String>,
        attribute: Option<String>,
    ) -> Result<Self> {
        check_single_target(module_name.as_deref(), python_file.as_deref())
            .map_err(Error::invalid_origin)?;
        Ok(Self {
            module_name,
            python_file,
            working_directory,
            attribute,
        })
    }

    /// Request for a module.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOrigin`] when `module_name` is empty.
    pub fn module(module_name: impl Into<String>) -> Result<Self> {
        Self::new(Some(module_name.into()), None, None, None)
    }

    /// Request for a file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOrigin`] when `python_file` is empty.
    pub fn file(python_file: impl Into<String>) -> Result<Self> {
        Self::new(None, Some(python_file.into()), None, None)
    }
}

fn check_single_target(
    module_name: Option<&str>,
    python_file: Option<&str>,
) -> std::result::Result<(), &'static str> {
    let is_set = |value: Option<&str>| value.is_some_and(|v| !v.is_empty());
    match (is_set(module_name), is_set(python_file)) {
        (true, true) => Err("set only one of module_name and python_file"),
        (false, false) => Err("set one of module_name or python_file"),
        _ => Ok(()),
    }
}

impl Record for ListRepositoriesInput {
    const STORAGE_NAME: &'static str = "ListRepositoriesInput";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::optional("module_name"),
        FieldSpec::optional("python_file"),
        FieldSpec::optional("working_directory"),
        FieldSpec::optional("attribute"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("module_name", &self.module_name);
        fields.put("python_file", &self.python_file);
        fields.put("working_directory", &self.working_directory);
        fields.put("attribute", &self.attribute);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        let module_name: Option<String> = fields.optional("module_name")?;
        let python_file: Option<String> = fields.optional("python_file")?;
        check_single_target(module_name.as_deref(), python_file.as_deref()).map_err(|reason| {
            SerdesError::Invariant {
                class: Self::STORAGE_NAME.to_string(),
                reason: reason.to_string(),
            }
        })?;
        Ok(Self {
            module_name,
            python_file,
            working_directory: fields.optional("working_directory")?,
            attribute: fields.optional("attribute")?,
        })
    }
}

/// Evaluate one partition of a partition set.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionArgs {
    /// Repository holding the partition set.
    pub repository_origin: RepositoryOrigin,
    /// Partition set name.
    pub partition_set_name: String,
    /// Partition name.
    pub partition_name: String,
    /// Orchestrator instance.
    pub instance_ref: Option<InstanceRef>,
}

impl PartitionArgs {
    /// Create the request.
    pub fn new(
        repository_origin: RepositoryOrigin,
        partition_set_name: impl Into<String>,
        partition_name: impl Into<String>,
    ) -> Self {
        Self {
            repository_origin,
            partition_set_name: partition_set_name.into(),
            partition_name: partition_name.into(),
            instance_ref: None,
        }
    }
}

impl Record for PartitionArgs {
    const STORAGE_NAME: &'static str = "PartitionArgs";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("repository_origin"),
        FieldSpec::required("partition_set_name"),
        FieldSpec::required("partition_name"),
        FieldSpec::optional("instance_ref"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("repository_origin", &self.repository_origin);
        fields.put("partition_set_name", &self.partition_set_name);
        fields.put("partition_name", &self.partition_name);
        fields.put("instance_ref", &self.instance_ref);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self {
            repository_origin: fields.required("repository_origin")?,
            partition_set_name: fields.required("partition_set_name")?,
            partition_name: fields.required("partition_name")?,
            instance_ref: fields.optional("instance_ref")?,
        })
    }
}

/// List the partition names of a partition set.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionNamesArgs {
    /// Repository holding the partition set.
    pub repository_origin: RepositoryOrigin,
    /// Partition set name.
    pub partition_set_name: String,
}

impl Record for PartitionNamesArgs {
    const STORAGE_NAME: &'static str = "PartitionNamesArgs";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("repository_origin"),
        FieldSpec::required("partition_set_name"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("repository_origin", &self.repository_origin);
        fields.put("partition_set_name", &self.partition_set_name);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self {
            repository_origin: fields.required("repository_origin")?,
            partition_set_name: fields.required("partition_set_name")?,
        })
    }
}

/// Build run parameters for several partitions at once.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionSetExecutionParamArgs {
    /// Repository holding the partition set.
    pub repository_origin: RepositoryOrigin,
    /// Partition set name.
    pub partition_set_name: String,
    /// Partitions to build parameters for.
    pub partition_names: Vec<String>,
    /// Orchestrator instance.
    pub instance_ref: Option<InstanceRef>,
}

impl Record for PartitionSetExecutionParamArgs {
    const STORAGE_NAME: &'static str = "PartitionSetExecutionParamArgs";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("repository_origin"),
        FieldSpec::required("partition_set_name"),
        FieldSpec::required("partition_names"),
        FieldSpec::optional("instance_ref"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("repository_origin", &self.repository_origin);
        fields.put("partition_set_name", &self.partition_set_name);
        fields.put("partition_names", &self.partition_names);
        fields.put("instance_ref", &self.instance_ref);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self {
            repository_origin: fields.required("repository_origin")?,
            partition_set_name: fields.required("partition_set_name")?,
            partition_names: fields.required("partition_names")?,
            instance_ref: fields.optional("instance_ref")?,
        })
    }
}

/// Evaluate a schedule tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalScheduleExecutionArgs {
    /// Repository holding the schedule.
    pub repository_origin: RepositoryOrigin,
    /// Orchestrator instance.
    pub instance_ref: Option<InstanceRef>,
    /// Schedule name.
    pub schedule_name: String,
    /// Tick time as seconds since the epoch.
    pub scheduled_timestamp: Option<f64>,
    /// Timezone the tick time is expressed in.
    pub scheduled_timezone: Option<String>,
}

impl Record for ExternalScheduleExecutionArgs {
    const STORAGE_NAME: &'static str = "ExternalScheduleExecutionArgs";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("repository_origin"),
        FieldSpec::optional("instance_ref"),
        FieldSpec::required("schedule_name"),
        FieldSpec::optional("scheduled_timestamp").stored_as("scheduled_execution_timestamp"),
        FieldSpec::optional("scheduled_timezone").stored_as("scheduled_execution_timezone"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("repository_origin", &self.repository_origin);
        fields.put("instance_ref", &self.instance_ref);
        fields.put("schedule_name", &self.schedule_name);
        fields.put("scheduled_timestamp", &self.scheduled_timestamp);
        fields.put("scheduled_timezone", &self.scheduled_timezone);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self {
            repository_origin: fields.required("repository_origin")?,
            instance_ref: fields.optional("instance_ref")?,
            schedule_name: fields.required("schedule_name")?,
            scheduled_timestamp: fields.optional("scheduled_timestamp")?,
            scheduled_timezone: fields.optional("scheduled_timezone")?,
        })
    }
}

/// Evaluate a sensor tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorExecutionArgs {
    /// Repository holding the sensor.
    pub repository_origin: RepositoryOrigin,
    /// Orchestrator instance.
    pub instance_ref: Option<InstanceRef>,
    /// Sensor name.
    pub sensor_name: String,
    /// Completion time of the previous tick.
    pub last_completion_time: Option<f64>,
    /// Run key requested by the previous tick.
    pub last_run_key: Option<String>,
    /// Sensor cursor.
    pub cursor: Option<String>,
}

impl Record for SensorExecutionArgs {
    const STORAGE_NAME: &'static str = "SensorExecutionArgs";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("repository_origin"),
        FieldSpec::optional("instance_ref"),
        FieldSpec::required("sensor_name"),
        FieldSpec::optional("last_completion_time"),
        FieldSpec::optional("last_run_key"),
        FieldSpec::optional("cursor"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("repository_origin", &self.repository_origin);
        fields.put("instance_ref", &self.instance_ref);
        fields.put("sensor_name", &self.sensor_name);
        fields.put("last_completion_time", &self.last_completion_time);
        fields.put("last_run_key", &self.last_run_key);
        fields.put("cursor", &self.cursor);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self {
            repository_origin: fields.required("repository_origin")?,
            instance_ref: fields.optional("instance_ref")?,
            sensor_name: fields.required("sensor_name")?,
            last_completion_time: fields.optional("last_completion_time")?,
            last_run_key: fields.optional("last_run_key")?,
            cursor: fields.optional("cursor")?,
        })
    }
}

/// Snapshot a job restricted to a selection.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSubsetSnapshotArgs {
    /// Job to snapshot.
    pub job_origin: ExternalJobOrigin,
    /// Op selection.
    pub solid_selection: Option<Vec<String>>,
    /// Asset selection.
    pub asset_selection: Option<Vec<AssetKey>>,
}

impl JobSubsetSnapshotArgs {
    /// Create the request. An empty `solid_selection` means no op selection.
    pub fn new(
        job_origin: ExternalJobOrigin,
        solid_selection: Option<Vec<String>>,
        asset_selection: Option<Vec<AssetKey>>,
    ) -> Self {
        Self {
            job_origin,
            solid_selection: non_empty_selection(solid_selection),
            asset_selection,
        }
    }
}

fn non_empty_selection(selection: Option<Vec<String>>) -> Option<Vec<String>> {
    selection.filter(|keys| !keys.is_empty())
}

impl Record for JobSubsetSnapshotArgs {
    const STORAGE_NAME: &'static str = "PipelineSubsetSnapshotArgs";
    const LEGACY_NAMES: &'static [&'static str] = &["JobSubsetSnapshotArgs"];
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("job_origin").stored_as("pipeline_origin"),
        FieldSpec::optional("solid_selection"),
        FieldSpec::optional("asset_selection"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("job_origin", &self.job_origin);
        fields.put(
            "solid_selection",
            &non_empty_selection(self.solid_selection.clone()),
        );
        fields.put("asset_selection", &self.asset_selection);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self::new(
            fields.required("job_origin")?,
            fields.optional("solid_selection")?,
            fields.optional("asset_selection")?,
        ))
    }
}

/// Fetch a notebook file from a code location.
#[derive(Debug, Clone, PartialEq)]
pub struct NotebookPathArgs {
    /// Location holding the notebook.
    pub code_location_origin: CodeLocationOrigin,
    /// Path of the notebook inside the location.
    pub notebook_path: String,
}

impl Record for NotebookPathArgs {
    const STORAGE_NAME: &'static str = "NotebookPathArgs";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("code_location_origin").stored_as("repository_location_origin"),
        FieldSpec::required("notebook_path"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("code_location_origin", &self.code_location_origin);
        fields.put("notebook_path", &self.notebook_path);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self {
            code_location_origin: fields.required("code_location_origin")?,
            notebook_path: fields.required("notebook_path")?,
        })
    }
}

/// Fetch the full definition of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalJobArgs {
    /// Repository holding the job.
    pub repository_origin: RepositoryOrigin,
    /// Orchestrator instance.
    pub instance_ref: InstanceRef,
    /// Job name.
    pub name: String,
}

impl Record for ExternalJobArgs {
    const STORAGE_NAME: &'static str = "ExternalJobArgs";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("repository_origin"),
        FieldSpec::required("instance_ref"),
        FieldSpec::required("name"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("repository_origin", &self.repository_origin);
        fields.put("instance_ref", &self.instance_ref);
        fields.put("name", &self.name);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self {
            repository_origin: fields.required("repository_origin")?,
            instance_ref: fields.required("instance_ref")?,
            name: fields.required("name")?,
        })
    }
}

// ─── Run control ────────────────────────────────────────────────────────────

/// Ask a worker to cancel a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelExecutionRequest {
    /// Run to cancel.
    pub run_id: String,
}

impl CancelExecutionRequest {
    /// Create the request.
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }
}

impl Record for CancelExecutionRequest {
    const STORAGE_NAME: &'static str = "CancelExecutionRequest";
    const FIELDS: &'static [FieldSpec] = &[FieldSpec::required("run_id")];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("run_id", &self.run_id);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self {
            run_id: fields.required("run_id")?,
        })
    }
}

/// Ask a worker whether a run can still be canceled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanCancelExecutionRequest {
    /// Run to query.
    pub run_id: String,
}

impl CanCancelExecutionRequest {
    /// Create the request.
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }
}

impl Record for CanCancelExecutionRequest {
    const STORAGE_NAME: &'static str = "CanCancelExecutionRequest";
    const FIELDS: &'static [FieldSpec] = &[FieldSpec::required("run_id")];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("run_id", &self.run_id);
    }

    fn unpack(fields: &FieldReader<'_>) -> std::result::Result<Self, SerdesError> {
        Ok(Self {
            run_id: fields.required("run_id")?,
        })
    }
}

wire_record!(
    ExecutionPlanSnapshotArgs,
    ExecuteRunArgs,
    ResumeRunArgs,
    ExecuteExternalJobArgs,
    ExecuteStepArgs,
    ListRepositoriesInput,
    PartitionArgs,
    PartitionNamesArgs,
    PartitionSetExecutionParamArgs,
    ExternalScheduleExecutionArgs,
    SensorExecutionArgs,
    JobSubsetSnapshotArgs,
    NotebookPathArgs,
    ExternalJobArgs,
    CancelExecutionRequest,
    CanCancelExecutionRequest,
);
