//! Protocol message types.
//!
//! Every type here is an immutable value with a stable wire form. See
//! [`crate::serdes`] for the encoding rules.

pub mod catalog;
pub mod commands;
pub mod error_info;
pub mod execution;
pub mod instance;
pub mod origin;
pub mod results;

pub use catalog::Message;
pub use commands::{
    ApiCommand, CanCancelExecutionRequest, CancelExecutionRequest, ExecuteExternalJobArgs,
    ExecuteRunArgs, ExecuteStepArgs, ExecutionPlanSnapshotArgs, ExternalJobArgs,
    ExternalScheduleExecutionArgs, JobSubsetSnapshotArgs, ListRepositoriesInput, NotebookPathArgs,
    PartitionArgs, PartitionNamesArgs, PartitionSetExecutionParamArgs, ResumeRunArgs,
    SensorExecutionArgs, DEFAULT_MODE_NAME,
};
pub use error_info::ErrorCapsule;
pub use execution::{AssetKey, KnownExecutionState, PastExecutionState, RetryMode, StepOutputHandle};
pub use instance::{ConfigurableClassData, InstanceRef};
pub use origin::{
    CodeLocationOrigin, CodePointer, ExternalJobOrigin, FileCodePointer,
    GrpcServerCodeLocationOrigin, InProcessCodeLocationOrigin, JobOrigin, ModuleCodePointer,
    PackageCodePointer, RepositoryOrigin, RepositoryPythonOrigin, DEFAULT_WORKER_MODULE,
};
pub use results::{
    CanCancelExecutionResult, CancelExecutionResult, GetCurrentImageResult, GetCurrentRunsResult,
    ListRepositoriesResponse, LoadableRepositorySymbol, ShutdownServerResult, StartRunResult,
};
