//! The control surface a worker exposes to the orchestrator.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    CanCancelExecutionRequest, CanCancelExecutionResult, CancelExecutionRequest,
    CancelExecutionResult, GetCurrentImageResult, GetCurrentRunsResult, ShutdownServerResult,
};

/// Cancellation and liveness calls served by a worker.
///
/// Every call is idempotent and safe to retry. Expected outcomes ("nothing
/// to cancel") are reported in the result; `Err` is reserved for failing
/// to reach the worker at all.
#[async_trait]
pub trait WorkerApi: Send + Sync {
    /// Whether the run can still be canceled. No side effects.
    async fn can_cancel_execution(
        &self,
        request: CanCancelExecutionRequest,
    ) -> Result<CanCancelExecutionResult>;

    /// Ask the run to stop at its next safe point.
    async fn cancel_execution(&self, request: CancelExecutionRequest)
        -> Result<CancelExecutionResult>;

    /// Stop accepting runs, signal in-flight runs and drain bookkeeping.
    async fn shutdown_server(&self) -> Result<ShutdownServerResult>;

    /// Image the worker is running in.
    async fn get_current_image(&self) -> Result<GetCurrentImageResult>;

    /// Runs currently in flight.
    async fn get_current_runs(&self) -> Result<GetCurrentRunsResult>;
}
