//! Orchestrator-side cancellation and liveness calls.

use std::sync::Arc;

use crate::error::Error;
use crate::server::api::WorkerApi;
use crate::types::{
    CanCancelExecutionRequest, CanCancelExecutionResult, CancelExecutionRequest,
    CancelExecutionResult, ErrorCapsule, GetCurrentImageResult, GetCurrentRunsResult,
    ShutdownServerResult,
};

fn capsule(err: &Error) -> ErrorCapsule {
    ErrorCapsule::capture_typed(err)
}

/// Issues cancellation and liveness calls against a worker.
///
/// Calls never fail: a worker that cannot be reached yields a result
/// carrying an [`ErrorCapsule`] describing the transport failure.
#[derive(Debug)]
pub struct CancellationClient<W: ?Sized> {
    api: Arc<W>,
}

impl<W: ?Sized> Clone for CancellationClient<W> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
        }
    }
}

impl<W: WorkerApi + ?Sized> CancellationClient<W> {
    /// Client over `api`.
    pub fn new(api: Arc<W>) -> Self {
        Self { api }
    }

    /// Whether `run_id` can still be canceled. An unreachable worker
    /// answers `false`.
    pub async fn can_cancel(&self, run_id: &str) -> CanCancelExecutionResult {
        match self
            .api
            .can_cancel_execution(CanCancelExecutionRequest::new(run_id))
            .await
        {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(run_id, error = %err, "can-cancel query failed");
                CanCancelExecutionResult { can_cancel: false }
            },
        }
    }

    /// Ask the worker to cancel `run_id`.
    pub async fn cancel(&self, run_id: &str) -> CancelExecutionResult {
        tracing::info!(run_id, "requesting cancellation");
        match self
            .api
            .cancel_execution(CancelExecutionRequest::new(run_id))
            .await
        {
            Ok(result) => {
                if !result.success {
                    tracing::debug!(run_id, message = ?result.message, "cancellation not performed");
                }
                result
            },
            Err(err) => {
                tracing::warn!(run_id, error = %err, "cancel request failed");
                CancelExecutionResult::failed(capsule(&err))
            },
        }
    }

    /// Ask the worker to shut down.
    pub async fn shutdown(&self) -> ShutdownServerResult {
        match self.api.shutdown_server().await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(error = %err, "shutdown request failed");
                ShutdownServerResult::failed(capsule(&err))
            },
        }
    }

    /// Image the worker reports.
    pub async fn current_image(&self) -> GetCurrentImageResult {
        self.api
            .get_current_image()
            .await
            .unwrap_or_else(|err| GetCurrentImageResult {
                current_image: None,
                error_capsule: Some(capsule(&err)),
            })
    }

    /// Runs the worker reports in flight.
    pub async fn current_runs(&self) -> GetCurrentRunsResult {
        self.api
            .get_current_runs()
            .await
            .unwrap_or_else(|err| GetCurrentRunsResult {
                current_run_ids: Vec::new(),
                error_capsule: Some(capsule(&err)),
            })
    }

    /// Compare the worker's image with `expected`.
    ///
    /// Returns `None` when the worker does not report an image.
    pub async fn image_drift(&self, expected: &str) -> Option<bool> {
        let reported = self.current_image().await.current_image?;
        let drifted = reported != expected;
        if drifted {
            tracing::warn!(expected, reported = %reported, "worker image drifted");
        }
        Some(drifted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, TransportError};
    use crate::server::runs::RunTracker;
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl WorkerApi for Unreachable {
        async fn can_cancel_execution(
            &self,
            _request: CanCancelExecutionRequest,
        ) -> Result<CanCancelExecutionResult> {
            Err(TransportError::Spawn("connection refused".to_string()).into())
        }

        async fn cancel_execution(
            &self,
            _request: CancelExecutionRequest,
        ) -> Result<CancelExecutionResult> {
            Err(TransportError::Spawn("connection refused".to_string()).into())
        }

        async fn shutdown_server(&self) -> Result<ShutdownServerResult> {
            Err(TransportError::Spawn("connection refused".to_string()).into())
        }

        async fn get_current_image(&self) -> Result<GetCurrentImageResult> {
            Err(TransportError::Spawn("connection refused".to_string()).into())
        }

        async fn get_current_runs(&self) -> Result<GetCurrentRunsResult> {
            Err(TransportError::Spawn("connection refused".to_string()).into())
        }
    }

    #[tokio::test]
    async fn transport_failures_become_capsules() {
        let client = CancellationClient::new(Arc::new(Unreachable));

        assert!(!client.can_cancel("r1").await.can_cancel);

        let cancel = client.cancel("r1").await;
        assert!(!cancel.success);
        let capsule = cancel.error_capsule.unwrap();
        assert_eq!(capsule.cls_name.as_deref(), Some("Error"));
        assert!(capsule.message.contains("connection refused"));

        assert!(client.shutdown().await.error_capsule.is_some());
        assert!(client.current_runs().await.error_capsule.is_some());
        assert_eq!(client.image_drift("img").await, None);
    }

    #[tokio::test]
    async fn works_over_trait_objects() {
        let tracker = RunTracker::build(Some("img:2".to_string()), std::time::Duration::from_secs(1));
        let run = tracker.begin_run("r1").unwrap();
        let api: Arc<dyn WorkerApi> = Arc::new(tracker);
        let client = CancellationClient::new(api);

        assert!(client.can_cancel("r1").await.can_cancel);
        assert!(client.cancel("r1").await.success);
        assert!(run.is_cancel_requested());
        assert_eq!(client.current_runs().await.current_run_ids, vec!["r1"]);
        assert_eq!(client.image_drift("img:1").await, Some(true));
    }
}
