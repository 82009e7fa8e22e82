//! Worker side of the protocol.
//!
//! A worker process reads its command with [`WorkerInvocation`], registers
//! the run with a [`RunTracker`] and serves [`WorkerApi`] calls from the
//! orchestrator while the run executes.

pub mod api;
pub mod invocation;
pub mod runs;

pub use api::WorkerApi;
pub use invocation::{WorkerInvocation, WorkerRequest};
pub use runs::{AdmissionError, ResumeDecision, RunHandle, RunTracker};
