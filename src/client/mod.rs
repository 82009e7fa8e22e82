//! Orchestrator side of the protocol.
//!
//! - [`lifecycle`] drives one run from dispatch to a terminal state.
//! - [`cancellation`] issues cancellation and liveness calls to a worker.

pub mod cancellation;
pub mod lifecycle;

pub use cancellation::CancellationClient;
pub use lifecycle::{make_run_id, RunController, RunState, StepDispatch, StepGraph, TerminalStatus};
