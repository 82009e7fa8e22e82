//! # stepwire
//!
//! Control-plane protocol between a run orchestrator and the isolated
//! worker processes that execute a job's steps.
//!
//! The orchestrator never shares memory with a worker. It resolves *where*
//! the job's code lives, encodes a command as a versioned JSON record,
//! launches the worker with that payload on its command line (or through a
//! compressed environment side channel when the payload is large) and
//! later steers the run through cancellation and liveness calls. Failures
//! travel back as [`ErrorCapsule`](types::ErrorCapsule)s: portable,
//! language-neutral snapshots of an error chain.
//!
//! # Module Organization
//!
//! - [`types`] - every wire record: origins, commands, results, error capsules
//! - [`serdes`] - the versioned, rename-tolerant record codec
//! - [`shared`] - payload delivery and worker process launching
//! - [`client`] - orchestrator side: run lifecycle and cancellation
//! - [`server`] - worker side: command-line parsing and run bookkeeping
//! - [`config`] - tunables loaded from TOML and the environment
//!
//! # Example
//!
//! ```
//! use stepwire::client::{RunController, RunState};
//! use stepwire::server::{WorkerInvocation, WorkerRequest};
//! use stepwire::types::{CodePointer, JobOrigin, RepositoryPythonOrigin};
//!
//! let origin = JobOrigin::new(
//!     "etl",
//!     RepositoryPythonOrigin::new("python3", CodePointer::module("jobs", "defs")),
//! );
//! let mut run = RunController::new("r1", origin);
//! let launch = run.execute_run(false).unwrap();
//! assert_eq!(run.state(), RunState::Dispatched);
//!
//! // On the worker side the same argument vector decodes back.
//! let invocation = WorkerInvocation::parse(&launch.args, &launch.env).unwrap();
//! match invocation.decode().unwrap() {
//!     WorkerRequest::ExecuteRun(args) => assert_eq!(args.run_id, "r1"),
//!     other => panic!("unexpected request {other:?}"),
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
#[cfg(feature = "logging")]
pub mod logging;
pub mod serdes;
pub mod server;
pub mod shared;
pub mod types;

pub use config::ProtocolConfig;
pub use error::{Error, Result};
#[cfg(feature = "logging")]
pub use logging::init_logging;
