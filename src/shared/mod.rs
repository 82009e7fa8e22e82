//! Plumbing shared by both sides of the protocol: payload delivery and
//! worker process launching.

pub mod channel;
pub mod spawn;

pub use channel::{ChannelSelector, Delivery, EnvSource, LaunchCommand, ProcessEnv};
pub use spawn::{ProcessSpawner, SpawnOutcome, WorkerSpawner};
