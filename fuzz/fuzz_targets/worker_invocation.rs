//! Fuzz target for worker command-line parsing.
//!
//! Splits the input on NUL bytes into an argument vector (the first
//! segment doubles as side-channel content) and parses it as a worker
//! invocation. Errors are expected; panics are not.
//!
//! Run with: `cargo +nightly fuzz run worker_invocation`

#![no_main]
use std::collections::BTreeMap;

use libfuzzer_sys::fuzz_target;
use stepwire::server::WorkerInvocation;
use stepwire::shared::channel::DEFAULT_SIDE_CHANNEL_ENV_VAR;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let args: Vec<&str> = text.split('\0').collect();

    let mut env = BTreeMap::new();
    env.insert(DEFAULT_SIDE_CHANNEL_ENV_VAR.to_string(), args[0].to_string());

    if let Ok(invocation) = WorkerInvocation::parse(&args, &env) {
        let _ = invocation.decode();
    }
});
