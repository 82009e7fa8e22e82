//! Run lifecycle from dispatch through the worker and back.

use std::collections::BTreeSet;

use pretty_assertions::assert_eq;

use stepwire::client::{RunController, RunState, StepDispatch, TerminalStatus};
use stepwire::server::{ResumeDecision, RunTracker, WorkerInvocation, WorkerRequest};
use stepwire::shared::channel::ChannelSelector;
use stepwire::types::{
    CodePointer, ErrorCapsule, InstanceRef, JobOrigin, KnownExecutionState, RepositoryPythonOrigin,
    RetryMode, StartRunResult, StepOutputHandle,
};
use stepwire::Error;

fn origin() -> JobOrigin {
    JobOrigin::new(
        "etl",
        RepositoryPythonOrigin::new("python3", CodePointer::module("jobs", "defs")),
    )
}

fn graph() -> BTreeSet<String> {
    ["extract", "transform", "load"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// What a worker does on receipt of a launch: parse, admit, report.
fn worker_receives(tracker: &RunTracker, launch: &stepwire::shared::LaunchCommand) -> StartRunResult {
    let request = WorkerInvocation::parse(&launch.args, &launch.env)
        .and_then(|invocation| invocation.decode());
    let request = match request {
        Ok(request) => request,
        Err(err) => {
            return StartRunResult::failed("cannot read command", Some(ErrorCapsule::capture(&err)))
        },
    };

    match request {
        WorkerRequest::ExecuteRun(args) => match tracker.begin_run(&args.run_id) {
            Ok(handle) => {
                handle.finish(TerminalStatus::Success);
                StartRunResult::started()
            },
            Err(err) => err.into(),
        },
        WorkerRequest::ResumeRun(args) => match tracker.resume(&args.run_id) {
            Ok(ResumeDecision::Execute(handle)) => {
                handle.finish(TerminalStatus::Success);
                StartRunResult::started()
            },
            Ok(ResumeDecision::AlreadyFinished(_) | ResumeDecision::AlreadyRunning) => {
                StartRunResult::started()
            },
            Err(err) => err.into(),
        },
        WorkerRequest::ExecuteStep(_) => StartRunResult::started(),
    }
}

#[test]
fn dispatch_run_and_finish() {
    let tracker = RunTracker::new();
    let mut run = RunController::new("r1", origin()).with_instance_ref(InstanceRef::local("/tmp/sw"));

    let launch = run.execute_run(true).unwrap();
    let reply = worker_receives(&tracker, &launch);
    assert_eq!(run.observe_start(&reply).unwrap(), RunState::Running);

    run.finish(TerminalStatus::Success).unwrap();
    assert!(run.state().is_terminal());
    assert_eq!(tracker.terminal_status("r1"), Some(TerminalStatus::Success));
}

#[test]
fn resume_after_orchestrator_restart_reports_recorded_state() {
    let tracker = RunTracker::new();
    let mut first = RunController::new("r1", origin());
    let launch = first.execute_run(false).unwrap();
    worker_receives(&tracker, &launch);

    // A new orchestrator only knows the run was dispatched.
    let mut restored = RunController::restore(
        "r1",
        origin(),
        RunState::Dispatched,
        KnownExecutionState::default(),
    );
    let launch = restored.resume_run(false).unwrap();
    assert_eq!(restored.state(), RunState::ResumedDispatched);
    assert_eq!(launch.args[3..5], ["api", "resume_run"]);

    match tracker.resume("r1").unwrap() {
        ResumeDecision::AlreadyFinished(status) => assert_eq!(status, TerminalStatus::Success),
        other => panic!("expected recorded terminal state, got {other:?}"),
    }
    let reply = worker_receives(&tracker, &launch);
    assert_eq!(restored.observe_start(&reply).unwrap(), RunState::Running);
}

#[test]
fn failed_start_carries_capsule() {
    let tracker = RunTracker::new();
    let _busy = tracker.begin_run("r1").unwrap();

    let mut run = RunController::new("r1", origin());
    let launch = run.execute_run(false).unwrap();
    let reply = worker_receives(&tracker, &launch);
    assert!(!reply.success);

    let state = run.observe_start(&reply).unwrap();
    assert_eq!(state, RunState::Terminal(TerminalStatus::Failure));
    assert!(run.failure().unwrap().message.contains("already in progress"));
}

#[test]
fn invalid_transitions_are_rejected() {
    let mut run = RunController::new("r1", origin());
    assert!(matches!(
        run.resume_run(false).unwrap_err(),
        Error::InvalidTransition {
            from: RunState::NotStarted,
            to: RunState::ResumedDispatched,
            ..
        }
    ));

    run.finish(TerminalStatus::Canceled).unwrap();
    assert!(run.execute_run(false).is_err());
    assert!(run.execute_step(&graph(), StepDispatch::all_steps()).is_err());
}

#[test]
fn step_dispatch_validates_keys() {
    let mut run = RunController::new("r1", origin());
    run.execute_run(false).unwrap();

    let err = run
        .execute_step(&graph(), StepDispatch::steps(["extract", "publish"]))
        .unwrap_err();
    match err {
        Error::UnknownStep { run_id, step_keys } => {
            assert_eq!(run_id, "r1");
            assert_eq!(step_keys, vec!["publish".to_string()]);
        },
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn step_dispatch_carries_known_state() {
    let mut run = RunController::new("r1", origin())
        .with_selector(ChannelSelector::default().with_inline_limit(32));
    run.execute_run(false).unwrap();
    run.record_step_success(StepOutputHandle::new("extract", "result"));
    run.record_retry("transform");
    run.record_dynamic_mapping("extract", "result", vec!["k1".to_string()]);

    let launch = run
        .execute_step(
            &graph(),
            StepDispatch::steps(["transform"])
                .with_retry_mode(RetryMode::Enabled)
                .with_verification(true),
        )
        .unwrap();

    let request = WorkerInvocation::parse(&launch.args, &launch.env)
        .unwrap()
        .decode()
        .unwrap();
    let WorkerRequest::ExecuteStep(args) = request else {
        panic!("expected a step request");
    };
    assert_eq!(args.step_keys_to_execute, Some(vec!["transform".to_string()]));
    assert_eq!(args.retry_mode, Some(RetryMode::Enabled));
    assert!(args.should_verify_step);

    let known = args.known_state.unwrap();
    assert!(known.is_step_complete("extract"));
    assert_eq!(known.retry_count("transform"), 1);
    assert_eq!(&known, run.known_state());
}

#[test]
fn empty_step_list_means_all_steps() {
    let run = RunController::new("r1", origin());
    let launch = run
        .execute_step(&graph(), StepDispatch::steps(Vec::<String>::new()))
        .unwrap();
    let request = WorkerInvocation::parse(&launch.args, &launch.env)
        .unwrap()
        .decode()
        .unwrap();
    let WorkerRequest::ExecuteStep(args) = request else {
        panic!("expected a step request");
    };
    assert_eq!(args.step_keys_to_execute, None);
}
