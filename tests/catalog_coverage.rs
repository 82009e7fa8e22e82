//! Every catalog message, sparse and fully populated, through the codec.

use std::collections::{BTreeMap, BTreeSet};

use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::{json, Value};

use stepwire::types::{
    AssetKey, CanCancelExecutionRequest, CanCancelExecutionResult, CancelExecutionRequest,
    CancelExecutionResult, CodeLocationOrigin, CodePointer, ConfigurableClassData, ErrorCapsule,
    ExecuteExternalJobArgs, ExecuteRunArgs, ExecuteStepArgs, ExecutionPlanSnapshotArgs,
    ExternalJobArgs, ExternalJobOrigin, ExternalScheduleExecutionArgs, GetCurrentImageResult,
    GetCurrentRunsResult, GrpcServerCodeLocationOrigin, InProcessCodeLocationOrigin, InstanceRef,
    JobOrigin, JobSubsetSnapshotArgs, KnownExecutionState, ListRepositoriesInput,
    ListRepositoriesResponse, LoadableRepositorySymbol, Message, NotebookPathArgs, PartitionArgs,
    PartitionNamesArgs, PartitionSetExecutionParamArgs, PastExecutionState, RepositoryOrigin,
    RepositoryPythonOrigin, ResumeRunArgs, RetryMode, SensorExecutionArgs, ShutdownServerResult,
    StartRunResult, StepOutputHandle,
};

// ─── Fixtures ───────────────────────────────────────────────────────────────

fn python_origin() -> RepositoryPythonOrigin {
    RepositoryPythonOrigin::new("python3", CodePointer::module("jobs", "defs"))
}

fn job_origin() -> JobOrigin {
    JobOrigin::new("etl", python_origin())
}

fn rich_job_origin() -> JobOrigin {
    JobOrigin::new(
        "etl",
        RepositoryPythonOrigin::new("/venv/bin/python", CodePointer::file("defs.py", "repo"))
            .with_container_image("registry.local/etl:42")
            .with_entry_point(["dagster"])
            .with_container_context(json!({"k8s": {"namespace": "etl"}})),
    )
}

fn grpc_repository() -> RepositoryOrigin {
    RepositoryOrigin::new(
        CodeLocationOrigin::GrpcServer(GrpcServerCodeLocationOrigin {
            host: "localhost".to_string(),
            port: None,
            socket: None,
            location_name: None,
            use_ssl: None,
        }),
        "repo",
    )
}

fn in_process_repository() -> RepositoryOrigin {
    RepositoryOrigin::new(
        CodeLocationOrigin::InProcess(InProcessCodeLocationOrigin {
            loadable_target_origin: python_origin(),
            location_name: Some("main".to_string()),
        }),
        "repo",
    )
}

fn external_job() -> ExternalJobOrigin {
    ExternalJobOrigin::new(grpc_repository(), "etl")
}

fn full_instance() -> InstanceRef {
    let mut instance =
        InstanceRef::local("/tmp/sw").with_settings(json!({"telemetry": {"enabled": false}}));
    instance.schedule_storage = Some(ConfigurableClassData::new(
        "stepwire.storage",
        "SqliteScheduleStorage",
        "base_dir: /tmp/sw/schedules\n",
    ));
    instance.run_launcher = Some(ConfigurableClassData::new(
        "stepwire.launcher",
        "DefaultRunLauncher",
        "{}\n",
    ));
    instance
}

fn full_known_state() -> KnownExecutionState {
    KnownExecutionState::default()
        .with_retry_attempt("transform")
        .with_ready_output(StepOutputHandle::new("extract", "result"))
        .with_ready_output(StepOutputHandle::new("fan", "out").mapped("k1"))
        .with_dynamic_mapping("fan", "out", vec!["k1".to_string()])
        .with_parent_state(PastExecutionState {
            run_id: "r0".to_string(),
            produced_outputs: [StepOutputHandle::new("extract", "result")]
                .into_iter()
                .collect(),
            parent_state: None,
        })
}

fn full_capsule() -> ErrorCapsule {
    ErrorCapsule::new("outer")
        .with_cls_name("RunFailure")
        .with_stack(["  at run()"])
        .with_cause(ErrorCapsule::new("inner").with_cls_name("KeyError"))
        .with_context(ErrorCapsule::new("while cleaning up"))
}

/// One message per catalog entry, with every optional field absent.
fn sparse_messages() -> Vec<Message> {
    vec![
        ExecutionPlanSnapshotArgs::new(external_job(), "snap-1").into(),
        ExecuteRunArgs::new(job_origin(), "r1", None).into(),
        ResumeRunArgs::new(job_origin(), "r1", None).into(),
        ExecuteExternalJobArgs::new(external_job(), "r1", None).into(),
        ExecuteStepArgs::new(job_origin(), "r1", None).into(),
        ListRepositoriesInput::module("jobs.defs").unwrap().into(),
        ListRepositoriesResponse::new(Vec::new()).into(),
        PartitionArgs::new(grpc_repository(), "daily", "2024-01-01").into(),
        PartitionNamesArgs {
            repository_origin: grpc_repository(),
            partition_set_name: "daily".to_string(),
        }
        .into(),
        PartitionSetExecutionParamArgs {
            repository_origin: grpc_repository(),
            partition_set_name: "daily".to_string(),
            partition_names: Vec::new(),
            instance_ref: None,
        }
        .into(),
        ExternalScheduleExecutionArgs {
            repository_origin: grpc_repository(),
            instance_ref: None,
            schedule_name: "nightly".to_string(),
            scheduled_timestamp: None,
            scheduled_timezone: None,
        }
        .into(),
        SensorExecutionArgs {
            repository_origin: grpc_repository(),
            instance_ref: None,
            sensor_name: "new_files".to_string(),
            last_completion_time: None,
            last_run_key: None,
            cursor: None,
        }
        .into(),
        JobSubsetSnapshotArgs::new(external_job(), None, None).into(),
        NotebookPathArgs {
            code_location_origin: grpc_repository().code_location_origin,
            notebook_path: "notebooks/report.ipynb".to_string(),
        }
        .into(),
        ExternalJobArgs {
            repository_origin: grpc_repository(),
            instance_ref: InstanceRef::local("/tmp/sw"),
            name: "etl".to_string(),
        }
        .into(),
        ShutdownServerResult::ok().into(),
        CancelExecutionRequest::new("r1").into(),
        CancelExecutionResult::canceled().into(),
        CanCancelExecutionRequest::new("r1").into(),
        CanCancelExecutionResult { can_cancel: false }.into(),
        StartRunResult::started().into(),
        GetCurrentImageResult {
            current_image: None,
            error_capsule: None,
        }
        .into(),
        GetCurrentRunsResult {
            current_run_ids: Vec::new(),
            error_capsule: None,
        }
        .into(),
    ]
}

/// One message per catalog entry, with every field set.
fn full_messages() -> Vec<Message> {
    let mut snapshot = ExecutionPlanSnapshotArgs::new(external_job(), "snap-1")
        .with_run_config(json!({"ops": {"load": {"config": {"batch": 500}}}}))
        .with_step_keys(vec!["load".to_string()])
        .with_known_state(full_known_state());
    snapshot.solid_selection = vec!["load".to_string()];
    snapshot.instance_ref = Some(full_instance());
    snapshot.asset_selection = Some(
        [AssetKey::new(["warehouse", "orders"])]
            .into_iter()
            .collect::<BTreeSet<_>>(),
    );
    snapshot.mode = "backfill".to_string();

    let mut listing = ListRepositoriesResponse::new(vec![LoadableRepositorySymbol::new(
        "repo", "defs",
    )]);
    listing.executable_path = Some("/venv/bin/python".to_string());
    listing.repository_code_pointer_dict =
        BTreeMap::from([("repo".to_string(), CodePointer::package("jobs", "defs"))]);
    listing.entry_point = Some(vec!["dagster".to_string()]);
    listing.container_image = Some("registry.local/etl:42".to_string());
    listing.container_context = Some(json!({"env": ["A=1"]}));
    listing.library_versions = Some(BTreeMap::from([("core".to_string(), "1.7.0".to_string())]));

    vec![
        snapshot.into(),
        ExecuteRunArgs::new(rich_job_origin(), "r1", Some(full_instance()))
            .with_exit_code_on_failure(true)
            .into(),
        ResumeRunArgs::new(rich_job_origin(), "r1", Some(full_instance()))
            .with_exit_code_on_failure(true)
            .into(),
        ExecuteExternalJobArgs::new(
            ExternalJobOrigin::new(in_process_repository(), "etl"),
            "r1",
            Some(full_instance()),
        )
        .into(),
        ExecuteStepArgs::new(rich_job_origin(), "r1", Some(vec!["load".to_string()]))
            .with_instance_ref(full_instance())
            .with_retry_mode(RetryMode::Deferred)
            .with_known_state(full_known_state())
            .with_step_verification(true)
            .into(),
        ListRepositoriesInput::new(
            None,
            Some("defs.py".to_string()),
            Some("/src".to_string()),
            Some("repo".to_string()),
        )
        .unwrap()
        .into(),
        listing.into(),
        PartitionArgs {
            instance_ref: Some(full_instance()),
            ..PartitionArgs::new(in_process_repository(), "daily", "2024-01-01")
        }
        .into(),
        PartitionNamesArgs {
            repository_origin: in_process_repository(),
            partition_set_name: "daily".to_string(),
        }
        .into(),
        PartitionSetExecutionParamArgs {
            repository_origin: grpc_repository(),
            partition_set_name: "daily".to_string(),
            partition_names: vec!["2024-01-01".to_string(), "2024-01-02".to_string()],
            instance_ref: Some(full_instance()),
        }
        .into(),
        ExternalScheduleExecutionArgs {
            repository_origin: grpc_repository(),
            instance_ref: Some(full_instance()),
            schedule_name: "nightly".to_string(),
            scheduled_timestamp: Some(f64::INFINITY),
            scheduled_timezone: Some("UTC".to_string()),
        }
        .into(),
        SensorExecutionArgs {
            repository_origin: grpc_repository(),
            instance_ref: Some(full_instance()),
            sensor_name: "new_files".to_string(),
            last_completion_time: Some(1_700_000_000.25),
            last_run_key: Some("file-17".to_string()),
            cursor: Some("offset=17".to_string()),
        }
        .into(),
        JobSubsetSnapshotArgs::new(
            external_job(),
            Some(vec!["load".to_string()]),
            Some(vec![AssetKey::new(["warehouse", "orders"])]),
        )
        .into(),
        NotebookPathArgs {
            code_location_origin: in_process_repository().code_location_origin,
            notebook_path: "notebooks/report.ipynb".to_string(),
        }
        .into(),
        ExternalJobArgs {
            repository_origin: in_process_repository(),
            instance_ref: full_instance(),
            name: "etl".to_string(),
        }
        .into(),
        ShutdownServerResult::failed(full_capsule()).into(),
        CancelExecutionRequest::new("r1").into(),
        CancelExecutionResult {
            success: false,
            message: Some("Run r1 could not be reached".to_string()),
            error_capsule: Some(full_capsule()),
        }
        .into(),
        CanCancelExecutionRequest::new("r1").into(),
        CanCancelExecutionResult { can_cancel: true }.into(),
        StartRunResult::failed("worker crashed", Some(full_capsule())).into(),
        GetCurrentImageResult {
            current_image: Some("registry.local/etl:42".to_string()),
            error_capsule: Some(full_capsule()),
        }
        .into(),
        GetCurrentRunsResult {
            current_run_ids: vec!["r1".to_string(), "r2".to_string()],
            error_capsule: Some(full_capsule()),
        }
        .into(),
    ]
}

fn class_names(messages: &[Message]) -> BTreeSet<&'static str> {
    messages.iter().map(Message::class_name).collect()
}

// ─── Coverage ───────────────────────────────────────────────────────────────

#[rstest]
#[case::sparse(sparse_messages())]
#[case::full(full_messages())]
fn fixtures_cover_the_whole_catalog(#[case] messages: Vec<Message>) {
    assert_eq!(messages.len(), Message::CLASS_NAMES.len());
    let expected: BTreeSet<&str> = Message::CLASS_NAMES.iter().copied().collect();
    assert_eq!(class_names(&messages), expected);
}

// ─── Round Trips ────────────────────────────────────────────────────────────

#[rstest]
#[case::sparse(sparse_messages())]
#[case::full(full_messages())]
fn every_message_round_trips(#[case] messages: Vec<Message>) {
    for message in messages {
        let text = message.encode();
        let decoded = Message::decode(&text)
            .unwrap_or_else(|err| panic!("{}: {err}", message.class_name()));
        assert_eq!(decoded, message);
        assert_eq!(decoded.encode(), text);
    }
}

#[test]
fn sparse_messages_decode_with_optional_fields_omitted() {
    for message in sparse_messages() {
        let Value::Object(mut map) = message.to_value() else {
            panic!("{} did not pack to an object", message.class_name());
        };
        map.retain(|_, value| !value.is_null());
        let decoded = Message::decode(&Value::Object(map).to_string())
            .unwrap_or_else(|err| panic!("{}: {err}", message.class_name()));
        assert_eq!(decoded, message);
    }
}

// ─── Storage Names ──────────────────────────────────────────────────────────

#[rstest]
#[case::sparse(sparse_messages())]
#[case::full(full_messages())]
fn packed_keys_are_exactly_the_declared_storage_names(#[case] messages: Vec<Message>) {
    for message in messages {
        let Value::Object(map) = message.to_value() else {
            panic!("{} did not pack to an object", message.class_name());
        };
        let written: BTreeSet<&str> = map.keys().map(String::as_str).collect();
        let declared: BTreeSet<&str> = std::iter::once("__class__")
            .chain(message.fields().iter().map(|spec| spec.storage_name))
            .collect();
        assert_eq!(written, declared, "{}", message.class_name());
    }
}

#[test]
fn renamed_fields_never_leak_logical_names() {
    for message in full_messages() {
        let value = message.to_value();
        for spec in message.fields().iter().filter(|spec| spec.is_renamed()) {
            assert!(
                value.get(spec.name).is_none(),
                "{} wrote logical name `{}`",
                message.class_name(),
                spec.name
            );
        }
    }
}
