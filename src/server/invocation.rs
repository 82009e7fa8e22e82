//! Reading a command from the worker's own command line.
//!
//! Accepted shapes after the entry point:
//!
//! ```text
//! api <command> <payload-json>
//! api <command> --compressed-input-from-env
//! api <command> --compressed-input-json <base64-zlib>
//! ```

use crate::error::{Result, TransportError};
use crate::serdes::deserialize_value;
use crate::shared::channel::{
    decompress_payload, Delivery, EnvSource, COMPRESSED_INPUT_FROM_ENV_FLAG,
    COMPRESSED_INPUT_JSON_FLAG, DEFAULT_SIDE_CHANNEL_ENV_VAR,
};
use crate::types::origin::API_SUBCOMMAND;
use crate::types::{ApiCommand, ExecuteRunArgs, ExecuteStepArgs, ResumeRunArgs};

/// A decoded worker command.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerRequest {
    /// Execute a whole run.
    ExecuteRun(ExecuteRunArgs),
    /// Resume a run.
    ResumeRun(ResumeRunArgs),
    /// Execute some steps of a run.
    ExecuteStep(ExecuteStepArgs),
}

impl WorkerRequest {
    /// Subcommand that carried this request.
    pub fn command(&self) -> ApiCommand {
        match self {
            Self::ExecuteRun(_) => ApiCommand::ExecuteRun,
            Self::ResumeRun(_) => ApiCommand::ResumeRun,
            Self::ExecuteStep(_) => ApiCommand::ExecuteStep,
        }
    }

    /// Run the request belongs to.
    pub fn run_id(&self) -> &str {
        match self {
            Self::ExecuteRun(args) => &args.run_id,
            Self::ResumeRun(args) => &args.run_id,
            Self::ExecuteStep(args) => &args.run_id,
        }
    }
}

/// The subcommand and payload text recovered from a worker command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInvocation {
    /// Subcommand.
    pub command: ApiCommand,
    /// Serialized command, decompressed if it arrived compressed.
    pub payload: String,
    /// Whether the payload came from the side channel.
    pub delivery: Delivery,
}

impl WorkerInvocation {
    /// Parse `argv`, reading the side channel from the default variable.
    pub fn parse<S: AsRef<str>>(argv: &[S], env: &(impl EnvSource + ?Sized)) -> Result<Self> {
        Self::parse_with(argv, env, DEFAULT_SIDE_CHANNEL_ENV_VAR)
    }

    /// Parse `argv`, reading the side channel from `side_channel_var`.
    ///
    /// The entry point before the subcommand is skipped, so the full
    /// argument vector of the process can be passed. The subcommand slot is
    /// the first `api` token followed by a known command name; an `api`
    /// that appears as an option value of the entry point is passed over.
    pub fn parse_with<S: AsRef<str>>(
        argv: &[S],
        env: &(impl EnvSource + ?Sized),
        side_channel_var: &str,
    ) -> Result<Self> {
        let args: Vec<&str> = argv.iter().map(AsRef::as_ref).collect();
        let (start, command) = find_subcommand(&args)?;

        let (payload, delivery) = match &args[start + 2..] {
            [flag] if *flag == COMPRESSED_INPUT_FROM_ENV_FLAG => {
                let packed = env
                    .var(side_channel_var)
                    .ok_or_else(|| TransportError::MissingSideChannel(side_channel_var.to_string()))?;
                (decompress_payload(&packed)?, Delivery::SideChannel)
            },
            [flag, packed] if *flag == COMPRESSED_INPUT_JSON_FLAG => {
                (decompress_payload(packed)?, Delivery::Inline)
            },
            [flag] if *flag == COMPRESSED_INPUT_JSON_FLAG => {
                return Err(invalid(format!("{COMPRESSED_INPUT_JSON_FLAG} needs a value")).into());
            },
            [payload] => ((*payload).to_string(), Delivery::Inline),
            [] => return Err(invalid(format!("missing payload for `{command}`")).into()),
            extra => {
                return Err(invalid(format!(
                    "unexpected arguments after `{command}`: {}",
                    extra.join(" ")
                ))
                .into())
            },
        };

        tracing::debug!(%command, ?delivery, payload_bytes = payload.len(), "worker invocation parsed");
        Ok(Self {
            command,
            payload,
            delivery,
        })
    }

    /// Decode the payload as the record the subcommand expects.
    pub fn decode(&self) -> Result<WorkerRequest> {
        let request = match self.command {
            ApiCommand::ExecuteRun => WorkerRequest::ExecuteRun(deserialize_value(&self.payload)?),
            ApiCommand::ResumeRun => WorkerRequest::ResumeRun(deserialize_value(&self.payload)?),
            ApiCommand::ExecuteStep => {
                WorkerRequest::ExecuteStep(deserialize_value(&self.payload)?)
            },
        };
        Ok(request)
    }
}

fn find_subcommand(args: &[&str]) -> std::result::Result<(usize, ApiCommand), TransportError> {
    let anchored = args.windows(2).enumerate().find_map(|(index, pair)| {
        if pair[0] != API_SUBCOMMAND {
            return None;
        }
        ApiCommand::from_name(pair[1]).map(|command| (index, command))
    });
    if let Some(found) = anchored {
        return Ok(found);
    }

    let start = args
        .iter()
        .position(|arg| *arg == API_SUBCOMMAND)
        .ok_or_else(|| invalid(format!("expected `{API_SUBCOMMAND}` subcommand")))?;
    match args.get(start + 1) {
        Some(name) => Err(invalid(format!("unknown api command `{name}`"))),
        None => Err(invalid("missing api command".to_string())),
    }
}

fn invalid(message: String) -> TransportError {
    TransportError::InvalidInvocation(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, SerdesError};
    use crate::shared::channel::{compress_payload, ChannelSelector};
    use crate::types::{CodePointer, JobOrigin, RepositoryPythonOrigin};
    use std::collections::BTreeMap;

    fn no_env() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn origin() -> JobOrigin {
        JobOrigin::new(
            "etl",
            RepositoryPythonOrigin::new("python3", CodePointer::module("jobs", "defs")),
        )
    }

    #[test]
    fn inline_payload() {
        let args = ExecuteRunArgs::new(origin(), "r1", None);
        let launch = ChannelSelector::default().execute_run(&args).unwrap();
        let invocation = WorkerInvocation::parse(&launch.args, &no_env()).unwrap();
        assert_eq!(invocation.delivery, Delivery::Inline);
        assert_eq!(invocation.decode().unwrap(), WorkerRequest::ExecuteRun(args));
    }

    #[test]
    fn side_channel_payload() {
        let args = ExecuteStepArgs::new(origin(), "r1", Some(vec!["a".to_string()]));
        let launch = ChannelSelector::default()
            .with_inline_limit(1)
            .execute_step(&args)
            .unwrap();
        let invocation = WorkerInvocation::parse(&launch.args, &launch.env).unwrap();
        assert_eq!(invocation.delivery, Delivery::SideChannel);
        let request = invocation.decode().unwrap();
        assert_eq!(request.run_id(), "r1");
        assert_eq!(request, WorkerRequest::ExecuteStep(args));
    }

    #[test]
    fn compressed_inline_flag() {
        let args = ResumeRunArgs::new(origin(), "r2", None);
        let packed = compress_payload(&crate::serdes::serialize_value(&args)).unwrap();
        let argv = ["api", "resume_run", "--compressed-input-json", packed.as_str()];
        let invocation = WorkerInvocation::parse(&argv, &no_env()).unwrap();
        assert_eq!(invocation.decode().unwrap().command(), ApiCommand::ResumeRun);
    }

    #[test]
    fn api_token_in_entry_point_is_skipped() {
        let origin = JobOrigin::new(
            "etl",
            RepositoryPythonOrigin::new("python3", CodePointer::module("jobs", "defs"))
                .with_entry_point(["worker", "--profile", "api", "--mode", "api"]),
        );
        let args = ExecuteRunArgs::new(origin, "r1", None);
        let launch = ChannelSelector::default().execute_run(&args).unwrap();
        assert_eq!(launch.args[2], "api");

        let invocation = WorkerInvocation::parse(&launch.args, &no_env()).unwrap();
        assert_eq!(invocation.command, ApiCommand::ExecuteRun);
        assert_eq!(invocation.decode().unwrap(), WorkerRequest::ExecuteRun(args));
    }

    #[test]
    fn missing_side_channel() {
        let argv = ["api", "execute_step", "--compressed-input-from-env"];
        let err = WorkerInvocation::parse(&argv, &no_env()).unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::MissingSideChannel(name))
                if name == "STEPWIRE_COMPRESSED_EXECUTE_STEP_ARGS"
        ));
    }

    #[test]
    fn malformed_command_lines() {
        let env = no_env();
        for argv in [
            vec!["execute_run", "{}"],
            vec!["api"],
            vec!["api", "grpc", "{}"],
            vec!["api", "execute_run"],
            vec!["api", "execute_run", "{}", "extra"],
            vec!["api", "execute_step", "--compressed-input-json"],
        ] {
            let err = WorkerInvocation::parse(&argv, &env).unwrap_err();
            assert!(
                matches!(err, Error::Transport(TransportError::InvalidInvocation(_))),
                "{argv:?}: {err}"
            );
        }
    }

    #[test]
    fn payload_class_must_match_command() {
        let payload = crate::serdes::serialize_value(&ResumeRunArgs::new(origin(), "r1", None));
        let argv = ["api", "execute_run", payload.as_str()];
        let err = WorkerInvocation::parse(&argv, &no_env())
            .unwrap()
            .decode()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Serdes(SerdesError::UnknownVariant { class }) if class == "ResumeRunArgs"
        ));
    }
}
