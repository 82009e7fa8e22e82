//! Transport channel selection for worker launches.
//!
//! A command payload normally travels as one positional argument of the
//! worker command line. Step execution payloads can grow past what an
//! argument vector safely carries (the known state of a wide run is large),
//! so above [`DEFAULT_INLINE_ARGUMENT_LIMIT`] bytes they are zlib-compressed,
//! base64-encoded and moved into an environment variable. The argument
//! vector then only carries [`COMPRESSED_INPUT_FROM_ENV_FLAG`].
//!
//! The worker side of this exchange lives in
//! [`crate::server::invocation`].

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::config::ProtocolConfig;
use crate::error::{Result, TransportError};
use crate::serdes::{serialize_value, Record};
use crate::types::{ApiCommand, ExecuteRunArgs, ExecuteStepArgs, JobOrigin, ResumeRunArgs};

/// Largest step payload, in bytes, passed inline.
pub const DEFAULT_INLINE_ARGUMENT_LIMIT: usize = 32 * 1024;

/// Environment variable carrying compressed step payloads.
pub const DEFAULT_SIDE_CHANNEL_ENV_VAR: &str = "STEPWIRE_COMPRESSED_EXECUTE_STEP_ARGS";

/// Flag telling the worker to read its payload from the side channel.
pub const COMPRESSED_INPUT_FROM_ENV_FLAG: &str = "--compressed-input-from-env";

/// Flag followed by a compressed payload passed inline.
pub const COMPRESSED_INPUT_JSON_FLAG: &str = "--compressed-input-json";

/// How a payload reaches the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Serialized text as one positional argument.
    Inline,
    /// Compressed text in an environment variable.
    SideChannel,
}

/// A fully resolved worker launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchCommand {
    /// Program followed by its arguments.
    pub args: Vec<String>,
    /// Extra environment for the worker process.
    pub env: BTreeMap<String, String>,
}

impl LaunchCommand {
    /// Program to execute.
    pub fn program(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Arguments after the program.
    pub fn arguments(&self) -> &[String] {
        self.args.get(1..).unwrap_or(&[])
    }
}

/// Compress `payload` with zlib and encode it as standard base64.
pub fn compress_payload(payload: &str) -> std::result::Result<String, TransportError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(payload.as_bytes())
        .map_err(|e| TransportError::Compression(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| TransportError::Compression(e.to_string()))?;
    Ok(STANDARD.encode(compressed))
}

/// Reverse [`compress_payload`].
pub fn decompress_payload(encoded: &str) -> std::result::Result<String, TransportError> {
    let compressed = STANDARD
        .decode(encoded.trim())
        .map_err(|e| TransportError::Encoding(e.to_string()))?;
    let mut text = String::new();
    ZlibDecoder::new(compressed.as_slice())
        .read_to_string(&mut text)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::InvalidData if e.get_ref().is_none() => {
                TransportError::Encoding("decompressed payload is not UTF-8".to_string())
            },
            _ => TransportError::Compression(e.to_string()),
        })?;
    Ok(text)
}

/// Read access to environment variables.
pub trait EnvSource {
    /// Value of `name`, if set.
    fn var(&self, name: &str) -> Option<String>;
}

/// The current process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for BTreeMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Picks the delivery channel for each command and builds the launch.
///
/// Holds no state between calls.
///
/// # Examples
///
/// ```
/// use stepwire::shared::channel::{ChannelSelector, Delivery};
/// use stepwire::types::ApiCommand;
///
/// let selector = ChannelSelector::default().with_inline_limit(8);
/// assert_eq!(selector.select(ApiCommand::ExecuteStep, "0123456789"), Delivery::SideChannel);
/// assert_eq!(selector.select(ApiCommand::ExecuteRun, "0123456789"), Delivery::Inline);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSelector {
    inline_limit: usize,
    side_channel_var: String,
    worker_module: String,
}

impl Default for ChannelSelector {
    fn default() -> Self {
        Self::from_config(&ProtocolConfig::default())
    }
}

impl ChannelSelector {
    /// Selector using `config`'s limit, variable name and worker module.
    pub fn from_config(config: &ProtocolConfig) -> Self {
        Self {
            inline_limit: config.inline_argument_limit,
            side_channel_var: config.compressed_args_env_var.clone(),
            worker_module: config.worker_module.clone(),
        }
    }

    /// Override the inline limit.
    pub fn with_inline_limit(mut self, inline_limit: usize) -> Self {
        self.inline_limit = inline_limit;
        self
    }

    /// Inline limit in bytes.
    pub fn inline_limit(&self) -> usize {
        self.inline_limit
    }

    /// Name of the side-channel variable.
    pub fn side_channel_var(&self) -> &str {
        &self.side_channel_var
    }

    /// Channel for a serialized `payload` of `command`.
    pub fn select(&self, command: ApiCommand, payload: &str) -> Delivery {
        if command.supports_side_channel() && payload.len() > self.inline_limit {
            Delivery::SideChannel
        } else {
            Delivery::Inline
        }
    }

    /// Launch for a whole-run execution.
    pub fn execute_run(&self, args: &ExecuteRunArgs) -> Result<LaunchCommand> {
        self.launch(&args.job_origin, ExecuteRunArgs::COMMAND, args)
    }

    /// Launch for resuming a run.
    pub fn resume_run(&self, args: &ResumeRunArgs) -> Result<LaunchCommand> {
        self.launch(&args.job_origin, ResumeRunArgs::COMMAND, args)
    }

    /// Launch for a step execution.
    pub fn execute_step(&self, args: &ExecuteStepArgs) -> Result<LaunchCommand> {
        self.launch(&args.job_origin, ApiCommand::ExecuteStep, args)
    }

    /// Serialize `record`, pick its channel and build the launch for `origin`.
    pub fn launch<R: Record>(
        &self,
        origin: &JobOrigin,
        command: ApiCommand,
        record: &R,
    ) -> Result<LaunchCommand> {
        let payload = serialize_value(record);
        let delivery = self.select(command, &payload);
        tracing::debug!(
            %command,
            job = %origin.job_name,
            payload_bytes = payload.len(),
            ?delivery,
            "building worker launch"
        );

        let mut env = BTreeMap::new();
        let payload_args = match delivery {
            Delivery::Inline => vec![payload],
            Delivery::SideChannel => {
                env.insert(self.side_channel_var.clone(), compress_payload(&payload)?);
                vec![COMPRESSED_INPUT_FROM_ENV_FLAG.to_string()]
            },
        };
        let args = origin.command_args(&self.worker_module, command, payload_args)?;
        Ok(LaunchCommand { args, env })
    }
}
