//! Error types for the stepwire protocol.
//!
//! Three families of failure exist:
//!
//! - [`SerdesError`] - decode failures raised by the versioned codec. These are
//!   always fatal to the single decode attempt and never panic.
//! - Construction and dispatch failures ([`Error::InvalidOrigin`],
//!   [`Error::OriginResolution`], [`Error::UnknownStep`]) raised before a
//!   command leaves the orchestrator.
//! - [`TransportError`] - failures packing or unpacking a payload for a
//!   worker launch.
//!
//! Failures that happen *inside* a worker are not represented here. They
//! arrive as result messages carrying an
//! [`ErrorCapsule`](crate::types::ErrorCapsule).

use thiserror::Error;

use crate::client::lifecycle::RunState;

/// Result type alias for stepwire operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// A payload failed to decode.
    #[error(transparent)]
    Serdes(#[from] SerdesError),

    /// No launch command can be derived for an origin.
    #[error("cannot resolve worker entry point: {0}")]
    OriginResolution(String),

    /// An origin descriptor was constructed with an invalid field combination.
    #[error("invalid origin: {0}")]
    InvalidOrigin(String),

    /// Step keys requested for execution are not part of the step graph.
    #[error("unknown step keys for run {run_id}: {}", .step_keys.join(", "))]
    UnknownStep {
        /// The run the dispatch was issued for.
        run_id: String,
        /// The keys missing from the step graph.
        step_keys: Vec<String>,
    },

    /// Attempted an invalid run state machine transition.
    #[error("invalid transition from {from} to {to} for run {run_id}")]
    InvalidTransition {
        /// The run that was being transitioned.
        run_id: String,
        /// The current state of the run.
        from: RunState,
        /// The rejected target state.
        to: RunState,
    },

    /// Payload packing or worker invocation failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create an invalid origin error.
    pub fn invalid_origin(msg: impl Into<String>) -> Self {
        Self::InvalidOrigin(msg.into())
    }

    /// Create an origin resolution error.
    pub fn origin_resolution(msg: impl Into<String>) -> Self {
        Self::OriginResolution(msg.into())
    }
}

/// Decode failures raised by the versioned codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerdesError {
    /// A required field is absent and declares no default.
    #[error("{class} is missing required field `{field}`")]
    SchemaViolation {
        /// Storage class name of the record being decoded.
        class: String,
        /// Storage name of the missing field.
        field: String,
    },

    /// The payload names a class this side of the protocol does not know.
    #[error("unknown message class `{class}`")]
    UnknownVariant {
        /// The class name found on the wire.
        class: String,
    },

    /// A field value does not match its declared type.
    #[error("type mismatch at `{path}`: expected {expected}")]
    TypeMismatch {
        /// Dotted path from the root record to the offending value.
        path: String,
        /// Human readable description of the expected type.
        expected: String,
    },

    /// The fields decoded individually but violate a record-level rule.
    #[error("invalid {class}: {reason}")]
    Invariant {
        /// Storage class name of the record being decoded.
        class: String,
        /// The violated rule.
        reason: String,
    },

    /// The payload is not valid JSON.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl SerdesError {
    pub(crate) fn mismatch(path: &str, expected: impl Into<String>) -> Self {
        Self::TypeMismatch {
            path: path.to_string(),
            expected: expected.into(),
        }
    }
}

/// Failures packing, unpacking or delivering a worker payload.
#[derive(Debug, Error)]
pub enum TransportError {
    /// zlib compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// The side-channel text is not valid base64 or UTF-8.
    #[error("payload encoding error: {0}")]
    Encoding(String),

    /// The launch flag asked for side-channel data that is not present.
    #[error("side channel `{0}` is not set")]
    MissingSideChannel(String),

    /// The worker argument vector could not be interpreted.
    #[error("invalid worker invocation: {0}")]
    InvalidInvocation(String),

    /// The worker process could not be spawned.
    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = SerdesError::SchemaViolation {
            class: "PartitionArgs".to_string(),
            field: "partition_set_name".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "PartitionArgs is missing required field `partition_set_name`"
        );

        let err = Error::UnknownStep {
            run_id: "r1".to_string(),
            step_keys: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "unknown step keys for run r1: a, b");

        let err = TransportError::MissingSideChannel("X".to_string());
        assert_eq!(err.to_string(), "side channel `X` is not set");
    }

    #[test]
    fn serdes_errors_convert() {
        let err: Error = SerdesError::Malformed("eof".to_string()).into();
        assert!(matches!(err, Error::Serdes(SerdesError::Malformed(_))));
    }
}
