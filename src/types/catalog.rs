//! The closed set of top-level protocol messages.
//!
//! [`Message::decode`] reads the class tag of an incoming payload and
//! dispatches to the matching record, so a reader that does not know in
//! advance which message it will receive can still decode it.

use crate::error::SerdesError;
use crate::serdes::{
    canonical, class_of, pack_record, parse_payload, unpack_record, FieldSpec, Record,
};
use crate::types::commands::{
    CanCancelExecutionRequest, CancelExecutionRequest, ExecuteExternalJobArgs, ExecuteRunArgs,
    ExecuteStepArgs, ExecutionPlanSnapshotArgs, ExternalJobArgs, ExternalScheduleExecutionArgs,
    JobSubsetSnapshotArgs, ListRepositoriesInput, NotebookPathArgs, PartitionArgs,
    PartitionNamesArgs, PartitionSetExecutionParamArgs, ResumeRunArgs, SensorExecutionArgs,
};
use crate::types::results::{
    CanCancelExecutionResult, CancelExecutionResult, GetCurrentImageResult, GetCurrentRunsResult,
    ListRepositoriesResponse, ShutdownServerResult, StartRunResult,
};

macro_rules! message_catalog {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        /// Any top-level protocol message.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Message {
            $(
                #[allow(missing_docs)]
                $variant($ty),
            )*
        }

        impl Message {
            /// Storage class names of every catalog entry.
            pub const CLASS_NAMES: &'static [&'static str] = &[$(<$ty as Record>::STORAGE_NAME),*];

            /// Field table of this message's record.
            pub fn fields(&self) -> &'static [FieldSpec] {
                match self {
                    $(Self::$variant(_) => <$ty as Record>::FIELDS,)*
                }
            }

            /// Storage class name of this message.
            pub fn class_name(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => <$ty as Record>::STORAGE_NAME,)*
                }
            }

            /// Pack into a tagged JSON value.
            pub fn to_value(&self) -> serde_json::Value {
                match self {
                    $(Self::$variant(inner) => pack_record(inner),)*
                }
            }

            /// Decode a tagged JSON value, dispatching on its class.
            pub fn from_value(value: &serde_json::Value) -> Result<Self, SerdesError> {
                let class = class_of(value).ok_or_else(|| SerdesError::TypeMismatch {
                    path: "$".to_string(),
                    expected: "tagged record".to_string(),
                })?;
                $(
                    if <$ty as Record>::accepts_class(class) {
                        return unpack_record::<$ty>(value, <$ty as Record>::STORAGE_NAME)
                            .map(Self::$variant);
                    }
                )*
                Err(SerdesError::UnknownVariant {
                    class: class.to_string(),
                })
            }
        }

        $(
            impl From<$ty> for Message {
                fn from(inner: $ty) -> Self {
                    Self::$variant(inner)
                }
            }
        )*
    };
}

message_catalog!(
    ExecutionPlanSnapshot(ExecutionPlanSnapshotArgs),
    ExecuteRun(ExecuteRunArgs),
    ResumeRun(ResumeRunArgs),
    ExecuteExternalJob(ExecuteExternalJobArgs),
    ExecuteStep(ExecuteStepArgs),
    ListRepositories(ListRepositoriesInput),
    ListRepositoriesResponse(ListRepositoriesResponse),
    Partition(PartitionArgs),
    PartitionNames(PartitionNamesArgs),
    PartitionSetExecutionParams(PartitionSetExecutionParamArgs),
    ScheduleExecution(ExternalScheduleExecutionArgs),
    SensorExecution(SensorExecutionArgs),
    JobSubsetSnapshot(JobSubsetSnapshotArgs),
    NotebookPath(NotebookPathArgs),
    ExternalJob(ExternalJobArgs),
    ShutdownServerResult(ShutdownServerResult),
    CancelExecution(CancelExecutionRequest),
    CancelExecutionResult(CancelExecutionResult),
    CanCancelExecution(CanCancelExecutionRequest),
    CanCancelExecutionResult(CanCancelExecutionResult),
    StartRunResult(StartRunResult),
    GetCurrentImageResult(GetCurrentImageResult),
    GetCurrentRunsResult(GetCurrentRunsResult),
);

impl Message {
    /// Decode payload text.
    ///
    /// # Examples
    ///
    /// ```
    /// use stepwire::types::Message;
    ///
    /// let message = Message::decode(r#"{"__class__":"CanCancelExecutionRequest","run_id":"r1"}"#).unwrap();
    /// assert_eq!(message.class_name(), "CanCancelExecutionRequest");
    /// assert_eq!(message.encode(), r#"{"__class__":"CanCancelExecutionRequest","run_id":"r1"}"#);
    /// ```
    pub fn decode(text: &str) -> Result<Self, SerdesError> {
        Self::from_value(&parse_payload(text)?)
    }

    /// Encode as canonical JSON text.
    pub fn encode(&self) -> String {
        canonical::to_canonical_string(&self.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::error_info::ErrorCapsule;
    use std::collections::BTreeSet;

    #[test]
    fn class_names_are_unique() {
        let unique: BTreeSet<_> = Message::CLASS_NAMES.iter().collect();
        assert_eq!(unique.len(), Message::CLASS_NAMES.len());
    }

    #[test]
    fn decode_dispatches_on_class() {
        let message: Message = CancelExecutionResult::rejected("run r1 is not in progress").into();
        let back = Message::decode(&message.encode()).unwrap();
        assert_eq!(back, message);
        assert_eq!(back.class_name(), "CancelExecutionResult");
    }

    #[test]
    fn decode_rejects_unknown_and_untagged() {
        assert_eq!(
            Message::decode(r#"{"__class__":"LaunchRocket"}"#).unwrap_err(),
            SerdesError::UnknownVariant {
                class: "LaunchRocket".to_string()
            }
        );
        assert!(matches!(
            Message::decode(r#"{"run_id":"r1"}"#).unwrap_err(),
            SerdesError::TypeMismatch { .. }
        ));
        assert!(matches!(
            Message::decode("[1, 2").unwrap_err(),
            SerdesError::Malformed(_)
        ));
    }

    #[test]
    fn nested_record_class_is_not_a_message() {
        let capsule = crate::serdes::serialize_value(&ErrorCapsule::new("x"));
        assert!(matches!(
            Message::decode(&capsule).unwrap_err(),
            SerdesError::UnknownVariant { .. }
        ));
    }
}
