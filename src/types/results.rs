//! Result messages returned by a worker.
//!
//! Worker-side failures never travel as transport errors. They are carried
//! inside the result as an [`ErrorCapsule`], stored on the wire under
//! `serializable_error_info`.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::SerdesError;
use crate::serdes::{wire_record, FieldReader, FieldSpec, FieldWriter, Record};
use crate::types::error_info::ErrorCapsule;
use crate::types::origin::CodePointer;

const ERROR_FIELD: FieldSpec = FieldSpec::optional("error_capsule").stored_as("serializable_error_info");

/// One loadable repository found by a list request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadableRepositorySymbol {
    /// Repository name.
    pub repository_name: String,
    /// Attribute the repository is bound to.
    pub attribute: String,
}

impl LoadableRepositorySymbol {
    /// Create a symbol.
    pub fn new(repository_name: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            repository_name: repository_name.into(),
            attribute: attribute.into(),
        }
    }
}

impl Record for LoadableRepositorySymbol {
    const STORAGE_NAME: &'static str = "LoadableRepositorySymbol";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("repository_name"),
        FieldSpec::required("attribute"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("repository_name", &self.repository_name);
        fields.put("attribute", &self.attribute);
    }

    fn unpack(fields: &FieldReader<'_>) -> Result<Self, SerdesError> {
        Ok(Self {
            repository_name: fields.required("repository_name")?,
            attribute: fields.required("attribute")?,
        })
    }
}

/// Repositories found in a module or file, with the runtime that loaded them.
#[derive(Debug, Clone, PartialEq)]
pub struct ListRepositoriesResponse {
    /// Repositories found.
    pub repository_symbols: Vec<LoadableRepositorySymbol>,
    /// Runtime executable that loaded them.
    pub executable_path: Option<String>,
    /// Code pointer per repository name.
    pub repository_code_pointer_dict: BTreeMap<String, CodePointer>,
    /// Worker entry point of the serving runtime.
    pub entry_point: Option<Vec<String>>,
    /// Image the code runs in.
    pub container_image: Option<String>,
    /// Container settings.
    pub container_context: Option<Value>,
    /// Library name to version installed in the worker.
    pub library_versions: Option<BTreeMap<String, String>>,
}

impl ListRepositoriesResponse {
    /// Response listing `repository_symbols` and nothing else.
    pub fn new(repository_symbols: Vec<LoadableRepositorySymbol>) -> Self {
        Self {
            repository_symbols,
            executable_path: None,
            repository_code_pointer_dict: BTreeMap::new(),
            entry_point: None,
            container_image: None,
            container_context: None,
            library_versions: None,
        }
    }
}

impl Record for ListRepositoriesResponse {
    const STORAGE_NAME: &'static str = "ListRepositoriesResponse";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("repository_symbols"),
        FieldSpec::optional("executable_path"),
        FieldSpec::optional("repository_code_pointer_dict"),
        FieldSpec::optional("entry_point"),
        FieldSpec::optional("container_image"),
        FieldSpec::optional("container_context"),
        FieldSpec::optional("library_versions").stored_as("dagster_library_versions"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("repository_symbols", &self.repository_symbols);
        fields.put("executable_path", &self.executable_path);
        fields.put("repository_code_pointer_dict", &self.repository_code_pointer_dict);
        fields.put("entry_point", &self.entry_point);
        fields.put("container_image", &self.container_image);
        fields.put("container_context", &self.container_context);
        fields.put("library_versions", &self.library_versions);
    }

    fn unpack(fields: &FieldReader<'_>) -> Result<Self, SerdesError> {
        Ok(Self {
            repository_symbols: fields.required("repository_symbols")?,
            executable_path: fields.optional("executable_path")?,
            repository_code_pointer_dict: fields
                .or_default("repository_code_pointer_dict", BTreeMap::new())?,
            entry_point: fields.optional("entry_point")?,
            container_image: fields.optional("container_image")?,
            container_context: fields.optional("container_context")?,
            library_versions: fields.optional("library_versions")?,
        })
    }
}

/// Outcome of a shutdown request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownServerResult {
    /// Whether the worker began shutting down.
    pub success: bool,
    /// Internal failure, if any.
    pub error_capsule: Option<ErrorCapsule>,
}

impl ShutdownServerResult {
    /// The worker is shutting down.
    pub fn ok() -> Self {
        Self {
            success: true,
            error_capsule: None,
        }
    }

    /// Shutdown failed internally.
    pub fn failed(error: ErrorCapsule) -> Self {
        Self {
            success: false,
            error_capsule: Some(error),
        }
    }
}

impl Record for ShutdownServerResult {
    const STORAGE_NAME: &'static str = "ShutdownServerResult";
    const FIELDS: &'static [FieldSpec] = &[FieldSpec::required("success"), ERROR_FIELD];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("success", &self.success);
        fields.put("error_capsule", &self.error_capsule);
    }

    fn unpack(fields: &FieldReader<'_>) -> Result<Self, SerdesError> {
        Ok(Self {
            success: fields.required("success")?,
            error_capsule: fields.optional("error_capsule")?,
        })
    }
}

/// Outcome of a cancel request.
///
/// A run that is unknown, already finished, or already being canceled is
/// reported with `success == false` and a `message`. The capsule is
/// reserved for internal failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelExecutionResult {
    /// Whether cancellation was requested by this call.
    pub success: bool,
    /// Why cancellation was not requested.
    pub message: Option<String>,
    /// Internal failure, if any.
    pub error_capsule: Option<ErrorCapsule>,
}

impl CancelExecutionResult {
    /// Cancellation was requested.
    pub fn canceled() -> Self {
        Self {
            success: true,
            message: None,
            error_capsule: None,
        }
    }

    /// Cancellation was refused for an expected reason.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            error_capsule: None,
        }
    }

    /// Cancellation failed internally.
    pub fn failed(error: ErrorCapsule) -> Self {
        Self {
            success: false,
            message: None,
            error_capsule: Some(error),
        }
    }
}

impl Record for CancelExecutionResult {
    const STORAGE_NAME: &'static str = "CancelExecutionResult";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("success"),
        FieldSpec::optional("message"),
        ERROR_FIELD,
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("success", &self.success);
        fields.put("message", &self.message);
        fields.put("error_capsule", &self.error_capsule);
    }

    fn unpack(fields: &FieldReader<'_>) -> Result<Self, SerdesError> {
        Ok(Self {
            success: fields.required("success")?,
            message: fields.optional("message")?,
            error_capsule: fields.optional("error_capsule")?,
        })
    }
}

/// Whether a run can still be canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanCancelExecutionResult {
    /// `true` while the run is in flight and not yet asked to stop.
    pub can_cancel: bool,
}

impl Record for CanCancelExecutionResult {
    const STORAGE_NAME: &'static str = "CanCancelExecutionResult";
    const FIELDS: &'static [FieldSpec] = &[FieldSpec::required("can_cancel")];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("can_cancel", &self.can_cancel);
    }

    fn unpack(fields: &FieldReader<'_>) -> Result<Self, SerdesError> {
        Ok(Self {
            can_cancel: fields.required("can_cancel")?,
        })
    }
}

/// Outcome of starting a run in a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRunResult {
    /// Whether the run started.
    pub success: bool,
    /// Human readable detail.
    pub message: Option<String>,
    /// Failure that prevented the start.
    pub error_capsule: Option<ErrorCapsule>,
}

impl StartRunResult {
    /// The run started.
    pub fn started() -> Self {
        Self {
            success: true,
            message: None,
            error_capsule: None,
        }
    }

    /// The run failed to start.
    pub fn failed(message: impl Into<String>, error: Option<ErrorCapsule>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            error_capsule: error,
        }
    }
}

impl Record for StartRunResult {
    const STORAGE_NAME: &'static str = "StartRunResult";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("success"),
        FieldSpec::optional("message"),
        ERROR_FIELD,
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("success", &self.success);
        fields.put("message", &self.message);
        fields.put("error_capsule", &self.error_capsule);
    }

    fn unpack(fields: &FieldReader<'_>) -> Result<Self, SerdesError> {
        Ok(Self {
            success: fields.required("success")?,
            message: fields.optional("message")?,
            error_capsule: fields.optional("error_capsule")?,
        })
    }
}

/// Image the worker is running in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetCurrentImageResult {
    /// Image reference, when known.
    pub current_image: Option<String>,
    /// Internal failure, if any.
    pub error_capsule: Option<ErrorCapsule>,
}

impl Record for GetCurrentImageResult {
    const STORAGE_NAME: &'static str = "GetCurrentImageResult";
    const FIELDS: &'static [FieldSpec] = &[FieldSpec::optional("current_image"), ERROR_FIELD];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("current_image", &self.current_image);
        fields.put("error_capsule", &self.error_capsule);
    }

    fn unpack(fields: &FieldReader<'_>) -> Result<Self, SerdesError> {
        Ok(Self {
            current_image: fields.optional("current_image")?,
            error_capsule: fields.optional("error_capsule")?,
        })
    }
}

/// Runs the worker is currently executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetCurrentRunsResult {
    /// In-flight run ids.
    pub current_run_ids: Vec<String>,
    /// Internal failure, if any.
    pub error_capsule: Option<ErrorCapsule>,
}

impl Record for GetCurrentRunsResult {
    const STORAGE_NAME: &'static str = "GetCurrentRunsResult";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("current_run_ids").stored_as("current_runs"),
        ERROR_FIELD,
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("current_run_ids", &self.current_run_ids);
        fields.put("error_capsule", &self.error_capsule);
    }

    fn unpack(fields: &FieldReader<'_>) -> Result<Self, SerdesError> {
        Ok(Self {
            current_run_ids: fields.required("current_run_ids")?,
            error_capsule: fields.optional("error_capsule")?,
        })
    }
}

wire_record!(
    LoadableRepositorySymbol,
    ListRepositoriesResponse,
    ShutdownServerResult,
    CancelExecutionResult,
    CanCancelExecutionResult,
    StartRunResult,
    GetCurrentImageResult,
    GetCurrentRunsResult,
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serdes::{deserialize_value, serialize_value};
    use pretty_assertions::assert_eq;

    #[test]
    fn error_capsule_uses_legacy_field_name() {
        let result = CancelExecutionResult::failed(ErrorCapsule::new("lock poisoned"));
        let text = serialize_value(&result);
        assert!(text.contains(r#""serializable_error_info":{"__class__":"SerializableErrorInfo""#));
        assert!(!text.contains("error_capsule"));
        assert_eq!(deserialize_value::<CancelExecutionResult>(&text).unwrap(), result);
    }

    #[test]
    fn current_runs_storage_name() {
        let result = GetCurrentRunsResult {
            current_run_ids: vec!["a".to_string(), "b".to_string()],
            error_capsule: None,
        };
        assert_eq!(
            serialize_value(&result),
            r#"{"__class__":"GetCurrentRunsResult","current_runs":["a","b"],"serializable_error_info":null}"#
        );
    }

    #[test]
    fn list_response_from_minimal_legacy_payload() {
        let back: ListRepositoriesResponse = deserialize_value(
            r#"{"__class__":"ListRepositoriesResponse","repository_symbols":[
                {"__class__":"LoadableRepositorySymbol","repository_name":"main","attribute":"defs"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(
            back,
            ListRepositoriesResponse::new(vec![LoadableRepositorySymbol::new("main", "defs")])
        );
    }

    #[test]
    fn list_response_library_versions_rename() {
        let mut response = ListRepositoriesResponse::new(Vec::new());
        response.library_versions = Some([("stepwire".to_string(), "0.1.0".to_string())].into());
        response
            .repository_code_pointer_dict
            .insert("main".to_string(), CodePointer::file("repo.py", "defs"));
        let text = serialize_value(&response);
        assert!(text.contains(r#""dagster_library_versions":{"stepwire":"0.1.0"}"#));
        assert_eq!(deserialize_value::<ListRepositoriesResponse>(&text).unwrap(), response);
    }
}
