//! State carried forward between step invocations of one run.
//!
//! [`KnownExecutionState`] is built incrementally by the orchestrator as step
//! completions are durably recorded and passed by value to each step
//! worker, which treats it as read-only. Every "update" returns a new value.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::{Map, Value};

use crate::error::SerdesError;
use crate::serdes::{wire_record, FieldReader, FieldSpec, FieldWriter, Record, WireValue, ENUM_KEY};

/// How step failures are retried by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryMode {
    /// Retries are honored.
    Enabled,
    /// Retries are ignored and failures are final.
    Disabled,
    /// Retries are recorded but left for the orchestrator to dispatch.
    Deferred,
}

impl RetryMode {
    const TYPE_NAME: &'static str = "RetryMode";

    /// Wire member name.
    pub fn member(&self) -> &'static str {
        match self {
            Self::Enabled => "ENABLED",
            Self::Disabled => "DISABLED",
            Self::Deferred => "DEFERRED",
        }
    }

    fn from_member(member: &str) -> Option<Self> {
        match member {
            "ENABLED" => Some(Self::Enabled),
            "DISABLED" => Some(Self::Disabled),
            "DEFERRED" => Some(Self::Deferred),
            _ => None,
        }
    }
}

impl fmt::Display for RetryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.member().to_lowercase())
    }
}

impl WireValue for RetryMode {
    fn to_wire(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            ENUM_KEY.to_string(),
            Value::String(format!("{}.{}", Self::TYPE_NAME, self.member())),
        );
        Value::Object(map)
    }

    fn from_wire(value: &Value, path: &str) -> Result<Self, SerdesError> {
        let tagged = value
            .as_object()
            .and_then(|map| map.get(ENUM_KEY))
            .and_then(Value::as_str)
            .or_else(|| value.as_str());
        tagged
            .map(|text| text.strip_prefix("RetryMode.").unwrap_or(text))
            .and_then(Self::from_member)
            .ok_or_else(|| SerdesError::mismatch(path, "RetryMode"))
    }
}

/// Identifies one output of one step (optionally one dynamic mapping of it).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StepOutputHandle {
    /// Step that produced the output.
    pub step_key: String,
    /// Output name.
    pub output_name: String,
    /// Dynamic mapping key, for mapped outputs.
    pub mapping_key: Option<String>,
}

impl StepOutputHandle {
    /// Handle for an unmapped output.
    pub fn new(step_key: impl Into<String>, output_name: impl Into<String>) -> Self {
        Self {
            step_key: step_key.into(),
            output_name: output_name.into(),
            mapping_key: None,
        }
    }

    /// Set the mapping key.
    pub fn mapped(mut self, mapping_key: impl Into<String>) -> Self {
        self.mapping_key = Some(mapping_key.into());
        self
    }
}

impl Record for StepOutputHandle {
    const STORAGE_NAME: &'static str = "StepOutputHandle";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("step_key"),
        FieldSpec::required("output_name"),
        FieldSpec::optional("mapping_key"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("step_key", &self.step_key);
        fields.put("output_name", &self.output_name);
        fields.put("mapping_key", &self.mapping_key);
    }

    fn unpack(fields: &FieldReader<'_>) -> Result<Self, SerdesError> {
        Ok(Self {
            step_key: fields.required("step_key")?,
            output_name: fields.required("output_name")?,
            mapping_key: fields.optional("mapping_key")?,
        })
    }
}

/// Outputs produced by an earlier run this run re-executes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PastExecutionState {
    /// The earlier run.
    pub run_id: String,
    /// Outputs that run produced.
    pub produced_outputs: BTreeSet<StepOutputHandle>,
    /// State of the run before that one, if any.
    pub parent_state: Option<Box<PastExecutionState>>,
}

impl Record for PastExecutionState {
    const STORAGE_NAME: &'static str = "PastExecutionState";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("run_id"),
        FieldSpec::required("produced_outputs"),
        FieldSpec::optional("parent_state"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("run_id", &self.run_id);
        fields.put("produced_outputs", &self.produced_outputs);
        fields.put("parent_state", &self.parent_state);
    }

    fn unpack(fields: &FieldReader<'_>) -> Result<Self, SerdesError> {
        Ok(Self {
            run_id: fields.required("run_id")?,
            produced_outputs: fields.required("produced_outputs")?,
            parent_state: fields.optional("parent_state")?,
        })
    }
}

/// Accumulated facts about a run in progress.
///
/// # Examples
///
/// ```
/// use stepwire::types::{KnownExecutionState, StepOutputHandle};
///
/// let state = KnownExecutionState::default()
///     .with_ready_output(StepOutputHandle::new("extract", "result"))
///     .with_retry_attempt("load");
///
/// assert!(state.is_step_complete("extract"));
/// assert_eq!(state.retry_count("load"), 1);
/// assert_eq!(state.retry_count("extract"), 0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownExecutionState {
    /// Retries already consumed per step key.
    pub previous_retry_attempts: BTreeMap<String, u32>,
    /// Mapping keys emitted per step and output.
    pub dynamic_mappings: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    /// Outputs already produced in this run.
    pub ready_outputs: Option<BTreeSet<StepOutputHandle>>,
    /// State of the run this one re-executes from.
    pub parent_state: Option<PastExecutionState>,
}

impl KnownExecutionState {
    /// Record one more retry for `step_key`.
    pub fn with_retry_attempt(mut self, step_key: impl Into<String>) -> Self {
        let attempts = self.previous_retry_attempts.entry(step_key.into()).or_insert(0);
        *attempts = attempts.saturating_add(1);
        self
    }

    /// Record an output as produced.
    pub fn with_ready_output(mut self, handle: StepOutputHandle) -> Self {
        self.ready_outputs.get_or_insert_with(BTreeSet::new).insert(handle);
        self
    }

    /// Record the mapping keys a dynamic output emitted.
    pub fn with_dynamic_mapping(
        mut self,
        step_key: impl Into<String>,
        output_name: impl Into<String>,
        mapping_keys: Vec<String>,
    ) -> Self {
        self.dynamic_mappings
            .entry(step_key.into())
            .or_default()
            .insert(output_name.into(), mapping_keys);
        self
    }

    /// Set the parent run state.
    pub fn with_parent_state(mut self, parent_state: PastExecutionState) -> Self {
        self.parent_state = Some(parent_state);
        self
    }

    /// Retries consumed by `step_key`.
    pub fn retry_count(&self, step_key: &str) -> u32 {
        self.previous_retry_attempts
            .get(step_key)
            .copied()
            .unwrap_or(0)
    }

    /// `true` if any output of `step_key` is already recorded.
    pub fn is_step_complete(&self, step_key: &str) -> bool {
        self.ready_outputs
            .as_ref()
            .is_some_and(|outputs| outputs.iter().any(|h| h.step_key == step_key))
    }

    /// Step keys with at least one recorded output.
    pub fn completed_steps(&self) -> BTreeSet<&str> {
        self.ready_outputs
            .iter()
            .flatten()
            .map(|h| h.step_key.as_str())
            .collect()
    }
}

impl Record for KnownExecutionState {
    const STORAGE_NAME: &'static str = "KnownExecutionState";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::optional("previous_retry_attempts"),
        FieldSpec::optional("dynamic_mappings"),
        FieldSpec::optional("ready_outputs"),
        FieldSpec::optional("parent_state"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("previous_retry_attempts", &self.previous_retry_attempts);
        fields.put("dynamic_mappings", &self.dynamic_mappings);
        fields.put("ready_outputs", &self.ready_outputs);
        fields.put("parent_state", &self.parent_state);
    }

    fn unpack(fields: &FieldReader<'_>) -> Result<Self, SerdesError> {
        Ok(Self {
            previous_retry_attempts: fields.or_default("previous_retry_attempts", BTreeMap::new())?,
            dynamic_mappings: fields.or_default("dynamic_mappings", BTreeMap::new())?,
            ready_outputs: fields.optional("ready_outputs")?,
            parent_state: fields.optional("parent_state")?,
        })
    }
}

/// Key of an asset: a path of name components.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetKey {
    /// Path components.
    pub path: Vec<String>,
}

impl AssetKey {
    /// Build a key from path components.
    pub fn new<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.join("/"))
    }
}

impl Record for AssetKey {
    const STORAGE_NAME: &'static str = "AssetKey";
    const FIELDS: &'static [FieldSpec] = &[FieldSpec::required("path")];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("path", &self.path);
    }

    fn unpack(fields: &FieldReader<'_>) -> Result<Self, SerdesError> {
        Ok(Self {
            path: fields.required("path")?,
        })
    }
}

wire_record!(StepOutputHandle, PastExecutionState, KnownExecutionState, AssetKey);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serdes::{deserialize_value, serialize_value};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn retry_mode_wire_form() {
        assert_eq!(
            RetryMode::Deferred.to_wire(),
            json!({"__enum__": "RetryMode.DEFERRED"})
        );
        assert_eq!(
            RetryMode::from_wire(&json!({"__enum__": "RetryMode.ENABLED"}), "m").unwrap(),
            RetryMode::Enabled
        );
        assert_eq!(
            RetryMode::from_wire(&json!("DISABLED"), "m").unwrap(),
            RetryMode::Disabled
        );
        assert!(RetryMode::from_wire(&json!({"__enum__": "RetryMode.SOMETIMES"}), "m").is_err());
    }

    #[test]
    fn builders_do_not_share_state() {
        let base = KnownExecutionState::default().with_retry_attempt("a");
        let next = base.clone().with_retry_attempt("a");
        assert_eq!(base.retry_count("a"), 1);
        assert_eq!(next.retry_count("a"), 2);
    }

    #[test]
    fn retry_count_saturates() {
        let mut state = KnownExecutionState::default();
        state.previous_retry_attempts.insert("a".to_string(), u32::MAX);
        let state = state.with_retry_attempt("a");
        assert_eq!(state.retry_count("a"), u32::MAX);
    }

    #[test]
    fn known_state_round_trips_with_nested_parent() {
        let parent = PastExecutionState {
            run_id: "r0".to_string(),
            produced_outputs: [StepOutputHandle::new("a", "result")].into_iter().collect(),
            parent_state: None,
        };
        let state = KnownExecutionState::default()
            .with_ready_output(StepOutputHandle::new("a", "result"))
            .with_ready_output(StepOutputHandle::new("fan", "out").mapped("k1"))
            .with_dynamic_mapping("fan", "out", vec!["k1".to_string(), "k2".to_string()])
            .with_retry_attempt("b")
            .with_parent_state(parent);

        let back: KnownExecutionState = deserialize_value(&serialize_value(&state)).unwrap();
        assert_eq!(back, state);
        assert_eq!(back.completed_steps(), ["a", "fan"].into_iter().collect());
    }

    #[test]
    fn legacy_known_state_without_new_fields() {
        let back: KnownExecutionState = deserialize_value(
            r#"{"__class__":"KnownExecutionState","previous_retry_attempts":{"a":2}}"#,
        )
        .unwrap();
        assert_eq!(back.retry_count("a"), 2);
        assert!(back.dynamic_mappings.is_empty());
        assert_eq!(back.ready_outputs, None);
    }
}
