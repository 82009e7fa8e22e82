//! Serializable reference to the orchestrator's runtime configuration.
//!
//! A worker never receives a live handle to orchestrator state. It receives
//! an [`InstanceRef`] by value and reconstructs its storage clients from the
//! class/config pairs inside.

use serde_json::Value;

use crate::error::SerdesError;
use crate::serdes::{wire_record, FieldReader, FieldSpec, FieldWriter, Record};

/// A pluggable component named by module, class and YAML config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurableClassData {
    /// Module that defines the class.
    pub module_name: String,
    /// Class name.
    pub class_name: String,
    /// Class config as YAML text.
    pub config_yaml: String,
}

impl ConfigurableClassData {
    /// Create class data.
    pub fn new(
        module_name: impl Into<String>,
        class_name: impl Into<String>,
        config_yaml: impl Into<String>,
    ) -> Self {
        Self {
            module_name: module_name.into(),
            class_name: class_name.into(),
            config_yaml: config_yaml.into(),
        }
    }
}

impl Record for ConfigurableClassData {
    const STORAGE_NAME: &'static str = "ConfigurableClassData";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("module_name"),
        FieldSpec::required("class_name"),
        FieldSpec::required("config_yaml"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("module_name", &self.module_name);
        fields.put("class_name", &self.class_name);
        fields.put("config_yaml", &self.config_yaml);
    }

    fn unpack(fields: &FieldReader<'_>) -> Result<Self, SerdesError> {
        Ok(Self {
            module_name: fields.required("module_name")?,
            class_name: fields.required("class_name")?,
            config_yaml: fields.required("config_yaml")?,
        })
    }
}

/// Opaque reference to the orchestrator's storage locations and settings.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRef {
    /// Local artifact storage.
    pub local_artifact_storage: ConfigurableClassData,
    /// Run storage.
    pub run_storage: ConfigurableClassData,
    /// Event log storage.
    pub event_storage: ConfigurableClassData,
    /// Compute log manager.
    pub compute_logs: ConfigurableClassData,
    /// Schedule storage, if configured.
    pub schedule_storage: Option<ConfigurableClassData>,
    /// Scheduler, if configured.
    pub scheduler: Option<ConfigurableClassData>,
    /// Run coordinator, if configured.
    pub run_coordinator: Option<ConfigurableClassData>,
    /// Run launcher, if configured.
    pub run_launcher: Option<ConfigurableClassData>,
    /// Free-form instance settings.
    pub settings: Value,
    /// Custom instance class, if any.
    pub custom_instance_class: Option<ConfigurableClassData>,
}

impl InstanceRef {
    /// An instance backed entirely by the local filesystem under `base_dir`.
    pub fn local(base_dir: &str) -> Self {
        let class = |name: &str, key: &str| {
            ConfigurableClassData::new(
                "stepwire.storage",
                name,
                format!("{key}: {base_dir}/{key}\n"),
            )
        };
        Self {
            local_artifact_storage: class("LocalArtifactStorage", "base_dir"),
            run_storage: class("SqliteRunStorage", "runs"),
            event_storage: class("SqliteEventLogStorage", "events"),
            compute_logs: class("LocalComputeLogManager", "logs"),
            schedule_storage: None,
            scheduler: None,
            run_coordinator: None,
            run_launcher: None,
            settings: Value::Object(serde_json::Map::new()),
            custom_instance_class: None,
        }
    }

    /// Replace the settings object.
    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }
}

impl Record for InstanceRef {
    const STORAGE_NAME: &'static str = "InstanceRef";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required("local_artifact_storage").stored_as("local_artifact_storage_data"),
        FieldSpec::required("run_storage").stored_as("run_storage_data"),
        FieldSpec::required("event_storage").stored_as("event_storage_data"),
        FieldSpec::required("compute_logs").stored_as("compute_logs_data"),
        FieldSpec::optional("schedule_storage").stored_as("schedule_storage_data"),
        FieldSpec::optional("scheduler").stored_as("scheduler_data"),
        FieldSpec::optional("run_coordinator").stored_as("run_coordinator_data"),
        FieldSpec::optional("run_launcher").stored_as("run_launcher_data"),
        FieldSpec::optional("settings"),
        FieldSpec::optional("custom_instance_class").stored_as("custom_instance_class_data"),
    ];

    fn pack(&self, fields: &mut FieldWriter) {
        fields.put("local_artifact_storage", &self.local_artifact_storage);
        fields.put("run_storage", &self.run_storage);
        fields.put("event_storage", &self.event_storage);
        fields.put("compute_logs", &self.compute_logs);
        fields.put("schedule_storage", &self.schedule_storage);
        fields.put("scheduler", &self.scheduler);
        fields.put("run_coordinator", &self.run_coordinator);
        fields.put("run_launcher", &self.run_launcher);
        fields.put("settings", &self.settings);
        fields.put("custom_instance_class", &self.custom_instance_class);
    }

    fn unpack(fields: &FieldReader<'_>) -> Result<Self, SerdesError> {
        Ok(Self {
            local_artifact_storage: fields.required("local_artifact_storage")?,
            run_storage: fields.required("run_storage")?,
            event_storage: fields.required("event_storage")?,
            compute_logs: fields.required("compute_logs")?,
            schedule_storage: fields.optional("schedule_storage")?,
            scheduler: fields.optional("scheduler")?,
            run_coordinator: fields.optional("run_coordinator")?,
            run_launcher: fields.optional("run_launcher")?,
            settings: fields.or_default("settings", Value::Object(serde_json::Map::new()))?,
            custom_instance_class: fields.optional("custom_instance_class")?,
        })
    }
}

wire_record!(ConfigurableClassData, InstanceRef);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serdes::{deserialize_value, serialize_value};
    use serde_json::json;

    #[test]
    fn instance_ref_round_trips() {
        let instance = InstanceRef::local("/tmp/home").with_settings(json!({"telemetry": false}));
        let back: InstanceRef = deserialize_value(&serialize_value(&instance)).unwrap();
        assert_eq!(back, instance);
    }

    #[test]
    fn settings_default_to_empty_object() {
        let mut wire = crate::serdes::pack_record(&InstanceRef::local("/h"));
        wire.as_object_mut().unwrap().remove("settings");
        let back: InstanceRef = deserialize_value(&wire.to_string()).unwrap();
        assert_eq!(back.settings, json!({}));
    }
}
