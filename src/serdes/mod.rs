//! Versioned record codec.
//!
//! Every wire record declares two names per field: the logical name used by
//! the Rust struct, and a stable *storage name* written on the wire. The
//! codec always reads and writes storage names, so a field can be renamed in
//! code without invalidating payloads produced by older (or newer) peers.
//!
//! # Wire format
//!
//! Records are JSON objects tagged with their class:
//!
//! ```json
//! {"__class__":"CancelExecutionRequest","run_id":"r1"}
//! ```
//!
//! Sets are written as `{"__set__": [...]}`, enums as
//! `{"__enum__": "Type.MEMBER"}` and non-finite floats as
//! `{"__float__": "inf"}`. Output is canonical (sorted keys, compact
//! separators) so identical input always yields identical text.
//!
//! # Compatibility rules
//!
//! - Unknown storage names in an incoming payload are ignored.
//! - A known storage name that is absent takes the field's declared default.
//! - A required field with no default that is absent is a
//!   [`SerdesError::SchemaViolation`].
//!
//! # Examples
//!
//! ```
//! use stepwire::serdes::{deserialize_value, serialize_value};
//! use stepwire::types::CancelExecutionRequest;
//!
//! let request = CancelExecutionRequest::new("run-1");
//! let text = serialize_value(&request);
//! assert_eq!(text, r#"{"__class__":"CancelExecutionRequest","run_id":"run-1"}"#);
//!
//! let back: CancelExecutionRequest = deserialize_value(&text).unwrap();
//! assert_eq!(back, request);
//! ```

pub mod canonical;
mod value;

use serde_json::{Map, Value};

use crate::error::SerdesError;

pub use value::WireValue;

/// Key carrying the storage class name of a record.
pub const CLASS_KEY: &str = "__class__";
/// Key wrapping the members of a set.
pub const SET_KEY: &str = "__set__";
/// Legacy key some peers use for immutable sets.
pub const FROZENSET_KEY: &str = "__frozenset__";
/// Key carrying a `Type.MEMBER` enum value.
pub const ENUM_KEY: &str = "__enum__";
/// Key carrying a non-finite float (`inf`, `-inf` or `nan`).
pub const FLOAT_KEY: &str = "__float__";

/// One row of a record's logical-name/storage-name table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Name of the field in the Rust struct.
    pub name: &'static str,
    /// Stable name written on the wire.
    pub storage_name: &'static str,
    /// Whether decoding fails when the field is absent.
    pub required: bool,
}

impl FieldSpec {
    /// A required field whose storage name equals its logical name.
    pub const fn required(name: &'static str) -> Self {
        Self {
            name,
            storage_name: name,
            required: true,
        }
    }

    /// An optional (or defaulted) field whose storage name equals its logical name.
    pub const fn optional(name: &'static str) -> Self {
        Self {
            name,
            storage_name: name,
            required: false,
        }
    }

    /// Override the storage name.
    pub const fn stored_as(self, storage_name: &'static str) -> Self {
        Self {
            name: self.name,
            storage_name,
            required: self.required,
        }
    }

    /// `true` if the storage name differs from the logical name.
    pub fn is_renamed(&self) -> bool {
        self.name != self.storage_name
    }
}

/// A record with a stable wire representation.
pub trait Record: Sized {
    /// Class name written under [`CLASS_KEY`].
    const STORAGE_NAME: &'static str;

    /// Additional class names accepted when decoding.
    const LEGACY_NAMES: &'static [&'static str] = &[];

    /// The logical-name/storage-name table.
    const FIELDS: &'static [FieldSpec];

    /// Write every field into `fields`.
    fn pack(&self, fields: &mut FieldWriter);

    /// Read a record back from `fields`.
    fn unpack(fields: &FieldReader<'_>) -> Result<Self, SerdesError>;

    /// `true` if `class` names this record on the wire.
    fn accepts_class(class: &str) -> bool {
        class == Self::STORAGE_NAME || Self::LEGACY_NAMES.contains(&class)
    }
}

/// Storage name of the field with logical `name`.
///
/// Every field a record reads or writes must be declared in its table.
fn storage_name_of(fields: &'static [FieldSpec], name: &'static str) -> &'static str {
    let declared = fields.iter().find(|spec| spec.name == name);
    debug_assert!(
        declared.is_some(),
        "field `{name}` is missing from the record's field table"
    );
    match declared {
        Some(spec) => spec.storage_name,
        None => {
            tracing::error!(field = name, "field missing from record table, using logical name");
            name
        },
    }
}

/// Collects storage-named fields while packing a record.
#[derive(Debug)]
pub struct FieldWriter {
    fields: &'static [FieldSpec],
    map: Map<String, Value>,
}

impl FieldWriter {
    fn new<R: Record>() -> Self {
        let mut map = Map::new();
        map.insert(
            CLASS_KEY.to_string(),
            Value::String(R::STORAGE_NAME.to_string()),
        );
        Self {
            fields: R::FIELDS,
            map,
        }
    }

    /// Write the field with logical `name` under its storage name.
    pub fn put<T: WireValue>(&mut self, name: &'static str, value: &T) {
        let storage = storage_name_of(self.fields, name);
        self.map.insert(storage.to_string(), value.to_wire());
    }

    fn finish(self) -> Value {
        Value::Object(self.map)
    }
}

/// Reads storage-named fields while unpacking a record.
#[derive(Debug)]
pub struct FieldReader<'a> {
    class: &'static str,
    fields: &'static [FieldSpec],
    map: &'a Map<String, Value>,
    path: &'a str,
}

impl<'a> FieldReader<'a> {
    fn storage(&self, name: &'static str) -> &'static str {
        storage_name_of(self.fields, name)
    }

    fn child_path(&self, storage: &str) -> String {
        format!("{}.{}", self.path, storage)
    }

    /// Read a required field. Absence is a schema violation.
    pub fn required<T: WireValue>(&self, name: &'static str) -> Result<T, SerdesError> {
        let storage = self.storage(name);
        match self.map.get(storage) {
            Some(value) => T::from_wire(value, &self.child_path(storage)),
            None => Err(SerdesError::SchemaViolation {
                class: self.class.to_string(),
                field: storage.to_string(),
            }),
        }
    }

    /// Read an optional field. Absence and `null` both yield `None`.
    pub fn optional<T: WireValue>(&self, name: &'static str) -> Result<Option<T>, SerdesError> {
        let storage = self.storage(name);
        match self.map.get(storage) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::from_wire(value, &self.child_path(storage)).map(Some),
        }
    }

    /// Read a field, falling back to `default` when absent or `null`.
    pub fn or_default<T: WireValue>(&self, name: &'static str, default: T) -> Result<T, SerdesError> {
        Ok(self.optional(name)?.unwrap_or(default))
    }

    /// Storage names present in the payload that this record does not declare.
    pub fn unknown_fields(&self) -> Vec<&str> {
        self.map
            .keys()
            .map(String::as_str)
            .filter(|key| *key != CLASS_KEY)
            .filter(|key| !self.fields.iter().any(|spec| spec.storage_name == *key))
            .collect()
    }
}

/// Pack a record into its tagged JSON object.
pub fn pack_record<R: Record>(record: &R) -> Value {
    let mut writer = FieldWriter::new::<R>();
    record.pack(&mut writer);
    writer.finish()
}

/// Read the class tag of a packed record, if any.
pub fn class_of(value: &Value) -> Option<&str> {
    value.as_object()?.get(CLASS_KEY)?.as_str()
}

/// Unpack a tagged JSON object into `R`.
pub fn unpack_record<R: Record>(value: &Value, path: &str) -> Result<R, SerdesError> {
    let map = value
        .as_object()
        .ok_or_else(|| SerdesError::mismatch(path, R::STORAGE_NAME))?;
    let class = map
        .get(CLASS_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| SerdesError::mismatch(path, R::STORAGE_NAME))?;
    if !R::accepts_class(class) {
        return Err(SerdesError::UnknownVariant {
            class: class.to_string(),
        });
    }

    let reader = FieldReader {
        class: R::STORAGE_NAME,
        fields: R::FIELDS,
        map,
        path,
    };
    let unknown = reader.unknown_fields();
    if !unknown.is_empty() {
        tracing::debug!(
            class = R::STORAGE_NAME,
            ?unknown,
            "ignoring fields unknown to this protocol version"
        );
    }
    R::unpack(&reader)
}

/// Parse payload text into a JSON value.
pub fn parse_payload(text: &str) -> Result<Value, SerdesError> {
    serde_json::from_str(text).map_err(|e| SerdesError::Malformed(e.to_string()))
}

/// Serialize a record to canonical JSON text.
pub fn serialize_value<R: Record>(record: &R) -> String {
    canonical::to_canonical_string(&pack_record(record))
}

/// Deserialize a record of a known type from JSON text.
pub fn deserialize_value<R: Record>(text: &str) -> Result<R, SerdesError> {
    let value = parse_payload(text)?;
    unpack_record(&value, R::STORAGE_NAME)
}

/// Implement [`WireValue`] for record types by delegating to
/// [`pack_record`] / [`unpack_record`].
macro_rules! wire_record {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::serdes::WireValue for $ty {
                fn to_wire(&self) -> ::serde_json::Value {
                    $crate::serdes::pack_record(self)
                }

                fn from_wire(
                    value: &::serde_json::Value,
                    path: &str,
                ) -> ::std::result::Result<Self, $crate::error::SerdesError> {
                    $crate::serdes::unpack_record(value, path)
                }
            }
        )*
    };
}

pub(crate) use wire_record;
