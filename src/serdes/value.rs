//! [`WireValue`] implementations for scalars and collections.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Number, Value};

use super::{FLOAT_KEY, FROZENSET_KEY, SET_KEY};
use crate::error::SerdesError;

/// A value that can be written into, and read back from, a record field.
///
/// Scalars pass through unchanged. Collections and nested records recurse
/// through the same codec.
pub trait WireValue: Sized {
    /// Convert to the wire representation.
    fn to_wire(&self) -> Value;

    /// Convert from the wire representation. `path` locates the value inside
    /// the payload for error reporting.
    fn from_wire(value: &Value, path: &str) -> Result<Self, SerdesError>;
}

impl WireValue for String {
    fn to_wire(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_wire(value: &Value, path: &str) -> Result<Self, SerdesError> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SerdesError::mismatch(path, "string"))
    }
}

impl WireValue for bool {
    fn to_wire(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_wire(value: &Value, path: &str) -> Result<Self, SerdesError> {
        value
            .as_bool()
            .ok_or_else(|| SerdesError::mismatch(path, "bool"))
    }
}

impl WireValue for u32 {
    fn to_wire(&self) -> Value {
        Value::Number(Number::from(*self))
    }

    fn from_wire(value: &Value, path: &str) -> Result<Self, SerdesError> {
        value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| SerdesError::mismatch(path, "unsigned 32-bit integer"))
    }
}

impl WireValue for i64 {
    fn to_wire(&self) -> Value {
        Value::Number(Number::from(*self))
    }

    fn from_wire(value: &Value, path: &str) -> Result<Self, SerdesError> {
        value
            .as_i64()
            .ok_or_else(|| SerdesError::mismatch(path, "integer"))
    }
}

/// JSON has no infinities or NaN, so those are tagged.
impl WireValue for f64 {
    fn to_wire(&self) -> Value {
        match Number::from_f64(*self) {
            Some(number) => Value::Number(number),
            None => {
                let name = if self.is_nan() {
                    "nan"
                } else if self.is_sign_negative() {
                    "-inf"
                } else {
                    "inf"
                };
                let mut map = Map::new();
                map.insert(FLOAT_KEY.to_string(), Value::String(name.to_string()));
                Value::Object(map)
            },
        }
    }

    fn from_wire(value: &Value, path: &str) -> Result<Self, SerdesError> {
        if let Some(number) = value.as_f64() {
            return Ok(number);
        }
        match value.get(FLOAT_KEY).and_then(Value::as_str) {
            Some("inf") => Ok(f64::INFINITY),
            Some("-inf") => Ok(f64::NEG_INFINITY),
            Some("nan") => Ok(f64::NAN),
            _ => Err(SerdesError::mismatch(path, "number")),
        }
    }
}

/// Free-form JSON (run config, container context) passes through untouched.
impl WireValue for Value {
    fn to_wire(&self) -> Value {
        self.clone()
    }

    fn from_wire(value: &Value, _path: &str) -> Result<Self, SerdesError> {
        Ok(value.clone())
    }
}

impl<T: WireValue> WireValue for Option<T> {
    fn to_wire(&self) -> Value {
        self.as_ref().map_or(Value::Null, WireValue::to_wire)
    }

    fn from_wire(value: &Value, path: &str) -> Result<Self, SerdesError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_wire(other, path).map(Some),
        }
    }
}

impl<T: WireValue> WireValue for Box<T> {
    fn to_wire(&self) -> Value {
        self.as_ref().to_wire()
    }

    fn from_wire(value: &Value, path: &str) -> Result<Self, SerdesError> {
        T::from_wire(value, path).map(Box::new)
    }
}

impl<T: WireValue> WireValue for Vec<T> {
    fn to_wire(&self) -> Value {
        Value::Array(self.iter().map(WireValue::to_wire).collect())
    }

    fn from_wire(value: &Value, path: &str) -> Result<Self, SerdesError> {
        let items = value
            .as_array()
            .ok_or_else(|| SerdesError::mismatch(path, "sequence"))?;
        items
            .iter()
            .enumerate()
            .map(|(index, item)| T::from_wire(item, &format!("{path}[{index}]")))
            .collect()
    }
}

/// Sets are tagged so peers can tell them apart from sequences. Members are
/// written in sorted order.
impl<T: WireValue + Ord> WireValue for BTreeSet<T> {
    fn to_wire(&self) -> Value {
        let members = self.iter().map(WireValue::to_wire).collect();
        let mut map = Map::new();
        map.insert(SET_KEY.to_string(), Value::Array(members));
        Value::Object(map)
    }

    fn from_wire(value: &Value, path: &str) -> Result<Self, SerdesError> {
        let members = match value {
            Value::Object(map) => map
                .get(SET_KEY)
                .or_else(|| map.get(FROZENSET_KEY))
                .and_then(Value::as_array),
            // Older peers wrote sets as plain sequences.
            Value::Array(items) => Some(items),
            _ => None,
        }
        .ok_or_else(|| SerdesError::mismatch(path, "set"))?;

        members
            .iter()
            .enumerate()
            .map(|(index, item)| T::from_wire(item, &format!("{path}[{index}]")))
            .collect()
    }
}

impl<T: WireValue> WireValue for BTreeMap<String, T> {
    fn to_wire(&self) -> Value {
        Value::Object(
            self.iter()
                .map(|(key, value)| (key.clone(), value.to_wire()))
                .collect(),
        )
    }

    fn from_wire(value: &Value, path: &str) -> Result<Self, SerdesError> {
        let map = value
            .as_object()
            .ok_or_else(|| SerdesError::mismatch(path, "mapping"))?;
        map.iter()
            .map(|(key, item)| Ok((key.clone(), T::from_wire(item, &format!("{path}.{key}"))?)))
            .collect()
    }
}
