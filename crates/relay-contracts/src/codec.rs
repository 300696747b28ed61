//! Value codecs used by param descriptors.
//!
//! A codec turns a typed value into its JSON form and back. Decoding reports
//! every problem it finds as a [`ValidationIssue`] instead of stopping at the
//! first one, so callers can surface a single combined message.

use std::marker::PhantomData;

use schemars::gen::SchemaGenerator;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

/// One problem found while decoding a JSON value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub message: String,
}

impl ValidationIssue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    fn invalid_value(value: &Value, type_name: &str) -> Self {
        Self::new(format!("invalid value {value} supplied to : {type_name}"))
    }
}

/// Runtime codec for a JSON-safe value.
pub trait JsonType {
    type Value;

    /// Short type name used in issue messages.
    fn name(&self) -> &str;

    /// Encoding is total: every value of `Self::Value` has a JSON form.
    fn encode(&self, value: &Self::Value) -> Value;

    fn decode(&self, value: &Value) -> Result<Self::Value, Vec<ValidationIssue>>;

    /// JSON Schema describing the encoded form.
    fn schema(&self) -> Value;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StringType;

impl JsonType for StringType {
    type Value = String;

    fn name(&self) -> &str {
        "string"
    }

    fn encode(&self, value: &String) -> Value {
        Value::String(value.clone())
    }

    fn decode(&self, value: &Value) -> Result<String, Vec<ValidationIssue>> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(vec![ValidationIssue::invalid_value(other, self.name())]),
        }
    }

    fn schema(&self) -> Value {
        json!({ "type": "string" })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanType;

impl JsonType for BooleanType {
    type Value = bool;

    fn name(&self) -> &str {
        "boolean"
    }

    fn encode(&self, value: &bool) -> Value {
        Value::Bool(*value)
    }

    fn decode(&self, value: &Value) -> Result<bool, Vec<ValidationIssue>> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => Err(vec![ValidationIssue::invalid_value(other, self.name())]),
        }
    }

    fn schema(&self) -> Value {
        json!({ "type": "boolean" })
    }
}

/// Codec for any serde type that also derives `JsonSchema`.
pub struct SerdeType<T>(PhantomData<fn() -> T>);

impl<T> SerdeType<T> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for SerdeType<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SerdeType<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SerdeType<T> {}

impl<T> std::fmt::Debug for SerdeType<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SerdeType")
            .field(&std::any::type_name::<T>())
            .finish()
    }
}

impl<T> JsonType for SerdeType<T>
where
    T: Serialize + DeserializeOwned + JsonSchema,
{
    type Value = T;

    fn name(&self) -> &str {
        std::any::type_name::<T>()
    }

    /// # Panics
    ///
    /// Panics if `T` has no JSON form (for example a map with non-string
    /// keys). Writing `null` instead would silently replace the value.
    fn encode(&self, value: &T) -> Value {
        serde_json::to_value(value).expect("codec value must serialize to JSON")
    }

    fn decode(&self, value: &Value) -> Result<T, Vec<ValidationIssue>> {
        serde_json::from_value(value.clone()).map_err(|err| {
            vec![
                ValidationIssue::invalid_value(value, self.name()),
                ValidationIssue::new(err.to_string()),
            ]
        })
    }

    fn schema(&self) -> Value {
        schema_value::<T>()
    }
}

/// Generates the root JSON Schema for `T`.
///
/// # Panics
///
/// Panics if the generated schema cannot be represented as JSON; this
/// indicates a programming error in a `JsonSchema` impl.
pub(crate) fn schema_value<T: JsonSchema>() -> Value {
    let schema = SchemaGenerator::default().into_root_schema_for::<T>();
    serde_json::to_value(&schema).expect("schema value")
}
