//! Named field descriptors and the relay's provenance registry.
//!
//! An [`ExternParam`] reads and writes one field of a generic payload object.
//! The two registry descriptors use a `$` sigil so they cannot collide with
//! application-level params; [`Contract`](crate::Contract) validation rejects
//! any method that declares them itself.

use serde_json::Value;

use crate::codec::{BooleanType, JsonType, StringType};
use crate::contract::MessageKind;
use crate::JsonObject;

/// Failure reading a descriptor from a payload.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("No value for `{param}`")]
    MissingValue { param: &'static str },
    /// Display is the decoder's issue messages joined by `", "`.
    #[error("{message}")]
    Invalid { param: &'static str, message: String },
}

impl ParamError {
    pub fn param(&self) -> &'static str {
        match self {
            ParamError::MissingValue { param } | ParamError::Invalid { param, .. } => param,
        }
    }
}

/// Typed accessor for one named field of a payload object.
#[derive(Debug, Clone)]
pub struct ExternParam<C: JsonType> {
    name: &'static str,
    codec: C,
    default: Option<C::Value>,
}

/// Builds a descriptor. Without a default, reading an absent field fails.
pub const fn param_def<C: JsonType>(
    name: &'static str,
    codec: C,
    default: Option<C::Value>,
) -> ExternParam<C> {
    ExternParam {
        name,
        codec,
        default,
    }
}

impl<C: JsonType> ExternParam<C> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn set(&self, target: &mut JsonObject, value: C::Value) {
        target.insert(self.name.to_string(), self.codec.encode(&value));
    }

    /// Removes the field, returning its raw encoded form if it was present.
    pub fn remove(&self, target: &mut JsonObject) -> Option<Value> {
        target.remove(self.name)
    }
}

impl<C> ExternParam<C>
where
    C: JsonType,
    C::Value: Clone,
{
    pub fn default_value(&self) -> Result<C::Value, ParamError> {
        self.default
            .clone()
            .ok_or(ParamError::MissingValue { param: self.name })
    }

    pub fn get(&self, target: &JsonObject) -> Result<C::Value, ParamError> {
        let Some(raw) = target.get(self.name) else {
            return self.default_value();
        };
        self.codec.decode(raw).map_err(|issues| ParamError::Invalid {
            param: self.name,
            message: issues
                .iter()
                .map(|issue| issue.message.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}

/// Type-erased view of a descriptor, used when widening parameter schemas.
pub trait ParamField: Sync {
    fn name(&self) -> &'static str;

    fn is_required(&self) -> bool;

    /// Schema of the encoded field, carrying `default` when one is set.
    fn field_schema(&self) -> Value;
}

impl<C> ParamField for ExternParam<C>
where
    C: JsonType + Sync,
    C::Value: Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_required(&self) -> bool {
        self.default.is_none()
    }

    fn field_schema(&self) -> Value {
        let mut schema = self.codec.schema();
        if let (Some(default), Some(obj)) = (&self.default, schema.as_object_mut()) {
            obj.insert("default".into(), self.codec.encode(default));
        }
        schema
    }
}

/// Client that originated a relayed message. Always supplied by the relay.
pub static SOURCE_CLIENT_ID_PARAM: ExternParam<StringType> =
    param_def("$sourceClientId", StringType, None);

/// Set when the message was forwarded between servers.
pub static SERVER_TO_SERVER_PARAM: ExternParam<BooleanType> =
    param_def("$serverToServer", BooleanType, Some(false));

/// Fields added to every server-bound request.
pub static REQUEST_FIELDS: [&dyn ParamField; 1] = [&SOURCE_CLIENT_ID_PARAM];

/// Fields added to every server-bound notification.
pub static NOTIFICATION_FIELDS: [&dyn ParamField; 2] =
    [&SOURCE_CLIENT_ID_PARAM, &SERVER_TO_SERVER_PARAM];

/// Registry fields a server-bound message of `kind` carries.
pub fn fields_for(kind: MessageKind) -> &'static [&'static dyn ParamField] {
    match kind {
        MessageKind::Request => &REQUEST_FIELDS,
        MessageKind::Notification => &NOTIFICATION_FIELDS,
    }
}

pub fn is_reserved(name: &str) -> bool {
    NOTIFICATION_FIELDS.iter().any(|field| field.name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SerdeType;
    use serde_json::json;

    fn object(value: Value) -> JsonObject {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut payload = JsonObject::new();
        SOURCE_CLIENT_ID_PARAM.set(&mut payload, "client-7".into());
        SERVER_TO_SERVER_PARAM.set(&mut payload, true);
        assert_eq!(SOURCE_CLIENT_ID_PARAM.get(&payload).unwrap(), "client-7");
        assert!(SERVER_TO_SERVER_PARAM.get(&payload).unwrap());
        assert_eq!(payload["$sourceClientId"], json!("client-7"));
    }

    #[test]
    fn relay_flag_defaults_to_false() {
        assert!(!SERVER_TO_SERVER_PARAM.get(&JsonObject::new()).unwrap());
    }

    #[test]
    fn client_id_is_required() {
        let err = SOURCE_CLIENT_ID_PARAM.get(&JsonObject::new()).unwrap_err();
        assert_eq!(
            err,
            ParamError::MissingValue {
                param: "$sourceClientId"
            }
        );
        assert!(err.to_string().starts_with("No value"));
    }

    #[test]
    fn malformed_flag_reports_validation_error() {
        let payload = object(json!({ "$serverToServer": "not-a-boolean" }));
        let err = SERVER_TO_SERVER_PARAM.get(&payload).unwrap_err();
        assert!(matches!(err, ParamError::Invalid { param: "$serverToServer", .. }));
        let message = err.to_string();
        assert!(!message.is_empty());
        assert!(message.contains("not-a-boolean"));
        assert!(message.contains("boolean"));
    }

    #[test]
    fn issue_messages_are_comma_joined() {
        let attempts = param_def("attempts", SerdeType::<u32>::new(), None);
        let payload = object(json!({ "attempts": "three" }));
        let err = attempts.get(&payload).unwrap_err();
        let message = err.to_string();
        assert!(message.contains(", "));
        assert!(message.starts_with("invalid value \"three\""));
    }

    #[test]
    fn registry_names_do_not_collide() {
        assert_ne!(SOURCE_CLIENT_ID_PARAM.name(), SERVER_TO_SERVER_PARAM.name());
        for app_name in ["value", "id", "text", "sourceClientId", "serverToServer"] {
            assert!(!is_reserved(app_name), "{app_name} should not be reserved");
        }
        assert!(is_reserved("$sourceClientId"));
        assert!(is_reserved("$serverToServer"));
    }

    #[test]
    fn field_schema_carries_default() {
        assert_eq!(
            SERVER_TO_SERVER_PARAM.field_schema(),
            json!({ "type": "boolean", "default": false })
        );
        assert_eq!(
            SOURCE_CLIENT_ID_PARAM.field_schema(),
            json!({ "type": "string" })
        );
        assert!(SOURCE_CLIENT_ID_PARAM.is_required());
        assert!(!SERVER_TO_SERVER_PARAM.is_required());
    }

    #[test]
    fn remove_strips_field() {
        let mut payload = object(json!({ "$sourceClientId": "c1", "text": "hi" }));
        assert_eq!(SOURCE_CLIENT_ID_PARAM.remove(&mut payload), Some(json!("c1")));
        assert_eq!(payload, object(json!({ "text": "hi" })));
    }
}
