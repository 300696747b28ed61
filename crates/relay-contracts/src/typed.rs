//! Typed message descriptors.
//!
//! `RequestType<P, R, E>` and `NotificationType<P>` name a method and carry
//! its param/result/error types at compile time. Calling `dispatched()` on a
//! server-bound descriptor yields the descriptor the relay's server actually
//! speaks: params wrapped in [`Sourced`] (requests) or [`Relayed`]
//! (notifications).

use std::fmt;
use std::marker::PhantomData;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::schema_value;
use crate::contract::{MessageDef, MessageKind};
use crate::provenance::Provenance;
use crate::ContractError;

/// Params of a relayed request: the original params plus the client they
/// came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Sourced<P> {
    #[serde(flatten)]
    pub params: P,
    #[serde(rename = "$sourceClientId")]
    pub source_client_id: String,
}

/// Params of a relayed notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Relayed<P> {
    #[serde(flatten)]
    pub params: P,
    #[serde(rename = "$sourceClientId")]
    pub source_client_id: String,
    #[serde(rename = "$serverToServer", default)]
    pub server_to_server: bool,
}

impl<P> Sourced<P> {
    pub fn new(params: P, source_client_id: impl Into<String>) -> Self {
        Self {
            params,
            source_client_id: source_client_id.into(),
        }
    }
}

impl<P> Relayed<P> {
    pub fn new(params: P, provenance: Provenance) -> Self {
        Self {
            params,
            source_client_id: provenance.source_client_id,
            server_to_server: provenance.server_to_server,
        }
    }

    pub fn provenance(&self) -> Provenance {
        Provenance {
            source_client_id: self.source_client_id.clone(),
            server_to_server: self.server_to_server,
        }
    }
}

pub struct RequestType<P, R, E = ()> {
    method: &'static str,
    _marker: PhantomData<fn() -> (P, R, E)>,
}

impl<P, R, E> RequestType<P, R, E> {
    pub const fn new(method: &'static str) -> Self {
        Self {
            method,
            _marker: PhantomData,
        }
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn kind(&self) -> MessageKind {
        MessageKind::Request
    }

    /// Same method, with params widened to carry `$sourceClientId`.
    pub fn dispatched(self) -> RequestType<Sourced<P>, R, E> {
        RequestType::new(self.method)
    }
}

impl<P, R, E> RequestType<P, R, E>
where
    P: JsonSchema,
    R: JsonSchema,
    E: JsonSchema,
{
    pub fn def(&self) -> MessageDef {
        MessageDef::Request {
            params: schema_value::<P>(),
            result: schema_value::<R>(),
            error: schema_value::<E>(),
        }
    }
}

impl<P, R, E> RequestType<P, R, E>
where
    P: Serialize + DeserializeOwned,
{
    pub fn encode_params(&self, params: &P) -> Result<Value, ContractError> {
        Ok(serde_json::to_value(params)?)
    }

    pub fn decode_params(&self, params: Value) -> Result<P, ContractError> {
        Ok(serde_json::from_value(params)?)
    }
}

impl<P, R, E> Clone for RequestType<P, R, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P, R, E> Copy for RequestType<P, R, E> {}

impl<P, R, E> fmt::Debug for RequestType<P, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestType")
            .field("method", &self.method)
            .finish()
    }
}

pub struct NotificationType<P> {
    method: &'static str,
    _marker: PhantomData<fn() -> P>,
}

impl<P> NotificationType<P> {
    pub const fn new(method: &'static str) -> Self {
        Self {
            method,
            _marker: PhantomData,
        }
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn kind(&self) -> MessageKind {
        MessageKind::Notification
    }

    /// Same method, with params widened to carry both provenance fields.
    pub fn dispatched(self) -> NotificationType<Relayed<P>> {
        NotificationType::new(self.method)
    }
}

impl<P: JsonSchema> NotificationType<P> {
    pub fn def(&self) -> MessageDef {
        MessageDef::Notification {
            params: schema_value::<P>(),
        }
    }
}

impl<P> NotificationType<P>
where
    P: Serialize + DeserializeOwned,
{
    pub fn encode_params(&self, params: &P) -> Result<Value, ContractError> {
        Ok(serde_json::to_value(params)?)
    }

    pub fn decode_params(&self, params: Value) -> Result<P, ContractError> {
        Ok(serde_json::from_value(params)?)
    }
}

impl<P> Clone for NotificationType<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for NotificationType<P> {}

impl<P> fmt::Debug for NotificationType<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationType")
            .field("method", &self.method)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
    struct Say {
        text: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
    struct Lookup {
        id: u64,
    }

    const SAY: NotificationType<Say> = NotificationType::new("say");
    const LOOKUP: RequestType<Lookup, String> = RequestType::new("lookup");

    #[test]
    fn dispatched_keeps_method_and_kind() {
        let say = SAY.dispatched();
        assert_eq!(say.method(), "say");
        assert_eq!(say.kind(), MessageKind::Notification);

        let lookup = LOOKUP.dispatched();
        assert_eq!(lookup.method(), "lookup");
        assert_eq!(lookup.kind(), MessageKind::Request);
    }

    #[test]
    fn relayed_params_decode_with_flag_default() {
        let say = SAY.dispatched();
        let params = say
            .decode_params(json!({ "text": "hi", "$sourceClientId": "c1" }))
            .unwrap();
        assert_eq!(params.params.text, "hi");
        assert_eq!(params.source_client_id, "c1");
        assert!(!params.server_to_server);
        assert_eq!(params.provenance(), Provenance::direct("c1"));
    }

    #[test]
    fn relayed_params_encode_flat() {
        let say = SAY.dispatched();
        let params = Relayed::new(
            Say {
                text: "hi".into(),
            },
            Provenance::relayed("c1"),
        );
        assert_eq!(
            say.encode_params(&params).unwrap(),
            json!({ "text": "hi", "$sourceClientId": "c1", "$serverToServer": true })
        );
    }

    #[test]
    fn sourced_request_requires_client_id() {
        let lookup = LOOKUP.dispatched();
        assert!(lookup.decode_params(json!({ "id": 4 })).is_err());
        let params = lookup
            .decode_params(json!({ "id": 4, "$sourceClientId": "c9" }))
            .unwrap();
        assert_eq!(params, Sourced::new(Lookup { id: 4 }, "c9"));
    }

    #[test]
    fn sourced_schema_declares_client_id() {
        let MessageDef::Request { params, result, .. } = LOOKUP.dispatched().def() else {
            panic!("expected request definition");
        };
        assert_eq!(params["properties"]["$sourceClientId"]["type"], "string");
        let required = params["required"].as_array().unwrap();
        assert!(required.contains(&json!("$sourceClientId")));
        assert!(required.contains(&json!("id")));
        assert_eq!(result["type"], "string");
    }
}
