//! Runtime description of a two-sided RPC contract.
//!
//! Each side maps message names to a [`MessageDef`]. Parameter, result and
//! error shapes are JSON Schema documents, normally generated from the Rust
//! types behind a [`RequestType`] or [`NotificationType`].

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::param::NOTIFICATION_FIELDS;
use crate::schema::{find_in_objects, has_property};
use crate::typed::{NotificationType, RequestType};
use crate::{ContractError, Validate};

static METHOD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_./-]*$").expect("method regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Request,
    Notification,
}

/// Which peer handles a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Server,
    Client,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Server => f.write_str("server"),
            Side::Client => f.write_str("client"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MessageDef {
    Request {
        params: Value,
        result: Value,
        error: Value,
    },
    Notification {
        params: Value,
    },
}

impl MessageDef {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageDef::Request { .. } => MessageKind::Request,
            MessageDef::Notification { .. } => MessageKind::Notification,
        }
    }

    pub fn params(&self) -> &Value {
        match self {
            MessageDef::Request { params, .. } | MessageDef::Notification { params } => params,
        }
    }

    pub fn params_mut(&mut self) -> &mut Value {
        match self {
            MessageDef::Request { params, .. } | MessageDef::Notification { params } => params,
        }
    }
}

pub type OneSideContract = BTreeMap<String, MessageDef>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub server: OneSideContract,
    #[serde(default)]
    pub client: OneSideContract,
}

impl Contract {
    pub fn builder() -> ContractBuilder {
        ContractBuilder::default()
    }

    pub fn side(&self, side: Side) -> &OneSideContract {
        match side {
            Side::Server => &self.server,
            Side::Client => &self.client,
        }
    }

    pub fn message(&self, side: Side, name: &str) -> Option<&MessageDef> {
        self.side(side).get(name)
    }
}

impl Validate for Contract {
    fn validate(&self) -> Result<(), ContractError> {
        for name in self.server.keys().chain(self.client.keys()) {
            if !METHOD_RE.is_match(name) {
                return Err(ContractError::InvalidMethod(name.clone()));
            }
        }
        for (name, def) in &self.server {
            let params = def.params();
            if !describes_object(params) {
                return Err(ContractError::NonObjectParams {
                    method: name.clone(),
                });
            }
            if let Some(param) = reserved_in(def) {
                return Err(ContractError::ReservedParam {
                    method: name.clone(),
                    param,
                });
            }
        }
        Ok(())
    }
}

/// Params travel as JSON objects, so a schema pinned to any other type can
/// never be widened with extra fields.
fn describes_object(schema: &Value) -> bool {
    match schema {
        Value::Bool(accepts) => *accepts,
        Value::Object(obj) => match obj.get("type") {
            None => true,
            Some(Value::String(ty)) => ty == "object",
            Some(Value::Array(types)) => types.iter().any(|ty| ty == "object"),
            Some(_) => false,
        },
        _ => false,
    }
}

/// Assembles a [`Contract`] from typed message descriptors.
#[derive(Debug, Default)]
pub struct ContractBuilder {
    contract: Contract,
    duplicates: Vec<(Side, String)>,
}

impl ContractBuilder {
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.contract.tags.push(tag.into());
        self
    }

    pub fn server_request<P, R, E>(self, ty: &RequestType<P, R, E>) -> Self
    where
        P: JsonSchema,
        R: JsonSchema,
        E: JsonSchema,
    {
        self.insert(Side::Server, ty.method(), ty.def())
    }

    pub fn server_notification<P: JsonSchema>(self, ty: &NotificationType<P>) -> Self {
        self.insert(Side::Server, ty.method(), ty.def())
    }

    pub fn client_request<P, R, E>(self, ty: &RequestType<P, R, E>) -> Self
    where
        P: JsonSchema,
        R: JsonSchema,
        E: JsonSchema,
    {
        self.insert(Side::Client, ty.method(), ty.def())
    }

    pub fn client_notification<P: JsonSchema>(self, ty: &NotificationType<P>) -> Self {
        self.insert(Side::Client, ty.method(), ty.def())
    }

    /// Inserts an already-built definition.
    pub fn message(self, side: Side, name: impl Into<String>, def: MessageDef) -> Self {
        let name: String = name.into();
        self.insert(side, &name, def)
    }

    fn insert(mut self, side: Side, name: &str, def: MessageDef) -> Self {
        let map = match side {
            Side::Server => &mut self.contract.server,
            Side::Client => &mut self.contract.client,
        };
        if map.insert(name.to_string(), def).is_some() {
            self.duplicates.push((side, name.to_string()));
        }
        self
    }

    pub fn build(self) -> Result<Contract, ContractError> {
        if let Some((side, name)) = self.duplicates.into_iter().next() {
            return Err(ContractError::DuplicateMessage { side, name });
        }
        self.contract.validate()?;
        Ok(self.contract)
    }
}

/// First registry field a definition declares among its own params, including
/// combinator branches and the local definitions they reference.
///
/// Reserved names may still appear on the client side; only server-bound
/// params are widened.
fn reserved_in(def: &MessageDef) -> Option<&'static str> {
    let params = def.params();
    find_in_objects(params, params, |obj| {
        NOTIFICATION_FIELDS
            .iter()
            .map(|field| field.name())
            .find(|name| has_property(obj, name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(JsonSchema)]
    #[allow(dead_code)]
    struct Ping {
        seq: u32,
    }

    #[derive(JsonSchema)]
    #[allow(dead_code)]
    struct Leaky {
        #[schemars(rename = "$sourceClientId")]
        source: String,
    }

    const PING: RequestType<Ping, u32> = RequestType::new("ping");
    const LOG: NotificationType<Ping> = NotificationType::new("log/line");

    #[test]
    fn builder_collects_both_sides() {
        let contract = Contract::builder()
            .tag("v1")
            .server_request(&PING)
            .server_notification(&LOG)
            .client_notification(&LOG)
            .build()
            .unwrap();
        assert_eq!(contract.tags, vec!["v1".to_string()]);
        assert_eq!(contract.server.len(), 2);
        assert_eq!(
            contract.message(Side::Server, "ping").unwrap().kind(),
            MessageKind::Request
        );
        assert_eq!(
            contract.message(Side::Client, "log/line").unwrap().kind(),
            MessageKind::Notification
        );
    }

    #[test]
    fn duplicate_names_fail() {
        let err = Contract::builder()
            .server_request(&PING)
            .server_notification(&NotificationType::<Ping>::new("ping"))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ContractError::DuplicateMessage { side: Side::Server, ref name } if name == "ping"
        ));
    }

    #[test]
    fn sigil_method_names_are_rejected() {
        let err = Contract::builder()
            .server_notification(&NotificationType::<Ping>::new("$cancel"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ContractError::InvalidMethod(_)));
    }

    #[test]
    fn reserved_params_are_rejected_on_server_side() {
        let leaky = NotificationType::<Leaky>::new("leak");
        let err = Contract::builder()
            .server_notification(&leaky)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ContractError::ReservedParam {
                param: "$sourceClientId",
                ..
            }
        ));

        let contract = Contract::builder().client_notification(&leaky).build().unwrap();
        assert_eq!(reserved_in(&contract.client["leak"]), Some("$sourceClientId"));
    }

    #[test]
    fn reserved_params_inside_branches_are_rejected() {
        let branched = MessageDef::Notification {
            params: json!({
                "oneOf": [
                    { "type": "object", "properties": { "text": { "type": "string" } } },
                    { "$ref": "#/definitions/Relay" }
                ],
                "definitions": {
                    "Relay": {
                        "type": "object",
                        "properties": { "$serverToServer": { "type": "string" } }
                    }
                }
            }),
        };
        let err = Contract::builder()
            .message(Side::Server, "branched", branched)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ContractError::ReservedParam {
                param: "$serverToServer",
                ..
            }
        ));

        let inline = MessageDef::Notification {
            params: json!({
                "anyOf": [{ "properties": { "$sourceClientId": { "type": "integer" } } }]
            }),
        };
        assert_eq!(reserved_in(&inline), Some("$sourceClientId"));
    }

    #[test]
    fn scalar_server_params_are_rejected() {
        let err = Contract::builder()
            .message(
                Side::Server,
                "count",
                MessageDef::Notification {
                    params: json!({ "type": "integer" }),
                },
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, ContractError::NonObjectParams { .. }));
    }

    #[test]
    fn definitions_round_trip_through_serde() {
        let def = MessageDef::Notification {
            params: json!({ "type": "object" }),
        };
        let encoded = serde_json::to_value(&def).unwrap();
        assert_eq!(encoded["kind"], "notification");
        let decoded: MessageDef = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, def);
    }
}
