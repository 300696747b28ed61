//! Widening a contract's server side with the relay's provenance fields.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::DispatchConfig;
use crate::contract::{Contract, MessageDef, OneSideContract};
use crate::param::{fields_for, ParamField};
use crate::schema::{find_in_objects, has_property, is_closed, COMBINATORS, ROOT_KEYWORDS};
use crate::{ContractError, Validate};

/// A contract whose server-bound params carry `$sourceClientId` (requests
/// and notifications) and `$serverToServer` (notifications).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DispatchedContract {
    contract: Contract,
}

/// Widens every server-side params schema with the registry fields for its
/// message kind. Names, kinds, result/error shapes, tags and the client side
/// are left untouched.
pub fn dispatched(contract: Contract) -> DispatchedContract {
    let Contract {
        tags,
        mut server,
        client,
    } = contract;
    for def in server.values_mut() {
        let fields = fields_for(def.kind());
        widen(def.params_mut(), fields);
    }
    debug!(
        server_messages = server.len(),
        client_messages = client.len(),
        "extended server contract with provenance fields"
    );
    DispatchedContract {
        contract: Contract {
            tags,
            server,
            client,
        },
    }
}

/// Validates `contract`, extends it and, unless disabled in `config`, checks
/// the result against the source before handing it out.
pub fn extend(
    contract: Contract,
    config: &DispatchConfig,
) -> Result<DispatchedContract, ContractError> {
    contract.validate()?;
    if !config.verify_on_extend {
        return Ok(dispatched(contract));
    }
    let extended = dispatched(contract.clone());
    extended.verify_against(&contract).inspect_err(|err| {
        warn!(error = %err, "dispatched contract failed verification");
    })?;
    Ok(extended)
}

impl DispatchedContract {
    pub fn as_contract(&self) -> &Contract {
        &self.contract
    }

    pub fn into_contract(self) -> Contract {
        self.contract
    }

    pub fn tags(&self) -> &[String] {
        &self.contract.tags
    }

    pub fn server(&self) -> &OneSideContract {
        &self.contract.server
    }

    pub fn client(&self) -> &OneSideContract {
        &self.contract.client
    }

    /// Checks that this contract is a faithful extension of `original`.
    pub fn verify_against(&self, original: &Contract) -> Result<(), ContractError> {
        let extended = &self.contract;
        if extended.tags != original.tags {
            return Err(ContractError::ShapeMismatch("tags differ".into()));
        }
        if extended.client != original.client {
            return Err(ContractError::ShapeMismatch("client side changed".into()));
        }
        if !extended.server.keys().eq(original.server.keys()) {
            return Err(ContractError::ShapeMismatch(
                "server message names differ".into(),
            ));
        }
        for ((name, def), (_, source)) in extended.server.iter().zip(&original.server) {
            if def.kind() != source.kind() {
                return Err(ContractError::ShapeMismatch(format!(
                    "{name} changed kind"
                )));
            }
            let fields = fields_for(def.kind());
            if let Some(field) = fields
                .iter()
                .find(|field| !declares(def.params(), field.name()))
            {
                return Err(ContractError::ShapeMismatch(format!(
                    "{name} params do not declare `{}`",
                    field.name()
                )));
            }
            if let (
                MessageDef::Request { result, error, .. },
                MessageDef::Request {
                    result: source_result,
                    error: source_error,
                    ..
                },
            ) = (def, source)
            {
                if result != source_result || error != source_error {
                    return Err(ContractError::ShapeMismatch(format!(
                        "{name} result or error shape changed"
                    )));
                }
            }
            if !contains_source(def.params(), source.params(), fields) {
                return Err(ContractError::ShapeMismatch(format!(
                    "{name} params no longer contain the source shape"
                )));
            }
            if let Some(field) = closed_against(def.params(), fields) {
                return Err(ContractError::ShapeMismatch(format!(
                    "{name} params have a closed branch that rejects `{field}`"
                )));
            }
        }
        Ok(())
    }
}

fn widen(params: &mut Value, fields: &[&dyn ParamField]) {
    match params {
        Value::Object(obj) if has_overlay(obj, fields) => {}
        Value::Object(obj) if obj.get("type").and_then(Value::as_str) == Some("object") => {
            add_properties(obj, fields);
            add_required(obj, fields);
            open_branches(obj, fields);
        }
        _ => {
            let mut original = std::mem::take(params);
            let mut root = Map::new();
            if let Value::Object(source) = &mut original {
                for key in ROOT_KEYWORDS {
                    if let Some(value) = source.remove(*key) {
                        root.insert((*key).to_string(), value);
                    }
                }
                if is_closed(source) {
                    add_properties(source, fields);
                }
                open_branches(source, fields);
            }
            root.insert(
                "allOf".into(),
                Value::Array(vec![original, Value::Object(overlay(fields))]),
            );
            *params = Value::Object(root);
        }
    }
}

/// Object schema declaring `fields`, used as the second `allOf` member when
/// params cannot be widened in place.
fn overlay(fields: &[&dyn ParamField]) -> Map<String, Value> {
    let mut overlay = Map::new();
    overlay.insert("type".into(), Value::String("object".into()));
    add_properties(&mut overlay, fields);
    add_required(&mut overlay, fields);
    overlay
}

fn has_overlay(schema: &Map<String, Value>, fields: &[&dyn ParamField]) -> bool {
    let expected = Value::Object(overlay(fields));
    schema
        .get("allOf")
        .and_then(Value::as_array)
        .is_some_and(|all| all.len() == 2 && all[1] == expected)
}

/// Lets closed inline branches accept the fields. Which of them are required
/// is still decided by the root or the overlay.
fn open_branches(schema: &mut Map<String, Value>, fields: &[&dyn ParamField]) {
    for key in COMBINATORS {
        let Some(Value::Array(members)) = schema.get_mut(*key) else {
            continue;
        };
        for member in members {
            let Value::Object(member) = member else {
                continue;
            };
            if is_closed(member) {
                add_properties(member, fields);
            }
            open_branches(member, fields);
        }
    }
}

fn add_properties(schema: &mut Map<String, Value>, fields: &[&dyn ParamField]) {
    let props = schema
        .entry("properties")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(props) = props.as_object_mut() {
        for field in fields {
            props.insert(field.name().to_string(), field.field_schema());
        }
    }
}

fn add_required(schema: &mut Map<String, Value>, fields: &[&dyn ParamField]) {
    let mut required = fields
        .iter()
        .filter(|field| field.is_required())
        .map(|field| field.name())
        .peekable();
    if required.peek().is_none() {
        return;
    }
    let list = schema
        .entry("required")
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Some(list) = list.as_array_mut() {
        for name in required {
            if !list.iter().any(|v| v.as_str() == Some(name)) {
                list.push(Value::String(name.to_string()));
            }
        }
    }
}

/// First field some closed subschema of `params` would reject.
fn closed_against(params: &Value, fields: &[&dyn ParamField]) -> Option<&'static str> {
    find_in_objects(params, params, |obj| {
        if !is_closed(obj) {
            return None;
        }
        fields
            .iter()
            .map(|field| field.name())
            .find(|name| !has_property(obj, name))
    })
}

/// Whether `widened` is `source` plus nothing but the registry fields.
fn contains_source(widened: &Value, source: &Value, fields: &[&dyn ParamField]) -> bool {
    let in_place = match source {
        Value::Object(obj) => {
            has_overlay(obj, fields) || obj.get("type").and_then(Value::as_str) == Some("object")
        }
        _ => false,
    };
    if in_place {
        return embeds(widened, source, fields);
    }
    let Value::Object(root) = widened else {
        return false;
    };
    if !has_overlay(root, fields) {
        return false;
    }
    let Some([inner, _]) = root
        .get("allOf")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
    else {
        return false;
    };
    let mut restored = inner.clone();
    if let Value::Object(obj) = &mut restored {
        for key in ROOT_KEYWORDS {
            if let Some(value) = root.get(*key) {
                obj.insert((*key).to_string(), value.clone());
            }
        }
    }
    embeds(&restored, source, fields)
}

/// Structural equality that ignores the registry fields in `properties` and
/// `required`, recursing through combinator members.
fn embeds(widened: &Value, source: &Value, fields: &[&dyn ParamField]) -> bool {
    let (Value::Object(wide), Value::Object(src)) = (widened, source) else {
        return widened == source;
    };
    let is_field = |name: &str| fields.iter().any(|field| field.name() == name);
    let keys: BTreeSet<&str> = wide.keys().chain(src.keys()).map(String::as_str).collect();
    keys.into_iter().all(|key| match key {
        "properties" => {
            let strip = |schema: &Map<String, Value>| {
                let mut props = schema
                    .get(key)
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                props.retain(|name, _| !is_field(name));
                props
            };
            strip(wide) == strip(src)
        }
        "required" => {
            let strip = |schema: &Map<String, Value>| {
                let mut names = schema
                    .get(key)
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                names.retain(|name| !name.as_str().is_some_and(|name| is_field(name)));
                names
            };
            strip(wide) == strip(src)
        }
        _ if COMBINATORS.contains(&key) => match (
            wide.get(key).and_then(Value::as_array),
            src.get(key).and_then(Value::as_array),
        ) {
            (Some(wide), Some(src)) => {
                wide.len() == src.len()
                    && wide
                        .iter()
                        .zip(src)
                        .all(|(wide, src)| embeds(wide, src, fields))
            }
            _ => false,
        },
        _ => wide.get(key) == src.get(key),
    })
}

fn declares(schema: &Value, name: &str) -> bool {
    schema
        .get("properties")
        .and_then(|props| props.get(name))
        .is_some()
        || schema
            .get("allOf")
            .and_then(Value::as_array)
            .is_some_and(|all| all.iter().any(|member| declares(member, name)))
}
