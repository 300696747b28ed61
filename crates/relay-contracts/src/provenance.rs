//! Reading, writing and enforcing provenance on server-bound payloads.
//!
//! The relay stamps a [`Provenance`] onto every message it forwards to the
//! server. Whether the fields are checked when a message arrives or only when
//! a handler reads them is set by [`Enforcement`]; an [`InboundGuard`] built
//! from a [`DispatchedContract`] applies that choice.

use std::collections::BTreeMap;

use jsonschema::{validator_for, Validator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{DispatchConfig, Enforcement};
use crate::contract::MessageKind;
use crate::dispatch::DispatchedContract;
use crate::param::{ParamError, SERVER_TO_SERVER_PARAM, SOURCE_CLIENT_ID_PARAM};
use crate::{ContractError, JsonObject};

/// Where a server-bound message came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_client_id: String,
    pub server_to_server: bool,
}

impl Provenance {
    /// Sent by a client straight through the relay.
    pub fn direct(source_client_id: impl Into<String>) -> Self {
        Self {
            source_client_id: source_client_id.into(),
            server_to_server: false,
        }
    }

    /// Forwarded on behalf of `source_client_id` by another server.
    pub fn relayed(source_client_id: impl Into<String>) -> Self {
        Self {
            source_client_id: source_client_id.into(),
            server_to_server: true,
        }
    }

    /// Reads provenance off a payload. Requests never carry the relay flag,
    /// so it always reads as `false` for them.
    pub fn read(kind: MessageKind, payload: &JsonObject) -> Result<Self, ParamError> {
        let source_client_id = SOURCE_CLIENT_ID_PARAM.get(payload)?;
        let server_to_server = match kind {
            MessageKind::Request => false,
            MessageKind::Notification => SERVER_TO_SERVER_PARAM.get(payload)?,
        };
        Ok(Self {
            source_client_id,
            server_to_server,
        })
    }

    /// Writes the fields a message of `kind` carries.
    pub fn stamp(&self, kind: MessageKind, payload: &mut JsonObject) {
        SOURCE_CLIENT_ID_PARAM.set(payload, self.source_client_id.clone());
        if kind == MessageKind::Notification {
            SERVER_TO_SERVER_PARAM.set(payload, self.server_to_server);
        }
    }

    /// Drops both fields so application code sees its original params.
    pub fn strip(payload: &mut JsonObject) {
        SOURCE_CLIENT_ID_PARAM.remove(payload);
        SERVER_TO_SERVER_PARAM.remove(payload);
    }
}

/// Result of admitting a server-bound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub kind: MessageKind,
    /// Present when the guard enforces provenance on arrival.
    pub provenance: Option<Provenance>,
}

struct Route {
    kind: MessageKind,
    validator: Option<Validator>,
}

/// Gatekeeper for messages arriving on the server side of a relay.
pub struct InboundGuard {
    enforcement: Enforcement,
    routes: BTreeMap<String, Route>,
}

impl InboundGuard {
    pub fn new(
        contract: &DispatchedContract,
        config: &DispatchConfig,
    ) -> Result<Self, ContractError> {
        let mut routes = BTreeMap::new();
        for (name, def) in contract.server() {
            let validator = match config.enforcement {
                Enforcement::Inbound => Some(
                    validator_for(def.params())
                        .map_err(|err| ContractError::Schema(format!("{name}: {err}")))?,
                ),
                Enforcement::Handler => None,
            };
            routes.insert(
                name.clone(),
                Route {
                    kind: def.kind(),
                    validator,
                },
            );
        }
        debug!(
            routes = routes.len(),
            enforcement = ?config.enforcement,
            "inbound guard ready"
        );
        Ok(Self {
            enforcement: config.enforcement,
            routes,
        })
    }

    pub fn enforcement(&self) -> Enforcement {
        self.enforcement
    }

    pub fn kind_of(&self, method: &str) -> Option<MessageKind> {
        self.routes.get(method).map(|route| route.kind)
    }

    /// Checks a server-bound message before it reaches a handler.
    pub fn admit(&self, method: &str, params: &Value) -> Result<Admission, ContractError> {
        let Some(route) = self.routes.get(method) else {
            warn!(method, "rejected message for unknown server method");
            return Err(ContractError::UnknownMethod(method.to_string()));
        };
        let Some(payload) = params.as_object() else {
            return Err(self.reject(method, "params must be an object".into()));
        };
        let Some(validator) = &route.validator else {
            return Ok(Admission {
                kind: route.kind,
                provenance: None,
            });
        };

        let errors: Vec<String> = validator
            .iter_errors(params)
            .map(|err| err.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(self.reject(method, errors.join(", ")));
        }
        let provenance = Provenance::read(route.kind, payload)
            .map_err(|err| self.reject(method, err.to_string()))?;
        Ok(Admission {
            kind: route.kind,
            provenance: Some(provenance),
        })
    }

    fn reject(&self, method: &str, reason: String) -> ContractError {
        warn!(method, %reason, "rejected inbound message");
        ContractError::Rejected {
            method: method.to_string(),
            reason,
        }
    }
}
