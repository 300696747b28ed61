//! Provenance-extended RPC contracts.
//!
//! A contract lists the requests and notifications two peers exchange. When a
//! multiplexing relay forwards server-bound traffic it tags every message with
//! the originating client (`$sourceClientId`) and whether the hop was
//! server-to-server (`$serverToServer`). [`dispatched`] widens a contract's
//! server side so those fields are part of each parameter shape, and the
//! registry descriptors in [`param`] read and write them on live payloads.

pub mod codec;
mod config;
pub mod contract;
pub mod dispatch;
pub mod param;
pub mod provenance;
mod schema;
pub mod typed;

pub use codec::{BooleanType, JsonType, SerdeType, StringType, ValidationIssue};
pub use config::{config_schema_json, load_config, parse_config, DispatchConfig, Enforcement};
pub use contract::{Contract, ContractBuilder, MessageDef, MessageKind, OneSideContract, Side};
pub use dispatch::{dispatched, extend, DispatchedContract};
pub use param::{
    fields_for, is_reserved, param_def, ExternParam, ParamError, ParamField, NOTIFICATION_FIELDS,
    REQUEST_FIELDS, SERVER_TO_SERVER_PARAM, SOURCE_CLIENT_ID_PARAM,
};
pub use provenance::{Admission, InboundGuard, Provenance};
pub use typed::{NotificationType, Relayed, RequestType, Sourced};

/// Generic string-keyed payload a message's params travel as.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Shared error type for contract construction, extension and admission.
#[derive(thiserror::Error, Debug)]
pub enum ContractError {
    #[error("invalid method name: {0:?}")]
    InvalidMethod(String),
    #[error("duplicate {side} message: {name}")]
    DuplicateMessage { side: Side, name: String },
    #[error("{method} declares reserved param `{param}`")]
    ReservedParam { method: String, param: &'static str },
    #[error("{method} params must describe an object")]
    NonObjectParams { method: String },
    #[error("extended contract does not match its source: {0}")]
    ShapeMismatch(String),
    #[error("unknown server method: {0}")]
    UnknownMethod(String),
    #[error("{method} rejected: {reason}")]
    Rejected { method: String, reason: String },
    #[error("invalid schema: {0}")]
    Schema(String),
    #[error(transparent)]
    Param(#[from] ParamError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Structural checks run on a value before it is put to use.
pub trait Validate {
    fn validate(&self) -> Result<(), ContractError>;
}
