use anyhow::Result;
use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Where provenance on server-bound messages is enforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Enforcement {
    /// The relay validates every server-bound message against the extended
    /// contract before dispatching it.
    #[default]
    Inbound,
    /// Only the method is checked on arrival; handlers read the fields.
    Handler,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct DispatchConfig {
    /// Compare the extended contract with its source when it is built.
    #[serde(default = "default_verify_on_extend")]
    pub verify_on_extend: bool,
    #[serde(default)]
    pub enforcement: Enforcement,
}

fn default_verify_on_extend() -> bool {
    true
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            verify_on_extend: default_verify_on_extend(),
            enforcement: Enforcement::default(),
        }
    }
}

static CONFIG_SCHEMA: Lazy<Validator> = Lazy::new(|| {
    validator_for(&config_schema_json()).expect("valid schema")
});

/// Returns the JSON schema describing the configuration structure.
///
/// # Panics
///
/// Panics if schema generation fails; this indicates a programming error.
pub fn config_schema_json() -> serde_json::Value {
    let schema = schemars::schema_for!(DispatchConfig);
    serde_json::to_value(&schema).expect("schema json")
}

pub fn parse_config(content: &str) -> Result<DispatchConfig> {
    let raw: toml::Table = toml::from_str(content)?;
    let json_value = serde_json::to_value(&raw)?;
    let validation_errors: Vec<_> = CONFIG_SCHEMA
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        return Err(anyhow::anyhow!(validation_errors.join(", ")));
    }
    let cfg: DispatchConfig = toml::from_str(content)?;
    Ok(cfg)
}

pub fn load_config(path: &str) -> Result<DispatchConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}
