use crate::etl::traits::Transformer;
use crate::types::{Payload, TransformOutcome};
use crate::{error::ForgeFlowError, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const INGESTED_AT_FIELD: &str = "_ingested_at";

fn default_separator() -> String {
    "_".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Collapse nested mappings into `parent_child` keys
    #[serde(default)]
    pub flatten: bool,
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Populated with the current time when the record lacks it
    #[serde(default)]
    pub timestamp_field: Option<String>,
    #[serde(default = "default_true")]
    pub add_ingested_at: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            flatten: false,
            separator: default_separator(),
            timestamp_field: None,
            add_ingested_at: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonNormalizer {
    config: NormalizerConfig,
}

impl JsonNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn from_config(config: &Map<String, Value>) -> Result<Self> {
        let config: NormalizerConfig = serde_json::from_value(Value::Object(config.clone()))
            .map_err(|e| ForgeFlowError::InvalidConfig(format!("json_normalizer: {}", e)))?;
        Ok(Self::new(config))
    }

    pub fn normalize(&self, record: &Value) -> Result<Value> {
        let Value::Object(map) = record else {
            return Err(ForgeFlowError::Transform(
                "json_normalizer expects a mapping record".to_string(),
            ));
        };

        let mut normalized = if self.config.flatten {
            let mut flat = Map::new();
            flatten_into(&mut flat, None, map, &self.config.separator);
            flat
        } else {
            map.clone()
        };

        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        if let Some(field) = &self.config.timestamp_field {
            if !normalized.contains_key(field) {
                normalized.insert(field.clone(), Value::String(now.clone()));
            }
        }
        if self.config.add_ingested_at {
            normalized.insert(INGESTED_AT_FIELD.to_string(), Value::String(now));
        }

        Ok(Value::Object(normalized))
    }
}

fn flatten_into(out: &mut Map<String, Value>, prefix: Option<&str>, map: &Map<String, Value>, sep: &str) {
    for (key, value) in map {
        let flat_key = match prefix {
            Some(prefix) => format!("{}{}{}", prefix, sep, key),
            None => key.clone(),
        };
        match value {
            Value::Object(nested) if !nested.is_empty() => {
                flatten_into(out, Some(&flat_key), nested, sep)
            }
            other => {
                out.insert(flat_key, other.clone());
            }
        }
    }
}

impl Transformer for JsonNormalizer {
    fn kind(&self) -> &str {
        "json_normalizer"
    }

    fn transform(&self, payload: &Payload) -> Result<TransformOutcome> {
        self.normalize(payload).map(TransformOutcome::Keep)
    }
}
