use crate::etl::filter::type_name;
use crate::etl::path::{remove_path, resolve, set_path};
use crate::etl::traits::Transformer;
use crate::types::{Payload, Record, TransformOutcome};
use crate::{error::ForgeFlowError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[serde(alias = "str")]
    String,
    #[serde(alias = "integer")]
    Int,
    #[serde(alias = "double")]
    Float,
    #[serde(alias = "boolean")]
    Bool,
    #[serde(alias = "array")]
    List,
    #[serde(alias = "object")]
    Dict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaMappingRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub target: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<FieldType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Template with `{dotted.path}` placeholders; takes precedence over `source`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default)]
    pub required: bool,
}

impl SchemaMappingRule {
    pub fn source(source: &str, target: &str) -> Self {
        Self {
            source: Some(source.to_string()),
            target: target.to_string(),
            field_type: None,
            default: None,
            expression: None,
            required: false,
        }
    }

    pub fn expression(target: &str, expression: &str) -> Self {
        Self {
            source: None,
            target: target.to_string(),
            field_type: None,
            default: None,
            expression: Some(expression.to_string()),
            required: false,
        }
    }

    pub fn typed(mut self, field_type: FieldType) -> Self {
        self.field_type = Some(field_type);
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn describe(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.target)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapperConfig {
    #[serde(default)]
    pub mappings: Vec<SchemaMappingRule>,
    #[serde(default)]
    pub exclude_fields: Vec<String>,
    #[serde(default)]
    pub include_unmapped: bool,
    #[serde(default)]
    pub strict: bool,
}

/// Reshapes a record through declarative rules, evaluated in declared order
#[derive(Debug)]
pub struct SchemaMapper {
    config: MapperConfig,
    placeholder: Regex,
    /// Top-level source keys read by a `source` rule
    consumed: HashSet<String>,
}

impl SchemaMapper {
    pub fn new(config: MapperConfig) -> Result<Self> {
        for (index, rule) in config.mappings.iter().enumerate() {
            if rule.target.trim().is_empty() {
                return Err(ForgeFlowError::InvalidConfig(format!(
                    "schema_mapper rule {}: target must not be empty",
                    index
                )));
            }
            if rule.source.is_none() && rule.expression.is_none() {
                return Err(ForgeFlowError::InvalidConfig(format!(
                    "schema_mapper rule {} for '{}': source or expression is required",
                    index, rule.target
                )));
            }
        }

        let placeholder = Regex::new(r"\{([^}]+)\}")
            .map_err(|e| ForgeFlowError::InvalidConfig(e.to_string()))?;

        let consumed = config
            .mappings
            .iter()
            .filter(|rule| rule.expression.is_none())
            .filter_map(|rule| rule.source.as_deref())
            .filter_map(|source| source.split('.').next())
            .map(str::to_string)
            .collect();

        Ok(Self {
            config,
            placeholder,
            consumed,
        })
    }

    pub fn from_config(config: &Map<String, Value>) -> Result<Self> {
        let config: MapperConfig = serde_json::from_value(Value::Object(config.clone()))
            .map_err(|e| ForgeFlowError::InvalidConfig(format!("schema_mapper: {}", e)))?;
        Self::new(config)
    }

    pub fn evaluate(&self, record: &Value) -> Result<Record> {
        let Value::Object(source) = record else {
            return Err(ForgeFlowError::Transform(format!(
                "schema_mapper expects a mapping record, got {}",
                type_name(record)
            )));
        };

        let mut output = Map::new();
        for rule in &self.config.mappings {
            if let Some(value) = self.apply_rule(record, rule)? {
                set_path(&mut output, &rule.target, value);
            }
        }

        let excluded: HashSet<&str> = self.config.exclude_fields.iter().map(String::as_str).collect();

        if self.config.include_unmapped {
            for (key, value) in source {
                if self.consumed.contains(key)
                    || excluded.contains(key.as_str())
                    || output.contains_key(key)
                {
                    continue;
                }
                output.insert(key.clone(), value.clone());
            }
        }

        for field in &self.config.exclude_fields {
            remove_path(&mut output, field);
        }

        Ok(Value::Object(output))
    }

    /// `None` leaves the target unset
    fn apply_rule(&self, record: &Value, rule: &SchemaMappingRule) -> Result<Option<Value>> {
        let strict = self.config.strict;

        let resolved = match &rule.expression {
            Some(expression) => {
                let (rendered, missing) = self.render(record, expression);
                if rule.required && strict && !missing.is_empty() {
                    return Err(ForgeFlowError::Mapping(format!(
                        "required field '{}' references missing {}",
                        rule.target,
                        missing.join(", ")
                    )));
                }
                Some(Value::String(rendered))
            }
            None => rule
                .source
                .as_deref()
                .and_then(|source| resolve(record, source))
                .filter(|value| !value.is_null())
                .cloned(),
        };

        let value = match resolved {
            Some(value) => value,
            None => match &rule.default {
                Some(default) => default.clone(),
                None if rule.required && strict => {
                    return Err(ForgeFlowError::Mapping(format!(
                        "required field '{}' is missing",
                        rule.describe()
                    )));
                }
                None if rule.required => Value::Null,
                None => return Ok(None),
            },
        };

        let Some(field_type) = rule.field_type else {
            return Ok(Some(value));
        };
        if value.is_null() {
            return Ok(Some(value));
        }

        match coerce(&value, field_type) {
            Ok(converted) => Ok(Some(converted)),
            Err(reason) if strict => Err(ForgeFlowError::Mapping(format!(
                "field '{}': {}",
                rule.target, reason
            ))),
            Err(_) => Ok(Some(rule.default.clone().unwrap_or(Value::Null))),
        }
    }

    /// Substitute `{path}` placeholders. Absent or null values render as "".
    fn render(&self, record: &Value, expression: &str) -> (String, Vec<String>) {
        let mut missing = Vec::new();
        let rendered = self
            .placeholder
            .replace_all(expression, |caps: &regex::Captures| {
                let path = caps[1].trim();
                match resolve(record, path) {
                    None | Some(Value::Null) => {
                        missing.push(path.to_string());
                        String::new()
                    }
                    Some(value) => to_text(value),
                }
            })
            .into_owned();
        (rendered, missing)
    }
}

fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

const TRUTHY: [&str; 6] = ["true", "1", "yes", "on", "y", "t"];
const FALSY: [&str; 7] = ["false", "0", "no", "off", "n", "f", ""];

fn coerce(value: &Value, field_type: FieldType) -> std::result::Result<Value, String> {
    let fail = || format!("cannot convert {} to {:?}", value, field_type).to_lowercase();

    match field_type {
        FieldType::String => Ok(Value::String(to_text(value))),
        FieldType::Int => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::Number(n) => n
                .as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| Value::from(f.trunc() as i64))
                .ok_or_else(fail),
            Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| fail()),
            Value::Bool(b) => Ok(Value::from(i64::from(*b))),
            _ => Err(fail()),
        },
        FieldType::Float => {
            let parsed = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                _ => None,
            };
            parsed
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(fail)
        }
        FieldType::Bool => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::Bool(n.as_f64().is_some_and(|f| f != 0.0))),
            Value::String(s) => {
                let lowered = s.trim().to_ascii_lowercase();
                if TRUTHY.contains(&lowered.as_str()) {
                    Ok(Value::Bool(true))
                } else if FALSY.contains(&lowered.as_str()) {
                    Ok(Value::Bool(false))
                } else {
                    Err(fail())
                }
            }
            _ => Err(fail()),
        },
        FieldType::List => match value {
            Value::Array(_) => Ok(value.clone()),
            other => Ok(Value::Array(vec![other.clone()])),
        },
        FieldType::Dict => match value {
            Value::Object(_) => Ok(value.clone()),
            other => {
                let mut wrapped = Map::new();
                wrapped.insert("value".to_string(), other.clone());
                Ok(Value::Object(wrapped))
            }
        },
    }
}

/// `schema_mapper` transformer: always keeps, emitting the remapped record
impl Transformer for SchemaMapper {
    fn kind(&self) -> &str {
        "schema_mapper"
    }

    fn transform(&self, payload: &Payload) -> Result<TransformOutcome> {
        self.evaluate(payload).map(TransformOutcome::Keep)
    }
}
