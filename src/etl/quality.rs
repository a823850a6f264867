use crate::etl::filter::{type_name, values_equal};
use crate::etl::path::resolve;
use crate::etl::traits::Transformer;
use crate::types::{Payload, TransformOutcome};
use crate::{error::ForgeFlowError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// One data quality rule. Every check except `required` is skipped when the
/// field is absent or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRule {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default)]
    pub required: bool,
    /// Anchored at the start of the value, like a prefix match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

impl QualityRule {
    pub fn new(field: &str) -> Self {
        Self {
            field: field.to_string(),
            min: None,
            max: None,
            required: false,
            pattern: None,
            allowed: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn between(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn matching(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }

    pub fn one_of(mut self, allowed: Vec<Value>) -> Self {
        self.allowed = Some(allowed);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default)]
    pub rules: Vec<QualityRule>,
}

#[derive(Debug)]
struct CompiledRule {
    rule: QualityRule,
    pattern: Option<Regex>,
}

/// Checks records against field-level quality rules and fails the
/// transform stage listing every violation. A list payload is checked row by row.
#[derive(Debug)]
pub struct DataQualityValidator {
    rules: Vec<CompiledRule>,
}

impl DataQualityValidator {
    pub fn new(config: QualityConfig) -> Result<Self> {
        let rules = config
            .rules
            .into_iter()
            .enumerate()
            .map(|(index, rule)| Self::compile(index, rule))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn from_config(config: &Map<String, Value>) -> Result<Self> {
        let config: QualityConfig = serde_json::from_value(Value::Object(config.clone()))
            .map_err(|e| ForgeFlowError::InvalidConfig(format!("data_quality: {}", e)))?;
        Self::new(config)
    }

    fn compile(index: usize, rule: QualityRule) -> Result<CompiledRule> {
        let invalid = |message: String| {
            ForgeFlowError::InvalidConfig(format!(
                "data_quality rule {} ({}): {}",
                index, rule.field, message
            ))
        };

        if rule.field.trim().is_empty() {
            return Err(invalid("field must not be empty".to_string()));
        }
        if let (Some(min), Some(max)) = (rule.min, rule.max) {
            if min > max {
                return Err(invalid(format!("min ({}) is greater than max ({})", min, max)));
            }
        }
        let pattern = match &rule.pattern {
            Some(pattern) => Some(
                Regex::new(&format!("^(?:{})", pattern))
                    .map_err(|e| invalid(format!("invalid pattern: {}", e)))?,
            ),
            None => None,
        };

        Ok(CompiledRule { rule, pattern })
    }

    /// Every rule violation in `record`, prefixed with its row number
    pub fn violations(&self, record: &Value) -> Result<Vec<String>> {
        let rows: Vec<&Value> = match record {
            Value::Array(items) => items.iter().collect(),
            Value::Object(_) => vec![record],
            other => {
                return Err(ForgeFlowError::Transform(format!(
                    "data_quality expects a mapping record or a list of mappings, got {}",
                    type_name(other)
                )))
            }
        };

        let mut violations = Vec::new();
        for (row, item) in rows.into_iter().enumerate() {
            if !item.is_object() {
                violations.push(format!("row {}: expected a mapping, got {}", row, type_name(item)));
                continue;
            }
            for compiled in &self.rules {
                check(row, item, compiled, &mut violations);
            }
        }
        Ok(violations)
    }
}

fn check(row: usize, item: &Value, compiled: &CompiledRule, violations: &mut Vec<String>) {
    let rule = &compiled.rule;
    let field = &rule.field;

    let value = match resolve(item, field) {
        None | Some(Value::Null) => {
            if rule.required {
                violations.push(format!("row {}: {} is required but missing", row, field));
            }
            return;
        }
        Some(value) => value,
    };

    if rule.min.is_some() || rule.max.is_some() {
        match value.as_f64() {
            Some(number) => {
                if let Some(min) = rule.min.filter(|min| number < *min) {
                    violations.push(format!("row {}: {} ({}) < min ({})", row, field, value, min));
                }
                if let Some(max) = rule.max.filter(|max| number > *max) {
                    violations.push(format!("row {}: {} ({}) > max ({})", row, field, value, max));
                }
            }
            None => violations.push(format!(
                "row {}: {} ({}) is not numeric",
                row, field, value
            )),
        }
    }

    if let (Some(regex), Some(pattern)) = (&compiled.pattern, &rule.pattern) {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if !regex.is_match(&text) {
            violations.push(format!(
                "row {}: {} does not match pattern {}",
                row, field, pattern
            ));
        }
    }

    if let Some(allowed) = &rule.allowed {
        if !allowed.iter().any(|candidate| values_equal(value, candidate)) {
            violations.push(format!(
                "row {}: {} ({}) not in allowed values {}",
                row,
                field,
                value,
                Value::Array(allowed.clone())
            ));
        }
    }
}

impl Transformer for DataQualityValidator {
    fn kind(&self) -> &str {
        "data_quality"
    }

    fn transform(&self, payload: &Payload) -> Result<TransformOutcome> {
        let violations = self.violations(payload)?;
        if violations.is_empty() {
            debug!("Data quality check passed ({} rules)", self.rules.len());
            return Ok(TransformOutcome::Keep(payload.clone()));
        }

        warn!("Data quality check found {} violations", violations.len());
        Err(ForgeFlowError::Transform(format!(
            "data quality check failed with {} violations: {}",
            violations.len(),
            violations.join("; ")
        )))
    }
}
