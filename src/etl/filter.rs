use crate::etl::path::resolve;
use crate::etl::traits::Transformer;
use crate::types::{Payload, TransformOutcome};
use crate::{error::ForgeFlowError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    #[serde(rename = "startswith", alias = "starts_with")]
    StartsWith,
    #[serde(rename = "endswith", alias = "ends_with")]
    EndsWith,
    Matches,
}

impl FilterOperator {
    /// `eq`/`ne` may compare against null; the null checks take no value
    fn needs_value(&self) -> bool {
        !matches!(
            self,
            FilterOperator::IsNull | FilterOperator::IsNotNull | FilterOperator::Eq | FilterOperator::Ne
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "UPPERCASE")]
pub enum FilterLogic {
    #[default]
    And,
    Or,
}

impl FromStr for FilterLogic {
    type Err = ForgeFlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "AND" => Ok(FilterLogic::And),
            "OR" => Ok(FilterLogic::Or),
            other => Err(ForgeFlowError::InvalidConfig(format!(
                "unsupported filter logic {}, use AND or OR",
                other
            ))),
        }
    }
}

impl TryFrom<String> for FilterLogic {
    type Error = ForgeFlowError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    /// Dotted path into the record
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
    /// Invert the condition's result
    #[serde(default)]
    pub negate: bool,
}

impl FilterCondition {
    pub fn new(field: &str, operator: FilterOperator, value: Value) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value,
            negate: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,
    #[serde(default)]
    pub logic: FilterLogic,
}

struct CompiledCondition {
    condition: FilterCondition,
    regex: Option<Regex>,
}

/// Boolean keep/drop evaluator over a record
pub struct FilterEngine {
    conditions: Vec<CompiledCondition>,
    logic: FilterLogic,
}

impl fmt::Debug for FilterEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterEngine")
            .field("conditions", &self.conditions.len())
            .field("logic", &self.logic)
            .finish()
    }
}

impl FilterEngine {
    pub fn new(config: FilterConfig) -> Result<Self> {
        let mut conditions = Vec::with_capacity(config.conditions.len());
        for (index, condition) in config.conditions.into_iter().enumerate() {
            conditions.push(Self::compile(index, condition)?);
        }
        Ok(Self {
            conditions,
            logic: config.logic,
        })
    }

    pub fn from_config(config: &Map<String, Value>) -> Result<Self> {
        let config: FilterConfig = serde_json::from_value(Value::Object(config.clone()))
            .map_err(|e| ForgeFlowError::InvalidConfig(format!("filter: {}", e)))?;
        Self::new(config)
    }

    fn compile(index: usize, condition: FilterCondition) -> Result<CompiledCondition> {
        let invalid = |reason: &str| {
            ForgeFlowError::InvalidConfig(format!(
                "filter condition {} on '{}': {}",
                index, condition.field, reason
            ))
        };

        if condition.field.is_empty() {
            return Err(invalid("field must not be empty"));
        }
        if condition.operator.needs_value() && condition.value.is_null() {
            return Err(invalid("operator requires a value"));
        }

        let mut regex = None;
        match condition.operator {
            FilterOperator::In | FilterOperator::NotIn if !condition.value.is_array() => {
                return Err(invalid("value must be a list"));
            }
            FilterOperator::StartsWith | FilterOperator::EndsWith if !condition.value.is_string() => {
                return Err(invalid("value must be a string"));
            }
            FilterOperator::Gt | FilterOperator::Gte | FilterOperator::Lt | FilterOperator::Lte
                if !(condition.value.is_number() || condition.value.is_string()) =>
            {
                return Err(invalid("value must be a number or timestamp"));
            }
            FilterOperator::Matches => {
                let pattern = condition
                    .value
                    .as_str()
                    .ok_or_else(|| invalid("value must be a regex string"))?;
                regex = Some(
                    Regex::new(pattern).map_err(|e| invalid(&format!("invalid regex: {}", e)))?,
                );
            }
            _ => {}
        }

        Ok(CompiledCondition { condition, regex })
    }

    /// `AND` holds when every condition holds, `OR` when at least one does.
    /// An empty list keeps under `AND` and drops under `OR`.
    pub fn evaluate(&self, record: &Value) -> Result<bool> {
        if !record.is_object() {
            return Err(ForgeFlowError::Transform(format!(
                "filter expects a mapping record, got {}",
                type_name(record)
            )));
        }

        let mut results = self.conditions.iter().map(|c| self.evaluate_condition(record, c));
        Ok(match self.logic {
            FilterLogic::And => results.all(|held| held),
            FilterLogic::Or => results.any(|held| held),
        })
    }

    fn evaluate_condition(&self, record: &Value, compiled: &CompiledCondition) -> bool {
        let condition = &compiled.condition;
        let actual = resolve(record, &condition.field);
        let expected = &condition.value;

        let held = match condition.operator {
            FilterOperator::Eq => values_equal(actual.unwrap_or(&Value::Null), expected),
            FilterOperator::Ne => !values_equal(actual.unwrap_or(&Value::Null), expected),
            FilterOperator::Gt => compare_ordered(actual, expected) == Some(Ordering::Greater),
            FilterOperator::Gte => matches!(
                compare_ordered(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOperator::Lt => compare_ordered(actual, expected) == Some(Ordering::Less),
            FilterOperator::Lte => matches!(
                compare_ordered(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOperator::Contains => contains(actual, expected).unwrap_or(false),
            FilterOperator::NotContains => contains(actual, expected).map_or(true, |c| !c),
            FilterOperator::In => in_list(actual, expected),
            FilterOperator::NotIn => !in_list(actual, expected),
            FilterOperator::IsNull => is_absent(actual),
            FilterOperator::IsNotNull => !is_absent(actual),
            FilterOperator::StartsWith => match (actual, expected) {
                (Some(Value::String(s)), Value::String(prefix)) => s.starts_with(prefix.as_str()),
                _ => false,
            },
            FilterOperator::EndsWith => match (actual, expected) {
                (Some(Value::String(s)), Value::String(suffix)) => s.ends_with(suffix.as_str()),
                _ => false,
            },
            FilterOperator::Matches => match (actual, &compiled.regex) {
                (Some(Value::String(s)), Some(regex)) => regex.is_match(s),
                _ => false,
            },
        };

        held != condition.negate
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

fn is_absent(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// Structural equality where `1` and `1.0` are equal
pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b) == Some(Ordering::Equal),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => left == right,
    }
}

fn compare_numbers(a: &serde_json::Number, b: &serde_json::Number) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return Some(x.cmp(&y));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(ts.and_utc());
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

/// Ordering of numbers or timestamps; any other pairing is unordered
fn compare_ordered(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    match (actual?, expected) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => {
            let (a, b) = (parse_timestamp(a)?, parse_timestamp(b)?);
            Some(a.cmp(&b))
        }
        _ => None,
    }
}

/// `None` when the field is neither a string nor a list
fn contains(actual: Option<&Value>, expected: &Value) -> Option<bool> {
    match actual? {
        Value::String(s) => Some(expected.as_str().is_some_and(|needle| s.contains(needle))),
        Value::Array(items) => Some(items.iter().any(|item| values_equal(item, expected))),
        _ => None,
    }
}

fn in_list(actual: Option<&Value>, expected: &Value) -> bool {
    let actual = actual.unwrap_or(&Value::Null);
    match expected {
        Value::Array(items) => items.iter().any(|item| values_equal(actual, item)),
        _ => false,
    }
}

/// `filter` transformer: keeps the payload unchanged or drops it
#[derive(Debug)]
pub struct FilterTransformer {
    engine: FilterEngine,
}

impl FilterTransformer {
    pub fn new(engine: FilterEngine) -> Self {
        Self { engine }
    }

    pub fn from_config(config: &Map<String, Value>) -> Result<Self> {
        Ok(Self::new(FilterEngine::from_config(config)?))
    }
}

impl Transformer for FilterTransformer {
    fn kind(&self) -> &str {
        "filter"
    }

    fn transform(&self, payload: &Payload) -> Result<TransformOutcome> {
        if self.engine.evaluate(payload)? {
            Ok(TransformOutcome::Keep(payload.clone()))
        } else {
            Ok(TransformOutcome::Drop)
        }
    }
}
