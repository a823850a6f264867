use crate::error::ForgeFlowError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

fn default_true() -> bool {
    true
}

fn object_or_empty(config: Value) -> Map<String, Value> {
    match config {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl ConnectorSpec {
    pub fn new(kind: &str, config: Value) -> Self {
        Self {
            kind: kind.to_string(),
            config: object_or_empty(config),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformerSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl TransformerSpec {
    pub fn new(kind: &str, config: Value) -> Self {
        Self {
            kind: kind.to_string(),
            config: object_or_empty(config),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkSpec {
    /// Identity used in per-sink results. Defaults to `<type>#<index>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl SinkSpec {
    pub fn new(kind: &str, config: Value) -> Self {
        Self {
            name: None,
            kind: kind.to_string(),
            config: object_or_empty(config),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn identity(&self, index: usize) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}#{}", self.kind, index),
        }
    }
}

/// Declarative pipeline: one connector, an optional transformer and one or more sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub connector: ConnectorSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformer: Option<TransformerSpec>,
    #[serde(default)]
    pub sinks: Vec<SinkSpec>,
}

impl PipelineDefinition {
    pub fn new(name: &str, connector: ConnectorSpec) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            description: None,
            connector,
            transformer: None,
            sinks: Vec::new(),
        }
    }

    pub fn with_transformer(mut self, transformer: TransformerSpec) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn with_sink(mut self, sink: SinkSpec) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn sink_identities(&self) -> Vec<String> {
        self.sinks
            .iter()
            .enumerate()
            .map(|(index, sink)| sink.identity(index))
            .collect()
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.name.trim().is_empty() {
            return Err(ForgeFlowError::InvalidConfig(
                "pipeline.name must not be empty".to_string(),
            ));
        }

        if self.connector.kind.trim().is_empty() {
            return Err(ForgeFlowError::InvalidConfig(format!(
                "pipeline {}: connector.type must not be empty",
                self.name
            )));
        }

        if self.sinks.is_empty() {
            return Err(ForgeFlowError::InvalidConfig(format!(
                "pipeline {}: at least one sink is required",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for identity in self.sink_identities() {
            if !seen.insert(identity.clone()) {
                return Err(ForgeFlowError::InvalidConfig(format!(
                    "pipeline {}: duplicate sink name {}",
                    self.name, identity
                )));
            }
        }

        Ok(())
    }
}

/// A pipelines file: `pipelines = [...]` in TOML, or `pipelines:` in YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineFile {
    #[serde(default)]
    pub pipelines: Vec<PipelineDefinition>,
}

impl PipelineFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let file: PipelineFile = match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|e| ForgeFlowError::Config(format!("{}: {}", path.display(), e)))?,
            "json" => serde_json::from_str(&content)
                .map_err(|e| ForgeFlowError::Config(format!("{}: {}", path.display(), e)))?,
            _ => toml::from_str(&content)
                .map_err(|e| ForgeFlowError::Config(format!("{}: {}", path.display(), e)))?,
        };

        file.validate()?;
        Ok(file)
    }

    pub fn validate(&self) -> crate::Result<()> {
        let mut names = HashSet::new();
        for pipeline in &self.pipelines {
            pipeline.validate()?;
            if !names.insert(pipeline.name.as_str()) {
                return Err(ForgeFlowError::InvalidConfig(format!(
                    "duplicate pipeline name {}",
                    pipeline.name
                )));
            }
        }
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&PipelineDefinition> {
        self.pipelines.iter().find(|p| p.name == name)
    }
}

/// Parse an adapter's config block into its typed form, reporting every
/// missing required key at once before any type errors.
pub fn parse_component_config<T: serde::de::DeserializeOwned>(
    component: &str,
    config: &Map<String, Value>,
    required: &[&str],
) -> crate::Result<T> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|key| config.get(*key).map_or(true, Value::is_null))
        .collect();
    if !missing.is_empty() {
        return Err(ForgeFlowError::InvalidConfig(format!(
            "{}: missing required keys: {}",
            component,
            missing.join(", ")
        )));
    }

    serde_json::from_value(Value::Object(config.clone()))
        .map_err(|e| ForgeFlowError::InvalidConfig(format!("{}: {}", component, e)))
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub ttl: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitSettings {
    pub calls: u32,
    pub period: Duration,
    /// Suspend until capacity frees up; `false` fails with `RateLimitExceeded` instead
    pub wait: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff_factor: f64,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_factor: 2.0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerSettings {
    /// Consecutive failed fetches that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial fetch
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Core-recognized keys of a connector config. Absent sections disable the policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResilienceConfig {
    pub cache: Option<CacheSettings>,
    pub rate_limit: Option<RateLimitSettings>,
    pub retry: Option<RetrySettings>,
    pub circuit_breaker: Option<CircuitBreakerSettings>,
}

const SECTIONS: [&str; 4] = ["cache", "rate_limit", "retry", "circuit_breaker"];

impl ResilienceConfig {
    /// Separate resilience settings from adapter settings. Accepts nested
    /// mappings (`retry: {max_attempts: 5}`) and flat keys (`retry.max_attempts`).
    pub fn split(config: &Map<String, Value>) -> crate::Result<(Self, Map<String, Value>)> {
        let mut sections: Map<String, Value> = Map::new();
        let mut remainder = Map::new();

        for (key, value) in config {
            if SECTIONS.contains(&key.as_str()) {
                let Value::Object(nested) = value else {
                    return Err(ForgeFlowError::InvalidConfig(format!(
                        "{} must be a mapping",
                        key
                    )));
                };
                let section = sections
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(section) = section {
                    for (k, v) in nested {
                        section.insert(k.clone(), v.clone());
                    }
                }
                continue;
            }

            if let Some((prefix, field)) = key.split_once('.') {
                if SECTIONS.contains(&prefix) {
                    let section = sections
                        .entry(prefix.to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if let Value::Object(section) = section {
                        section.insert(field.to_string(), value.clone());
                    }
                    continue;
                }
            }

            remainder.insert(key.clone(), value.clone());
        }

        let empty = Map::new();
        let section = |name: &str| -> Option<&Map<String, Value>> {
            sections.get(name).map(|v| v.as_object().unwrap_or(&empty))
        };

        let cache = match section("cache") {
            Some(cache) if get_bool(cache, "enabled", "cache.enabled", true)? => Some(CacheSettings {
                ttl: get_duration(cache, "ttl", "cache.ttl")?.unwrap_or(Duration::from_secs(3600)),
            }),
            _ => None,
        };

        let rate_limit = match section("rate_limit") {
            Some(limit) if get_bool(limit, "enabled", "rate_limit.enabled", true)? => {
                let calls = get_u32(limit, "calls", "rate_limit.calls")?.ok_or_else(|| {
                    ForgeFlowError::InvalidConfig("rate_limit.calls is required".to_string())
                })?;
                Some(RateLimitSettings {
                    calls,
                    period: get_duration(limit, "period", "rate_limit.period")?
                        .unwrap_or(Duration::from_secs(60)),
                    wait: get_bool(limit, "wait", "rate_limit.wait", true)?,
                })
            }
            _ => None,
        };

        let retry = match section("retry") {
            Some(retry) => {
                let defaults = RetrySettings::default();
                Some(RetrySettings {
                    max_attempts: get_u32(retry, "max_attempts", "retry.max_attempts")?
                        .unwrap_or(defaults.max_attempts),
                    backoff_factor: get_f64(retry, "backoff_factor", "retry.backoff_factor")?
                        .unwrap_or(defaults.backoff_factor),
                    initial_delay: get_duration(retry, "initial_delay", "retry.initial_delay")?
                        .unwrap_or(defaults.initial_delay),
                    max_delay: get_duration(retry, "max_delay", "retry.max_delay")?
                        .unwrap_or(defaults.max_delay),
                    jitter: get_bool(retry, "jitter", "retry.jitter", defaults.jitter)?,
                })
            }
            None => None,
        };

        let circuit_breaker = match section("circuit_breaker") {
            Some(breaker)
                if get_bool(breaker, "enabled", "circuit_breaker.enabled", true)? =>
            {
                let defaults = CircuitBreakerSettings::default();
                Some(CircuitBreakerSettings {
                    failure_threshold: get_u32(
                        breaker,
                        "failure_threshold",
                        "circuit_breaker.failure_threshold",
                    )?
                    .unwrap_or(defaults.failure_threshold),
                    recovery_timeout: get_duration(
                        breaker,
                        "recovery_timeout",
                        "circuit_breaker.recovery_timeout",
                    )?
                    .unwrap_or(defaults.recovery_timeout),
                })
            }
            _ => None,
        };

        let resilience = Self {
            cache,
            rate_limit,
            retry,
            circuit_breaker,
        };
        resilience.validate()?;
        Ok((resilience, remainder))
    }

    pub fn validate(&self) -> crate::Result<()> {
        if let Some(cache) = &self.cache {
            if cache.ttl.is_zero() {
                return Err(ForgeFlowError::InvalidConfig(
                    "cache.ttl must be greater than 0".to_string(),
                ));
            }
        }

        if let Some(limit) = &self.rate_limit {
            if limit.calls == 0 {
                return Err(ForgeFlowError::InvalidConfig(
                    "rate_limit.calls must be greater than 0".to_string(),
                ));
            }
            if limit.period.is_zero() {
                return Err(ForgeFlowError::InvalidConfig(
                    "rate_limit.period must be greater than 0".to_string(),
                ));
            }
        }

        if let Some(retry) = &self.retry {
            if retry.max_attempts == 0 {
                return Err(ForgeFlowError::InvalidConfig(
                    "retry.max_attempts must be at least 1".to_string(),
                ));
            }
            if !retry.backoff_factor.is_finite() || retry.backoff_factor < 1.0 {
                return Err(ForgeFlowError::InvalidConfig(
                    "retry.backoff_factor must be >= 1.0".to_string(),
                ));
            }
            if retry.max_delay < retry.initial_delay {
                return Err(ForgeFlowError::InvalidConfig(
                    "retry.max_delay must be >= retry.initial_delay".to_string(),
                ));
            }
        }

        if let Some(breaker) = &self.circuit_breaker {
            if breaker.failure_threshold == 0 {
                return Err(ForgeFlowError::InvalidConfig(
                    "circuit_breaker.failure_threshold must be at least 1".to_string(),
                ));
            }
            if breaker.recovery_timeout.is_zero() {
                return Err(ForgeFlowError::InvalidConfig(
                    "circuit_breaker.recovery_timeout must be greater than 0".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn get_bool(
    section: &Map<String, Value>,
    key: &str,
    label: &str,
    default: bool,
) -> crate::Result<bool> {
    match section.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(ForgeFlowError::InvalidConfig(format!(
            "{} must be a boolean, got {}",
            label, other
        ))),
    }
}

fn get_f64(section: &Map<String, Value>, key: &str, label: &str) -> crate::Result<Option<f64>> {
    match section.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(ForgeFlowError::InvalidConfig(format!(
            "{} must be a number, got {}",
            label, other
        ))),
    }
}

fn get_u32(section: &Map<String, Value>, key: &str, label: &str) -> crate::Result<Option<u32>> {
    match section.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| {
                ForgeFlowError::InvalidConfig(format!(
                    "{} must be a non-negative integer, got {}",
                    label, value
                ))
            }),
    }
}

/// Seconds, integer or float
fn get_duration(
    section: &Map<String, Value>,
    key: &str,
    label: &str,
) -> crate::Result<Option<Duration>> {
    match get_f64(section, key, label)? {
        None => Ok(None),
        Some(secs) if secs.is_finite() && secs >= 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
        Some(secs) => Err(ForgeFlowError::InvalidConfig(format!(
            "{} must be a non-negative number of seconds, got {}",
            label, secs
        ))),
    }
}

/// Process-level settings: defaults, then an optional TOML file, then `FORGEFLOW_*` variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub log_level: String,
    /// Deadline applied to every run; expiry cancels the run
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
    /// Upper bound on concurrently executing pipelines in `execute_all`
    pub max_concurrent_pipelines: usize,
    /// Capacity of each fetch cache before least-recently-used eviction
    pub cache_max_entries: usize,
    /// Interval of the background expiry sweep; lazy expiry only when unset
    #[serde(default)]
    pub cache_sweep_interval_secs: Option<u64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            run_timeout_secs: None,
            max_concurrent_pipelines: 4,
            cache_max_entries: 1000,
            cache_sweep_interval_secs: None,
        }
    }
}

impl RunnerConfig {
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let defaults = Self::default();
        let mut builder = ::config::Config::builder()
            .set_default("log_level", defaults.log_level)
            .and_then(|b| b.set_default("max_concurrent_pipelines", defaults.max_concurrent_pipelines as i64))
            .and_then(|b| b.set_default("cache_max_entries", defaults.cache_max_entries as i64))
            .map_err(|e| ForgeFlowError::Config(e.to_string()))?;

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }

        let runner: RunnerConfig = builder
            .add_source(::config::Environment::with_prefix("FORGEFLOW").try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ForgeFlowError::Config(e.to_string()))?;

        runner.validate()?;
        Ok(runner)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    pub fn cache_sweep_interval(&self) -> Option<Duration> {
        self.cache_sweep_interval_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.max_concurrent_pipelines == 0 {
            return Err(ForgeFlowError::InvalidConfig(
                "max_concurrent_pipelines must be greater than 0".to_string(),
            ));
        }
        if self.cache_max_entries == 0 {
            return Err(ForgeFlowError::InvalidConfig(
                "cache_max_entries must be greater than 0".to_string(),
            ));
        }
        if self.run_timeout_secs == Some(0) {
            return Err(ForgeFlowError::InvalidConfig(
                "run_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.cache_sweep_interval_secs == Some(0) {
            return Err(ForgeFlowError::InvalidConfig(
                "cache_sweep_interval_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
