//! Executor scenarios: stage transitions, sink isolation, resilience wiring and cancellation

use super::*;
use crate::config::{ConnectorSpec, PipelineDefinition, RunnerConfig, SinkSpec, TransformerSpec};
use crate::error::ForgeFlowError;
use crate::types::{ErrorKind, ExecutionState, Payload, PipelineStatus, Record, SinkStatus};
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shared counters observed by the scripted connector and recording sinks
#[derive(Default)]
struct Counters {
    fetches: AtomicUsize,
    connector_closes: AtomicUsize,
    sink_closes: AtomicUsize,
    writes: Mutex<Vec<(String, Value)>>,
    active_writes: AtomicUsize,
    peak_writes: AtomicUsize,
}

impl Counters {
    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    fn written_by(&self, label: &str) -> Vec<Value> {
        self.writes
            .lock()
            .iter()
            .filter(|(l, _)| l == label)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

fn flag(config: &Map<String, Value>, key: &str) -> bool {
    config.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Fails the first `fail_times` fetches, then returns `payload`
struct ScriptedConnector {
    counters: Arc<Counters>,
    payload: Value,
    fail_times: usize,
    fatal: bool,
    hang: bool,
}

impl ScriptedConnector {
    fn from_config(counters: Arc<Counters>, config: &Map<String, Value>) -> Self {
        Self {
            counters,
            payload: config.get("payload").cloned().unwrap_or(Value::Null),
            fail_times: config.get("fail_times").and_then(Value::as_u64).unwrap_or(0) as usize,
            fatal: flag(config, "fatal"),
            hang: flag(config, "hang"),
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn kind(&self) -> &str {
        "scripted"
    }

    fn fingerprint_params(&self) -> Value {
        json!({"payload": self.payload})
    }

    async fn fetch(&self) -> Result<Payload> {
        let call = self.counters.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hang {
            std::future::pending::<()>().await;
        }
        if call <= self.fail_times {
            return Err(if self.fatal {
                ForgeFlowError::fatal("401 unauthorized")
            } else {
                ForgeFlowError::transient("503 service unavailable")
            });
        }
        Ok(self.payload.clone())
    }

    async fn close(&self) -> Result<()> {
        self.counters.connector_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct RecordingSink {
    counters: Arc<Counters>,
    label: String,
    fail: bool,
    hang: bool,
    delay: Duration,
}

impl RecordingSink {
    fn from_config(counters: Arc<Counters>, config: &Map<String, Value>) -> Self {
        Self {
            counters,
            label: config
                .get("label")
                .and_then(Value::as_str)
                .unwrap_or("recording")
                .to_string(),
            fail: flag(config, "fail"),
            hang: flag(config, "hang"),
            delay: Duration::from_millis(config.get("delay_ms").and_then(Value::as_u64).unwrap_or(0)),
        }
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn kind(&self) -> &str {
        "recording"
    }

    async fn write(&self, record: &Record) -> Result<()> {
        let active = self.counters.active_writes.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak_writes.fetch_max(active, Ordering::SeqCst);

        if self.hang {
            std::future::pending::<()>().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.counters.active_writes.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(ForgeFlowError::sink(&self.label, "disk full"));
        }
        self.counters.writes.lock().push((self.label.clone(), record.clone()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.counters.sink_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn registry(counters: &Arc<Counters>) -> ComponentRegistry {
    let mut registry = ComponentRegistry::with_builtins();

    let connector_counters = Arc::clone(counters);
    registry.register_connector("scripted", move |config| {
        Ok(Box::new(ScriptedConnector::from_config(Arc::clone(&connector_counters), config)))
    });

    let sink_counters = Arc::clone(counters);
    registry.register_sink("recording", move |config| {
        Ok(Arc::new(RecordingSink::from_config(Arc::clone(&sink_counters), config)))
    });

    registry
}

fn executor(counters: &Arc<Counters>) -> Executor {
    Executor::new().with_registry(registry(counters))
}

fn scripted(name: &str, config: Value) -> PipelineDefinition {
    PipelineDefinition::new(name, ConnectorSpec::new("scripted", config))
}

fn sink(label: &str) -> SinkSpec {
    SinkSpec::new("recording", json!({"label": label})).named(label)
}

fn failing_sink(label: &str) -> SinkSpec {
    SinkSpec::new("recording", json!({"label": label, "fail": true})).named(label)
}

#[tokio::test]
async fn test_successful_run_writes_every_sink() {
    let counters = Arc::new(Counters::default());
    let pipeline = scripted("users", json!({"payload": {"id": 1}}))
        .with_sink(sink("a"))
        .with_sink(sink("b"));

    let result = executor(&counters).execute(&pipeline).await;

    assert_eq!(result.status, PipelineStatus::Succeeded);
    assert_eq!(result.final_state, ExecutionState::Succeeded);
    assert!(!result.filtered);
    assert!(result.error.is_none());
    assert_eq!(result.succeeded_sinks(), 2);
    assert_eq!(counters.written_by("a"), vec![json!({"id": 1})]);
    assert_eq!(counters.written_by("b"), vec![json!({"id": 1})]);

    let fetch = result.fetch.unwrap();
    assert_eq!(fetch.attempts, 1);
    assert!(!fetch.from_cache);
    assert_eq!(fetch.fingerprint.len(), 64);
}

#[tokio::test]
async fn test_sink_failure_is_isolated() {
    let counters = Arc::new(Counters::default());
    let pipeline = scripted("users", json!({"payload": {"id": 1}}))
        .with_sink(sink("first"))
        .with_sink(failing_sink("second"))
        .with_sink(sink("third"));

    let result = executor(&counters).execute(&pipeline).await;

    assert_eq!(result.status, PipelineStatus::PartiallyFailed);
    assert_eq!(result.final_state, ExecutionState::PartiallyFailed);
    assert_eq!(result.failed_sinks(), vec!["second"]);
    assert_eq!(result.sink_results["first"].status, SinkStatus::Succeeded);
    assert_eq!(result.sink_results["third"].status, SinkStatus::Succeeded);
    assert!(result.sink_results["second"].error.as_deref().unwrap().contains("disk full"));

    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Sink);
    assert_eq!(error.stage, ExecutionState::Writing);
    assert_eq!(counters.write_count(), 2);
}

#[tokio::test]
async fn test_every_sink_failing_fails_the_run() {
    let counters = Arc::new(Counters::default());
    let pipeline = scripted("users", json!({"payload": {"id": 1}}))
        .with_sink(failing_sink("a"))
        .with_sink(failing_sink("b"));

    let result = executor(&counters).execute(&pipeline).await;

    assert_eq!(result.status, PipelineStatus::Failed);
    assert_eq!(result.final_state, ExecutionState::Failed);
    assert!(!result.filtered);
    assert_eq!(result.failed_sinks(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_filtered_record_is_a_successful_no_op() {
    let counters = Arc::new(Counters::default());
    let filter = TransformerSpec::new(
        "filter",
        json!({
            "conditions": [
                {"field": "status", "operator": "eq", "value": "active"},
                {"field": "age", "operator": "gte", "value": 18}
            ],
            "logic": "AND"
        }),
    );
    let executor = executor(&counters);

    let adult = scripted("adults", json!({"payload": {"status": "active", "age": 21}}))
        .with_transformer(filter.clone())
        .with_sink(sink("out"));
    let result = executor.execute(&adult).await;
    assert_eq!(result.status, PipelineStatus::Succeeded);
    assert!(!result.filtered);
    assert_eq!(counters.write_count(), 1);

    let minor = scripted("adults", json!({"payload": {"status": "active", "age": 16}}))
        .with_transformer(filter)
        .with_sink(sink("out"));
    let result = executor.execute(&minor).await;
    assert_eq!(result.status, PipelineStatus::Succeeded);
    assert_eq!(result.final_state, ExecutionState::Succeeded);
    assert!(result.filtered);
    assert!(result.sink_results.is_empty());
    assert_eq!(counters.write_count(), 1);
    assert_eq!(counters.sink_closes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_mapper_output_reaches_sinks() {
    let counters = Arc::new(Counters::default());
    let pipeline = scripted(
        "people",
        json!({"payload": {"first": "Ana", "last": "Reyes", "address": {"city": "Lima"}}}),
    )
    .with_transformer(TransformerSpec::new(
        "schema_mapper",
        json!({"mappings": [
            {"source": "address.city", "target": "city"},
            {"target": "full_name", "expression": "{first} {last}"}
        ]}),
    ))
    .with_sink(sink("out"));

    let result = executor(&counters).execute(&pipeline).await;

    assert_eq!(result.status, PipelineStatus::Succeeded);
    assert_eq!(
        counters.written_by("out"),
        vec![json!({"city": "Lima", "full_name": "Ana Reyes"})]
    );
}

#[tokio::test]
async fn test_transform_failure_skips_sinks() {
    let counters = Arc::new(Counters::default());
    let pipeline = scripted("people", json!({"payload": {"first": "Ana"}}))
        .with_transformer(TransformerSpec::new(
            "schema_mapper",
            json!({"strict": true, "mappings": [{"source": "email", "target": "email", "required": true}]}),
        ))
        .with_sink(sink("out"));

    let result = executor(&counters).execute(&pipeline).await;

    assert_eq!(result.status, PipelineStatus::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Transform);
    assert_eq!(error.stage, ExecutionState::Transforming);
    assert_eq!(counters.write_count(), 0);
    assert_eq!(counters.connector_closes.load(Ordering::SeqCst), 1);
    assert_eq!(counters.sink_closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_zero_sinks_fails_before_fetch() {
    let counters = Arc::new(Counters::default());
    let pipeline = scripted("empty", json!({"payload": {}}));

    let result = executor(&counters).execute(&pipeline).await;

    assert_eq!(result.status, PipelineStatus::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Validation);
    assert_eq!(error.stage, ExecutionState::Idle);
    assert!(error.message.contains("at least one sink is required"));
    assert!(result.fetch.is_none());
    assert_eq!(counters.fetches(), 0);
}

#[tokio::test]
async fn test_disabled_pipeline_is_skipped() {
    let counters = Arc::new(Counters::default());
    let pipeline = scripted("paused", json!({"payload": {}}))
        .with_sink(sink("out"))
        .disabled();

    let result = executor(&counters).execute(&pipeline).await;

    assert_eq!(result.status, PipelineStatus::Succeeded);
    assert!(result.disabled);
    assert!(result.fetch.is_none());
    assert_eq!(counters.fetches(), 0);
}

#[tokio::test]
async fn test_disabled_pipeline_without_sinks_fails_validation() {
    let counters = Arc::new(Counters::default());
    let pipeline = scripted("empty", json!({"payload": {}})).disabled();

    let result = executor(&counters).execute(&pipeline).await;

    assert_eq!(result.status, PipelineStatus::Failed);
    assert!(!result.disabled);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Validation);
    assert_eq!(error.stage, ExecutionState::Idle);
    assert_eq!(counters.fetches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sink_writes_overlap_and_failure_does_not_delay_siblings() {
    let counters = Arc::new(Counters::default());
    let slow = |label: &str, fail: bool| {
        SinkSpec::new("recording", json!({"label": label, "delay_ms": 100, "fail": fail})).named(label)
    };
    let pipeline = scripted("fanout", json!({"payload": {"id": 1}}))
        .with_sink(slow("a", false))
        .with_sink(slow("b", true))
        .with_sink(slow("c", false));

    let started = tokio::time::Instant::now();
    let result = executor(&counters).execute(&pipeline).await;
    let elapsed = started.elapsed();

    assert_eq!(result.status, PipelineStatus::PartiallyFailed);
    assert_eq!(result.failed_sinks(), vec!["b"]);
    assert_eq!(counters.peak_writes.load(Ordering::SeqCst), 3);
    assert_eq!(counters.write_count(), 2);
    // Three sequential writes would take 300ms
    assert!(elapsed >= Duration::from_millis(100), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(200), "{:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_run_aborts_sink_writes() {
    let counters = Arc::new(Counters::default());
    let executor = executor(&counters);
    let pipeline = scripted("abandoned", json!({"payload": {"id": 1}})).with_sink(
        SinkSpec::new("recording", json!({"label": "slow", "delay_ms": 100})).named("slow"),
    );

    let run = tokio::time::timeout(Duration::from_millis(50), executor.execute(&pipeline)).await;
    assert!(run.is_err());
    assert_eq!(counters.peak_writes.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(counters.write_count(), 0);
}

#[tokio::test]
async fn test_unknown_sink_type_closes_built_components() {
    let counters = Arc::new(Counters::default());
    let pipeline = scripted("users", json!({"payload": {}}))
        .with_sink(sink("ok"))
        .with_sink(SinkSpec::new("kafka", json!({})));

    let result = executor(&counters).execute(&pipeline).await;

    assert_eq!(result.status, PipelineStatus::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Configuration);
    assert!(error.message.contains("Unknown sink type: kafka"));
    assert_eq!(counters.fetches(), 0);
    assert_eq!(counters.connector_closes.load(Ordering::SeqCst), 1);
    assert_eq!(counters.sink_closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let counters = Arc::new(Counters::default());
    let pipeline = scripted(
        "flaky",
        json!({
            "payload": {"ok": true},
            "fail_times": 2,
            "retry": {"max_attempts": 3, "initial_delay": 1, "backoff_factor": 2.0, "jitter": false}
        }),
    )
    .with_sink(sink("out"));

    let result = executor(&counters).execute(&pipeline).await;

    assert_eq!(result.status, PipelineStatus::Succeeded);
    assert_eq!(counters.fetches(), 3);
    let fetch = result.fetch.unwrap();
    assert_eq!(fetch.attempts, 3);
    assert_eq!(fetch.total_backoff, Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_fail_without_writes() {
    let counters = Arc::new(Counters::default());
    let pipeline = scripted("down", json!({"payload": {}, "fail_times": 10, "retry.max_attempts": 3}))
        .with_sink(sink("out"));

    let result = executor(&counters).execute(&pipeline).await;

    assert_eq!(result.status, PipelineStatus::Failed);
    assert_eq!(counters.fetches(), 3);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Connector);
    assert_eq!(error.stage, ExecutionState::Fetching);
    assert_eq!(counters.write_count(), 0);
    assert_eq!(counters.sink_closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fatal_error_is_not_retried() {
    let counters = Arc::new(Counters::default());
    let pipeline = scripted(
        "auth",
        json!({"payload": {}, "fail_times": 10, "fatal": true, "retry": {"max_attempts": 5}}),
    )
    .with_sink(sink("out"));

    let result = executor(&counters).execute(&pipeline).await;

    assert_eq!(result.status, PipelineStatus::Failed);
    assert_eq!(counters.fetches(), 1);
    assert_eq!(result.fetch.unwrap().attempts, 1);
}

#[tokio::test]
async fn test_cache_is_shared_across_runs() {
    let counters = Arc::new(Counters::default());
    let executor = executor(&counters);
    let pipeline = scripted("cached", json!({"payload": {"n": 7}, "cache": {"ttl": 60}}))
        .with_sink(sink("out"));

    let first = executor.execute(&pipeline).await;
    let second = executor.execute(&pipeline).await;

    assert_eq!(first.status, PipelineStatus::Succeeded);
    assert_eq!(second.status, PipelineStatus::Succeeded);
    assert_eq!(counters.fetches(), 1);
    assert!(!first.fetch.unwrap().from_cache);
    let second_fetch = second.fetch.unwrap();
    assert!(second_fetch.from_cache);
    assert_eq!(second_fetch.attempts, 0);
    assert_eq!(counters.written_by("out"), vec![json!({"n": 7}), json!({"n": 7})]);
    assert_eq!(executor.shared_handles(), (1, 0, 0));
}

#[tokio::test]
async fn test_disabled_cache_always_fetches() {
    let counters = Arc::new(Counters::default());
    let executor = executor(&counters);
    let pipeline = scripted("uncached", json!({"payload": {}, "cache.enabled": false}))
        .with_sink(sink("out"));

    executor.execute(&pipeline).await;
    executor.execute(&pipeline).await;

    assert_eq!(counters.fetches(), 2);
    assert_eq!(executor.shared_handles(), (0, 0, 0));
}

#[tokio::test]
async fn test_rate_limit_fail_fast_across_runs() {
    let counters = Arc::new(Counters::default());
    let executor = executor(&counters);
    let pipeline = scripted(
        "limited",
        json!({"payload": {}, "rate_limit": {"calls": 1, "period": 60, "wait": false}}),
    )
    .with_sink(sink("out"));

    let first = executor.execute(&pipeline).await;
    let second = executor.execute(&pipeline).await;

    assert_eq!(first.status, PipelineStatus::Succeeded);
    assert_eq!(second.status, PipelineStatus::Failed);
    assert_eq!(second.error.unwrap().kind, ErrorKind::RateLimited);
    assert_eq!(counters.fetches(), 1);
}

#[tokio::test]
async fn test_circuit_breaker_is_shared_across_runs() {
    let counters = Arc::new(Counters::default());
    let executor = executor(&counters);
    let pipeline = scripted(
        "brittle",
        json!({
            "payload": {},
            "fail_times": 10,
            "circuit_breaker": {"failure_threshold": 2, "recovery_timeout": 60}
        }),
    )
    .with_sink(sink("out"));

    for _ in 0..2 {
        let result = executor.execute(&pipeline).await;
        assert_eq!(result.status, PipelineStatus::Failed);
        assert!(result.error.unwrap().message.contains("503"));
    }

    let result = executor.execute(&pipeline).await;
    assert_eq!(result.status, PipelineStatus::Failed);
    assert_eq!(result.fetch.unwrap().attempts, 0);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Connector);
    assert_eq!(error.stage, ExecutionState::Fetching);
    assert!(error.message.contains("circuit breaker is open"));

    assert_eq!(counters.fetches(), 2);
    assert_eq!(executor.shared_handles(), (0, 0, 1));
}

#[tokio::test]
async fn test_data_quality_violation_fails_transform() {
    let counters = Arc::new(Counters::default());
    let pipeline = scripted("people", json!({"payload": {"age": 200, "email": "ana@example.com"}}))
        .with_transformer(TransformerSpec::new(
            "data_quality",
            json!({"rules": [
                {"field": "age", "min": 0, "max": 150},
                {"field": "email", "required": true, "pattern": "[^@]+@[^@]+$"}
            ]}),
        ))
        .with_sink(sink("out"));

    let result = executor(&counters).execute(&pipeline).await;

    assert_eq!(result.status, PipelineStatus::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Transform);
    assert_eq!(error.stage, ExecutionState::Transforming);
    assert!(error.message.contains("age (200) > max (150)"));
    assert_eq!(counters.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_fetch() {
    let counters = Arc::new(Counters::default());
    let pipeline = scripted("stuck", json!({"payload": {}, "hang": true, "retry": {"max_attempts": 3}}))
        .with_sink(sink("out"));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let result = executor(&counters).execute_with_cancel(&pipeline, cancel).await;

    assert_eq!(result.status, PipelineStatus::Cancelled);
    assert!(result.is_failure());
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Cancelled);
    assert_eq!(error.stage, ExecutionState::Fetching);
    assert_eq!(counters.fetches(), 1);
    assert_eq!(counters.write_count(), 0);
    assert_eq!(counters.connector_closes.load(Ordering::SeqCst), 1);
    assert_eq!(counters.sink_closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_deadline_cancels_outstanding_writes() {
    let counters = Arc::new(Counters::default());
    let runner = RunnerConfig {
        run_timeout_secs: Some(5),
        ..Default::default()
    };
    let executor = Executor::new()
        .with_runner_config(runner)
        .with_registry(registry(&counters));
    let pipeline = scripted("slow", json!({"payload": {"id": 1}}))
        .with_sink(SinkSpec::new("recording", json!({"label": "stuck", "hang": true})).named("stuck"));

    let result = executor.execute(&pipeline).await;

    assert_eq!(result.status, PipelineStatus::Cancelled);
    assert_eq!(result.sink_results["stuck"].status, SinkStatus::Cancelled);
    let error = result.error.unwrap();
    assert_eq!(error.stage, ExecutionState::Writing);
    assert!(error.message.contains("deadline"));
    assert_eq!(counters.sink_closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_execute_all_bounds_concurrency() {
    let counters = Arc::new(Counters::default());
    let runner = RunnerConfig {
        max_concurrent_pipelines: 2,
        ..Default::default()
    };
    let executor = Executor::new()
        .with_runner_config(runner)
        .with_registry(registry(&counters));

    let pipelines: Vec<PipelineDefinition> = (0..4)
        .map(|i| {
            scripted(&format!("p{}", i), json!({"payload": {"i": i}})).with_sink(
                SinkSpec::new("recording", json!({"label": format!("s{}", i), "delay_ms": 100})),
            )
        })
        .collect();

    let results = executor.execute_all(&pipelines).await;

    let names: Vec<&str> = results.iter().map(|r| r.pipeline.as_str()).collect();
    assert_eq!(names, vec!["p0", "p1", "p2", "p3"]);
    assert!(results.iter().all(|r| r.status == PipelineStatus::Succeeded));
    assert_eq!(counters.peak_writes.load(Ordering::SeqCst), 2);
    assert_eq!(counters.write_count(), 4);
}

#[tokio::test]
async fn test_dry_run_skips_sinks() {
    let counters = Arc::new(Counters::default());
    let pipeline = scripted("preview", json!({"payload": {"status": "inactive"}}))
        .with_transformer(TransformerSpec::new(
            "filter",
            json!({"conditions": [{"field": "status", "operator": "eq", "value": "active"}]}),
        ))
        .with_sink(sink("out"));

    let report = executor(&counters).dry_run(&pipeline).await.unwrap();

    assert_eq!(report.payload, json!({"status": "inactive"}));
    assert!(report.outcome.is_drop());
    assert_eq!(report.fetch.attempts, 1);
    assert_eq!(counters.write_count(), 0);
    assert_eq!(counters.sink_closes.load(Ordering::SeqCst), 0);
    assert_eq!(counters.connector_closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_check_connector_fetches_once() {
    let counters = Arc::new(Counters::default());
    let executor = executor(&counters);

    let healthy = scripted("ok", json!({"payload": {"up": true}, "retry": {"max_attempts": 5}}));
    assert_eq!(executor.check_connector(&healthy).await.unwrap(), json!({"up": true}));

    let down = scripted("down", json!({"payload": {}, "fail_times": 10, "retry": {"max_attempts": 5}}));
    assert!(executor.check_connector(&down).await.is_err());

    assert_eq!(counters.fetches(), 2);
    assert_eq!(counters.connector_closes.load(Ordering::SeqCst), 2);
}
