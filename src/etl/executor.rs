use crate::config::{
    CircuitBreakerSettings, PipelineDefinition, RateLimitSettings, ResilienceConfig, RunnerConfig,
};
use crate::error::ForgeFlowError;
use crate::etl::registry::ComponentRegistry;
use crate::etl::traits::{Connector, Sink, Transformer};
use crate::resilience::{fingerprint, CircuitBreaker, RateLimiter, ResilientFetch, RetryPolicy};
use crate::storage::TtlCache;
use crate::types::{
    ErrorKind, ExecutionState, FetchReport, Payload, PipelineError, PipelineResult, PipelineStatus,
    Record, SinkOutcome, SinkStatus, TransformOutcome,
};
use crate::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Components built for one run. Everything in here is closed when the run ends.
struct RunComponents {
    connector: Box<dyn Connector>,
    fetch: ResilientFetch,
    transformer: Option<Box<dyn Transformer>>,
    sinks: Vec<(String, Arc<dyn Sink>)>,
}

impl RunComponents {
    async fn close(&self) {
        if let Err(e) = self.connector.close().await {
            warn!("Failed to close {} connector: {}", self.connector.kind(), e);
        }
        for (name, sink) in &self.sinks {
            if let Err(e) = sink.close().await {
                warn!("Failed to close sink {}: {}", name, e);
            }
        }
    }
}

/// Accumulates the caller-visible result while a run moves through its states
struct RunTracker {
    result: PipelineResult,
    started: Instant,
}

impl RunTracker {
    fn new(pipeline: &str) -> Self {
        Self {
            result: PipelineResult {
                pipeline: pipeline.to_string(),
                run_id: Uuid::new_v4(),
                status: PipelineStatus::Succeeded,
                final_state: ExecutionState::Idle,
                filtered: false,
                disabled: false,
                sink_results: BTreeMap::new(),
                fetch: None,
                error: None,
                duration: Duration::ZERO,
            },
            started: Instant::now(),
        }
    }

    fn enter(&mut self, state: ExecutionState) {
        debug!("Pipeline {} entering {}", self.result.pipeline, state);
        self.result.final_state = state;
    }

    fn fail(mut self, error: &ForgeFlowError) -> PipelineResult {
        let stage = self.result.final_state;
        if error.is_cancelled() {
            return self.cancelled(stage, error.to_string());
        }
        error!("Pipeline {} failed while {}: {}", self.result.pipeline, stage, error);
        self.result.status = PipelineStatus::Failed;
        self.result.error = Some(PipelineError::from_error(stage, error));
        self.finish(ExecutionState::Failed)
    }

    /// Definition rejected before any component was built
    fn reject(mut self, error: &ForgeFlowError) -> PipelineResult {
        error!("Pipeline {} is invalid: {}", self.result.pipeline, error);
        self.result.status = PipelineStatus::Failed;
        self.result.error = Some(PipelineError::new(
            ErrorKind::Validation,
            ExecutionState::Idle,
            error.to_string(),
        ));
        self.finish(ExecutionState::Failed)
    }

    fn cancelled(mut self, stage: ExecutionState, message: String) -> PipelineResult {
        warn!("Pipeline {} cancelled while {}: {}", self.result.pipeline, stage, message);
        self.result.status = PipelineStatus::Cancelled;
        self.result.error = Some(PipelineError::new(ErrorKind::Cancelled, stage, message));
        self.finish(ExecutionState::Failed)
    }

    fn finish(mut self, state: ExecutionState) -> PipelineResult {
        self.result.final_state = state;
        self.result.duration = self.started.elapsed();
        self.result
    }
}

/// Output of `Executor::dry_run`
#[derive(Debug, Clone)]
pub struct DryRunReport {
    pub payload: Payload,
    pub outcome: TransformOutcome,
    pub fetch: FetchReport,
}

/// Runs pipeline definitions: resilient fetch, transform, then concurrent fan-out to every sink.
///
/// Cache, rate limiter and circuit breaker handles are keyed by pipeline name
/// plus request fingerprint and outlive a single run, so a long-lived executor
/// shares them across runs of the same pipeline.
pub struct Executor {
    registry: Arc<ComponentRegistry>,
    runner: RunnerConfig,
    caches: DashMap<String, Arc<TtlCache>>,
    limiters: DashMap<String, Arc<RateLimiter>>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    /// Bounds `execute_all`
    execution_semaphore: Arc<Semaphore>,
    /// Stops cache sweepers when the executor is dropped
    shutdown: CancellationToken,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Executor {
    pub fn new() -> Self {
        let runner = RunnerConfig::default();
        Self {
            registry: Arc::new(ComponentRegistry::with_builtins()),
            execution_semaphore: Arc::new(Semaphore::new(runner.max_concurrent_pipelines.max(1))),
            runner,
            caches: DashMap::new(),
            limiters: DashMap::new(),
            breakers: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_runner_config(mut self, runner: RunnerConfig) -> Self {
        self.execution_semaphore = Arc::new(Semaphore::new(runner.max_concurrent_pipelines.max(1)));
        self.runner = runner;
        self
    }

    pub fn with_registry(mut self, registry: ComponentRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn runner_config(&self) -> &RunnerConfig {
        &self.runner
    }

    pub async fn execute(&self, pipeline: &PipelineDefinition) -> PipelineResult {
        self.execute_with_cancel(pipeline, CancellationToken::new()).await
    }

    /// Run one pipeline. Cancelling `cancel` aborts the in-flight fetch and
    /// every outstanding sink write; the run then reports `Cancelled`.
    ///
    /// Dropping the returned future also aborts outstanding sink writes, but
    /// skips `close()` on the run's components. Cancel through the token for an
    /// orderly shutdown.
    pub async fn execute_with_cancel(
        &self,
        pipeline: &PipelineDefinition,
        cancel: CancellationToken,
    ) -> PipelineResult {
        let mut tracker = RunTracker::new(&pipeline.name);

        if let Err(e) = pipeline.validate() {
            return tracker.reject(&e);
        }

        if !pipeline.enabled {
            info!("Pipeline {} is disabled, skipping", pipeline.name);
            tracker.result.disabled = true;
            return tracker.finish(ExecutionState::Succeeded);
        }

        let components = match self.assemble(pipeline, true).await {
            Ok(components) => components,
            Err(e) => return tracker.fail(&e),
        };

        info!(
            "Starting pipeline {} (run {}, {} sinks)",
            pipeline.name,
            tracker.result.run_id,
            components.sinks.len()
        );

        let run_cancel = cancel.child_token();
        let deadline = self.runner.run_timeout().map(|timeout| {
            let token = run_cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                token.cancel();
            })
        });

        let result = self.drive(tracker, &components, &cancel, &run_cancel).await;

        if let Some(deadline) = deadline {
            deadline.abort();
        }
        components.close().await;

        info!(
            "Pipeline {} finished with status {} in {:?}",
            result.pipeline, result.status, result.duration
        );
        result
    }

    /// Run every pipeline, at most `max_concurrent_pipelines` at a time.
    /// Results come back in input order.
    pub async fn execute_all(&self, pipelines: &[PipelineDefinition]) -> Vec<PipelineResult> {
        self.execute_all_with_cancel(pipelines, CancellationToken::new()).await
    }

    pub async fn execute_all_with_cancel(
        &self,
        pipelines: &[PipelineDefinition],
        cancel: CancellationToken,
    ) -> Vec<PipelineResult> {
        let runs = pipelines.iter().map(|pipeline| {
            let semaphore = Arc::clone(&self.execution_semaphore);
            let cancel = cancel.clone();
            async move {
                // The semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                self.execute_with_cancel(pipeline, cancel).await
            }
        });
        join_all(runs).await
    }

    /// Fetch and transform without building or writing any sink
    pub async fn dry_run(&self, pipeline: &PipelineDefinition) -> Result<DryRunReport> {
        let components = self.assemble(pipeline, false).await?;
        let cancel = CancellationToken::new();

        let outcome = async {
            let (fetched, report) = components.fetch.fetch(components.connector.as_ref(), &cancel).await;
            let payload = fetched?;
            let outcome = match &components.transformer {
                Some(transformer) => transformer.transform(&payload)?,
                None => TransformOutcome::Keep(payload.clone()),
            };
            Ok::<_, ForgeFlowError>(DryRunReport {
                payload,
                outcome,
                fetch: report,
            })
        }
        .await;

        components.close().await;
        outcome
    }

    /// Fetch once, bypassing cache, limiter and retry, then close the connector
    pub async fn check_connector(&self, pipeline: &PipelineDefinition) -> Result<Payload> {
        let (_, adapter_config) = ResilienceConfig::split(&pipeline.connector.config)?;
        let connector = self
            .registry
            .build_connector(&pipeline.connector.kind, &adapter_config)?;

        let started = Instant::now();
        let fetched = connector.fetch().await;
        if let Err(e) = connector.close().await {
            warn!("Failed to close {} connector: {}", connector.kind(), e);
        }

        match &fetched {
            Ok(_) => info!(
                "Connector {} for pipeline {} responded in {:?}",
                connector.kind(),
                pipeline.name,
                started.elapsed()
            ),
            Err(e) => error!("Connector check for pipeline {} failed: {}", pipeline.name, e),
        }
        fetched
    }

    async fn drive(
        &self,
        mut tracker: RunTracker,
        components: &RunComponents,
        cancel: &CancellationToken,
        run_cancel: &CancellationToken,
    ) -> PipelineResult {
        let cancel_message = || {
            if cancel.is_cancelled() {
                "run cancelled".to_string()
            } else {
                format!(
                    "run exceeded its {:?} deadline",
                    self.runner.run_timeout().unwrap_or_default()
                )
            }
        };

        tracker.enter(ExecutionState::Fetching);
        let (fetched, report) = components
            .fetch
            .fetch(components.connector.as_ref(), run_cancel)
            .await;
        if report.from_cache {
            debug!("Pipeline {} served from cache", tracker.result.pipeline);
        }
        tracker.result.fetch = Some(report);

        let payload = match fetched {
            Ok(payload) => payload,
            Err(e) if e.is_cancelled() => {
                return tracker.cancelled(ExecutionState::Fetching, cancel_message())
            }
            Err(e) => return tracker.fail(&e),
        };

        tracker.enter(ExecutionState::Transforming);
        let record = match &components.transformer {
            None => payload,
            Some(transformer) => match transformer.transform(&payload) {
                Ok(TransformOutcome::Keep(record)) => record,
                Ok(TransformOutcome::Drop) => {
                    info!(
                        "Pipeline {}: record dropped by {} transformer, no sinks written",
                        tracker.result.pipeline,
                        transformer.kind()
                    );
                    tracker.result.filtered = true;
                    return tracker.finish(ExecutionState::Succeeded);
                }
                Err(e) => return tracker.fail(&e),
            },
        };

        if run_cancel.is_cancelled() {
            return tracker.cancelled(ExecutionState::Transforming, cancel_message());
        }

        tracker.enter(ExecutionState::Writing);
        let outcomes = write_all(&components.sinks, record, run_cancel).await;

        let cancelled = outcomes
            .values()
            .any(|o| o.status == SinkStatus::Cancelled);
        let succeeded = outcomes.values().filter(|o| o.is_success()).count();
        let total = outcomes.len();
        tracker.result.sink_results = outcomes;

        if cancelled {
            return tracker.cancelled(ExecutionState::Writing, cancel_message());
        }

        if succeeded == total {
            tracker.result.status = PipelineStatus::Succeeded;
            return tracker.finish(ExecutionState::Succeeded);
        }

        let failed = tracker.result.failed_sinks().join(", ");
        let message = format!("{} of {} sinks failed: {}", total - succeeded, total, failed);
        tracker.result.error = Some(PipelineError::new(
            ErrorKind::Sink,
            ExecutionState::Writing,
            message,
        ));

        if succeeded > 0 {
            warn!(
                "Pipeline {} partially failed: {} of {} sinks failed ({})",
                tracker.result.pipeline,
                total - succeeded,
                total,
                failed
            );
            tracker.result.status = PipelineStatus::PartiallyFailed;
            tracker.finish(ExecutionState::PartiallyFailed)
        } else {
            error!("Pipeline {}: every sink failed", tracker.result.pipeline);
            tracker.result.status = PipelineStatus::Failed;
            tracker.finish(ExecutionState::Failed)
        }
    }

    /// Build the run's components. On failure everything built so far is closed.
    async fn assemble(&self, pipeline: &PipelineDefinition, with_sinks: bool) -> Result<RunComponents> {
        let (resilience, adapter_config) = ResilienceConfig::split(&pipeline.connector.config)?;
        let connector = self
            .registry
            .build_connector(&pipeline.connector.kind, &adapter_config)?;

        let mut components = RunComponents {
            connector,
            fetch: ResilientFetch::default(),
            transformer: None,
            sinks: Vec::new(),
        };

        if let Err(e) = self.assemble_rest(pipeline, &resilience, with_sinks, &mut components) {
            components.close().await;
            return Err(e);
        }
        Ok(components)
    }

    fn assemble_rest(
        &self,
        pipeline: &PipelineDefinition,
        resilience: &ResilienceConfig,
        with_sinks: bool,
        components: &mut RunComponents,
    ) -> Result<()> {
        components.fetch = self.resilient_fetch(pipeline, resilience, components.connector.as_ref())?;

        if let Some(spec) = &pipeline.transformer {
            components.transformer = Some(self.registry.build_transformer(spec)?);
        }

        if with_sinks {
            for (index, spec) in pipeline.sinks.iter().enumerate() {
                let sink = self.registry.build_sink(&spec.kind, &spec.config)?;
                components.sinks.push((spec.identity(index), sink));
            }
        }
        Ok(())
    }

    fn resilient_fetch(
        &self,
        pipeline: &PipelineDefinition,
        resilience: &ResilienceConfig,
        connector: &dyn Connector,
    ) -> Result<ResilientFetch> {
        let retry = resilience
            .retry
            .as_ref()
            .map(RetryPolicy::from_settings)
            .unwrap_or_else(RetryPolicy::none);
        let mut fetch = ResilientFetch::new(retry);

        if resilience.cache.is_none()
            && resilience.rate_limit.is_none()
            && resilience.circuit_breaker.is_none()
        {
            return Ok(fetch);
        }

        let key = format!("{}:{}", pipeline.name, fingerprint(&connector.fingerprint_params()));
        if let Some(cache) = &resilience.cache {
            fetch = fetch.with_cache(self.shared_cache(&key), cache.ttl);
        }
        if let Some(breaker) = &resilience.circuit_breaker {
            fetch = fetch.with_circuit_breaker(self.shared_breaker(&key, breaker)?);
        }
        if let Some(limit) = &resilience.rate_limit {
            fetch = fetch.with_rate_limiter(self.shared_limiter(&key, limit)?, limit.wait);
        }
        Ok(fetch)
    }

    fn shared_cache(&self, key: &str) -> Arc<TtlCache> {
        match self.caches.entry(key.to_string()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let cache = Arc::new(TtlCache::new(self.runner.cache_max_entries));
                if let Some(interval) = self.runner.cache_sweep_interval() {
                    cache.spawn_sweeper(interval, self.shutdown.child_token());
                }
                debug!("Created fetch cache for {}", key);
                Arc::clone(entry.insert(cache).value())
            }
        }
    }

    fn shared_limiter(&self, key: &str, settings: &RateLimitSettings) -> Result<Arc<RateLimiter>> {
        if let Some(limiter) = self.limiters.get(key) {
            let limiter = limiter.value();
            if limiter.max_requests() == settings.calls && limiter.window() == settings.period {
                return Ok(Arc::clone(limiter));
            }
        }

        let created = Arc::new(RateLimiter::from_settings(settings)?);
        self.limiters.insert(key.to_string(), Arc::clone(&created));
        debug!(
            "Created rate limiter for {}: {} calls per {:?}",
            key, settings.calls, settings.period
        );
        Ok(created)
    }

    fn shared_breaker(
        &self,
        key: &str,
        settings: &CircuitBreakerSettings,
    ) -> Result<Arc<CircuitBreaker>> {
        if let Some(breaker) = self.breakers.get(key) {
            let breaker = breaker.value();
            if breaker.failure_threshold() == settings.failure_threshold
                && breaker.recovery_timeout() == settings.recovery_timeout
            {
                return Ok(Arc::clone(breaker));
            }
        }

        let created = Arc::new(CircuitBreaker::from_settings(settings)?);
        self.breakers.insert(key.to_string(), Arc::clone(&created));
        debug!(
            "Created circuit breaker for {}: opens after {} failures for {:?}",
            key, settings.failure_threshold, settings.recovery_timeout
        );
        Ok(created)
    }

    /// Number of shared cache, limiter and circuit breaker handles currently held
    pub fn shared_handles(&self) -> (usize, usize, usize) {
        (self.caches.len(), self.limiters.len(), self.breakers.len())
    }
}

/// Aborts the sink write tasks it tracks when dropped
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Write `record` to every sink concurrently. A failing or panicking sink
/// never affects its siblings.
async fn write_all(
    sinks: &[(String, Arc<dyn Sink>)],
    record: Record,
    cancel: &CancellationToken,
) -> BTreeMap<String, SinkOutcome> {
    let record = Arc::new(record);

    let tasks: Vec<JoinHandle<SinkOutcome>> = sinks
        .iter()
        .map(|(name, sink)| {
            let name = name.clone();
            let sink = Arc::clone(sink);
            let record = Arc::clone(&record);
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let started = Instant::now();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => SinkOutcome::cancelled(sink.kind(), started.elapsed()),
                    written = sink.write(&record) => match written {
                        Ok(()) => {
                            debug!("Sink {} wrote record in {:?}", name, started.elapsed());
                            SinkOutcome::succeeded(sink.kind(), started.elapsed())
                        }
                        Err(e) => {
                            error!("Sink {} failed: {}", name, e);
                            SinkOutcome::failed(sink.kind(), e.to_string(), started.elapsed())
                        }
                    },
                }
            })
        })
        .collect();

    let _guard = AbortOnDrop(tasks.iter().map(JoinHandle::abort_handle).collect());
    let joined = join_all(tasks).await;

    sinks
        .iter()
        .zip(joined)
        .map(|((name, sink), joined)| {
            let outcome = joined.unwrap_or_else(|e| {
                error!("Sink {} task failed: {}", name, e);
                SinkOutcome::failed(sink.kind(), format!("sink task failed: {}", e), Duration::ZERO)
            });
            (name.clone(), outcome)
        })
        .collect()
}
