use crate::error::ForgeFlowError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Raw value returned by a connector: scalars, ordered mappings and sequences
pub type Payload = serde_json::Value;

/// Payload after transformation
pub type Record = serde_json::Value;

/// Result of a transform step. `Drop` means nothing is forwarded to sinks.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutcome {
    Keep(Record),
    Drop,
}

impl TransformOutcome {
    pub fn is_drop(&self) -> bool {
        matches!(self, TransformOutcome::Drop)
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            TransformOutcome::Keep(record) => Some(record),
            TransformOutcome::Drop => None,
        }
    }
}

/// Per-run state machine: Idle → Fetching → Transforming → Writing → terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Idle,
    Fetching,
    Transforming,
    Writing,
    Succeeded,
    PartiallyFailed,
    Failed,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded | ExecutionState::PartiallyFailed | ExecutionState::Failed
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionState::Idle => "idle",
            ExecutionState::Fetching => "fetching",
            ExecutionState::Transforming => "transforming",
            ExecutionState::Writing => "writing",
            ExecutionState::Succeeded => "succeeded",
            ExecutionState::PartiallyFailed => "partially_failed",
            ExecutionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Succeeded,
    PartiallyFailed,
    Failed,
    Cancelled,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStatus::Succeeded => "succeeded",
            PipelineStatus::PartiallyFailed => "partially_failed",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkStatus {
    Succeeded,
    Failed,
    Cancelled,
}

/// Outcome of one sink write, collected independently of its siblings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkOutcome {
    pub sink_type: String,
    pub status: SinkStatus,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl SinkOutcome {
    pub fn succeeded(sink_type: &str, elapsed: Duration) -> Self {
        Self {
            sink_type: sink_type.to_string(),
            status: SinkStatus::Succeeded,
            error: None,
            elapsed,
        }
    }

    pub fn failed(sink_type: &str, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            sink_type: sink_type.to_string(),
            status: SinkStatus::Failed,
            error: Some(error.into()),
            elapsed,
        }
    }

    pub fn cancelled(sink_type: &str, elapsed: Duration) -> Self {
        Self {
            sink_type: sink_type.to_string(),
            status: SinkStatus::Cancelled,
            error: Some("cancelled".to_string()),
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SinkStatus::Succeeded
    }
}

/// Diagnostics of the resilient fetch stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchReport {
    pub fingerprint: String,
    pub from_cache: bool,
    pub attempts: u32,
    pub total_backoff: Duration,
    pub rate_limit_wait: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Configuration,
    Connector,
    RateLimited,
    Transform,
    Sink,
    Cancelled,
    Internal,
}

/// Structured cause attached to a failed or cancelled run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineError {
    pub kind: ErrorKind,
    /// State the run was in when the failure was detected
    pub stage: ExecutionState,
    pub message: String,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, stage: ExecutionState, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            message: message.into(),
        }
    }

    pub fn from_error(stage: ExecutionState, error: &ForgeFlowError) -> Self {
        let kind = match error {
            ForgeFlowError::Cancelled => ErrorKind::Cancelled,
            ForgeFlowError::Connector { .. } | ForgeFlowError::Timeout(_) | ForgeFlowError::Io(_) => {
                ErrorKind::Connector
            }
            ForgeFlowError::RateLimitExceeded { .. } => ErrorKind::RateLimited,
            ForgeFlowError::Transform(_) | ForgeFlowError::Mapping(_) => ErrorKind::Transform,
            ForgeFlowError::Sink { .. } => ErrorKind::Sink,
            ForgeFlowError::Config(_)
            | ForgeFlowError::InvalidConfig(_)
            | ForgeFlowError::UnknownComponent { .. } => ErrorKind::Configuration,
            _ => ErrorKind::Internal,
        };
        Self::new(kind, stage, error.to_string())
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} failure while {}: {}", self.kind, self.stage, self.message)
    }
}

/// Caller-visible outcome of one `Executor::execute` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub pipeline: String,
    pub run_id: Uuid,
    pub status: PipelineStatus,
    pub final_state: ExecutionState,
    /// The transform dropped the record; no sink was written
    pub filtered: bool,
    /// The pipeline is disabled; nothing was fetched
    pub disabled: bool,
    pub sink_results: BTreeMap<String, SinkOutcome>,
    pub fetch: Option<FetchReport>,
    pub error: Option<PipelineError>,
    pub duration: Duration,
}

impl PipelineResult {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, PipelineStatus::Failed | PipelineStatus::Cancelled)
    }

    pub fn succeeded_sinks(&self) -> usize {
        self.sink_results.values().filter(|o| o.is_success()).count()
    }

    pub fn failed_sinks(&self) -> Vec<&str> {
        self.sink_results
            .iter()
            .filter(|(_, o)| !o.is_success())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Collapse a failed or cancelled run into a `ForgeFlowError::Pipeline`
    pub fn into_result(self) -> crate::Result<PipelineResult> {
        if !self.is_failure() {
            return Ok(self);
        }
        let message = match &self.error {
            Some(error) => error.to_string(),
            None => format!("run ended with status {}", self.status),
        };
        Err(ForgeFlowError::Pipeline {
            pipeline: self.pipeline,
            message,
        })
    }
}
