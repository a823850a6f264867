use crate::types::{Payload, Record, TransformOutcome};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Source of one payload per pipeline run
#[async_trait]
pub trait Connector: Send + Sync {
    fn kind(&self) -> &str;

    /// Effective request parameters with volatile fields removed. Two
    /// connectors returning equal values here would fetch the same payload.
    fn fingerprint_params(&self) -> Value;

    async fn fetch(&self) -> Result<Payload>;

    /// Idempotent resource release
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Pure, in-memory reshaping of a payload. Never mutates its input.
pub trait Transformer: Send + Sync {
    fn kind(&self) -> &str;
    fn transform(&self, payload: &Payload) -> Result<TransformOutcome>;
}

/// Destination for a transformed record. Writes of different sinks run concurrently.
#[async_trait]
pub trait Sink: Send + Sync {
    fn kind(&self) -> &str;
    async fn write(&self, record: &Record) -> Result<()>;

    /// Idempotent resource release
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
