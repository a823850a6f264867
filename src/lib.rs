pub mod config;
pub mod connectors;
pub mod error;
pub mod etl;
pub mod resilience;
pub mod sinks;
pub mod storage;
pub mod types;

#[cfg(test)]
mod test_util;

pub use config::{PipelineDefinition, PipelineFile, RunnerConfig};
pub use error::{ForgeFlowError, Result};
pub use etl::{ComponentRegistry, Executor};
pub use types::{PipelineResult, PipelineStatus};
