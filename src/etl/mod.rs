//! Pipeline execution: component capabilities, the transform engine and the executor
//!
//! ## Key Components
//!
//! - **Traits**: `Connector`, `Transformer` and `Sink` capabilities implemented by adapters
//! - **Filter**: condition engine that keeps or drops a record
//! - **Mapper**: rule-driven schema mapping with type coercion and templated fields
//! - **Quality**: field-level data quality rules that fail the transform stage
//! - **Registry**: builds components from their `type` string
//! - **Executor**: fetch → transform → concurrent sink fan-out, with one aggregated result per run

pub mod chain;
pub mod executor;
pub mod filter;
pub mod mapper;
pub mod normalizer;
pub mod path;
pub mod quality;
pub mod registry;
pub mod traits;

#[cfg(test)]
mod tests;

pub use chain::TransformerChain;
pub use executor::{DryRunReport, Executor};
pub use filter::{FilterCondition, FilterConfig, FilterEngine, FilterLogic, FilterOperator, FilterTransformer};
pub use mapper::{FieldType, MapperConfig, SchemaMapper, SchemaMappingRule};
pub use normalizer::{JsonNormalizer, NormalizerConfig};
pub use quality::{DataQualityValidator, QualityConfig, QualityRule};
pub use registry::ComponentRegistry;
pub use traits::{Connector, Sink, Transformer};
