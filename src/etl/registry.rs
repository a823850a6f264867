use crate::config::TransformerSpec;
use crate::connectors::{FileConnector, HttpConnector, InlineConnector};
use crate::etl::chain::TransformerChain;
use crate::etl::filter::FilterTransformer;
use crate::etl::mapper::SchemaMapper;
use crate::etl::normalizer::JsonNormalizer;
use crate::etl::quality::DataQualityValidator;
use crate::etl::traits::{Connector, Sink, Transformer};
use crate::sinks::{ConsoleSink, FileSink, HttpSink};
use crate::{error::ForgeFlowError, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub type ConnectorFactory = Arc<dyn Fn(&Map<String, Value>) -> Result<Box<dyn Connector>> + Send + Sync>;
pub type TransformerFactory =
    Arc<dyn Fn(&Map<String, Value>, &ComponentRegistry) -> Result<Box<dyn Transformer>> + Send + Sync>;
pub type SinkFactory = Arc<dyn Fn(&Map<String, Value>) -> Result<Arc<dyn Sink>> + Send + Sync>;

#[derive(Debug, Deserialize)]
struct ChainConfig {
    #[serde(default)]
    steps: Vec<TransformerSpec>,
}

/// Maps `type` strings to component constructors. Constructors validate
/// their config and fail before any pipeline stage runs.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    connectors: HashMap<String, ConnectorFactory>,
    transformers: HashMap<String, TransformerFactory>,
    sinks: HashMap<String, SinkFactory>,
}

impl ComponentRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register_connector("http", |config| Ok(Box::new(HttpConnector::from_config(config)?)));
        registry.register_connector("rest", |config| {
            Ok(Box::new(HttpConnector::rest_from_config(config)?))
        });
        registry.register_connector("file", |config| Ok(Box::new(FileConnector::from_config(config)?)));
        registry.register_connector("inline", |config| {
            Ok(Box::new(InlineConnector::from_config(config)?))
        });

        registry.register_transformer("filter", |config, _| {
            Ok(Box::new(FilterTransformer::from_config(config)?))
        });
        registry.register_transformer("schema_mapper", |config, _| {
            Ok(Box::new(SchemaMapper::from_config(config)?))
        });
        registry.register_transformer("json_normalizer", |config, _| {
            Ok(Box::new(JsonNormalizer::from_config(config)?))
        });
        registry.register_transformer("data_quality", |config, _| {
            Ok(Box::new(DataQualityValidator::from_config(config)?))
        });
        registry.register_transformer("chain", |config, registry| {
            let chain: ChainConfig = serde_json::from_value(Value::Object(config.clone()))
                .map_err(|e| ForgeFlowError::InvalidConfig(format!("chain: {}", e)))?;
            let steps = chain
                .steps
                .iter()
                .map(|step| registry.build_transformer(step))
                .collect::<Result<Vec<_>>>()?;
            Ok(Box::new(TransformerChain::new(steps)))
        });

        registry.register_sink("file", |config| Ok(Arc::new(FileSink::from_config(config)?)));
        registry.register_sink("console", |config| Ok(Arc::new(ConsoleSink::from_config(config)?)));
        registry.register_sink("http", |config| Ok(Arc::new(HttpSink::from_config(config)?)));

        registry
    }

    pub fn register_connector<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&Map<String, Value>) -> Result<Box<dyn Connector>> + Send + Sync + 'static,
    {
        self.connectors.insert(kind.to_string(), Arc::new(factory));
    }

    pub fn register_transformer<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&Map<String, Value>, &ComponentRegistry) -> Result<Box<dyn Transformer>> + Send + Sync + 'static,
    {
        self.transformers.insert(kind.to_string(), Arc::new(factory));
    }

    pub fn register_sink<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&Map<String, Value>) -> Result<Arc<dyn Sink>> + Send + Sync + 'static,
    {
        self.sinks.insert(kind.to_string(), Arc::new(factory));
    }

    /// `config` must already have the resilience keys split off
    pub fn build_connector(&self, kind: &str, config: &Map<String, Value>) -> Result<Box<dyn Connector>> {
        let factory = self
            .connectors
            .get(kind)
            .ok_or_else(|| ForgeFlowError::UnknownComponent {
                kind: "connector",
                type_name: kind.to_string(),
            })?;
        factory(config)
    }

    pub fn build_transformer(&self, spec: &TransformerSpec) -> Result<Box<dyn Transformer>> {
        let factory = self
            .transformers
            .get(&spec.kind)
            .ok_or_else(|| ForgeFlowError::UnknownComponent {
                kind: "transformer",
                type_name: spec.kind.clone(),
            })?;
        factory(&spec.config, self)
    }

    pub fn build_sink(&self, kind: &str, config: &Map<String, Value>) -> Result<Arc<dyn Sink>> {
        let factory = self.sinks.get(kind).ok_or_else(|| ForgeFlowError::UnknownComponent {
            kind: "sink",
            type_name: kind.to_string(),
        })?;
        factory(config)
    }

    pub fn connector_types(&self) -> Vec<&str> {
        sorted_keys(&self.connectors)
    }

    pub fn transformer_types(&self) -> Vec<&str> {
        sorted_keys(&self.transformers)
    }

    pub fn sink_types(&self) -> Vec<&str> {
        sorted_keys(&self.sinks)
    }
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<&str> {
    let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
    keys.sort_unstable();
    keys
}
