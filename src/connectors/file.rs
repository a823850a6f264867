use crate::config::parse_component_config;
use crate::etl::traits::Connector;
use crate::types::Payload;
use crate::{error::ForgeFlowError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    #[default]
    Json,
    /// One JSON document per line, fetched as a list
    Jsonl,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileConnectorConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub format: InputFormat,
}

/// Reads a JSON document from the local filesystem
pub struct FileConnector {
    config: FileConnectorConfig,
}

impl FileConnector {
    pub fn new(config: FileConnectorConfig) -> Self {
        Self { config }
    }

    pub fn from_config(config: &Map<String, Value>) -> Result<Self> {
        Ok(Self::new(parse_component_config("file connector", config, &["path"])?))
    }

    fn parse(&self, content: &str) -> Result<Payload> {
        let invalid = |e: serde_json::Error| {
            ForgeFlowError::fatal(format!("{}: invalid JSON: {}", self.config.path.display(), e))
        };

        match self.config.format {
            InputFormat::Json => serde_json::from_str(content).map_err(invalid),
            InputFormat::Jsonl => content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| serde_json::from_str(line).map_err(invalid))
                .collect::<Result<Vec<Value>>>()
                .map(Value::Array),
        }
    }
}

#[async_trait]
impl Connector for FileConnector {
    fn kind(&self) -> &str {
        "file"
    }

    fn fingerprint_params(&self) -> Value {
        json!({"path": self.config.path.to_string_lossy()})
    }

    async fn fetch(&self) -> Result<Payload> {
        let content = tokio::fs::read_to_string(&self.config.path).await?;
        self.parse(&content)
    }
}
