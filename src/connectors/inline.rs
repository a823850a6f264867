use crate::config::parse_component_config;
use crate::etl::traits::Connector;
use crate::types::Payload;
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct InlineConnectorConfig {
    pub payload: Value,
}

/// Returns the payload embedded in its own config
pub struct InlineConnector {
    payload: Value,
}

impl InlineConnector {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    pub fn from_config(config: &Map<String, Value>) -> Result<Self> {
        let config: InlineConnectorConfig =
            parse_component_config("inline connector", config, &["payload"])?;
        Ok(Self::new(config.payload))
    }
}

#[async_trait]
impl Connector for InlineConnector {
    fn kind(&self) -> &str {
        "inline"
    }

    fn fingerprint_params(&self) -> Value {
        json!({"payload": self.payload})
    }

    async fn fetch(&self) -> Result<Payload> {
        Ok(self.payload.clone())
    }
}
