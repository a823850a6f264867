use crate::etl::traits::Sink;
use crate::types::Record;
use crate::{error::ForgeFlowError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsoleSinkConfig {
    #[serde(default)]
    pub pretty: bool,
}

/// Prints each record to stdout, one JSON document per write
pub struct ConsoleSink {
    config: ConsoleSinkConfig,
    stdout: Mutex<tokio::io::Stdout>,
}

impl ConsoleSink {
    pub fn new(config: ConsoleSinkConfig) -> Self {
        Self {
            config,
            stdout: Mutex::new(tokio::io::stdout()),
        }
    }

    pub fn from_config(config: &Map<String, Value>) -> Result<Self> {
        let config: ConsoleSinkConfig = serde_json::from_value(Value::Object(config.clone()))
            .map_err(|e| ForgeFlowError::InvalidConfig(format!("console sink: {}", e)))?;
        Ok(Self::new(config))
    }

    fn render(&self, record: &Record) -> Result<Vec<u8>> {
        let mut out = if self.config.pretty {
            serde_json::to_vec_pretty(record)?
        } else {
            serde_json::to_vec(record)?
        };
        out.push(b'\n');
        Ok(out)
    }
}

#[async_trait]
impl Sink for ConsoleSink {
    fn kind(&self) -> &str {
        "console"
    }

    async fn write(&self, record: &Record) -> Result<()> {
        let out = self.render(record)?;
        let mut stdout = self.stdout.lock().await;
        stdout.write_all(&out).await?;
        stdout.flush().await?;
        Ok(())
    }
}
