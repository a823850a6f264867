use crate::config::parse_component_config;
use crate::etl::traits::Sink;
use crate::types::Record;
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const JSONL_FILE_NAME: &str = "data.jsonl";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One pretty-printed file per record
    #[default]
    Json,
    /// Append one line per record to `data.jsonl`
    Jsonl,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileSinkConfig {
    /// Output directory, created on first write
    pub path: PathBuf,
    #[serde(default)]
    pub format: OutputFormat,
}

pub struct FileSink {
    config: FileSinkConfig,
    /// Serializes appends to the shared jsonl file
    append_lock: Mutex<()>,
}

impl FileSink {
    pub fn new(config: FileSinkConfig) -> Self {
        Self {
            config,
            append_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &Map<String, Value>) -> Result<Self> {
        Ok(Self::new(parse_component_config("file sink", config, &["path"])?))
    }
}

#[async_trait]
impl Sink for FileSink {
    fn kind(&self) -> &str {
        "file"
    }

    async fn write(&self, record: &Record) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.path).await?;

        match self.config.format {
            OutputFormat::Json => {
                let name = format!(
                    "data_{}_{}.json",
                    Utc::now().format("%Y%m%d_%H%M%S%.6f"),
                    Uuid::new_v4().simple()
                );
                let body = serde_json::to_vec_pretty(record)?;
                tokio::fs::write(self.config.path.join(name), body).await?;
            }
            OutputFormat::Jsonl => {
                let mut line = serde_json::to_vec(record)?;
                line.push(b'\n');

                let _guard = self.append_lock.lock().await;
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(self.config.path.join(JSONL_FILE_NAME))
                    .await?;
                file.write_all(&line).await?;
                file.flush().await?;
            }
        }
        Ok(())
    }
}
