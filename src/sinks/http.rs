use crate::config::parse_component_config;
use crate::etl::traits::Sink;
use crate::types::Record;
use crate::{error::ForgeFlowError, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

fn default_method() -> String {
    "POST".to_string()
}

fn default_timeout() -> f64 {
    30.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSinkConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Seconds
    #[serde(default = "default_timeout")]
    pub timeout: f64,
}

/// Sends each record as a JSON request body
pub struct HttpSink {
    config: HttpSinkConfig,
    method: Method,
    client: Client,
}

impl HttpSink {
    pub fn new(config: HttpSinkConfig) -> Result<Self> {
        let invalid = |reason: String| ForgeFlowError::InvalidConfig(format!("http sink: {}", reason));

        Url::parse(&config.url).map_err(|e| invalid(format!("invalid url {}: {}", config.url, e)))?;
        let method = Method::from_bytes(config.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| invalid(format!("invalid method {}", config.method)))?;
        if !config.timeout.is_finite() || config.timeout <= 0.0 {
            return Err(invalid("timeout must be greater than 0".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs_f64(config.timeout))
            .build()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            config,
            method,
            client,
        })
    }

    pub fn from_config(config: &Map<String, Value>) -> Result<Self> {
        Self::new(parse_component_config("http sink", config, &["url"])?)
    }
}

#[async_trait]
impl Sink for HttpSink {
    fn kind(&self) -> &str {
        "http"
    }

    async fn write(&self, record: &Record) -> Result<()> {
        let mut request = self
            .client
            .request(self.method.clone(), &self.config.url)
            .json(record);
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ForgeFlowError::sink("http", format!("{}: {}", self.config.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForgeFlowError::sink(
                "http",
                format!("{} returned {}", self.config.url, status),
            ));
        }
        Ok(())
    }
}
