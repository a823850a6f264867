use crate::config::parse_component_config;
use crate::etl::traits::Connector;
use crate::types::Payload;
use crate::{error::ForgeFlowError, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Headers that change per request and must not split the cache
const VOLATILE_HEADERS: [&str; 4] = ["date", "x-request-id", "x-correlation-id", "x-timestamp"];

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout() -> f64 {
    30.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConnectorConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    #[serde(default)]
    pub body: Option<Value>,
    /// Seconds
    #[serde(default = "default_timeout")]
    pub timeout: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestConnectorConfig {
    pub base_url: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    #[serde(default = "default_timeout")]
    pub timeout: f64,
}

impl From<RestConnectorConfig> for HttpConnectorConfig {
    fn from(rest: RestConnectorConfig) -> Self {
        let url = format!(
            "{}/{}",
            rest.base_url.trim_end_matches('/'),
            rest.endpoint.trim_start_matches('/')
        );
        Self {
            url: url.trim_end_matches('/').to_string(),
            method: rest.method,
            headers: rest.headers,
            params: rest.params,
            body: None,
            timeout: rest.timeout,
        }
    }
}

/// Responses that signal a transient upstream condition
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429) || (500..600).contains(&status)
}

fn query_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// JSON-over-HTTP connector backing the `http` and `rest` types
pub struct HttpConnector {
    kind: &'static str,
    config: HttpConnectorConfig,
    method: Method,
    client: Client,
}

impl HttpConnector {
    pub fn new(kind: &'static str, config: HttpConnectorConfig) -> Result<Self> {
        let invalid = |reason: String| ForgeFlowError::InvalidConfig(format!("{} connector: {}", kind, reason));

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
            kind,
            config,
            method,
            client,
        })
    }

    pub fn from_config(config: &Map<String, Value>) -> Result<Self> {
        Self::new("http", parse_component_config("http connector", config, &["url"])?)
    }

    pub fn rest_from_config(config: &Map<String, Value>) -> Result<Self> {
        let rest: RestConnectorConfig =
            parse_component_config("rest connector", config, &["base_url"])?;
        Self::new("rest", rest.into())
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn classify(&self, error: reqwest::Error) -> ForgeFlowError {
        let message = format!("{} {}: {}", self.method, self.config.url, error);
        if error.is_timeout() {
            ForgeFlowError::Timeout(message)
        } else if error.is_connect() || error.is_request() {
            ForgeFlowError::transient(message)
        } else {
            ForgeFlowError::fatal(message)
        }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    fn kind(&self) -> &str {
        self.kind
    }

    fn fingerprint_params(&self) -> Value {
        let headers: BTreeMap<String, &String> = self
            .config
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .filter(|(k, _)| !VOLATILE_HEADERS.contains(&k.as_str()))
            .collect();

        json!({
            "method": self.method.as_str(),
            "url": self.config.url,
            "params": self.config.params,
            "headers": headers,
            "body": self.config.body,
        })
    }

    async fn fetch(&self) -> Result<Payload> {
        let query: Vec<(&str, String)> = self
            .config
            .params
            .iter()
            .map(|(k, v)| (k.as_str(), query_text(v)))
            .collect();

        let mut request = self
            .client
            .request(self.method.clone(), &self.config.url)
            .query(&query);
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &self.config.body {
            request = request.json(body);
        }

        debug!("{} {}", self.method, self.config.url);
        let response = request.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("{} {} returned {}", self.method, self.config.url, status);
            return Err(if is_retryable_status(status.as_u16()) {
                ForgeFlowError::transient(message)
            } else {
                ForgeFlowError::fatal(message)
            });
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                ForgeFlowError::Timeout(format!("{} {}: {}", self.method, self.config.url, e))
            } else {
                ForgeFlowError::fatal(format!("{} returned an invalid JSON body: {}", self.config.url, e))
            }
        })
    }
}
