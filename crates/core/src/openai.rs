//! Clients for OpenAI-compatible `embeddings` and `chat/completions`
//! endpoints.
//!
//! Rate limits (429), server errors and connection failures are retried
//! with exponential backoff up to `max_retries` times. Timeouts are not
//! retried: they surface immediately as [`ServiceError::Timeout`] so an
//! interactive caller can decide to ask again.

use crate::answer::{CompletionRequest, CompletionService};
use crate::embeddings::Embedder;
use crate::error::{ConfigError, ServiceError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const EMBEDDING_SERVICE: &str = "embedding service";
const COMPLETION_SERVICE: &str = "completion service";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    embeddings_url: Url,
    chat_url: Url,
    api_key: String,
    timeout: Duration,
    max_retries: u32,
}

impl OpenAiConfig {
    pub fn new(api_base: &str, api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey(api_base.to_string()));
        }

        let mut base = api_base.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base)?;

        Ok(Self {
            embeddings_url: base.join("embeddings")?,
            chat_url: base.join("chat/completions")?,
            api_key,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn embeddings_url(&self) -> &Url {
        &self.embeddings_url
    }

    pub fn chat_url(&self) -> &Url {
        &self.chat_url
    }
}

struct JsonClient {
    http: Client,
    api_key: String,
    timeout: Duration,
    max_retries: u32,
}

impl JsonClient {
    fn new(config: &OpenAiConfig) -> Result<Self, ServiceError> {
        Ok(Self {
            http: Client::builder().timeout(config.timeout).build()?,
            api_key: config.api_key.clone(),
            timeout: config.timeout,
            max_retries: config.max_retries,
        })
    }

    async fn post(
        &self,
        service: &'static str,
        url: &Url,
        body: &Value,
        fail: fn(String) -> ServiceError,
    ) -> Result<Value, ServiceError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(500 << (attempt - 1).min(5));
                debug!(service, attempt, delay_ms = delay.as_millis() as u64, "retrying request");
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .http
                .post(url.clone())
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(error) if error.is_timeout() => return Err(self.timed_out(service)),
                Err(error) => {
                    warn!(service, %error, "request failed");
                    last_error = Some(fail(format!("{service} unreachable: {error}")));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return response.json::<Value>().await.map_err(|error| {
                    if error.is_timeout() {
                        self.timed_out(service)
                    } else {
                        fail(format!("{service} sent an unreadable response: {error}"))
                    }
                });
            }

            let details = response.text().await.unwrap_or_default();
            let error = fail(format!("{service} returned {status}: {details}"));
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                warn!(service, %status, "retryable response");
                last_error = Some(error);
                continue;
            }
            return Err(error);
        }

        Err(last_error.unwrap_or_else(|| fail(format!("{service} failed after retries"))))
    }

    fn timed_out(&self, service: &'static str) -> ServiceError {
        ServiceError::Timeout {
            service,
            seconds: self.timeout.as_secs(),
        }
    }
}

pub struct OpenAiEmbedder {
    client: JsonClient,
    url: Url,
    model: String,
    dimensions: Option<usize>,
}

impl OpenAiEmbedder {
    /// `dimensions` is forwarded to the API and checked against every
    /// response when set.
    pub fn new(
        config: &OpenAiConfig,
        model: impl Into<String>,
        dimensions: Option<usize>,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            client: JsonClient::new(config)?,
            url: config.embeddings_url.clone(),
            model: model.into(),
            dimensions,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let mut body = json!({
            "model": self.model,
            "input": text,
        });
        if let Some(dimensions) = self.dimensions {
            body["dimensions"] = json!(dimensions);
        }

        let payload = self
            .client
            .post(EMBEDDING_SERVICE, &self.url, &body, ServiceError::Embedding)
            .await?;
        let vector = parse_embedding(&payload)?;

        match self.dimensions {
            Some(expected) if expected != vector.len() => Err(ServiceError::Embedding(format!(
                "expected {expected}-d embedding, got {}",
                vector.len()
            ))),
            _ => Ok(vector),
        }
    }
}

fn parse_embedding(payload: &Value) -> Result<Vec<f32>, ServiceError> {
    let values = payload
        .pointer("/data/0/embedding")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ServiceError::Embedding("response is missing data[0].embedding".to_string())
        })?;

    let vector = values
        .iter()
        .map(|value| value.as_f64().map(|number| number as f32))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| ServiceError::Embedding("embedding holds non-numeric values".to_string()))?;

    if vector.is_empty() {
        return Err(ServiceError::Embedding("embedding is empty".to_string()));
    }
    Ok(vector)
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 500,
        }
    }
}

pub struct OpenAiChatCompletion {
    client: JsonClient,
    url: Url,
    settings: ChatSettings,
}

impl OpenAiChatCompletion {
    pub fn new(config: &OpenAiConfig, settings: ChatSettings) -> Result<Self, ServiceError> {
        Ok(Self {
            client: JsonClient::new(config)?,
            url: config.chat_url.clone(),
            settings,
        })
    }
}

#[async_trait]
impl CompletionService for OpenAiChatCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        let body = json!({
            "model": self.settings.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
        });

        let payload = self
            .client
            .post(COMPLETION_SERVICE, &self.url, &body, ServiceError::Generation)
            .await?;
        parse_completion(&payload)
    }
}

fn parse_completion(payload: &Value) -> Result<String, ServiceError> {
    let content = payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ServiceError::Generation("response is missing choices[0].message.content".to_string())
        })?;

    if content.trim().is_empty() {
        return Err(ServiceError::Generation(
            "completion service returned an empty answer".to_string(),
        ));
    }
    Ok(content.to_string())
}
