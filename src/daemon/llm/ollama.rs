//! Ollama client.
//!
//! Ollama streams `/api/generate` as newline-delimited JSON objects. The client
//! turns that body into a stream of [`GenerationEvent`]s; the relay decides
//! what to do with them.

use super::lines::LineBuffer;
use super::{GenerationEvent, InferenceError, StreamLine};
use crate::config::OllamaConfig;
use crate::protocol::GenerateRequest;
use crate::store::Turn;
use anyhow::{Context, Result};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, error, warn};

const CONTEXT_HEADER: &str = "Ollama-Context";

/// Ollama client shared by all request handlers.
#[derive(Clone)]
pub struct OllamaClient {
    pub model: String,
    base_url: String,
    generate_url: String,
    tags_url: String,
    request_timeout: Duration,
    check_timeout: Duration,
    history_limit: usize,
    client: Client,
}

impl OllamaClient {
    /// Create a new Ollama client.
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.check_timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            model: config.model.clone(),
            base_url: config.base_url.clone(),
            generate_url: config.generate_url(),
            tags_url: config.tags_url(),
            request_timeout: config.request_timeout(),
            check_timeout: config.check_timeout(),
            history_limit: config.history_context_limit,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check that Ollama answers and can list its models.
    ///
    /// A configured model missing from the listing is only a warning.
    pub async fn check_available(&self) -> bool {
        match self.probe().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Ollama connection error: {}", e);
                false
            }
        }
    }

    async fn probe(&self) -> Result<(), InferenceError> {
        let secs = self.check_timeout.as_secs();
        let response = self
            .client
            .get(&self.base_url)
            .timeout(self.check_timeout)
            .send()
            .await
            .map_err(|e| InferenceError::from_reqwest(e, secs))?;
        ensure_success(&response)?;

        let tags = self.fetch_tags(self.check_timeout).await?;
        if !model_listed(&tags, &self.model) {
            warn!("Configured model '{}' not found in Ollama", self.model);
        }
        Ok(())
    }

    /// The raw model listing from `/api/tags`.
    pub async fn list_models(&self) -> Result<Value, InferenceError> {
        self.fetch_tags(self.request_timeout).await
    }

    async fn fetch_tags(&self, timeout: Duration) -> Result<Value, InferenceError> {
        let secs = timeout.as_secs();
        let response = self
            .client
            .get(&self.tags_url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| InferenceError::from_reqwest(e, secs))?;
        ensure_success(&response)?;
        response
            .json()
            .await
            .map_err(|e| InferenceError::from_reqwest(e, secs))
    }

    /// Build the downstream request body for a prompt.
    ///
    /// `turns` and `context` are the session's prior state. Prior turns are
    /// only attached when the caller did not send its own `messages`.
    pub fn prepare(
        &self,
        request: GenerateRequest,
        turns: Vec<Turn>,
        context: Option<Value>,
    ) -> OllamaGenerateRequest {
        let GenerateRequest {
            prompt,
            model,
            messages,
            context: caller_context,
            mut extra,
        } = request;
        extra.remove("stream");

        let messages = match messages {
            Some(own) => Some(Messages::Caller(own)),
            None if turns.is_empty() => None,
            None => {
                let skip = turns.len().saturating_sub(self.history_limit);
                Some(Messages::History(turns.into_iter().skip(skip).collect()))
            }
        };

        OllamaGenerateRequest {
            model: model.unwrap_or_else(|| self.model.clone()),
            prompt,
            stream: true,
            context: context.or(caller_context),
            messages,
            extra,
        }
    }

    /// Start a streaming generation.
    ///
    /// The stream ends after the last downstream line, or right after a single
    /// [`GenerationEvent::Failed`]. Dropping it releases the connection.
    pub fn generate(&self, request: OllamaGenerateRequest) -> BoxStream<'static, GenerationEvent> {
        let client = self.client.clone();
        let url = self.generate_url.clone();
        let stall = self.request_timeout;

        Box::pin(async_stream::stream! {
            debug!("Sending request to Ollama with model: {}", request.model);
            let sent = tokio::time::timeout(stall, client.post(&url).json(&request).send()).await;
            let response = match sent {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    let e = InferenceError::from_reqwest(e, stall.as_secs());
                    error!("{}", e);
                    yield GenerationEvent::Failed(e);
                    return;
                }
                Err(_) => {
                    let e = InferenceError::Timeout(stall.as_secs());
                    error!("{}", e);
                    yield GenerationEvent::Failed(e);
                    return;
                }
            };

            if let Err(e) = ensure_success(&response) {
                error!("{}", e);
                yield GenerationEvent::Failed(e);
                return;
            }

            if let Some(context) = header_context(&response) {
                yield GenerationEvent::Context(context);
            }

            let mut events = Box::pin(decode_stream(response.bytes_stream(), stall));
            while let Some(event) = events.next().await {
                yield event;
            }
        })
    }
}

/// Body sent to Ollama's generate endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct OllamaGenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Messages>,
    /// Caller fields Ollama may understand (`options`, `system`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Messages {
    Caller(Vec<Value>),
    History(Vec<Turn>),
}

/// Turn a newline-delimited JSON body into generation events.
///
/// Malformed lines are logged and skipped. A body error, or no data for
/// `stall`, ends the stream with a single `Failed` event.
pub fn decode_stream<S, B>(body: S, stall: Duration) -> impl Stream<Item = GenerationEvent>
where
    S: Stream<Item = Result<B, reqwest::Error>>,
    B: AsRef<[u8]>,
{
    async_stream::stream! {
        let mut body = Box::pin(body);
        let mut buffer = LineBuffer::new();

        loop {
            let chunk = match tokio::time::timeout(stall, body.next()).await {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    let e = InferenceError::from_reqwest(e, stall.as_secs());
                    error!("{}", e);
                    yield GenerationEvent::Failed(e);
                    return;
                }
                Err(_) => {
                    let e = InferenceError::Timeout(stall.as_secs());
                    error!("{}", e);
                    yield GenerationEvent::Failed(e);
                    return;
                }
            };

            for line in buffer.push(chunk.as_ref()) {
                if let Some(event) = parse_line(&line) {
                    yield event;
                }
            }
        }

        if let Some(line) = buffer.finish() {
            if let Some(event) = parse_line(&line) {
                yield event;
            }
        }
    }
}

fn parse_line(line: &str) -> Option<GenerationEvent> {
    match StreamLine::parse(line) {
        Ok(parsed) => {
            if let Some(err) = &parsed.error {
                warn!("Error from Ollama: {}", err);
            }
            Some(GenerationEvent::Line(parsed))
        }
        Err(e) => {
            warn!("Error parsing JSON from Ollama: {}", e);
            None
        }
    }
}

fn ensure_success(response: &Response) -> Result<(), InferenceError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(InferenceError::Status(status.as_u16()))
    }
}

fn header_context(response: &Response) -> Option<Value> {
    let raw = response.headers().get(CONTEXT_HEADER)?.to_str().ok()?;
    match serde_json::from_str(raw) {
        Ok(context) => Some(context),
        Err(e) => {
            warn!("Failed to parse Ollama context from headers: {}", e);
            None
        }
    }
}

fn model_listed(tags: &Value, model: &str) -> bool {
    tags.get("models")
        .and_then(Value::as_array)
        .map(|models| {
            models
                .iter()
                .any(|m| m.get("name").and_then(Value::as_str) == Some(model))
        })
        .unwrap_or(false)
}
