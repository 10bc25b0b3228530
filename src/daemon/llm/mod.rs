//! Client side of the inference daemon.
//!
//! [`ollama::OllamaClient`] talks to Ollama; this module holds the event and
//! error types its streaming call produces.

pub mod lines;
pub mod ollama;

pub use ollama::OllamaClient;

use serde_json::{Map, Value};
use thiserror::Error;

/// Failures talking to the inference daemon.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Connection to Ollama failed: {0}")]
    Connect(String),
    #[error("Request to Ollama timed out after {0} seconds")]
    Timeout(u64),
    #[error("Ollama API returned error: {0}")]
    Status(u16),
    #[error("Ollama request failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl InferenceError {
    /// Classify a reqwest error by the layer it came from.
    pub fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            InferenceError::Timeout(timeout_secs)
        } else if err.is_connect() {
            InferenceError::Connect(err.to_string())
        } else {
            InferenceError::Request(err)
        }
    }
}

/// One JSON object line from the generate stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamLine {
    /// The line exactly as received, for verbatim forwarding.
    pub raw: String,
    pub response: Option<String>,
    pub context: Option<Value>,
    pub error: Option<String>,
    pub done: bool,
}

impl StreamLine {
    /// Parse a line. Anything that is not a JSON object is rejected.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let object: Map<String, Value> = serde_json::from_str(raw)?;
        let error = object.get("error").map(|e| match e {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        Ok(Self {
            raw: raw.to_string(),
            response: object
                .get("response")
                .and_then(Value::as_str)
                .map(str::to_string),
            context: object.get("context").filter(|c| !c.is_null()).cloned(),
            error,
            done: object.get("done").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

/// Item of the generate stream.
#[derive(Debug)]
pub enum GenerationEvent {
    /// A parsed downstream line.
    Line(StreamLine),
    /// Context delivered out of band, in the `Ollama-Context` header.
    Context(Value),
    /// The call failed; nothing follows.
    Failed(InferenceError),
}
