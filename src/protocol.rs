//! Wire types for the HTTP API.
//!
//! Request and response bodies are JSON. The generate endpoint answers with a
//! `text/event-stream` whose frames are described by [`StreamFrame`].

use crate::store::{Message, SessionSummary};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Header carrying the session id in both directions.
pub const SESSION_HEADER: &str = "x-session-id";

/// Body of `POST /api/generate`.
///
/// Fields other than the named ones are passed through to Ollama untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Explicit prior turns. When present, stored history is not attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One outbound event-stream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// A downstream line, forwarded byte for byte.
    Relayed(String),
    /// The stream failed.
    Error(String),
    /// Last frame of a completed stream.
    Session(String),
}

impl StreamFrame {
    /// JSON payload of the frame (the part after `data: `).
    pub fn to_json(&self) -> String {
        match self {
            StreamFrame::Relayed(raw) => raw.clone(),
            StreamFrame::Error(message) => serde_json::json!({ "error": message }).to_string(),
            StreamFrame::Session(id) => serde_json::json!({ "session_id": id }).to_string(),
        }
    }
}

/// Body of `POST /api/clear-session`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClearSessionRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearSessionResponse {
    pub success: bool,
    pub message: String,
}

/// Query of `GET /api/history`.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionSummary>,
}

/// Error body returned by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}
