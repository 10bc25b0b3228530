//! Session and message records as they live in memory and on disk.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const PREVIEW_CHARS: usize = 50;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "ai")]
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A message stripped down to what the inference daemon needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for Turn {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// One conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    /// Opaque state blob from the inference daemon. Never inspected.
    #[serde(default)]
    pub context: Option<Value>,
}

impl Session {
    pub fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            created_at: now,
            last_active: now,
            context: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    /// Drop the oldest messages until at most `cap` remain.
    pub fn trim_to(&mut self, cap: usize) {
        if self.messages.len() > cap {
            let excess = self.messages.len() - cap;
            self.messages.drain(..excess);
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            message_count: self.messages.len(),
            created_at: format_local(self.created_at),
            last_active: format_local(self.last_active),
            preview: self
                .messages
                .first()
                .map(|m| preview(&m.content))
                .unwrap_or_default(),
        }
    }
}

/// Listing entry for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub message_count: usize,
    pub created_at: String,
    pub last_active: String,
    pub preview: String,
}

/// Full history of a session plus its continuation context.
#[derive(Debug, Clone, PartialEq)]
pub struct History {
    pub messages: Vec<Message>,
    pub context: Option<Value>,
}

fn format_local(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn preview(content: &str) -> String {
    if content.chars().count() > PREVIEW_CHARS {
        let head: String = content.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        content.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_keeps_newest() {
        let mut session = Session::new("s".to_string());
        for i in 1..=5 {
            session.messages.push(Message::new(Role::User, i.to_string()));
        }
        session.trim_to(3);
        let contents: Vec<_> = session.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["3", "4", "5"]);
    }

    #[test]
    fn test_preview_truncates_long_content() {
        let long = "x".repeat(60);
        assert_eq!(preview(&long), format!("{}...", "x".repeat(50)));
        assert_eq!(preview(&"y".repeat(50)), "y".repeat(50));
    }

    #[test]
    fn test_preview_counts_characters_not_bytes() {
        let text = "é".repeat(51);
        assert_eq!(preview(&text), format!("{}...", "é".repeat(50)));
    }

    #[test]
    fn test_summary_of_empty_session() {
        let summary = Session::new("abc".to_string()).summary();
        assert_eq!(summary.session_id, "abc");
        assert_eq!(summary.message_count, 0);
        assert_eq!(summary.preview, "");
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        let legacy: Role = serde_json::from_str("\"ai\"").unwrap();
        assert_eq!(legacy, Role::Assistant);
    }
}
