//! Structured message types exchanged between agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    Coordinator,
}

/// One typed segment of a message. A closed union: transports and stores
/// never see open-ended payload kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    Data { data: serde_json::Value },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn data<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::Data {
            data: serde_json::to_value(value)?,
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Data { .. } => None,
        }
    }

    pub fn as_data(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Data { data } => Some(data),
            Self::Text { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Message,
    TaskDirective,
}

/// A structured message: ordered typed parts plus a channel-scoped sequence
/// number used for causal ordering (never wall-clock ordering).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub kind: MessageKind,
    pub parts: Vec<Part>,
    /// Monotonically increasing within the owning channel; 0 until assigned.
    #[serde(default)]
    pub sequence: u64,
}

impl Message {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            kind: MessageKind::Message,
            parts,
            sequence: 0,
        }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![Part::text(text)])
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn directive(role: Role, parts: Vec<Part>) -> Self {
        Self::new(role, parts).with_kind(MessageKind::TaskDirective)
    }

    /// First data part that deserializes as `T`.
    pub fn extract_data<T: for<'de> Deserialize<'de>>(&self) -> Option<T> {
        self.parts
            .iter()
            .filter_map(Part::as_data)
            .find_map(|data| serde_json::from_value(data.clone()).ok())
    }

    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Addressed wrapper carrying a message between two agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub from: String,
    pub to: String,
    /// Request/response correlation key; a response must reference the id
    /// of the request it answers.
    pub correlation_id: String,
    pub message: Message,
    pub sent_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl MessageEnvelope {
    pub fn request(
        from: impl Into<String>,
        to: impl Into<String>,
        correlation_id: impl Into<String>,
        message: Message,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            correlation_id: correlation_id.into(),
            message,
            sent_at: Utc::now(),
            reply_to: None,
        }
    }

    /// Build the response envelope for a received request, carrying the
    /// request's correlation id back to the channel that issued it.
    pub fn reply(&self, message: Message) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
            correlation_id: self.correlation_id.clone(),
            message,
            sent_at: Utc::now(),
            reply_to: Some(self.message.id.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_union_serde() {
        let text = Part::text("hello");
        let json = serde_json::to_string(&text).unwrap();
        assert_eq!(json, r#"{"type":"text","text":"hello"}"#);

        let data = Part::data(&serde_json::json!({"k": 1})).unwrap();
        let restored: Part = serde_json::from_str(&serde_json::to_string(&data).unwrap()).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn test_message_ids_unique() {
        let a = Message::text(Role::Agent, "one");
        let b = Message::text(Role::Agent, "two");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_extract_data() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Payload {
            answer: u32,
        }

        let message = Message::new(
            Role::Agent,
            vec![
                Part::text("preamble"),
                Part::data(&Payload { answer: 42 }).unwrap(),
            ],
        );

        let payload: Payload = message.extract_data().unwrap();
        assert_eq!(payload, Payload { answer: 42 });

        let none: Option<Payload> = Message::text(Role::Agent, "no data").extract_data();
        assert!(none.is_none());
    }

    #[test]
    fn test_reply_preserves_correlation() {
        let request = MessageEnvelope::request(
            "coordinator",
            "office",
            "corr-1",
            Message::text(Role::Coordinator, "topic"),
        );

        let response = request.reply(Message::text(Role::Agent, "answer"));
        assert_eq!(response.correlation_id, "corr-1");
        assert_eq!(response.from, "office");
        assert_eq!(response.to, "coordinator");
        assert_eq!(response.reply_to.as_deref(), Some(request.message.id.as_str()));
    }
}
