//! Message types for qtools
//!
//! A [`Message`] is the envelope the tools move around. The same serde
//! representation is used for the JSON records read from and written to
//! files and for the wire transfer frames.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Default message priority
pub const DEFAULT_PRIORITY: u8 = 4;

/// Message or correlation identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// Numeric identifier
    Int(u64),
    /// String identifier
    Str(String),
}

impl MessageId {
    /// Generate a short random identifier
    pub fn generate() -> Self {
        Self::Str(unique_id(4))
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{}", value),
            Self::Str(value) => write!(f, "{}", value),
        }
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<u64> for MessageId {
    fn from(value: u64) -> Self {
        Self::Int(value)
    }
}

/// Hex-encode `bytes` random bytes
pub fn unique_id(bytes: usize) -> String {
    let uuid = Uuid::new_v4();

    uuid.as_bytes()
        .iter()
        .take(bytes.min(16))
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// A message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,

    /// Identifier of the message this one answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<MessageId>,

    /// Identity of the producing user
    #[serde(default, rename = "user", skip_serializing_if = "is_blank")]
    pub user_id: Option<String>,

    /// Target address
    #[serde(default, rename = "to", skip_serializing_if = "is_blank")]
    pub address: Option<String>,

    /// Address for responses
    #[serde(default, skip_serializing_if = "is_blank")]
    pub reply_to: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub durable: bool,

    #[serde(default = "default_priority", skip_serializing_if = "is_default_priority")]
    pub priority: u8,

    /// Time to live in seconds, 0 means unlimited
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ttl: f64,

    /// Application properties, in insertion order
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,

    #[serde(default, skip_serializing_if = "is_blank")]
    pub subject: Option<String>,

    /// An empty body is kept; only a missing one is omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

fn is_default_priority(value: &u8) -> bool {
    *value == DEFAULT_PRIORITY
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &f64) -> bool {
    *value == 0.0
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, str::is_empty)
}

impl Default for Message {
    fn default() -> Self {
        Self {
            id: None,
            correlation_id: None,
            user_id: None,
            address: None,
            reply_to: None,
            durable: false,
            priority: DEFAULT_PRIORITY,
            ttl: 0.0,
            properties: Map::new(),
            subject: None,
            body: None,
        }
    }
}

impl Message {
    /// Create a new message with the given body
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<MessageId>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_ttl(mut self, ttl: f64) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Add an application property
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Build a message from one input line.
    ///
    /// Lines that look like a JSON object are decoded as message records;
    /// anything else becomes the body of a plain text message.
    pub fn from_line(line: &str) -> Result<Self> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.starts_with('{') && line.ends_with('}') {
            Self::from_record(line)
        } else {
            Ok(Self::new(line))
        }
    }

    /// Decode a JSON message record
    pub fn from_record(record: &str) -> Result<Self> {
        let message: Message = serde_json::from_str(record)?;

        for (name, value) in &message.properties {
            if value.is_array() || value.is_object() {
                return Err(Error::InvalidMessage(format!(
                    "property '{}' is not a scalar value",
                    name
                )));
            }
        }

        Ok(message)
    }

    /// Encode as a JSON message record, omitting empty and default fields
    pub fn to_record(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The body text, or an empty string
    pub fn body_str(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }

    /// Short description for log lines
    pub fn summary(&self) -> String {
        let desc = match (&self.body, &self.id) {
            (Some(body), _) => body.clone(),
            (None, Some(id)) => id.to_string(),
            (None, None) => return "message".to_string(),
        };

        if desc.chars().count() > 16 {
            let head: String = desc.chars().take(12).collect();
            format!("message '{}...'", head)
        } else {
            format!("message '{}'", desc)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_line() {
        let msg = Message::from_line("hello world\n").unwrap();
        assert_eq!(msg.body.as_deref(), Some("hello world"));
        assert_eq!(msg.priority, DEFAULT_PRIORITY);
        assert!(msg.id.is_none());
    }

    #[test]
    fn test_record_line() {
        let line = r#"{"id": 7, "to": "jobs", "body": "abc", "properties": {"z": 1, "a": "b"}}"#;
        let msg = Message::from_line(line).unwrap();

        assert_eq!(msg.id, Some(MessageId::Int(7)));
        assert_eq!(msg.address.as_deref(), Some("jobs"));
        assert_eq!(msg.body_str(), "abc");

        let keys: Vec<&str> = msg.properties.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn test_record_rejects_nested_property() {
        let line = r#"{"body": "x", "properties": {"list": [1, 2]}}"#;
        assert!(matches!(
            Message::from_line(line),
            Err(Error::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_broken_record_is_an_error() {
        assert!(Message::from_line("{not json}").is_err());
    }

    #[test]
    fn test_record_omits_defaults() {
        let msg = Message::new("abc")
            .with_id("m1")
            .with_reply_to("")
            .with_property("color", "red");

        assert_eq!(
            msg.to_record().unwrap(),
            r#"{"id":"m1","properties":{"color":"red"},"body":"abc"}"#
        );

        let msg = msg.with_durable(true).with_priority(9).with_ttl(1.5);
        let record = msg.to_record().unwrap();
        assert!(record.contains(r#""durable":true"#));
        assert!(record.contains(r#""priority":9"#));
        assert!(record.contains(r#""ttl":1.5"#));
    }

    #[test]
    fn test_empty_body_survives_encoding() {
        let record = Message::new("").to_record().unwrap();
        assert_eq!(record, r#"{"body":""}"#);
        assert_eq!(Message::from_record(&record).unwrap().body.as_deref(), Some(""));

        assert_eq!(Message::default().to_record().unwrap(), "{}");
    }

    #[test]
    fn test_summary() {
        assert_eq!(Message::new("abc123").summary(), "message 'abc123'");
        assert_eq!(
            Message::new("abcdefghijklmnopq").summary(),
            "message 'abcdefghijkl...'"
        );
        assert_eq!(Message::default().with_id(3u64).summary(), "message '3'");
        assert_eq!(Message::default().summary(), "message");
    }

    #[test]
    fn test_unique_id() {
        assert_eq!(unique_id(2).len(), 4);
        assert_ne!(unique_id(8), unique_id(8));
    }
}
