//! The canonical message envelope (C1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::headers::{well_known, Headers, Importance};

/// A 128-bit globally unique message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        MessageId(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MessageId {
    fn from(value: Uuid) -> Self {
        MessageId(value)
    }
}

/// Canonical message envelope: identifier, case-insensitive headers with
/// typed views, and an opaque payload whose interpretation is the
/// application's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub headers: Headers,
    pub content: Vec<u8>,
}

impl Message {
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        let id = MessageId::new();
        let mut headers = Headers::new();
        headers.set(well_known::MESSAGE_ID, id.to_string());
        Message {
            id,
            headers,
            content: content.into(),
        }
    }

    pub fn with_headers(content: impl Into<Vec<u8>>, mut headers: Headers) -> Self {
        let id = MessageId::new();
        headers.set(well_known::MESSAGE_ID, id.to_string());
        Message {
            id,
            headers,
            content: content.into(),
        }
    }

    pub fn message_name(&self) -> Option<&str> {
        self.headers.message_name()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.content_type()
    }

    pub fn origination(&self) -> Option<&str> {
        self.headers.origination()
    }

    pub fn destination(&self) -> Option<&str> {
        self.headers.destination()
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.headers.reply_to()
    }

    pub fn related_to(&self) -> Option<&str> {
        self.headers.related_to()
    }

    pub fn topic(&self) -> Option<&str> {
        self.headers.topic()
    }

    pub fn importance(&self) -> Importance {
        self.headers.importance()
    }

    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.headers.expires()
    }

    pub fn sent(&self) -> Option<DateTime<Utc>> {
        self.headers.sent()
    }

    pub fn security_token(&self) -> Option<&str> {
        self.headers.security_token()
    }

    /// A message whose `Expires` header is in the past must not be
    /// dispatched; the engine acknowledges it silently on pickup.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires().is_some_and(|exp| exp < now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn message_with_past_expiry_is_expired() {
        let mut headers = Headers::new();
        headers.set_expires(Utc::now() - Duration::seconds(5));
        let message = Message::with_headers(b"hello".to_vec(), headers);
        assert!(message.is_expired(Utc::now()));
    }

    #[test]
    fn message_without_expiry_never_expires() {
        let message = Message::new(b"hello".to_vec());
        assert!(!message.is_expired(Utc::now()));
    }

    #[test]
    fn message_headers_carry_its_own_id() {
        let message = Message::new(b"hello".to_vec());
        assert_eq!(message.headers.message_id(), Some(message.id.to_string().as_str()));
    }
}
