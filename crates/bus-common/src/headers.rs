//! Ordered, case-insensitive header multimap and the well-known typed views
//! carried by every message envelope.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A header name that compares and hashes case-insensitively but preserves
/// the casing it was constructed with for display and serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderName(String);

impl HeaderName {
    pub fn new(name: impl Into<String>) -> Self {
        HeaderName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for HeaderName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for HeaderName {}

impl Hash for HeaderName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            b.to_ascii_lowercase().hash(state);
        }
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for HeaderName {
    fn from(value: &str) -> Self {
        HeaderName::new(value)
    }
}

impl From<String> for HeaderName {
    fn from(value: String) -> Self {
        HeaderName::new(value)
    }
}

/// Dispatch priority carried on a message; serialized as its header string
/// form (`Low`, `Normal`, `High`, `Critical`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Importance {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Importance::Low => "Low",
            Importance::Normal => "Normal",
            Importance::High => "High",
            Importance::Critical => "Critical",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Importance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(Importance::Low),
            "Normal" => Ok(Importance::Normal),
            "High" => Ok(Importance::High),
            "Critical" => Ok(Importance::Critical),
            other => Err(format!("unknown importance: {other}")),
        }
    }
}

pub mod well_known {
    pub const MESSAGE_ID: &str = "MessageId";
    pub const MESSAGE_NAME: &str = "MessageName";
    pub const CONTENT_TYPE: &str = "ContentType";
    pub const ORIGINATION: &str = "Origination";
    pub const DESTINATION: &str = "Destination";
    pub const REPLY_TO: &str = "ReplyTo";
    pub const RELATED_TO: &str = "RelatedTo";
    pub const TOPIC: &str = "Topic";
    pub const IMPORTANCE: &str = "Importance";
    pub const EXPIRES: &str = "Expires";
    pub const SENT: &str = "Sent";
    pub const SECURITY_TOKEN: &str = "SecurityToken";
}

/// Ordered mapping from case-insensitive header name to string value, with
/// typed accessors for the well-known envelope headers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Headers(IndexMap<HeaderName, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&HeaderName::new(name)).map(String::as_str)
    }

    /// Sets the header, overwriting any existing value with the same
    /// case-insensitive name.
    pub fn set(&mut self, name: impl Into<HeaderName>, value: impl Into<String>) -> &mut Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.shift_remove(&HeaderName::new(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &str)> {
        self.0.iter().map(|(k, v)| (k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn message_id(&self) -> Option<&str> {
        self.get(well_known::MESSAGE_ID)
    }

    pub fn message_name(&self) -> Option<&str> {
        self.get(well_known::MESSAGE_NAME)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get(well_known::CONTENT_TYPE)
    }

    pub fn origination(&self) -> Option<&str> {
        self.get(well_known::ORIGINATION)
    }

    pub fn destination(&self) -> Option<&str> {
        self.get(well_known::DESTINATION)
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.get(well_known::REPLY_TO)
    }

    pub fn related_to(&self) -> Option<&str> {
        self.get(well_known::RELATED_TO)
    }

    pub fn topic(&self) -> Option<&str> {
        self.get(well_known::TOPIC)
    }

    pub fn importance(&self) -> Importance {
        self.get(well_known::IMPORTANCE)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    pub fn set_importance(&mut self, importance: Importance) -> &mut Self {
        self.set(well_known::IMPORTANCE, importance.to_string())
    }

    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.get(well_known::EXPIRES)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn set_expires(&mut self, expires: DateTime<Utc>) -> &mut Self {
        self.set(well_known::EXPIRES, expires.to_rfc3339())
    }

    pub fn sent(&self) -> Option<DateTime<Utc>> {
        self.get(well_known::SENT)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn set_sent(&mut self, sent: DateTime<Utc>) -> &mut Self {
        self.set(well_known::SENT, sent.to_rfc3339())
    }

    pub fn security_token(&self) -> Option<&str> {
        self.get(well_known::SECURITY_TOKEN)
    }

    pub fn set_security_token(&mut self, token: impl Into<String>) -> &mut Self {
        self.set(well_known::SECURITY_TOKEN, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_names_are_case_insensitive() {
        let mut headers = Headers::new();
        headers.set("Content-Type", "application/json");
        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
    }

    #[test]
    fn importance_round_trips_through_its_header_string() {
        let mut headers = Headers::new();
        headers.set_importance(Importance::Critical);
        assert_eq!(headers.importance(), Importance::Critical);
    }

    #[test]
    fn importance_defaults_to_normal_when_absent() {
        let headers = Headers::new();
        assert_eq!(headers.importance(), Importance::Normal);
    }
}
