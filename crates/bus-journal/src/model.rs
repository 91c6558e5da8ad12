use bus_common::Message;
use chrono::{DateTime, Utc};

/// The three ways a message is observed crossing the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Sent,
    Received,
    Published,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Sent => "Sent",
            Category::Received => "Received",
            Category::Published => "Published",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Sent" => Some(Category::Sent),
            "Received" => Some(Category::Received),
            "Published" => Some(Category::Published),
            _ => None,
        }
    }
}

/// A single append-only journal record. `position` is an opaque, comparable
/// cursor whose shape is a backend's own business — callers must treat it
/// as an opaque token, never parse it.
#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub position: String,
    pub timestamp: DateTime<Utc>,
    pub category: Category,
    pub topic: Option<String>,
    pub message: Message,
}

/// Read-side filter: category set, topic, and time range are all optional
/// and compose with AND semantics.
#[derive(Debug, Clone, Default)]
pub struct JournalFilter {
    pub categories: Option<Vec<Category>>,
    pub topic: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl JournalFilter {
    pub fn matches(&self, entry: &JournalEntry) -> bool {
        if let Some(categories) = &self.categories {
            if !categories.contains(&entry.category) {
                return false;
            }
        }
        if let Some(topic) = &self.topic {
            if entry.topic.as_deref() != Some(topic.as_str()) {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.timestamp > to {
                return false;
            }
        }
        true
    }
}
