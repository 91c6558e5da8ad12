use chrono::{DateTime, Utc};

/// A `(topic, subscriberEndpoint)` association, unique on that pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub subscriber: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp < now)
    }
}
