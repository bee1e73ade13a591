use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{BidId, BookingId, Priority, ReviewId};

/// A domain occurrence emitted by a lifecycle transition.
///
/// `event_id` is the dispatch idempotence key: redelivering an event with the same id
/// never creates a second set of notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub event_id: String,
    pub kind: String,
    pub booking_id: Option<BookingId>,
    pub bid_id: Option<BidId>,
    pub review_id: Option<ReviewId>,
    pub payload: BTreeMap<String, String>,
    pub priority: Option<Priority>,
    pub occurred_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(
        kind: impl Into<String>,
        event_id: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            kind: kind.into(),
            booking_id: None,
            bid_id: None,
            review_id: None,
            payload: BTreeMap::new(),
            priority: None,
            occurred_at,
        }
    }

    pub fn booking(mut self, id: &BookingId) -> Self {
        self.booking_id = Some(id.clone());
        self.payload
            .insert("booking_id".to_string(), id.as_str().to_string());
        self
    }

    pub fn bid(mut self, id: &BidId) -> Self {
        self.bid_id = Some(id.clone());
        self.payload
            .insert("bid_id".to_string(), id.as_str().to_string());
        self
    }

    pub fn review(mut self, id: &ReviewId) -> Self {
        self.review_id = Some(id.clone());
        self.payload
            .insert("review_id".to_string(), id.as_str().to_string());
        self
    }

    pub fn field(mut self, key: &str, value: impl ToString) -> Self {
        self.payload.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Renders minor currency units as a plain decimal amount for message templates.
pub(crate) fn format_amount(cents: u64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}
