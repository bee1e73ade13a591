use std::collections::{BTreeMap, HashMap};

use super::domain::Priority;

/// How the dispatcher finds the recipients of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientRule {
    BookingCustomer,
    BookingTechnician,
    /// Every technician holding a non-withdrawn bid on the booking.
    AllBiddingTechnicians,
    /// The technician who placed the bid named by the event.
    BiddingTechnician,
    ReviewedTechnician,
    AdminGroup,
    /// `recipient_id` / `recipient_role` taken from the payload.
    AddressedRecipient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSpec {
    pub kind: &'static str,
    pub required_fields: &'static [&'static str],
    pub default_priority: Priority,
    pub recipient_rule: RecipientRule,
    pub title: &'static str,
    pub message: &'static str,
}

impl EventSpec {
    pub fn validate(&self, payload: &BTreeMap<String, String>) -> Result<(), CatalogError> {
        match self
            .required_fields
            .iter()
            .find(|field| payload.get(**field).map_or(true, |value| value.is_empty()))
        {
            Some(field) => Err(CatalogError::InvalidPayload {
                kind: self.kind.to_string(),
                field: (*field).to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Fill `{field}` placeholders in the title and message templates.
    pub fn render(&self, payload: &BTreeMap<String, String>) -> (String, String) {
        (
            fill_template(self.title, payload),
            fill_template(self.message, payload),
        )
    }
}

/// Single pass over the template: substituted values are never rescanned, and
/// placeholders without a payload entry stay as written.
fn fill_template(template: &str, payload: &BTreeMap<String, String>) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let tail = &rest[open..];
        let Some(close) = tail[1..].find('}') else {
            rendered.push_str(tail);
            return rendered;
        };
        let placeholder = &tail[..close + 2];
        match payload.get(&tail[1..=close]) {
            Some(value) => rendered.push_str(value),
            None => rendered.push_str(placeholder),
        }
        rest = &tail[close + 2..];
    }

    rendered.push_str(rest);
    rendered
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("unknown event kind '{0}'")]
    UnknownEventKind(String),
    #[error("event '{kind}' is missing required payload field '{field}'")]
    InvalidPayload { kind: String, field: String },
}

/// Read-only registry of every event kind the engine can dispatch.
#[derive(Debug, Clone)]
pub struct EventCatalog {
    specs: HashMap<&'static str, EventSpec>,
}

impl Default for EventCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl EventCatalog {
    pub fn standard() -> Self {
        Self::from_specs(standard_event_specs())
    }

    pub fn from_specs(specs: Vec<EventSpec>) -> Self {
        Self {
            specs: specs.into_iter().map(|spec| (spec.kind, spec)).collect(),
        }
    }

    pub fn lookup(&self, kind: &str) -> Result<&EventSpec, CatalogError> {
        self.specs
            .get(kind)
            .ok_or_else(|| CatalogError::UnknownEventKind(kind.to_string()))
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.specs.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}

fn standard_event_specs() -> Vec<EventSpec> {
    vec![
        EventSpec {
            kind: "booking_created",
            required_fields: &["booking_id", "service_id", "scheduled_at"],
            default_priority: Priority::Medium,
            recipient_rule: RecipientRule::BookingCustomer,
            title: "Booking created",
            message: "Your booking for {service_id} on {scheduled_at} has been created.",
        },
        EventSpec {
            kind: "booking_confirmed",
            required_fields: &["booking_id", "technician_id", "scheduled_at"],
            default_priority: Priority::High,
            recipient_rule: RecipientRule::BookingCustomer,
            title: "Booking confirmed",
            message: "Technician {technician_id} will arrive on {scheduled_at}.",
        },
        EventSpec {
            kind: "booking_cancelled",
            required_fields: &["booking_id", "cancelled_by"],
            default_priority: Priority::High,
            recipient_rule: RecipientRule::AllBiddingTechnicians,
            title: "Booking cancelled",
            message: "Booking {booking_id} was cancelled by the {cancelled_by}.",
        },
        EventSpec {
            kind: "booking_rescheduled",
            required_fields: &["booking_id", "scheduled_at", "previous_scheduled_at"],
            default_priority: Priority::High,
            recipient_rule: RecipientRule::BookingTechnician,
            title: "Booking rescheduled",
            message: "Booking {booking_id} moved from {previous_scheduled_at} to {scheduled_at}.",
        },
        EventSpec {
            kind: "booking_completed",
            required_fields: &["booking_id", "customer_id", "amount_cents", "amount"],
            default_priority: Priority::Medium,
            recipient_rule: RecipientRule::BookingCustomer,
            title: "Service completed",
            message: "Booking {booking_id} is complete. Total due: {amount}.",
        },
        EventSpec {
            kind: "bid_submitted",
            required_fields: &["booking_id", "bid_id", "technician_id", "price"],
            default_priority: Priority::Medium,
            recipient_rule: RecipientRule::BookingCustomer,
            title: "New bid received",
            message: "Technician {technician_id} bid {price} on booking {booking_id}.",
        },
        EventSpec {
            kind: "bid_accepted",
            required_fields: &["booking_id", "bid_id", "scheduled_at"],
            default_priority: Priority::High,
            recipient_rule: RecipientRule::BiddingTechnician,
            title: "Bid accepted",
            message: "Your bid {bid_id} was accepted. The job is scheduled for {scheduled_at}.",
        },
        EventSpec {
            kind: "bid_rejected",
            required_fields: &["booking_id", "bid_id"],
            default_priority: Priority::Low,
            recipient_rule: RecipientRule::BiddingTechnician,
            title: "Bid not selected",
            message: "Another technician was selected for booking {booking_id}.",
        },
        EventSpec {
            kind: "payment_received",
            required_fields: &["booking_id", "amount", "reference"],
            default_priority: Priority::High,
            recipient_rule: RecipientRule::BookingTechnician,
            title: "Payment received",
            message: "Payment {reference} of {amount} was received for booking {booking_id}.",
        },
        EventSpec {
            kind: "payment_pending",
            required_fields: &["booking_id", "amount", "reference"],
            default_priority: Priority::Urgent,
            recipient_rule: RecipientRule::BookingCustomer,
            title: "Payment pending",
            message: "Payment {reference} of {amount} for booking {booking_id} is awaiting completion.",
        },
        EventSpec {
            kind: "review_submitted",
            required_fields: &["review_id", "booking_id", "rating"],
            default_priority: Priority::Low,
            recipient_rule: RecipientRule::AdminGroup,
            title: "Review awaiting moderation",
            message: "Review {review_id} ({rating}/5) for booking {booking_id} needs moderation.",
        },
        EventSpec {
            kind: "review_received",
            required_fields: &["review_id", "booking_id", "rating"],
            default_priority: Priority::Medium,
            recipient_rule: RecipientRule::ReviewedTechnician,
            title: "New review",
            message: "You received a {rating}/5 review for booking {booking_id}.",
        },
        EventSpec {
            kind: "message_received",
            required_fields: &["recipient_id", "recipient_role", "sender_id", "preview"],
            default_priority: Priority::Medium,
            recipient_rule: RecipientRule::AddressedRecipient,
            title: "New message",
            message: "{sender_id}: {preview}",
        },
        EventSpec {
            kind: "system_announcement",
            required_fields: &["headline", "body"],
            default_priority: Priority::Low,
            recipient_rule: RecipientRule::AdminGroup,
            title: "{headline}",
            message: "{body}",
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_catalog_covers_every_lifecycle_kind() {
        let catalog = EventCatalog::standard();
        for kind in [
            "booking_created",
            "booking_confirmed",
            "booking_cancelled",
            "booking_rescheduled",
            "booking_completed",
            "bid_submitted",
            "bid_accepted",
            "bid_rejected",
            "payment_received",
            "payment_pending",
            "review_submitted",
            "review_received",
            "message_received",
            "system_announcement",
        ] {
            assert!(catalog.lookup(kind).is_ok(), "missing {kind}");
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let catalog = EventCatalog::standard();
        assert_eq!(
            catalog.lookup("booking_teleported"),
            Err(CatalogError::UnknownEventKind("booking_teleported".to_string()))
        );
    }

    #[test]
    fn validate_reports_first_missing_field() {
        let catalog = EventCatalog::standard();
        let spec = catalog.lookup("bid_rejected").expect("known kind");
        let mut payload = BTreeMap::new();
        payload.insert("booking_id".to_string(), "bk-000001".to_string());

        assert_eq!(
            spec.validate(&payload),
            Err(CatalogError::InvalidPayload {
                kind: "bid_rejected".to_string(),
                field: "bid_id".to_string(),
            })
        );

        payload.insert("bid_id".to_string(), "bid-000002".to_string());
        assert!(spec.validate(&payload).is_ok());
    }

    #[test]
    fn render_fills_placeholders() {
        let catalog = EventCatalog::standard();
        let spec = catalog.lookup("system_announcement").expect("known kind");
        let mut payload = BTreeMap::new();
        payload.insert("headline".to_string(), "Maintenance".to_string());
        payload.insert("body".to_string(), "Back at 02:00 UTC".to_string());

        let (title, message) = spec.render(&payload);
        assert_eq!(title, "Maintenance");
        assert_eq!(message, "Back at 02:00 UTC");
    }

    #[test]
    fn substituted_values_are_not_rendered_again() {
        let catalog = EventCatalog::standard();
        let spec = catalog.lookup("message_received").expect("known kind");
        let mut payload = BTreeMap::new();
        payload.insert("recipient_id".to_string(), "cust-ada".to_string());
        payload.insert("recipient_role".to_string(), "customer".to_string());
        payload.insert("sender_id".to_string(), "tech-bo".to_string());
        payload.insert(
            "preview".to_string(),
            "see {sender_id} and {recipient_id}".to_string(),
        );

        let (_, message) = spec.render(&payload);
        assert_eq!(message, "tech-bo: see {sender_id} and {recipient_id}");
    }

    #[test]
    fn placeholders_without_values_stay_literal() {
        let mut payload = BTreeMap::new();
        payload.insert("amount".to_string(), "12.00".to_string());

        assert_eq!(
            fill_template("Paid {amount} for {booking_id} {unterminated", &payload),
            "Paid 12.00 for {booking_id} {unterminated"
        );
    }

    #[test]
    fn custom_specs_extend_the_catalog() {
        let mut specs = standard_event_specs();
        specs.push(EventSpec {
            kind: "technician_verified",
            required_fields: &["technician_id"],
            default_priority: Priority::Low,
            recipient_rule: RecipientRule::AdminGroup,
            title: "Technician verified",
            message: "{technician_id} passed verification.",
        });
        let catalog = EventCatalog::from_specs(specs);
        assert!(catalog.kinds().contains(&"technician_verified"));
    }
}
