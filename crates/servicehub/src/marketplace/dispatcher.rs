use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, info, warn};

use super::catalog::{CatalogError, EventCatalog, EventSpec, RecipientRule};
use super::clock::Clock;
use super::domain::{
    BidId, BidStatus, Booking, BookingId, Notification, NotificationId, ReviewId, Role,
};
use super::events::LifecycleEvent;
use super::repository::{
    BatchOutcome, LifecycleRepository, NotificationRepository, RepositoryError,
};
use crate::config::NotificationConfig;

const DELIVERY_FAILURES_METRIC: &str = "notification_delivery_failures_total";

/// Outbound channel (push, e-mail, websocket fan-out) that receives a copy of each
/// persisted notification. Best effort: the stored row is the source of truth.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn deliver(
        &self,
        recipient_id: &str,
        notification: &Notification,
    ) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("event '{kind}' does not reference a {reference}")]
    MissingReference {
        kind: String,
        reference: &'static str,
    },
    #[error("{entity} '{id}' referenced by the event no longer exists")]
    NotFound { entity: &'static str, id: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Turns lifecycle events into persisted, addressed notifications.
pub struct Dispatcher {
    catalog: Arc<EventCatalog>,
    notifications: Arc<dyn NotificationRepository>,
    lifecycle: Arc<dyn LifecycleRepository>,
    delivery: Arc<dyn DeliveryChannel>,
    clock: Arc<dyn Clock>,
    config: NotificationConfig,
    sequence: AtomicU64,
    delivery_failures: Arc<AtomicU64>,
}

impl Dispatcher {
    pub fn new(
        catalog: Arc<EventCatalog>,
        notifications: Arc<dyn NotificationRepository>,
        lifecycle: Arc<dyn LifecycleRepository>,
        delivery: Arc<dyn DeliveryChannel>,
        clock: Arc<dyn Clock>,
        config: NotificationConfig,
    ) -> Self {
        Self {
            catalog,
            notifications,
            lifecycle,
            delivery,
            clock,
            config,
            sequence: AtomicU64::new(1),
            delivery_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Deliveries that failed or timed out since start-up.
    pub fn delivery_failures(&self) -> u64 {
        self.delivery_failures.load(Ordering::Relaxed)
    }

    /// Persist one notification per resolved recipient and hand each to the delivery
    /// channel. Repeating an `event_id` returns the batch recorded the first time.
    pub fn dispatch(&self, event: &LifecycleEvent) -> Result<Vec<Notification>, DispatchError> {
        if let Some(existing) = self.notifications.dispatched(&event.event_id)? {
            debug!(event_id = %event.event_id, "event already dispatched");
            return Ok(existing);
        }

        let spec = self.catalog.lookup(&event.kind)?;
        spec.validate(&event.payload)?;
        let recipients = self.resolve_recipients(spec, event)?;

        let now = self.clock.now();
        let expires_at = self.config.retention_for(spec.kind).and_then(|window| {
            let expires_at = now.checked_add_signed(window);
            if expires_at.is_none() {
                warn!(
                    kind = spec.kind,
                    retention_days = window.num_days(),
                    "retention window out of range; notification will not expire"
                );
            }
            expires_at
        });
        let priority = event.priority.unwrap_or(spec.default_priority);
        let (title, message) = spec.render(&event.payload);

        let batch = recipients
            .into_iter()
            .map(|(recipient_id, recipient_role)| Notification {
                id: self.next_id(),
                recipient_id,
                recipient_role,
                kind: spec.kind.to_string(),
                title: title.clone(),
                message: message.clone(),
                related_booking_id: event.booking_id.clone(),
                related_bid_id: event.bid_id.clone(),
                data: event.payload.clone(),
                is_read: false,
                read_at: None,
                priority,
                created_at: now,
                expires_at,
            })
            .collect();

        match self.notifications.record_batch(&event.event_id, batch)? {
            BatchOutcome::AlreadyRecorded(existing) => {
                debug!(event_id = %event.event_id, "lost dispatch race; returning recorded batch");
                Ok(existing)
            }
            BatchOutcome::Recorded(created) => {
                info!(
                    event_id = %event.event_id,
                    kind = spec.kind,
                    recipients = created.len(),
                    priority = priority.label(),
                    "event dispatched"
                );
                self.hand_off(&created);
                Ok(created)
            }
        }
    }

    fn resolve_recipients(
        &self,
        spec: &EventSpec,
        event: &LifecycleEvent,
    ) -> Result<Vec<(String, Role)>, DispatchError> {
        let (ids, role): (Vec<String>, Role) = match spec.recipient_rule {
            RecipientRule::BookingCustomer => {
                let booking = self.booking(event)?;
                (vec![booking.customer_id], Role::Customer)
            }
            RecipientRule::BookingTechnician => {
                let booking = self.booking(event)?;
                (booking.technician_id.into_iter().collect(), Role::Technician)
            }
            RecipientRule::AllBiddingTechnicians => {
                let booking_id = booking_ref(event)?;
                let technicians: BTreeSet<String> = self
                    .lifecycle
                    .bids_for_booking(booking_id)?
                    .into_iter()
                    .filter(|bid| bid.status != BidStatus::Withdrawn)
                    .map(|bid| bid.technician_id)
                    .collect();
                (technicians.into_iter().collect(), Role::Technician)
            }
            RecipientRule::BiddingTechnician => {
                let bid_id = bid_ref(event)?;
                let bid = self
                    .lifecycle
                    .fetch_bid(bid_id)?
                    .ok_or_else(|| missing("bid", bid_id))?;
                (vec![bid.technician_id], Role::Technician)
            }
            RecipientRule::ReviewedTechnician => {
                let review_id = review_ref(event)?;
                let review = self
                    .lifecycle
                    .fetch_review(review_id)?
                    .ok_or_else(|| missing("review", review_id))?;
                (vec![review.technician_id], Role::Technician)
            }
            RecipientRule::AdminGroup => {
                let admins: BTreeSet<String> = self.config.admin_ids.iter().cloned().collect();
                if admins.is_empty() {
                    warn!(kind = spec.kind, "no admin recipients configured");
                }
                (admins.into_iter().collect(), Role::Admin)
            }
            RecipientRule::AddressedRecipient => return Ok(vec![addressed(spec, event)?]),
        };

        Ok(ids.into_iter().map(|id| (id, role)).collect())
    }

    fn booking(&self, event: &LifecycleEvent) -> Result<Booking, DispatchError> {
        let booking_id = booking_ref(event)?;
        self.lifecycle
            .fetch_booking(booking_id)?
            .ok_or_else(|| missing("booking", booking_id))
    }

    fn hand_off(&self, created: &[Notification]) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                count = created.len(),
                "no async runtime available; skipping delivery hand-off"
            );
            record_failure(&self.delivery_failures, "no_runtime", created.len() as u64);
            return;
        };

        for notification in created {
            let channel = Arc::clone(&self.delivery);
            let failures = Arc::clone(&self.delivery_failures);
            let timeout = self.config.delivery_timeout;
            let notification = notification.clone();

            runtime.spawn(async move {
                let attempt = channel.deliver(&notification.recipient_id, &notification);
                match tokio::time::timeout(timeout, attempt).await {
                    Ok(Ok(())) => {
                        debug!(notification_id = %notification.id, "notification delivered");
                    }
                    Ok(Err(err)) => {
                        record_failure(&failures, "error", 1);
                        warn!(notification_id = %notification.id, error = %err, "delivery failed");
                    }
                    Err(_) => {
                        record_failure(&failures, "timeout", 1);
                        warn!(
                            notification_id = %notification.id,
                            timeout_ms = timeout.as_millis() as u64,
                            "delivery timed out"
                        );
                    }
                }
            });
        }
    }

    fn next_id(&self) -> NotificationId {
        NotificationId::from_sequence(self.sequence.fetch_add(1, Ordering::Relaxed))
    }
}

fn record_failure(failures: &AtomicU64, reason: &'static str, count: u64) {
    failures.fetch_add(count, Ordering::Relaxed);
    counter!(DELIVERY_FAILURES_METRIC, "reason" => reason).increment(count);
}

fn booking_ref(event: &LifecycleEvent) -> Result<&BookingId, DispatchError> {
    event
        .booking_id
        .as_ref()
        .ok_or_else(|| missing_reference(event, "booking"))
}

fn bid_ref(event: &LifecycleEvent) -> Result<&BidId, DispatchError> {
    event
        .bid_id
        .as_ref()
        .ok_or_else(|| missing_reference(event, "bid"))
}

fn review_ref(event: &LifecycleEvent) -> Result<&ReviewId, DispatchError> {
    event
        .review_id
        .as_ref()
        .ok_or_else(|| missing_reference(event, "review"))
}

fn addressed(spec: &EventSpec, event: &LifecycleEvent) -> Result<(String, Role), DispatchError> {
    let invalid = |field: &str| CatalogError::InvalidPayload {
        kind: spec.kind.to_string(),
        field: field.to_string(),
    };
    let recipient_id = event
        .payload
        .get("recipient_id")
        .cloned()
        .ok_or_else(|| invalid("recipient_id"))?;
    let role = event
        .payload
        .get("recipient_role")
        .and_then(|raw| Role::parse(raw))
        .ok_or_else(|| invalid("recipient_role"))?;
    Ok((recipient_id, role))
}

fn missing_reference(event: &LifecycleEvent, reference: &'static str) -> DispatchError {
    DispatchError::MissingReference {
        kind: event.kind.clone(),
        reference,
    }
}

fn missing(entity: &'static str, id: impl ToString) -> DispatchError {
    DispatchError::NotFound {
        entity,
        id: id.to_string(),
    }
}
