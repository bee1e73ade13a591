use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::config::NotificationConfig;
use crate::marketplace::clock::ManualClock;
use crate::marketplace::dispatcher::{DeliveryChannel, DeliveryError};
use crate::marketplace::domain::{Actor, BidId, BookingId, NewBooking, Notification, NotificationId};
use crate::marketplace::engine::{Marketplace, Stores};
use crate::marketplace::memory::{
    InMemoryLifecycleRepository, InMemoryNotificationRepository, InMemoryStatsRepository,
};

pub(super) const CUSTOMER: &str = "cust-ada";
pub(super) const ADMIN: &str = "admin-1";
pub(super) const TECHNICIANS: [&str; 3] = ["tech-bo", "tech-cy", "tech-di"];

pub(super) fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn notification_config() -> NotificationConfig {
    NotificationConfig {
        admin_ids: vec![ADMIN.to_string()],
        delivery_timeout: Duration::from_millis(200),
        ..NotificationConfig::default()
    }
}

/// Delivery channel that remembers every hand-off.
#[derive(Debug, Default)]
pub(super) struct RecordingDelivery {
    delivered: Mutex<Vec<(String, NotificationId)>>,
}

impl RecordingDelivery {
    pub(super) fn delivered(&self) -> Vec<(String, NotificationId)> {
        self.delivered.lock().expect("delivery mutex poisoned").clone()
    }
}

#[async_trait]
impl DeliveryChannel for RecordingDelivery {
    async fn deliver(
        &self,
        recipient_id: &str,
        notification: &Notification,
    ) -> Result<(), DeliveryError> {
        self.delivered
            .lock()
            .expect("delivery mutex poisoned")
            .push((recipient_id.to_string(), notification.id.clone()));
        Ok(())
    }
}

pub(super) struct FailingDelivery;

#[async_trait]
impl DeliveryChannel for FailingDelivery {
    async fn deliver(&self, _: &str, _: &Notification) -> Result<(), DeliveryError> {
        Err(DeliveryError::Unavailable("push gateway down".to_string()))
    }
}

pub(super) struct Harness {
    pub marketplace: Arc<Marketplace>,
    pub clock: Arc<ManualClock>,
    pub delivery: Arc<RecordingDelivery>,
    pub notifications: Arc<InMemoryNotificationRepository>,
}

pub(super) fn harness() -> Harness {
    harness_with(notification_config())
}

pub(super) fn harness_with(config: NotificationConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(start_time()));
    let delivery = Arc::new(RecordingDelivery::default());
    let notifications = Arc::new(InMemoryNotificationRepository::default());
    let stores = Stores {
        lifecycle: Arc::new(InMemoryLifecycleRepository::default()),
        notifications: notifications.clone(),
        stats: Arc::new(InMemoryStatsRepository::default()),
    };
    let marketplace = Arc::new(Marketplace::new(
        stores,
        delivery.clone(),
        clock.clone(),
        config,
    ));

    Harness {
        marketplace,
        clock,
        delivery,
        notifications,
    }
}

pub(super) fn new_booking() -> NewBooking {
    NewBooking {
        service_id: "svc-boiler-repair".to_string(),
        scheduled_at: start_time() + chrono::Duration::days(2),
        amount_cents: 12_500,
    }
}

impl Harness {
    pub(super) fn customer(&self) -> Actor {
        Actor::customer(CUSTOMER)
    }

    /// A booking open for bids, with its creation event already published.
    pub(super) fn open_booking(&self) -> BookingId {
        let lifecycle = self.marketplace.lifecycle();
        let created = lifecycle
            .create_booking(&self.customer(), new_booking())
            .expect("booking created");
        self.marketplace.pipeline().publish(&created.events);
        lifecycle
            .open_bidding(&self.customer(), &created.booking.id)
            .expect("bidding opened");
        created.booking.id
    }

    /// One bid per technician, in `TECHNICIANS` order.
    pub(super) fn bid_all(&self, booking_id: &BookingId) -> Vec<BidId> {
        TECHNICIANS
            .iter()
            .zip([11_000_u64, 12_000, 13_000])
            .map(|(technician, price)| {
                let outcome = self
                    .marketplace
                    .lifecycle()
                    .submit_bid(&Actor::technician(*technician), booking_id, price)
                    .expect("bid submitted");
                self.marketplace.pipeline().publish(&outcome.events);
                outcome.bids[0].id.clone()
            })
            .collect()
    }

    /// Accepts the first bid and starts and completes the work as its technician.
    pub(super) fn completed_booking(&self) -> BookingId {
        let booking_id = self.open_booking();
        let bids = self.bid_all(&booking_id);
        let lifecycle = self.marketplace.lifecycle();
        let accepted = lifecycle
            .accept_bid(&self.customer(), &bids[0])
            .expect("bid accepted");
        self.marketplace.pipeline().publish(&accepted.events);

        let technician = Actor::technician(TECHNICIANS[0]);
        lifecycle
            .start_booking(&technician, &booking_id)
            .expect("work started");
        let completed = lifecycle
            .complete_booking(&technician, &booking_id)
            .expect("work completed");
        self.marketplace.pipeline().publish(&completed.events);
        booking_id
    }

    pub(super) fn inbox(&self, recipient_id: &str) -> Vec<Notification> {
        self.marketplace
            .notifications()
            .list(recipient_id, &Default::default())
            .expect("inbox readable")
    }
}
