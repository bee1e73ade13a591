use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use servicehub::config::NotificationConfig;
use servicehub::marketplace::{
    Actor, BidStatus, BookingStatus, DeliveryChannel, DeliveryError, LifecycleError,
    ManualClock, Marketplace, ModerationDecision, NewBooking, Notification, NotificationFilter,
    ReviewDraft,
};

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl DeliveryChannel for Outbox {
    async fn deliver(
        &self,
        recipient_id: &str,
        notification: &Notification,
    ) -> Result<(), DeliveryError> {
        self.sent
            .lock()
            .expect("outbox mutex poisoned")
            .push(format!("{recipient_id}:{}", notification.kind));
        Ok(())
    }
}

fn opened_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 10, 8, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn marketplace() -> (Marketplace, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(opened_at()));
    let config = NotificationConfig {
        admin_ids: vec!["ops-1".to_string()],
        ..NotificationConfig::default()
    };
    let marketplace = Marketplace::in_memory(Arc::new(Outbox::default()), clock.clone(), config);
    (marketplace, clock)
}

#[test]
fn booking_runs_from_request_to_review() {
    let (marketplace, clock) = marketplace();
    let lifecycle = marketplace.lifecycle();
    let pipeline = marketplace.pipeline();
    let customer = Actor::customer("cust-mia");
    let plumber = Actor::technician("tech-omar");
    let electrician = Actor::technician("tech-lin");

    let created = lifecycle
        .create_booking(
            &customer,
            NewBooking {
                service_id: "svc-leak-fix".to_string(),
                scheduled_at: opened_at() + Duration::days(1),
                amount_cents: 8_000,
            },
        )
        .expect("booking created");
    pipeline.publish(&created.events);
    let booking_id = created.booking.id;

    lifecycle
        .open_bidding(&customer, &booking_id)
        .expect("bidding open");
    for (technician, price) in [(&plumber, 8_000), (&electrician, 9_500)] {
        let bid = lifecycle
            .submit_bid(technician, &booking_id, price)
            .expect("bid placed");
        pipeline.publish(&bid.events);
    }

    let bids = lifecycle.bids(&booking_id).expect("bids listed");
    let plumber_bid = bids
        .iter()
        .find(|bid| bid.technician_id == plumber.id)
        .expect("plumber bid");
    let accepted = lifecycle
        .accept_bid(&customer, &plumber_bid.id)
        .expect("bid accepted");
    assert_eq!(pipeline.publish(&accepted.events).len(), 2);
    assert!(accepted
        .bids
        .iter()
        .any(|bid| bid.technician_id == electrician.id && bid.status == BidStatus::Rejected));

    clock.advance(Duration::days(1));
    lifecycle
        .start_booking(&plumber, &booking_id)
        .expect("work started");
    let completed = lifecycle
        .complete_booking(&plumber, &booking_id)
        .expect("work completed");
    pipeline.publish(&completed.events);
    assert_eq!(completed.booking.status, BookingStatus::Completed);

    let stats = marketplace.stats().stats(&customer.id).expect("stats");
    assert_eq!(stats.total_bookings, 1);
    assert_eq!(stats.total_spent_cents, 8_000);

    let review = lifecycle
        .submit_review(
            &customer,
            ReviewDraft {
                appointment_id: booking_id.clone(),
                rating: 5,
                comment: Some("Quick and tidy".to_string()),
            },
        )
        .expect("review submitted");
    pipeline.publish(&review.events);
    let approved = lifecycle
        .moderate_review(
            &Actor::admin("ops-1"),
            &review.review.id,
            ModerationDecision::Approve,
        )
        .expect("review approved");
    pipeline.publish(&approved.events);

    let inbox = marketplace
        .notifications()
        .list(&plumber.id, &NotificationFilter::default())
        .expect("plumber inbox");
    let kinds: Vec<_> = inbox.iter().map(|row| row.kind.as_str()).collect();
    assert_eq!(kinds, vec!["review_received", "bid_accepted"]);

    let customer_inbox = marketplace
        .notifications()
        .list(&customer.id, &NotificationFilter::default())
        .expect("customer inbox");
    assert_eq!(customer_inbox.first().map(|row| row.kind.as_str()), Some("booking_completed"));
    assert_eq!(customer_inbox.first().map(|row| row.message.as_str()), Some("Booking bk-000001 is complete. Total due: 80.00."));
}

#[test]
fn cancelled_bookings_cannot_be_completed() {
    let (marketplace, _) = marketplace();
    let lifecycle = marketplace.lifecycle();
    let customer = Actor::customer("cust-mia");
    let created = lifecycle
        .create_booking(
            &customer,
            NewBooking {
                service_id: "svc-paint".to_string(),
                scheduled_at: opened_at() + Duration::days(3),
                amount_cents: 40_000,
            },
        )
        .expect("booking created");

    let cancelled = lifecycle
        .cancel_booking(&customer, &created.booking.id)
        .expect("cancelled");
    assert!(marketplace.pipeline().publish(&cancelled.events).is_empty());

    let err = lifecycle
        .complete_booking(&Actor::admin("ops-1"), &created.booking.id)
        .expect_err("terminal state");
    assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
}
