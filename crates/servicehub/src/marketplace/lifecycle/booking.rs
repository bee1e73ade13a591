use chrono::{DateTime, Utc};

use super::{BookingTransition, LifecycleError};
use crate::marketplace::domain::{
    Actor, Bid, BidId, BidStatus, Booking, BookingId, BookingStatus, NewBooking,
};
use crate::marketplace::events::{format_amount, LifecycleEvent};

/// Build a freshly created booking owned by `customer_id`.
pub fn create(
    id: BookingId,
    customer_id: &str,
    request: NewBooking,
    now: DateTime<Utc>,
) -> BookingTransition {
    let booking = Booking {
        id,
        customer_id: customer_id.to_string(),
        technician_id: None,
        service_id: request.service_id,
        status: BookingStatus::Created,
        scheduled_at: request.scheduled_at,
        amount_cents: request.amount_cents,
        version: 0,
        created_at: now,
        updated_at: now,
    };

    let event = LifecycleEvent::new(
        "booking_created",
        format!("booking_created:{}", booking.id),
        now,
    )
    .booking(&booking.id)
    .field("customer_id", &booking.customer_id)
    .field("service_id", &booking.service_id)
    .field("scheduled_at", booking.scheduled_at.to_rfc3339());

    BookingTransition {
        booking,
        bids: Vec::new(),
        events: vec![event],
    }
}

pub fn open_bidding(
    booking: &Booking,
    now: DateTime<Utc>,
) -> Result<BookingTransition, LifecycleError> {
    let booking = advance(booking, BookingStatus::BidOpen, "open bidding on", now)?;
    Ok(BookingTransition {
        booking,
        bids: Vec::new(),
        events: Vec::new(),
    })
}

/// Record a technician's offer. The booking version moves so a racing accept conflicts.
pub fn submit_bid(
    booking: &Booking,
    existing: &[Bid],
    id: BidId,
    technician_id: &str,
    price_cents: u64,
    now: DateTime<Utc>,
) -> Result<BookingTransition, LifecycleError> {
    if booking.status != BookingStatus::BidOpen {
        return Err(LifecycleError::invalid(
            "booking",
            booking.status.label(),
            "submit a bid on",
        ));
    }

    if let Some(active) = existing
        .iter()
        .find(|bid| bid.technician_id == technician_id && bid.status == BidStatus::Submitted)
    {
        return Err(LifecycleError::invalid(
            "bid",
            active.status.label(),
            "submit a second",
        ));
    }

    let bid = Bid {
        id,
        booking_id: booking.id.clone(),
        technician_id: technician_id.to_string(),
        price_cents,
        status: BidStatus::Submitted,
        created_at: now,
        updated_at: now,
    };

    let event = LifecycleEvent::new("bid_submitted", format!("bid_submitted:{}", bid.id), now)
        .booking(&booking.id)
        .bid(&bid.id)
        .field("technician_id", technician_id)
        .field("price", format_amount(price_cents));

    Ok(BookingTransition {
        booking: touch(booking, now),
        bids: vec![bid],
        events: vec![event],
    })
}

pub fn withdraw_bid(
    booking: &Booking,
    bid: &Bid,
    now: DateTime<Utc>,
) -> Result<BookingTransition, LifecycleError> {
    if booking.status != BookingStatus::BidOpen {
        return Err(LifecycleError::invalid(
            "booking",
            booking.status.label(),
            "withdraw a bid from",
        ));
    }
    if bid.status != BidStatus::Submitted {
        return Err(LifecycleError::invalid("bid", bid.status.label(), "withdraw"));
    }

    let mut withdrawn = bid.clone();
    withdrawn.status = BidStatus::Withdrawn;
    withdrawn.updated_at = now;

    Ok(BookingTransition {
        booking: touch(booking, now),
        bids: vec![withdrawn],
        events: Vec::new(),
    })
}

/// Accept one bid: the bid becomes accepted, the booking confirmed with that technician,
/// and every other submitted bid on the booking rejected.
///
/// `booking_confirmed` is only emitted when someone other than the booking's customer
/// accepted on their behalf.
pub fn accept_bid(
    booking: &Booking,
    bids: &[Bid],
    bid_id: &BidId,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<BookingTransition, LifecycleError> {
    if booking.status != BookingStatus::BidOpen {
        return Err(LifecycleError::invalid(
            "booking",
            booking.status.label(),
            "accept a bid on",
        ));
    }

    let target = bids
        .iter()
        .find(|bid| &bid.id == bid_id)
        .ok_or_else(|| LifecycleError::not_found("bid", bid_id))?;
    if target.status != BidStatus::Submitted {
        return Err(LifecycleError::invalid("bid", target.status.label(), "accept"));
    }

    let mut confirmed = advance(booking, BookingStatus::Confirmed, "accept a bid on", now)?;
    confirmed.technician_id = Some(target.technician_id.clone());

    let mut events = Vec::new();
    if actor.id != booking.customer_id {
        events.push(
            LifecycleEvent::new(
                "booking_confirmed",
                format!("booking_confirmed:{}", booking.id),
                now,
            )
            .booking(&booking.id)
            .bid(&target.id)
            .field("technician_id", &target.technician_id)
            .field("scheduled_at", confirmed.scheduled_at.to_rfc3339()),
        );
    }

    let mut changed = Vec::new();
    for bid in bids {
        let next_status = if bid.id == target.id {
            BidStatus::Accepted
        } else if bid.status == BidStatus::Submitted {
            BidStatus::Rejected
        } else {
            continue;
        };

        let mut updated = bid.clone();
        updated.status = next_status;
        updated.updated_at = now;

        let kind = if next_status == BidStatus::Accepted {
            "bid_accepted"
        } else {
            "bid_rejected"
        };
        events.push(
            LifecycleEvent::new(kind, format!("{kind}:{}", updated.id), now)
                .booking(&booking.id)
                .bid(&updated.id)
                .field("technician_id", &updated.technician_id)
                .field("scheduled_at", confirmed.scheduled_at.to_rfc3339()),
        );
        changed.push(updated);
    }

    Ok(BookingTransition {
        booking: confirmed,
        bids: changed,
        events,
    })
}

pub fn start(booking: &Booking, now: DateTime<Utc>) -> Result<BookingTransition, LifecycleError> {
    let booking = advance(booking, BookingStatus::InProgress, "start", now)?;
    Ok(BookingTransition {
        booking,
        bids: Vec::new(),
        events: Vec::new(),
    })
}

pub fn complete(
    booking: &Booking,
    now: DateTime<Utc>,
) -> Result<BookingTransition, LifecycleError> {
    let completed = advance(booking, BookingStatus::Completed, "complete", now)?;

    let event = LifecycleEvent::new(
        "booking_completed",
        format!("booking_completed:{}", completed.id),
        now,
    )
    .booking(&completed.id)
    .field("customer_id", &completed.customer_id)
    .field("technician_id", completed.technician_id.as_deref().unwrap_or_default())
    .field("amount_cents", completed.amount_cents)
    .field("amount", format_amount(completed.amount_cents));

    Ok(BookingTransition {
        booking: completed,
        bids: Vec::new(),
        events: vec![event],
    })
}

/// Cancel a booking that has not started. A confirmed booking releases its technician.
pub fn cancel(
    booking: &Booking,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<BookingTransition, LifecycleError> {
    let mut cancelled = advance(booking, BookingStatus::Cancelled, "cancel", now)?;
    cancelled.technician_id = None;

    let event = LifecycleEvent::new(
        "booking_cancelled",
        format!("booking_cancelled:{}", cancelled.id),
        now,
    )
    .booking(&cancelled.id)
    .field("cancelled_by", actor.role.label());

    Ok(BookingTransition {
        booking: cancelled,
        bids: Vec::new(),
        events: vec![event],
    })
}

/// Move a confirmed booking to a new slot. Passes through `rescheduled` and lands back
/// on `confirmed` within the same commit.
pub fn reschedule(
    booking: &Booking,
    scheduled_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<BookingTransition, LifecycleError> {
    if !booking.status.can_transition_to(BookingStatus::Rescheduled)
        || !BookingStatus::Rescheduled.can_transition_to(BookingStatus::Confirmed)
    {
        return Err(LifecycleError::invalid(
            "booking",
            booking.status.label(),
            "reschedule",
        ));
    }

    let mut confirmed = touch(booking, now);
    confirmed.status = BookingStatus::Confirmed;
    confirmed.scheduled_at = scheduled_at;

    let event = LifecycleEvent::new(
        "booking_rescheduled",
        format!("booking_rescheduled:{}:v{}", confirmed.id, confirmed.version),
        now,
    )
    .booking(&confirmed.id)
    .field("scheduled_at", scheduled_at.to_rfc3339())
    .field("previous_scheduled_at", booking.scheduled_at.to_rfc3339());

    Ok(BookingTransition {
        booking: confirmed,
        bids: Vec::new(),
        events: vec![event],
    })
}

fn advance(
    booking: &Booking,
    next: BookingStatus,
    action: &'static str,
    now: DateTime<Utc>,
) -> Result<Booking, LifecycleError> {
    if !booking.status.can_transition_to(next) {
        return Err(LifecycleError::invalid(
            "booking",
            booking.status.label(),
            action,
        ));
    }

    let mut updated = touch(booking, now);
    updated.status = next;
    Ok(updated)
}

fn touch(booking: &Booking, now: DateTime<Utc>) -> Booking {
    let mut updated = booking.clone();
    updated.version = booking.version + 1;
    updated.updated_at = now;
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).single().expect("valid instant")
    }

    fn booking(status: BookingStatus) -> Booking {
        let created = create(
            BookingId::from("bk-1"),
            "cust-1",
            NewBooking {
                service_id: "svc-plumbing".to_string(),
                scheduled_at: now() + chrono::Duration::days(2),
                amount_cents: 12_500,
            },
            now(),
        );
        let mut booking = created.booking;
        booking.status = status;
        if status.requires_technician() {
            booking.technician_id = Some("tech-1".to_string());
        }
        booking
    }

    fn bid(id: &str, technician: &str, status: BidStatus) -> Bid {
        Bid {
            id: BidId::from(id),
            booking_id: BookingId::from("bk-1"),
            technician_id: technician.to_string(),
            price_cents: 10_000,
            status,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn transition_table_rejects_skipping_states() {
        assert!(BookingStatus::Created.can_transition_to(BookingStatus::BidOpen));
        assert!(!BookingStatus::Created.can_transition_to(BookingStatus::Confirmed));
        assert!(!BookingStatus::InProgress.can_transition_to(BookingStatus::Cancelled));
        assert!(!BookingStatus::Completed.can_transition_to(BookingStatus::Cancelled));
        assert!(!BookingStatus::Cancelled.can_transition_to(BookingStatus::BidOpen));
    }

    #[test]
    fn create_emits_booking_created() {
        let transition = booking_created();
        assert_eq!(transition.booking.status, BookingStatus::Created);
        assert_eq!(transition.booking.technician_id, None);
        assert_eq!(transition.events.len(), 1);
        assert_eq!(transition.events[0].kind, "booking_created");
        assert_eq!(transition.events[0].event_id, "booking_created:bk-9");
    }

    fn booking_created() -> BookingTransition {
        create(
            BookingId::from("bk-9"),
            "cust-9",
            NewBooking {
                service_id: "svc-hvac".to_string(),
                scheduled_at: now(),
                amount_cents: 5_000,
            },
            now(),
        )
    }

    #[test]
    fn accept_rejects_siblings_and_assigns_technician() {
        let open = booking(BookingStatus::BidOpen);
        let bids = vec![
            bid("b1", "tech-a", BidStatus::Submitted),
            bid("b2", "tech-b", BidStatus::Submitted),
            bid("b3", "tech-c", BidStatus::Withdrawn),
        ];

        let transition = accept_bid(
            &open,
            &bids,
            &BidId::from("b2"),
            &Actor::customer("cust-1"),
            now(),
        )
        .expect("accept succeeds");

        assert_eq!(transition.booking.status, BookingStatus::Confirmed);
        assert_eq!(transition.booking.technician_id.as_deref(), Some("tech-b"));
        assert_eq!(transition.booking.version, open.version + 1);

        let statuses: Vec<_> = transition
            .bids
            .iter()
            .map(|bid| (bid.id.as_str(), bid.status))
            .collect();
        assert_eq!(
            statuses,
            vec![("b1", BidStatus::Rejected), ("b2", BidStatus::Accepted)]
        );

        let kinds: Vec<_> = transition.events.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["bid_rejected", "bid_accepted"]);
    }

    #[test]
    fn accept_by_admin_also_confirms_to_customer() {
        let open = booking(BookingStatus::BidOpen);
        let bids = vec![bid("b1", "tech-a", BidStatus::Submitted)];

        let transition = accept_bid(
            &open,
            &bids,
            &BidId::from("b1"),
            &Actor::admin("ops-1"),
            now(),
        )
        .expect("accept succeeds");

        assert_eq!(transition.events[0].kind, "booking_confirmed");
    }

    #[test]
    fn accept_on_confirmed_booking_is_invalid() {
        let confirmed = booking(BookingStatus::Confirmed);
        let bids = vec![bid("b1", "tech-a", BidStatus::Submitted)];

        let err = accept_bid(
            &confirmed,
            &bids,
            &BidId::from("b1"),
            &Actor::customer("cust-1"),
            now(),
        )
        .expect_err("booking already confirmed");
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
    }

    #[test]
    fn accept_of_withdrawn_bid_is_invalid() {
        let open = booking(BookingStatus::BidOpen);
        let bids = vec![bid("b1", "tech-a", BidStatus::Withdrawn)];

        let err = accept_bid(
            &open,
            &bids,
            &BidId::from("b1"),
            &Actor::customer("cust-1"),
            now(),
        )
        .expect_err("withdrawn bid");
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition { entity: "bid", .. }
        ));
    }

    #[test]
    fn submit_bid_requires_open_bidding() {
        let created = booking(BookingStatus::Created);
        let err = submit_bid(&created, &[], BidId::from("b1"), "tech-a", 9_000, now())
            .expect_err("bidding not open");
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
    }

    #[test]
    fn technician_cannot_hold_two_active_bids() {
        let open = booking(BookingStatus::BidOpen);
        let existing = vec![bid("b1", "tech-a", BidStatus::Submitted)];
        let err = submit_bid(&open, &existing, BidId::from("b2"), "tech-a", 9_000, now())
            .expect_err("duplicate active bid");
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));

        let withdrawn = vec![bid("b1", "tech-a", BidStatus::Withdrawn)];
        assert!(submit_bid(&open, &withdrawn, BidId::from("b2"), "tech-a", 9_000, now()).is_ok());
    }

    #[test]
    fn cancel_releases_technician() {
        let confirmed = booking(BookingStatus::Confirmed);
        let transition =
            cancel(&confirmed, &Actor::customer("cust-1"), now()).expect("cancel succeeds");
        assert_eq!(transition.booking.status, BookingStatus::Cancelled);
        assert_eq!(transition.booking.technician_id, None);
        assert_eq!(transition.events[0].payload["cancelled_by"], "customer");
    }

    #[test]
    fn cancel_after_start_is_invalid() {
        let started = booking(BookingStatus::InProgress);
        let err = cancel(&started, &Actor::customer("cust-1"), now()).expect_err("started");
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
    }

    #[test]
    fn reschedule_keeps_confirmed_and_moves_slot() {
        let confirmed = booking(BookingStatus::Confirmed);
        let new_slot = now() + chrono::Duration::days(5);

        let transition = reschedule(&confirmed, new_slot, now()).expect("reschedule succeeds");

        assert_eq!(transition.booking.status, BookingStatus::Confirmed);
        assert_eq!(transition.booking.scheduled_at, new_slot);
        assert_eq!(transition.booking.version, confirmed.version + 1);
        assert_eq!(transition.events[0].kind, "booking_rescheduled");
        assert_eq!(
            transition.events[0].payload["previous_scheduled_at"],
            confirmed.scheduled_at.to_rfc3339()
        );
    }

    #[test]
    fn reschedule_before_confirmation_is_invalid() {
        let open = booking(BookingStatus::BidOpen);
        let err = reschedule(&open, now(), now()).expect_err("not confirmed");
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
    }

    #[test]
    fn complete_carries_amount_for_stats() {
        let started = booking(BookingStatus::InProgress);
        let transition = complete(&started, now()).expect("complete succeeds");
        let event = &transition.events[0];
        assert_eq!(event.kind, "booking_completed");
        assert_eq!(event.payload["amount_cents"], "12500");
        assert_eq!(event.payload["amount"], "125.00");
        assert_eq!(event.payload["customer_id"], "cust-1");
    }
}
