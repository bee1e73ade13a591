use chrono::{DateTime, Utc};

use super::{LifecycleError, ReviewTransition};
use crate::marketplace::domain::{
    Actor, Booking, BookingStatus, ModerationDecision, Review, ReviewDraft, ReviewId,
    ReviewResponse, ReviewStatus,
};
use crate::marketplace::events::LifecycleEvent;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

/// Open a pending review for a completed booking. Uniqueness per
/// (customer, appointment) is enforced by the caller against storage.
pub fn submit(
    booking: &Booking,
    draft: ReviewDraft,
    actor: &Actor,
    id: ReviewId,
    now: DateTime<Utc>,
) -> Result<ReviewTransition, LifecycleError> {
    if !(MIN_RATING..=MAX_RATING).contains(&draft.rating) {
        return Err(LifecycleError::InvalidRating(draft.rating));
    }
    if actor.id != booking.customer_id {
        return Err(LifecycleError::Forbidden(format!(
            "only the customer of booking {} may review it",
            booking.id
        )));
    }
    if booking.status != BookingStatus::Completed {
        return Err(LifecycleError::invalid(
            "booking",
            booking.status.label(),
            "review",
        ));
    }
    let technician_id = booking.technician_id.clone().ok_or_else(|| {
        LifecycleError::invalid("booking", booking.status.label(), "review")
    })?;

    let review = Review {
        id,
        appointment_id: booking.id.clone(),
        customer_id: actor.id.clone(),
        technician_id,
        rating: draft.rating,
        comment: draft.comment,
        status: ReviewStatus::Pending,
        response: None,
        version: 0,
        created_at: now,
        updated_at: now,
    };

    let event = LifecycleEvent::new(
        "review_submitted",
        format!("review_submitted:{}", review.id),
        now,
    )
    .booking(&review.appointment_id)
    .review(&review.id)
    .field("rating", review.rating);

    Ok(ReviewTransition {
        review,
        events: vec![event],
    })
}

/// Admin decision on a pending review. Approval notifies the technician.
pub fn moderate(
    review: &Review,
    decision: ModerationDecision,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<ReviewTransition, LifecycleError> {
    if !actor.is_admin() {
        return Err(LifecycleError::Forbidden(
            "only admins may moderate reviews".to_string(),
        ));
    }
    if review.status != ReviewStatus::Pending {
        return Err(LifecycleError::invalid(
            "review",
            review.status.label(),
            "moderate",
        ));
    }

    let mut moderated = touch(review, now);
    let mut events = Vec::new();
    match decision {
        ModerationDecision::Approve => {
            moderated.status = ReviewStatus::Approved;
            events.push(
                LifecycleEvent::new(
                    "review_received",
                    format!("review_received:{}", review.id),
                    now,
                )
                .booking(&review.appointment_id)
                .review(&review.id)
                .field("rating", review.rating),
            );
        }
        ModerationDecision::Reject => moderated.status = ReviewStatus::Rejected,
    }

    Ok(ReviewTransition {
        review: moderated,
        events,
    })
}

/// Attach the single allowed response to an approved review.
pub fn respond(
    review: &Review,
    text: &str,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<ReviewTransition, LifecycleError> {
    if !actor.is_admin() && actor.id != review.technician_id {
        return Err(LifecycleError::Forbidden(
            "only the reviewed technician or an admin may respond".to_string(),
        ));
    }
    if review.status != ReviewStatus::Approved {
        return Err(LifecycleError::invalid(
            "review",
            review.status.label(),
            "respond to",
        ));
    }
    if review.response.is_some() {
        return Err(LifecycleError::invalid(
            "review",
            "already answered",
            "respond to",
        ));
    }

    let mut answered = touch(review, now);
    answered.response = Some(ReviewResponse {
        text: text.trim().to_string(),
        responded_by: actor.id.clone(),
        responded_at: now,
    });

    Ok(ReviewTransition {
        review: answered,
        events: Vec::new(),
    })
}

fn touch(review: &Review, now: DateTime<Utc>) -> Review {
    let mut updated = review.clone();
    updated.version = review.version + 1;
    updated.updated_at = now;
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::domain::BookingId;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 2, 15, 30, 0).single().expect("valid instant")
    }

    fn completed_booking() -> Booking {
        Booking {
            id: BookingId::from("bk-1"),
            customer_id: "cust-1".to_string(),
            technician_id: Some("tech-1".to_string()),
            service_id: "svc-electrical".to_string(),
            status: BookingStatus::Completed,
            scheduled_at: now(),
            amount_cents: 20_000,
            version: 4,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn draft(rating: u8) -> ReviewDraft {
        ReviewDraft {
            appointment_id: BookingId::from("bk-1"),
            rating,
            comment: Some("Quick and tidy".to_string()),
        }
    }

    fn pending_review() -> Review {
        submit(
            &completed_booking(),
            draft(5),
            &Actor::customer("cust-1"),
            ReviewId::from("rev-1"),
            now(),
        )
        .expect("submission succeeds")
        .review
    }

    #[test]
    fn submit_opens_pending_review_for_technician() {
        let transition = submit(
            &completed_booking(),
            draft(4),
            &Actor::customer("cust-1"),
            ReviewId::from("rev-1"),
            now(),
        )
        .expect("submission succeeds");

        assert_eq!(transition.review.status, ReviewStatus::Pending);
        assert_eq!(transition.review.technician_id, "tech-1");
        assert_eq!(transition.events[0].kind, "review_submitted");
    }

    #[test]
    fn rating_outside_range_is_rejected() {
        for rating in [0, 6] {
            let err = submit(
                &completed_booking(),
                draft(rating),
                &Actor::customer("cust-1"),
                ReviewId::from("rev-1"),
                now(),
            )
            .expect_err("rating out of range");
            assert!(matches!(err, LifecycleError::InvalidRating(found) if found == rating));
        }
    }

    #[test]
    fn submit_requires_completed_booking() {
        let mut booking = completed_booking();
        booking.status = BookingStatus::InProgress;
        let err = submit(
            &booking,
            draft(5),
            &Actor::customer("cust-1"),
            ReviewId::from("rev-1"),
            now(),
        )
        .expect_err("not completed");
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
    }

    #[test]
    fn only_booking_customer_may_review() {
        let err = submit(
            &completed_booking(),
            draft(5),
            &Actor::customer("cust-2"),
            ReviewId::from("rev-1"),
            now(),
        )
        .expect_err("stranger");
        assert!(matches!(err, LifecycleError::Forbidden(_)));
    }

    #[test]
    fn approval_emits_review_received() {
        let transition = moderate(
            &pending_review(),
            ModerationDecision::Approve,
            &Actor::admin("ops-1"),
            now(),
        )
        .expect("admin approves");
        assert_eq!(transition.review.status, ReviewStatus::Approved);
        assert_eq!(transition.events.len(), 1);
        assert_eq!(transition.events[0].kind, "review_received");
    }

    #[test]
    fn rejection_is_terminal_and_silent() {
        let rejected = moderate(
            &pending_review(),
            ModerationDecision::Reject,
            &Actor::admin("ops-1"),
            now(),
        )
        .expect("admin rejects");
        assert!(rejected.events.is_empty());

        let err = moderate(
            &rejected.review,
            ModerationDecision::Approve,
            &Actor::admin("ops-1"),
            now(),
        )
        .expect_err("already moderated");
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
    }

    #[test]
    fn non_admin_cannot_moderate() {
        let err = moderate(
            &pending_review(),
            ModerationDecision::Approve,
            &Actor::technician("tech-1"),
            now(),
        )
        .expect_err("technician");
        assert!(matches!(err, LifecycleError::Forbidden(_)));
    }

    #[test]
    fn response_is_set_once_while_approved() {
        let pending = pending_review();
        let err = respond(&pending, "Thanks!", &Actor::technician("tech-1"), now())
            .expect_err("still pending");
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));

        let approved = moderate(
            &pending,
            ModerationDecision::Approve,
            &Actor::admin("ops-1"),
            now(),
        )
        .expect("approve")
        .review;

        let err = respond(&approved, "Thanks!", &Actor::technician("tech-2"), now())
            .expect_err("other technician");
        assert!(matches!(err, LifecycleError::Forbidden(_)));

        let answered = respond(&approved, " Thanks! ", &Actor::technician("tech-1"), now())
            .expect("reviewed technician responds")
            .review;
        let response = answered.response.clone().expect("response set");
        assert_eq!(response.text, "Thanks!");
        assert_eq!(answered.status, ReviewStatus::Approved);

        let err = respond(&answered, "Again", &Actor::admin("ops-1"), now())
            .expect_err("second response");
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
    }
}
