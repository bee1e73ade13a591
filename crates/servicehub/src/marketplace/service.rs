use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::domain::{
    Actor, Bid, BidId, Booking, BookingId, BookingStatus, ModerationDecision, NewBooking, Review,
    ReviewDraft, ReviewId, Role,
};
use super::events::{format_amount, LifecycleEvent};
use super::lifecycle::{booking, review, BookingTransition, LifecycleError, ReviewTransition};
use super::repository::{BookingChange, LifecycleRepository, RepositoryError};

/// Transition result handed back to controllers: the updated records plus the events the
/// caller must dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct BookingOutcome {
    pub booking: Booking,
    pub bids: Vec<Bid>,
    #[serde(skip)]
    pub events: Vec<LifecycleEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub review: Review,
    #[serde(skip)]
    pub events: Vec<LifecycleEvent>,
}

/// Events with no record change, such as payment notices.
#[derive(Debug, Clone)]
pub struct EventOutcome {
    pub events: Vec<LifecycleEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Received,
    Pending,
}

/// Notice from the payment collaborator about a booking.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, Serialize)]
pub struct PaymentNotice {
    pub reference: String,
    pub amount_cents: u64,
    pub status: PaymentStatus,
}

/// Runs lifecycle transitions against the repository.
///
/// Booking-scoped transitions read the booking and its bids, run the pure state machine
/// and commit with a compare-and-set on the booking version. A lost race is retried up to
/// `retry_limit` times against fresh state.
pub struct LifecycleService {
    repository: Arc<dyn LifecycleRepository>,
    clock: Arc<dyn Clock>,
    retry_limit: u32,
    booking_sequence: AtomicU64,
    bid_sequence: AtomicU64,
    review_sequence: AtomicU64,
}

impl LifecycleService {
    pub fn new(
        repository: Arc<dyn LifecycleRepository>,
        clock: Arc<dyn Clock>,
        retry_limit: u32,
    ) -> Self {
        Self {
            repository,
            clock,
            retry_limit,
            booking_sequence: AtomicU64::new(1),
            bid_sequence: AtomicU64::new(1),
            review_sequence: AtomicU64::new(1),
        }
    }

    pub fn repository(&self) -> &Arc<dyn LifecycleRepository> {
        &self.repository
    }

    pub fn create_booking(
        &self,
        actor: &Actor,
        request: NewBooking,
    ) -> Result<BookingOutcome, LifecycleError> {
        if actor.role != Role::Customer {
            return Err(LifecycleError::Forbidden(
                "only customers may create bookings".to_string(),
            ));
        }

        let id = BookingId(next_id("bk", &self.booking_sequence));
        let transition = booking::create(id, &actor.id, request, self.clock.now());
        let stored = self.repository.insert_booking(transition.booking)?;
        info!(booking_id = %stored.id, customer_id = %stored.customer_id, "booking created");

        Ok(BookingOutcome {
            booking: stored,
            bids: Vec::new(),
            events: transition.events,
        })
    }

    pub fn get_booking(&self, id: &BookingId) -> Result<Booking, LifecycleError> {
        self.repository
            .fetch_booking(id)?
            .ok_or_else(|| LifecycleError::not_found("booking", id))
    }

    pub fn bids(&self, id: &BookingId) -> Result<Vec<Bid>, LifecycleError> {
        self.get_booking(id)?;
        Ok(self.repository.bids_for_booking(id)?)
    }

    pub fn open_bidding(
        &self,
        actor: &Actor,
        id: &BookingId,
    ) -> Result<BookingOutcome, LifecycleError> {
        self.transition(id, "open_bidding", |current, _, now| {
            ensure_customer_or_admin(actor, current)?;
            booking::open_bidding(current, now)
        })
    }

    pub fn submit_bid(
        &self,
        actor: &Actor,
        id: &BookingId,
        price_cents: u64,
    ) -> Result<BookingOutcome, LifecycleError> {
        if actor.role != Role::Technician {
            return Err(LifecycleError::Forbidden(
                "only technicians may bid".to_string(),
            ));
        }

        let bid_id = BidId(next_id("bid", &self.bid_sequence));
        self.transition(id, "submit_bid", |current, bids, now| {
            booking::submit_bid(current, bids, bid_id.clone(), &actor.id, price_cents, now)
        })
    }

    pub fn withdraw_bid(
        &self,
        actor: &Actor,
        bid_id: &BidId,
    ) -> Result<BookingOutcome, LifecycleError> {
        let bid = self.fetch_bid(bid_id)?;
        if bid.technician_id != actor.id && !actor.is_admin() {
            return Err(LifecycleError::Forbidden(format!(
                "bid {bid_id} belongs to another technician"
            )));
        }

        self.transition(&bid.booking_id, "withdraw_bid", |current, bids, now| {
            let bid = bids
                .iter()
                .find(|candidate| &candidate.id == bid_id)
                .ok_or_else(|| LifecycleError::not_found("bid", bid_id))?;
            booking::withdraw_bid(current, bid, now)
        })
    }

    /// Accept a bid and reject its siblings as one commit.
    ///
    /// Of several concurrent accepts on one booking exactly one commits; the others
    /// re-read a confirmed booking and fail with `InvalidTransition`.
    pub fn accept_bid(
        &self,
        actor: &Actor,
        bid_id: &BidId,
    ) -> Result<BookingOutcome, LifecycleError> {
        let bid = self.fetch_bid(bid_id)?;
        self.transition(&bid.booking_id, "accept_bid", |current, bids, now| {
            ensure_customer_or_admin(actor, current)?;
            booking::accept_bid(current, bids, bid_id, actor, now)
        })
    }

    pub fn start_booking(
        &self,
        actor: &Actor,
        id: &BookingId,
    ) -> Result<BookingOutcome, LifecycleError> {
        self.transition(id, "start", |current, _, now| {
            ensure_technician_or_admin(actor, current)?;
            booking::start(current, now)
        })
    }

    pub fn complete_booking(
        &self,
        actor: &Actor,
        id: &BookingId,
    ) -> Result<BookingOutcome, LifecycleError> {
        self.transition(id, "complete", |current, _, now| {
            ensure_technician_or_admin(actor, current)?;
            booking::complete(current, now)
        })
    }

    pub fn cancel_booking(
        &self,
        actor: &Actor,
        id: &BookingId,
    ) -> Result<BookingOutcome, LifecycleError> {
        self.transition(id, "cancel", |current, _, now| {
            if !actor.is_admin() && !current.is_party(actor) {
                return Err(LifecycleError::Forbidden(format!(
                    "{} is not a party to booking {}",
                    actor.id, current.id
                )));
            }
            booking::cancel(current, actor, now)
        })
    }

    pub fn reschedule_booking(
        &self,
        actor: &Actor,
        id: &BookingId,
        scheduled_at: DateTime<Utc>,
    ) -> Result<BookingOutcome, LifecycleError> {
        self.transition(id, "reschedule", |current, _, now| {
            ensure_customer_or_admin(actor, current)?;
            booking::reschedule(current, scheduled_at, now)
        })
    }

    /// Turn a payment collaborator notice into a payment event. Booking state is untouched.
    pub fn record_payment(
        &self,
        actor: &Actor,
        id: &BookingId,
        notice: PaymentNotice,
    ) -> Result<EventOutcome, LifecycleError> {
        if !actor.is_admin() {
            return Err(LifecycleError::Forbidden(
                "payment notices are accepted from the payment service only".to_string(),
            ));
        }

        let current = self.get_booking(id)?;
        if matches!(
            current.status,
            BookingStatus::Created | BookingStatus::Cancelled
        ) {
            return Err(LifecycleError::invalid(
                "booking",
                current.status.label(),
                "record a payment for",
            ));
        }

        let kind = match notice.status {
            PaymentStatus::Received => "payment_received",
            PaymentStatus::Pending => "payment_pending",
        };
        let event = LifecycleEvent::new(
            kind,
            format!("{kind}:{}:{}", current.id, notice.reference),
            self.clock.now(),
        )
        .booking(&current.id)
        .field("reference", &notice.reference)
        .field("amount", format_amount(notice.amount_cents));

        info!(booking_id = %current.id, reference = %notice.reference, kind, "payment notice recorded");
        Ok(EventOutcome {
            events: vec![event],
        })
    }

    pub fn submit_review(
        &self,
        actor: &Actor,
        draft: ReviewDraft,
    ) -> Result<ReviewOutcome, LifecycleError> {
        let appointment = self.get_booking(&draft.appointment_id)?;
        let review_id = ReviewId(next_id("rev", &self.review_sequence));
        let ReviewTransition { review, events } =
            review::submit(&appointment, draft, actor, review_id, self.clock.now())?;

        if self
            .repository
            .find_review(&review.customer_id, &review.appointment_id)?
            .is_some()
        {
            return Err(LifecycleError::DuplicateReview {
                appointment_id: review.appointment_id,
            });
        }

        let appointment_id = review.appointment_id.clone();
        let stored = match self.repository.insert_review(review) {
            Ok(stored) => stored,
            Err(RepositoryError::Conflict) => {
                return Err(LifecycleError::DuplicateReview { appointment_id })
            }
            Err(other) => return Err(other.into()),
        };
        info!(review_id = %stored.id, booking_id = %stored.appointment_id, rating = stored.rating, "review submitted");

        Ok(ReviewOutcome {
            review: stored,
            events,
        })
    }

    pub fn get_review(&self, id: &ReviewId) -> Result<Review, LifecycleError> {
        self.repository
            .fetch_review(id)?
            .ok_or_else(|| LifecycleError::not_found("review", id))
    }

    pub fn moderate_review(
        &self,
        actor: &Actor,
        id: &ReviewId,
        decision: ModerationDecision,
    ) -> Result<ReviewOutcome, LifecycleError> {
        let current = self.get_review(id)?;
        let transition = review::moderate(&current, decision, actor, self.clock.now())?;
        self.store_review(current.version, transition)
    }

    pub fn respond_to_review(
        &self,
        actor: &Actor,
        id: &ReviewId,
        text: &str,
    ) -> Result<ReviewOutcome, LifecycleError> {
        let current = self.get_review(id)?;
        let transition = review::respond(&current, text, actor, self.clock.now())?;
        self.store_review(current.version, transition)
    }

    fn store_review(
        &self,
        expected_version: u64,
        transition: ReviewTransition,
    ) -> Result<ReviewOutcome, LifecycleError> {
        let ReviewTransition { review, events } = transition;
        match self.repository.update_review(review.clone(), expected_version) {
            Ok(()) => {}
            Err(RepositoryError::Conflict) => {
                return Err(LifecycleError::invalid(
                    "review",
                    "modified concurrently",
                    "update",
                ))
            }
            Err(other) => return Err(other.into()),
        }
        info!(review_id = %review.id, status = review.status.label(), "review updated");
        Ok(ReviewOutcome { review, events })
    }

    fn fetch_bid(&self, id: &BidId) -> Result<Bid, LifecycleError> {
        self.repository
            .fetch_bid(id)?
            .ok_or_else(|| LifecycleError::not_found("bid", id))
    }

    fn transition<F>(
        &self,
        id: &BookingId,
        action: &'static str,
        apply: F,
    ) -> Result<BookingOutcome, LifecycleError>
    where
        F: Fn(&Booking, &[Bid], DateTime<Utc>) -> Result<BookingTransition, LifecycleError>,
    {
        for attempt in 0..=self.retry_limit {
            let current = self.get_booking(id)?;
            let bids = self.repository.bids_for_booking(id)?;
            let BookingTransition {
                booking,
                bids,
                events,
            } = apply(&current, &bids, self.clock.now())?;

            let change = BookingChange {
                expected_version: current.version,
                booking: booking.clone(),
                bids: bids.clone(),
            };
            match self.repository.commit(change) {
                Ok(()) => {
                    info!(
                        booking_id = %booking.id,
                        action,
                        from = current.status.label(),
                        to = booking.status.label(),
                        events = events.len(),
                        "booking transition committed"
                    );
                    return Ok(BookingOutcome {
                        booking,
                        bids,
                        events,
                    });
                }
                Err(RepositoryError::Conflict) => {
                    debug!(booking_id = %id, action, attempt, "booking changed underneath; retrying");
                }
                Err(other) => return Err(other.into()),
            }
        }

        warn!(booking_id = %id, action, retries = self.retry_limit, "giving up after repeated conflicts");
        Err(LifecycleError::Conflict(id.clone()))
    }
}

fn next_id(prefix: &str, sequence: &AtomicU64) -> String {
    let id = sequence.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{id:06}")
}

fn ensure_customer_or_admin(actor: &Actor, booking: &Booking) -> Result<(), LifecycleError> {
    if actor.is_admin() || actor.id == booking.customer_id {
        Ok(())
    } else {
        Err(LifecycleError::Forbidden(format!(
            "booking {} belongs to another customer",
            booking.id
        )))
    }
}

fn ensure_technician_or_admin(actor: &Actor, booking: &Booking) -> Result<(), LifecycleError> {
    if actor.is_admin() || booking.technician_id.as_deref() == Some(actor.id.as_str()) {
        Ok(())
    } else {
        Err(LifecycleError::Forbidden(format!(
            "booking {} is assigned to another technician",
            booking.id
        )))
    }
}
