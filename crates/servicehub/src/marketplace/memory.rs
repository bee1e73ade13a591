//! Process-local stores backing the service and the test suites.
//!
//! Each store keeps its whole state behind one mutex, which gives every trait method the
//! per-document atomicity the engine relies on.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::domain::{
    Bid, BidId, Booking, BookingId, CustomerStats, Notification, NotificationId, Review, ReviewId,
};
use super::repository::{
    BatchOutcome, BookingChange, LifecycleRepository, NotificationRepository, RepositoryError,
    StatsRepository,
};

fn lock<'a, T>(mutex: &'a Mutex<T>, store: &str) -> Result<MutexGuard<'a, T>, RepositoryError> {
    mutex
        .lock()
        .map_err(|_| RepositoryError::Unavailable(format!("{store} store lock poisoned")))
}

#[derive(Debug, Default)]
struct LifecycleState {
    bookings: HashMap<BookingId, Booking>,
    bids: BTreeMap<BidId, Bid>,
    reviews: BTreeMap<ReviewId, Review>,
}

#[derive(Debug, Default)]
pub struct InMemoryLifecycleRepository {
    state: Mutex<LifecycleState>,
}

impl LifecycleRepository for InMemoryLifecycleRepository {
    fn insert_booking(&self, booking: Booking) -> Result<Booking, RepositoryError> {
        let mut state = lock(&self.state, "lifecycle")?;
        if state.bookings.contains_key(&booking.id) {
            return Err(RepositoryError::Conflict);
        }
        state.bookings.insert(booking.id.clone(), booking.clone());
        Ok(booking)
    }

    fn fetch_booking(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError> {
        let state = lock(&self.state, "lifecycle")?;
        Ok(state.bookings.get(id).cloned())
    }

    fn fetch_bid(&self, id: &BidId) -> Result<Option<Bid>, RepositoryError> {
        let state = lock(&self.state, "lifecycle")?;
        Ok(state.bids.get(id).cloned())
    }

    fn bids_for_booking(&self, id: &BookingId) -> Result<Vec<Bid>, RepositoryError> {
        let state = lock(&self.state, "lifecycle")?;
        Ok(state
            .bids
            .values()
            .filter(|bid| &bid.booking_id == id)
            .cloned()
            .collect())
    }

    fn commit(&self, change: BookingChange) -> Result<(), RepositoryError> {
        let mut state = lock(&self.state, "lifecycle")?;
        let stored = state
            .bookings
            .get(&change.booking.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.version != change.expected_version {
            return Err(RepositoryError::Conflict);
        }
        if change
            .bids
            .iter()
            .any(|bid| bid.booking_id != change.booking.id)
        {
            return Err(RepositoryError::Conflict);
        }

        for bid in change.bids {
            state.bids.insert(bid.id.clone(), bid);
        }
        state
            .bookings
            .insert(change.booking.id.clone(), change.booking);
        Ok(())
    }

    fn insert_review(&self, review: Review) -> Result<Review, RepositoryError> {
        let mut state = lock(&self.state, "lifecycle")?;
        let duplicate = state.reviews.values().any(|existing| {
            existing.customer_id == review.customer_id
                && existing.appointment_id == review.appointment_id
        });
        if duplicate || state.reviews.contains_key(&review.id) {
            return Err(RepositoryError::Conflict);
        }
        state.reviews.insert(review.id.clone(), review.clone());
        Ok(review)
    }

    fn fetch_review(&self, id: &ReviewId) -> Result<Option<Review>, RepositoryError> {
        let state = lock(&self.state, "lifecycle")?;
        Ok(state.reviews.get(id).cloned())
    }

    fn find_review(
        &self,
        customer_id: &str,
        appointment_id: &BookingId,
    ) -> Result<Option<Review>, RepositoryError> {
        let state = lock(&self.state, "lifecycle")?;
        Ok(state
            .reviews
            .values()
            .find(|review| {
                review.customer_id == customer_id && &review.appointment_id == appointment_id
            })
            .cloned())
    }

    fn update_review(&self, review: Review, expected_version: u64) -> Result<(), RepositoryError> {
        let mut state = lock(&self.state, "lifecycle")?;
        let stored = state
            .reviews
            .get_mut(&review.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.version != expected_version {
            return Err(RepositoryError::Conflict);
        }
        *stored = review;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct NotificationState {
    rows: HashMap<NotificationId, Notification>,
    batches: HashMap<String, Vec<NotificationId>>,
}

impl NotificationState {
    fn surviving(&self, event_id: &str) -> Option<Vec<Notification>> {
        self.batches.get(event_id).map(|ids| {
            ids.iter()
                .filter_map(|id| self.rows.get(id).cloned())
                .collect()
        })
    }
}

#[derive(Debug, Default)]
pub struct InMemoryNotificationRepository {
    state: Mutex<NotificationState>,
}

impl InMemoryNotificationRepository {
    /// Number of stored rows, expired or not.
    pub fn len(&self) -> Result<usize, RepositoryError> {
        Ok(lock(&self.state, "notification")?.rows.len())
    }

    pub fn is_empty(&self) -> Result<bool, RepositoryError> {
        Ok(self.len()? == 0)
    }
}

impl NotificationRepository for InMemoryNotificationRepository {
    fn record_batch(
        &self,
        event_id: &str,
        batch: Vec<Notification>,
    ) -> Result<BatchOutcome, RepositoryError> {
        let mut state = lock(&self.state, "notification")?;
        if let Some(existing) = state.surviving(event_id) {
            return Ok(BatchOutcome::AlreadyRecorded(existing));
        }
        if batch.iter().any(|row| state.rows.contains_key(&row.id)) {
            return Err(RepositoryError::Conflict);
        }

        let ids = batch.iter().map(|row| row.id.clone()).collect();
        for row in &batch {
            state.rows.insert(row.id.clone(), row.clone());
        }
        state.batches.insert(event_id.to_string(), ids);
        Ok(BatchOutcome::Recorded(batch))
    }

    fn dispatched(&self, event_id: &str) -> Result<Option<Vec<Notification>>, RepositoryError> {
        Ok(lock(&self.state, "notification")?.surviving(event_id))
    }

    fn fetch(&self, id: &NotificationId) -> Result<Option<Notification>, RepositoryError> {
        Ok(lock(&self.state, "notification")?.rows.get(id).cloned())
    }

    fn for_recipient(&self, recipient_id: &str) -> Result<Vec<Notification>, RepositoryError> {
        let state = lock(&self.state, "notification")?;
        Ok(state
            .rows
            .values()
            .filter(|row| row.recipient_id == recipient_id)
            .cloned()
            .collect())
    }

    fn mark_read(
        &self,
        id: &NotificationId,
        read_at: DateTime<Utc>,
    ) -> Result<Notification, RepositoryError> {
        let mut state = lock(&self.state, "notification")?;
        let row = state.rows.get_mut(id).ok_or(RepositoryError::NotFound)?;
        *row = row.marked_read(read_at);
        Ok(row.clone())
    }

    fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let mut state = lock(&self.state, "notification")?;
        let before = state.rows.len();
        state.rows.retain(|_, row| !row.is_expired(now));
        Ok(before - state.rows.len())
    }
}

#[derive(Debug, Default)]
struct StatsState {
    totals: HashMap<String, CustomerStats>,
    counted: HashSet<BookingId>,
}

#[derive(Debug, Default)]
pub struct InMemoryStatsRepository {
    state: Mutex<StatsState>,
}

impl StatsRepository for InMemoryStatsRepository {
    fn apply_completion(
        &self,
        booking_id: &BookingId,
        customer_id: &str,
        amount_cents: u64,
    ) -> Result<bool, RepositoryError> {
        let mut state = lock(&self.state, "stats")?;
        if !state.counted.insert(booking_id.clone()) {
            return Ok(false);
        }

        let totals = state
            .totals
            .entry(customer_id.to_string())
            .or_insert_with(|| CustomerStats {
                customer_id: customer_id.to_string(),
                ..CustomerStats::default()
            });
        totals.total_spent_cents += amount_cents;
        totals.total_bookings += 1;
        Ok(true)
    }

    fn fetch(&self, customer_id: &str) -> Result<Option<CustomerStats>, RepositoryError> {
        Ok(lock(&self.state, "stats")?.totals.get(customer_id).cloned())
    }
}
