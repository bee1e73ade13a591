use chrono::{DateTime, Utc};

use super::domain::{
    Bid, BidId, Booking, BookingId, CustomerStats, Notification, NotificationId, Review, ReviewId,
};

/// All writes produced by one booking-scoped transition.
///
/// Applied only if the stored booking is still at `expected_version`.
#[derive(Debug, Clone)]
pub struct BookingChange {
    pub expected_version: u64,
    pub booking: Booking,
    pub bids: Vec<Bid>,
}

/// Storage abstraction for bookings, bids and reviews.
pub trait LifecycleRepository: Send + Sync {
    fn insert_booking(&self, booking: Booking) -> Result<Booking, RepositoryError>;
    fn fetch_booking(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError>;
    fn fetch_bid(&self, id: &BidId) -> Result<Option<Bid>, RepositoryError>;
    fn bids_for_booking(&self, id: &BookingId) -> Result<Vec<Bid>, RepositoryError>;
    /// Compare-and-set over the booking version; `Conflict` when another writer got there first.
    fn commit(&self, change: BookingChange) -> Result<(), RepositoryError>;

    /// `Conflict` when a review for the same (customer, appointment) already exists.
    fn insert_review(&self, review: Review) -> Result<Review, RepositoryError>;
    fn fetch_review(&self, id: &ReviewId) -> Result<Option<Review>, RepositoryError>;
    fn find_review(
        &self,
        customer_id: &str,
        appointment_id: &BookingId,
    ) -> Result<Option<Review>, RepositoryError>;
    /// Compare-and-set over the review version.
    fn update_review(&self, review: Review, expected_version: u64) -> Result<(), RepositoryError>;
}

/// Outcome of recording a dispatch batch under its idempotence key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Recorded(Vec<Notification>),
    /// The event id was already recorded; carries the surviving notifications of that batch.
    AlreadyRecorded(Vec<Notification>),
}

/// Storage abstraction for delivered notifications.
pub trait NotificationRepository: Send + Sync {
    /// Atomically store `batch` unless `event_id` was recorded before.
    fn record_batch(
        &self,
        event_id: &str,
        batch: Vec<Notification>,
    ) -> Result<BatchOutcome, RepositoryError>;
    fn dispatched(&self, event_id: &str) -> Result<Option<Vec<Notification>>, RepositoryError>;
    fn fetch(&self, id: &NotificationId) -> Result<Option<Notification>, RepositoryError>;
    /// Every stored notification for the recipient, expired ones included.
    fn for_recipient(&self, recipient_id: &str) -> Result<Vec<Notification>, RepositoryError>;
    /// Sets `is_read`/`read_at` unless already read; returns the stored row.
    fn mark_read(
        &self,
        id: &NotificationId,
        read_at: DateTime<Utc>,
    ) -> Result<Notification, RepositoryError>;
    /// Removes rows whose `expires_at <= now` and returns how many went.
    fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, RepositoryError>;
}

/// Storage abstraction for per-customer aggregates.
pub trait StatsRepository: Send + Sync {
    /// Fold a completed booking into the customer's totals. Returns `false` when the
    /// booking was already counted.
    fn apply_completion(
        &self,
        booking_id: &BookingId,
        customer_id: &str,
        amount_cents: u64,
    ) -> Result<bool, RepositoryError>;
    fn fetch(&self, customer_id: &str) -> Result<Option<CustomerStats>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists or was modified concurrently")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
