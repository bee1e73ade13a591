//! Booking/bid and review moderation state machines.
//!
//! Every transition is a pure function from the current records to the next records plus
//! the events it emits. Nothing here touches storage; the service commits the returned
//! records as one unit or not at all.

pub mod booking;
pub mod review;

use super::domain::{Bid, Booking, BookingId, Review};
use super::events::LifecycleEvent;
use super::repository::RepositoryError;

/// Result of a booking-scoped transition: the next booking, every bid it touched and
/// the events to dispatch.
#[derive(Debug, Clone)]
pub struct BookingTransition {
    pub booking: Booking,
    pub bids: Vec<Bid>,
    pub events: Vec<LifecycleEvent>,
}

#[derive(Debug, Clone)]
pub struct ReviewTransition {
    pub review: Review,
    pub events: Vec<LifecycleEvent>,
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("cannot {action} {entity} while it is {status}")]
    InvalidTransition {
        entity: &'static str,
        status: &'static str,
        action: &'static str,
    },
    #[error("a review already exists for appointment {appointment_id}")]
    DuplicateReview { appointment_id: BookingId },
    #[error("rating must be between 1 and 5 (found {0})")]
    InvalidRating(u8),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },
    #[error("booking {0} kept changing under concurrent updates")]
    Conflict(BookingId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl LifecycleError {
    pub(crate) fn invalid(entity: &'static str, status: &'static str, action: &'static str) -> Self {
        Self::InvalidTransition {
            entity,
            status,
            action,
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
