use std::sync::Arc;

use tracing::{debug, info};

use super::domain::CustomerStats;
use super::events::LifecycleEvent;
use super::repository::{RepositoryError, StatsRepository};

/// Event kind that feeds the per-customer totals.
pub const TRIGGER_KIND: &str = "booking_completed";

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("completion event '{event_id}' is missing '{field}'")]
    MalformedEvent { event_id: String, field: &'static str },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Folds completed bookings into customer totals, at most once per booking.
pub struct StatsAggregator {
    repository: Arc<dyn StatsRepository>,
}

impl StatsAggregator {
    pub fn new(repository: Arc<dyn StatsRepository>) -> Self {
        Self { repository }
    }

    /// Returns `true` when the completion was counted, `false` for a repeat or an
    /// event of another kind.
    pub fn record_completion(&self, event: &LifecycleEvent) -> Result<bool, StatsError> {
        if event.kind != TRIGGER_KIND {
            return Ok(false);
        }

        let malformed = |field| StatsError::MalformedEvent {
            event_id: event.event_id.clone(),
            field,
        };
        let booking_id = event.booking_id.as_ref().ok_or_else(|| malformed("booking_id"))?;
        let customer_id = event
            .payload
            .get("customer_id")
            .filter(|value| !value.is_empty())
            .ok_or_else(|| malformed("customer_id"))?;
        let amount_cents = event
            .payload
            .get("amount_cents")
            .and_then(|value| value.parse::<u64>().ok())
            .ok_or_else(|| malformed("amount_cents"))?;

        let counted = self
            .repository
            .apply_completion(booking_id, customer_id, amount_cents)?;
        if counted {
            info!(%booking_id, customer_id = %customer_id, amount_cents, "completion counted");
        } else {
            debug!(%booking_id, "completion already counted");
        }
        Ok(counted)
    }

    /// Totals for a customer; zeroes when nothing has completed yet.
    pub fn stats(&self, customer_id: &str) -> Result<CustomerStats, StatsError> {
        Ok(self
            .repository
            .fetch(customer_id)?
            .unwrap_or_else(|| CustomerStats {
                customer_id: customer_id.to_string(),
                ..CustomerStats::default()
            }))
    }
}
