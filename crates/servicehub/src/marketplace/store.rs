use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use super::clock::Clock;
use super::domain::{Notification, NotificationId};
use super::repository::{NotificationRepository, RepositoryError};

/// Query options for a recipient's inbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NotificationFilter {
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification '{0}' not found")]
    NotFound(NotificationId),
    #[error("notification '{0}' belongs to another recipient")]
    Forbidden(NotificationId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Read side of the notification store: inbox queries and read tracking.
///
/// Every read path filters logically expired rows, so correctness never waits on the reaper.
pub struct NotificationStore {
    repository: Arc<dyn NotificationRepository>,
    clock: Arc<dyn Clock>,
}

impl NotificationStore {
    pub fn new(repository: Arc<dyn NotificationRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    /// Newest first, expired rows excluded.
    pub fn list(
        &self,
        recipient_id: &str,
        filter: &NotificationFilter,
    ) -> Result<Vec<Notification>, NotificationError> {
        let now = self.clock.now();
        let mut rows: Vec<_> = self
            .repository
            .for_recipient(recipient_id)?
            .into_iter()
            .filter(|row| !row.is_expired(now))
            .filter(|row| !filter.unread_only || !row.is_read)
            .filter(|row| filter.kind.as_deref().map_or(true, |kind| row.kind == kind))
            .collect();

        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.sequence().cmp(&a.id.sequence()))
                .then_with(|| b.id.cmp(&a.id))
        });
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    pub fn unread_count(&self, recipient_id: &str) -> Result<usize, NotificationError> {
        let filter = NotificationFilter {
            unread_only: true,
            ..NotificationFilter::default()
        };
        Ok(self.list(recipient_id, &filter)?.len())
    }

    /// Mark one notification read on behalf of `actor_id`.
    ///
    /// Idempotent: a second call succeeds and leaves `read_at` at its first value.
    pub fn mark_read(
        &self,
        id: &NotificationId,
        actor_id: &str,
    ) -> Result<Notification, NotificationError> {
        let now = self.clock.now();
        let row = self
            .repository
            .fetch(id)?
            .filter(|row| !row.is_expired(now))
            .ok_or_else(|| NotificationError::NotFound(id.clone()))?;

        if row.recipient_id != actor_id {
            return Err(NotificationError::Forbidden(id.clone()));
        }
        if row.is_read {
            return Ok(row);
        }

        match self.repository.mark_read(id, now) {
            Ok(read) => {
                debug!(notification_id = %id, recipient_id = actor_id, "notification marked read");
                Ok(read)
            }
            Err(RepositoryError::NotFound) => Err(NotificationError::NotFound(id.clone())),
            Err(other) => Err(other.into()),
        }
    }

    /// Mark every visible unread notification read. Returns how many changed.
    pub fn mark_all_read(&self, recipient_id: &str) -> Result<usize, NotificationError> {
        let filter = NotificationFilter {
            unread_only: true,
            ..NotificationFilter::default()
        };
        let mut marked = 0;
        for row in self.list(recipient_id, &filter)? {
            match self.mark_read(&row.id, recipient_id) {
                Ok(_) => marked += 1,
                // Reaped between the listing and the update.
                Err(NotificationError::NotFound(_)) => {}
                Err(other) => return Err(other),
            }
        }
        Ok(marked)
    }
}
