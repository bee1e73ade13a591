//! Wiring between lifecycle transitions and the notification side.
//!
//! Controllers run a transition on [`LifecycleService`] and hand the emitted events to
//! [`EventPipeline::publish`]. The pipeline dispatches each event and forwards
//! completions to the stats aggregator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use super::catalog::EventCatalog;
use super::clock::Clock;
use super::dispatcher::{DeliveryChannel, DispatchError, Dispatcher};
use super::domain::{Actor, Notification, Priority};
use super::events::LifecycleEvent;
use super::memory::{
    InMemoryLifecycleRepository, InMemoryNotificationRepository, InMemoryStatsRepository,
};
use super::reaper::ExpiryReaper;
use super::repository::{LifecycleRepository, NotificationRepository, StatsRepository};
use super::service::LifecycleService;
use super::stats::{self, StatsAggregator};
use super::store::NotificationStore;
use crate::config::NotificationConfig;

/// Dispatches emitted events after a transition has committed.
pub struct EventPipeline {
    dispatcher: Arc<Dispatcher>,
    stats: Arc<StatsAggregator>,
}

impl EventPipeline {
    pub fn new(dispatcher: Arc<Dispatcher>, stats: Arc<StatsAggregator>) -> Self {
        Self { dispatcher, stats }
    }

    /// Dispatch every event in order and return all notifications created.
    ///
    /// The transition is already committed, so failures are logged and the remaining
    /// events still go out.
    pub fn publish(&self, events: &[LifecycleEvent]) -> Vec<Notification> {
        let mut created = Vec::new();
        for event in events {
            match self.dispatcher.dispatch(event) {
                Ok(notifications) => created.extend(notifications),
                Err(err) => {
                    error!(event_id = %event.event_id, kind = %event.kind, error = %err, "dispatch failed");
                }
            }

            if event.kind == stats::TRIGGER_KIND {
                if let Err(err) = self.stats.record_completion(event) {
                    error!(event_id = %event.event_id, error = %err, "stats update failed");
                }
            }
        }
        created
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnnouncementError {
    #[error("forbidden: only admins may publish announcements")]
    Forbidden,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Storage backends for one marketplace instance.
pub struct Stores {
    pub lifecycle: Arc<dyn LifecycleRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub stats: Arc<dyn StatsRepository>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            lifecycle: Arc::new(InMemoryLifecycleRepository::default()),
            notifications: Arc::new(InMemoryNotificationRepository::default()),
            stats: Arc::new(InMemoryStatsRepository::default()),
        }
    }
}

/// Every marketplace component built over one set of stores.
pub struct Marketplace {
    lifecycle: LifecycleService,
    notifications: NotificationStore,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<StatsAggregator>,
    pipeline: EventPipeline,
    reaper: Arc<ExpiryReaper>,
    clock: Arc<dyn Clock>,
    announcement_sequence: AtomicU64,
}

impl Marketplace {
    pub fn new(
        stores: Stores,
        delivery: Arc<dyn DeliveryChannel>,
        clock: Arc<dyn Clock>,
        config: NotificationConfig,
    ) -> Self {
        let Stores {
            lifecycle,
            notifications,
            stats,
        } = stores;

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(EventCatalog::standard()),
            Arc::clone(&notifications),
            Arc::clone(&lifecycle),
            delivery,
            Arc::clone(&clock),
            config.clone(),
        ));
        let stats = Arc::new(StatsAggregator::new(stats));

        Self {
            lifecycle: LifecycleService::new(
                lifecycle,
                Arc::clone(&clock),
                config.accept_retry_limit,
            ),
            notifications: NotificationStore::new(Arc::clone(&notifications), Arc::clone(&clock)),
            pipeline: EventPipeline::new(Arc::clone(&dispatcher), Arc::clone(&stats)),
            reaper: Arc::new(ExpiryReaper::new(
                notifications,
                Arc::clone(&clock),
                config.reaper_interval,
            )),
            dispatcher,
            stats,
            clock,
            announcement_sequence: AtomicU64::new(1),
        }
    }

    pub fn in_memory(
        delivery: Arc<dyn DeliveryChannel>,
        clock: Arc<dyn Clock>,
        config: NotificationConfig,
    ) -> Self {
        Self::new(Stores::in_memory(), delivery, clock, config)
    }

    pub fn lifecycle(&self) -> &LifecycleService {
        &self.lifecycle
    }

    pub fn notifications(&self) -> &NotificationStore {
        &self.notifications
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    pub fn pipeline(&self) -> &EventPipeline {
        &self.pipeline
    }

    pub fn reaper(&self) -> Arc<ExpiryReaper> {
        Arc::clone(&self.reaper)
    }

    /// Publish an operator notice to the admin group.
    pub fn announce(
        &self,
        actor: &Actor,
        headline: &str,
        body: &str,
        priority: Option<Priority>,
    ) -> Result<Vec<Notification>, AnnouncementError> {
        if !actor.is_admin() {
            warn!(actor_id = %actor.id, "announcement rejected for non-admin");
            return Err(AnnouncementError::Forbidden);
        }

        let sequence = self.announcement_sequence.fetch_add(1, Ordering::Relaxed);
        let mut event = LifecycleEvent::new(
            "system_announcement",
            format!("system_announcement:{sequence:06}"),
            self.clock.now(),
        )
        .field("headline", headline)
        .field("body", body)
        .field("announced_by", &actor.id);
        if let Some(priority) = priority {
            event = event.with_priority(priority);
        }

        let created = self.dispatcher.dispatch(&event)?;
        info!(event_id = %event.event_id, recipients = created.len(), "announcement published");
        Ok(created)
    }
}
