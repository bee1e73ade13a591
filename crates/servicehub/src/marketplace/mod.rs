//! Booking, bid and review lifecycles and the notification fan-out they drive.

pub mod catalog;
pub mod clock;
pub mod dispatcher;
pub mod domain;
pub mod engine;
pub mod events;
pub mod lifecycle;
pub mod memory;
pub mod reaper;
pub mod repository;
pub mod router;
pub mod service;
pub mod stats;
pub mod store;

#[cfg(test)]
mod tests;

pub use catalog::{CatalogError, EventCatalog, EventSpec, RecipientRule};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{DeliveryChannel, DeliveryError, DispatchError, Dispatcher};
pub use domain::{
    Actor, Bid, BidId, BidStatus, Booking, BookingId, BookingStatus, CustomerStats,
    ModerationDecision, NewBooking, Notification, NotificationId, Priority, Review, ReviewDraft,
    ReviewId, ReviewResponse, ReviewStatus, Role,
};
pub use engine::{AnnouncementError, EventPipeline, Marketplace, Stores};
pub use events::LifecycleEvent;
pub use lifecycle::{BookingTransition, LifecycleError, ReviewTransition};
pub use memory::{InMemoryLifecycleRepository, InMemoryNotificationRepository, InMemoryStatsRepository};
pub use reaper::{ExpiryReaper, ReaperHandle};
pub use repository::{
    BatchOutcome, BookingChange, LifecycleRepository, NotificationRepository, RepositoryError,
    StatsRepository,
};
pub use router::{marketplace_router, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
pub use service::{
    BookingOutcome, EventOutcome, LifecycleService, PaymentNotice, PaymentStatus, ReviewOutcome,
};
pub use stats::{StatsAggregator, StatsError};
pub use store::{NotificationError, NotificationFilter, NotificationStore};
