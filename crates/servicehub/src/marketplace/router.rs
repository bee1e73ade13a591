use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::dispatcher::DispatchError;
use super::domain::{
    Actor, BidId, BookingId, ModerationDecision, NewBooking, NotificationId, Priority,
    ReviewDraft, ReviewId, Role,
};
use super::engine::{AnnouncementError, Marketplace};
use super::events::LifecycleEvent;
use super::lifecycle::LifecycleError;
use super::repository::RepositoryError;
use super::service::{BookingOutcome, PaymentNotice};
use super::stats::StatsError;
use super::store::{NotificationError, NotificationFilter};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// Router exposing the lifecycle transitions and the notification inbox.
pub fn marketplace_router(marketplace: Arc<Marketplace>) -> Router {
    Router::new()
        .route("/api/v1/notifications", get(list_notifications))
        .route(
            "/api/v1/notifications/unread-count",
            get(unread_count),
        )
        .route("/api/v1/notifications/read-all", put(mark_all_read))
        .route("/api/v1/notifications/:notification_id/read", put(mark_read))
        .route("/api/v1/bookings", post(create_booking))
        .route(
            "/api/v1/bookings/:booking_id/open-bidding",
            post(open_bidding),
        )
        .route("/api/v1/bookings/:booking_id/bids", post(submit_bid))
        .route("/api/v1/bookings/:booking_id/start", post(start_booking))
        .route(
            "/api/v1/bookings/:booking_id/complete",
            post(complete_booking),
        )
        .route("/api/v1/bookings/:booking_id/cancel", post(cancel_booking))
        .route(
            "/api/v1/bookings/:booking_id/reschedule",
            post(reschedule_booking),
        )
        .route("/api/v1/bookings/:booking_id/payments", post(record_payment))
        .route("/api/v1/bids/:bid_id/accept", post(accept_bid))
        .route("/api/v1/bids/:bid_id/withdraw", post(withdraw_bid))
        .route("/api/v1/reviews", post(submit_review))
        .route("/api/v1/reviews/:review_id/moderate", post(moderate_review))
        .route("/api/v1/reviews/:review_id/response", post(respond_to_review))
        .route("/api/v1/customers/:customer_id/stats", get(customer_stats))
        .route("/api/v1/announcements", post(announce))
        .with_state(marketplace)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header_value(parts, ACTOR_ID_HEADER)
            .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "missing actor identity"))?;
        let role = header_value(parts, ACTOR_ROLE_HEADER)
            .and_then(Role::parse)
            .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "missing or unknown actor role"))?;

        Ok(Actor::new(id, role))
    }
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Body of every transition response: the changed record, the kinds of the events it
/// emitted and how many notifications were created for them.
#[derive(Debug, Serialize)]
pub struct TransitionView<T: Serialize> {
    #[serde(flatten)]
    pub record: T,
    pub events: Vec<String>,
    pub notifications: usize,
}

fn publish_view<T: Serialize>(
    marketplace: &Marketplace,
    record: T,
    events: &[LifecycleEvent],
) -> TransitionView<T> {
    let notifications = marketplace.pipeline().publish(events).len();
    TransitionView {
        record,
        events: events.iter().map(|event| event.kind.clone()).collect(),
        notifications,
    }
}

#[derive(Debug, Deserialize)]
pub struct BidRequest {
    pub price_cents: u64,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ModerationRequest {
    pub decision: ModerationDecision,
}

#[derive(Debug, Deserialize)]
pub struct ResponseRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct AnnouncementRequest {
    pub headline: String,
    pub body: String,
    #[serde(default)]
    pub priority: Option<Priority>,
}

async fn list_notifications(
    State(marketplace): State<Arc<Marketplace>>,
    actor: Actor,
    Query(filter): Query<NotificationFilter>,
) -> Response {
    match marketplace.notifications().list(&actor.id, &filter) {
        Ok(rows) => (StatusCode::OK, axum::Json(rows)).into_response(),
        Err(err) => notification_error_response(err),
    }
}

async fn unread_count(State(marketplace): State<Arc<Marketplace>>, actor: Actor) -> Response {
    match marketplace.notifications().unread_count(&actor.id) {
        Ok(count) => (StatusCode::OK, axum::Json(json!({ "unread_count": count }))).into_response(),
        Err(err) => notification_error_response(err),
    }
}

async fn mark_read(
    State(marketplace): State<Arc<Marketplace>>,
    actor: Actor,
    Path(notification_id): Path<String>,
) -> Response {
    let id = NotificationId(notification_id);
    match marketplace.notifications().mark_read(&id, &actor.id) {
        Ok(row) => (StatusCode::OK, axum::Json(row)).into_response(),
        Err(err) => notification_error_response(err),
    }
}

async fn mark_all_read(State(marketplace): State<Arc<Marketplace>>, actor: Actor) -> Response {
    match marketplace.notifications().mark_all_read(&actor.id) {
        Ok(marked) => (StatusCode::OK, axum::Json(json!({ "marked": marked }))).into_response(),
        Err(err) => notification_error_response(err),
    }
}

async fn create_booking(
    State(marketplace): State<Arc<Marketplace>>,
    actor: Actor,
    axum::Json(request): axum::Json<NewBooking>,
) -> Response {
    match marketplace.lifecycle().create_booking(&actor, request) {
        Ok(outcome) => {
            let view = publish_view(&marketplace, &outcome, &outcome.events);
            (StatusCode::CREATED, axum::Json(view)).into_response()
        }
        Err(err) => lifecycle_error_response(err),
    }
}

async fn open_bidding(
    State(marketplace): State<Arc<Marketplace>>,
    actor: Actor,
    Path(booking_id): Path<String>,
) -> Response {
    let id = BookingId(booking_id);
    booking_response(&marketplace, marketplace.lifecycle().open_bidding(&actor, &id))
}

async fn submit_bid(
    State(marketplace): State<Arc<Marketplace>>,
    actor: Actor,
    Path(booking_id): Path<String>,
    axum::Json(request): axum::Json<BidRequest>,
) -> Response {
    let id = BookingId(booking_id);
    match marketplace
        .lifecycle()
        .submit_bid(&actor, &id, request.price_cents)
    {
        Ok(outcome) => {
            let view = publish_view(&marketplace, &outcome, &outcome.events);
            (StatusCode::CREATED, axum::Json(view)).into_response()
        }
        Err(err) => lifecycle_error_response(err),
    }
}

async fn accept_bid(
    State(marketplace): State<Arc<Marketplace>>,
    actor: Actor,
    Path(bid_id): Path<String>,
) -> Response {
    let id = BidId(bid_id);
    booking_response(&marketplace, marketplace.lifecycle().accept_bid(&actor, &id))
}

async fn withdraw_bid(
    State(marketplace): State<Arc<Marketplace>>,
    actor: Actor,
    Path(bid_id): Path<String>,
) -> Response {
    let id = BidId(bid_id);
    booking_response(&marketplace, marketplace.lifecycle().withdraw_bid(&actor, &id))
}

async fn start_booking(
    State(marketplace): State<Arc<Marketplace>>,
    actor: Actor,
    Path(booking_id): Path<String>,
) -> Response {
    let id = BookingId(booking_id);
    booking_response(&marketplace, marketplace.lifecycle().start_booking(&actor, &id))
}

async fn complete_booking(
    State(marketplace): State<Arc<Marketplace>>,
    actor: Actor,
    Path(booking_id): Path<String>,
) -> Response {
    let id = BookingId(booking_id);
    booking_response(
        &marketplace,
        marketplace.lifecycle().complete_booking(&actor, &id),
    )
}

async fn cancel_booking(
    State(marketplace): State<Arc<Marketplace>>,
    actor: Actor,
    Path(booking_id): Path<String>,
) -> Response {
    let id = BookingId(booking_id);
    booking_response(&marketplace, marketplace.lifecycle().cancel_booking(&actor, &id))
}

async fn reschedule_booking(
    State(marketplace): State<Arc<Marketplace>>,
    actor: Actor,
    Path(booking_id): Path<String>,
    axum::Json(request): axum::Json<RescheduleRequest>,
) -> Response {
    let id = BookingId(booking_id);
    booking_response(
        &marketplace,
        marketplace
            .lifecycle()
            .reschedule_booking(&actor, &id, request.scheduled_at),
    )
}

async fn record_payment(
    State(marketplace): State<Arc<Marketplace>>,
    actor: Actor,
    Path(booking_id): Path<String>,
    axum::Json(notice): axum::Json<PaymentNotice>,
) -> Response {
    let id = BookingId(booking_id);
    match marketplace.lifecycle().record_payment(&actor, &id, notice) {
        Ok(outcome) => {
            let view = publish_view(&marketplace, json!({ "booking_id": id }), &outcome.events);
            (StatusCode::ACCEPTED, axum::Json(view)).into_response()
        }
        Err(err) => lifecycle_error_response(err),
    }
}

async fn submit_review(
    State(marketplace): State<Arc<Marketplace>>,
    actor: Actor,
    axum::Json(draft): axum::Json<ReviewDraft>,
) -> Response {
    match marketplace.lifecycle().submit_review(&actor, draft) {
        Ok(outcome) => {
            let view = publish_view(&marketplace, &outcome, &outcome.events);
            (StatusCode::CREATED, axum::Json(view)).into_response()
        }
        Err(err) => lifecycle_error_response(err),
    }
}

async fn moderate_review(
    State(marketplace): State<Arc<Marketplace>>,
    actor: Actor,
    Path(review_id): Path<String>,
    axum::Json(request): axum::Json<ModerationRequest>,
) -> Response {
    let id = ReviewId(review_id);
    match marketplace
        .lifecycle()
        .moderate_review(&actor, &id, request.decision)
    {
        Ok(outcome) => {
            let view = publish_view(&marketplace, &outcome, &outcome.events);
            (StatusCode::OK, axum::Json(view)).into_response()
        }
        Err(err) => lifecycle_error_response(err),
    }
}

async fn respond_to_review(
    State(marketplace): State<Arc<Marketplace>>,
    actor: Actor,
    Path(review_id): Path<String>,
    axum::Json(request): axum::Json<ResponseRequest>,
) -> Response {
    let id = ReviewId(review_id);
    match marketplace
        .lifecycle()
        .respond_to_review(&actor, &id, &request.text)
    {
        Ok(outcome) => {
            let view = publish_view(&marketplace, &outcome, &outcome.events);
            (StatusCode::OK, axum::Json(view)).into_response()
        }
        Err(err) => lifecycle_error_response(err),
    }
}

async fn customer_stats(
    State(marketplace): State<Arc<Marketplace>>,
    actor: Actor,
    Path(customer_id): Path<String>,
) -> Response {
    if !actor.is_admin() && actor.id != customer_id {
        return error_response(StatusCode::FORBIDDEN, "stats belong to another customer");
    }

    match marketplace.stats().stats(&customer_id) {
        Ok(stats) => (StatusCode::OK, axum::Json(stats)).into_response(),
        Err(StatsError::Repository(err)) => repository_error_response(err),
        Err(other) => error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

async fn announce(
    State(marketplace): State<Arc<Marketplace>>,
    actor: Actor,
    axum::Json(request): axum::Json<AnnouncementRequest>,
) -> Response {
    match marketplace.announce(&actor, &request.headline, &request.body, request.priority) {
        Ok(created) => (
            StatusCode::CREATED,
            axum::Json(json!({ "notifications": created.len() })),
        )
            .into_response(),
        Err(AnnouncementError::Forbidden) => {
            error_response(StatusCode::FORBIDDEN, AnnouncementError::Forbidden.to_string())
        }
        Err(AnnouncementError::Dispatch(DispatchError::Catalog(err))) => {
            error_response(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
        }
        Err(AnnouncementError::Dispatch(DispatchError::Repository(err))) => {
            repository_error_response(err)
        }
        Err(other) => error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

fn booking_response(
    marketplace: &Marketplace,
    result: Result<BookingOutcome, LifecycleError>,
) -> Response {
    match result {
        Ok(outcome) => {
            let view = publish_view(marketplace, &outcome, &outcome.events);
            (StatusCode::OK, axum::Json(view)).into_response()
        }
        Err(err) => lifecycle_error_response(err),
    }
}

pub(crate) fn lifecycle_status(err: &LifecycleError) -> StatusCode {
    match err {
        LifecycleError::InvalidTransition { .. }
        | LifecycleError::DuplicateReview { .. }
        | LifecycleError::Conflict(_) => StatusCode::CONFLICT,
        LifecycleError::Forbidden(_) => StatusCode::FORBIDDEN,
        LifecycleError::NotFound { .. } => StatusCode::NOT_FOUND,
        LifecycleError::InvalidRating(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LifecycleError::Repository(err) => repository_status(err),
    }
}

fn repository_status(err: &RepositoryError) -> StatusCode {
    match err {
        RepositoryError::Conflict => StatusCode::CONFLICT,
        RepositoryError::NotFound => StatusCode::NOT_FOUND,
        RepositoryError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn lifecycle_error_response(err: LifecycleError) -> Response {
    error_response(lifecycle_status(&err), err.to_string())
}

fn repository_error_response(err: RepositoryError) -> Response {
    error_response(repository_status(&err), err.to_string())
}

fn notification_error_response(err: NotificationError) -> Response {
    match err {
        NotificationError::NotFound(_) => error_response(StatusCode::NOT_FOUND, err.to_string()),
        NotificationError::Forbidden(_) => error_response(StatusCode::FORBIDDEN, err.to_string()),
        NotificationError::Repository(err) => repository_error_response(err),
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let payload = json!({
        "error": message.into(),
    });
    (status, axum::Json(payload)).into_response()
}
