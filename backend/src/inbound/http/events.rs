//! Event API handlers.
//!
//! ```text
//! GET  /api/v1/events
//! GET  /api/v1/events/stats
//! GET  /api/v1/events/{messageId}
//! POST /api/v1/events
//! ```

use std::collections::BTreeMap;
use std::str::FromStr;

use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::events::{EmailEvent, EventFilter, EventStats, EventType, ExternalEvent};

use super::auth::Authenticated;
use super::error::ApiResult;
use super::schemas::{ErrorSchema, Pagination};
use super::state::HttpState;
use super::validation::{parse_optional_rfc3339_timestamp, FieldName};

/// Query parameters for the event listing.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct EventListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub event_type: Option<String>,
    pub recipient_email: Option<String>,
    pub message_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl EventListQuery {
    fn into_filter(self) -> Result<EventFilter, crate::domain::Error> {
        let event_type = self
            .event_type
            .as_deref()
            .map(EventType::from_str)
            .transpose()?;
        Ok(EventFilter {
            page: self.page.unwrap_or(1),
            limit: self.limit.unwrap_or(EventFilter::DEFAULT_LIMIT),
            event_type,
            recipient_email: self.recipient_email,
            message_id: self.message_id,
            start_date: parse_optional_rfc3339_timestamp(
                self.start_date.as_deref(),
                FieldName::new("startDate"),
            )?,
            end_date: parse_optional_rfc3339_timestamp(
                self.end_date.as_deref(),
                FieldName::new("endDate"),
            )?,
        })
    }
}

/// One page of events.
#[derive(Debug, Serialize, ToSchema)]
pub struct EventListResponse {
    pub data: Vec<EmailEvent>,
    pub pagination: Pagination,
}

/// Events for one message, grouped by recipient.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageEventsResponse {
    pub message_id: String,
    pub recipients: BTreeMap<String, Vec<EmailEvent>>,
}

/// Date range for the stats endpoint.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// Acknowledgement for an ingested event.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub success: bool,
    pub event_id: String,
}

/// List the tenant's events, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/events",
    params(EventListQuery),
    responses(
        (status = 200, description = "Event page", body = EventListResponse),
        (status = 400, description = "Bad filter", body = ErrorSchema),
        (status = 401, description = "Unauthorised", body = ErrorSchema)
    ),
    security(("bearer_key" = [])),
    tags = ["events"],
    operation_id = "listEvents"
)]
#[get("/events")]
pub async fn list_events(
    auth: Authenticated,
    state: web::Data<HttpState>,
    query: web::Query<EventListQuery>,
) -> ApiResult<web::Json<EventListResponse>> {
    let filter = query.into_inner().into_filter()?;
    let page = state.events.list(&auth.0.user.id, filter).await?;
    Ok(web::Json(EventListResponse {
        data: page.data,
        pagination: Pagination {
            page: page.page,
            limit: page.limit,
            total: page.total,
            total_pages: page.total_pages,
        },
    }))
}

/// Aggregate counts and rates.
#[utoipa::path(
    get,
    path = "/api/v1/events/stats",
    params(StatsQuery),
    responses(
        (status = 200, description = "Counts and delivery rates", body = EventStats),
        (status = 401, description = "Unauthorised", body = ErrorSchema)
    ),
    security(("bearer_key" = [])),
    tags = ["events"],
    operation_id = "eventStats"
)]
#[get("/events/stats")]
pub async fn event_stats(
    auth: Authenticated,
    state: web::Data<HttpState>,
    query: web::Query<StatsQuery>,
) -> ApiResult<web::Json<EventStats>> {
    let query = query.into_inner();
    let start = parse_optional_rfc3339_timestamp(
        query.start_date.as_deref(),
        FieldName::new("startDate"),
    )?;
    let end =
        parse_optional_rfc3339_timestamp(query.end_date.as_deref(), FieldName::new("endDate"))?;
    let stats = state.events.stats(&auth.0.user.id, start, end).await?;
    Ok(web::Json(stats))
}

/// Every event for one message, grouped by recipient.
#[utoipa::path(
    get,
    path = "/api/v1/events/{messageId}",
    params(("messageId" = String, Path, description = "Message identifier")),
    responses(
        (status = 200, description = "Events grouped by recipient", body = MessageEventsResponse),
        (status = 404, description = "Unknown message", body = ErrorSchema)
    ),
    security(("bearer_key" = [])),
    tags = ["events"],
    operation_id = "eventsForMessage"
)]
#[get("/events/{message_id}")]
pub async fn events_for_message(
    auth: Authenticated,
    state: web::Data<HttpState>,
    path: web::Path<String>,
) -> ApiResult<web::Json<MessageEventsResponse>> {
    let message_id = path.into_inner();
    let recipients = state.events.for_message(&auth.0.user.id, &message_id).await?;
    Ok(web::Json(MessageEventsResponse {
        message_id,
        recipients,
    }))
}

/// Ingest an externally observed event (bounce, complaint, unsubscribe, …).
#[utoipa::path(
    post,
    path = "/api/v1/events",
    request_body = ExternalEvent,
    responses(
        (status = 201, description = "Event recorded", body = IngestResponse),
        (status = 400, description = "Unknown event type", body = ErrorSchema),
        (status = 401, description = "Unauthorised", body = ErrorSchema)
    ),
    security(("bearer_key" = [])),
    tags = ["events"],
    operation_id = "ingestEvent"
)]
#[post("/events")]
pub async fn ingest_event(
    auth: Authenticated,
    state: web::Data<HttpState>,
    body: web::Json<ExternalEvent>,
) -> ApiResult<HttpResponse> {
    let event_id = state.events.ingest(&auth.0, body.into_inner()).await?;
    Ok(HttpResponse::Created().json(IngestResponse {
        success: true,
        event_id,
    }))
}
