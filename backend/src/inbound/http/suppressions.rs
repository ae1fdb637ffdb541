//! Suppression API handlers.
//!
//! ```text
//! GET    /api/v1/suppressions
//! GET    /api/v1/suppressions/check
//! GET    /api/v1/suppressions/stats
//! POST   /api/v1/suppressions
//! DELETE /api/v1/suppressions/{id}
//! ```

use std::str::FromStr;

use actix_web::{delete, get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

use crate::domain::email::normalize_address;
use crate::domain::suppression::{
    AddSuppression, Suppression, SuppressionFilter, SuppressionReason, SuppressionStats,
};
use crate::domain::Error;

use super::auth::Authenticated;
use super::error::ApiResult;
use super::schemas::{ErrorSchema, Pagination};
use super::state::HttpState;

/// Query parameters for the suppression listing.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct SuppressionListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub reason: Option<String>,
    pub email: Option<String>,
    pub domain_id: Option<String>,
}

/// One page of suppressions.
#[derive(Debug, Serialize, ToSchema)]
pub struct SuppressionListResponse {
    pub data: Vec<Suppression>,
    pub pagination: Pagination,
}

/// Query parameter for the check endpoint.
#[derive(Debug, Deserialize, IntoParams)]
pub struct CheckQuery {
    pub email: String,
}

/// Whether one address is currently blocked.
#[derive(Debug, Serialize, ToSchema)]
pub struct CheckResponse {
    pub email: String,
    pub suppressed: bool,
}

/// Request payload for a manual suppression.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSuppressionBody {
    pub email: String,
    pub reason: String,
    #[serde(default)]
    pub domain_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Acknowledgement for a deletion.
#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteResponse {
    pub success: bool,
}

/// List the tenant's suppressions.
#[utoipa::path(
    get,
    path = "/api/v1/suppressions",
    params(SuppressionListQuery),
    responses(
        (status = 200, description = "Suppression page", body = SuppressionListResponse),
        (status = 400, description = "Bad filter", body = ErrorSchema),
        (status = 401, description = "Unauthorised", body = ErrorSchema)
    ),
    security(("bearer_key" = [])),
    tags = ["suppressions"],
    operation_id = "listSuppressions"
)]
#[get("/suppressions")]
pub async fn list_suppressions(
    auth: Authenticated,
    state: web::Data<HttpState>,
    query: web::Query<SuppressionListQuery>,
) -> ApiResult<web::Json<SuppressionListResponse>> {
    let query = query.into_inner();
    let reason = query
        .reason
        .as_deref()
        .map(SuppressionReason::from_str)
        .transpose()?;
    let filter = SuppressionFilter {
        page: query.page.unwrap_or(1),
        limit: query.limit.unwrap_or(SuppressionFilter::DEFAULT_LIMIT),
        reason,
        email: query.email,
        domain_id: query.domain_id,
    };
    let page = state.suppressions.list(&auth.0.user.id, filter).await?;
    Ok(web::Json(SuppressionListResponse {
        data: page.data,
        pagination: Pagination {
            page: page.page,
            limit: page.limit,
            total: page.total,
            total_pages: page.total_pages,
        },
    }))
}

/// Check one address against the blocklist.
#[utoipa::path(
    get,
    path = "/api/v1/suppressions/check",
    params(CheckQuery),
    responses(
        (status = 200, description = "Suppression verdict", body = CheckResponse),
        (status = 401, description = "Unauthorised", body = ErrorSchema)
    ),
    security(("bearer_key" = [])),
    tags = ["suppressions"],
    operation_id = "checkSuppression"
)]
#[get("/suppressions/check")]
pub async fn check_suppression(
    auth: Authenticated,
    state: web::Data<HttpState>,
    query: web::Query<CheckQuery>,
) -> ApiResult<web::Json<CheckResponse>> {
    let email = normalize_address(&query.email);
    if email.is_empty() {
        return Err(Error::invalid_request("email is required").into());
    }
    let blocked = state
        .suppressions
        .check(&auth.0.user.id, std::slice::from_ref(&email), None)
        .await?;
    Ok(web::Json(CheckResponse {
        suppressed: blocked.contains(&email),
        email,
    }))
}

/// Per-reason suppression counts.
#[utoipa::path(
    get,
    path = "/api/v1/suppressions/stats",
    responses(
        (status = 200, description = "Counts grouped by reason", body = SuppressionStats),
        (status = 401, description = "Unauthorised", body = ErrorSchema)
    ),
    security(("bearer_key" = [])),
    tags = ["suppressions"],
    operation_id = "suppressionStats"
)]
#[get("/suppressions/stats")]
pub async fn suppression_stats(
    auth: Authenticated,
    state: web::Data<HttpState>,
) -> ApiResult<web::Json<SuppressionStats>> {
    let stats = state.suppressions.stats(&auth.0.user.id).await?;
    Ok(web::Json(stats))
}

/// Add an address to the suppression list.
#[utoipa::path(
    post,
    path = "/api/v1/suppressions",
    request_body = CreateSuppressionBody,
    responses(
        (status = 201, description = "Suppression stored", body = Suppression),
        (status = 400, description = "Unknown reason or bad email", body = ErrorSchema),
        (status = 401, description = "Unauthorised", body = ErrorSchema)
    ),
    security(("bearer_key" = [])),
    tags = ["suppressions"],
    operation_id = "createSuppression"
)]
#[post("/suppressions")]
pub async fn create_suppression(
    auth: Authenticated,
    state: web::Data<HttpState>,
    body: web::Json<CreateSuppressionBody>,
) -> ApiResult<HttpResponse> {
    let body = body.into_inner();
    let reason = SuppressionReason::from_str(&body.reason)?;
    let row = state
        .suppressions
        .add(AddSuppression {
            user_id: auth.0.user.id.clone(),
            email: body.email,
            reason,
            source_event_id: None,
            domain_id: body.domain_id,
            metadata: body.metadata,
        })
        .await?;
    Ok(HttpResponse::Created().json(row))
}

/// Remove a suppression the tenant owns.
#[utoipa::path(
    delete,
    path = "/api/v1/suppressions/{id}",
    params(("id" = String, Path, description = "Suppression identifier")),
    responses(
        (status = 200, description = "Suppression removed", body = DeleteResponse),
        (status = 404, description = "Unknown suppression", body = ErrorSchema)
    ),
    security(("bearer_key" = [])),
    tags = ["suppressions"],
    operation_id = "deleteSuppression"
)]
#[delete("/suppressions/{id}")]
pub async fn delete_suppression(
    auth: Authenticated,
    state: web::Data<HttpState>,
    path: web::Path<String>,
) -> ApiResult<web::Json<DeleteResponse>> {
    state
        .suppressions
        .remove(&auth.0.user.id, &path.into_inner())
        .await?;
    Ok(web::Json(DeleteResponse { success: true }))
}
