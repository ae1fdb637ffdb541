//! Identity echo for API key smoke tests.
//!
//! ```text
//! GET /api/v1/me
//! ```

use actix_web::{get, web};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::auth::{ApiKeyRecord, DomainRecord, UserRecord};

use super::auth::Authenticated;
use super::error::ApiResult;
use super::schemas::ErrorSchema;

/// The caller's resolved identity.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user: UserRecord,
    pub domain: DomainRecord,
    pub api_key: ApiKeyRecord,
}

/// Echo the authenticated tenancy context.
#[utoipa::path(
    get,
    path = "/api/v1/me",
    responses(
        (status = 200, description = "Resolved identity", body = MeResponse),
        (status = 401, description = "Unauthorised", body = ErrorSchema),
        (status = 403, description = "Domain not verified", body = ErrorSchema)
    ),
    security(("bearer_key" = [])),
    tags = ["identity"],
    operation_id = "me"
)]
#[get("/me")]
pub async fn me(auth: Authenticated) -> ApiResult<web::Json<MeResponse>> {
    let context = auth.0;
    Ok(web::Json(MeResponse {
        user: context.user,
        domain: context.domain,
        api_key: context.api_key,
    }))
}
