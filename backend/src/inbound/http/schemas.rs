//! Shared OpenAPI schema types.

use serde::Serialize;
use utoipa::ToSchema;

/// Error envelope returned by every failing endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorSchema {
    #[schema(example = "invalid_request")]
    pub error: String,
    #[schema(example = "subject is required")]
    pub message: String,
}

/// Pagination block attached to every listing response.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}
