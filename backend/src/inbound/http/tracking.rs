//! Tracking ingress: open pixel and click redirect.
//!
//! ```text
//! GET /t/o/{id}
//! GET /t/c/{id}
//! ```
//!
//! No authentication: the ids are unguessable capability tokens. The pixel
//! always serves its GIF; only a click on an unknown id produces an error.

use actix_web::http::header::{CACHE_CONTROL, EXPIRES, LOCATION, PRAGMA, USER_AGENT};
use actix_web::{get, web, HttpRequest, HttpResponse};

use crate::domain::ids::TRANSPARENT_GIF;
use crate::domain::tracking::ClientInfo;
use crate::domain::Error;

use super::error::{ApiError, ApiResult};
use super::state::HttpState;

const NO_STORE: &str = "no-store, no-cache, must-revalidate";

/// First client address from the proxy headers, if any.
fn client_info(req: &HttpRequest) -> ClientInfo {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    let real_ip = req
        .headers()
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok());
    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok());
    ClientInfo::from_raw(forwarded.or(real_ip), user_agent)
}

/// Open pixel. Serves the GIF no matter what.
#[utoipa::path(
    get,
    path = "/t/o/{id}",
    params(("id" = String, Path, description = "Open tracking identifier")),
    responses((status = 200, description = "1×1 transparent GIF", content_type = "image/gif")),
    tags = ["tracking"],
    operation_id = "openPixel"
)]
#[get("/t/o/{id}")]
pub async fn open_pixel(
    state: web::Data<HttpState>,
    path: web::Path<String>,
    req: HttpRequest,
) -> HttpResponse {
    state
        .tracking
        .record_open(&path.into_inner(), client_info(&req))
        .await;

    HttpResponse::Ok()
        .content_type("image/gif")
        .insert_header((CACHE_CONTROL, NO_STORE))
        .insert_header((PRAGMA, "no-cache"))
        .insert_header((EXPIRES, "0"))
        .body(TRANSPARENT_GIF.to_vec())
}

/// Click redirect to the original URL.
#[utoipa::path(
    get,
    path = "/t/c/{id}",
    params(("id" = String, Path, description = "Click tracking identifier")),
    responses(
        (status = 302, description = "Redirect to the original URL"),
        (status = 404, description = "Unknown link")
    ),
    tags = ["tracking"],
    operation_id = "clickRedirect"
)]
#[get("/t/c/{id}")]
pub async fn click_redirect(
    state: web::Data<HttpState>,
    path: web::Path<String>,
    req: HttpRequest,
) -> ApiResult<HttpResponse> {
    let target = state
        .tracking
        .record_click(&path.into_inner(), client_info(&req))
        .await
        .ok_or_else(|| ApiError::from(Error::not_found("tracking link not found")))?;

    Ok(HttpResponse::Found()
        .insert_header((LOCATION, target))
        .insert_header((CACHE_CONTROL, NO_STORE))
        .insert_header((PRAGMA, "no-cache"))
        .finish())
}
