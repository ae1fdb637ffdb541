//! Request tracing: every request gets an opaque trace id.
//!
//! The id is held in task-local storage for the lifetime of the request so
//! the HTTP error mapper can stamp it into failure payloads, and it is echoed
//! to the client in a `Trace-Id` response header. Trace ids reuse the
//! service's opaque-id alphabet rather than UUIDs so they read like the
//! tracking and job identifiers a tenant already sees.

use std::task::{Context, Poll};

use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::Error;
use futures_util::future::{ready, LocalBoxFuture, Ready};
use tokio::task_local;
use tracing::info_span;

use crate::domain::ids::opaque_id;

/// Trace ids are half the length of tracking ids; they only need to be
/// unique within a log-retention window.
const TRACE_ID_LEN: usize = 12;

/// Response header carrying the request's trace id.
pub const TRACE_ID_HEADER: &str = "trace-id";

task_local! {
    static TRACE_ID: String;
}

/// Trace identifier for the current request, when called inside one.
///
/// Returns `None` outside a request scope (startup, background tasks, the
/// delivery worker).
pub fn current_trace_id() -> Option<String> {
    TRACE_ID.try_with(String::clone).ok()
}

/// Middleware assigning each request an opaque trace id.
///
/// Failure payloads produced by the error mapper pick the id up via
/// [`current_trace_id`], so a client-reported `traceId` finds the matching
/// log lines.
///
/// # Examples
/// ```
/// use actix_web::App;
/// use backend::RequestTrace;
///
/// let app = App::new().wrap(RequestTrace);
/// ```
#[derive(Clone)]
pub struct RequestTrace;

impl<S, B> Transform<S, ServiceRequest> for RequestTrace
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestTraceMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestTraceMiddleware { service }))
    }
}

/// Service wrapper produced by [`RequestTrace`]; not used directly.
pub struct RequestTraceMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestTraceMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let trace_id = opaque_id(TRACE_ID_LEN);
        let span = info_span!(
            "http_request",
            trace_id = %trace_id,
            method = %req.method(),
            path = %req.path(),
        );
        // Alphanumeric ids are always valid header values.
        let header_value =
            HeaderValue::from_str(&trace_id).expect("opaque id is a valid header value");
        let fut = self.service.call(req);

        Box::pin(TRACE_ID.scope(trace_id, async move {
            let _guard = span.enter();
            let mut res = fut.await?;
            res.headers_mut()
                .insert(HeaderName::from_static(TRACE_ID_HEADER), header_value);
            Ok(res)
        }))
    }
}
