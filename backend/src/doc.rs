//! OpenAPI documentation setup.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::domain::auth::{ApiKeyRecord, DomainRecord, UserRecord};
use crate::domain::events::{EmailEvent, EventStats, EventType, ExternalEvent};
use crate::domain::suppression::{Suppression, SuppressionReason, SuppressionStats};
use crate::inbound::http::schemas::{ErrorSchema, Pagination};

/// Enrich the generated document with the Bearer key security scheme.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi
            .components
            .get_or_insert_with(utoipa::openapi::Components::default);

        components.add_security_scheme(
            "bearer_key",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI document for the REST API.
/// Swagger UI is enabled in debug builds only and used by tooling.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Transactional email API",
        description = "Send pipeline: authenticated sends, lifecycle events, \
                       suppressions, and tracking ingress."
    ),
    servers(
        (url = "/", description = "Relative to the deployment base URL")
    ),
    security(("bearer_key" = [])),
    paths(
        crate::inbound::http::health::health,
        crate::inbound::http::identity::me,
        crate::inbound::http::send::send,
        crate::inbound::http::events::list_events,
        crate::inbound::http::events::event_stats,
        crate::inbound::http::events::events_for_message,
        crate::inbound::http::events::ingest_event,
        crate::inbound::http::suppressions::list_suppressions,
        crate::inbound::http::suppressions::check_suppression,
        crate::inbound::http::suppressions::suppression_stats,
        crate::inbound::http::suppressions::create_suppression,
        crate::inbound::http::suppressions::delete_suppression,
        crate::inbound::http::tracking::open_pixel,
        crate::inbound::http::tracking::click_redirect,
    ),
    components(schemas(
        ApiKeyRecord,
        DomainRecord,
        UserRecord,
        EmailEvent,
        EventStats,
        EventType,
        ExternalEvent,
        Suppression,
        SuppressionReason,
        SuppressionStats,
        ErrorSchema,
        Pagination,
    )),
    tags(
        (name = "send", description = "Accept messages for delivery"),
        (name = "events", description = "Lifecycle event stream"),
        (name = "suppressions", description = "Recipient blocklist"),
        (name = "tracking", description = "Open and click ingress"),
        (name = "identity", description = "API key introspection"),
        (name = "health", description = "Process health")
    )
)]
pub struct ApiDoc;
