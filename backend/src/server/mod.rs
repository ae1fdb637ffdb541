//! Route registration and service wiring.

pub mod config;

use std::sync::Arc;

use actix_web::web;

use crate::domain::auth::AuthService;
use crate::domain::events::EventService;
use crate::domain::ports::JobQueue;
use crate::domain::send::SendService;
use crate::domain::suppression::SuppressionService;
use crate::domain::template::TemplateRenderer;
use crate::domain::tracking::TrackingIngress;
use crate::inbound::http::{events, health, identity, send, state::HttpState, suppressions, tracking};
use crate::outbound::persistence::{
    DbPool, DieselApiKeyRepository, DieselBillingRepository, DieselEventRepository,
    DieselSuppressionRepository, DieselTemplateRepository, DieselTrackingRepository,
};

use self::config::AppConfig;

/// Register every HTTP route.
///
/// Literal segments (`/events/stats`, `/suppressions/check`) are registered
/// ahead of their dynamic siblings so they win the match.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(identity::me)
            .service(send::send)
            .service(events::event_stats)
            .service(events::list_events)
            .service(events::ingest_event)
            .service(events::events_for_message)
            .service(suppressions::check_suppression)
            .service(suppressions::suppression_stats)
            .service(suppressions::list_suppressions)
            .service(suppressions::create_suppression)
            .service(suppressions::delete_suppression),
    )
    .service(tracking::open_pixel)
    .service(tracking::click_redirect)
    .service(health::health);
}

/// Wire the HTTP state against the Postgres pool and the job queue.
pub fn build_http_state(pool: DbPool, queue: Arc<dyn JobQueue>, config: &AppConfig) -> HttpState {
    let events_repo = Arc::new(DieselEventRepository::new(pool.clone()));
    let tracking_repo = Arc::new(DieselTrackingRepository::new(pool.clone()));
    let suppressions =
        SuppressionService::new(Arc::new(DieselSuppressionRepository::new(pool.clone())));

    let send = SendService::new(
        TemplateRenderer::new(Arc::new(DieselTemplateRepository::new(pool.clone()))),
        suppressions.clone(),
        events_repo.clone(),
        tracking_repo.clone(),
        Arc::new(DieselBillingRepository::new(pool.clone())),
        queue,
        config.rewrite_config(),
    );
    let event_service = EventService::new(events_repo.clone(), suppressions.clone());
    let tracking = TrackingIngress::new(tracking_repo, events_repo);
    let auth = AuthService::new(Arc::new(DieselApiKeyRepository::new(pool)));

    HttpState::new(auth, send, event_service, suppressions, tracking)
}
