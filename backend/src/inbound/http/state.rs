//! Shared HTTP adapter state.
//!
//! Handlers receive this via `actix_web::web::Data` and depend only on domain
//! services, keeping them testable against in-memory ports. Per-request
//! authentication context travels through extractor arguments, never through
//! process-global storage.

use crate::domain::auth::AuthService;
use crate::domain::events::EventService;
use crate::domain::send::SendService;
use crate::domain::suppression::SuppressionService;
use crate::domain::tracking::TrackingIngress;

/// Dependency bundle for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub auth: AuthService,
    pub send: SendService,
    pub events: EventService,
    pub suppressions: SuppressionService,
    pub tracking: TrackingIngress,
}

impl HttpState {
    /// Construct state from explicit service instances.
    pub fn new(
        auth: AuthService,
        send: SendService,
        events: EventService,
        suppressions: SuppressionService,
        tracking: TrackingIngress,
    ) -> Self {
        Self {
            auth,
            send,
            events,
            suppressions,
            tracking,
        }
    }
}
