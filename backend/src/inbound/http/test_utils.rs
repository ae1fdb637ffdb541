//! Harness for HTTP handler tests: every service wired to in-memory ports.

use std::sync::Arc;

use crate::domain::auth::{AuthContext, AuthService};
use crate::domain::events::EventService;
use crate::domain::rewrite::RewriteConfig;
use crate::domain::send::SendService;
use crate::domain::suppression::tests::InMemorySuppressions;
use crate::domain::suppression::SuppressionService;
use crate::domain::template::TemplateRenderer;
use crate::domain::test_support::{
    test_context, FixtureTemplates, InMemoryApiKeys, InMemoryBilling, InMemoryEvents,
    InMemoryTracking, RecordingQueue,
};
use crate::domain::tracking::TrackingIngress;

use super::state::HttpState;

/// Raw API key the fixture key store accepts.
pub(crate) const TEST_API_KEY: &str = "sk-test";

/// Bearer header for [`TEST_API_KEY`].
pub(crate) fn bearer() -> (&'static str, String) {
    ("Authorization", format!("Bearer {TEST_API_KEY}"))
}

/// Handles onto the fixtures behind a test [`HttpState`].
pub(crate) struct TestHarness {
    pub state: HttpState,
    pub events: Arc<InMemoryEvents>,
    pub tracking_rows: Arc<InMemoryTracking>,
    pub billing: Arc<InMemoryBilling>,
    pub queue: Arc<RecordingQueue>,
    pub suppressions: SuppressionService,
}

/// Harness authenticating [`TEST_API_KEY`] to the default test tenant.
pub(crate) fn harness() -> TestHarness {
    harness_with_context(test_context())
}

/// Harness with a custom tenancy context behind the test key.
pub(crate) fn harness_with_context(context: AuthContext) -> TestHarness {
    let keys = Arc::new(InMemoryApiKeys::with_key(TEST_API_KEY, context));
    let events = Arc::new(InMemoryEvents::default());
    let tracking_rows = Arc::new(InMemoryTracking::default());
    let billing = Arc::new(InMemoryBilling::default());
    billing.seed("bill-1", "u1", 100, 0);
    let queue = Arc::new(RecordingQueue::default());
    let suppressions = SuppressionService::new(Arc::new(InMemorySuppressions::default()));

    let send = SendService::new(
        TemplateRenderer::new(Arc::new(FixtureTemplates)),
        suppressions.clone(),
        events.clone(),
        tracking_rows.clone(),
        billing.clone(),
        queue.clone(),
        RewriteConfig {
            base_url: "http://localhost:3001".into(),
            open_tracking: true,
            click_tracking: true,
        },
    );
    let event_service = EventService::new(events.clone(), suppressions.clone());
    let tracking = TrackingIngress::new(tracking_rows.clone(), events.clone());
    let state = HttpState::new(
        AuthService::new(keys),
        send,
        event_service,
        suppressions.clone(),
        tracking,
    );

    TestHarness {
        state,
        events,
        tracking_rows,
        billing,
        queue,
        suppressions,
    }
}
