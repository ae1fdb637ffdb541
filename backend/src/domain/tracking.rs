//! Open and click tracking rows plus the ingress logic behind the pixel and
//! redirect endpoints.
//!
//! Ingress is deliberately forgiving: the pixel always serves and the
//! redirect resolves whenever the link row can be read. Counter bumps and
//! first-touch event rows are best-effort; their failures are logged and
//! swallowed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::warn;

use super::events::{EventType, NewEmailEvent};
use super::ports::{EventRepository, TrackingRepository};

/// Maximum stored length of a client IP (fits an IPv6 literal).
pub const MAX_IP_LEN: usize = 45;
/// Maximum stored length of a user agent string.
pub const MAX_USER_AGENT_LEN: usize = 500;

/// One open-tracking row; one exists per (message, recipient).
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingOpen {
    pub id: String,
    pub user_id: String,
    pub message_id: String,
    pub recipient_email: String,
    pub sending_domain: String,
    pub opened_at: Option<DateTime<Utc>>,
    pub open_count: i32,
    pub created_at: DateTime<Utc>,
}

/// Open row pending insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrackingOpen {
    pub id: String,
    pub user_id: String,
    pub message_id: String,
    pub recipient_email: String,
    pub sending_domain: String,
    pub created_at: DateTime<Utc>,
}

/// One click-tracking row; one exists per distinct URL in a message.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingLink {
    pub id: String,
    pub user_id: String,
    pub message_id: String,
    pub recipient_email: String,
    pub sending_domain: String,
    pub original_url: String,
    pub clicked_at: Option<DateTime<Utc>>,
    pub click_count: i32,
    pub created_at: DateTime<Utc>,
}

/// Link row pending insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrackingLink {
    pub id: String,
    pub user_id: String,
    pub message_id: String,
    pub recipient_email: String,
    pub sending_domain: String,
    pub original_url: String,
    pub created_at: DateTime<Utc>,
}

/// Client details captured from tracking requests, pre-truncated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    /// Build from raw header values, truncating to the stored column widths.
    pub fn from_raw(ip: Option<&str>, user_agent: Option<&str>) -> Self {
        Self {
            ip_address: ip
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| truncate(v, MAX_IP_LEN)),
            user_agent: user_agent
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| truncate(v, MAX_USER_AGENT_LEN)),
        }
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

/// First-touch event emission and counter bumps for tracking hits.
#[derive(Clone)]
pub struct TrackingIngress {
    tracking: Arc<dyn TrackingRepository>,
    events: Arc<dyn EventRepository>,
}

impl TrackingIngress {
    pub fn new(tracking: Arc<dyn TrackingRepository>, events: Arc<dyn EventRepository>) -> Self {
        Self { tracking, events }
    }

    /// Record a pixel hit. Never fails; the caller serves the GIF regardless.
    pub async fn record_open(&self, id: &str, client: ClientInfo) {
        let row = match self.tracking.find_open(id).await {
            Ok(Some(row)) => row,
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, tracking_id = id, "open lookup failed");
                return;
            }
        };

        let first_touch = row.opened_at.is_none();
        let new_count = match self.tracking.record_open(id, first_touch, Utc::now()).await {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %err, tracking_id = id, "open counter update failed");
                return;
            }
        };

        if first_touch {
            let event = NewEmailEvent::new(
                &row.user_id,
                &row.message_id,
                EventType::Opened,
                &row.recipient_email,
                &row.sending_domain,
            )
            .with_metadata(json!({ "trackingId": id, "openCount": new_count }))
            .with_client(client.ip_address, client.user_agent);
            if let Err(err) = self.events.insert(&event).await {
                warn!(error = %err, tracking_id = id, "opened event insert failed");
            }
        }
    }

    /// Record a click hit; returns the redirect target when the link exists.
    pub async fn record_click(&self, id: &str, client: ClientInfo) -> Option<String> {
        let row = match self.tracking.find_link(id).await {
            Ok(Some(row)) => row,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, tracking_id = id, "link lookup failed");
                return None;
            }
        };

        let first_touch = row.clicked_at.is_none();
        match self.tracking.record_click(id, first_touch, Utc::now()).await {
            Ok(new_count) => {
                if first_touch {
                    let event = NewEmailEvent::new(
                        &row.user_id,
                        &row.message_id,
                        EventType::Clicked,
                        &row.recipient_email,
                        &row.sending_domain,
                    )
                    .with_metadata(json!({
                        "trackingId": id,
                        "originalUrl": row.original_url,
                        "clickCount": new_count,
                    }))
                    .with_client(client.ip_address, client.user_agent);
                    if let Err(err) = self.events.insert(&event).await {
                        warn!(error = %err, tracking_id = id, "clicked event insert failed");
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, tracking_id = id, "click counter update failed");
            }
        }

        Some(row.original_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_support::{InMemoryEvents, InMemoryTracking};
    use rstest::rstest;

    fn ingress() -> (TrackingIngress, Arc<InMemoryTracking>, Arc<InMemoryEvents>) {
        let tracking = Arc::new(InMemoryTracking::default());
        let events = Arc::new(InMemoryEvents::default());
        (
            TrackingIngress::new(tracking.clone(), events.clone()),
            tracking,
            events,
        )
    }

    fn seeded_open(tracking: &InMemoryTracking) {
        tracking.seed_open(NewTrackingOpen {
            id: "open-1".into(),
            user_id: "u1".into(),
            message_id: "<m1@example.com>".into(),
            recipient_email: "bob@x.com".into(),
            sending_domain: "example.com".into(),
            created_at: Utc::now(),
        });
    }

    #[tokio::test]
    async fn first_open_emits_event_later_opens_only_count() {
        let (ingress, tracking, events) = ingress();
        seeded_open(&tracking);

        ingress.record_open("open-1", ClientInfo::default()).await;
        ingress.record_open("open-1", ClientInfo::default()).await;

        let opens = tracking.opens.lock().expect("opens");
        assert_eq!(opens[0].open_count, 2);
        assert!(opens[0].opened_at.is_some());

        let rows = events.rows.lock().expect("rows");
        assert_eq!(rows.len(), 1, "exactly one opened event");
        assert_eq!(rows[0].event_type, EventType::Opened);
        let metadata = rows[0].metadata.as_ref().expect("metadata");
        assert_eq!(metadata["openCount"], json!(1));
    }

    #[tokio::test]
    async fn unknown_open_id_is_a_silent_no_op() {
        let (ingress, _tracking, events) = ingress();
        ingress.record_open("nope", ClientInfo::default()).await;
        assert!(events.rows.lock().expect("rows").is_empty());
    }

    #[tokio::test]
    async fn click_returns_redirect_target_and_emits_once() {
        let (ingress, tracking, events) = ingress();
        tracking.seed_link(NewTrackingLink {
            id: "click-1".into(),
            user_id: "u1".into(),
            message_id: "<m1@example.com>".into(),
            recipient_email: "bob@x.com".into(),
            sending_domain: "example.com".into(),
            original_url: "https://a.example/x".into(),
            created_at: Utc::now(),
        });

        let first = ingress.record_click("click-1", ClientInfo::default()).await;
        let second = ingress.record_click("click-1", ClientInfo::default()).await;
        assert_eq!(first.as_deref(), Some("https://a.example/x"));
        assert_eq!(second.as_deref(), Some("https://a.example/x"));

        let rows = events.rows.lock().expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_type, EventType::Clicked);
        assert_eq!(
            rows[0].metadata.as_ref().expect("metadata")["originalUrl"],
            json!("https://a.example/x")
        );
        assert_eq!(tracking.links.lock().expect("links")[0].click_count, 2);
    }

    #[tokio::test]
    async fn unknown_click_id_yields_no_target() {
        let (ingress, _tracking, _events) = ingress();
        assert!(ingress
            .record_click("nope", ClientInfo::default())
            .await
            .is_none());
    }

    #[rstest]
    #[case(Some("  10.0.0.1  "), Some("10.0.0.1"))]
    #[case(Some(""), None)]
    #[case(None, None)]
    fn client_info_trims_and_drops_empty(#[case] raw: Option<&str>, #[case] want: Option<&str>) {
        let info = ClientInfo::from_raw(raw, None);
        assert_eq!(info.ip_address.as_deref(), want);
    }

    #[test]
    fn client_info_truncates_long_values() {
        let long_ip = "x".repeat(100);
        let long_agent = "y".repeat(1000);
        let info = ClientInfo::from_raw(Some(&long_ip), Some(&long_agent));
        assert_eq!(info.ip_address.expect("ip").len(), MAX_IP_LEN);
        assert_eq!(info.user_agent.expect("ua").len(), MAX_USER_AGENT_LEN);
    }
}
