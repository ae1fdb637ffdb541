//! Email lifecycle events: entity, listing, stats, and external ingestion.
//!
//! Every message accepted for delivery begins as one `queued` row per
//! recipient; the delivery worker and the tracking/ingestion endpoints append
//! or transition rows from there. Consumers must tolerate out-of-order
//! arrival of downstream types relative to `sent`.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use super::auth::AuthContext;
use super::email::normalize_address;
use super::ids::event_id;
use super::ports::{map_store_error, EventRepository};
use super::suppression::{SuppressionReason, SuppressionService};
use super::Error;

/// Lifecycle states an email event row can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Queued,
    Sent,
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Complained,
    Unsubscribed,
    Failed,
}

impl EventType {
    /// Storage representation of the event type.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Queued => "queued",
            EventType::Sent => "sent",
            EventType::Delivered => "delivered",
            EventType::Opened => "opened",
            EventType::Clicked => "clicked",
            EventType::Bounced => "bounced",
            EventType::Complained => "complained",
            EventType::Unsubscribed => "unsubscribed",
            EventType::Failed => "failed",
        }
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "queued" => Ok(EventType::Queued),
            "sent" => Ok(EventType::Sent),
            "delivered" => Ok(EventType::Delivered),
            "opened" => Ok(EventType::Opened),
            "clicked" => Ok(EventType::Clicked),
            "bounced" => Ok(EventType::Bounced),
            "complained" => Ok(EventType::Complained),
            "unsubscribed" => Ok(EventType::Unsubscribed),
            "failed" => Ok(EventType::Failed),
            other => Err(Error::invalid_request(format!("unknown event type: {other}"))),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmailEvent {
    pub id: String,
    pub user_id: String,
    pub message_id: String,
    pub event_type: EventType,
    pub recipient_email: String,
    pub sending_domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Event row pending insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEmailEvent {
    pub id: String,
    pub user_id: String,
    pub message_id: String,
    pub event_type: EventType,
    pub recipient_email: String,
    pub sending_domain: String,
    pub subject: Option<String>,
    pub metadata: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewEmailEvent {
    /// Skeleton row with a fresh time-sortable id and the current timestamp.
    pub fn new(
        user_id: impl Into<String>,
        message_id: impl Into<String>,
        event_type: EventType,
        recipient_email: impl Into<String>,
        sending_domain: impl Into<String>,
    ) -> Self {
        Self {
            id: event_id(),
            user_id: user_id.into(),
            message_id: message_id.into(),
            event_type,
            recipient_email: recipient_email.into(),
            sending_domain: sending_domain.into(),
            subject: None,
            metadata: None,
            ip_address: None,
            user_agent: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_client(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip;
        self.user_agent = user_agent;
        self
    }
}

/// Listing filter; `page` is 1-based and `limit` is clamped to 100.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub page: i64,
    pub limit: i64,
    pub event_type: Option<EventType>,
    pub recipient_email: Option<String>,
    pub message_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub const DEFAULT_LIMIT: i64 = 20;
    pub const MAX_LIMIT: i64 = 100;

    /// Normalise page/limit into their allowed ranges.
    pub fn clamped(mut self) -> Self {
        if self.page < 1 {
            self.page = 1;
        }
        if self.limit < 1 {
            self.limit = Self::DEFAULT_LIMIT;
        }
        self.limit = self.limit.min(Self::MAX_LIMIT);
        self
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }
}

/// One page of events plus pagination totals.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventPage {
    pub data: Vec<EmailEvent>,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

/// Aggregate counts and delivery quality rates for a tenant.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    pub total: i64,
    pub queued: i64,
    pub sent: i64,
    pub delivered: i64,
    pub opened: i64,
    pub clicked: i64,
    pub bounced: i64,
    pub complained: i64,
    pub unsubscribed: i64,
    pub failed: i64,
    /// delivered / sent, two-decimal percentage.
    pub delivery_rate: String,
    /// opened / delivered, two-decimal percentage.
    pub open_rate: String,
    /// clicked / delivered, two-decimal percentage.
    pub click_rate: String,
    /// bounced / sent, two-decimal percentage.
    pub bounce_rate: String,
}

/// Externally reported event (`POST /api/v1/events`).
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEvent {
    pub event_type: String,
    pub recipient_email: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Read and ingestion operations over the event stream.
#[derive(Clone)]
pub struct EventService {
    events: Arc<dyn EventRepository>,
    suppressions: SuppressionService,
}

impl EventService {
    pub fn new(events: Arc<dyn EventRepository>, suppressions: SuppressionService) -> Self {
        Self {
            events,
            suppressions,
        }
    }

    /// Filtered, paginated listing.
    pub async fn list(&self, user_id: &str, filter: EventFilter) -> Result<EventPage, Error> {
        let filter = filter.clamped();
        let (data, total) = self
            .events
            .list(user_id, &filter)
            .await
            .map_err(map_store_error)?;
        let total_pages = if total == 0 {
            0
        } else {
            (total + filter.limit - 1) / filter.limit
        };
        Ok(EventPage {
            data,
            page: filter.page,
            limit: filter.limit,
            total,
            total_pages,
        })
    }

    /// All of one message's events grouped by recipient; `NotFound` when the
    /// message has no rows for this tenant.
    pub async fn for_message(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> Result<BTreeMap<String, Vec<EmailEvent>>, Error> {
        let rows = self
            .events
            .list_for_message(user_id, message_id)
            .await
            .map_err(map_store_error)?;
        if rows.is_empty() {
            return Err(Error::not_found(format!(
                "no events recorded for message {message_id}"
            )));
        }
        let mut grouped: BTreeMap<String, Vec<EmailEvent>> = BTreeMap::new();
        for event in rows {
            grouped
                .entry(event.recipient_email.clone())
                .or_default()
                .push(event);
        }
        Ok(grouped)
    }

    /// Counts plus computed rates over an optional date range.
    pub async fn stats(
        &self,
        user_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<EventStats, Error> {
        let counts: BTreeMap<String, i64> = self
            .events
            .count_by_type(user_id, start, end)
            .await
            .map_err(map_store_error)?
            .into_iter()
            .collect();
        let get = |t: EventType| counts.get(t.as_str()).copied().unwrap_or(0);

        let sent = get(EventType::Sent);
        let delivered = get(EventType::Delivered);
        let opened = get(EventType::Opened);
        let clicked = get(EventType::Clicked);
        let bounced = get(EventType::Bounced);

        Ok(EventStats {
            total: counts.values().sum(),
            queued: get(EventType::Queued),
            sent,
            delivered,
            opened,
            clicked,
            bounced,
            complained: get(EventType::Complained),
            unsubscribed: get(EventType::Unsubscribed),
            failed: get(EventType::Failed),
            delivery_rate: rate(delivered, sent),
            open_rate: rate(opened, delivered),
            click_rate: rate(clicked, delivered),
            bounce_rate: rate(bounced, sent),
        })
    }

    /// Record an externally observed event and fold terminal outcomes into
    /// the suppression list.
    pub async fn ingest(&self, auth: &AuthContext, event: ExternalEvent) -> Result<String, Error> {
        let event_type = EventType::from_str(&event.event_type)?;
        let recipient = event.recipient_email.trim().to_owned();
        if recipient.is_empty() {
            return Err(Error::invalid_request("recipientEmail is required"));
        }

        let id = event_id();
        let message_id = event
            .message_id
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| format!("manual_{id}"));

        let row = NewEmailEvent {
            id: id.clone(),
            user_id: auth.user.id.clone(),
            message_id,
            event_type,
            recipient_email: recipient.clone(),
            sending_domain: auth.domain.name.clone(),
            subject: None,
            metadata: event.metadata.clone(),
            ip_address: None,
            user_agent: None,
            created_at: Utc::now(),
        };
        self.events.insert(&row).await.map_err(map_store_error)?;

        let email = normalize_address(&recipient);
        match event_type {
            EventType::Complained => {
                self.suppressions
                    .add_from_event(&auth.user.id, &email, SuppressionReason::Complaint, &id)
                    .await?;
            }
            EventType::Unsubscribed => {
                self.suppressions
                    .add_from_event(&auth.user.id, &email, SuppressionReason::Unsubscribe, &id)
                    .await?;
            }
            EventType::Bounced => {
                let bounce_type = event
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("bounceType"))
                    .and_then(Value::as_str)
                    .unwrap_or("hard_bounce");
                if bounce_type == "soft_bounce" {
                    self.suppressions
                        .handle_soft_bounce(&auth.user.id, &email, Some(&id))
                        .await?;
                } else {
                    self.suppressions
                        .add_from_event(&auth.user.id, &email, SuppressionReason::HardBounce, &id)
                        .await?;
                }
            }
            _ => {}
        }

        Ok(id)
    }
}

/// Format `numerator / denominator` as a two-decimal percentage string.
fn rate(numerator: i64, denominator: i64) -> String {
    if denominator == 0 {
        return "0.00".to_owned();
    }
    format!("{:.2}", numerator as f64 / denominator as f64 * 100.0)
}
