//! In-memory port implementations shared by unit and handler tests.
//!
//! Fixtures mirror the semantics the Diesel/Redis/lettre adapters provide so
//! domain services can be exercised without I/O.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::auth::{ApiKeyRecord, AuthContext, BillingRecord, DomainRecord, UserRecord};
use super::delivery::{DeliveryJob, QueuedDelivery, RelayReceipt, SmtpEnvelope};
use super::events::{EmailEvent, EventFilter, EventType, NewEmailEvent};
use super::ids::api_key_hash;
use super::ports::{
    ApiKeyRepository, BillingRepository, EnqueueOutcome, EventRepository, JobQueue, MailError,
    Mailer, QueueError, StoreError, TemplateRepository, TrackingRepository,
};
use super::rewrite::RewriteConfig;
use super::send::SendService;
use super::suppression::tests::InMemorySuppressions;
use super::suppression::SuppressionService;
use super::template::{EmailTemplate, TemplateRenderer, TemplateVariable};
use super::tracking::{NewTrackingLink, NewTrackingOpen, TrackingLink, TrackingOpen};

use std::sync::Arc;

/// A verified tenant with headroom on its quota.
pub(crate) fn test_context() -> AuthContext {
    AuthContext {
        api_key: ApiKeyRecord {
            id: "key-1".into(),
            user_id: "u1".into(),
            domain_id: "dom-1".into(),
            name: "default".into(),
            is_active: true,
        },
        domain: DomainRecord {
            id: "dom-1".into(),
            user_id: "u1".into(),
            name: "example.com".into(),
            txt_verified: true,
        },
        user: UserRecord {
            id: "u1".into(),
            email: "owner@example.com".into(),
            name: Some("Owner".into()),
        },
        billing: Some(BillingRecord {
            id: "bill-1".into(),
            user_id: "u1".into(),
            email_limit: 100,
            email_used: 0,
        }),
    }
}

/// A delivery job as the send path would enqueue it.
pub(crate) fn sample_job() -> DeliveryJob {
    DeliveryJob {
        job_id: "job-1".into(),
        message_id: "<m1@example.com>".into(),
        user_id: "u1".into(),
        domain_id: "dom-1".into(),
        api_key_id: "key-1".into(),
        sending_domain: "example.com".into(),
        from: "\"Alice\" <alice@example.com>".into(),
        to: vec!["bob@x.com".into()],
        subject: "Hi".into(),
        html: Some("<p>hi</p>".into()),
        text: None,
        reply_to: None,
        headers: Vec::new(),
    }
}

/// Single-key API key store; `failing()` simulates a broken backend.
pub(crate) struct InMemoryApiKeys {
    entry: Option<(String, AuthContext)>,
    pub touched: Mutex<i32>,
    fail: bool,
}

impl InMemoryApiKeys {
    pub fn with_key(raw_key: &str, context: AuthContext) -> Self {
        Self {
            entry: Some((api_key_hash(raw_key), context)),
            touched: Mutex::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            entry: None,
            touched: Mutex::new(0),
            fail: true,
        }
    }
}

#[async_trait]
impl ApiKeyRepository for InMemoryApiKeys {
    async fn find_by_key_hash(&self, key_hash: &str) -> Result<Option<AuthContext>, StoreError> {
        if self.fail {
            return Err(StoreError::connection("fixture backend down"));
        }
        Ok(self
            .entry
            .as_ref()
            .filter(|(hash, _)| hash == key_hash)
            .map(|(_, context)| context.clone()))
    }

    async fn touch_last_used(
        &self,
        _api_key_id: &str,
        _at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        *self.touched.lock().expect("touched poisoned") += 1;
        Ok(())
    }
}

/// Append-only event store with the adapter's filter semantics.
#[derive(Default)]
pub(crate) struct InMemoryEvents {
    pub rows: Mutex<Vec<EmailEvent>>,
}

impl InMemoryEvents {
    pub fn push(&self, event: NewEmailEvent) {
        self.rows
            .lock()
            .expect("rows poisoned")
            .push(materialize(&event));
    }
}

fn materialize(event: &NewEmailEvent) -> EmailEvent {
    EmailEvent {
        id: event.id.clone(),
        user_id: event.user_id.clone(),
        message_id: event.message_id.clone(),
        event_type: event.event_type,
        recipient_email: event.recipient_email.clone(),
        sending_domain: event.sending_domain.clone(),
        subject: event.subject.clone(),
        metadata: event.metadata.clone(),
        ip_address: event.ip_address.clone(),
        user_agent: event.user_agent.clone(),
        created_at: event.created_at,
    }
}

#[async_trait]
impl EventRepository for InMemoryEvents {
    async fn insert(&self, event: &NewEmailEvent) -> Result<(), StoreError> {
        self.rows
            .lock()
            .expect("rows poisoned")
            .push(materialize(event));
        Ok(())
    }

    async fn insert_batch(&self, events: &[NewEmailEvent]) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().expect("rows poisoned");
        rows.extend(events.iter().map(materialize));
        Ok(())
    }

    async fn transition(
        &self,
        user_id: &str,
        message_id: &str,
        from: &[EventType],
        to: EventType,
        metadata: Value,
    ) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().expect("rows poisoned");
        let mut touched = 0;
        for row in rows.iter_mut() {
            if row.user_id == user_id
                && row.message_id == message_id
                && from.contains(&row.event_type)
            {
                row.event_type = to;
                row.metadata = Some(metadata.clone());
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn list(
        &self,
        user_id: &str,
        filter: &EventFilter,
    ) -> Result<(Vec<EmailEvent>, i64), StoreError> {
        let rows = self.rows.lock().expect("rows poisoned");
        let mut matching: Vec<EmailEvent> = rows
            .iter()
            .filter(|r| r.user_id == user_id)
            .filter(|r| filter.event_type.map_or(true, |t| r.event_type == t))
            .filter(|r| {
                filter
                    .recipient_email
                    .as_ref()
                    .map_or(true, |needle| r.recipient_email.contains(needle.as_str()))
            })
            .filter(|r| {
                filter
                    .message_id
                    .as_ref()
                    .map_or(true, |m| &r.message_id == m)
            })
            .filter(|r| filter.start_date.map_or(true, |s| r.created_at >= s))
            .filter(|r| filter.end_date.map_or(true, |e| r.created_at <= e))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn list_for_message(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> Result<Vec<EmailEvent>, StoreError> {
        let rows = self.rows.lock().expect("rows poisoned");
        let mut matching: Vec<EmailEvent> = rows
            .iter()
            .filter(|r| r.user_id == user_id && r.message_id == message_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    async fn count_by_type(
        &self,
        user_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let rows = self.rows.lock().expect("rows poisoned");
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for row in rows
            .iter()
            .filter(|r| r.user_id == user_id)
            .filter(|r| start.map_or(true, |s| r.created_at >= s))
            .filter(|r| end.map_or(true, |e| r.created_at <= e))
        {
            *counts
                .entry(row.event_type.as_str().to_owned())
                .or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}

/// Tracking rows with the counter/first-touch semantics of the adapter.
#[derive(Default)]
pub(crate) struct InMemoryTracking {
    pub opens: Mutex<Vec<TrackingOpen>>,
    pub links: Mutex<Vec<TrackingLink>>,
}

impl InMemoryTracking {
    pub fn seed_open(&self, row: NewTrackingOpen) {
        self.opens.lock().expect("opens poisoned").push(TrackingOpen {
            id: row.id,
            user_id: row.user_id,
            message_id: row.message_id,
            recipient_email: row.recipient_email,
            sending_domain: row.sending_domain,
            opened_at: None,
            open_count: 0,
            created_at: row.created_at,
        });
    }

    pub fn seed_link(&self, row: NewTrackingLink) {
        self.links.lock().expect("links poisoned").push(TrackingLink {
            id: row.id,
            user_id: row.user_id,
            message_id: row.message_id,
            recipient_email: row.recipient_email,
            sending_domain: row.sending_domain,
            original_url: row.original_url,
            clicked_at: None,
            click_count: 0,
            created_at: row.created_at,
        });
    }
}

#[async_trait]
impl TrackingRepository for InMemoryTracking {
    async fn insert_opens(&self, rows: &[NewTrackingOpen]) -> Result<(), StoreError> {
        for row in rows {
            self.seed_open(row.clone());
        }
        Ok(())
    }

    async fn insert_links(&self, rows: &[NewTrackingLink]) -> Result<(), StoreError> {
        for row in rows {
            self.seed_link(row.clone());
        }
        Ok(())
    }

    async fn find_open(&self, id: &str) -> Result<Option<TrackingOpen>, StoreError> {
        Ok(self
            .opens
            .lock()
            .expect("opens poisoned")
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn record_open(
        &self,
        id: &str,
        first_touch: bool,
        at: DateTime<Utc>,
    ) -> Result<i32, StoreError> {
        let mut opens = self.opens.lock().expect("opens poisoned");
        let row = opens
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::query("open row not found"))?;
        row.open_count += 1;
        if first_touch {
            row.opened_at.get_or_insert(at);
        }
        Ok(row.open_count)
    }

    async fn find_link(&self, id: &str) -> Result<Option<TrackingLink>, StoreError> {
        Ok(self
            .links
            .lock()
            .expect("links poisoned")
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn record_click(
        &self,
        id: &str,
        first_touch: bool,
        at: DateTime<Utc>,
    ) -> Result<i32, StoreError> {
        let mut links = self.links.lock().expect("links poisoned");
        let row = links
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::query("link row not found"))?;
        row.click_count += 1;
        if first_touch {
            row.clicked_at.get_or_insert(at);
        }
        Ok(row.click_count)
    }
}

/// Billing counters with the adapter's clamp-at-zero rollback.
#[derive(Default)]
pub(crate) struct InMemoryBilling {
    pub rows: Mutex<Vec<BillingRecord>>,
}

impl InMemoryBilling {
    pub fn seed(&self, billing_id: &str, user_id: &str, limit: i32, used: i32) {
        let mut rows = self.rows.lock().expect("rows poisoned");
        rows.retain(|r| r.id != billing_id);
        rows.push(BillingRecord {
            id: billing_id.into(),
            user_id: user_id.into(),
            email_limit: limit,
            email_used: used,
        });
    }

    pub fn used(&self, user_id: &str) -> i32 {
        self.rows
            .lock()
            .expect("rows poisoned")
            .iter()
            .find(|r| r.user_id == user_id)
            .map(|r| r.email_used)
            .unwrap_or(0)
    }
}

#[async_trait]
impl BillingRepository for InMemoryBilling {
    async fn reserve(&self, billing_id: &str, count: i32) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().expect("rows poisoned");
        if let Some(row) = rows.iter_mut().find(|r| r.id == billing_id) {
            row.email_used += count;
        }
        Ok(())
    }

    async fn release(&self, user_id: &str, count: i32) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().expect("rows poisoned");
        if let Some(row) = rows.iter_mut().find(|r| r.user_id == user_id) {
            row.email_used = (row.email_used - count).max(0);
        }
        Ok(())
    }
}

/// Queue fixture: records submissions, pops on demand, never re-queues.
#[derive(Default)]
pub(crate) struct RecordingQueue {
    pub jobs: Mutex<Vec<QueuedDelivery>>,
    pub pending: Mutex<VecDeque<QueuedDelivery>>,
    pub retries: Mutex<Vec<(String, u32, Duration)>>,
    seen: Mutex<HashSet<String>>,
}

impl RecordingQueue {
    pub async fn push(&self, delivery: QueuedDelivery) {
        self.pending
            .lock()
            .expect("pending poisoned")
            .push_back(delivery);
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(&self, job: &DeliveryJob) -> Result<EnqueueOutcome, QueueError> {
        if !self
            .seen
            .lock()
            .expect("seen poisoned")
            .insert(job.job_id.clone())
        {
            return Ok(EnqueueOutcome::Duplicate);
        }
        let delivery = QueuedDelivery {
            job: job.clone(),
            attempt: 1,
        };
        self.jobs
            .lock()
            .expect("jobs poisoned")
            .push(delivery.clone());
        self.pending
            .lock()
            .expect("pending poisoned")
            .push_back(delivery);
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn dequeue(&self, _wait: Duration) -> Result<Option<QueuedDelivery>, QueueError> {
        Ok(self.pending.lock().expect("pending poisoned").pop_front())
    }

    async fn retry(
        &self,
        job: &DeliveryJob,
        attempt: u32,
        delay: Duration,
    ) -> Result<(), QueueError> {
        self.retries
            .lock()
            .expect("retries poisoned")
            .push((job.job_id.clone(), attempt, delay));
        Ok(())
    }
}

/// Relay stub: succeeds unless a failure was queued with `fail_next`.
#[derive(Default)]
pub(crate) struct StubMailer {
    pub sent: Mutex<Vec<SmtpEnvelope>>,
    failures: Mutex<VecDeque<MailError>>,
}

impl StubMailer {
    pub fn fail_next(&self, error: MailError) {
        self.failures
            .lock()
            .expect("failures poisoned")
            .push_back(error);
    }
}

#[async_trait]
impl Mailer for StubMailer {
    async fn send(&self, envelope: &SmtpEnvelope) -> Result<RelayReceipt, MailError> {
        if let Some(error) = self.failures.lock().expect("failures poisoned").pop_front() {
            return Err(error);
        }
        self.sent
            .lock()
            .expect("sent poisoned")
            .push(envelope.clone());
        Ok(RelayReceipt {
            response: "250 2.0.0 OK".into(),
            accepted: envelope.to.clone(),
            rejected: Vec::new(),
        })
    }
}

/// Fixed template catalogue with the `welcome` template.
pub(crate) struct FixtureTemplates;

#[async_trait]
impl TemplateRepository for FixtureTemplates {
    async fn find_active(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<EmailTemplate>, StoreError> {
        let template = EmailTemplate {
            id: "tpl-1".into(),
            user_id: "u1".into(),
            slug: "welcome".into(),
            subject: "Welcome {{name}}".into(),
            html_content: "<body><p>Hello {{name}}</p></body>".into(),
            is_active: true,
            variables: vec![TemplateVariable {
                name: "name".into(),
                default_value: Some("friend".into()),
            }],
        };
        Ok((template.user_id == user_id && (template.id == key || template.slug == key))
            .then_some(template))
    }
}

/// The send service wired against every in-memory fixture.
pub(crate) struct SendServiceFixtures {
    pub service: SendService,
    pub suppressions: SuppressionService,
    pub events: Arc<InMemoryEvents>,
    pub tracking: Arc<InMemoryTracking>,
    pub billing: Arc<InMemoryBilling>,
    pub queue: Arc<RecordingQueue>,
}

pub(crate) fn send_service_fixtures() -> SendServiceFixtures {
    let events = Arc::new(InMemoryEvents::default());
    let tracking = Arc::new(InMemoryTracking::default());
    let billing = Arc::new(InMemoryBilling::default());
    let queue = Arc::new(RecordingQueue::default());
    let suppressions = SuppressionService::new(Arc::new(InMemorySuppressions::default()));
    let service = SendService::new(
        TemplateRenderer::new(Arc::new(FixtureTemplates)),
        suppressions.clone(),
        events.clone(),
        tracking.clone(),
        billing.clone(),
        queue.clone(),
        RewriteConfig {
            base_url: "https://track.test".into(),
            open_tracking: true,
            click_tracking: true,
        },
    );
    SendServiceFixtures {
        service,
        suppressions,
        events,
        tracking,
        billing,
        queue,
    }
}
