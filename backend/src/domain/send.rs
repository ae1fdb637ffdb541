//! Accept-and-enqueue: the send hot path.
//!
//! Validates the sender against the key's domain, resolves content (inline or
//! template), filters suppressed recipients, rewrites the HTML for tracking,
//! persists the durable intent (queued event rows, tracking rows), reserves
//! quota, and hands the job to the queue. Everything after a successful
//! response is the worker's problem.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use super::auth::AuthContext;
use super::delivery::DeliveryJob;
use super::email::{normalize_address, validate_recipient, SenderAddress};
use super::events::{EventType, NewEmailEvent};
use super::ids::tracking_id;
use super::ports::{
    map_store_error, BillingRepository, EventRepository, JobQueue, TrackingRepository,
};
use super::rewrite::{rewrite_html, RewriteConfig, TrackingRewrite};
use super::suppression::SuppressionService;
use super::template::TemplateRenderer;
use super::tracking::{NewTrackingLink, NewTrackingOpen};
use super::Error;

/// Normalised send request, after wire-format quirks are resolved.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub from: String,
    pub to: Vec<String>,
    pub subject: Option<String>,
    pub html: Option<String>,
    pub text: Option<String>,
    pub template_key: Option<String>,
    pub variables: BTreeMap<String, String>,
    pub headers: Vec<(String, String)>,
    pub reply_to: Option<String>,
    pub disable_tracking: bool,
}

/// What the caller learns about an accepted send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub job_id: String,
    pub message_id: String,
    pub recipients: usize,
    pub suppressed: usize,
}

/// Orchestrates one send from validation to durable intent.
#[derive(Clone)]
pub struct SendService {
    templates: TemplateRenderer,
    suppressions: SuppressionService,
    events: Arc<dyn EventRepository>,
    tracking: Arc<dyn TrackingRepository>,
    billing: Arc<dyn BillingRepository>,
    queue: Arc<dyn JobQueue>,
    rewrite: RewriteConfig,
}

impl SendService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        templates: TemplateRenderer,
        suppressions: SuppressionService,
        events: Arc<dyn EventRepository>,
        tracking: Arc<dyn TrackingRepository>,
        billing: Arc<dyn BillingRepository>,
        queue: Arc<dyn JobQueue>,
        rewrite: RewriteConfig,
    ) -> Self {
        Self {
            templates,
            suppressions,
            events,
            tracking,
            billing,
            queue,
            rewrite,
        }
    }

    /// Validate, persist, and enqueue one send.
    pub async fn accept(
        &self,
        auth: &AuthContext,
        request: SendRequest,
    ) -> Result<SendOutcome, Error> {
        let sender = SenderAddress::parse(&request.from)?;
        if sender.domain() != auth.domain.name.to_ascii_lowercase() {
            return Err(Error::forbidden(format!(
                "From address must use the verified domain {}",
                auth.domain.name
            )));
        }

        if request.to.is_empty() {
            return Err(Error::invalid_request("at least one recipient is required"));
        }
        let mut recipients = Vec::with_capacity(request.to.len());
        for raw in &request.to {
            recipients.push(validate_recipient(raw)?);
        }

        if let Some(billing) = &auth.billing {
            if billing.email_used + recipients.len() as i32 > billing.email_limit {
                return Err(Error::quota_exceeded(format!(
                    "Monthly email limit reached. Used: {}/{}",
                    billing.email_used, billing.email_limit
                )));
            }
        }

        let (subject, mut html, text, template_id) = self.resolve_content(auth, &request).await?;

        let suppressed = self
            .suppressions
            .check(&auth.user.id, &recipients, Some(&auth.domain.id))
            .await?;
        let deliverable: Vec<String> = recipients
            .into_iter()
            .filter(|r| !suppressed.contains(&normalize_address(r)))
            .collect();

        let job_id = tracking_id();
        let message_id = format!("<{}@{}>", tracking_id(), auth.domain.name);

        if deliverable.is_empty() {
            return Ok(SendOutcome {
                job_id,
                message_id,
                recipients: 0,
                suppressed: suppressed.len(),
            });
        }

        let mut rewrite: Option<TrackingRewrite> = None;
        if !request.disable_tracking {
            if let Some(body) = &html {
                if self.rewrite.open_tracking || self.rewrite.click_tracking {
                    let rewritten = rewrite_html(body, &self.rewrite);
                    html = Some(rewritten.modified_html.clone());
                    rewrite = Some(rewritten);
                }
            }
        }

        self.persist_intent(
            auth,
            &deliverable,
            &job_id,
            &message_id,
            &subject,
            template_id.as_deref(),
            rewrite.as_ref(),
        )
        .await?;

        if let Some(billing) = &auth.billing {
            self.billing
                .reserve(&billing.id, deliverable.len() as i32)
                .await
                .map_err(map_store_error)?;
        }

        let job = DeliveryJob {
            job_id: job_id.clone(),
            message_id: message_id.clone(),
            user_id: auth.user.id.clone(),
            domain_id: auth.domain.id.clone(),
            api_key_id: auth.api_key.id.clone(),
            sending_domain: auth.domain.name.clone(),
            from: sender.header_value(),
            to: deliverable.clone(),
            subject,
            html,
            text,
            reply_to: request.reply_to,
            headers: request.headers,
        };
        self.queue.enqueue(&job).await.map_err(|err| {
            tracing::error!(error = %err, job_id, "enqueue failed");
            Error::internal("Failed to enqueue delivery job")
        })?;

        Ok(SendOutcome {
            job_id,
            message_id,
            recipients: deliverable.len(),
            suppressed: suppressed.len(),
        })
    }

    /// Template rendering or inline content, with the required-field checks.
    async fn resolve_content(
        &self,
        auth: &AuthContext,
        request: &SendRequest,
    ) -> Result<(String, Option<String>, Option<String>, Option<String>), Error> {
        if let Some(key) = &request.template_key {
            let rendered = self
                .templates
                .render(&auth.user.id, key, &request.variables)
                .await?
                .ok_or_else(|| Error::not_found(format!("Template {key} not found")))?;
            return Ok((
                rendered.subject,
                Some(rendered.html),
                request.text.clone(),
                Some(rendered.template_id),
            ));
        }

        let subject = request
            .subject
            .as_ref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::invalid_request("subject is required"))?
            .clone();
        if request.html.is_none() && request.text.is_none() {
            return Err(Error::invalid_request(
                "either html or text body is required",
            ));
        }
        Ok((subject, request.html.clone(), request.text.clone(), None))
    }

    /// Insert the queued event rows and tracking rows for the send.
    async fn persist_intent(
        &self,
        auth: &AuthContext,
        deliverable: &[String],
        job_id: &str,
        message_id: &str,
        subject: &str,
        template_id: Option<&str>,
        rewrite: Option<&TrackingRewrite>,
    ) -> Result<(), Error> {
        let mut metadata = json!({ "jobId": job_id });
        if let Some(template_id) = template_id {
            metadata["templateId"] = json!(template_id);
        }

        let events: Vec<NewEmailEvent> = deliverable
            .iter()
            .map(|recipient| {
                NewEmailEvent::new(
                    &auth.user.id,
                    message_id,
                    EventType::Queued,
                    recipient,
                    &auth.domain.name,
                )
                .with_subject(subject)
                .with_metadata(metadata.clone())
            })
            .collect();
        self.events
            .insert_batch(&events)
            .await
            .map_err(map_store_error)?;

        let Some(rewrite) = rewrite else {
            return Ok(());
        };
        let now = Utc::now();

        if let Some(open_id) = &rewrite.open_tracking_id {
            // The pixel URL embeds the bare id, so the first recipient's row
            // must carry it; later recipients get a suffixed id.
            let opens: Vec<NewTrackingOpen> = deliverable
                .iter()
                .enumerate()
                .map(|(index, recipient)| NewTrackingOpen {
                    id: if index == 0 {
                        open_id.clone()
                    } else {
                        format!("{open_id}_{index}")
                    },
                    user_id: auth.user.id.clone(),
                    message_id: message_id.to_owned(),
                    recipient_email: recipient.clone(),
                    sending_domain: auth.domain.name.clone(),
                    created_at: now,
                })
                .collect();
            self.tracking
                .insert_opens(&opens)
                .await
                .map_err(map_store_error)?;
        }

        if !rewrite.links.is_empty() {
            let first_recipient = &deliverable[0];
            let links: Vec<NewTrackingLink> = rewrite
                .links
                .iter()
                .map(|link| NewTrackingLink {
                    id: link.tracking_id.clone(),
                    user_id: auth.user.id.clone(),
                    message_id: message_id.to_owned(),
                    recipient_email: first_recipient.clone(),
                    sending_domain: auth.domain.name.clone(),
                    original_url: link.original_url.clone(),
                    created_at: now,
                })
                .collect();
            self.tracking
                .insert_links(&links)
                .await
                .map_err(map_store_error)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::suppression::{AddSuppression, SuppressionReason};
    use crate::domain::test_support::{
        send_service_fixtures, test_context, SendServiceFixtures,
    };
    use crate::domain::ErrorCode;

    fn basic_request() -> SendRequest {
        SendRequest {
            from: "alice@example.com".into(),
            to: vec!["bob@x.com".into()],
            subject: Some("Hi".into()),
            html: Some("<body><p>hi <a href=\"https://a.example\">L</a></p></body>".into()),
            ..SendRequest::default()
        }
    }

    #[tokio::test]
    async fn happy_send_persists_intent_and_enqueues() {
        let SendServiceFixtures {
            service,
            events,
            tracking,
            billing,
            queue,
            ..
        } = send_service_fixtures();
        billing.seed("bill-1", "u1", 100, 0);

        let outcome = service
            .accept(&test_context(), basic_request())
            .await
            .expect("accepted");

        assert_eq!(outcome.recipients, 1);
        assert_eq!(outcome.suppressed, 0);
        assert!(outcome.message_id.ends_with("@example.com>"));

        let rows = events.rows.lock().expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_type, EventType::Queued);
        assert_eq!(rows[0].recipient_email, "bob@x.com");
        assert_eq!(rows[0].subject.as_deref(), Some("Hi"));

        assert_eq!(tracking.opens.lock().expect("opens").len(), 1);
        let links = tracking.links.lock().expect("links");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].original_url, "https://a.example");

        assert_eq!(billing.used("u1"), 1);

        let jobs = queue.jobs.lock().expect("jobs");
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0].job;
        assert_eq!(job.to, vec!["bob@x.com".to_owned()]);
        assert!(job.html.as_deref().expect("html").contains("/t/c/"));
        assert!(job.html.as_deref().expect("html").contains("/t/o/"));
    }

    #[tokio::test]
    async fn from_domain_mismatch_is_forbidden_and_changes_nothing() {
        let SendServiceFixtures {
            service,
            events,
            billing,
            queue,
            ..
        } = send_service_fixtures();
        billing.seed("bill-1", "u1", 100, 0);

        let mut request = basic_request();
        request.from = "alice@other.com".into();
        let err = service
            .accept(&test_context(), request)
            .await
            .expect_err("rejected");

        assert_eq!(err.code(), ErrorCode::Forbidden);
        assert!(err.message().contains("example.com"));
        assert!(events.rows.lock().expect("rows").is_empty());
        assert!(queue.jobs.lock().expect("jobs").is_empty());
        assert_eq!(billing.used("u1"), 0);
    }

    #[tokio::test]
    async fn exhausted_quota_is_rejected_before_any_write() {
        let SendServiceFixtures {
            service,
            events,
            billing,
            queue,
            ..
        } = send_service_fixtures();
        billing.seed("bill-1", "u1", 10, 10);
        let mut context = test_context();
        context.billing.as_mut().expect("billing").email_used = 10;
        context.billing.as_mut().expect("billing").email_limit = 10;

        let err = service
            .accept(&context, basic_request())
            .await
            .expect_err("rejected");

        assert_eq!(err.code(), ErrorCode::QuotaExceeded);
        assert_eq!(err.message(), "Monthly email limit reached. Used: 10/10");
        assert!(events.rows.lock().expect("rows").is_empty());
        assert!(queue.jobs.lock().expect("jobs").is_empty());
    }

    #[tokio::test]
    async fn suppressed_recipients_are_filtered_not_fatal() {
        let SendServiceFixtures {
            service,
            suppressions,
            events,
            billing,
            queue,
            ..
        } = send_service_fixtures();
        billing.seed("bill-1", "u1", 100, 0);
        suppressions
            .add(AddSuppression {
                user_id: "u1".into(),
                email: "bob@x.com".into(),
                reason: SuppressionReason::HardBounce,
                source_event_id: None,
                domain_id: None,
                metadata: None,
            })
            .await
            .expect("suppress");

        let mut request = basic_request();
        request.to = vec!["bob@x.com".into(), "carol@x.com".into()];
        let outcome = service
            .accept(&test_context(), request)
            .await
            .expect("accepted");

        assert_eq!(outcome.recipients, 1);
        assert_eq!(outcome.suppressed, 1);

        let rows = events.rows.lock().expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].recipient_email, "carol@x.com");
        assert_eq!(billing.used("u1"), 1, "suppressed recipient is not charged");
        assert_eq!(
            queue.jobs.lock().expect("jobs")[0].job.to,
            vec!["carol@x.com".to_owned()]
        );
    }

    #[tokio::test]
    async fn fully_suppressed_send_enqueues_nothing() {
        let SendServiceFixtures {
            service,
            suppressions,
            events,
            billing,
            queue,
            ..
        } = send_service_fixtures();
        billing.seed("bill-1", "u1", 100, 0);
        suppressions
            .add(AddSuppression {
                user_id: "u1".into(),
                email: "bob@x.com".into(),
                reason: SuppressionReason::Manual,
                source_event_id: None,
                domain_id: None,
                metadata: None,
            })
            .await
            .expect("suppress");

        let outcome = service
            .accept(&test_context(), basic_request())
            .await
            .expect("accepted");

        assert_eq!(outcome.recipients, 0);
        assert_eq!(outcome.suppressed, 1);
        assert!(events.rows.lock().expect("rows").is_empty());
        assert!(queue.jobs.lock().expect("jobs").is_empty());
        assert_eq!(billing.used("u1"), 0);
    }

    #[tokio::test]
    async fn template_sends_render_subject_and_html() {
        let SendServiceFixtures {
            service, billing, queue, ..
        } = send_service_fixtures();
        billing.seed("bill-1", "u1", 100, 0);

        let mut request = basic_request();
        request.subject = None;
        request.html = None;
        request.template_key = Some("welcome".into());
        request.variables = BTreeMap::from([("name".to_owned(), "Ada".to_owned())]);

        let outcome = service
            .accept(&test_context(), request)
            .await
            .expect("accepted");
        assert_eq!(outcome.recipients, 1);

        let jobs = queue.jobs.lock().expect("jobs");
        assert_eq!(jobs[0].job.subject, "Welcome Ada");
        assert!(jobs[0].job.html.as_deref().expect("html").contains("Ada"));
    }

    #[tokio::test]
    async fn unknown_template_is_not_found() {
        let SendServiceFixtures { service, .. } = send_service_fixtures();
        let mut request = basic_request();
        request.subject = None;
        request.html = None;
        request.template_key = Some("missing".into());

        let err = service
            .accept(&test_context(), request)
            .await
            .expect_err("rejected");
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn subject_and_body_are_required_without_template() {
        let SendServiceFixtures { service, .. } = send_service_fixtures();

        let mut no_subject = basic_request();
        no_subject.subject = None;
        let err = service
            .accept(&test_context(), no_subject)
            .await
            .expect_err("rejected");
        assert_eq!(err.code(), ErrorCode::InvalidRequest);

        let mut no_body = basic_request();
        no_body.html = None;
        no_body.text = None;
        let err = service
            .accept(&test_context(), no_body)
            .await
            .expect_err("rejected");
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn disable_tracking_skips_rewrites_and_rows() {
        let SendServiceFixtures {
            service,
            tracking,
            billing,
            queue,
            ..
        } = send_service_fixtures();
        billing.seed("bill-1", "u1", 100, 0);

        let mut request = basic_request();
        request.disable_tracking = true;
        service
            .accept(&test_context(), request)
            .await
            .expect("accepted");

        assert!(tracking.opens.lock().expect("opens").is_empty());
        assert!(tracking.links.lock().expect("links").is_empty());
        let job = &queue.jobs.lock().expect("jobs")[0].job;
        assert!(!job.html.as_deref().expect("html").contains("/t/"));
    }

    #[tokio::test]
    async fn multi_recipient_send_creates_one_open_row_each() {
        let SendServiceFixtures {
            service,
            tracking,
            billing,
            ..
        } = send_service_fixtures();
        billing.seed("bill-1", "u1", 100, 0);

        let mut request = basic_request();
        request.to = vec!["bob@x.com".into(), "carol@x.com".into()];
        service
            .accept(&test_context(), request)
            .await
            .expect("accepted");

        let opens = tracking.opens.lock().expect("opens");
        assert_eq!(opens.len(), 2);
        assert!(!opens[0].id.contains('_'), "first row keeps the bare id");
        assert!(opens[1].id.ends_with("_1"));
        // Link rows are per distinct URL, not per recipient.
        assert_eq!(tracking.links.lock().expect("links").len(), 1);
    }
}
