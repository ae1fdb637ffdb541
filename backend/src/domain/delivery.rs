//! Delivery jobs, SMTP envelopes, and the worker runtime.
//!
//! The worker drains the durable queue with bounded concurrency and pacing,
//! dials the relay through the `Mailer` port, transitions the message's
//! `queued` rows, and rolls the quota reservation back when an attempt is
//! terminal. Retry scheduling is exponential from a one second base.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use super::events::EventType;
use super::ports::{BillingRepository, EventRepository, JobQueue, Mailer};

/// How long one dequeue call blocks before the loop re-checks shutdown.
const POLL_WAIT: Duration = Duration::from_secs(1);

/// Everything the worker needs to deliver one accepted message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryJob {
    pub job_id: String,
    pub message_id: String,
    pub user_id: String,
    pub domain_id: String,
    pub api_key_id: String,
    pub sending_domain: String,
    /// `"Name" <addr>` or a bare address.
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl DeliveryJob {
    /// Build the relay envelope: tracer headers first, caller headers after.
    pub fn envelope(&self) -> SmtpEnvelope {
        let mut headers = vec![
            ("X-Message-Id".to_owned(), self.message_id.clone()),
            ("X-User-Id".to_owned(), self.user_id.clone()),
            ("X-Domain-Id".to_owned(), self.domain_id.clone()),
            ("X-API-Key-Id".to_owned(), self.api_key_id.clone()),
        ];
        headers.extend(self.headers.iter().cloned());
        SmtpEnvelope {
            from: self.from.clone(),
            to: self.to.clone(),
            subject: self.subject.clone(),
            html: self.html.clone(),
            text: self.text.clone(),
            reply_to: self.reply_to.clone(),
            message_id: self.message_id.clone(),
            headers,
        }
    }
}

/// A job drawn from the queue together with its 1-based attempt number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedDelivery {
    pub job: DeliveryJob,
    pub attempt: u32,
}

/// Message handed to the `Mailer` port.
#[derive(Debug, Clone, PartialEq)]
pub struct SmtpEnvelope {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: Option<String>,
    pub text: Option<String>,
    pub reply_to: Option<String>,
    /// Stamped verbatim into the RFC `Message-Id` header.
    pub message_id: String,
    pub headers: Vec<(String, String)>,
}

/// What the relay answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReceipt {
    pub response: String,
    pub accepted: Vec<String>,
    pub rejected: Vec<String>,
}

/// Worker tuning knobs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub rate_limit_per_sec: u32,
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            rate_limit_per_sec: 100,
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl WorkerConfig {
    /// Delay before the attempt after `attempt` (1-based): base × 2^(n-1).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    fn pacing_interval(&self) -> Duration {
        Duration::from_millis(1_000 / u64::from(self.rate_limit_per_sec.max(1)))
    }
}

/// Queue consumer delivering accepted messages through the relay.
#[derive(Clone)]
pub struct DeliveryWorker {
    queue: Arc<dyn JobQueue>,
    mailer: Arc<dyn Mailer>,
    events: Arc<dyn EventRepository>,
    billing: Arc<dyn BillingRepository>,
    config: WorkerConfig,
}

impl DeliveryWorker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        mailer: Arc<dyn Mailer>,
        events: Arc<dyn EventRepository>,
        billing: Arc<dyn BillingRepository>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            mailer,
            events,
            billing,
            config,
        }
    }

    /// Consume jobs until `shutdown` flips, then drain in-flight work.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut pacing = tokio::time::interval(self.config.pacing_interval());

        info!(
            concurrency = self.config.concurrency,
            rate_limit = self.config.rate_limit_per_sec,
            "delivery worker started"
        );

        while !*shutdown.borrow() {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            pacing.tick().await;

            let dequeued = tokio::select! {
                result = self.queue.dequeue(POLL_WAIT) => result,
                _ = shutdown.changed() => {
                    drop(permit);
                    continue;
                }
            };

            match dequeued {
                Ok(Some(delivery)) => {
                    let worker = self.clone();
                    tokio::spawn(async move {
                        worker.process(delivery).await;
                        drop(permit);
                    });
                }
                Ok(None) => drop(permit),
                Err(err) => {
                    warn!(error = %err, "dequeue failed; backing off");
                    drop(permit);
                    tokio::time::sleep(POLL_WAIT).await;
                }
            }
        }

        // Every permit back means every spawned job has finished.
        let _ = semaphore
            .acquire_many(self.config.concurrency as u32)
            .await;
        info!("delivery worker drained");
    }

    /// Deliver one job and record the outcome.
    pub async fn process(&self, delivery: QueuedDelivery) {
        let QueuedDelivery { job, attempt } = delivery;

        match self.mailer.send(&job.envelope()).await {
            Ok(receipt) => {
                let metadata = json!({
                    "relayResponse": receipt.response,
                    "accepted": receipt.accepted,
                    "rejected": receipt.rejected,
                    "attempt": attempt,
                });
                // A retry may follow an attempt that already marked rows
                // failed, so recovery must cover both states.
                if let Err(err) = self
                    .events
                    .transition(
                        &job.user_id,
                        &job.message_id,
                        &[EventType::Queued, EventType::Failed],
                        EventType::Sent,
                        metadata,
                    )
                    .await
                {
                    error!(error = %err, message_id = %job.message_id, "sent transition failed");
                }
                info!(
                    message_id = %job.message_id,
                    recipients = job.to.len(),
                    attempt,
                    "message relayed"
                );
            }
            Err(err) => {
                let metadata = json!({
                    "error": err.to_string(),
                    "code": err.code(),
                    "attempt": attempt,
                });
                if let Err(store_err) = self
                    .events
                    .transition(
                        &job.user_id,
                        &job.message_id,
                        &[EventType::Queued],
                        EventType::Failed,
                        metadata,
                    )
                    .await
                {
                    error!(error = %store_err, message_id = %job.message_id, "failed transition failed");
                }

                if attempt >= self.config.max_attempts {
                    warn!(
                        message_id = %job.message_id,
                        attempt,
                        error = %err,
                        "delivery abandoned; releasing quota"
                    );
                    if let Err(billing_err) = self
                        .billing
                        .release(&job.user_id, job.to.len() as i32)
                        .await
                    {
                        error!(error = %billing_err, user_id = %job.user_id, "quota rollback failed");
                    }
                } else {
                    let delay = self.config.backoff_delay(attempt);
                    warn!(
                        message_id = %job.message_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "delivery attempt failed; retrying"
                    );
                    if let Err(queue_err) = self.queue.retry(&job, attempt + 1, delay).await {
                        error!(error = %queue_err, job_id = %job.job_id, "retry enqueue failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::NewEmailEvent;
    use crate::domain::ports::MailError;
    use crate::domain::test_support::{
        sample_job, InMemoryBilling, InMemoryEvents, RecordingQueue, StubMailer,
    };
    use rstest::rstest;

    fn worker(
        queue: Arc<RecordingQueue>,
        mailer: Arc<StubMailer>,
        events: Arc<InMemoryEvents>,
        billing: Arc<InMemoryBilling>,
    ) -> DeliveryWorker {
        DeliveryWorker::new(queue, mailer, events, billing, WorkerConfig::default())
    }

    fn queued_rows(events: &InMemoryEvents, job: &DeliveryJob) {
        for recipient in &job.to {
            events.push(NewEmailEvent::new(
                &job.user_id,
                &job.message_id,
                EventType::Queued,
                recipient,
                &job.sending_domain,
            ));
        }
    }

    #[rstest]
    #[case(1, Duration::from_secs(1))]
    #[case(2, Duration::from_secs(2))]
    #[case(3, Duration::from_secs(4))]
    fn backoff_doubles_from_one_second(#[case] attempt: u32, #[case] expected: Duration) {
        assert_eq!(WorkerConfig::default().backoff_delay(attempt), expected);
    }

    #[test]
    fn envelope_carries_tracer_and_caller_headers() {
        let mut job = sample_job();
        job.headers = vec![("X-Campaign".to_owned(), "launch".to_owned())];
        let envelope = job.envelope();

        assert_eq!(envelope.message_id, job.message_id);
        let names: Vec<&str> = envelope.headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            ["X-Message-Id", "X-User-Id", "X-Domain-Id", "X-API-Key-Id", "X-Campaign"]
        );
    }

    #[tokio::test]
    async fn accepted_send_transitions_rows_to_sent() {
        let (queue, mailer, events, billing) = fixtures();
        let job = sample_job();
        queued_rows(&events, &job);

        worker(queue, mailer, events.clone(), billing)
            .process(QueuedDelivery { job, attempt: 1 })
            .await;

        let rows = events.rows.lock().expect("rows");
        assert!(rows.iter().all(|r| r.event_type == EventType::Sent));
        let metadata = rows[0].metadata.as_ref().expect("metadata");
        assert_eq!(metadata["attempt"], json!(1));
        assert!(metadata.get("relayResponse").is_some());
    }

    #[tokio::test]
    async fn failed_attempt_marks_rows_and_schedules_retry() {
        let (queue, mailer, events, billing) = fixtures();
        mailer.fail_next(MailError::rejected("greylisted", Some(451)));
        let job = sample_job();
        queued_rows(&events, &job);

        worker(queue.clone(), mailer, events.clone(), billing.clone())
            .process(QueuedDelivery {
                job: job.clone(),
                attempt: 1,
            })
            .await;

        let rows = events.rows.lock().expect("rows");
        assert!(rows.iter().all(|r| r.event_type == EventType::Failed));
        assert_eq!(
            rows[0].metadata.as_ref().expect("metadata")["code"],
            json!(451)
        );

        let retries = queue.retries.lock().expect("retries");
        assert_eq!(retries.len(), 1);
        assert_eq!(retries[0].1, 2, "next attempt number");
        assert_eq!(retries[0].2, Duration::from_secs(1));
        assert_eq!(billing.used("u1"), 0, "no rollback before terminal attempt");
    }

    #[tokio::test]
    async fn terminal_failure_rolls_back_quota_without_retry() {
        let (queue, mailer, events, billing) = fixtures();
        billing.seed("bill-1", "u1", 100, 2);
        mailer.fail_next(MailError::connection("refused"));
        let job = sample_job();
        queued_rows(&events, &job);

        worker(queue.clone(), mailer, events, billing.clone())
            .process(QueuedDelivery {
                job: job.clone(),
                attempt: 3,
            })
            .await;

        assert!(queue.retries.lock().expect("retries").is_empty());
        assert_eq!(billing.used("u1"), 2 - job.to.len() as i32);
    }

    #[tokio::test]
    async fn rollback_clamps_at_zero() {
        let (queue, mailer, events, billing) = fixtures();
        billing.seed("bill-1", "u1", 100, 1);
        mailer.fail_next(MailError::connection("refused"));
        let mut job = sample_job();
        job.to = vec!["a@x.com".into(), "b@x.com".into(), "c@x.com".into()];
        queued_rows(&events, &job);

        worker(queue, mailer, events, billing.clone())
            .process(QueuedDelivery { job, attempt: 3 })
            .await;

        assert_eq!(billing.used("u1"), 0);
    }

    #[tokio::test]
    async fn retry_success_recovers_rows_marked_failed() {
        let (queue, mailer, events, billing) = fixtures();
        let job = sample_job();
        queued_rows(&events, &job);
        // First attempt failed and marked the rows.
        mailer.fail_next(MailError::connection("refused"));
        let w = worker(queue, mailer, events.clone(), billing);
        w.process(QueuedDelivery {
            job: job.clone(),
            attempt: 1,
        })
        .await;
        // Second attempt succeeds.
        w.process(QueuedDelivery { job, attempt: 2 }).await;

        let rows = events.rows.lock().expect("rows");
        assert!(rows.iter().all(|r| r.event_type == EventType::Sent));
    }

    #[tokio::test]
    async fn transitions_never_touch_downstream_rows() {
        let (queue, mailer, events, billing) = fixtures();
        let job = sample_job();
        queued_rows(&events, &job);
        events.push(
            NewEmailEvent::new(
                &job.user_id,
                &job.message_id,
                EventType::Opened,
                &job.to[0],
                &job.sending_domain,
            ),
        );

        worker(queue, mailer, events.clone(), billing)
            .process(QueuedDelivery { job, attempt: 1 })
            .await;

        let rows = events.rows.lock().expect("rows");
        assert!(rows.iter().any(|r| r.event_type == EventType::Opened));
        assert!(rows.iter().any(|r| r.event_type == EventType::Sent));
    }

    #[tokio::test]
    async fn run_drains_queue_and_stops_on_shutdown() {
        let (queue, mailer, events, billing) = fixtures();
        let job = sample_job();
        queued_rows(&events, &job);
        queue
            .push(QueuedDelivery {
                job: job.clone(),
                attempt: 1,
            })
            .await;

        let worker = worker(queue, mailer, events.clone(), billing);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run(rx).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).expect("signal shutdown");
        handle.await.expect("worker exits");

        let rows = events.rows.lock().expect("rows");
        assert!(rows.iter().all(|r| r.event_type == EventType::Sent));
    }

    fn fixtures() -> (
        Arc<RecordingQueue>,
        Arc<StubMailer>,
        Arc<InMemoryEvents>,
        Arc<InMemoryBilling>,
    ) {
        (
            Arc::new(RecordingQueue::default()),
            Arc::new(StubMailer::default()),
            Arc::new(InMemoryEvents::default()),
            Arc::new(InMemoryBilling::default()),
        )
    }
}
