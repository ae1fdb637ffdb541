//! Redis-backed implementation of the `JobQueue` port.
//!
//! Layout: a ready list (`LPUSH`/`BRPOP`), a sorted set of delayed retries
//! scored by their ready-at time, and a per-job dedup key written with
//! `SET NX EX`. A job id is accepted once; re-submission is a no-op until the
//! dedup key expires. Delivery is at-least-once: a worker that dies between
//! `BRPOP` and completion loses nothing but its in-flight job.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use tracing::debug;

use crate::domain::delivery::{DeliveryJob, QueuedDelivery};
use crate::domain::ports::{EnqueueOutcome, JobQueue, QueueError};

/// Dedup keys outlive any realistic retry horizon.
const DEDUP_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Delayed jobs promoted per dequeue call.
const PROMOTE_BATCH: isize = 16;

/// Redis-backed durable job queue.
#[derive(Clone)]
pub struct RedisJobQueue {
    conn: ConnectionManager,
    ready_key: String,
    delayed_key: String,
    dedup_prefix: String,
}

impl RedisJobQueue {
    /// Connect to the broker at `url` using the given key namespace.
    pub async fn connect(url: &str, namespace: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)
            .map_err(|err| QueueError::unavailable(format!("invalid redis url: {err}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|err| QueueError::unavailable(err.to_string()))?;
        Ok(Self::with_connection(conn, namespace))
    }

    fn with_connection(conn: ConnectionManager, namespace: &str) -> Self {
        Self {
            conn,
            ready_key: format!("{namespace}:ready"),
            delayed_key: format!("{namespace}:delayed"),
            dedup_prefix: format!("{namespace}:dedup:"),
        }
    }

    /// Move due delayed jobs onto the ready list.
    async fn promote_due(&self, conn: &mut ConnectionManager) -> Result<(), QueueError> {
        let now = Utc::now().timestamp_millis();
        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.delayed_key)
            .arg("-inf")
            .arg(now)
            .arg("LIMIT")
            .arg(0)
            .arg(PROMOTE_BATCH)
            .query_async(conn)
            .await
            .map_err(|err| QueueError::unavailable(err.to_string()))?;

        for payload in due {
            // Only the worker that wins the ZREM moves the job.
            let removed: i64 = redis::cmd("ZREM")
                .arg(&self.delayed_key)
                .arg(&payload)
                .query_async(conn)
                .await
                .map_err(|err| QueueError::unavailable(err.to_string()))?;
            if removed > 0 {
                let _: i64 = redis::cmd("LPUSH")
                    .arg(&self.ready_key)
                    .arg(&payload)
                    .query_async(conn)
                    .await
                    .map_err(|err| QueueError::unavailable(err.to_string()))?;
            }
        }
        Ok(())
    }
}

fn encode(delivery: &QueuedDelivery) -> Result<String, QueueError> {
    serde_json::to_string(delivery).map_err(|err| QueueError::payload(err.to_string()))
}

fn decode(payload: &str) -> Result<QueuedDelivery, QueueError> {
    serde_json::from_str(payload).map_err(|err| QueueError::payload(err.to_string()))
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &DeliveryJob) -> Result<EnqueueOutcome, QueueError> {
        let mut conn = self.conn.clone();

        let dedup_key = format!("{}{}", self.dedup_prefix, job.job_id);
        let acquired: Option<String> = redis::cmd("SET")
            .arg(&dedup_key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(DEDUP_TTL_SECS)
            .query_async(&mut conn)
            .await
            .map_err(|err| QueueError::unavailable(err.to_string()))?;
        if acquired.is_none() {
            debug!(job_id = %job.job_id, "duplicate job submission ignored");
            return Ok(EnqueueOutcome::Duplicate);
        }

        let payload = encode(&QueuedDelivery {
            job: job.clone(),
            attempt: 1,
        })?;
        let _: i64 = redis::cmd("LPUSH")
            .arg(&self.ready_key)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|err| QueueError::unavailable(err.to_string()))?;
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<QueuedDelivery>, QueueError> {
        let mut conn = self.conn.clone();
        self.promote_due(&mut conn).await?;

        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&self.ready_key)
            .arg(wait.as_secs_f64().max(0.1))
            .query_async(&mut conn)
            .await
            .map_err(|err| QueueError::unavailable(err.to_string()))?;
        popped.map(|(_, payload)| decode(&payload)).transpose()
    }

    async fn retry(
        &self,
        job: &DeliveryJob,
        attempt: u32,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let payload = encode(&QueuedDelivery {
            job: job.clone(),
            attempt,
        })?;
        let _: i64 = redis::cmd("ZADD")
            .arg(&self.delayed_key)
            .arg(ready_at)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|err| QueueError::unavailable(err.to_string()))?;
        Ok(())
    }
}
