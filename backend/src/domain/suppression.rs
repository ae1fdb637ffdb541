//! Recipient suppression: blocking checks, idempotent adds, and soft-bounce
//! accumulation.
//!
//! One row exists per (tenant, address). Reasons in the blocking set stop
//! future sends; `soft_bounce` is bookkeeping only until three bounces
//! promote the row to `hard_bounce`. Promotion is an update, never a second
//! row.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use utoipa::ToSchema;

use super::email::normalize_address;
use super::ids::event_id;
use super::ports::{map_store_error, StoreError, SuppressionRepository};
use super::Error;

/// Bounces tolerated before a `soft_bounce` row becomes `hard_bounce`.
pub const SOFT_BOUNCE_THRESHOLD: i64 = 3;

const UPGRADE_REASON: &str = "3 soft bounces within tracking window";

/// Why an address is on the suppression list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    HardBounce,
    SoftBounce,
    Complaint,
    Unsubscribe,
    Manual,
}

impl SuppressionReason {
    /// Storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            SuppressionReason::HardBounce => "hard_bounce",
            SuppressionReason::SoftBounce => "soft_bounce",
            SuppressionReason::Complaint => "complaint",
            SuppressionReason::Unsubscribe => "unsubscribe",
            SuppressionReason::Manual => "manual",
        }
    }

    /// Whether this reason prevents future sends. `soft_bounce` never blocks.
    pub fn is_blocking(self) -> bool {
        !matches!(self, SuppressionReason::SoftBounce)
    }

    /// The reasons that block sends, in storage form.
    pub fn blocking_set() -> [&'static str; 4] {
        ["hard_bounce", "complaint", "unsubscribe", "manual"]
    }
}

impl FromStr for SuppressionReason {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "hard_bounce" => Ok(SuppressionReason::HardBounce),
            "soft_bounce" => Ok(SuppressionReason::SoftBounce),
            "complaint" => Ok(SuppressionReason::Complaint),
            "unsubscribe" => Ok(SuppressionReason::Unsubscribe),
            "manual" => Ok(SuppressionReason::Manual),
            other => Err(Error::invalid_request(format!(
                "unknown suppression reason: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One suppression row.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Suppression {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_id: Option<String>,
    pub email: String,
    pub reason: SuppressionReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Suppression row pending insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSuppression {
    pub id: String,
    pub user_id: String,
    pub domain_id: Option<String>,
    pub email: String,
    pub reason: SuppressionReason,
    pub source_event_id: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Listing filter; same paging rules as the event listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuppressionFilter {
    pub page: i64,
    pub limit: i64,
    pub reason: Option<SuppressionReason>,
    pub email: Option<String>,
    pub domain_id: Option<String>,
}

impl SuppressionFilter {
    pub const DEFAULT_LIMIT: i64 = 20;
    pub const MAX_LIMIT: i64 = 100;

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

/// One page of suppressions plus pagination totals.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SuppressionPage {
    pub data: Vec<Suppression>,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

/// Per-reason row counts.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SuppressionStats {
    pub total: i64,
    pub by_reason: BTreeMap<String, i64>,
}

/// Fields accepted when creating a suppression.
#[derive(Debug, Clone)]
pub struct AddSuppression {
    pub user_id: String,
    pub email: String,
    pub reason: SuppressionReason,
    pub source_event_id: Option<String>,
    pub domain_id: Option<String>,
    pub metadata: Option<Value>,
}

/// Suppression operations shared by the send path, the events API, and the
/// suppression endpoints.
#[derive(Clone)]
pub struct SuppressionService {
    repo: Arc<dyn SuppressionRepository>,
}

impl SuppressionService {
    pub fn new(repo: Arc<dyn SuppressionRepository>) -> Self {
        Self { repo }
    }

    /// Of `emails`, return the lowercased addresses the tenant must not mail.
    ///
    /// With a `domain_id`, rows scoped to that domain block alongside global
    /// rows; without one, only global rows block.
    pub async fn check(
        &self,
        user_id: &str,
        emails: &[String],
        domain_id: Option<&str>,
    ) -> Result<Vec<String>, Error> {
        if emails.is_empty() {
            return Ok(Vec::new());
        }
        let normalized: Vec<String> = emails.iter().map(|e| normalize_address(e)).collect();
        self.repo
            .find_blocking(user_id, &normalized, domain_id)
            .await
            .map_err(map_store_error)
    }

    /// Insert a row unless one already exists for (tenant, address); the
    /// existing row is returned unchanged.
    pub async fn add(&self, request: AddSuppression) -> Result<Suppression, Error> {
        let email = normalize_address(&request.email);
        if email.is_empty() {
            return Err(Error::invalid_request("email is required"));
        }

        if let Some(existing) = self
            .repo
            .find_by_email(&request.user_id, &email)
            .await
            .map_err(map_store_error)?
        {
            return Ok(existing);
        }

        let row = NewSuppression {
            id: event_id(),
            user_id: request.user_id.clone(),
            domain_id: request.domain_id,
            email: email.clone(),
            reason: request.reason,
            source_event_id: request.source_event_id,
            metadata: request.metadata,
            created_at: Utc::now(),
        };
        match self.repo.insert(&row).await {
            Ok(created) => Ok(created),
            // A concurrent add for the same address won the unique race.
            Err(StoreError::Conflict { .. }) => self
                .repo
                .find_by_email(&request.user_id, &email)
                .await
                .map_err(map_store_error)?
                .ok_or_else(|| Error::internal("suppression row vanished after conflict")),
            Err(other) => Err(map_store_error(other)),
        }
    }

    /// Tenant-global add driven by an ingested event.
    pub async fn add_from_event(
        &self,
        user_id: &str,
        email: &str,
        reason: SuppressionReason,
        source_event_id: &str,
    ) -> Result<Suppression, Error> {
        self.add(AddSuppression {
            user_id: user_id.to_owned(),
            email: email.to_owned(),
            reason,
            source_event_id: Some(source_event_id.to_owned()),
            domain_id: None,
            metadata: None,
        })
        .await
    }

    /// Record one soft bounce; the third bounce promotes the row to
    /// `hard_bounce`. Rows with any other reason are left untouched.
    pub async fn handle_soft_bounce(
        &self,
        user_id: &str,
        email: &str,
        source_event_id: Option<&str>,
    ) -> Result<(), Error> {
        let email = normalize_address(email);
        let now = Utc::now();

        let Some(existing) = self
            .repo
            .find_by_email(user_id, &email)
            .await
            .map_err(map_store_error)?
        else {
            let row = NewSuppression {
                id: event_id(),
                user_id: user_id.to_owned(),
                domain_id: None,
                email,
                reason: SuppressionReason::SoftBounce,
                source_event_id: source_event_id.map(str::to_owned),
                metadata: Some(json!({
                    "softBounceCount": 1,
                    "firstBounceAt": now.to_rfc3339(),
                })),
                created_at: now,
            };
            return match self.repo.insert(&row).await {
                Ok(_) | Err(StoreError::Conflict { .. }) => Ok(()),
                Err(other) => Err(map_store_error(other)),
            };
        };

        if existing.reason != SuppressionReason::SoftBounce {
            // Never downgrade a blocking row to bookkeeping.
            return Ok(());
        }

        let mut metadata = existing
            .metadata
            .as_ref()
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(Map::new);
        let new_count = metadata
            .get("softBounceCount")
            .and_then(Value::as_i64)
            .unwrap_or(1)
            + 1;
        metadata.insert("softBounceCount".into(), json!(new_count));

        if new_count >= SOFT_BOUNCE_THRESHOLD {
            metadata.insert("upgradedAt".into(), json!(now.to_rfc3339()));
            metadata.insert("upgradeReason".into(), json!(UPGRADE_REASON));
            self.repo
                .update(
                    &existing.id,
                    SuppressionReason::HardBounce,
                    Value::Object(metadata),
                )
                .await
                .map_err(map_store_error)
        } else {
            metadata.insert("lastBounceAt".into(), json!(now.to_rfc3339()));
            self.repo
                .update(
                    &existing.id,
                    SuppressionReason::SoftBounce,
                    Value::Object(metadata),
                )
                .await
                .map_err(map_store_error)
        }
    }

    /// Delete a row the tenant owns.
    pub async fn remove(&self, user_id: &str, id: &str) -> Result<(), Error> {
        let deleted = self
            .repo
            .delete(user_id, id)
            .await
            .map_err(map_store_error)?;
        if deleted {
            Ok(())
        } else {
            Err(Error::not_found(format!("suppression {id} not found")))
        }
    }

    /// Filtered, paginated listing.
    pub async fn list(
        &self,
        user_id: &str,
        filter: SuppressionFilter,
    ) -> Result<SuppressionPage, Error> {
        let filter = filter.clamped();
        let (data, total) = self
            .repo
            .list(user_id, &filter)
            .await
            .map_err(map_store_error)?;
        let total_pages = if total == 0 {
            0
        } else {
            (total + filter.limit - 1) / filter.limit
        };
        Ok(SuppressionPage {
            data,
            page: filter.page,
            limit: filter.limit,
            total,
            total_pages,
        })
    }

    /// Row counts grouped by reason.
    pub async fn stats(&self, user_id: &str) -> Result<SuppressionStats, Error> {
        let by_reason: BTreeMap<String, i64> = self
            .repo
            .counts_by_reason(user_id)
            .await
            .map_err(map_store_error)?
            .into_iter()
            .collect();
        Ok(SuppressionStats {
            total: by_reason.values().sum(),
            by_reason,
        })
    }
}
