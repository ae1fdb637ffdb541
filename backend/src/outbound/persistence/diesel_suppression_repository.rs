//! PostgreSQL-backed `SuppressionRepository` implementation.

use std::str::FromStr;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde_json::Value;

use crate::domain::ports::{StoreError, SuppressionRepository};
use crate::domain::suppression::{
    NewSuppression, Suppression, SuppressionFilter, SuppressionReason,
};

use super::map_diesel_error;
use super::models::{NewSuppressionRow, SuppressionRow};
use super::pool::DbPool;
use super::schema::email_suppressions;

/// Diesel-backed implementation of the `SuppressionRepository` port.
#[derive(Clone)]
pub struct DieselSuppressionRepository {
    pool: DbPool,
}

impl DieselSuppressionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn to_domain(row: SuppressionRow) -> Result<Suppression, StoreError> {
    let reason = SuppressionReason::from_str(&row.reason)
        .map_err(|_| StoreError::query(format!("invalid suppression reason in row {}", row.id)))?;
    Ok(Suppression {
        id: row.id,
        user_id: row.user_id,
        domain_id: row.domain_id,
        email: row.email,
        reason,
        source_event_id: row.source_event_id,
        metadata: row.metadata,
        created_at: row.created_at,
    })
}

#[async_trait]
impl SuppressionRepository for DieselSuppressionRepository {
    async fn find_blocking(
        &self,
        user_id: &str,
        emails: &[String],
        domain_id: Option<&str>,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.pool.get().await?;

        let mut query = email_suppressions::table
            .select(email_suppressions::email)
            .distinct()
            .into_boxed();
        query = query
            .filter(email_suppressions::user_id.eq(user_id.to_owned()))
            .filter(email_suppressions::email.eq_any(emails.to_vec()))
            .filter(email_suppressions::reason.eq_any(SuppressionReason::blocking_set()));
        query = match domain_id {
            Some(domain_id) => query.filter(
                email_suppressions::domain_id
                    .is_null()
                    .or(email_suppressions::domain_id.eq(domain_id.to_owned())),
            ),
            None => query.filter(email_suppressions::domain_id.is_null()),
        };

        query.load(&mut conn).await.map_err(map_diesel_error)
    }

    async fn find_by_email(
        &self,
        user_id: &str,
        email: &str,
    ) -> Result<Option<Suppression>, StoreError> {
        let mut conn = self.pool.get().await?;
        let row: Option<SuppressionRow> = email_suppressions::table
            .filter(
                email_suppressions::user_id
                    .eq(user_id)
                    .and(email_suppressions::email.eq(email)),
            )
            .select(SuppressionRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;
        row.map(to_domain).transpose()
    }

    async fn insert(&self, row: &NewSuppression) -> Result<Suppression, StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(email_suppressions::table)
            .values(NewSuppressionRow {
                id: &row.id,
                user_id: &row.user_id,
                domain_id: row.domain_id.as_deref(),
                email: &row.email,
                reason: row.reason.as_str(),
                source_event_id: row.source_event_id.as_deref(),
                metadata: row.metadata.as_ref(),
                created_at: row.created_at,
            })
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        Ok(Suppression {
            id: row.id.clone(),
            user_id: row.user_id.clone(),
            domain_id: row.domain_id.clone(),
            email: row.email.clone(),
            reason: row.reason,
            source_event_id: row.source_event_id.clone(),
            metadata: row.metadata.clone(),
            created_at: row.created_at,
        })
    }

    async fn update(
        &self,
        id: &str,
        reason: SuppressionReason,
        metadata: Value,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::update(email_suppressions::table.find(id))
            .set((
                email_suppressions::reason.eq(reason.as_str()),
                email_suppressions::metadata.eq(Some(metadata)),
            ))
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(map_diesel_error)
    }

    async fn delete(&self, user_id: &str, id: &str) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;
        let deleted = diesel::delete(
            email_suppressions::table.filter(
                email_suppressions::id
                    .eq(id)
                    .and(email_suppressions::user_id.eq(user_id)),
            ),
        )
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error)?;
        Ok(deleted > 0)
    }

    async fn list(
        &self,
        user_id: &str,
        filter: &SuppressionFilter,
    ) -> Result<(Vec<Suppression>, i64), StoreError> {
        let mut conn = self.pool.get().await?;

        macro_rules! apply_filters {
            ($query:expr) => {{
                let mut q = $query;
                q = q.filter(email_suppressions::user_id.eq(user_id.to_owned()));
                if let Some(reason) = filter.reason {
                    q = q.filter(email_suppressions::reason.eq(reason.as_str()));
                }
                if let Some(email) = &filter.email {
                    q = q.filter(email_suppressions::email.like(format!("%{email}%")));
                }
                if let Some(domain_id) = &filter.domain_id {
                    q = q.filter(email_suppressions::domain_id.eq(domain_id.to_owned()));
                }
                q
            }};
        }

        let total: i64 = apply_filters!(email_suppressions::table.count().into_boxed())
            .get_result(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        let rows: Vec<SuppressionRow> = apply_filters!(email_suppressions::table
            .select(SuppressionRow::as_select())
            .order(email_suppressions::created_at.desc())
            .into_boxed())
        .limit(filter.limit)
        .offset(filter.offset())
        .load(&mut conn)
        .await
        .map_err(map_diesel_error)?;

        let suppressions = rows
            .into_iter()
            .map(to_domain)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((suppressions, total))
    }

    async fn counts_by_reason(&self, user_id: &str) -> Result<Vec<(String, i64)>, StoreError> {
        let mut conn = self.pool.get().await?;
        email_suppressions::table
            .group_by(email_suppressions::reason)
            .select((email_suppressions::reason, diesel::dsl::count_star()))
            .filter(email_suppressions::user_id.eq(user_id))
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)
    }
}
