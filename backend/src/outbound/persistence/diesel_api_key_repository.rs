//! PostgreSQL-backed `ApiKeyRepository` implementation.
//!
//! Resolves a key hash to its full tenancy bundle with sequential lookups:
//! key, domain, user, then the user's first billing row. A key whose domain
//! or user row is missing is a data integrity fault surfaced as a query
//! error, not as an authentication miss.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::domain::auth::{ApiKeyRecord, AuthContext, BillingRecord, DomainRecord, UserRecord};
use crate::domain::ports::{ApiKeyRepository, StoreError};

use super::map_diesel_error;
use super::models::{ApiKeyRow, BillingRow, DomainRow, UserRow};
use super::pool::DbPool;
use super::schema::{domain_api_keys, domains, user_billing, users};

/// Diesel-backed implementation of the `ApiKeyRepository` port.
#[derive(Clone)]
pub struct DieselApiKeyRepository {
    pool: DbPool,
}

impl DieselApiKeyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyRepository for DieselApiKeyRepository {
    async fn find_by_key_hash(&self, key_hash: &str) -> Result<Option<AuthContext>, StoreError> {
        let mut conn = self.pool.get().await?;

        let key: Option<ApiKeyRow> = domain_api_keys::table
            .filter(domain_api_keys::key_hash.eq(key_hash))
            .select(ApiKeyRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;
        let Some(key) = key else {
            return Ok(None);
        };

        let domain: DomainRow = domains::table
            .find(&key.domain_id)
            .select(DomainRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?
            .ok_or_else(|| StoreError::query(format!("domain {} missing for key", key.domain_id)))?;

        let user: UserRow = users::table
            .find(&key.user_id)
            .select(UserRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?
            .ok_or_else(|| StoreError::query(format!("user {} missing for key", key.user_id)))?;

        let billing: Option<BillingRow> = user_billing::table
            .filter(user_billing::user_id.eq(&key.user_id))
            .order(user_billing::id.asc())
            .select(BillingRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;

        Ok(Some(AuthContext {
            api_key: ApiKeyRecord {
                id: key.id,
                user_id: key.user_id,
                domain_id: key.domain_id,
                name: key.name,
                is_active: key.is_active,
            },
            domain: DomainRecord {
                id: domain.id,
                user_id: domain.user_id,
                name: domain.name,
                txt_verified: domain.txt_verified,
            },
            user: UserRecord {
                id: user.id,
                email: user.email,
                name: user.name,
            },
            billing: billing.map(|row| BillingRecord {
                id: row.id,
                user_id: row.user_id,
                email_limit: row.email_limit,
                email_used: row.email_used,
            }),
        }))
    }

    async fn touch_last_used(
        &self,
        api_key_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::update(domain_api_keys::table.find(api_key_id))
            .set(domain_api_keys::last_used_at.eq(Some(at)))
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(map_diesel_error)
    }
}
