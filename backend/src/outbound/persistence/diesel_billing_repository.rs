//! PostgreSQL-backed `BillingRepository` implementation.
//!
//! Quota arithmetic is expressed in SQL (`email_used = email_used + N`,
//! `GREATEST(0, email_used - N)`) so concurrent requests never lose updates
//! to read-modify-write races.

use async_trait::async_trait;
use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use diesel_async::RunQueryDsl;

use crate::domain::ports::{BillingRepository, StoreError};

use super::map_diesel_error;
use super::pool::DbPool;
use super::schema::user_billing;

/// Diesel-backed implementation of the `BillingRepository` port.
#[derive(Clone)]
pub struct DieselBillingRepository {
    pool: DbPool,
}

impl DieselBillingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingRepository for DieselBillingRepository {
    async fn reserve(&self, billing_id: &str, count: i32) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::update(user_billing::table.find(billing_id))
            .set(user_billing::email_used.eq(user_billing::email_used + count))
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(map_diesel_error)
    }

    async fn release(&self, user_id: &str, count: i32) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::update(user_billing::table.filter(user_billing::user_id.eq(user_id)))
            .set(
                user_billing::email_used.eq(sql::<Integer>("GREATEST(0, email_used - ")
                    .bind::<Integer, _>(count)
                    .sql(")")),
            )
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(map_diesel_error)
    }
}
