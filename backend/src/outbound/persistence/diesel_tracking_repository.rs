//! PostgreSQL-backed `TrackingRepository` implementation.
//!
//! Counter bumps are single SQL expressions (`open_count = open_count + 1`)
//! so concurrent pixel hits never lose increments; `opened_at`/`clicked_at`
//! are only written on first touch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::domain::ports::{StoreError, TrackingRepository};
use crate::domain::tracking::{NewTrackingLink, NewTrackingOpen, TrackingLink, TrackingOpen};

use super::map_diesel_error;
use super::models::{NewTrackingLinkRow, NewTrackingOpenRow, TrackingLinkRow, TrackingOpenRow};
use super::pool::DbPool;
use super::schema::{email_tracking_links, email_tracking_opens};

/// Diesel-backed implementation of the `TrackingRepository` port.
#[derive(Clone)]
pub struct DieselTrackingRepository {
    pool: DbPool,
}

impl DieselTrackingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn open_to_domain(row: TrackingOpenRow) -> TrackingOpen {
    TrackingOpen {
        id: row.id,
        user_id: row.user_id,
        message_id: row.message_id,
        recipient_email: row.recipient_email,
        sending_domain: row.sending_domain,
        opened_at: row.opened_at,
        open_count: row.open_count,
        created_at: row.created_at,
    }
}

fn link_to_domain(row: TrackingLinkRow) -> TrackingLink {
    TrackingLink {
        id: row.id,
        user_id: row.user_id,
        message_id: row.message_id,
        recipient_email: row.recipient_email,
        sending_domain: row.sending_domain,
        original_url: row.original_url,
        clicked_at: row.clicked_at,
        click_count: row.click_count,
        created_at: row.created_at,
    }
}

#[async_trait]
impl TrackingRepository for DieselTrackingRepository {
    async fn insert_opens(&self, rows: &[NewTrackingOpen]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get().await?;
        let insert_rows: Vec<NewTrackingOpenRow<'_>> = rows
            .iter()
            .map(|row| NewTrackingOpenRow {
                id: &row.id,
                user_id: &row.user_id,
                message_id: &row.message_id,
                recipient_email: &row.recipient_email,
                sending_domain: &row.sending_domain,
                open_count: 0,
                created_at: row.created_at,
            })
            .collect();
        diesel::insert_into(email_tracking_opens::table)
            .values(&insert_rows)
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(map_diesel_error)
    }

    async fn insert_links(&self, rows: &[NewTrackingLink]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get().await?;
        let insert_rows: Vec<NewTrackingLinkRow<'_>> = rows
            .iter()
            .map(|row| NewTrackingLinkRow {
                id: &row.id,
                user_id: &row.user_id,
                message_id: &row.message_id,
                recipient_email: &row.recipient_email,
                sending_domain: &row.sending_domain,
                original_url: &row.original_url,
                click_count: 0,
                created_at: row.created_at,
            })
            .collect();
        diesel::insert_into(email_tracking_links::table)
            .values(&insert_rows)
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(map_diesel_error)
    }

    async fn find_open(&self, id: &str) -> Result<Option<TrackingOpen>, StoreError> {
        let mut conn = self.pool.get().await?;
        let row: Option<TrackingOpenRow> = email_tracking_opens::table
            .find(id)
            .select(TrackingOpenRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;
        Ok(row.map(open_to_domain))
    }

    async fn record_open(
        &self,
        id: &str,
        first_touch: bool,
        at: DateTime<Utc>,
    ) -> Result<i32, StoreError> {
        let mut conn = self.pool.get().await?;
        let target = diesel::update(email_tracking_opens::table.find(id));
        let new_count = if first_touch {
            target
                .set((
                    email_tracking_opens::open_count.eq(email_tracking_opens::open_count + 1),
                    email_tracking_opens::opened_at.eq(Some(at)),
                ))
                .returning(email_tracking_opens::open_count)
                .get_result(&mut conn)
                .await
        } else {
            target
                .set(email_tracking_opens::open_count.eq(email_tracking_opens::open_count + 1))
                .returning(email_tracking_opens::open_count)
                .get_result(&mut conn)
                .await
        };
        new_count.map_err(map_diesel_error)
    }

    async fn find_link(&self, id: &str) -> Result<Option<TrackingLink>, StoreError> {
        let mut conn = self.pool.get().await?;
        let row: Option<TrackingLinkRow> = email_tracking_links::table
            .find(id)
            .select(TrackingLinkRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;
        Ok(row.map(link_to_domain))
    }

    async fn record_click(
        &self,
        id: &str,
        first_touch: bool,
        at: DateTime<Utc>,
    ) -> Result<i32, StoreError> {
        let mut conn = self.pool.get().await?;
        let target = diesel::update(email_tracking_links::table.find(id));
        let new_count = if first_touch {
            target
                .set((
                    email_tracking_links::click_count.eq(email_tracking_links::click_count + 1),
                    email_tracking_links::clicked_at.eq(Some(at)),
                ))
                .returning(email_tracking_links::click_count)
                .get_result(&mut conn)
                .await
        } else {
            target
                .set(email_tracking_links::click_count.eq(email_tracking_links::click_count + 1))
                .returning(email_tracking_links::click_count)
                .get_result(&mut conn)
                .await
        };
        new_count.map_err(map_diesel_error)
    }
}
