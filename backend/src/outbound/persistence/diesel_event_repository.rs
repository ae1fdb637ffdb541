//! PostgreSQL-backed `EventRepository` implementation.
//!
//! Listing filters are applied identically to the page query and the count
//! query; a local macro keeps the two in lockstep.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde_json::Value;

use crate::domain::events::{EmailEvent, EventFilter, EventType, NewEmailEvent};
use crate::domain::ports::{EventRepository, StoreError};

use super::map_diesel_error;
use super::models::{EventRow, NewEventRow};
use super::pool::DbPool;
use super::schema::email_events;

/// Diesel-backed implementation of the `EventRepository` port.
#[derive(Clone)]
pub struct DieselEventRepository {
    pool: DbPool,
}

impl DieselEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn to_insert_row(event: &NewEmailEvent) -> NewEventRow<'_> {
    NewEventRow {
        id: &event.id,
        user_id: &event.user_id,
        message_id: &event.message_id,
        event_type: event.event_type.as_str(),
        recipient_email: &event.recipient_email,
        sending_domain: &event.sending_domain,
        subject: event.subject.as_deref(),
        metadata: event.metadata.as_ref(),
        ip_address: event.ip_address.as_deref(),
        user_agent: event.user_agent.as_deref(),
        created_at: event.created_at,
    }
}

fn to_domain(row: EventRow) -> Result<EmailEvent, StoreError> {
    let event_type = EventType::from_str(&row.event_type)
        .map_err(|_| StoreError::query(format!("invalid event type in row {}", row.id)))?;
    Ok(EmailEvent {
        id: row.id,
        user_id: row.user_id,
        message_id: row.message_id,
        event_type,
        recipient_email: row.recipient_email,
        sending_domain: row.sending_domain,
        subject: row.subject,
        metadata: row.metadata,
        ip_address: row.ip_address,
        user_agent: row.user_agent,
        created_at: row.created_at,
    })
}

#[async_trait]
impl EventRepository for DieselEventRepository {
    async fn insert(&self, event: &NewEmailEvent) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(email_events::table)
            .values(to_insert_row(event))
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(map_diesel_error)
    }

    async fn insert_batch(&self, events: &[NewEmailEvent]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get().await?;
        let rows: Vec<NewEventRow<'_>> = events.iter().map(to_insert_row).collect();
        diesel::insert_into(email_events::table)
            .values(&rows)
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(map_diesel_error)
    }

    async fn transition(
        &self,
        user_id: &str,
        message_id: &str,
        from: &[EventType],
        to: EventType,
        metadata: Value,
    ) -> Result<u64, StoreError> {
        let mut conn = self.pool.get().await?;
        let from_states: Vec<&'static str> = from.iter().map(|t| t.as_str()).collect();
        let touched = diesel::update(
            email_events::table.filter(
                email_events::user_id
                    .eq(user_id)
                    .and(email_events::message_id.eq(message_id))
                    .and(email_events::event_type.eq_any(from_states)),
            ),
        )
        .set((
            email_events::event_type.eq(to.as_str()),
            email_events::metadata.eq(Some(metadata)),
        ))
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error)?;
        Ok(touched as u64)
    }

    async fn list(
        &self,
        user_id: &str,
        filter: &EventFilter,
    ) -> Result<(Vec<EmailEvent>, i64), StoreError> {
        let mut conn = self.pool.get().await?;

        macro_rules! apply_filters {
            ($query:expr) => {{
                let mut q = $query;
                q = q.filter(email_events::user_id.eq(user_id.to_owned()));
                if let Some(event_type) = filter.event_type {
                    q = q.filter(email_events::event_type.eq(event_type.as_str()));
                }
                if let Some(recipient) = &filter.recipient_email {
                    q = q.filter(email_events::recipient_email.like(format!("%{recipient}%")));
                }
                if let Some(message_id) = &filter.message_id {
                    q = q.filter(email_events::message_id.eq(message_id.to_owned()));
                }
                if let Some(start) = filter.start_date {
                    q = q.filter(email_events::created_at.ge(start));
                }
                if let Some(end) = filter.end_date {
                    q = q.filter(email_events::created_at.le(end));
                }
                q
            }};
        }

        let total: i64 = apply_filters!(email_events::table.count().into_boxed())
            .get_result(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        let rows: Vec<EventRow> = apply_filters!(email_events::table
            .select(EventRow::as_select())
            .order(email_events::created_at.desc())
            .into_boxed())
        .limit(filter.limit)
        .offset(filter.offset())
        .load(&mut conn)
        .await
        .map_err(map_diesel_error)?;

        let events = rows
            .into_iter()
            .map(to_domain)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((events, total))
    }

    async fn list_for_message(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> Result<Vec<EmailEvent>, StoreError> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<EventRow> = email_events::table
            .filter(
                email_events::user_id
                    .eq(user_id)
                    .and(email_events::message_id.eq(message_id)),
            )
            .order(email_events::created_at.asc())
            .select(EventRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        rows.into_iter().map(to_domain).collect()
    }

    async fn count_by_type(
        &self,
        user_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let mut conn = self.pool.get().await?;

        let mut query = email_events::table
            .group_by(email_events::event_type)
            .select((email_events::event_type, diesel::dsl::count_star()))
            .into_boxed();
        query = query.filter(email_events::user_id.eq(user_id.to_owned()));
        if let Some(start) = start {
            query = query.filter(email_events::created_at.ge(start));
        }
        if let Some(end) = end {
            query = query.filter(email_events::created_at.le(end));
        }

        query.load(&mut conn).await.map_err(map_diesel_error)
    }
}
