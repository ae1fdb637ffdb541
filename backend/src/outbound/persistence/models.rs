//! Internal Diesel row structs for database operations.
//!
//! These types are implementation details of the persistence layer and must
//! never be exposed to the domain. Repository implementations convert between
//! them and domain types, keeping Diesel confined to this adapter.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

use super::schema::{
    domain_api_keys, domains, email_events, email_suppressions, email_template_variables,
    email_templates, email_tracking_links, email_tracking_opens, user_billing, users,
};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct UserRow {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = domains)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct DomainRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub txt_verified: bool,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = domain_api_keys)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct ApiKeyRow {
    pub id: String,
    pub user_id: String,
    pub domain_id: String,
    pub name: String,
    #[expect(dead_code, reason = "selected for completeness; lookups key on it")]
    pub key_hash: String,
    pub is_active: bool,
    #[expect(dead_code, reason = "written via targeted update only")]
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = user_billing)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct BillingRow {
    pub id: String,
    pub user_id: String,
    pub email_limit: i32,
    pub email_used: i32,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = email_templates)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct TemplateRow {
    pub id: String,
    pub user_id: String,
    pub slug: String,
    pub subject: String,
    pub html_content: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = email_template_variables)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct TemplateVariableRow {
    #[expect(dead_code, reason = "schema key; domain variables carry no id")]
    pub id: String,
    #[expect(dead_code, reason = "filtered on in the query, not read back")]
    pub template_id: String,
    pub name: String,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = email_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct EventRow {
    pub id: String,
    pub user_id: String,
    pub message_id: String,
    pub event_type: String,
    pub recipient_email: String,
    pub sending_domain: String,
    pub subject: Option<String>,
    pub metadata: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = email_events)]
pub(crate) struct NewEventRow<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub message_id: &'a str,
    pub event_type: &'a str,
    pub recipient_email: &'a str,
    pub sending_domain: &'a str,
    pub subject: Option<&'a str>,
    pub metadata: Option<&'a Value>,
    pub ip_address: Option<&'a str>,
    pub user_agent: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = email_tracking_opens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct TrackingOpenRow {
    pub id: String,
    pub user_id: String,
    pub message_id: String,
    pub recipient_email: String,
    pub sending_domain: String,
    pub opened_at: Option<DateTime<Utc>>,
    pub open_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = email_tracking_opens)]
pub(crate) struct NewTrackingOpenRow<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub message_id: &'a str,
    pub recipient_email: &'a str,
    pub sending_domain: &'a str,
    pub open_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = email_tracking_links)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct TrackingLinkRow {
    pub id: String,
    pub user_id: String,
    pub message_id: String,
    pub recipient_email: String,
    pub sending_domain: String,
    pub original_url: String,
    pub clicked_at: Option<DateTime<Utc>>,
    pub click_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = email_tracking_links)]
pub(crate) struct NewTrackingLinkRow<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub message_id: &'a str,
    pub recipient_email: &'a str,
    pub sending_domain: &'a str,
    pub original_url: &'a str,
    pub click_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = email_suppressions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct SuppressionRow {
    pub id: String,
    pub user_id: String,
    pub domain_id: Option<String>,
    pub email: String,
    pub reason: String,
    pub source_event_id: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = email_suppressions)]
pub(crate) struct NewSuppressionRow<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub domain_id: Option<&'a str>,
    pub email: &'a str,
    pub reason: &'a str,
    pub source_event_id: Option<&'a str>,
    pub metadata: Option<&'a Value>,
    pub created_at: DateTime<Utc>,
}
