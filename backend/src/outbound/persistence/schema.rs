//! Diesel table definitions for the PostgreSQL schema.
//!
//! These definitions must match the database migrations exactly; Diesel uses
//! them for compile-time query validation and type-safe SQL generation. All
//! primary keys are opaque strings minted by the application (or by the
//! admin surface for externally managed tables).

diesel::table! {
    /// Tenant accounts. Managed externally; read-only here.
    users (id) {
        id -> Varchar,
        email -> Varchar,
        name -> Nullable<Varchar>,
    }
}

diesel::table! {
    /// Sending domains. `txt_verified` gates every send.
    domains (id) {
        id -> Varchar,
        user_id -> Varchar,
        /// Stored lowercased.
        name -> Varchar,
        txt_verified -> Bool,
    }
}

diesel::table! {
    /// Issued API keys; unique by `key_hash`.
    domain_api_keys (id) {
        id -> Varchar,
        user_id -> Varchar,
        domain_id -> Varchar,
        name -> Varchar,
        /// SHA-256 hex of the raw key.
        key_hash -> Varchar,
        is_active -> Bool,
        last_used_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    /// Monthly quota counters, one row per billed tenant.
    user_billing (id) {
        id -> Varchar,
        user_id -> Varchar,
        email_limit -> Int4,
        email_used -> Int4,
    }
}

diesel::table! {
    /// Stored templates; unique per (user_id, slug).
    email_templates (id) {
        id -> Varchar,
        user_id -> Varchar,
        slug -> Varchar,
        subject -> Varchar,
        html_content -> Text,
        is_active -> Bool,
    }
}

diesel::table! {
    /// Declared template variables and their defaults.
    email_template_variables (id) {
        id -> Varchar,
        template_id -> Varchar,
        name -> Varchar,
        default_value -> Nullable<Varchar>,
    }
}

diesel::table! {
    /// Lifecycle event stream; ids are time-sortable.
    email_events (id) {
        id -> Varchar,
        user_id -> Varchar,
        message_id -> Varchar,
        event_type -> Varchar,
        recipient_email -> Varchar,
        sending_domain -> Varchar,
        subject -> Nullable<Varchar>,
        metadata -> Nullable<Jsonb>,
        ip_address -> Nullable<Varchar>,
        user_agent -> Nullable<Varchar>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Open-pixel rows, one per (message, recipient).
    email_tracking_opens (id) {
        id -> Varchar,
        user_id -> Varchar,
        message_id -> Varchar,
        recipient_email -> Varchar,
        sending_domain -> Varchar,
        opened_at -> Nullable<Timestamptz>,
        open_count -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Click-redirect rows, one per distinct URL in a message.
    email_tracking_links (id) {
        id -> Varchar,
        user_id -> Varchar,
        message_id -> Varchar,
        recipient_email -> Varchar,
        sending_domain -> Varchar,
        original_url -> Text,
        clicked_at -> Nullable<Timestamptz>,
        click_count -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Suppression list; unique per (user_id, email).
    email_suppressions (id) {
        id -> Varchar,
        user_id -> Varchar,
        domain_id -> Nullable<Varchar>,
        email -> Varchar,
        reason -> Varchar,
        source_event_id -> Nullable<Varchar>,
        metadata -> Nullable<Jsonb>,
        created_at -> Timestamptz,
    }
}
