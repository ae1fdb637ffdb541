//! Driven adapters: PostgreSQL persistence, the Redis job queue, and the
//! SMTP relay client.

pub mod mailer;
pub mod persistence;
pub mod queue;
