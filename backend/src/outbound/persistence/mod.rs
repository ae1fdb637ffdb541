//! PostgreSQL persistence adapters implementing the domain's repository
//! ports via Diesel.

pub mod pool;

pub(crate) mod models;
pub(crate) mod schema;

mod diesel_api_key_repository;
mod diesel_billing_repository;
mod diesel_event_repository;
mod diesel_suppression_repository;
mod diesel_template_repository;
mod diesel_tracking_repository;

pub use diesel_api_key_repository::DieselApiKeyRepository;
pub use diesel_billing_repository::DieselBillingRepository;
pub use diesel_event_repository::DieselEventRepository;
pub use diesel_suppression_repository::DieselSuppressionRepository;
pub use diesel_template_repository::DieselTemplateRepository;
pub use diesel_tracking_repository::DieselTrackingRepository;
pub use pool::{DbPool, PoolConfig};

use tracing::debug;

use crate::domain::ports::StoreError;

/// Map Diesel errors into the domain store error space.
pub(crate) fn map_diesel_error(error: diesel::result::Error) -> StoreError {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match &error {
        DieselError::DatabaseError(kind, info) => {
            debug!(?kind, message = info.message(), "diesel operation failed");
        }
        other => debug!(error = %other, "diesel operation failed"),
    }

    match error {
        DieselError::NotFound => StoreError::query("record not found"),
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            StoreError::conflict("unique constraint violated")
        }
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => {
            StoreError::connection("database connection closed")
        }
        _ => StoreError::query("database error"),
    }
}
