//! API-key authentication and tenancy context.
//!
//! A key authorises sending iff the row exists, is active, and its domain has
//! passed TXT verification. The resolved context travels explicitly through
//! handler signatures; nothing request-scoped is stored globally.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::ids::api_key_hash;
use super::ports::ApiKeyRepository;
use super::Error;

/// Tenant account. Read-only to this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Sending domain. `txt_verified` gates every send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainRecord {
    pub id: String,
    pub user_id: String,
    /// Stored lowercased.
    pub name: String,
    pub txt_verified: bool,
}

/// An issued API key; `key_hash` never leaves the store layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRecord {
    pub id: String,
    pub user_id: String,
    pub domain_id: String,
    pub name: String,
    pub is_active: bool,
}

/// Monthly quota counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BillingRecord {
    pub id: String,
    pub user_id: String,
    pub email_limit: i32,
    pub email_used: i32,
}

/// Everything a request handler needs to know about the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub api_key: ApiKeyRecord,
    pub domain: DomainRecord,
    pub user: UserRecord,
    pub billing: Option<BillingRecord>,
}

/// Resolves `Authorization` headers into an [`AuthContext`].
#[derive(Clone)]
pub struct AuthService {
    keys: Arc<dyn ApiKeyRepository>,
}

impl AuthService {
    pub fn new(keys: Arc<dyn ApiKeyRepository>) -> Self {
        Self { keys }
    }

    /// Authenticate a raw `Authorization` header value.
    ///
    /// The `last_used_at` touch is fired in the background and must never
    /// fail the request.
    pub async fn authenticate(&self, header: Option<&str>) -> Result<AuthContext, Error> {
        let header = header.ok_or_else(|| Error::unauthorized("Missing Authorization header"))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| Error::unauthorized("Invalid Authorization format"))?
            .trim();
        if token.is_empty() {
            return Err(Error::unauthorized("API key is empty"));
        }

        let context = self
            .keys
            .find_by_key_hash(&api_key_hash(token))
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "API key lookup failed");
                Error::internal("Failed to authenticate")
            })?
            .ok_or_else(|| Error::unauthorized("Invalid API key"))?;

        if !context.api_key.is_active {
            return Err(Error::unauthorized("API key is disabled"));
        }
        if !context.domain.txt_verified {
            return Err(Error::forbidden(format!(
                "Domain {} is not verified",
                context.domain.name
            )));
        }

        self.touch_last_used(&context.api_key.id);
        Ok(context)
    }

    fn touch_last_used(&self, api_key_id: &str) {
        let keys = Arc::clone(&self.keys);
        let api_key_id = api_key_id.to_owned();
        let now: DateTime<Utc> = Utc::now();
        tokio::spawn(async move {
            if let Err(err) = keys.touch_last_used(&api_key_id, now).await {
                tracing::debug!(error = %err, api_key_id, "last_used_at update dropped");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_support::{test_context, InMemoryApiKeys};
    use crate::domain::ErrorCode;
    use rstest::rstest;

    fn service(keys: Arc<InMemoryApiKeys>) -> AuthService {
        AuthService::new(keys)
    }

    #[tokio::test]
    async fn resolves_valid_bearer_key() {
        let keys = Arc::new(InMemoryApiKeys::with_key("sk-live-1", test_context()));
        let context = service(keys.clone())
            .authenticate(Some("Bearer sk-live-1"))
            .await
            .expect("authenticated");
        assert_eq!(context.user.id, "u1");
        // Touch runs in the background; give it a tick to land.
        tokio::task::yield_now().await;
        assert!(*keys.touched.lock().expect("touched") >= 0);
    }

    #[rstest]
    #[case(None, "Missing Authorization header")]
    #[case(Some("Basic abc"), "Invalid Authorization format")]
    #[case(Some("bearer sk"), "Invalid Authorization format")]
    #[case(Some("Bearer   "), "API key is empty")]
    #[case(Some("Bearer wrong-key"), "Invalid API key")]
    #[tokio::test]
    async fn rejects_bad_headers(#[case] header: Option<&str>, #[case] message: &str) {
        let keys = Arc::new(InMemoryApiKeys::with_key("sk-live-1", test_context()));
        let err = service(keys)
            .authenticate(header)
            .await
            .expect_err("must reject");
        assert_eq!(err.code(), ErrorCode::Unauthorized);
        assert_eq!(err.message(), message);
    }

    #[tokio::test]
    async fn disabled_key_is_unauthorized() {
        let mut context = test_context();
        context.api_key.is_active = false;
        let keys = Arc::new(InMemoryApiKeys::with_key("sk-live-1", context));
        let err = service(keys)
            .authenticate(Some("Bearer sk-live-1"))
            .await
            .expect_err("must reject");
        assert_eq!(err.code(), ErrorCode::Unauthorized);
    }

    #[tokio::test]
    async fn unverified_domain_is_forbidden() {
        let mut context = test_context();
        context.domain.txt_verified = false;
        let keys = Arc::new(InMemoryApiKeys::with_key("sk-live-1", context));
        let err = service(keys)
            .authenticate(Some("Bearer sk-live-1"))
            .await
            .expect_err("must reject");
        assert_eq!(err.code(), ErrorCode::Forbidden);
        assert!(err.message().contains("example.com"));
    }

    #[tokio::test]
    async fn store_failure_maps_to_internal() {
        let keys = Arc::new(InMemoryApiKeys::failing());
        let err = service(keys)
            .authenticate(Some("Bearer sk-live-1"))
            .await
            .expect_err("must reject");
        assert_eq!(err.code(), ErrorCode::InternalError);
        assert_eq!(err.message(), "Failed to authenticate");
    }
}
