//! Bearer authentication extractor.
//!
//! Handlers declare `Authenticated` in their signature; the extractor reads
//! the `Authorization` header, resolves it through the domain `AuthService`,
//! and hands the context over explicitly.

use actix_web::dev::Payload;
use actix_web::http::header::AUTHORIZATION;
use actix_web::{web, FromRequest, HttpRequest};
use futures_util::future::LocalBoxFuture;

use crate::domain::auth::AuthContext;
use crate::domain::Error;

use super::error::ApiError;
use super::state::HttpState;

/// The caller's resolved tenancy context.
pub struct Authenticated(pub AuthContext);

impl FromRequest for Authenticated {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let header = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let state = req.app_data::<web::Data<HttpState>>().cloned();

        Box::pin(async move {
            let state = state
                .ok_or_else(|| ApiError::from(Error::internal("HTTP state is not configured")))?;
            let context = state.auth.authenticate(header.as_deref()).await?;
            Ok(Authenticated(context))
        })
    }
}
