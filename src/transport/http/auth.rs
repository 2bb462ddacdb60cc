//! Bearer-session authentication.
//!
//! [`auth_middleware`] resolves `Authorization: Bearer <token>` to an account
//! and stores a [`Caller`] in the request extensions. Handlers behind it take
//! `Caller` as an extractor.

use crate::app::AppError;
use crate::domain::account::Account;
use crate::transport::http::types::AppState;
use axum::extract::{Request, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

#[derive(Debug, Clone)]
pub struct Caller {
    pub account: Account,
    /// The raw bearer token, kept for logout.
    pub token: String,
}

impl Caller {
    pub fn require_issuer(&self) -> Result<(), AppError> {
        if self.account.role.can_issue() {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "role '{}' cannot perform this action",
                self.account.role.as_str()
            )))
        }
    }
}

#[axum::async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller>()
            .cloned()
            .ok_or_else(AppError::unauthorized)
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthorized("missing authorization header".to_string()))?
        .to_str()
        .map_err(|_| AppError::Unauthorized("malformed authorization header".to_string()))?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("authorization header must use the Bearer scheme".to_string()))?
        .trim();
    if token.is_empty() {
        return Err(AppError::unauthorized());
    }
    Ok(token)
}

pub async fn auth_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let token = match bearer_token(request.headers()) {
        Ok(t) => t.to_string(),
        Err(e) => return e.into_response(),
    };
    match state.accounts.authenticate(&token).await {
        Ok(account) => {
            request.extensions_mut().insert(Caller { account, token });
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!(error = %e, "authentication failed");
            e.into_response()
        }
    }
}
