//! Request extractors.

use super::error::AppError;
use crate::types::UserId;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Header carrying the authenticated caller, set by the upstream gateway
/// that terminates authentication.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller.
///
/// Requests without a parseable `X-User-Id` header are rejected with 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<UserId>().ok())
            .map(Self)
            .ok_or_else(|| AppError::unauthorized("Missing or invalid X-User-Id header"))
    }
}
