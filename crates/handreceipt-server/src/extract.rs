//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use handreceipt_core::UserId;

use crate::error::ApiError;

/// Header naming the acting user.
pub const USER_HEADER: &str = "x-user-id";

/// The user on whose behalf the request acts.
///
/// Identity is taken from the `x-user-id` header as issued by the fronting
/// identity service; a missing or malformed header is a 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActingUser(pub UserId);

impl<S> FromRequestParts<S> for ActingUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {USER_HEADER} header")))?;
        let id = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|id| *id != 0)
            .ok_or_else(|| ApiError::Unauthorized(format!("invalid {USER_HEADER} header")))?;
        Ok(Self(UserId(id)))
    }
}
