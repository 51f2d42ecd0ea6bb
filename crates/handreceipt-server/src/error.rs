//! Error responses for the HTTP surface.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use handreceipt_core::{CustodyError, ErrorKind};
use handreceipt_ledger::LedgerError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Custody(#[from] CustodyError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// No usable acting user on the request.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    /// - NotFound: 404
    /// - Not holder / not owned / not initiator: 403
    /// - Other preconditions: 422
    /// - Staleness and conflicts: 409
    /// - Storage or ledger unavailable: 503
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Custody(e) => custody_status(e),
            Self::Ledger(LedgerError::Store(e)) => custody_status(e),
            Self::Ledger(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Custody(e) | Self::Ledger(LedgerError::Store(e)) => e.code(),
            Self::Ledger(_) => "ledger_unavailable",
            Self::Unauthorized(_) => "unauthorized",
            Self::BadRequest(_) => "bad_request",
        }
    }

    fn kind(&self) -> &'static str {
        let kind = match self {
            Self::Custody(e) | Self::Ledger(LedgerError::Store(e)) => e.kind(),
            Self::Ledger(_) => ErrorKind::Infrastructure,
            Self::Unauthorized(_) | Self::BadRequest(_) => return "request",
        };
        match kind {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Precondition => "precondition",
            ErrorKind::Staleness => "staleness",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Infrastructure => "infrastructure",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Custody(e) | Self::Ledger(LedgerError::Store(e)) => e.is_retryable(),
            Self::Ledger(_) => true,
            Self::Unauthorized(_) | Self::BadRequest(_) => false,
        }
    }
}

fn custody_status(error: &CustodyError) -> StatusCode {
    match error {
        CustodyError::NotHolder { .. }
        | CustodyError::NotOwned { .. }
        | CustodyError::NotInitiator { .. } => StatusCode::FORBIDDEN,
        other => match other.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Precondition => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Staleness | ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Infrastructure => StatusCode::SERVICE_UNAVAILABLE,
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Infrastructure details stay in the logs.
        let message = if status == StatusCode::SERVICE_UNAVAILABLE {
            error!(error = %self, "request failed on infrastructure");
            "service temporarily unavailable".to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "error": self.code(),
            "kind": self.kind(),
            "message": message,
            "retryable": self.retryable(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handreceipt_core::{PropertyId, TransferId, TransferStatus, UserId};

    #[test]
    fn test_status_codes() {
        let cases = [
            (
                CustodyError::PropertyNotFound(PropertyId(1)),
                StatusCode::NOT_FOUND,
            ),
            (
                CustodyError::NotHolder {
                    property: PropertyId(1),
                    user: UserId(2),
                },
                StatusCode::FORBIDDEN,
            ),
            (
                CustodyError::SelfReference(PropertyId(1)),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (CustodyError::Integrity, StatusCode::CONFLICT),
            (
                CustodyError::AlreadyResolved {
                    transfer: TransferId(1),
                    status: TransferStatus::Approved,
                },
                StatusCode::CONFLICT,
            ),
            (
                CustodyError::storage("disk gone"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status_code(), status);
        }
        assert_eq!(
            ApiError::Unauthorized("missing".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(LedgerError::unavailable("down")).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_infrastructure_details_not_exposed() {
        use http_body_util::BodyExt;

        let response = ApiError::from(CustodyError::storage("secret path /var/db")).into_response();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "storage");
        assert_eq!(body["kind"], "infrastructure");
        assert_eq!(body["retryable"], true);
        assert!(!body["message"].as_str().unwrap().contains("/var/db"));
    }
}
