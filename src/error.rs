//! HTTP error responses.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::auth::services::AuthError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest {
        code: &'static str,
        message: String,
        details: Option<Vec<String>>,
    },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{message}")]
    NotFound { code: &'static str, message: String },

    /// Detail is logged, never sent.
    #[error("Server error")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(code: &'static str, msg: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: msg.into(),
            details: None,
        }
    }

    pub fn not_found(code: &'static str, msg: impl Into<String>) -> Self {
        Self::NotFound {
            code,
            message: msg.into(),
        }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest { code, .. } | Self::NotFound { code, .. } => code,
            Self::Unauthorized(_) => "UNAUTHENTICATED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        match &self {
            ApiError::Internal(detail) => error!(error_code = code, detail = %detail, "API error"),
            _ => debug!(error_code = code, message = %self, "client error"),
        }

        let details = match &self {
            ApiError::BadRequest { details, .. } => details.clone(),
            _ => None,
        };
        let body = ErrorResponse {
            error: self.to_string(),
            code,
            details,
        };
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let message = err.to_string();
        match err {
            AuthError::InvalidInput(_) => Self::bad_request("INVALID_INPUT", message),
            AuthError::PasswordMismatch => Self::bad_request("PASSWORD_MISMATCH", message),
            AuthError::WeakPassword(violations) => Self::BadRequest {
                code: "WEAK_PASSWORD",
                message,
                details: Some(violations.iter().map(|v| v.to_string()).collect()),
            },
            AuthError::EmailTaken => Self::bad_request("EMAIL_TAKEN", message),
            AuthError::InvalidCredentials => Self::bad_request("INVALID_CREDENTIALS", message),
            AuthError::InactiveUser => Self::bad_request("INACTIVE_USER", message),
            AuthError::UserNotFound => Self::not_found("USER_NOT_FOUND", message),
            AuthError::Unauthenticated(msg) => Self::Unauthorized(msg.to_string()),
            AuthError::Forbidden => Self::Forbidden(message),
            AuthError::Internal(e) => Self::Internal(format!("{:#}", e)),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rej: JsonRejection) -> Self {
        debug!(status = %rej.status(), reason = %rej.body_text(), "json body rejected");
        let message = match rej {
            JsonRejection::MissingJsonContentType(_) => {
                "Expected a JSON body with Content-Type: application/json".to_string()
            }
            other => other.body_text(),
        };
        Self::bad_request("INVALID_INPUT", message)
    }
}

impl From<PathRejection> for ApiError {
    fn from(rej: PathRejection) -> Self {
        Self::bad_request("INVALID_INPUT", rej.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rej: QueryRejection) -> Self {
        Self::bad_request("INVALID_INPUT", rej.body_text())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{:#}", err))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::policy::PolicyViolation;

    #[test]
    fn auth_errors_map_to_status_and_code() {
        let cases: Vec<(AuthError, StatusCode, &str)> = vec![
            (AuthError::InvalidInput("x".into()), StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            (AuthError::PasswordMismatch, StatusCode::BAD_REQUEST, "PASSWORD_MISMATCH"),
            (AuthError::WeakPassword(vec![]), StatusCode::BAD_REQUEST, "WEAK_PASSWORD"),
            (AuthError::EmailTaken, StatusCode::BAD_REQUEST, "EMAIL_TAKEN"),
            (AuthError::InvalidCredentials, StatusCode::BAD_REQUEST, "INVALID_CREDENTIALS"),
            (AuthError::InactiveUser, StatusCode::BAD_REQUEST, "INACTIVE_USER"),
            (AuthError::UserNotFound, StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
            (AuthError::Unauthenticated("no"), StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            (AuthError::Forbidden, StatusCode::FORBIDDEN, "FORBIDDEN"),
            (
                AuthError::Internal(anyhow::anyhow!("db down")),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
            ),
        ];
        for (err, status, code) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status_code(), status);
            assert_eq!(api.error_code(), code);
        }
    }

    #[test]
    fn weak_password_carries_violations() {
        let api = ApiError::from(AuthError::WeakPassword(vec![
            PolicyViolation::TooShort,
            PolicyViolation::MissingDigit,
        ]));
        match api {
            ApiError::BadRequest { details: Some(d), .. } => {
                assert_eq!(d.len(), 2);
                assert!(d[0].contains("8 characters"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn internal_errors_do_not_leak_detail() {
        let api = ApiError::from(anyhow::anyhow!("connection refused at 10.0.0.3"));
        assert_eq!(api.to_string(), "Server error");
    }
}
