// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Why a token failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenErrorKind {
    /// Past its `exp` claim.
    Expired,
    /// Signed with a different key.
    BadSignature,
    /// Not decodable, or issuer/audience do not match.
    Malformed,
    /// Verified, but carries the wrong `type` claim for this use.
    WrongType,
}

impl TokenErrorKind {
    /// Client-facing code. Only expiry is distinguished, so clients know
    /// when a refresh is worth attempting.
    pub fn code(self) -> &'static str {
        match self {
            TokenErrorKind::Expired => "TOKEN_EXPIRED",
            _ => "INVALID_TOKEN",
        }
    }

    /// Finer-grained cause, sent as `reason` next to `code`.
    pub fn reason(self) -> &'static str {
        match self {
            TokenErrorKind::Expired => "TOKEN_EXPIRED",
            TokenErrorKind::BadSignature => "INVALID_SIGNATURE",
            TokenErrorKind::Malformed => "MALFORMED",
            TokenErrorKind::WrongType => "WRONG_TYPE",
        }
    }

    fn message(self) -> &'static str {
        match self {
            TokenErrorKind::Expired => "Token has expired",
            TokenErrorKind::BadSignature => "Invalid token signature",
            TokenErrorKind::Malformed => "Invalid or malformed token",
            TokenErrorKind::WrongType => "Invalid token type",
        }
    }
}

/// Why the auth gate rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnauthorizedReason {
    MissingToken,
    InvalidToken(TokenErrorKind),
    UserNotFound,
    Deactivated,
    Locked,
}

impl UnauthorizedReason {
    fn message(self) -> &'static str {
        match self {
            UnauthorizedReason::MissingToken => "Access token is required",
            UnauthorizedReason::InvalidToken(kind) => kind.message(),
            UnauthorizedReason::UserNotFound => "User not found",
            UnauthorizedReason::Deactivated => "Account is deactivated",
            UnauthorizedReason::Locked => {
                "Account is temporarily locked due to multiple failed login attempts"
            }
        }
    }

    fn code(self) -> &'static str {
        match self {
            UnauthorizedReason::InvalidToken(kind) => kind.code(),
            _ => "UNAUTHORIZED",
        }
    }
}

/// A single failed input check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation failed")]
    ValidationFailed(Vec<FieldError>),

    #[error("{0}")]
    DuplicateIdentity(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is temporarily locked due to multiple failed login attempts")]
    AccountLocked,

    #[error("Account is deactivated")]
    AccountDeactivated,

    #[error("Invalid token: {0:?}")]
    InvalidToken(TokenErrorKind),

    #[error("Invalid refresh token")]
    TokenRevoked,

    #[error("User not found")]
    UserNotFound,

    #[error("Unauthorized: {0:?}")]
    Unauthorized(UnauthorizedReason),

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("{0}")]
    BadRequest(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Machine-readable code sent to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationFailed(_) => "VALIDATION_FAILED",
            AppError::DuplicateIdentity(_) => "DUPLICATE_IDENTITY",
            AppError::InvalidCredentials => "INVALID_CREDENTIALS",
            AppError::AccountLocked => "ACCOUNT_LOCKED",
            AppError::AccountDeactivated => "ACCOUNT_DEACTIVATED",
            AppError::InvalidToken(kind) => kind.code(),
            AppError::TokenRevoked => "TOKEN_REVOKED",
            AppError::UserNotFound => "USER_NOT_FOUND",
            AppError::Unauthorized(reason) => reason.code(),
            AppError::Forbidden => "FORBIDDEN",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ValidationFailed(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::DuplicateIdentity(_) => StatusCode::CONFLICT,
            AppError::AccountLocked => StatusCode::LOCKED,
            AppError::InvalidCredentials
            | AppError::AccountDeactivated
            | AppError::InvalidToken(_)
            | AppError::TokenRevoked
            | AppError::UserNotFound
            | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::StoreUnavailable(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Sub-kind for token failures, `None` for everything else.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            AppError::InvalidToken(kind)
            | AppError::Unauthorized(UnauthorizedReason::InvalidToken(kind)) => Some(kind.reason()),
            _ => None,
        }
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Unauthorized(reason) => reason.message().to_string(),
            AppError::InvalidToken(kind) => kind.message().to_string(),
            AppError::StoreUnavailable(_) | AppError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<FieldError>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            AppError::StoreUnavailable(msg) => {
                tracing::error!(error = %msg, "Store unavailable");
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
            }
            _ => {}
        }

        let errors = match &self {
            AppError::ValidationFailed(errors) => Some(errors.clone()),
            _ => None,
        };

        let body = ErrorResponse {
            success: false,
            message: self.client_message(),
            code: self.code(),
            reason: self.reason(),
            errors,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
