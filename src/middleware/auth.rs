// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! JWT authentication middleware.
//!
//! [`require_auth`] rejects requests without a valid access token.
//! [`optional_auth`] never rejects; handlers see `OptionalAuthUser(None)`
//! for anonymous callers. Role gates layer on top of `require_auth`.

use crate::error::{AppError, TokenErrorKind, UnauthorizedReason};
use crate::models::Role;
use crate::services::{extract_bearer, TokenType};
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Authenticated caller, inserted into request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
    pub username: String,
    pub role: Role,
}

/// Caller identity for routes that serve anonymous users too.
#[derive(Debug, Clone)]
pub struct OptionalAuthUser(pub Option<AuthUser>);

/// Resolve the caller from an `Authorization` header value.
///
/// Store failures surface as `StoreUnavailable`, never as `Unauthorized`.
pub async fn authenticate(state: &AppState, header: Option<&str>) -> Result<AuthUser, AppError> {
    let token = extract_bearer(header)
        .ok_or(AppError::Unauthorized(UnauthorizedReason::MissingToken))?;

    let claims = state.tokens.verify_access(token).map_err(|e| match e {
        AppError::InvalidToken(kind) => {
            AppError::Unauthorized(UnauthorizedReason::InvalidToken(kind))
        }
        other => other,
    })?;

    if claims.token_type != TokenType::Access {
        return Err(AppError::Unauthorized(UnauthorizedReason::InvalidToken(
            TokenErrorKind::WrongType,
        )));
    }

    let user = state
        .store
        .get_user(&claims.id)
        .await?
        .ok_or(AppError::Unauthorized(UnauthorizedReason::UserNotFound))?;

    if !user.is_active {
        return Err(AppError::Unauthorized(UnauthorizedReason::Deactivated));
    }
    if user.is_locked_at(state.clock.now()) {
        return Err(AppError::Unauthorized(UnauthorizedReason::Locked));
    }

    Ok(AuthUser {
        user_id: user.id,
        username: user.username,
        role: user.role,
    })
}

fn authorization_header(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(str::to_owned)
}

/// Middleware that requires valid JWT authentication.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = authorization_header(&request);
    let auth_user = authenticate(&state, header.as_deref())
        .await
        .inspect_err(|e| tracing::debug!(code = e.code(), "Request rejected by auth gate"))?;

    request.extensions_mut().insert(auth_user);
    Ok(next.run(request).await)
}

/// Middleware that resolves the caller if possible and always continues.
pub async fn optional_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let header = authorization_header(&request);
    let auth_user = match authenticate(&state, header.as_deref()).await {
        Ok(user) => Some(user),
        Err(AppError::StoreUnavailable(e)) => {
            tracing::warn!(error = %e, "Optional auth skipped: store unavailable");
            None
        }
        Err(_) => None,
    };

    request.extensions_mut().insert(OptionalAuthUser(auth_user));
    next.run(request).await
}

/// Reject callers whose role is not in `allowed`.
///
/// Must run after [`require_auth`].
pub async fn require_roles(
    allowed: &'static [Role],
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let role = request
        .extensions()
        .get::<AuthUser>()
        .map(|user| user.role)
        .ok_or(AppError::Unauthorized(UnauthorizedReason::MissingToken))?;

    if !allowed.contains(&role) {
        tracing::debug!(role = role.as_str(), "Request rejected by role gate");
        return Err(AppError::Forbidden);
    }
    Ok(next.run(request).await)
}

pub async fn admin_only(request: Request, next: Next) -> Result<Response, AppError> {
    require_roles(&[Role::Admin], request, next).await
}

pub async fn user_or_admin(request: Request, next: Next) -> Result<Response, AppError> {
    require_roles(&[Role::User, Role::Admin], request, next).await
}

/// Admins may act on any resource; everyone else only on their own.
pub fn ensure_owner_or_admin(user: &AuthUser, owner_id: &str) -> Result<(), AppError> {
    if user.role == Role::Admin || user.user_id == owner_id {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}
