// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account and session routes under `/api/auth`.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::middleware::AuthUser;
use crate::models::{PublicUser, Role};
use crate::services::validation::{
    ChangePasswordRequest, LoginRequest, ProfileUpdateRequest, RegisterRequest,
};
use crate::services::{AuthSession, TokenPair};
use crate::AppState;

/// Routes that do not need an access token.
pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
}

/// Routes that run behind `require_auth`.
pub fn protected_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/logout", post(logout))
        .route("/logout-all", post(logout_all))
        .route("/profile", get(get_profile).put(update_profile))
        .route("/password", put(change_password))
        .route("/verify-token", get(verify_token))
}

/// Standard success envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(message: &'static str, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: Some(message),
            data: Some(data),
        })
    }

    fn data(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: None,
            data: Some(data),
        })
    }
}

impl ApiResponse<()> {
    fn message(message: &'static str) -> Json<Self> {
        Json(Self {
            success: true,
            message: Some(message),
            data: None,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct UserData<U: Serialize> {
    pub user: U,
}

#[derive(Debug, Serialize)]
pub struct TokensData {
    pub tokens: TokenPair,
}

/// Identity summary returned by `/verify-token`.
#[derive(Debug, Serialize)]
pub struct TokenOwner {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

async fn register(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<AuthSession>>)> {
    let session = state.sessions.register(json_body(payload)?).await?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::ok("User registered successfully", session),
    ))
}

async fn login(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<AuthSession>>> {
    let session = state.sessions.login(json_body(payload)?).await?;
    Ok(ApiResponse::ok("Login successful", session))
}

async fn refresh(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<TokensData>>> {
    let refresh_token = json_body(payload)?
        .refresh_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::BadRequest("Refresh token is required".to_string()))?;

    let tokens = state.sessions.refresh(&refresh_token).await?;
    Ok(ApiResponse::ok(
        "Token refreshed successfully",
        TokensData { tokens },
    ))
}

/// The body is optional; without a refresh token this only acknowledges.
async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: std::result::Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<()>>> {
    let refresh_token = payload.ok().and_then(|Json(body)| body.refresh_token);
    state
        .sessions
        .logout(&user.user_id, refresh_token.as_deref())
        .await?;
    Ok(ApiResponse::message("Logout successful"))
}

async fn logout_all(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ApiResponse<()>>> {
    state.sessions.logout_all(&user.user_id).await?;
    Ok(ApiResponse::message(
        "Logged out from all devices successfully",
    ))
}

async fn get_profile(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ApiResponse<UserData<PublicUser>>>> {
    let user = state.sessions.profile(&user.user_id).await?;
    Ok(ApiResponse::data(UserData { user }))
}

async fn update_profile(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: std::result::Result<Json<ProfileUpdateRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<UserData<PublicUser>>>> {
    let user = state
        .sessions
        .update_profile(&user.user_id, json_body(payload)?)
        .await?;
    Ok(ApiResponse::ok(
        "Profile updated successfully",
        UserData { user },
    ))
}

async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: std::result::Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<()>>> {
    state
        .sessions
        .change_password(&user.user_id, json_body(payload)?)
        .await?;
    Ok(ApiResponse::message(
        "Password changed successfully; please sign in again on other devices",
    ))
}

async fn verify_token(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ApiResponse<UserData<TokenOwner>>>> {
    let profile = state.sessions.profile(&user.user_id).await?;
    Ok(ApiResponse::ok(
        "Token is valid",
        UserData {
            user: TokenOwner {
                id: profile.id,
                username: profile.username,
                email: profile.email,
                role: profile.role,
            },
        },
    ))
}
