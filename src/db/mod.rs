// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Credential store.
//!
//! Every mutating call is a single atomic update of one user document.
//! Callers pass the current time and retention window so that expiry of
//! stored refresh tokens is decided in one place.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreUserStore;
pub use memory::MemoryUserStore;

use crate::error::AppError;
use crate::models::{LockoutPolicy, ProfileChanges, RefreshTokenEntry, User};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    /// One document per registered email, keyed by the hex of the lower-cased address
    pub const USER_EMAILS: &str = "user_emails";
    /// One document per username, keyed by the hex of the username
    pub const USERNAMES: &str = "usernames";
}

/// Shared handle to whichever store backend is configured.
pub type SharedUserStore = Arc<dyn UserStore>;

/// Persistence for user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new user. Fails with `DuplicateIdentity` if the email
    /// (checked first) or username is already registered.
    async fn insert_user(&self, user: User) -> Result<User, AppError>;

    async fn get_user(&self, id: &str) -> Result<Option<User>, AppError>;

    /// Resolve a login identifier: case-insensitive email match first,
    /// then exact username.
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, AppError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError>;

    /// Case-insensitive lookup.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    /// Count one failed password check, locking the account at the threshold.
    /// Returns the updated record.
    async fn record_failed_login(
        &self,
        id: &str,
        policy: LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<User, AppError>;

    /// Reset attempts and lock, stamp `last_login` and add the new session.
    async fn record_successful_login(
        &self,
        id: &str,
        entry: RefreshTokenEntry,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<(), AppError>;

    async fn push_refresh_token(
        &self,
        id: &str,
        entry: RefreshTokenEntry,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<(), AppError>;

    /// Replace `old` with `new`. Fails with `TokenRevoked` if `old` is not
    /// currently held, in which case nothing changes.
    async fn rotate_refresh_token(
        &self,
        id: &str,
        old: &str,
        new: RefreshTokenEntry,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<(), AppError>;

    /// Returns whether a token was removed.
    async fn remove_refresh_token(
        &self,
        id: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Returns how many tokens were removed.
    async fn clear_refresh_tokens(&self, id: &str, now: DateTime<Utc>) -> Result<usize, AppError>;

    /// Fails with `DuplicateIdentity` if a new email belongs to another user.
    async fn update_profile(
        &self,
        id: &str,
        changes: ProfileChanges,
        now: DateTime<Utc>,
    ) -> Result<User, AppError>;

    /// Replace the password hash and revoke every refresh token.
    async fn set_password_hash(
        &self,
        id: &str,
        password_hash: String,
        now: DateTime<Utc>,
    ) -> Result<(), AppError>;
}

pub(crate) fn email_taken() -> AppError {
    AppError::DuplicateIdentity("Email already registered".to_string())
}

pub(crate) fn username_taken() -> AppError {
    AppError::DuplicateIdentity("Username already taken".to_string())
}
