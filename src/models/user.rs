// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User model for storage and API.
//!
//! Derived state (`is_locked`, `full_name`) is computed from stored fields
//! and never persisted. The mutation helpers here are pure: store backends
//! apply them inside a single per-document atomic update.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Authorization role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "client/src/api/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

/// A refresh token issued to this user and not yet revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenEntry {
    pub token: String,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenEntry {
    pub fn new(token: String, created_at: DateTime<Utc>) -> Self {
        Self { token, created_at }
    }

    /// Entries expire independently of the token's own `exp` claim.
    pub fn is_retained(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        self.created_at + retention > now
    }

    fn matches(&self, token: &str) -> bool {
        self.token.as_bytes().ct_eq(token.as_bytes()).into()
    }
}

/// Lockout settings applied on failed logins.
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_attempts: u32,
    pub lock_duration: Duration,
}

/// User document stored in the `users` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Opaque document ID
    pub id: String,
    pub username: String,
    /// Always stored lower-cased
    pub email: String,
    /// bcrypt hash; never leaves the server
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default)]
    pub role: Role,
    pub is_active: bool,
    #[serde(default)]
    pub is_email_verified: bool,
    #[serde(default)]
    pub login_attempts: u32,
    pub lock_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub refresh_tokens: Vec<RefreshTokenEntry>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create a user record.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Profile fields a user may change about themselves.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl User {
    /// Build a fresh record with role `user`, active, no sessions.
    pub fn create(id: String, new_user: NewUser, now: DateTime<Utc>) -> Self {
        Self {
            id,
            username: new_user.username,
            email: new_user.email.to_lowercase(),
            password_hash: new_user.password_hash,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            role: Role::User,
            is_active: true,
            is_email_verified: false,
            login_attempts: 0,
            lock_until: None,
            refresh_tokens: Vec::new(),
            last_login: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Locked while `now < lock_until`.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.lock_until.is_some_and(|until| until > now)
    }

    pub fn full_name(&self) -> String {
        let first = self.first_name.as_deref().filter(|s| !s.is_empty());
        let last = self.last_name.as_deref().filter(|s| !s.is_empty());
        match (first, last) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(name), None) | (None, Some(name)) => name.to_string(),
            (None, None) => self.username.clone(),
        }
    }

    /// Whether `token` is in the stored set and still inside the retention window.
    pub fn holds_refresh_token(&self, token: &str, now: DateTime<Utc>, retention: Duration) -> bool {
        self.refresh_tokens
            .iter()
            .any(|entry| entry.is_retained(now, retention) && entry.matches(token))
    }

    /// Record one failed password check.
    ///
    /// An expired lock restarts the counter at 1. Reaching the threshold while
    /// unlocked sets a new lock. Returns true if this call locked the account.
    pub fn apply_failed_login(&mut self, policy: &LockoutPolicy, now: DateTime<Utc>) -> bool {
        self.updated_at = now;

        if self.lock_until.is_some_and(|until| until <= now) {
            self.lock_until = None;
            self.login_attempts = 1;
            return false;
        }

        self.login_attempts = self.login_attempts.saturating_add(1);
        if self.login_attempts >= policy.max_attempts && !self.is_locked_at(now) {
            self.lock_until = Some(now + policy.lock_duration);
            return true;
        }
        false
    }

    /// Reset the lockout state and register a new session.
    pub fn apply_successful_login(
        &mut self,
        entry: RefreshTokenEntry,
        now: DateTime<Utc>,
        retention: Duration,
    ) {
        self.login_attempts = 0;
        self.lock_until = None;
        self.last_login = Some(now);
        self.push_refresh_token(entry, now, retention);
    }

    /// Append a refresh token, dropping entries past the retention window.
    pub fn push_refresh_token(
        &mut self,
        entry: RefreshTokenEntry,
        now: DateTime<Utc>,
        retention: Duration,
    ) {
        self.prune_refresh_tokens(now, retention);
        self.refresh_tokens.push(entry);
        self.updated_at = now;
    }

    /// Swap `old` for `new` in one step. Returns false, leaving the record
    /// untouched, if `old` is not currently held.
    pub fn rotate_refresh_token(
        &mut self,
        old: &str,
        new: RefreshTokenEntry,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> bool {
        if !self.holds_refresh_token(old, now, retention) {
            return false;
        }
        self.refresh_tokens.retain(|entry| !entry.matches(old));
        self.push_refresh_token(new, now, retention);
        true
    }

    /// Remove one refresh token. Returns whether anything was removed.
    pub fn remove_refresh_token(&mut self, token: &str, now: DateTime<Utc>) -> bool {
        let before = self.refresh_tokens.len();
        self.refresh_tokens.retain(|entry| !entry.matches(token));
        let removed = self.refresh_tokens.len() != before;
        if removed {
            self.updated_at = now;
        }
        removed
    }

    /// Drop every refresh token. Returns how many were held.
    pub fn clear_refresh_tokens(&mut self, now: DateTime<Utc>) -> usize {
        let count = self.refresh_tokens.len();
        self.refresh_tokens.clear();
        self.updated_at = now;
        count
    }

    /// Apply profile changes. A changed email resets verification.
    pub fn apply_profile_changes(&mut self, changes: ProfileChanges, now: DateTime<Utc>) {
        if let Some(email) = changes.email {
            let email = email.to_lowercase();
            if email != self.email {
                self.email = email;
                self.is_email_verified = false;
            }
        }
        if let Some(first_name) = changes.first_name {
            self.first_name = Some(first_name);
        }
        if let Some(last_name) = changes.last_name {
            self.last_name = Some(last_name);
        }
        self.updated_at = now;
    }

    /// Replace the password hash and end every session.
    pub fn replace_password_hash(&mut self, password_hash: String, now: DateTime<Utc>) {
        self.password_hash = password_hash;
        self.clear_refresh_tokens(now);
    }

    fn prune_refresh_tokens(&mut self, now: DateTime<Utc>, retention: Duration) {
        self.refresh_tokens
            .retain(|entry| entry.is_retained(now, retention));
    }
}

/// User fields safe to return to clients.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "client/src/api/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: String,
    pub role: Role,
    pub is_email_verified: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            full_name: user.full_name(),
            role: user.role,
            is_email_verified: user.is_email_verified,
            last_login: user.last_login,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}
