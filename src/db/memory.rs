// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process user store backed by `DashMap`.
//!
//! Used for local development without GCP and by the test suite. Each
//! mutation runs under the shard lock of the user's entry, so it is atomic
//! with respect to other requests for the same user.
//!
//! Lock order is `users` before `emails`; `emails` before `usernames`.
//! No code path takes them in any other order.

use crate::db::{email_taken, username_taken, UserStore};
use crate::error::AppError;
use crate::models::{LockoutPolicy, ProfileChanges, RefreshTokenEntry, User};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<String, User>,
    /// Lower-cased email -> user id
    emails: DashMap<String, String>,
    /// Username -> user id
    usernames: DashMap<String, String>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Run `f` against the stored record while holding its entry lock.
    fn modify<R>(&self, id: &str, f: impl FnOnce(&mut User) -> R) -> Result<R, AppError> {
        let mut user = self.users.get_mut(id).ok_or(AppError::UserNotFound)?;
        Ok(f(&mut user))
    }

    fn lookup(&self, index: &DashMap<String, String>, key: &str) -> Option<User> {
        let id = index.get(key).map(|id| id.value().clone())?;
        self.users.get(&id).map(|user| user.clone())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert_user(&self, user: User) -> Result<User, AppError> {
        let email = user.email.to_lowercase();

        let email_slot = match self.emails.entry(email) {
            Entry::Occupied(_) => return Err(email_taken()),
            Entry::Vacant(slot) => slot,
        };
        let username_slot = match self.usernames.entry(user.username.clone()) {
            Entry::Occupied(_) => return Err(username_taken()),
            Entry::Vacant(slot) => slot,
        };
        username_slot.insert(user.id.clone());
        email_slot.insert(user.id.clone());

        self.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        Ok(self.users.get(id).map(|user| user.clone()))
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, AppError> {
        if let Some(user) = self.lookup(&self.emails, &identifier.to_lowercase()) {
            return Ok(Some(user));
        }
        Ok(self.lookup(&self.usernames, identifier))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        Ok(self.lookup(&self.usernames, username))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self.lookup(&self.emails, &email.to_lowercase()))
    }

    async fn record_failed_login(
        &self,
        id: &str,
        policy: LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<User, AppError> {
        self.modify(id, |user| {
            user.apply_failed_login(&policy, now);
            user.clone()
        })
    }

    async fn record_successful_login(
        &self,
        id: &str,
        entry: RefreshTokenEntry,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<(), AppError> {
        self.modify(id, |user| user.apply_successful_login(entry, now, retention))
    }

    async fn push_refresh_token(
        &self,
        id: &str,
        entry: RefreshTokenEntry,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<(), AppError> {
        self.modify(id, |user| user.push_refresh_token(entry, now, retention))
    }

    async fn rotate_refresh_token(
        &self,
        id: &str,
        old: &str,
        new: RefreshTokenEntry,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<(), AppError> {
        let rotated = self.modify(id, |user| user.rotate_refresh_token(old, new, now, retention))?;
        if rotated {
            Ok(())
        } else {
            Err(AppError::TokenRevoked)
        }
    }

    async fn remove_refresh_token(
        &self,
        id: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.modify(id, |user| user.remove_refresh_token(token, now))
    }

    async fn clear_refresh_tokens(&self, id: &str, now: DateTime<Utc>) -> Result<usize, AppError> {
        self.modify(id, |user| user.clear_refresh_tokens(now))
    }

    async fn update_profile(
        &self,
        id: &str,
        mut changes: ProfileChanges,
        now: DateTime<Utc>,
    ) -> Result<User, AppError> {
        let mut user = self.users.get_mut(id).ok_or(AppError::UserNotFound)?;

        let old_email = user.email.clone();
        if let Some(email) = changes.email.take() {
            let email = email.to_lowercase();
            if email != old_email {
                match self.emails.entry(email.clone()) {
                    Entry::Occupied(owner) if owner.get() != id => return Err(email_taken()),
                    Entry::Occupied(_) => {}
                    Entry::Vacant(slot) => {
                        slot.insert(id.to_string());
                    }
                }
                self.emails.remove_if(&old_email, |_, owner| owner == id);
                changes.email = Some(email);
            }
        }

        user.apply_profile_changes(changes, now);
        Ok(user.clone())
    }

    async fn set_password_hash(
        &self,
        id: &str,
        password_hash: String,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.modify(id, |user| user.replace_password_hash(password_hash, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;

    fn user(id: &str, username: &str, email: &str) -> User {
        User::create(
            id.to_string(),
            NewUser {
                username: username.to_string(),
                email: email.to_string(),
                password_hash: "hash".to_string(),
                first_name: None,
                last_name: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicates_email_first() {
        let store = MemoryUserStore::new();
        store.insert_user(user("1", "alice", "alice@x.com")).await.unwrap();

        let err = store
            .insert_user(user("2", "alice", "ALICE@x.com"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Email already registered");

        let err = store
            .insert_user(user("3", "alice", "other@x.com"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Username already taken");

        // A rejected username must not leave its email claimed
        store.insert_user(user("4", "bob", "other@x.com")).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_identifier_prefers_email_match() {
        let store = MemoryUserStore::new();
        // Username that equals another account's email
        store.insert_user(user("1", "dave@x.com", "carol@x.com")).await.unwrap();
        store.insert_user(user("2", "dave", "dave@x.com")).await.unwrap();

        let found = store.find_by_identifier("dave@x.com").await.unwrap().unwrap();
        assert_eq!(found.id, "2");

        let found = store.find_by_identifier("DAVE@X.COM").await.unwrap().unwrap();
        assert_eq!(found.id, "2");

        let found = store.find_by_identifier("dave").await.unwrap().unwrap();
        assert_eq!(found.id, "2");

        assert!(store.find_by_identifier("Dave").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_profile_moves_email_index() {
        let store = MemoryUserStore::new();
        store.insert_user(user("1", "alice", "alice@x.com")).await.unwrap();
        store.insert_user(user("2", "bob", "bob@x.com")).await.unwrap();

        let err = store
            .update_profile(
                "1",
                ProfileChanges {
                    email: Some("Bob@x.com".to_string()),
                    ..Default::default()
                },
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateIdentity(_)));

        let updated = store
            .update_profile(
                "1",
                ProfileChanges {
                    email: Some("Alice@Y.com".to_string()),
                    ..Default::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(updated.email, "alice@y.com");
        assert!(store.find_by_email("alice@x.com").await.unwrap().is_none());
        assert_eq!(store.find_by_email("alice@y.com").await.unwrap().unwrap().id, "1");

        // Old address is free again
        store.insert_user(user("3", "carol", "alice@x.com")).await.unwrap();
    }

    #[tokio::test]
    async fn test_rotate_missing_token_is_revoked() {
        let store = MemoryUserStore::new();
        store.insert_user(user("1", "alice", "alice@x.com")).await.unwrap();
        let now = Utc::now();
        let retention = Duration::days(7);

        store
            .push_refresh_token("1", RefreshTokenEntry::new("a".to_string(), now), now, retention)
            .await
            .unwrap();
        store
            .rotate_refresh_token("1", "a", RefreshTokenEntry::new("b".to_string(), now), now, retention)
            .await
            .unwrap();

        let err = store
            .rotate_refresh_token("1", "a", RefreshTokenEntry::new("c".to_string(), now), now, retention)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TokenRevoked));

        let stored = store.get_user("1").await.unwrap().unwrap();
        assert_eq!(stored.refresh_tokens.len(), 1);
        assert_eq!(stored.refresh_tokens[0].token, "b");
    }

    #[tokio::test]
    async fn test_mutating_unknown_user_fails() {
        let store = MemoryUserStore::new();
        let err = store.clear_refresh_tokens("nope", Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::UserNotFound));
    }
}
