// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore-backed user store.
//!
//! Users live in the `users` collection keyed by their opaque id. Mutations
//! read the document inside a transaction, apply the same pure helpers the
//! memory store uses, and write it back in that transaction.
//!
//! Email and username uniqueness is held by claim documents in
//! `user_emails` and `usernames`. A claim is created with an
//! exists-false precondition in the same transaction as the user it
//! points to, so two concurrent registrations cannot both commit.

use crate::db::{collections, email_taken, username_taken, UserStore};
use crate::error::AppError;
use crate::models::{LockoutPolicy, ProfileChanges, RefreshTokenEntry, User};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use firestore::errors::FirestoreError;
use firestore::{
    FirestoreConsistencySelector, FirestoreDb, FirestoreResult, FirestoreTransaction,
    FirestoreWritePrecondition,
};
use serde::{Deserialize, Serialize};

/// Attempts per transaction before contention is reported as an error.
const MAX_TRANSACTION_ATTEMPTS: u32 = 5;

fn store_error(e: impl std::fmt::Display) -> AppError {
    AppError::StoreUnavailable(e.to_string())
}

/// Aborted or briefly unavailable; the whole transaction can be rerun.
fn is_retryable(e: &FirestoreError) -> bool {
    matches!(e, FirestoreError::DatabaseError(err) if err.retry_possible)
}

/// Owner of an email address or username.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdentityClaim {
    user_id: String,
}

/// Document id for a claim. Hex keeps ids free of `/` and other reserved text.
fn claim_key(value: &str) -> String {
    hex::encode(value.as_bytes())
}

/// A client whose reads join `transaction`.
fn transaction_reader(client: &FirestoreDb, transaction: &FirestoreTransaction<'_>) -> FirestoreDb {
    client.clone_with_consistency_selector(FirestoreConsistencySelector::Transaction(
        transaction.transaction_id().clone(),
    ))
}

async fn read_user(reader: &FirestoreDb, id: &str) -> FirestoreResult<Option<User>> {
    reader
        .fluent()
        .select()
        .by_id_in(collections::USERS)
        .obj()
        .one(id)
        .await
}

async fn read_claim(
    reader: &FirestoreDb,
    collection: &'static str,
    key: &str,
) -> FirestoreResult<Option<IdentityClaim>> {
    reader
        .fluent()
        .select()
        .by_id_in(collection)
        .obj()
        .one(key)
        .await
}

/// Stage a new claim. Commit fails if the claim already exists.
fn add_claim(
    client: &FirestoreDb,
    transaction: &mut FirestoreTransaction<'_>,
    collection: &'static str,
    key: &str,
    user_id: &str,
) -> FirestoreResult<()> {
    let claim = IdentityClaim {
        user_id: user_id.to_string(),
    };
    client
        .fluent()
        .update()
        .in_col(collection)
        .precondition(FirestoreWritePrecondition::Exists(false))
        .document_id(key)
        .object(&claim)
        .add_to_transaction(transaction)?;
    Ok(())
}

/// One attempt at reading, changing and writing back a user.
///
/// The outer `Result` carries Firestore failures, which may be retried. The
/// inner one carries the outcome of `f`.
async fn modify_once<R, F>(
    client: &FirestoreDb,
    id: &str,
    f: &mut F,
) -> FirestoreResult<Result<R, AppError>>
where
    F: FnMut(&mut User) -> Result<R, AppError> + Send,
    R: Send,
{
    let mut transaction = client.begin_transaction().await?;
    let reader = transaction_reader(client, &transaction);

    let current = match read_user(&reader, id).await {
        Ok(current) => current,
        Err(e) => {
            let _ = transaction.rollback().await;
            return Err(e);
        }
    };
    let Some(mut user) = current else {
        let _ = transaction.rollback().await;
        return Ok(Err(AppError::UserNotFound));
    };

    let result = match f(&mut user) {
        Ok(result) => result,
        Err(e) => {
            let _ = transaction.rollback().await;
            return Ok(Err(e));
        }
    };

    client
        .fluent()
        .update()
        .in_col(collections::USERS)
        .document_id(id)
        .object(&user)
        .add_to_transaction(&mut transaction)?;
    transaction.commit().await?;

    Ok(Ok(result))
}

async fn insert_once(client: &FirestoreDb, user: &User) -> FirestoreResult<Result<(), AppError>> {
    let email_key = claim_key(&user.email.to_lowercase());
    let username_key = claim_key(&user.username);

    let mut transaction = client.begin_transaction().await?;
    let reader = transaction_reader(client, &transaction);

    let claims = async {
        let email = read_claim(&reader, collections::USER_EMAILS, &email_key).await?;
        let username = read_claim(&reader, collections::USERNAMES, &username_key).await?;
        Ok::<_, FirestoreError>((email, username))
    };
    let taken = match claims.await {
        Ok((Some(_), _)) => Some(email_taken()),
        Ok((None, Some(_))) => Some(username_taken()),
        Ok((None, None)) => None,
        Err(e) => {
            let _ = transaction.rollback().await;
            return Err(e);
        }
    };
    if let Some(err) = taken {
        let _ = transaction.rollback().await;
        return Ok(Err(err));
    }

    add_claim(client, &mut transaction, collections::USER_EMAILS, &email_key, &user.id)?;
    add_claim(client, &mut transaction, collections::USERNAMES, &username_key, &user.id)?;
    client
        .fluent()
        .update()
        .in_col(collections::USERS)
        .precondition(FirestoreWritePrecondition::Exists(false))
        .document_id(&user.id)
        .object(user)
        .add_to_transaction(&mut transaction)?;
    transaction.commit().await?;

    Ok(Ok(()))
}

/// Apply profile changes, moving the email claim when the address changes.
async fn update_profile_once(
    client: &FirestoreDb,
    id: &str,
    changes: &ProfileChanges,
    now: DateTime<Utc>,
) -> FirestoreResult<Result<User, AppError>> {
    let mut transaction = client.begin_transaction().await?;
    let reader = transaction_reader(client, &transaction);

    let current = match read_user(&reader, id).await {
        Ok(current) => current,
        Err(e) => {
            let _ = transaction.rollback().await;
            return Err(e);
        }
    };
    let Some(mut user) = current else {
        let _ = transaction.rollback().await;
        return Ok(Err(AppError::UserNotFound));
    };

    let mut changes = changes.clone();
    if let Some(email) = changes.email.take() {
        let email = email.to_lowercase();
        let old_email = user.email.to_lowercase();
        if email != old_email {
            let new_key = claim_key(&email);
            let owner = match read_claim(&reader, collections::USER_EMAILS, &new_key).await {
                Ok(owner) => owner,
                Err(e) => {
                    let _ = transaction.rollback().await;
                    return Err(e);
                }
            };
            match owner {
                Some(claim) if claim.user_id != id => {
                    let _ = transaction.rollback().await;
                    return Ok(Err(email_taken()));
                }
                Some(_) => {}
                None => add_claim(client, &mut transaction, collections::USER_EMAILS, &new_key, id)?,
            }
            client
                .fluent()
                .delete()
                .from(collections::USER_EMAILS)
                .document_id(claim_key(&old_email))
                .add_to_transaction(&mut transaction)?;
        }
        changes.email = Some(email);
    }

    user.apply_profile_changes(changes, now);
    client
        .fluent()
        .update()
        .in_col(collections::USERS)
        .document_id(id)
        .object(&user)
        .add_to_transaction(&mut transaction)?;
    transaction.commit().await?;

    Ok(Ok(user))
}

/// Firestore user store.
#[derive(Clone)]
pub struct FirestoreUserStore {
    client: Option<FirestoreDb>,
}

impl FirestoreUserStore {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = FirestoreDb::new(project_id)
            .await
            .map_err(|e| store_error(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| store_error(format!("Failed to connect to Firestore Emulator: {}", e)))?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create an offline store for testing.
    ///
    /// Every operation fails with `StoreUnavailable`.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    fn get_client(&self) -> Result<&FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| store_error("Database not connected (offline mode)"))
    }

    async fn find_one_by_field(&self, field: &'static str, value: String) -> Result<Option<User>, AppError> {
        let users: Vec<User> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::USERS)
            .filter(move |q| q.for_all([q.field(field).eq(value.clone())]))
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(store_error)?;

        Ok(users.into_iter().next())
    }

    /// Read a user, apply `f`, and write the result back in one transaction.
    ///
    /// If `f` returns an error nothing is written. `f` runs again if the
    /// transaction is aborted by a concurrent writer.
    async fn modify<R, F>(&self, id: &str, mut f: F) -> Result<R, AppError>
    where
        F: FnMut(&mut User) -> Result<R, AppError> + Send,
        R: Send,
    {
        let client = self.get_client()?;
        let mut attempt = 1;
        loop {
            match modify_once(client, id, &mut f).await {
                Ok(outcome) => return outcome,
                Err(e) if is_retryable(&e) && attempt < MAX_TRANSACTION_ATTEMPTS => {
                    tracing::debug!(user_id = id, attempt, error = %e, "Retrying user transaction");
                    attempt += 1;
                }
                Err(e) => return Err(store_error(format!("User transaction failed: {}", e))),
            }
        }
    }

    /// Map a failed registration commit to the claim that blocked it, if any.
    async fn explain_insert_failure(&self, user: &User, e: FirestoreError) -> AppError {
        let Ok(client) = self.get_client() else {
            return store_error(e);
        };
        let email_key = claim_key(&user.email.to_lowercase());
        if let Ok(Some(_)) = read_claim(client, collections::USER_EMAILS, &email_key).await {
            return email_taken();
        }
        let username_key = claim_key(&user.username);
        if let Ok(Some(_)) = read_claim(client, collections::USERNAMES, &username_key).await {
            return username_taken();
        }
        store_error(format!("Failed to create user: {}", e))
    }
}

#[async_trait]
impl UserStore for FirestoreUserStore {
    async fn insert_user(&self, user: User) -> Result<User, AppError> {
        let client = self.get_client()?;
        let mut attempt = 1;
        loop {
            match insert_once(client, &user).await {
                Ok(Ok(())) => break,
                Ok(Err(e)) => return Err(e),
                Err(e) if is_retryable(&e) && attempt < MAX_TRANSACTION_ATTEMPTS => {
                    tracing::debug!(user_id = %user.id, attempt, error = %e, "Retrying user creation");
                    attempt += 1;
                }
                Err(e) => return Err(self.explain_insert_failure(&user, e).await),
            }
        }

        tracing::debug!(user_id = %user.id, "User document created");
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(id)
            .await
            .map_err(store_error)
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, AppError> {
        if let Some(user) = self.find_by_email(identifier).await? {
            return Ok(Some(user));
        }
        self.find_by_username(identifier).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        self.find_one_by_field("username", username.to_string()).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        self.find_one_by_field("email", email.to_lowercase()).await
    }

    async fn record_failed_login(
        &self,
        id: &str,
        policy: LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<User, AppError> {
        self.modify(id, |user| {
            user.apply_failed_login(&policy, now);
            Ok(user.clone())
        })
        .await
    }

    async fn record_successful_login(
        &self,
        id: &str,
        entry: RefreshTokenEntry,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<(), AppError> {
        self.modify(id, |user| {
            user.apply_successful_login(entry.clone(), now, retention);
            Ok(())
        })
        .await
    }

    async fn push_refresh_token(
        &self,
        id: &str,
        entry: RefreshTokenEntry,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<(), AppError> {
        self.modify(id, |user| {
            user.push_refresh_token(entry.clone(), now, retention);
            Ok(())
        })
        .await
    }

    async fn rotate_refresh_token(
        &self,
        id: &str,
        old: &str,
        new: RefreshTokenEntry,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<(), AppError> {
        self.modify(id, |user| {
            if user.rotate_refresh_token(old, new.clone(), now, retention) {
                Ok(())
            } else {
                Err(AppError::TokenRevoked)
            }
        })
        .await
    }

    async fn remove_refresh_token(
        &self,
        id: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.modify(id, |user| Ok(user.remove_refresh_token(token, now)))
            .await
    }

    async fn clear_refresh_tokens(&self, id: &str, now: DateTime<Utc>) -> Result<usize, AppError> {
        self.modify(id, |user| Ok(user.clear_refresh_tokens(now)))
            .await
    }

    async fn update_profile(
        &self,
        id: &str,
        changes: ProfileChanges,
        now: DateTime<Utc>,
    ) -> Result<User, AppError> {
        let client = self.get_client()?;
        let mut attempt = 1;
        loop {
            match update_profile_once(client, id, &changes, now).await {
                Ok(outcome) => return outcome,
                Err(e) if is_retryable(&e) && attempt < MAX_TRANSACTION_ATTEMPTS => {
                    tracing::debug!(user_id = id, attempt, error = %e, "Retrying profile update");
                    attempt += 1;
                }
                Err(e) => return Err(store_error(format!("Profile update failed: {}", e))),
            }
        }
    }

    async fn set_password_hash(
        &self,
        id: &str,
        password_hash: String,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.modify(id, |user| {
            user.replace_password_hash(password_hash.clone(), now);
            Ok(())
        })
        .await
    }
}
