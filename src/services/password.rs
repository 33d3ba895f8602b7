// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! bcrypt password hashing.
//!
//! Hashing is CPU-bound, so both operations run on the blocking pool
//! instead of stalling the async executor.

use crate::error::AppError;
use anyhow::Context;

/// Salted adaptive password hasher with a fixed work factor.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a plaintext password with a fresh salt.
    pub async fn hash(&self, plaintext: &str) -> Result<String, AppError> {
        let plaintext = plaintext.to_string();
        let cost = self.cost;

        let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(plaintext, cost))
            .await
            .context("password hashing task failed")?
            .context("bcrypt hash failed")?;

        Ok(hashed)
    }

    /// Check a plaintext password against a stored hash.
    ///
    /// Returns false for an empty or unparseable hash rather than an error.
    pub async fn verify(&self, plaintext: &str, hashed: &str) -> bool {
        if hashed.is_empty() {
            return false;
        }

        let plaintext = plaintext.to_string();
        let hashed = hashed.to_string();

        match tokio::task::spawn_blocking(move || bcrypt::verify(plaintext, &hashed)).await {
            Ok(Ok(matches)) => matches,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Stored password hash could not be parsed");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "Password verification task failed");
                false
            }
        }
    }
}
