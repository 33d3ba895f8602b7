// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod password;
pub mod sessions;
pub mod tokens;
pub mod validation;

pub use password::PasswordHasher;
pub use sessions::{AuthSession, SessionManager};
pub use tokens::{extract_bearer, Claims, TokenIssuer, TokenPair, TokenType};
