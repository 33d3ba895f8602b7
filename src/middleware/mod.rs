// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Middleware modules (authentication, security, etc.).

pub mod auth;
pub mod security;

pub use auth::{
    admin_only, ensure_owner_or_admin, optional_auth, require_auth, require_roles, user_or_admin,
    AuthUser, OptionalAuthUser,
};
