// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! URL shortener authentication service.
//!
//! This crate provides the account and session backend: registration,
//! login with lockout, access/refresh token issuance with rotation, and
//! the request gate that resolves callers from their access token.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::SharedUserStore;
use services::{SessionManager, TokenIssuer};
use std::sync::Arc;
use time_utils::{Clock, SystemClock};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: SharedUserStore,
    pub tokens: Arc<TokenIssuer>,
    pub sessions: SessionManager,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(config: Config, store: SharedUserStore) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Build state around a specific clock (tests use a manual one).
    pub fn with_clock(config: Config, store: SharedUserStore, clock: Arc<dyn Clock>) -> Self {
        let tokens = Arc::new(TokenIssuer::new(&config, clock.clone()));
        let sessions = SessionManager::new(&config, store.clone(), tokens.clone(), clock.clone());
        Self {
            config,
            store,
            tokens,
            sessions,
            clock,
        }
    }
}
