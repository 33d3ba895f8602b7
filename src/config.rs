// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Everything is read once at startup and handed to the token issuer,
//! password hasher and session manager when they are constructed.

use chrono::Duration;
use std::env;

/// Minimum accepted length for a token signing secret.
const MIN_SECRET_LEN: usize = 32;

/// Work factors the bcrypt crate accepts.
const MIN_BCRYPT_COST: u32 = 4;
const MAX_BCRYPT_COST: u32 = 31;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Frontend URL allowed by CORS
    pub frontend_url: String,
    /// GCP project ID; selects the Firestore user store when set
    pub gcp_project_id: Option<String>,
    /// Server port
    pub port: u16,
    /// Production mode hides internal error detail from clients
    pub production: bool,

    // --- Token lifetimes ---
    /// Access token lifetime (`JWT_ACCESS_EXPIRY`, default 15m)
    pub access_token_ttl: Duration,
    /// Refresh token lifetime (`JWT_REFRESH_EXPIRY`, default 7d)
    pub refresh_token_ttl: Duration,
    /// How long a stored refresh token entry is kept before the store drops it
    pub refresh_token_retention: Duration,

    // --- Login policy ---
    /// Failed attempts before the account is locked
    pub max_login_attempts: u32,
    /// How long a lock lasts
    pub lock_duration: Duration,
    /// bcrypt work factor
    pub bcrypt_cost: u32,

    // --- Secrets ---
    /// Signing key for access tokens (raw bytes)
    pub access_token_secret: Vec<u8>,
    /// Signing key for refresh tokens (raw bytes)
    pub refresh_token_secret: Vec<u8>,
}

impl Config {
    /// Deterministic configuration for tests.
    ///
    /// Uses the minimum bcrypt cost so hashing stays fast.
    pub fn test_default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: None,
            port: 5000,
            production: false,
            access_token_ttl: Duration::minutes(15),
            refresh_token_ttl: Duration::days(7),
            refresh_token_retention: Duration::days(7),
            max_login_attempts: 5,
            lock_duration: Duration::hours(2),
            bcrypt_cost: 4,
            access_token_secret: b"test_access_key_32_bytes_minimum!!".to_vec(),
            refresh_token_secret: b"test_refresh_key_32_bytes_minimum!".to_vec(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// A `.env` file is loaded first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let access_token_secret = required_secret("JWT_ACCESS_SECRET")?;
        let refresh_token_secret = required_secret("JWT_REFRESH_SECRET")?;
        if access_token_secret == refresh_token_secret {
            return Err(ConfigError::Invalid {
                var: "JWT_REFRESH_SECRET",
                reason: "must differ from JWT_ACCESS_SECRET".to_string(),
            });
        }

        let environment = env::var("APP_ENV")
            .or_else(|_| env::var("NODE_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        Ok(Self {
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .unwrap_or(5000),
            production: environment.eq_ignore_ascii_case("production"),

            access_token_ttl: duration_var("JWT_ACCESS_EXPIRY", "15m")?,
            refresh_token_ttl: duration_var("JWT_REFRESH_EXPIRY", "7d")?,
            refresh_token_retention: span_var(
                "REFRESH_TOKEN_RETENTION_DAYS",
                7,
                Duration::try_days,
            )?,

            max_login_attempts: number_var("LOGIN_MAX_ATTEMPTS", 5)?,
            lock_duration: span_var("LOGIN_LOCK_MINUTES", 120, Duration::try_minutes)?,
            bcrypt_cost: bcrypt_cost_var()?,

            access_token_secret,
            refresh_token_secret,
        })
    }
}

fn required_secret(var: &'static str) -> Result<Vec<u8>, ConfigError> {
    let value = env::var(var)
        .map(|v| v.trim().to_string())
        .map_err(|_| ConfigError::Missing(var))?;

    if value.len() < MIN_SECRET_LEN {
        return Err(ConfigError::Invalid {
            var,
            reason: format!("must be at least {} characters", MIN_SECRET_LEN),
        });
    }

    Ok(value.into_bytes())
}

fn duration_var(var: &'static str, default: &str) -> Result<Duration, ConfigError> {
    let raw = env::var(var).unwrap_or_else(|_| default.to_string());
    parse_duration(&raw).ok_or_else(|| ConfigError::Invalid {
        var,
        reason: format!("expected <number><s|m|h|d>, got {:?}", raw),
    })
}

fn number_var<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            reason: format!("expected a number, got {:?}", raw),
        }),
        Err(_) => Ok(default),
    }
}

/// Read a whole number of `unit`s, rejecting values that are not positive
/// or do not fit in a `Duration`.
fn span_var(
    var: &'static str,
    default: i64,
    unit: fn(i64) -> Option<Duration>,
) -> Result<Duration, ConfigError> {
    let amount: i64 = number_var(var, default)?;
    unit(amount)
        .filter(|span| *span > Duration::zero())
        .ok_or_else(|| ConfigError::Invalid {
            var,
            reason: format!("{} is out of range", amount),
        })
}

fn bcrypt_cost_var() -> Result<u32, ConfigError> {
    let cost: u32 = number_var("BCRYPT_COST", bcrypt::DEFAULT_COST)?;
    if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&cost) {
        return Err(ConfigError::Invalid {
            var: "BCRYPT_COST",
            reason: format!(
                "must be between {} and {}, got {}",
                MIN_BCRYPT_COST, MAX_BCRYPT_COST, cost
            ),
        });
    }
    Ok(cost)
}

/// Parse shorthand durations such as `15m`, `7d`, `3600s` or `2h`.
///
/// A bare number is taken as seconds. Zero, negative and out-of-range values
/// are rejected.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let amount: i64 = digits.parse().ok()?;
    if amount <= 0 {
        return None;
    }

    match unit {
        "" | "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        _ => None,
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("15m"), Some(Duration::minutes(15)));
        assert_eq!(parse_duration("7d"), Some(Duration::days(7)));
        assert_eq!(parse_duration("2h"), Some(Duration::hours(2)));
        assert_eq!(parse_duration("90s"), Some(Duration::seconds(90)));
        assert_eq!(parse_duration("45"), Some(Duration::seconds(45)));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("m"), None);
        assert_eq!(parse_duration("0m"), None);
        assert_eq!(parse_duration("10w"), None);
        assert_eq!(parse_duration("-5m"), None);
    }

    #[test]
    fn test_parse_duration_out_of_range_is_rejected() {
        assert_eq!(parse_duration("999999999999999d"), None);
        assert_eq!(parse_duration("9223372036854775807m"), None);
        // Too many digits for i64
        assert_eq!(parse_duration("99999999999999999999s"), None);
    }

    // Env-var manipulation is kept in a single test so parallel tests
    // never observe each other's values.
    #[test]
    fn test_config_from_env() {
        env::set_var("JWT_ACCESS_SECRET", "access_signing_key_with_32_chars_min_123");
        env::set_var("JWT_REFRESH_SECRET", "access_signing_key_with_32_chars_min_123");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("must differ"));

        env::set_var("JWT_REFRESH_SECRET", "short");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("at least 32"));

        env::set_var("JWT_REFRESH_SECRET", "refresh_signing_key_with_32_chars_min_456");
        env::set_var("JWT_ACCESS_EXPIRY", "30m");
        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.access_token_ttl, Duration::minutes(30));
        assert_eq!(config.refresh_token_ttl, Duration::days(7));
        assert_eq!(config.max_login_attempts, 5);
        assert_eq!(config.lock_duration, Duration::hours(2));
        assert_ne!(config.access_token_secret, config.refresh_token_secret);

        env::set_var("JWT_ACCESS_EXPIRY", "soon");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid {
                var: "JWT_ACCESS_EXPIRY",
                ..
            })
        ));

        env::set_var("JWT_ACCESS_EXPIRY", "999999999999999d");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid {
                var: "JWT_ACCESS_EXPIRY",
                ..
            })
        ));
        env::remove_var("JWT_ACCESS_EXPIRY");

        env::set_var("REFRESH_TOKEN_RETENTION_DAYS", "999999999999999");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid {
                var: "REFRESH_TOKEN_RETENTION_DAYS",
                ..
            })
        ));
        env::set_var("REFRESH_TOKEN_RETENTION_DAYS", "0");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid {
                var: "REFRESH_TOKEN_RETENTION_DAYS",
                ..
            })
        ));
        env::remove_var("REFRESH_TOKEN_RETENTION_DAYS");

        env::set_var("LOGIN_LOCK_MINUTES", "-1");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid {
                var: "LOGIN_LOCK_MINUTES",
                ..
            })
        ));
        env::remove_var("LOGIN_LOCK_MINUTES");

        for cost in ["3", "32", "1000"] {
            env::set_var("BCRYPT_COST", cost);
            assert!(matches!(
                Config::from_env(),
                Err(ConfigError::Invalid {
                    var: "BCRYPT_COST",
                    ..
                })
            ));
        }
        env::set_var("BCRYPT_COST", "31");
        assert_eq!(Config::from_env().unwrap().bcrypt_cost, 31);
        env::remove_var("BCRYPT_COST");

        env::remove_var("JWT_ACCESS_SECRET");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("JWT_ACCESS_SECRET"))
        ));
        env::remove_var("JWT_REFRESH_SECRET");
    }
}
