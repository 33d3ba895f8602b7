// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Signed token issuance and verification.
//!
//! Access and refresh tokens are HS256 JWTs signed with separate secrets.
//! Every token carries a `type` claim so one kind can never stand in for
//! another, even if the secrets were shared.

use crate::config::Config;
use crate::error::{AppError, TokenErrorKind};
use crate::models::{Role, User};
use crate::time_utils::Clock;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Duration;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

pub const ISSUER: &str = "urlshortener-api";
pub const AUDIENCE: &str = "urlshortener-client";

const PASSWORD_RESET_TTL_HOURS: i64 = 1;
const EMAIL_VERIFICATION_TTL_HOURS: i64 = 24;

/// The `type` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenType {
    Access,
    Refresh,
    PasswordReset,
    EmailVerification,
}

/// JWT claims shared by every token kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    /// Unique token id
    pub jti: String,
}

/// Tokens returned to a client after login, registration or refresh.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "client/src/api/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// Mints and verifies tokens. Built once from [`Config`] and shared.
///
/// `iat`, `exp` and the expiry check all come from the injected [`Clock`].
pub struct TokenIssuer {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    validation: Validation,
    rng: SystemRandom,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(config: &Config, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_audience(&[AUDIENCE]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        // Expiry is checked against `clock` in `verify`
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            access_encoding: EncodingKey::from_secret(&config.access_token_secret),
            access_decoding: DecodingKey::from_secret(&config.access_token_secret),
            refresh_encoding: EncodingKey::from_secret(&config.refresh_token_secret),
            refresh_decoding: DecodingKey::from_secret(&config.refresh_token_secret),
            access_ttl: config.access_token_ttl,
            refresh_ttl: config.refresh_token_ttl,
            validation,
            rng: SystemRandom::new(),
            clock,
        }
    }

    pub fn issue_access_token(&self, user: &User) -> Result<String, AppError> {
        let claims = self.claims(
            &user.id,
            TokenType::Access,
            self.access_ttl,
            Some(user.username.clone()),
            Some(user.email.clone()),
            Some(user.role),
        )?;
        sign(&claims, &self.access_encoding)
    }

    pub fn issue_refresh_token(&self, user: &User) -> Result<String, AppError> {
        let claims = self.claims(
            &user.id,
            TokenType::Refresh,
            self.refresh_ttl,
            Some(user.username.clone()),
            None,
            None,
        )?;
        sign(&claims, &self.refresh_encoding)
    }

    pub fn issue_pair(&self, user: &User) -> Result<TokenPair, AppError> {
        Ok(TokenPair {
            access_token: self.issue_access_token(user)?,
            refresh_token: self.issue_refresh_token(user)?,
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    /// Single-use style token for a password reset link (1 hour).
    pub fn issue_password_reset_token(&self, user_id: &str) -> Result<String, AppError> {
        let claims = self.claims(
            user_id,
            TokenType::PasswordReset,
            Duration::hours(PASSWORD_RESET_TTL_HOURS),
            None,
            None,
            None,
        )?;
        sign(&claims, &self.access_encoding)
    }

    /// Token for an email verification link (24 hours).
    pub fn issue_email_verification_token(
        &self,
        user_id: &str,
        email: &str,
    ) -> Result<String, AppError> {
        let claims = self.claims(
            user_id,
            TokenType::EmailVerification,
            Duration::hours(EMAIL_VERIFICATION_TTL_HOURS),
            None,
            Some(email.to_lowercase()),
            None,
        )?;
        sign(&claims, &self.access_encoding)
    }

    /// Verify signature, issuer, audience and expiry against the access secret.
    ///
    /// The `type` claim is not checked here; callers decide what they accept.
    pub fn verify_access(&self, token: &str) -> Result<Claims, AppError> {
        self.verify(token, &self.access_decoding)
    }

    /// Verify against the refresh secret. The `type` claim is not checked.
    pub fn verify_refresh(&self, token: &str) -> Result<Claims, AppError> {
        self.verify(token, &self.refresh_decoding)
    }

    /// Verify a password-reset or email-verification token and require its type.
    pub fn verify_purpose(&self, token: &str, expected: TokenType) -> Result<Claims, AppError> {
        let claims = self.verify(token, &self.access_decoding)?;
        if claims.token_type != expected {
            return Err(AppError::InvalidToken(TokenErrorKind::WrongType));
        }
        Ok(claims)
    }

    fn verify(&self, token: &str, key: &DecodingKey) -> Result<Claims, AppError> {
        let claims = decode::<Claims>(token, key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AppError::InvalidToken(classify(e.kind())))?;

        if claims.exp < self.clock.now().timestamp() {
            return Err(AppError::InvalidToken(TokenErrorKind::Expired));
        }
        Ok(claims)
    }

    fn claims(
        &self,
        user_id: &str,
        token_type: TokenType,
        ttl: Duration,
        username: Option<String>,
        email: Option<String>,
        role: Option<Role>,
    ) -> Result<Claims, AppError> {
        let now = self.clock.now();
        Ok(Claims {
            id: user_id.to_string(),
            username,
            email,
            role,
            token_type,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
            jti: self.token_id()?,
        })
    }

    fn token_id(&self) -> Result<String, AppError> {
        let mut bytes = [0u8; 16];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Failed to generate token id")))?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }
}

fn sign(claims: &Claims, key: &EncodingKey) -> Result<String, AppError> {
    encode(&Header::new(Algorithm::HS256), claims, key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("JWT creation failed: {}", e)))
}

fn classify(kind: &ErrorKind) -> TokenErrorKind {
    match kind {
        ErrorKind::ExpiredSignature => TokenErrorKind::Expired,
        ErrorKind::InvalidSignature => TokenErrorKind::BadSignature,
        _ => TokenErrorKind::Malformed,
    }
}

/// Pull the token out of an `Authorization` header value.
///
/// Only the exact form `Bearer <token>` is accepted. Anything else,
/// including extra spaces or a lower-case scheme, yields `None`.
pub fn extract_bearer(header: Option<&str>) -> Option<&str> {
    let header = header?;
    let mut parts = header.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Some(token),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;
    use crate::time_utils::{ManualClock, SystemClock};
    use chrono::Utc;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(&Config::test_default(), Arc::new(SystemClock))
    }

    fn test_user() -> User {
        User::create(
            "user-1".to_string(),
            NewUser {
                username: "alice".to_string(),
                email: "alice@x.com".to_string(),
                password_hash: String::new(),
                first_name: None,
                last_name: None,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_access_token_claims() {
        let issuer = issuer();
        let token = issuer.issue_access_token(&test_user()).unwrap();

        let claims = issuer.verify_access(&token).unwrap();
        assert_eq!(claims.id, "user-1");
        assert_eq!(claims.username.as_deref(), Some("alice"));
        assert_eq!(claims.email.as_deref(), Some("alice@x.com"));
        assert_eq!(claims.role, Some(Role::User));
        assert_eq!(claims.token_type, TokenType::Access);
        assert_eq!(claims.iss, ISSUER);
        assert_eq!(claims.aud, AUDIENCE);
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn test_refresh_token_uses_its_own_secret() {
        let issuer = issuer();
        let refresh = issuer.issue_refresh_token(&test_user()).unwrap();

        let claims = issuer.verify_refresh(&refresh).unwrap();
        assert_eq!(claims.token_type, TokenType::Refresh);
        assert!(claims.email.is_none());
        assert!(claims.role.is_none());

        let err = issuer.verify_access(&refresh).unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidToken(TokenErrorKind::BadSignature)
        ));
    }

    #[test]
    fn test_each_token_gets_unique_id() {
        let issuer = issuer();
        let user = test_user();
        let a = issuer.verify_refresh(&issuer.issue_refresh_token(&user).unwrap()).unwrap();
        let b = issuer.verify_refresh(&issuer.issue_refresh_token(&user).unwrap()).unwrap();
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn test_pair_reports_access_lifetime() {
        let issuer = issuer();
        let pair = issuer.issue_pair(&test_user()).unwrap();
        assert_eq!(pair.expires_in, 900);

        let json = serde_json::to_value(&pair).unwrap();
        assert!(json.get("accessToken").is_some());
        assert!(json.get("refreshToken").is_some());
        assert_eq!(json["expiresIn"], 900);
    }

    #[test]
    fn test_expired_token() {
        let mut config = Config::test_default();
        config.access_token_ttl = Duration::seconds(-60);
        let issuer = TokenIssuer::new(&config, Arc::new(SystemClock));

        let token = issuer.issue_access_token(&test_user()).unwrap();
        let err = issuer.verify_access(&token).unwrap_err();
        assert!(matches!(err, AppError::InvalidToken(TokenErrorKind::Expired)));
    }

    #[test]
    fn test_expiry_follows_injected_clock() {
        let clock = Arc::new(ManualClock::starting_now());
        let issuer = TokenIssuer::new(&Config::test_default(), clock.clone());

        let token = issuer.issue_access_token(&test_user()).unwrap();
        let claims = issuer.verify_access(&token).unwrap();
        assert_eq!(claims.iat, clock.now().timestamp());

        // Still valid on the last second of its lifetime
        clock.advance(Duration::minutes(15));
        assert!(issuer.verify_access(&token).is_ok());

        clock.advance(Duration::seconds(1));
        let err = issuer.verify_access(&token).unwrap_err();
        assert!(matches!(err, AppError::InvalidToken(TokenErrorKind::Expired)));

        // Lifetime runs from the clock's time at issue
        clock.advance(Duration::days(-2));
        let stale = issuer.issue_refresh_token(&test_user()).unwrap();
        clock.advance(Duration::days(2));
        assert!(issuer.verify_refresh(&stale).is_ok());
        clock.advance(Duration::days(5) + Duration::seconds(1));
        let err = issuer.verify_refresh(&stale).unwrap_err();
        assert!(matches!(err, AppError::InvalidToken(TokenErrorKind::Expired)));
    }

    #[test]
    fn test_garbage_and_foreign_tokens_are_malformed() {
        let issuer = issuer();
        let err = issuer.verify_access("not.a.jwt").unwrap_err();
        assert!(matches!(err, AppError::InvalidToken(TokenErrorKind::Malformed)));

        // Correct key but a different issuer
        let mut claims = issuer
            .claims("user-1", TokenType::Access, Duration::minutes(5), None, None, None)
            .unwrap();
        claims.iss = "someone-else".to_string();
        let token = sign(&claims, &issuer.access_encoding).unwrap();
        let err = issuer.verify_access(&token).unwrap_err();
        assert!(matches!(err, AppError::InvalidToken(TokenErrorKind::Malformed)));
    }

    #[test]
    fn test_purpose_tokens_are_type_bound() {
        let issuer = issuer();

        let reset = issuer.issue_password_reset_token("user-1").unwrap();
        let claims = issuer.verify_purpose(&reset, TokenType::PasswordReset).unwrap();
        assert_eq!(claims.id, "user-1");
        assert_eq!(claims.exp - claims.iat, 3600);

        let err = issuer
            .verify_purpose(&reset, TokenType::EmailVerification)
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidToken(TokenErrorKind::WrongType)));

        let verify = issuer
            .issue_email_verification_token("user-1", "Alice@X.com")
            .unwrap();
        let claims = issuer
            .verify_purpose(&verify, TokenType::EmailVerification)
            .unwrap();
        assert_eq!(claims.email.as_deref(), Some("alice@x.com"));
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer(Some("Bearer abc.def")), Some("abc.def"));
        assert_eq!(extract_bearer(None), None);
        assert_eq!(extract_bearer(Some("")), None);
        assert_eq!(extract_bearer(Some("Bearer")), None);
        assert_eq!(extract_bearer(Some("Bearer ")), None);
        assert_eq!(extract_bearer(Some("bearer abc")), None);
        assert_eq!(extract_bearer(Some("Token abc")), None);
        assert_eq!(extract_bearer(Some("Bearer abc def")), None);
        assert_eq!(extract_bearer(Some("Bearer  abc")), None);
    }
}
