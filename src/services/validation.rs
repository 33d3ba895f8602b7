// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Request payloads and their input rules.
//!
//! Each payload is normalized (trimmed, email lower-cased) and then checked
//! with `validator` before anything touches the store.

use crate::error::{AppError, FieldError};
use serde::Deserialize;
use std::borrow::Cow;
use validator::{Validate, ValidationError, ValidationErrors};

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(
        length(min = 3, max = 30, message = "Username must be between 3 and 30 characters"),
        custom(function = "username_chars")
    )]
    pub username: String,

    #[validate(
        email(message = "Please provide a valid email address"),
        length(max = 100, message = "Email cannot exceed 100 characters")
    )]
    pub email: String,

    #[validate(
        length(min = 6, max = 128, message = "Password must be between 6 and 128 characters"),
        custom(function = "password_strength")
    )]
    pub password: String,

    #[validate(
        length(max = 50, message = "First name cannot exceed 50 characters"),
        custom(function = "name_chars")
    )]
    pub first_name: Option<String>,

    #[validate(
        length(max = 50, message = "Last name cannot exceed 50 characters"),
        custom(function = "name_chars")
    )]
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct LoginRequest {
    /// Email or username
    #[validate(length(min = 3, max = 100, message = "Identifier must be between 3 and 100 characters"))]
    pub identifier: String,

    #[validate(length(min = 1, max = 128, message = "Password is required and cannot exceed 128 characters"))]
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct ProfileUpdateRequest {
    #[validate(
        email(message = "Please provide a valid email address"),
        length(max = 100, message = "Email cannot exceed 100 characters")
    )]
    pub email: Option<String>,

    #[validate(
        length(max = 50, message = "First name cannot exceed 50 characters"),
        custom(function = "name_chars")
    )]
    pub first_name: Option<String>,

    #[validate(
        length(max = 50, message = "Last name cannot exceed 50 characters"),
        custom(function = "name_chars")
    )]
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,

    #[validate(
        length(min = 6, max = 128, message = "New password must be between 6 and 128 characters"),
        custom(function = "password_strength")
    )]
    pub new_password: String,

    #[validate(must_match(
        other = "new_password",
        message = "Password confirmation does not match new password"
    ))]
    pub confirm_password: String,
}

impl RegisterRequest {
    pub fn normalized(self) -> Self {
        Self {
            username: self.username.trim().to_string(),
            email: normalize_email(&self.email),
            password: self.password,
            first_name: self.first_name.map(|s| s.trim().to_string()),
            last_name: self.last_name.map(|s| s.trim().to_string()),
        }
    }
}

impl LoginRequest {
    pub fn normalized(self) -> Self {
        Self {
            identifier: self.identifier.trim().to_string(),
            password: self.password,
        }
    }
}

impl ProfileUpdateRequest {
    pub fn normalized(self) -> Self {
        Self {
            email: self.email.map(|s| normalize_email(&s)),
            first_name: self.first_name.map(|s| s.trim().to_string()),
            last_name: self.last_name.map(|s| s.trim().to_string()),
        }
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn rule(code: &'static str, message: &'static str) -> ValidationError {
    ValidationError::new(code).with_message(Cow::Borrowed(message))
}

fn username_chars(username: &str) -> Result<(), ValidationError> {
    if username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(rule(
            "username_chars",
            "Username can only contain letters, numbers, and underscores",
        ))
    }
}

fn password_strength(password: &str) -> Result<(), ValidationError> {
    let lower = password.chars().any(|c| c.is_ascii_lowercase());
    let upper = password.chars().any(|c| c.is_ascii_uppercase());
    let digit = password.chars().any(|c| c.is_ascii_digit());
    if lower && upper && digit {
        Ok(())
    } else {
        Err(rule(
            "password_strength",
            "Password must contain at least one lowercase letter, one uppercase letter, and one number",
        ))
    }
}

fn name_chars(name: &str) -> Result<(), ValidationError> {
    if name.chars().all(|c| c.is_ascii_alphabetic() || c.is_whitespace()) {
        Ok(())
    } else {
        Err(rule("name_chars", "Name can only contain letters and spaces"))
    }
}

/// Run validation and convert failures into the API error shape.
pub fn check<T: Validate>(payload: &T) -> Result<(), AppError> {
    payload
        .validate()
        .map_err(|errors| AppError::ValidationFailed(field_errors(&errors)))
}

/// Flatten `validator` output into `{field, message}` pairs, sorted by field.
pub fn field_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut out: Vec<FieldError> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            let field = camel_case(&field);
            errs.iter().map(move |e| FieldError {
                field: field.clone(),
                message: e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value ({})", e.code)),
            })
        })
        .collect();
    out.sort_by(|a, b| a.field.cmp(&b.field).then_with(|| a.message.cmp(&b.message)));
    out
}

fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}
