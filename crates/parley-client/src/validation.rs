//! Client-side field checks.
//!
//! Run before anything is sent. A failure is a [`ValidationErrors`] listing
//! every offending field.

use std::sync::LazyLock;

use parley_proto::{Credentials, SignupForm};
use regex::Regex;

use crate::error::{Field, ValidationErrors};

/// Minimum display name length, in characters.
pub const MIN_USERNAME_LEN: usize = 3;

/// Minimum password length, in characters.
pub const MIN_PASSWORD_LEN: usize = 6;

#[allow(clippy::expect_used)]
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\S+@\S+\.\S+").expect("invariant: email pattern is valid"));

/// Check a login form.
pub fn check_credentials(credentials: &Credentials) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    if credentials.email.trim().is_empty() {
        errors.push(Field::Email, "Email is required");
    }
    if credentials.password.is_empty() {
        errors.push(Field::Password, "Password is required");
    }
    errors.into_result()
}

/// Check a signup form.
pub fn check_signup(form: &SignupForm) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    if form.username.chars().count() < MIN_USERNAME_LEN {
        errors.push(Field::Username, "Username must be at least 3 characters long");
    }
    if !EMAIL.is_match(&form.email) {
        errors.push(Field::Email, "Please enter a valid email address");
    }
    if form.password.chars().count() < MIN_PASSWORD_LEN {
        errors.push(Field::Password, "Password must be at least 6 characters long");
    }
    if form.password != form.confirm_password {
        errors.push(Field::ConfirmPassword, "Passwords do not match");
    }
    errors.into_result()
}

/// Check outgoing message text. Returns the trimmed content.
pub fn check_message(content: &str) -> Result<&str, ValidationErrors> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        let mut errors = ValidationErrors::default();
        errors.push(Field::Content, "Message cannot be empty");
        return Err(errors);
    }
    Ok(trimmed)
}
