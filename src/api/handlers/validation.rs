//! Form field validation.

use regex::Regex;
use std::collections::BTreeMap;

const MIN_PASSWORD_LEN: usize = 8;
const MIN_TOKEN_LEN: usize = 6;

/// Field-scoped validation failures collected over one form.
#[derive(Debug, Default, PartialEq, Eq, thiserror::Error)]
#[error("please correct the errors in the form")]
pub struct ValidationError {
    pub fields: BTreeMap<&'static str, String>,
}

impl ValidationError {
    pub fn check(&mut self, field: &'static str, result: Result<(), &'static str>) {
        if let Err(message) = result {
            self.fields.entry(field).or_insert_with(|| message.to_string());
        }
    }

    /// # Errors
    /// Returns `self` when any field failed.
    pub fn finish(self) -> Result<(), Self> {
        if self.fields.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

fn matches(pattern: &str, value: &str) -> bool {
    Regex::new(pattern).is_ok_and(|regex| regex.is_match(value))
}

/// # Errors
/// Returns a message when the email is empty or lacks `@` or `.`.
pub fn validate_email(email: &str) -> Result<(), &'static str> {
    if email.is_empty() {
        return Err("email cannot be empty");
    }
    if !email.contains('@') || !email.contains('.') {
        return Err("invalid email format");
    }
    Ok(())
}

/// # Errors
/// Returns a message unless the password has 8+ characters with a lowercase
/// letter, an uppercase letter, a digit and one of `@$!%*?&=`.
pub fn validate_password(password: &str) -> Result<(), &'static str> {
    if password.len() < MIN_PASSWORD_LEN
        || !matches("[a-z]", password)
        || !matches("[A-Z]", password)
        || !matches(r"\d", password)
        || !matches("[@$!%*?&=]", password)
    {
        return Err("password must be at least 8 characters long, contain at least one lowercase letter, one uppercase letter, one digit, and one special character");
    }
    Ok(())
}

/// # Errors
/// Returns a message when the token is short or has characters outside `[A-Za-z0-9_-]`.
pub fn validate_token(token: &str) -> Result<(), &'static str> {
    if token.len() < MIN_TOKEN_LEN {
        return Err("token must be at least 6 characters long");
    }
    if !matches("^[a-zA-Z0-9_-]+$", token) {
        return Err("invalid token format");
    }
    Ok(())
}

/// # Errors
/// Returns a message when the two values differ.
pub fn validate_confirmation(password: &str, confirmation: &str) -> Result<(), &'static str> {
    if password == confirmation {
        Ok(())
    } else {
        Err("passwords do not match")
    }
}

/// # Errors
/// Returns a message when the name is blank.
pub fn validate_name(name: &str) -> Result<(), &'static str> {
    if name.trim().is_empty() {
        Err("name is required")
    } else {
        Ok(())
    }
}
