//! Request Validation Module
//!
//! Field checks for the authentication endpoints' request bodies.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation error types
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Required field '{field}' is missing")]
    MissingField { field: String },

    #[error("Field '{field}' is too long (max: {max}, got: {got})")]
    TooLong {
        field: String,
        max: usize,
        got: usize,
    },

    #[error("Field '{field}' is too short (min: {min}, got: {got})")]
    TooShort {
        field: String,
        min: usize,
        got: usize,
    },

    #[error("Field '{field}' contains invalid characters: {chars}")]
    InvalidCharacters { field: String, chars: String },

    #[error("{message}")]
    Custom { field: String, message: String },
}

/// Validation result type
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

/// Request validation trait
pub trait Validatable {
    fn validate(&self) -> ValidationResult<()>;
}

/// Request sanitizer trait
pub trait Sanitizable {
    fn sanitize(&mut self);
}

/// Request validator implementation
#[derive(Debug, Clone)]
pub struct RequestValidator {
    /// Maximum allowed field length
    max_field_length: usize,
}

impl Default for RequestValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestValidator {
    pub fn new() -> Self {
        Self {
            max_field_length: 256,
        }
    }

    /// Validate field length
    pub fn validate_length(
        &self,
        field: &str,
        value: &str,
        min: Option<usize>,
        max: Option<usize>,
    ) -> ValidationResult<()> {
        let length = value.chars().count();

        if length == 0 && min.is_some_and(|m| m > 0) {
            return Err(ValidationError::MissingField {
                field: field.to_string(),
            });
        }

        if let Some(min_len) = min.filter(|m| length < *m) {
            return Err(ValidationError::TooShort {
                field: field.to_string(),
                min: min_len,
                got: length,
            });
        }

        let max_len = max.unwrap_or(self.max_field_length);
        if length > max_len {
            return Err(ValidationError::TooLong {
                field: field.to_string(),
                max: max_len,
                got: length,
            });
        }

        Ok(())
    }

    /// Validate that value contains only alphanumerics and `allowed`
    pub fn validate_safe_chars(
        &self,
        field: &str,
        value: &str,
        allowed: &[char],
    ) -> ValidationResult<()> {
        let invalid: String = value
            .chars()
            .filter(|c| !c.is_ascii_alphanumeric() && !allowed.contains(c))
            .collect();

        if invalid.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::InvalidCharacters {
                field: field.to_string(),
                chars: invalid,
            })
        }
    }

    /// Trim and drop control characters
    pub fn sanitize_string(input: &str) -> String {
        input
            .trim()
            .chars()
            .filter(|c| !c.is_control())
            .collect()
    }
}

/// Common validation helpers
pub mod validators {
    use super::*;

    pub fn validate_username(username: &str) -> ValidationResult<()> {
        let validator = RequestValidator::new();
        validator.validate_length("username", username, Some(1), Some(64))?;
        validator.validate_safe_chars("username", username, &['-', '_', '.', '@'])
    }

    /// Presence and upper bound only; the minimum length is the account policy's call
    pub fn validate_password_field(field: &str, password: &str) -> ValidationResult<()> {
        RequestValidator::new().validate_length(field, password, Some(1), Some(1024))
    }

    pub fn validate_role(role: &str, known_roles: &[&str]) -> ValidationResult<()> {
        if known_roles.contains(&role) {
            Ok(())
        } else {
            Err(ValidationError::Custom {
                field: "role".to_string(),
                message: format!("Unknown role '{role}'"),
            })
        }
    }
}
