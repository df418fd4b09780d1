//! Custom Axum Extractors
//!
//! JSON body and query extractors that run `validator` rules before the
//! handler sees the request.

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationErrors};

use crate::error::{AppError, FieldViolation};

// =========================================================================
// Validated JSON Extractor
// =========================================================================

/// JSON extractor with validation
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::InvalidArgument(e.body_text()))?;

        value.validate().map_err(violations)?;
        Ok(ValidatedJson(value))
    }
}

// =========================================================================
// Validated Query Extractor
// =========================================================================

/// Query extractor with validation
pub struct ValidatedQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ValidatedQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::InvalidArgument(e.body_text()))?;

        value.validate().map_err(violations)?;
        Ok(ValidatedQuery(value))
    }
}

/// Flatten `validator` output into one entry per failed rule, sorted by field
fn violations(errors: ValidationErrors) -> AppError {
    let mut list: Vec<FieldViolation> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |err| FieldViolation {
                field: field.to_string(),
                message: err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| err.code.to_string()),
            })
        })
        .collect();
    list.sort_by(|a, b| a.field.cmp(&b.field));
    AppError::Validation(list)
}

// =========================================================================
// Field rules
// =========================================================================

/// Lowercase letters, digits and underscores; role names are taken
pub fn validate_username(value: &str) -> Result<(), validator::ValidationError> {
    if crate::domain::is_reserved_username(value) {
        return Err(rule_error("username", "is reserved"));
    }
    if value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        Ok(())
    } else {
        Err(rule_error(
            "username",
            "must contain only lowercase letters, digits, or underscore",
        ))
    }
}

/// Letters and spaces only
pub fn validate_full_name(value: &str) -> Result<(), validator::ValidationError> {
    if value.chars().all(|c| c.is_alphabetic() || c == ' ') {
        Ok(())
    } else {
        Err(rule_error("full_name", "must contain only letters or spaces"))
    }
}

pub fn validate_currency(value: &str) -> Result<(), validator::ValidationError> {
    if crate::domain::currency::is_supported_currency(value) {
        Ok(())
    } else {
        Err(rule_error("currency", "unsupported currency"))
    }
}

fn rule_error(code: &'static str, message: &'static str) -> validator::ValidationError {
    let mut err = validator::ValidationError::new(code);
    err.message = Some(message.into());
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_rule() {
        assert!(validate_username("alice_01").is_ok());
        assert!(validate_username("Alice").is_err());
        assert!(validate_username("al-ice").is_err());
        assert!(validate_username("banker").is_err());
        assert!(validate_username("depositor").is_err());
    }

    #[test]
    fn test_full_name_rule() {
        assert!(validate_full_name("Alice Liddell").is_ok());
        assert!(validate_full_name("Alice 2").is_err());
    }

    #[test]
    fn test_currency_rule() {
        assert!(validate_currency("USD").is_ok());
        assert!(validate_currency("EUR").is_ok());
        assert!(validate_currency("GBP").is_err());
    }

    #[derive(Debug, Validate)]
    struct Sample {
        #[validate(length(min = 3, message = "too short"))]
        name: String,
        #[validate(range(min = 1))]
        page: i64,
    }

    #[test]
    fn test_violations_are_flattened() {
        let sample = Sample {
            name: "ab".to_string(),
            page: 0,
        };
        let err = violations(sample.validate().unwrap_err());

        match err {
            AppError::Validation(list) => {
                assert_eq!(list.len(), 2);
                assert_eq!(list[0].field, "name");
                assert_eq!(list[0].message, "too short");
                assert_eq!(list[1].field, "page");
                assert_eq!(list[1].message, "range");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
