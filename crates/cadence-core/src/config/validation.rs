//! Configuration validation utilities and rules

use crate::CoreError;
use std::fmt;

/// Configuration validation result
pub type ValidationResult = Result<(), ValidationError>;

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Value is out of acceptable range
    OutOfRange {
        field: String,
        min: Option<f64>,
        max: Option<f64>,
        actual: f64,
    },
    /// Custom validation failed
    Custom { field: String, message: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::OutOfRange {
                field,
                min,
                max,
                actual,
            } => {
                let range_desc = match (min, max) {
                    (Some(min), Some(max)) => format!("between {min} and {max}"),
                    (Some(min), None) => format!("at least {min}"),
                    (None, Some(max)) => format!("at most {max}"),
                    (None, None) => "in valid range".to_string(),
                };
                write!(f, "Field '{field}' must be {range_desc} (got {actual})")
            }
            ValidationError::Custom { field, message } => {
                write!(f, "Field '{field}': {message}")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for CoreError {
    fn from(err: ValidationError) -> Self {
        CoreError::invalid(err.to_string())
    }
}

/// Configuration validator that accumulates validation rules
#[derive(Debug, Default)]
pub struct ConfigValidator {
    errors: Vec<ValidationError>,
}

impl ConfigValidator {
    /// Create a new validator
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate that a number is within range
    pub fn range<T>(&mut self, field: &str, value: T, min: Option<T>, max: Option<T>) -> &mut Self
    where
        T: PartialOrd + Copy + Into<f64>,
    {
        let below = min.is_some_and(|m| value < m);
        let above = max.is_some_and(|m| value > m);
        if below || above {
            self.errors.push(ValidationError::OutOfRange {
                field: field.to_string(),
                min: min.map(Into::into),
                max: max.map(Into::into),
                actual: value.into(),
            });
        }
        self
    }

    /// Validate using a custom predicate
    pub fn custom<T, F>(&mut self, field: &str, value: &T, predicate: F, message: &str) -> &mut Self
    where
        F: FnOnce(&T) -> bool,
    {
        if !predicate(value) {
            self.errors.push(ValidationError::Custom {
                field: field.to_string(),
                message: message.to_string(),
            });
        }
        self
    }

    /// First error, if any
    pub fn result(self) -> ValidationResult {
        match self.errors.into_iter().next() {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Get all validation errors
    pub fn all_errors(self) -> Vec<ValidationError> {
        self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_validation() {
        let mut v = ConfigValidator::new();
        v.range("timeout", 0u32, Some(1), None);
        let err = v.result().unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut v = ConfigValidator::new();
        v.range("a", 5u32, None, Some(3))
            .custom("b", &"", |s| !s.is_empty(), "must not be empty");
        assert_eq!(v.all_errors().len(), 2);
    }
}
