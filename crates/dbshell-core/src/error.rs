//! Failure payload attached to driver responses.
//!
//! A driver never aborts an exchange when an operation fails.  It answers the
//! request as usual and attaches an [`ErrorValue`] to the response, so the
//! facade can log it and subscribers can decide what to do with it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Immutable description of an operation failure (or warning).
///
/// `is_error = false` marks an informational value: it is carried to
/// subscribers like any other, but the facade does not log it as an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorValue {
    message: String,
    is_error: bool,
}

impl ErrorValue {
    pub fn new(message: impl Into<String>, is_error: bool) -> Self {
        Self {
            message: message.into(),
            is_error,
        }
    }

    /// Creates a value describing a failed operation.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message, true)
    }

    /// Creates a non-fatal value; it is surfaced but not treated as a failure.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(message, false)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_error {
            write!(f, "error: {}", self.message)
        } else {
            write!(f, "warning: {}", self.message)
        }
    }
}
