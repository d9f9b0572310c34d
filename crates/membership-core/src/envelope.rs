//! Tri-state result envelope handed to callers.

use serde::{Deserialize, Serialize};

use crate::error::{error_chain, MembershipResult};

/// Delimiter between the messages of a flattened error chain.
pub const ERROR_DELIMITER: &str = " | ";

/// Success flag, result and error text.
///
/// On failure `result` holds `T::default()` unless a partial result was
/// attached, and `error` holds the error chain innermost cause first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope<T> {
    pub success: bool,
    pub result: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ResultEnvelope<T> {
    pub fn ok(result: T) -> Self {
        Self {
            success: true,
            result,
            error: None,
        }
    }

    /// A failure that still carries a (partial) result.
    pub fn failure_with_result(result: T, error: impl Into<String>) -> Self {
        Self {
            success: false,
            result,
            error: Some(error.into()),
        }
    }
}

impl<T: Default> ResultEnvelope<T> {
    pub fn failure(error: impl Into<String>) -> Self {
        Self::failure_with_result(T::default(), error)
    }

    pub fn from_result(result: MembershipResult<T>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(e) => Self::failure(error_chain(&e, ERROR_DELIMITER)),
        }
    }
}
