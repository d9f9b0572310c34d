//! Membership error types
//!
//! Error definitions for identity parsing, directory lookups and membership
//! decisions, with a transient/permanent classification.

use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Error that can occur while resolving identities or deciding membership.
#[derive(Debug, Error)]
pub enum MembershipError {
    /// A required input was missing or blank.
    #[error("invalid argument '{parameter}': {message}")]
    InvalidArgument { parameter: String, message: String },

    /// A login does not resolve to a directory principal, or a local group
    /// does not exist.
    #[error("not found: {identifier}")]
    NotFound { identifier: String },

    /// The directory refused to return an attribute for a principal.
    #[error("access denied on attribute '{attribute}' of '{principal}'")]
    AccessDenied {
        principal: String,
        attribute: String,
    },

    /// Bind, search or network failure against the directory.
    #[error("directory unavailable: {message}")]
    DirectoryUnavailable {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// A recursive member query returned something other than a user.
    #[error("unexpected principal type '{structural_class}' for '{principal}'")]
    UnexpectedPrincipalType {
        principal: String,
        structural_class: String,
    },

    /// Malformed SID bytes or SID text.
    #[error("conversion error: {message}")]
    ConversionError {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Configuration failed validation.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },
}

impl MembershipError {
    /// Check if this error is transient and a caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, MembershipError::DirectoryUnavailable { .. })
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            MembershipError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            MembershipError::NotFound { .. } => "NOT_FOUND",
            MembershipError::AccessDenied { .. } => "ACCESS_DENIED",
            MembershipError::DirectoryUnavailable { .. } => "DIRECTORY_UNAVAILABLE",
            MembershipError::UnexpectedPrincipalType { .. } => "UNEXPECTED_PRINCIPAL_TYPE",
            MembershipError::ConversionError { .. } => "CONVERSION_ERROR",
            MembershipError::InvalidConfiguration { .. } => "INVALID_CONFIG",
        }
    }

    // Convenience constructors

    /// Create an invalid argument error.
    pub fn invalid_argument(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        MembershipError::InvalidArgument {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a missing parameter error.
    pub fn missing_parameter(parameter: impl Into<String>) -> Self {
        let parameter = parameter.into();
        MembershipError::InvalidArgument {
            message: format!("parameter '{parameter}' missing"),
            parameter,
        }
    }

    /// Create a not found error.
    pub fn not_found(identifier: impl Into<String>) -> Self {
        MembershipError::NotFound {
            identifier: identifier.into(),
        }
    }

    /// Create a directory unavailable error.
    pub fn directory_unavailable(message: impl Into<String>) -> Self {
        MembershipError::DirectoryUnavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Create a directory unavailable error with source.
    pub fn directory_unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        MembershipError::DirectoryUnavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a conversion error.
    pub fn conversion(message: impl Into<String>) -> Self {
        MembershipError::ConversionError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a conversion error with source.
    pub fn conversion_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        MembershipError::ConversionError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for membership operations.
pub type MembershipResult<T> = Result<T, MembershipError>;

/// Flatten an error and its `source()` chain into one string.
///
/// Messages are ordered innermost cause first and joined with `delimiter`.
pub fn error_chain(err: &(dyn std::error::Error + 'static), delimiter: &str) -> String {
    let mut messages = vec![err.to_string()];
    let mut current = err.source();
    while let Some(cause) = current {
        messages.push(cause.to_string());
        current = cause.source();
    }
    messages.reverse();
    messages.join(delimiter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        let err = MembershipError::directory_unavailable("ldap down");
        assert!(err.is_transient());
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_permanent_errors() {
        let permanent_errors = vec![
            MembershipError::missing_parameter("login"),
            MembershipError::not_found("CORP\\nobody"),
            MembershipError::AccessDenied {
                principal: "CORP\\alice".to_string(),
                attribute: "tokenGroups".to_string(),
            },
            MembershipError::UnexpectedPrincipalType {
                principal: "CORP\\GG-Nested".to_string(),
                structural_class: "group".to_string(),
            },
            MembershipError::conversion("truncated SID"),
        ];

        for err in permanent_errors {
            assert!(
                err.is_permanent(),
                "Expected {} to be permanent",
                err.error_code()
            );
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            MembershipError::missing_parameter("group").error_code(),
            "INVALID_ARGUMENT"
        );
        assert_eq!(MembershipError::not_found("x").error_code(), "NOT_FOUND");
        assert_eq!(
            MembershipError::directory_unavailable("x").error_code(),
            "DIRECTORY_UNAVAILABLE"
        );
    }

    #[test]
    fn test_error_display() {
        let err = MembershipError::missing_parameter("login");
        assert_eq!(
            err.to_string(),
            "invalid argument 'login': parameter 'login' missing"
        );

        let err = MembershipError::AccessDenied {
            principal: "CORP\\alice".to_string(),
            attribute: "tokenGroups".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "access denied on attribute 'tokenGroups' of 'CORP\\alice'"
        );
    }

    #[test]
    fn test_error_chain_innermost_first() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        let err = MembershipError::directory_unavailable_with_source("bind failed", io);

        assert_eq!(
            error_chain(&err, " | "),
            "connection refused | directory unavailable: bind failed"
        );
    }

    #[test]
    fn test_error_chain_single() {
        let err = MembershipError::not_found("Editors");
        assert_eq!(error_chain(&err, "\n"), "not found: Editors");
    }
}
