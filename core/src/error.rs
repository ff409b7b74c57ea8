//! Error types for registration operations.

use crate::repository::RepositoryError;
use crate::types::{HostId, RegistrationId, RegistrationStatus};
use crate::workflow::{TransitionId, WorkflowError};
use thiserror::Error;

/// Message shown to end users when the system is misconfigured
pub const UNAVAILABLE_MESSAGE: &str = "Registration is currently unavailable.";

/// Errors that can occur in registration operations.
///
/// Validation failures are not errors; they come back as
/// [`Violations`](crate::violation::Violations).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// Host does not exist
    #[error("Host not found: {0}")]
    HostNotFound(HostId),

    /// Registration does not exist
    #[error("Registration not found: {0}")]
    RegistrationNotFound(RegistrationId),

    /// Host exists but has no registration settings
    #[error("Registration settings missing for host {0}")]
    MissingSettings(HostId),

    /// Workflow definition could not be found
    #[error("Registration workflow missing: {0}")]
    MissingWorkflow(String),

    /// Workflow definition failed validation
    #[error("Invalid registration workflow: {0}")]
    InvalidWorkflow(#[from] WorkflowError),

    /// The workflow has no such transition out of the current status
    #[error("Transition '{transition}' is not allowed from '{from}'")]
    TransitionNotAllowed {
        /// Requested transition
        transition: TransitionId,
        /// Current status
        from: RegistrationStatus,
    },

    /// Principal lacks a required permission
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Storage adapter failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl RegistrationError {
    /// Returns true for configuration errors, which block every admission
    /// and transition for the affected host
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingSettings(_) | Self::MissingWorkflow(_) | Self::InvalidWorkflow(_)
        )
    }

    /// Text safe to show to end users.
    ///
    /// Configuration errors collapse into a generic unavailable message.
    #[must_use]
    pub fn user_message(&self) -> String {
        if self.is_configuration() {
            UNAVAILABLE_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }
}

impl From<RepositoryError> for RegistrationError {
    fn from(error: RepositoryError) -> Self {
        Self::Storage(error.to_string())
    }
}

/// Result type for registration operations
pub type Result<T> = std::result::Result<T, RegistrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_hide_details() {
        let error = RegistrationError::MissingSettings(HostId::new());
        assert!(error.is_configuration());
        assert_eq!(error.user_message(), UNAVAILABLE_MESSAGE);

        let error = RegistrationError::AccessDenied("administer registration".to_string());
        assert!(!error.is_configuration());
        assert_eq!(error.user_message(), "Access denied: administer registration");
    }

    #[test]
    fn test_repository_errors_become_storage() {
        let error: RegistrationError =
            RepositoryError::Database("connection reset".to_string()).into();
        assert_eq!(
            error,
            RegistrationError::Storage("Database error: connection reset".to_string())
        );
    }
}
