//! Error types for the registry engines.
//!
//! Only malformed input at the API boundary is returned as a hard error.
//! Probe and per-target failures are carried as values inside health and
//! batch records; the variants below give them a typed shape before they
//! are flattened into those records.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for registry engine operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors produced by the registry engines and their collaborators.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A protection policy was rejected at insertion time.
    #[error("invalid policy '{name}': {reason}")]
    InvalidPolicy {
        /// Policy name.
        name: String,
        /// Reason the policy was rejected.
        reason: String,
    },

    /// A batch was submitted without targets.
    #[error("batch {op_type} submitted with no targets")]
    EmptyTargets {
        /// Kind of batch that was rejected.
        op_type: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Reason for invalidity.
        reason: String,
    },

    /// A health probe did not answer within its timeout.
    #[error("health check for '{endpoint}' timed out after {}ms", timeout.as_millis())]
    ProbeTimeout {
        /// Probed endpoint.
        endpoint: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// A health probe answered with an error.
    #[error("health check for '{endpoint}' failed: {reason}")]
    ProbeFailure {
        /// Probed endpoint.
        endpoint: String,
        /// Failure reason.
        reason: String,
    },

    /// A single batch target's action failed.
    #[error("{action} failed for '{target}': {reason}")]
    TargetActionFailure {
        /// Action that was attempted (delete, copy, ...).
        action: String,
        /// Target the action ran against.
        target: String,
        /// Failure reason.
        reason: String,
    },

    /// Policy file could not be read.
    #[error("failed to read policy file: {0}")]
    Io(#[from] std::io::Error),

    /// Policy file could not be parsed.
    #[error("failed to parse policy file: {0}")]
    PolicyFile(#[from] serde_yaml::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// Creates an `InvalidPolicy` error.
    pub fn invalid_policy(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `TargetActionFailure` error.
    pub fn target_failure(
        action: impl Into<String>,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::TargetActionFailure {
            action: action.into(),
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if retrying the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProbeTimeout { .. } | Self::ProbeFailure { .. } | Self::TargetActionFailure { .. }
        )
    }

    /// Returns true if the error came from malformed caller input.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPolicy { .. }
                | Self::EmptyTargets { .. }
                | Self::InvalidConfig { .. }
                | Self::PolicyFile(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_policy_display() {
        let err = RegistryError::invalid_policy("prod", "pattern cannot be empty");
        assert!(err.to_string().contains("prod"));
        assert!(err.to_string().contains("pattern cannot be empty"));
        assert!(err.is_input_error());
    }

    #[test]
    fn test_probe_timeout_is_retryable() {
        let err = RegistryError::ProbeTimeout {
            endpoint: "https://registry.example.com".to_string(),
            timeout: Duration::from_millis(500),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("500ms"));
    }

    #[test]
    fn test_target_failure_display() {
        let err = RegistryError::target_failure("delete", "library/nginx:old", "manifest unknown");
        assert_eq!(
            err.to_string(),
            "delete failed for 'library/nginx:old': manifest unknown"
        );
        assert!(err.is_retryable());
        assert!(!err.is_input_error());
    }

    #[test]
    fn test_empty_targets_not_retryable() {
        let err = RegistryError::EmptyTargets {
            op_type: "copy".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.is_input_error());
    }
}
