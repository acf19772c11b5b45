//! Error types for declarative reconciliation.
//!
//! Errors are split by the phase that raises them. Validation and graph
//! errors happen before any provider call and have no side effects.
//! Provider errors are categorized so that only transient failures are
//! retried.

use crate::types::Address;
use std::path::PathBuf;
use thiserror::Error;

/// Categories of errors for retry logic and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad or missing configuration
    Validation,
    /// Malformed resource graph (cycles, dangling references)
    Graph,
    /// Provider rejected credentials
    Auth,
    /// Provider quota or limit exhausted
    Quota,
    /// Provider reports a conflicting object
    Conflict,
    /// Network-level or timeout failure (retryable)
    Transient,
    /// State snapshot could not be read or written
    State,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Whether the error happened before any side effect.
    pub fn is_planning(&self) -> bool {
        matches!(self, Self::Validation | Self::Graph)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Validation => "Invalid configuration",
            Self::Graph => "Invalid resource graph",
            Self::Auth => "Authentication failed",
            Self::Quota => "Quota exceeded",
            Self::Conflict => "Conflicting resource",
            Self::Transient => "Transient provider failure",
            Self::State => "State snapshot error",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Validation => "Fix the template or settings; nothing was changed",
            Self::Graph => "Break the reference cycle or keep the referenced resource",
            Self::Auth => "Check the provider credentials",
            Self::Quota => "Raise the quota or remove unused resources",
            Self::Conflict => "Import or remove the conflicting object, then re-run",
            Self::Transient => "Re-run apply; completed steps will not be repeated",
            Self::State => "Check the state file location and permissions",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors found while registering or validating declarations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Two declarations of the same type share a local name
    #[error("duplicate declaration: {address} is declared more than once")]
    DuplicateName { address: Address },

    /// A setting a resource strictly requires is missing or left blank
    #[error("setting '{setting}' required by {address} is not configured")]
    UndefinedLocal { setting: String, address: Address },

    /// A reference points at a declaration that does not exist
    #[error("{from} references undeclared resource {to}")]
    UnknownReference { from: Address, to: Address },

    /// A reference points at an attribute the resource does not have
    #[error("{from} references {to}.{attribute}, which is not known")]
    UnknownAttribute {
        from: Address,
        to: Address,
        attribute: String,
    },

    /// An expression could not be parsed or evaluated
    #[error("invalid expression in {address}.{attribute}: {message}")]
    InvalidExpression {
        address: Address,
        attribute: String,
        message: String,
    },

    /// A count expression did not evaluate to 0 or 1
    #[error("count of {address} must evaluate to 0 or 1, got {value}")]
    InvalidCount { address: Address, value: String },

    /// An explicitly enabled resource depends on a disabled one
    #[error("{address} is enabled but depends on {dependency}, which is disabled by its count")]
    InactiveDependency {
        address: Address,
        dependency: Address,
    },

    /// A destroy target is neither declared nor provisioned
    #[error("destroy target {address} is neither declared nor provisioned")]
    UnknownTarget { address: Address },

    /// No provider is registered for a resource type
    #[error("no provider registered for resource type '{resource_type}'")]
    NoProvider { resource_type: String },

    /// A string is not a `type.name` address
    #[error("invalid address '{0}': expected TYPE.NAME")]
    InvalidAddress(String),
}

/// Errors in the shape of the resource graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A reference cycle; the first address is repeated at the end
    #[error("dependency cycle detected: {}", format_cycle(.cycle))]
    CycleDetected { cycle: Vec<Address> },

    /// A surviving declaration still references a resource being destroyed
    #[error("cannot destroy {target}: {from} still references it")]
    DanglingReference { from: Address, target: Address },
}

fn format_cycle(cycle: &[Address]) -> String {
    cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors reported by a provider operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("authentication failed: {message}")]
    Auth { message: String },

    #[error("quota exceeded: {message}")]
    Quota { message: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Network-level failure or timeout; retried with backoff
    #[error("transient failure: {message}")]
    Transient { message: String },

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Auth { .. } => ErrorCategory::Auth,
            Self::Quota { .. } => ErrorCategory::Quota,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::Transient { .. } => ErrorCategory::Transient,
            Self::Other(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }
}

/// Errors that can occur while planning or reconciling
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A provider operation failed for one resource
    #[error("{address}: {source}")]
    Provider {
        address: Address,
        #[source]
        source: ProviderError,
    },

    /// State snapshot could not be loaded or stored
    #[error("state file {}: {message}", .path.display())]
    State { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Graph(_) => ErrorCategory::Graph,
            Self::Provider { source, .. } => source.category(),
            Self::State { .. } | Self::Io(_) => ErrorCategory::State,
        }
    }
}

/// Result type for declarative operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(ProviderError::transient("reset by peer").is_retryable());
        assert!(
            !ProviderError::Auth {
                message: "bad token".into()
            }
            .is_retryable()
        );
        assert!(
            !ProviderError::Quota {
                message: "clusters".into()
            }
            .is_retryable()
        );
        assert!(!ProviderError::Other("boom".into()).is_retryable());
    }

    #[test]
    fn test_cycle_message_names_the_cycle() {
        let err = GraphError::CycleDetected {
            cycle: vec![
                Address::new("a", "x"),
                Address::new("b", "y"),
                Address::new("a", "x"),
            ],
        };
        assert_eq!(err.to_string(), "dependency cycle detected: a.x -> b.y -> a.x");
    }

    #[test]
    fn test_error_category() {
        let err: Error = ValidationError::InvalidAddress("x".into()).into();
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(err.category().is_planning());

        let err = Error::Provider {
            address: Address::new("s3", "b"),
            source: ProviderError::Conflict {
                message: "exists".into(),
            },
        };
        assert_eq!(err.category(), ErrorCategory::Conflict);
        assert!(!err.category().is_planning());
    }
}
