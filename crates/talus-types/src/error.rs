//! Error types for engine operations.

use thiserror::Error;

/// Errors surfaced by the host-facing API.
///
/// Internal invariant violations (graph corruption, unknown tree nodes) are
/// programmer errors and abort via assertions rather than flowing through
/// this type.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TalusError {
    /// An entity was not found or lacks a required component.
    #[error("unknown entity: {0}")]
    UnknownEntity(u64),

    /// A body or constraint definition failed validation.
    #[error("malformed definition: {reason}")]
    MalformedDefinition {
        /// What was wrong with the definition.
        reason: String,
    },

    /// A constraint references a body that does not exist.
    #[error("constraint references missing body {0}")]
    MissingConstraintBody(u64),

    /// Invalid configuration value.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What was wrong with the configuration.
        reason: String,
    },

    /// The engine was used after shutdown.
    #[error("simulation already shut down")]
    ShutDown,
}

impl TalusError {
    /// Create a malformed-definition error.
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedDefinition {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = TalusError::UnknownEntity(17);
        assert!(err.to_string().contains("17"));

        let err = TalusError::malformed("zero mass for dynamic body");
        assert!(err.to_string().contains("zero mass"));
    }
}
