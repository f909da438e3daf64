//! Aegis Error - Unified Error Types
//!
//! Error handling for every historian operation. Errors are grouped the way
//! callers need to react to them: validation problems with the request,
//! conflicts with existing records, operations a store does not support,
//! and infrastructure failures of the underlying map engine.
//!
//! Key Features:
//! - Validation, conflict and unsupported-operation classes kept distinct
//! - Infrastructure errors for storage, corruption and serialization
//! - User vs system error classification
//! - Seamless integration with std::io::Error, bincode and toml
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Unified error type for all Aegis historian operations.
#[derive(Error, Debug)]
pub enum AegisError {
    // Validation errors
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("unknown reference: {0}")]
    UnknownReference(String),

    #[error("unique name already in use: {0}")]
    UniqueViolation(String),

    #[error("duplicate version: {0}")]
    DuplicateVersion(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // Conflict errors
    #[error("already exists: {0}")]
    AlreadyExists(String),

    // Unsupported operations
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("store is read-only: {0}")]
    ReadOnly(String),

    // Storage errors
    #[error("storage error: {0}")]
    Storage(String),

    #[error("corruption detected: {0}")]
    Corruption(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Type Aliases
// =============================================================================

/// Result type alias for Aegis operations.
pub type Result<T> = std::result::Result<T, AegisError>;

// =============================================================================
// Conversions
// =============================================================================

impl From<bincode::Error> for AegisError {
    fn from(err: bincode::Error) -> Self {
        AegisError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for AegisError {
    fn from(err: toml::de::Error) -> Self {
        AegisError::Configuration(err.to_string())
    }
}

// =============================================================================
// Error Classification
// =============================================================================

impl AegisError {
    /// Returns true if the request itself was malformed or referenced
    /// something that does not exist.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            AegisError::InvalidKey(_)
                | AegisError::UnknownReference(_)
                | AegisError::UniqueViolation(_)
                | AegisError::DuplicateVersion(_)
                | AegisError::InvalidArgument(_)
        )
    }

    /// Returns true if the request would overwrite an existing record.
    pub fn is_conflict(&self) -> bool {
        matches!(self, AegisError::AlreadyExists(_))
    }

    /// Returns true if the store refused the operation before touching
    /// any index.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, AegisError::Unsupported(_) | AegisError::ReadOnly(_))
    }

    /// Returns true if this is a user error (vs system error).
    pub fn is_user_error(&self) -> bool {
        self.is_validation_error() || self.is_conflict() || self.is_unsupported()
    }

    /// Returns true if the operation can be safely retried.
    ///
    /// Only transient IO failures qualify; a failed write has already been
    /// rolled back so retrying it is safe.
    pub fn is_retryable(&self) -> bool {
        match self {
            AegisError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(AegisError::UniqueViolation("urn:x".into()).is_validation_error());
        assert!(AegisError::UnknownReference("parent 7".into()).is_user_error());
        assert!(AegisError::AlreadyExists("k".into()).is_conflict());
        assert!(!AegisError::AlreadyExists("k".into()).is_validation_error());
        assert!(AegisError::ReadOnly("obs_store".into()).is_unsupported());
        assert!(!AegisError::Storage("boom".into()).is_user_error());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Interrupted, "signal");
        let err: AegisError = io.into();
        assert!(err.is_retryable());
        assert!(err.to_string().starts_with("IO error"));
    }
}
