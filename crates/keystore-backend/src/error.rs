//! Store error types.
//!
//! Every backend translates its own failure signals into [`StoreError`] at a
//! single boundary, so no driver-specific error type ever crosses the
//! [`KeyStore`](crate::KeyStore) interface. Each variant carries enough
//! context to diagnose the problem without a debugger. Secret values are
//! never part of an error message.

/// Errors that can occur during key store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database connection could not be established or torn down, or the
    /// connection configuration is malformed.
    #[error("connection to '{target}' failed: {reason}")]
    Connection { target: String, reason: String },

    /// The liveness probe did not succeed in time, or the store is closed.
    #[error("key store unavailable: {reason}")]
    Unavailable { reason: String },

    /// A create targeted a name that is already occupied.
    #[error("key '{name}' already exists")]
    KeyExists { name: String },

    /// A get or delete targeted a name that is not present.
    #[error("key '{name}' does not exist")]
    KeyNotFound { name: String },

    /// Any other backend failure: network fault, malformed query, cursor or
    /// decode error.
    #[error("failed to {operation} '{key}': {reason}")]
    Io {
        operation: &'static str,
        key: String,
        reason: String,
    },

    /// The caller's deadline or cancellation fired mid-operation.
    #[error("operation cancelled: {reason}")]
    Cancelled { reason: String },

    /// The supplied key name is not acceptable.
    #[error("invalid key name: {reason}")]
    InvalidKey { reason: String },
}

/// Fieldless classification of a [`StoreError`].
///
/// Upstream services map these to their own status codes (conflict,
/// not-found, unavailable, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    Unavailable,
    KeyExists,
    KeyNotFound,
    Io,
    Cancelled,
    InvalidKey,
}

impl StoreError {
    /// Return the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::KeyExists { .. } => ErrorKind::KeyExists,
            Self::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            Self::Io { .. } => ErrorKind::Io,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::InvalidKey { .. } => ErrorKind::InvalidKey,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound { .. })
    }

    pub fn is_key_exists(&self) -> bool {
        matches!(self, Self::KeyExists { .. })
    }

    pub(crate) fn closed() -> Self {
        Self::Unavailable {
            reason: "key store is closed".to_owned(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let err = StoreError::KeyNotFound {
            name: "my-key".to_owned(),
        };
        assert_eq!(err.kind(), ErrorKind::KeyNotFound);
        assert!(err.is_not_found());
        assert!(!err.is_key_exists());
    }

    #[test]
    fn io_message_names_operation_and_key() {
        let err = StoreError::Io {
            operation: "read",
            key: "tenant/a".to_owned(),
            reason: "socket closed".to_owned(),
        };
        assert_eq!(err.to_string(), "failed to read 'tenant/a': socket closed");
    }
}
