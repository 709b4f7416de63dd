//! Error types for resource path and request arguments.

use thiserror::Error;

/// Errors raised synchronously, before any request is sent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArgumentError {
    /// `get()` filters were not a list of `[field, operator, value]` triplets.
    #[error("get() filters should be array of triplets: {reason}")]
    InvalidFilters {
        /// What was wrong with the filter list.
        reason: String,
    },

    /// `meta()` was called with an unsupported argument shape.
    #[error("Invalid meta() signature: {reason}")]
    InvalidMetaSignature {
        /// What was wrong with the arguments.
        reason: String,
    },

    /// Resource path parts were malformed (misplaced or repeated flags).
    #[error("invalid resource path: {reason}")]
    InvalidPathParts {
        /// What was wrong with the parts.
        reason: String,
    },

    /// A request body could not be encoded as JSON.
    #[error("request body is not valid JSON: {reason}")]
    InvalidBody {
        /// Serializer message.
        reason: String,
    },
}

impl ArgumentError {
    /// Creates an invalid-filters error.
    pub fn invalid_filters(reason: impl Into<String>) -> Self {
        Self::InvalidFilters {
            reason: reason.into(),
        }
    }

    /// Creates an invalid meta signature error.
    pub fn invalid_meta(reason: impl Into<String>) -> Self {
        Self::InvalidMetaSignature {
            reason: reason.into(),
        }
    }

    /// Creates an invalid path parts error.
    pub fn invalid_path(reason: impl Into<String>) -> Self {
        Self::InvalidPathParts {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_error_display() {
        let msg = ArgumentError::invalid_filters("entry 0 has 2 elements").to_string();
        assert!(
            msg.contains("get() filters should be array of triplets"),
            "Expected filter message in: {msg}"
        );
        assert!(msg.contains("entry 0"), "Expected reason in: {msg}");
    }

    #[test]
    fn test_meta_error_display() {
        let msg = ArgumentError::invalid_meta("no arguments").to_string();
        assert!(msg.starts_with("Invalid meta() signature"), "got: {msg}");
    }
}
