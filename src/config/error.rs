//! Error types for client configuration.

use thiserror::Error;

/// Errors raised while validating or applying client configuration.
///
/// Configuration errors are synchronous and never retried. A failed
/// `configure` call leaves the existing configuration untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `configure` was called without an options object.
    #[error("options may not be undefined")]
    MissingOptions,

    /// Options were supplied but are not a key/value object.
    #[error("options must be an object, got {kind}")]
    InvalidOptions {
        /// JSON kind of the rejected value.
        kind: &'static str,
    },

    /// A key in the options object is not a recognized configuration field.
    #[error("unknown config option: {key}")]
    UnknownOption {
        /// The unrecognized key.
        key: String,
    },

    /// A recognized key carried a value of the wrong type.
    #[error("invalid config value: {message}")]
    InvalidValue {
        /// Deserializer message naming the offending field.
        message: String,
    },

    /// An operation needs OAuth client settings that were never configured.
    #[error("client is not configured for {operation}: missing `{field}`")]
    NotConfigured {
        /// The operation that was attempted.
        operation: &'static str,
        /// The missing configuration field.
        field: &'static str,
    },

    /// An endpoint template expanded into something that is not a usable URL.
    #[error("invalid endpoint URL {url}: {reason}")]
    InvalidEndpoint {
        /// The expanded URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an unknown-option error.
    pub fn unknown_option(key: impl Into<String>) -> Self {
        Self::UnknownOption { key: key.into() }
    }

    /// Creates an invalid-value error.
    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue {
            message: message.into(),
        }
    }

    /// Creates a not-configured error for an OAuth operation.
    pub fn not_configured(operation: &'static str, field: &'static str) -> Self {
        Self::NotConfigured { operation, field }
    }

    /// Creates an invalid-endpoint error.
    pub fn invalid_endpoint(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }
}
