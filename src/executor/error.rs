//! Error type for executed requests.

use thiserror::Error;

use super::ResourceResult;
use crate::config::ConfigError;
use crate::credential::CredentialError;
use crate::resource::ArgumentError;
use crate::transport::TransportError;

/// Errors surfaced by a logical call.
///
/// Configuration and argument errors are raised before anything is sent.
/// Transport errors are passed through unchanged and never retried. HTTP
/// failures carry the full result so callers see the body, metadata and
/// status of the failing response.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Argument(#[from] ArgumentError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// The server answered with a failing status, after any repairs.
    #[error("request failed with HTTP {}", .0.http_status)]
    Http(ResourceResult),
}

impl RequestError {
    /// Returns the failed result for HTTP failures.
    #[must_use]
    pub fn result(&self) -> Option<&ResourceResult> {
        match self {
            Self::Http(result) => Some(result),
            _ => None,
        }
    }

    /// Returns the HTTP status for HTTP failures.
    #[must_use]
    pub fn http_status(&self) -> Option<u16> {
        self.result().map(|result| result.http_status)
    }

    /// Returns true when no response was obtained.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
