//! Error types for credential handling.

use thiserror::Error;

/// Errors raised while signing requests or decoding credentials.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// The ticket names a MAC algorithm this client cannot compute.
    #[error("unsupported MAC algorithm: {algorithm}")]
    UnsupportedAlgorithm {
        /// The algorithm identifier from the ticket.
        algorithm: String,
    },

    /// The ticket key cannot be used as MAC key material.
    #[error("invalid key material for ticket {id}")]
    InvalidKey {
        /// Ticket id (never the key itself).
        id: String,
    },

    /// A ticket returned by the server could not be decoded.
    #[error("invalid ticket: {reason}")]
    InvalidTicket {
        /// What was wrong with the ticket payload.
        reason: String,
    },

    /// The OAuth token type has no signing rule.
    #[error("unsupported token type: {token_type}")]
    UnsupportedTokenType {
        /// The token type string.
        token_type: String,
    },

    /// An encoded OAuth token could not be decoded.
    #[error("invalid token: {reason}")]
    InvalidToken {
        /// What was wrong with the encoded token.
        reason: String,
    },

    /// The token endpoint answered with something that is not a token.
    #[error("malformed token response: {reason}")]
    MalformedTokenResponse {
        /// What was missing or malformed.
        reason: String,
    },

    /// The redirect URL handed to `authenticate` is unusable.
    #[error("invalid redirect URL {url}: {reason}")]
    InvalidRedirectUrl {
        /// The URL as supplied.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A session login succeeded but the response carried no token.
    #[error("session response did not contain a token")]
    MissingSessionToken,
}

impl CredentialError {
    /// Creates an invalid-ticket error.
    pub fn invalid_ticket(reason: impl Into<String>) -> Self {
        Self::InvalidTicket {
            reason: reason.into(),
        }
    }

    /// Creates an invalid-token error.
    pub fn invalid_token(reason: impl Into<String>) -> Self {
        Self::InvalidToken {
            reason: reason.into(),
        }
    }

    /// Creates a malformed token response error.
    pub fn malformed_token_response(reason: impl Into<String>) -> Self {
        Self::MalformedTokenResponse {
            reason: reason.into(),
        }
    }

    /// Creates an invalid redirect URL error.
    pub fn invalid_redirect_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRedirectUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}
