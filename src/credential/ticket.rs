//! Ticket records issued by the API's ticket endpoints.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::CredentialError;

/// Default MAC algorithm when a ticket does not name one.
pub const DEFAULT_ALGORITHM: &str = "sha256";

/// A signing credential: a public id plus a secret key.
///
/// Application credentials are represented as a ticket with only `id`, `key`
/// and `algorithm` set. Fields the client does not interpret (scope, grant,
/// user) are kept in `extra` so a ticket can be handed back unchanged.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub key: String,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// Expiry in milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Application the ticket was issued to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    /// Delegating application, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlg: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_algorithm() -> String {
    DEFAULT_ALGORITHM.to_string()
}

// Manual Debug so the key never ends up in logs.
impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("id", &self.id)
            .field("key", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("exp", &self.exp)
            .field("app", &self.app)
            .field("dlg", &self.dlg)
            .finish_non_exhaustive()
    }
}

impl Ticket {
    /// Creates application credentials from an id and key.
    #[must_use]
    pub fn app_credentials(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            algorithm: default_algorithm(),
            exp: None,
            app: None,
            dlg: None,
            extra: Map::new(),
        }
    }

    /// Decodes a ticket from a response payload.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::InvalidTicket`] when required fields are
    /// missing or have the wrong type.
    pub fn from_json(value: &Value) -> Result<Self, CredentialError> {
        let ticket: Self = serde_json::from_value(value.clone())
            .map_err(|e| CredentialError::invalid_ticket(e.to_string()))?;
        if ticket.id.is_empty() || ticket.key.is_empty() {
            return Err(CredentialError::invalid_ticket("empty id or key"));
        }
        Ok(ticket)
    }
}

/// Application ticket plus the user ticket it was used to obtain.
///
/// Requests are signed with the user ticket. The application ticket is kept
/// so the user ticket can be reissued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketPair {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<Ticket>,
    pub user: Ticket,
}

impl TicketPair {
    #[must_use]
    pub fn new(app: Ticket, user: Ticket) -> Self {
        Self {
            app: Some(app),
            user,
        }
    }

    /// A pair with only a user ticket, as installed by `set_ticket`.
    #[must_use]
    pub fn single(user: Ticket) -> Self {
        Self { app: None, user }
    }

    /// The ticket requests are signed with.
    #[must_use]
    pub fn active(&self) -> &Ticket {
        &self.user
    }

    /// Returns a copy with the user ticket replaced.
    #[must_use]
    pub fn with_user(&self, user: Ticket) -> Self {
        Self {
            app: self.app.clone(),
            user,
        }
    }
}
