//! Credential strategies and the per-client credential slot.
//!
//! A client holds exactly one [`Credential`] at a time. Which variant is active
//! decides how requests are signed and which repairs are possible after an
//! authentication failure:
//!
//! | Variant | Signing | Repairs |
//! |---------|---------|---------|
//! | `Empty` | none | none |
//! | `Session` | `x-zetkin-session` header | none |
//! | `Ticket` | MAC `Authorization: Hawk ...` header | reissue, clock correction |
//! | `OAuth2` | bearer header or `access_token` query | refresh, anonymous retry |
//!
//! The credential is shared by every in-flight call on the client through a
//! [`CredentialSlot`]. Replacement swaps the whole credential at once; readers
//! keep the `Arc` they loaded, so a request is never signed with half of one
//! credential and half of another.

mod error;
pub mod hawk;
pub mod oauth;
mod ticket;

pub use error::CredentialError;
pub use oauth::{OAuthToken, TokenType};
pub use ticket::{DEFAULT_ALGORITHM, Ticket, TicketPair};

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::{debug, warn};

use crate::transport::TransportRequest;

/// Header carrying a session token.
pub const SESSION_HEADER: &str = "x-zetkin-session";

/// Error message servers use when a MAC timestamp is outside the allowed skew.
pub const STALE_TIMESTAMP_MESSAGE: &str = "Stale timestamp";

/// An opaque session token issued by the session endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// The way a client proves its identity.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Credential {
    /// No credential. Requests go out unsigned.
    #[default]
    Empty,
    /// Session token sent in [`SESSION_HEADER`].
    Session(SessionToken),
    /// Application and user tickets; requests are MAC-signed with the user ticket.
    Ticket(TicketPair),
    /// OAuth2 access token.
    OAuth2(OAuthToken),
}

/// A repair the executor may perform after an authentication failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairAction {
    /// Exchange the expired user ticket for a fresh one.
    Reissue,
    /// Adopt the server's clock and sign again.
    CorrectClock {
        /// Server time in milliseconds since the epoch.
        server_time_ms: i64,
    },
    /// Obtain a new access token with the refresh token.
    Refresh,
    /// Retry the request once without any authorization.
    DropAuthorization,
}

impl Credential {
    /// Short variant name for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Session(_) => "session",
            Self::Ticket(_) => "ticket",
            Self::OAuth2(_) => "oauth2",
        }
    }

    /// Returns true unless the credential is [`Credential::Empty`].
    #[must_use]
    pub fn is_present(&self) -> bool {
        !matches!(self, Self::Empty)
    }

    /// Attaches proof of identity to `request`.
    ///
    /// `clock_offset_ms` is added to `now_ms` before computing MAC timestamps.
    ///
    /// # Errors
    ///
    /// Returns a [`CredentialError`] when the ticket algorithm or token type
    /// cannot be used for signing.
    pub fn sign(
        &self,
        request: &mut TransportRequest,
        clock_offset_ms: i64,
        now_ms: i64,
    ) -> Result<(), CredentialError> {
        match self {
            Self::Empty => Ok(()),
            Self::Session(token) => {
                request.set_header(SESSION_HEADER, token.as_str());
                Ok(())
            }
            Self::Ticket(pair) => {
                sign_with_ticket(pair.active(), request, clock_offset_ms, now_ms)
            }
            Self::OAuth2(token) => token.sign(request),
        }
    }

    /// Lists the repairs that could fix a 401 with body `data`, most
    /// preferred first. The executor takes the first one its budget allows.
    #[must_use]
    pub fn repair_candidates(&self, data: &Value) -> Vec<RepairAction> {
        match self {
            Self::Empty | Self::Session(_) => Vec::new(),
            Self::Ticket(pair) => ticket_repairs(pair.active(), data),
            Self::OAuth2(token) => {
                let mut candidates = Vec::with_capacity(2);
                if token.can_refresh() && is_invalid_token_error(data) {
                    candidates.push(RepairAction::Refresh);
                }
                candidates.push(RepairAction::DropAuthorization);
                candidates
            }
        }
    }
}

/// Signs `request` with a single ticket.
///
/// # Errors
///
/// Propagates MAC errors from [`hawk::header`].
pub fn sign_with_ticket(
    ticket: &Ticket,
    request: &mut TransportRequest,
    clock_offset_ms: i64,
    now_ms: i64,
) -> Result<(), CredentialError> {
    let nonce = hawk::generate_nonce();
    let artifacts = hawk::Artifacts {
        ts: now_ms.saturating_add(clock_offset_ms).div_euclid(1000),
        nonce: &nonce,
        method: request.method.as_str(),
        resource: &request.path,
        host: &request.endpoint.host,
        port: request.endpoint.port,
        hash: None,
        ext: None,
        app: ticket.app.as_deref(),
        dlg: ticket.dlg.as_deref(),
    };
    let header = hawk::header(ticket, &artifacts)?;
    request.set_header("authorization", header);
    Ok(())
}

fn ticket_repairs(ticket: &Ticket, data: &Value) -> Vec<RepairAction> {
    if data.get("expired").and_then(Value::as_bool) == Some(true) {
        return vec![RepairAction::Reissue];
    }

    if data.get("message").and_then(Value::as_str) != Some(STALE_TIMESTAMP_MESSAGE) {
        return Vec::new();
    }

    let attributes = data.get("attributes");
    let Some(ts) = attributes.and_then(|a| a.get("ts")).and_then(json_i64) else {
        debug!("stale timestamp response without server time");
        return Vec::new();
    };

    if let Some(tsm) = attributes.and_then(|a| a.get("tsm")).and_then(Value::as_str)
        && !hawk::verify_timestamp(ticket, ts, tsm)
    {
        warn!(ts, "server timestamp MAC did not verify; not adjusting clock");
        return Vec::new();
    }

    vec![RepairAction::CorrectClock {
        server_time_ms: ts.saturating_mul(1000),
    }]
}

/// Reads an integer that may arrive as a JSON number or numeric string.
fn json_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn is_invalid_token_error(data: &Value) -> bool {
    data.get("error")
        .and_then(Value::as_str)
        .is_some_and(|error| oauth::INVALID_TOKEN_ERRORS.contains(&error))
}

/// Shared holder for a client's credential and clock offset.
#[derive(Debug, Default)]
pub struct CredentialSlot {
    current: RwLock<Arc<Credential>>,
    clock_offset_ms: AtomicI64,
}

impl CredentialSlot {
    #[must_use]
    pub fn new(credential: Credential) -> Self {
        Self {
            current: RwLock::new(Arc::new(credential)),
            clock_offset_ms: AtomicI64::new(0),
        }
    }

    /// Returns the credential in effect right now.
    #[must_use]
    pub fn current(&self) -> Arc<Credential> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replaces the credential, returning the previous one. Last writer wins.
    pub fn replace(&self, credential: Credential) -> Arc<Credential> {
        debug!(kind = credential.kind(), "replacing credential");
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(credential))
    }

    /// Milliseconds added to the local clock when computing MAC timestamps.
    #[must_use]
    pub fn clock_offset_ms(&self) -> i64 {
        self.clock_offset_ms.load(Ordering::Relaxed)
    }

    pub fn set_clock_offset_ms(&self, offset_ms: i64) {
        self.clock_offset_ms.store(offset_ms, Ordering::Relaxed);
    }
}

/// Current wall-clock time in milliseconds since the epoch.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use reqwest::Method;
    use serde_json::json;

    use super::*;
    use crate::transport::Endpoint;

    fn request() -> TransportRequest {
        TransportRequest::new(
            Method::GET,
            Endpoint::new(true, "api.zetk.in", 443),
            "/v1/orgs/1/people",
        )
    }

    fn user_ticket() -> Ticket {
        Ticket::app_credentials("user-ticket", "user-key")
    }

    fn ticket_credential() -> Credential {
        Credential::Ticket(TicketPair::single(user_ticket()))
    }

    fn refreshable_token() -> Credential {
        Credential::OAuth2(OAuthToken {
            refresh_token: Some("r1".to_string()),
            ..OAuthToken::bearer("a1")
        })
    }

    // ==================== Signing ====================

    #[test]
    fn test_empty_sign_is_noop() {
        let mut req = request();
        Credential::Empty.sign(&mut req, 0, 0).unwrap();
        assert!(req.headers.is_empty());
        assert!(!Credential::Empty.is_present());
    }

    #[test]
    fn test_session_sign_sets_header() {
        let mut req = request();
        Credential::Session(SessionToken::new("tok"))
            .sign(&mut req, 0, 0)
            .unwrap();
        assert_eq!(req.header(SESSION_HEADER), Some("tok"));
        assert!(req.header("authorization").is_none());
    }

    #[test]
    fn test_ticket_sign_applies_clock_offset() {
        let mut req = request();
        ticket_credential()
            .sign(&mut req, 5_000, 1_700_000_000_000)
            .unwrap();

        let header = req.header("authorization").unwrap();
        assert!(header.starts_with("Hawk id=\"user-ticket\""), "got: {header}");
        assert!(header.contains("ts=\"1700000005\""), "got: {header}");
    }

    #[test]
    fn test_ticket_sign_mac_covers_request() {
        let ticket = user_ticket();
        let mut req = request();
        sign_with_ticket(&ticket, &mut req, 0, 1_700_000_000_000).unwrap();
        let header = req.header("authorization").unwrap().to_string();

        let nonce = header
            .split("nonce=\"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap();
        let expected = hawk::header(
            &ticket,
            &hawk::Artifacts {
                ts: 1_700_000_000,
                nonce,
                method: "GET",
                resource: "/v1/orgs/1/people",
                host: "api.zetk.in",
                port: 443,
                hash: None,
                ext: None,
                app: None,
                dlg: None,
            },
        )
        .unwrap();

        assert_eq!(header, expected);
    }

    #[test]
    fn test_oauth_sign_sets_bearer() {
        let mut req = request();
        refreshable_token().sign(&mut req, 0, 0).unwrap();
        assert_eq!(req.header("authorization"), Some("Bearer a1"));
    }

    #[test]
    fn test_session_token_debug_redacted() {
        let debug = format!("{:?}", SessionToken::new("secret-session"));
        assert!(!debug.contains("secret-session"));
    }

    // ==================== Repair Candidates ====================

    #[test]
    fn test_empty_and_session_never_repair() {
        let data = json!({ "expired": true });
        assert!(Credential::Empty.repair_candidates(&data).is_empty());
        assert!(
            Credential::Session(SessionToken::new("tok"))
                .repair_candidates(&data)
                .is_empty()
        );
    }

    #[test]
    fn test_expired_ticket_reissues() {
        let candidates = ticket_credential().repair_candidates(&json!({ "expired": true }));
        assert_eq!(candidates, vec![RepairAction::Reissue]);
    }

    #[test]
    fn test_stale_timestamp_with_valid_tsm_corrects_clock() {
        let ticket = user_ticket();
        let tsm = hawk::timestamp_mac(&ticket, 1_700_000_100).unwrap();
        let data = json!({
            "message": "Stale timestamp",
            "attributes": { "ts": "1700000100", "tsm": tsm },
        });

        assert_eq!(
            ticket_credential().repair_candidates(&data),
            vec![RepairAction::CorrectClock {
                server_time_ms: 1_700_000_100_000
            }]
        );
    }

    #[test]
    fn test_stale_timestamp_with_forged_tsm_is_not_repaired() {
        let data = json!({
            "message": "Stale timestamp",
            "attributes": { "ts": 1_700_000_100, "tsm": "Zm9yZ2Vk" },
        });
        assert!(ticket_credential().repair_candidates(&data).is_empty());
    }

    #[test]
    fn test_other_ticket_failures_are_not_repaired() {
        let data = json!({ "message": "Bad mac" });
        assert!(ticket_credential().repair_candidates(&data).is_empty());
    }

    #[test]
    fn test_oauth_invalid_token_refreshes_then_drops() {
        let data = json!({ "error": "invalid_token" });
        assert_eq!(
            refreshable_token().repair_candidates(&data),
            vec![RepairAction::Refresh, RepairAction::DropAuthorization]
        );
    }

    #[test]
    fn test_oauth_without_refresh_only_drops() {
        let data = json!({ "error": "invalid_token" });
        let token = Credential::OAuth2(OAuthToken::bearer("a1"));
        assert_eq!(
            token.repair_candidates(&data),
            vec![RepairAction::DropAuthorization]
        );

        let other = json!({ "error": "insufficient_scope" });
        assert_eq!(
            refreshable_token().repair_candidates(&other),
            vec![RepairAction::DropAuthorization]
        );
    }

    // ==================== Slot ====================

    #[test]
    fn test_slot_replace_is_wholesale() {
        let slot = CredentialSlot::default();
        assert_eq!(*slot.current(), Credential::Empty);

        let held = slot.current();
        let previous = slot.replace(ticket_credential());

        assert_eq!(*previous, Credential::Empty);
        assert_eq!(*held, Credential::Empty, "loaded credential is unaffected");
        assert_eq!(slot.current().kind(), "ticket");
    }

    #[test]
    fn test_slot_clock_offset() {
        let slot = CredentialSlot::new(Credential::Empty);
        assert_eq!(slot.clock_offset_ms(), 0);
        slot.set_clock_offset_ms(-2_500);
        assert_eq!(slot.clock_offset_ms(), -2_500);
    }

    #[test]
    fn test_now_millis_is_recent() {
        assert!(now_millis() > 1_600_000_000_000);
    }
}
