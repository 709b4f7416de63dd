//! Request execution: sign, send, inspect, repair, resend.
//!
//! [`RequestExecutor::execute`] runs one logical call as a small state machine:
//!
//! ```text
//! SIGNED -> SENT -> DONE
//!             |
//!             +-- 401 + repairable --> REPAIRING -> SIGNED -> SENT ...
//!             +-- anything else -----> FAILED
//! ```
//!
//! Repairs come from the credential that signed the failing attempt and are
//! bounded per call by a [`RepairBudget`]. Repairs that replace the credential
//! (reissue, refresh) or adjust the clock write through the shared
//! [`CredentialSlot`], so later calls on the same client see them. When no
//! repair is left the call fails with the first 401 it received.
//!
//! Transport errors end the call immediately. They are never retried and never
//! interpreted as credential problems.

mod error;
mod retry;

pub use error::RequestError;
pub use retry::{
    FailureType, MAX_ANONYMOUS_RETRIES, MAX_CLOCK_CORRECTIONS, MAX_REFRESHES, MAX_REISSUES,
    RepairBudget, RepairDecision, RepairKind, classify_status, is_success,
};

use std::sync::Arc;

use reqwest::Method;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::credential::oauth::{self, OAuthToken};
use crate::credential::{Credential, CredentialSlot, RepairAction, Ticket, now_millis};
use crate::transport::{Transport, TransportRequest, TransportResponse};

/// One logical call against a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequest {
    pub method: Method,
    /// Full request path including version prefix and query string.
    pub path: String,
    /// Extra headers, applied before signing.
    pub headers: Vec<(String, String)>,
    /// JSON body. Sets `content-type: application/json` unless a content type
    /// header is already present.
    pub body: Option<Value>,
    /// Caller metadata copied onto the result untouched.
    pub meta: Map<String, Value>,
}

impl ResourceRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            meta: Map::new(),
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }
}

/// Outcome of a call that received a response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceResult {
    /// Decoded JSON body; `null` for empty or malformed bodies.
    pub data: Value,
    /// Metadata attached to the request.
    pub meta: Map<String, Value>,
    pub http_status: u16,
}

impl ResourceResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        is_success(self.http_status)
    }
}

/// Result of a single send.
#[derive(Debug)]
enum Attempt {
    Succeeded(ResourceResult),
    Failed(ResourceResult),
}

/// Executes calls for one client over a shared transport and credential.
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    credential: CredentialSlot,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}

impl RequestExecutor {
    /// Creates an executor holding an empty credential.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            credential: CredentialSlot::default(),
        }
    }

    /// The transport used for every send.
    #[must_use]
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// The credential slot shared by all calls on this executor.
    #[must_use]
    pub fn credential(&self) -> &CredentialSlot {
        &self.credential
    }

    /// Runs one logical call.
    ///
    /// With `credential_override`, the request is signed with that credential
    /// instead of the held one and no repairs are attempted.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Transport`] when no response was obtained
    /// - [`RequestError::Credential`] when signing or a reissued ticket fails
    /// - [`RequestError::Http`] with the surfaced failure after repairs
    #[instrument(skip(self, config, request, credential_override), fields(method = %request.method, path = %request.path))]
    pub async fn execute(
        &self,
        config: &ClientConfig,
        request: &ResourceRequest,
        credential_override: Option<&Credential>,
    ) -> Result<ResourceResult, RequestError> {
        let mut budget = RepairBudget::default();
        let mut anonymous = false;
        let mut root_failure: Option<ResourceResult> = None;

        loop {
            let credential = if anonymous {
                Arc::new(Credential::Empty)
            } else if let Some(credential) = credential_override {
                Arc::new(credential.clone())
            } else {
                self.credential.current()
            };

            let failure = match self.dispatch(config, request, &credential).await? {
                Attempt::Succeeded(result) => return Ok(result),
                Attempt::Failed(failure) => failure,
            };

            if anonymous {
                debug!(
                    status = failure.http_status,
                    "anonymous retry failed; surfacing original failure"
                );
                return Err(RequestError::Http(root_failure.unwrap_or(failure)));
            }

            if classify_status(failure.http_status) != FailureType::NeedsAuth {
                return Err(RequestError::Http(failure));
            }
            if root_failure.is_none() {
                root_failure = Some(failure.clone());
            }

            if credential_override.is_some() {
                debug!("explicit credential failed; not repairing");
                return Err(RequestError::Http(failure));
            }

            let candidates = credential.repair_candidates(&failure.data);
            let action = match budget.decide(&candidates) {
                RepairDecision::Repair { action, .. } => action,
                RepairDecision::DoNotRepair { reason } => {
                    debug!(kind = credential.kind(), %reason, "surfacing original auth failure");
                    return Err(RequestError::Http(root_failure.unwrap_or(failure)));
                }
            };
            budget.record(&action);

            match action {
                RepairAction::Reissue => {
                    let Credential::Ticket(pair) = &*credential else {
                        return Err(RequestError::Http(failure));
                    };
                    let reissued = self.reissue(config, &credential).await?;
                    let Some(user) = reissued else {
                        return Err(RequestError::Http(root_failure.unwrap_or(failure)));
                    };
                    info!(ticket = %user.id, "reissued expired ticket");
                    self.credential
                        .replace(Credential::Ticket(pair.with_user(user)));
                }
                RepairAction::CorrectClock { server_time_ms } => {
                    let offset_ms = server_time_ms.saturating_sub(now_millis());
                    info!(offset_ms, "correcting clock offset after stale timestamp");
                    self.credential.set_clock_offset_ms(offset_ms);
                }
                RepairAction::Refresh => {
                    let Credential::OAuth2(token) = &*credential else {
                        return Err(RequestError::Http(failure));
                    };
                    match self.refresh(config, token).await {
                        Ok(refreshed) => {
                            info!("refreshed access token");
                            self.credential.replace(Credential::OAuth2(refreshed));
                            // the retry with the refreshed token is the last one
                            budget.record(&RepairAction::DropAuthorization);
                        }
                        Err(e) => {
                            warn!(error = %e, "token refresh failed; retrying without authorization");
                            budget.record(&RepairAction::DropAuthorization);
                            anonymous = true;
                        }
                    }
                }
                RepairAction::DropAuthorization => {
                    debug!("retrying without authorization");
                    anonymous = true;
                }
            }
        }
    }

    /// Signs and sends one request, classifying the response.
    async fn dispatch(
        &self,
        config: &ClientConfig,
        request: &ResourceRequest,
        credential: &Credential,
    ) -> Result<Attempt, RequestError> {
        let mut outgoing =
            TransportRequest::new(request.method.clone(), config.endpoint(), request.path.clone());
        for (name, value) in &request.headers {
            outgoing.set_header(name, value.clone());
        }
        if let Some(body) = &request.body {
            if outgoing.header("content-type").is_none() {
                outgoing.set_header("content-type", "application/json");
            }
            outgoing.body = Some(body.to_string().into_bytes());
        }

        credential.sign(&mut outgoing, self.credential.clock_offset_ms(), now_millis())?;

        debug!(kind = credential.kind(), "sending request");
        let response = self.transport.send(outgoing).await?;
        debug!(status = response.status, bytes = response.body.len(), "received response");

        Ok(interpret(&response, &request.meta))
    }

    /// Exchanges the user ticket in `credential` for a fresh one.
    ///
    /// Returns `Ok(None)` when the server refuses the reissue.
    async fn reissue(
        &self,
        config: &ClientConfig,
        credential: &Credential,
    ) -> Result<Option<Ticket>, RequestError> {
        let request = ResourceRequest::new(Method::POST, format!("{}/oz/reissue", config.base))
            .with_header("content-type", "application/json");

        match self.dispatch(config, &request, credential).await? {
            Attempt::Succeeded(result) => Ok(Some(Ticket::from_json(&result.data)?)),
            Attempt::Failed(failure) => {
                warn!(status = failure.http_status, "ticket reissue refused");
                Ok(None)
            }
        }
    }

    /// Obtains a new access token with the token's refresh token.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Config`] when OAuth settings are missing and
    /// [`RequestError::Http`] when the token endpoint refuses.
    pub async fn refresh(
        &self,
        config: &ClientConfig,
        token: &OAuthToken,
    ) -> Result<OAuthToken, RequestError> {
        let refresh_token = token.refresh_token.as_deref().unwrap_or_default();
        let request = oauth::refresh_request(config, refresh_token)?;
        self.exchange_token(request, token.refresh_token.as_deref())
            .await
    }

    /// Exchanges an authorization code for a token.
    ///
    /// # Errors
    ///
    /// Same as [`RequestExecutor::refresh`].
    pub async fn exchange_code(
        &self,
        config: &ClientConfig,
        code: &str,
    ) -> Result<OAuthToken, RequestError> {
        let request = oauth::code_request(config, code)?;
        self.exchange_token(request, None).await
    }

    #[instrument(skip(self, request, previous_refresh), fields(url = %request.url()))]
    async fn exchange_token(
        &self,
        request: TransportRequest,
        previous_refresh: Option<&str>,
    ) -> Result<OAuthToken, RequestError> {
        let response = self.transport.send(request).await?;
        if !(200..300).contains(&response.status) {
            warn!(status = response.status, "token endpoint refused");
            return Err(RequestError::Http(
                match interpret(&response, &Map::new()) {
                    Attempt::Succeeded(result) | Attempt::Failed(result) => result,
                },
            ));
        }
        Ok(oauth::parse_token_response(
            &response,
            previous_refresh,
            now_millis(),
        )?)
    }
}

/// Decodes a response body and classifies the status.
///
/// Empty bodies decode to `null`. Bodies that are not JSON also become `null`
/// and turn the attempt into a failure whatever the status.
fn interpret(response: &TransportResponse, meta: &Map<String, Value>) -> Attempt {
    let status = response.status;
    let is_blank = response.body.iter().all(u8::is_ascii_whitespace);

    let (data, malformed) = if is_blank {
        (Value::Null, false)
    } else {
        match serde_json::from_slice::<Value>(&response.body) {
            Ok(data) => (data, false),
            Err(e) => {
                warn!(status, error = %e, "response body is not valid JSON");
                (Value::Null, true)
            }
        }
    };

    let result = ResourceResult {
        data,
        meta: meta.clone(),
        http_status: status,
    };

    if !malformed && is_success(status) {
        Attempt::Succeeded(result)
    } else {
        Attempt::Failed(result)
    }
}
