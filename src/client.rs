//! Client instances: configuration, credentials and resource access.
//!
//! A [`Client`] is a cheap handle; clones share the same configuration,
//! credential and transport. Independent instances are made with
//! [`Client::construct`], which copies the configuration, applies overrides and
//! starts with an empty credential. Only the transport is shared between
//! constructed instances.
//!
//! # Example
//!
//! ```no_run
//! use zetkin_client::{Client, ConfigOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let prototype = Client::new()?;
//! let client = prototype.construct(Some(ConfigOptions::new().host("api.dev.zetkin.org")));
//!
//! client.set_session_token("session-token");
//! let me = client.resource(&["users".into(), "me".into()])?.get(None, None, None).await?;
//! println!("{}", me.data);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::Method;
use serde_json::{Value, json};
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::{ClientConfig, ConfigError, ConfigOptions};
use crate::credential::oauth;
use crate::credential::{
    Credential, CredentialError, OAuthToken, SessionToken, Ticket, TicketPair, now_millis,
};
use crate::executor::{RequestError, RequestExecutor, ResourceRequest, ResourceResult};
use crate::resource::{ArgumentError, PathPart, ResourceProxy, build_path};
use crate::transport::{HttpTransport, Transport, TransportError};

struct ClientInner {
    config: RwLock<ClientConfig>,
    executor: RequestExecutor,
}

/// Handle to one client instance.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config())
            .field("credential", &self.credential().kind())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client with default configuration over [`HttpTransport`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Build`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, TransportError> {
        Ok(Self::with_transport(Arc::new(HttpTransport::new()?)))
    }

    /// Creates a client with default configuration over `transport`.
    #[must_use]
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(ClientConfig::default(), transport)
    }

    /// Creates a client with `config` over `transport`.
    #[must_use]
    pub fn with_config(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config: RwLock::new(config),
                executor: RequestExecutor::new(transport),
            }),
        }
    }

    /// Creates an independent instance from this one.
    ///
    /// The new instance gets a copy of this configuration with `overrides`
    /// applied and an empty credential.
    #[must_use]
    pub fn construct(&self, overrides: Option<ConfigOptions>) -> Self {
        let mut config = self.config();
        if let Some(overrides) = overrides {
            config.configure(overrides);
        }
        Self::with_config(config, self.inner.executor.transport())
    }

    /// Like [`Client::construct`] with a dynamic override object.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when `overrides` is present but invalid.
    pub fn construct_json(&self, overrides: Option<&Value>) -> Result<Self, ConfigError> {
        let overrides = match overrides {
            None | Some(Value::Null) => None,
            Some(value) => Some(ConfigOptions::from_json(Some(value))?),
        };
        Ok(self.construct(overrides))
    }

    // ==================== Configuration ====================

    /// Returns a copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> ClientConfig {
        self.inner
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies a typed configuration update.
    pub fn configure(&self, options: ConfigOptions) {
        self.inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .configure(options);
    }

    /// Validates and applies a dynamic configuration object.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::configure_json`]. The configuration is unchanged on
    /// error.
    pub fn configure_json(&self, options: Option<&Value>) -> Result<(), ConfigError> {
        self.inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .configure_json(options)
    }

    // ==================== Resources ====================

    /// Returns a proxy for the resource at `parts`.
    ///
    /// # Errors
    ///
    /// Returns [`ArgumentError::InvalidPathParts`] for misplaced or repeated
    /// flags.
    pub fn resource(&self, parts: &[PathPart]) -> Result<ResourceProxy, ArgumentError> {
        let path = build_path(&self.config(), parts)?;
        Ok(ResourceProxy::new(self.clone(), path))
    }

    /// Like [`Client::resource`] with dynamic path arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ArgumentError::InvalidPathParts`] for unsupported values.
    pub fn resource_json(&self, parts: &[Value]) -> Result<ResourceProxy, ArgumentError> {
        let parts = parts
            .iter()
            .map(PathPart::from_json)
            .collect::<Result<Vec<_>, _>>()?;
        self.resource(&parts)
    }

    /// Executes a request with the held credential, repairing it if needed.
    ///
    /// # Errors
    ///
    /// See [`RequestExecutor::execute`].
    pub async fn execute(&self, request: &ResourceRequest) -> Result<ResourceResult, RequestError> {
        let config = self.config();
        self.inner.executor.execute(&config, request, None).await
    }

    /// Executes a request signed with `credential` instead of the held one.
    ///
    /// No repairs are attempted and the held credential is not touched.
    ///
    /// # Errors
    ///
    /// See [`RequestExecutor::execute`].
    pub async fn execute_with(
        &self,
        request: &ResourceRequest,
        credential: &Credential,
    ) -> Result<ResourceResult, RequestError> {
        let config = self.config();
        self.inner
            .executor
            .execute(&config, request, Some(credential))
            .await
    }

    // ==================== Credentials ====================

    /// Returns the credential in effect.
    #[must_use]
    pub fn credential(&self) -> Arc<Credential> {
        self.inner.executor.credential().current()
    }

    /// Replaces the credential wholesale.
    pub fn set_credential(&self, credential: Credential) {
        self.inner.executor.credential().replace(credential);
    }

    /// Drops any credential; later requests go out unsigned.
    pub fn clear_credential(&self) {
        self.set_credential(Credential::Empty);
    }

    pub fn set_session_token(&self, token: impl Into<String>) {
        self.set_credential(Credential::Session(SessionToken::new(token)));
    }

    /// Logs in with a username and password and keeps the session token.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Http`] when the login is refused and
    /// [`CredentialError::MissingSessionToken`] when the response has no token.
    #[instrument(skip(self, password))]
    pub async fn authenticate_session(
        &self,
        username: &str,
        password: &str,
    ) -> Result<SessionToken, RequestError> {
        let config = self.config();
        let basic = STANDARD.encode(format!("{username}:{password}"));
        let request = ResourceRequest::new(Method::POST, format!("{}/session", config.base))
            .with_header("authorization", format!("Basic {basic}"));

        let result = self
            .inner
            .executor
            .execute(&config, &request, Some(&Credential::Empty))
            .await?;

        let token = result
            .data
            .get("token")
            .or_else(|| result.data.get("data").and_then(|data| data.get("token")))
            .and_then(Value::as_str)
            .ok_or(CredentialError::MissingSessionToken)?;

        let session = SessionToken::new(token);
        info!("session established");
        self.set_credential(Credential::Session(session.clone()));
        Ok(session)
    }

    /// Runs the ticket handshake and keeps the resulting ticket pair.
    ///
    /// The application credentials sign a request for an application ticket,
    /// which in turn signs the exchange of `rsvp` for a user ticket.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Http`] when either step is refused and
    /// [`RequestError::Credential`] when a returned ticket cannot be decoded.
    #[instrument(skip(self, app_key, rsvp))]
    pub async fn init(
        &self,
        app_id: &str,
        app_key: &str,
        rsvp: &str,
    ) -> Result<Ticket, RequestError> {
        let config = self.config();
        let app_credentials =
            Credential::Ticket(TicketPair::single(Ticket::app_credentials(app_id, app_key)));

        let app_request = ResourceRequest::new(Method::POST, format!("{}/oz/app", config.base))
            .with_header("content-type", "application/json");
        let app_result = self
            .inner
            .executor
            .execute(&config, &app_request, Some(&app_credentials))
            .await?;
        let app_ticket = Ticket::from_json(&app_result.data)?;
        debug!(ticket = %app_ticket.id, "received application ticket");

        let rsvp_request = ResourceRequest::new(Method::POST, format!("{}/oz/rsvp", config.base))
            .with_body(json!({ "rsvp": rsvp }));
        let rsvp_result = self
            .inner
            .executor
            .execute(
                &config,
                &rsvp_request,
                Some(&Credential::Ticket(TicketPair::single(app_ticket.clone()))),
            )
            .await?;
        let user_ticket = Ticket::from_json(&rsvp_result.data)?;

        info!(ticket = %user_ticket.id, "ticket handshake complete");
        self.set_credential(Credential::Ticket(TicketPair::new(
            app_ticket,
            user_ticket.clone(),
        )));
        Ok(user_ticket)
    }

    /// Returns the user ticket when a ticket credential is held.
    #[must_use]
    pub fn ticket(&self) -> Option<Ticket> {
        match &*self.credential() {
            Credential::Ticket(pair) => Some(pair.active().clone()),
            _ => None,
        }
    }

    /// Installs a ticket obtained elsewhere.
    pub fn set_ticket(&self, ticket: Ticket) {
        self.set_credential(Credential::Ticket(TicketPair::single(ticket)));
    }

    /// Installs an encoded OAuth token.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotConfigured`] without a client id and
    /// [`CredentialError::InvalidToken`] for undecodable input.
    pub fn set_token(&self, encoded: &str) -> Result<(), RequestError> {
        self.config().require_client_id("set_token")?;
        let token = OAuthToken::decode(encoded)?;
        self.set_credential(Credential::OAuth2(token));
        Ok(())
    }

    /// Returns the encoded OAuth token, if one is held.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotConfigured`] without a client id.
    pub fn token(&self) -> Result<Option<String>, ConfigError> {
        self.config().require_client_id("token")?;
        Ok(self.oauth_token().map(|token| token.encode()))
    }

    /// Returns the OAuth token as a JSON object, if one is held.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotConfigured`] without a client id.
    pub fn token_data(&self) -> Result<Option<Value>, ConfigError> {
        self.config().require_client_id("token_data")?;
        Ok(self.oauth_token().map(|token| token.to_json()))
    }

    /// Installs an OAuth token from its JSON object form.
    ///
    /// # Errors
    ///
    /// Same as [`Client::set_token`].
    pub fn set_token_data(&self, data: &Value) -> Result<(), RequestError> {
        self.config().require_client_id("set_token_data")?;
        let token = OAuthToken::from_json(data)?;
        self.set_credential(Credential::OAuth2(token));
        Ok(())
    }

    /// Installs a bare bearer access token without refresh capability.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotConfigured`] without a client id.
    pub fn set_access_token(&self, access_token: impl Into<String>) -> Result<(), ConfigError> {
        self.config().require_client_id("set_access_token")?;
        self.set_credential(Credential::OAuth2(OAuthToken::bearer(access_token)));
        Ok(())
    }

    /// Completes an OAuth redirect and keeps the resulting token.
    ///
    /// With a client secret configured the redirect is expected to carry an
    /// authorization code, which is exchanged at the token endpoint. Without
    /// one the token is read from the URL fragment.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::NotConfigured`] without a client id
    /// - [`CredentialError::InvalidRedirectUrl`] for unusable URLs
    /// - [`RequestError::Http`] when the code exchange is refused
    #[instrument(skip(self, redirect_url))]
    pub async fn authenticate(&self, redirect_url: &str) -> Result<OAuthToken, RequestError> {
        let config = self.config();
        config.require_client_id("authenticate")?;

        let url = Url::parse(redirect_url)
            .map_err(|e| CredentialError::invalid_redirect_url(redirect_url, e.to_string()))?;

        let token = if config.client_secret.is_some() {
            let code = oauth::authorization_code(&url)?;
            debug!("exchanging authorization code");
            self.inner.executor.exchange_code(&config, &code).await?
        } else {
            OAuthToken::from_fragment(&url, now_millis())?
        };

        info!(token_type = ?token.token_type, "oauth token obtained");
        self.set_credential(Credential::OAuth2(token.clone()));
        Ok(token)
    }

    fn oauth_token(&self) -> Option<OAuthToken> {
        match &*self.credential() {
            Credential::OAuth2(token) => Some(token.clone()),
            _ => None,
        }
    }
}
