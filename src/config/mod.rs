//! Client configuration record and validation.
//!
//! [`ClientConfig`] holds the connection settings (host, port, TLS flag, base
//! path, API version) and the OAuth settings used by token exchange. Every
//! client instance owns its own copy; constructing a client from another one
//! clones the record, so two instances never share configuration.
//!
//! Updates go through [`ConfigOptions`], a partial record whose fields are
//! exactly the recognized option keys. Dynamic option objects (for example
//! decoded from a JSON settings file) are validated by
//! [`ClientConfig::configure_json`] before any field is touched.
//!
//! # Example
//!
//! ```
//! use zetkin_client::{ClientConfig, ConfigOptions};
//!
//! let mut config = ClientConfig::default();
//! config.configure(ConfigOptions::new().host("api.dev.zetkin.org").ssl(false));
//!
//! assert_eq!(config.host, "api.dev.zetkin.org");
//! assert_eq!(config.effective_port(), 80);
//! ```

mod error;

pub use error::ConfigError;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::transport::Endpoint;

/// Default API host.
pub const DEFAULT_HOST: &str = "api.zetk.in";

/// Default platform domain used when expanding endpoint templates.
pub const DEFAULT_DOMAIN: &str = "zetk.in";

/// Default API version rendered as `/v1` in resource paths.
pub const DEFAULT_VERSION: u32 = 1;

/// Default OAuth token endpoint template.
pub const DEFAULT_ACCESS_TOKEN_URI: &str = "{protocol}://api.{domain}/oauth/token/";

/// Default OAuth authorization endpoint template.
pub const DEFAULT_AUTHORIZATION_URI: &str = "{protocol}://api.{domain}/oauth/authorize/";

/// Keys accepted by [`ClientConfig::configure_json`].
pub const RECOGNIZED_KEYS: [&str; 12] = [
    "base",
    "version",
    "ssl",
    "host",
    "port",
    "client_id",
    "client_secret",
    "redirect_uri",
    "authorization_uri",
    "access_token_uri",
    "scopes",
    "domain",
];

/// Connection and credential settings for one client instance.
///
/// # Default Values
///
/// - `base`: `""`
/// - `version`: 1
/// - `ssl`: true
/// - `host`: `api.zetk.in`
/// - `port`: derived from `ssl` (443 or 80)
/// - `domain`: `zetk.in`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Path prefix prepended to every request path.
    pub base: String,
    /// API version, rendered as `/v<version>`.
    pub version: u32,
    /// Use an encrypted channel.
    pub ssl: bool,
    /// API host name.
    pub host: String,
    /// Explicit port; `None` uses the scheme default.
    pub port: Option<u16>,
    /// OAuth client id.
    pub client_id: Option<String>,
    /// OAuth client secret. Enables the authorization-code flow.
    pub client_secret: Option<String>,
    /// OAuth redirect URI registered for the client.
    pub redirect_uri: Option<String>,
    /// Authorization endpoint template (`{protocol}`, `{domain}` placeholders).
    pub authorization_uri: String,
    /// Token endpoint template (`{protocol}`, `{domain}` placeholders).
    pub access_token_uri: String,
    /// OAuth scopes requested during token exchange.
    pub scopes: Vec<String>,
    /// Platform domain substituted into endpoint templates.
    pub domain: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base: String::new(),
            version: DEFAULT_VERSION,
            ssl: true,
            host: DEFAULT_HOST.to_string(),
            port: None,
            client_id: None,
            client_secret: None,
            redirect_uri: None,
            authorization_uri: DEFAULT_AUTHORIZATION_URI.to_string(),
            access_token_uri: DEFAULT_ACCESS_TOKEN_URI.to_string(),
            scopes: Vec::new(),
            domain: DEFAULT_DOMAIN.to_string(),
        }
    }
}

/// Partial configuration update. Every field maps to one recognized key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConfigOptions {
    pub base: Option<String>,
    pub version: Option<u32>,
    pub ssl: Option<bool>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub authorization_uri: Option<String>,
    pub access_token_uri: Option<String>,
    pub scopes: Option<Vec<String>>,
    pub domain: Option<String>,
}

impl ConfigOptions {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    #[must_use]
    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    #[must_use]
    pub fn ssl(mut self, ssl: bool) -> Self {
        self.ssl = Some(ssl);
        self
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    #[must_use]
    pub fn client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    #[must_use]
    pub fn redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    #[must_use]
    pub fn authorization_uri(mut self, template: impl Into<String>) -> Self {
        self.authorization_uri = Some(template.into());
        self
    }

    #[must_use]
    pub fn access_token_uri(mut self, template: impl Into<String>) -> Self {
        self.access_token_uri = Some(template.into());
        self
    }

    #[must_use]
    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = Some(scopes.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Parses a dynamic option object, rejecting unknown keys.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingOptions`] for `None` or JSON `null`
    /// - [`ConfigError::InvalidOptions`] for anything that is not an object
    /// - [`ConfigError::InvalidValue`] when a recognized key has the wrong type
    /// - [`ConfigError::UnknownOption`] naming the first unrecognized key
    pub fn from_json(options: Option<&Value>) -> Result<Self, ConfigError> {
        let value = match options {
            None | Some(Value::Null) => return Err(ConfigError::MissingOptions),
            Some(value @ Value::Object(_)) => value,
            Some(other) => {
                return Err(ConfigError::InvalidOptions {
                    kind: json_kind(other),
                });
            }
        };

        let raw: RawOptions = serde_json::from_value(value.clone())
            .map_err(|e| ConfigError::invalid_value(e.to_string()))?;

        if let Some(key) = raw.unrecognized.keys().next() {
            return Err(ConfigError::unknown_option(key.clone()));
        }

        Ok(raw.known)
    }
}

/// Known fields plus whatever keys no field claimed.
#[derive(Deserialize)]
struct RawOptions {
    #[serde(flatten)]
    known: ConfigOptions,
    #[serde(flatten)]
    unrecognized: BTreeMap<String, Value>,
}

impl ClientConfig {
    /// Applies every field present in `options`.
    pub fn configure(&mut self, options: ConfigOptions) {
        let ConfigOptions {
            base,
            version,
            ssl,
            host,
            port,
            client_id,
            client_secret,
            redirect_uri,
            authorization_uri,
            access_token_uri,
            scopes,
            domain,
        } = options;

        if let Some(base) = base {
            self.base = base;
        }
        if let Some(version) = version {
            self.version = version;
        }
        if let Some(ssl) = ssl {
            self.ssl = ssl;
        }
        if let Some(host) = host {
            self.host = host;
        }
        if port.is_some() {
            self.port = port;
        }
        if client_id.is_some() {
            self.client_id = client_id;
        }
        if client_secret.is_some() {
            self.client_secret = client_secret;
        }
        if redirect_uri.is_some() {
            self.redirect_uri = redirect_uri;
        }
        if let Some(template) = authorization_uri {
            self.authorization_uri = template;
        }
        if let Some(template) = access_token_uri {
            self.access_token_uri = template;
        }
        if let Some(scopes) = scopes {
            self.scopes = scopes;
        }
        if let Some(domain) = domain {
            self.domain = domain;
        }
    }

    /// Validates a dynamic option object and applies it.
    ///
    /// Nothing is modified unless the whole object is valid.
    ///
    /// # Errors
    ///
    /// See [`ConfigOptions::from_json`].
    pub fn configure_json(&mut self, options: Option<&Value>) -> Result<(), ConfigError> {
        let options = ConfigOptions::from_json(options)?;
        debug!(?options, "applying configuration");
        self.configure(options);
        Ok(())
    }

    /// Returns `https` or `http` depending on the TLS flag.
    #[must_use]
    pub fn protocol(&self) -> &'static str {
        if self.ssl { "https" } else { "http" }
    }

    /// Returns the configured port, or the scheme default.
    #[must_use]
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(if self.ssl { 443 } else { 80 })
    }

    /// Returns the API endpoint requests are sent to.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.ssl, self.host.clone(), self.effective_port())
    }

    /// Substitutes `{protocol}` and `{domain}` in an endpoint template.
    #[must_use]
    pub fn expand_template(&self, template: &str) -> String {
        template
            .replace("{protocol}", self.protocol())
            .replace("{domain}", &self.domain)
    }

    /// Resolves the token endpoint into a transport endpoint and request path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEndpoint`] when the expanded template is
    /// not an absolute `http`/`https` URL with a host.
    pub fn token_endpoint(&self) -> Result<(Endpoint, String), ConfigError> {
        let expanded = self.expand_template(&self.access_token_uri);
        split_url(&expanded)
    }

    /// Returns the client id or a not-configured error for `operation`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotConfigured`] when no client id is set.
    pub fn require_client_id(&self, operation: &'static str) -> Result<&str, ConfigError> {
        self.client_id
            .as_deref()
            .ok_or_else(|| ConfigError::not_configured(operation, "client_id"))
    }
}

/// Splits an absolute URL into an [`Endpoint`] and a path-with-query.
fn split_url(raw: &str) -> Result<(Endpoint, String), ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::invalid_endpoint(raw, e.to_string()))?;

    let ssl = match url.scheme() {
        "https" => true,
        "http" => false,
        other => {
            return Err(ConfigError::invalid_endpoint(
                raw,
                format!("unsupported scheme `{other}`"),
            ));
        }
    };

    let host = url
        .host_str()
        .ok_or_else(|| ConfigError::invalid_endpoint(raw, "missing host"))?
        .to_string();
    let port = url
        .port_or_known_default()
        .unwrap_or(if ssl { 443 } else { 80 });

    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }

    Ok((Endpoint::new(ssl, host, port), path))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
