//! OAuth2 tokens: encoding, request signing and token endpoint exchanges.
//!
//! Tokens travel between the client and its embedding application in an
//! encoded form: base64 of a JSON object `{access, refresh, type, expires}`.
//! This module builds the token endpoint requests and parses the responses;
//! sending them is left to the executor so all traffic goes through the same
//! transport.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use url::Url;
use url::form_urlencoded;

use super::CredentialError;
use crate::config::{ClientConfig, ConfigError};
use crate::transport::{TransportRequest, TransportResponse};

/// OAuth error codes that mean the access token itself is no longer valid.
pub const INVALID_TOKEN_ERRORS: [&str; 2] = ["invalid_token", "expired_token"];

/// How an access token is attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TokenType {
    /// `Authorization: Bearer <token>`.
    #[default]
    Bearer,
    /// `access_token=<token>` query parameter.
    Query,
    /// Anything else the server hands out. Cannot be used for signing.
    Other(String),
}

impl From<String> for TokenType {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case("bearer") {
            Self::Bearer
        } else if value.eq_ignore_ascii_case("query") {
            Self::Query
        } else {
            Self::Other(value)
        }
    }
}

impl From<TokenType> for String {
    fn from(value: TokenType) -> Self {
        match value {
            TokenType::Bearer => "bearer".to_string(),
            TokenType::Query => "query".to_string(),
            TokenType::Other(other) => other,
        }
    }
}

/// An OAuth2 access token with optional refresh token and expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    #[serde(rename = "access", alias = "access_token")]
    pub access_token: String,
    #[serde(
        rename = "refresh",
        alias = "refresh_token",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<String>,
    #[serde(rename = "type", alias = "token_type", default)]
    pub token_type: TokenType,
    /// Expiry in milliseconds since the epoch.
    #[serde(rename = "expires", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl OAuthToken {
    /// A bearer token without refresh capability.
    #[must_use]
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: TokenType::Bearer,
            expires_at: None,
        }
    }

    /// Encodes the token as base64 JSON.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut object = Map::new();
        object.insert("access".to_string(), json!(self.access_token));
        if let Some(refresh) = &self.refresh_token {
            object.insert("refresh".to_string(), json!(refresh));
        }
        object.insert(
            "type".to_string(),
            json!(String::from(self.token_type.clone())),
        );
        if let Some(expires) = self.expires_at {
            object.insert("expires".to_string(), json!(expires));
        }
        STANDARD.encode(Value::Object(object).to_string())
    }

    /// Decodes a token produced by [`OAuthToken::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::InvalidToken`] when the input is not base64,
    /// not JSON, not an object, or lacks an access token.
    pub fn decode(encoded: &str) -> Result<Self, CredentialError> {
        let trimmed = encoded.trim();
        let bytes = STANDARD
            .decode(trimmed)
            .or_else(|_| URL_SAFE_NO_PAD.decode(trimmed.trim_end_matches('=')))
            .map_err(|e| CredentialError::invalid_token(format!("not base64: {e}")))?;

        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| CredentialError::invalid_token(format!("not JSON: {e}")))?;

        Self::from_json(&value)
    }

    /// Builds a token from its JSON object form.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::InvalidToken`] for non-objects or objects
    /// without an access token.
    pub fn from_json(value: &Value) -> Result<Self, CredentialError> {
        if !value.is_object() {
            return Err(CredentialError::invalid_token("token data must be an object"));
        }
        serde_json::from_value(value.clone())
            .map_err(|e| CredentialError::invalid_token(e.to_string()))
    }

    /// Returns the token's JSON object form.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    #[must_use]
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|r| !r.is_empty())
    }

    /// Attaches the token to a request according to its type.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::UnsupportedTokenType`] for unknown types.
    pub fn sign(&self, request: &mut TransportRequest) -> Result<(), CredentialError> {
        match &self.token_type {
            TokenType::Bearer => {
                request.set_header("authorization", format!("Bearer {}", self.access_token));
            }
            TokenType::Query => {
                let separator = if request.path.contains('?') { '&' } else { '?' };
                request.path = format!(
                    "{}{separator}access_token={}",
                    request.path,
                    urlencoding::encode(&self.access_token)
                );
            }
            TokenType::Other(other) => {
                return Err(CredentialError::UnsupportedTokenType {
                    token_type: other.clone(),
                });
            }
        }
        Ok(())
    }

    /// Reads a token from the fragment of an implicit-flow redirect URL.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::InvalidRedirectUrl`] when the fragment
    /// carries an OAuth error or no access token.
    pub fn from_fragment(url: &Url, now_ms: i64) -> Result<Self, CredentialError> {
        let fragment = url.fragment().unwrap_or_default();
        let params: Map<String, Value> = form_urlencoded::parse(fragment.as_bytes())
            .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
            .collect();

        if let Some(error) = oauth_error(&params) {
            return Err(CredentialError::invalid_redirect_url(url.as_str(), error));
        }

        let response: TokenResponse = serde_json::from_value(Value::Object(params))
            .map_err(|e| CredentialError::invalid_redirect_url(url.as_str(), e.to_string()))?;
        Ok(response.into_token(None, now_ms))
    }
}

/// Extracts the authorization code from a code-flow redirect URL.
///
/// # Errors
///
/// Returns [`CredentialError::InvalidRedirectUrl`] when the query carries an
/// OAuth error or no `code`.
pub fn authorization_code(url: &Url) -> Result<String, CredentialError> {
    let params: Map<String, Value> = url
        .query_pairs()
        .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
        .collect();

    if let Some(error) = oauth_error(&params) {
        return Err(CredentialError::invalid_redirect_url(url.as_str(), error));
    }

    params
        .get("code")
        .and_then(Value::as_str)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CredentialError::invalid_redirect_url(url.as_str(), "missing code"))
}

fn oauth_error(params: &Map<String, Value>) -> Option<String> {
    let error = params.get("error")?.as_str()?;
    let description = params.get("error_description").and_then(Value::as_str);
    Some(match description {
        Some(description) => format!("{error}: {description}"),
        None => error.to_string(),
    })
}

/// Builds the token endpoint request for a refresh grant.
///
/// # Errors
///
/// Returns [`ConfigError`] when no client id is configured or the token
/// endpoint template does not expand to a usable URL.
pub fn refresh_request(
    config: &ClientConfig,
    refresh_token: &str,
) -> Result<TransportRequest, ConfigError> {
    let client_id = config.require_client_id("refresh")?;

    let mut form = form_urlencoded::Serializer::new(String::new());
    form.append_pair("grant_type", "refresh_token")
        .append_pair("refresh_token", refresh_token)
        .append_pair("client_id", client_id);
    if let Some(secret) = &config.client_secret {
        form.append_pair("client_secret", secret);
    }

    token_request(config, form.finish())
}

/// Builds the token endpoint request for an authorization-code grant.
///
/// # Errors
///
/// Same as [`refresh_request`].
pub fn code_request(config: &ClientConfig, code: &str) -> Result<TransportRequest, ConfigError> {
    let client_id = config.require_client_id("authenticate")?;

    let mut form = form_urlencoded::Serializer::new(String::new());
    form.append_pair("grant_type", "authorization_code")
        .append_pair("code", code)
        .append_pair("client_id", client_id);
    if let Some(redirect_uri) = &config.redirect_uri {
        form.append_pair("redirect_uri", redirect_uri);
    }
    if let Some(secret) = &config.client_secret {
        form.append_pair("client_secret", secret);
    }
    if !config.scopes.is_empty() {
        form.append_pair("scope", &config.scopes.join(" "));
    }

    token_request(config, form.finish())
}

fn token_request(config: &ClientConfig, body: String) -> Result<TransportRequest, ConfigError> {
    let (endpoint, path) = config.token_endpoint()?;
    let mut request = TransportRequest::new(Method::POST, endpoint, path);
    request.set_header("content-type", "application/x-www-form-urlencoded");
    request.set_header("accept", "application/json");
    request.body = Some(body.into_bytes());
    Ok(request)
}

/// Token endpoint response body.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_token(self, previous_refresh: Option<&str>, now_ms: i64) -> OAuthToken {
        OAuthToken {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .or_else(|| previous_refresh.map(str::to_string)),
            token_type: self.token_type.map(TokenType::from).unwrap_or_default(),
            expires_at: self
                .expires_in
                .map(|seconds| now_ms.saturating_add(seconds.saturating_mul(1000))),
        }
    }
}

/// Accepts `expires_in` as a number or a numeric string (fragments carry strings).
fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    })
}

/// Parses a successful token endpoint response.
///
/// A response without a refresh token keeps `previous_refresh`.
///
/// # Errors
///
/// Returns [`CredentialError::MalformedTokenResponse`] when the body is not
/// JSON, carries an OAuth error, or has no access token.
pub fn parse_token_response(
    response: &TransportResponse,
    previous_refresh: Option<&str>,
    now_ms: i64,
) -> Result<OAuthToken, CredentialError> {
    let value: Value = serde_json::from_slice(&response.body)
        .map_err(|e| CredentialError::malformed_token_response(format!("not JSON: {e}")))?;

    if let Some(object) = value.as_object()
        && let Some(error) = oauth_error(object)
    {
        return Err(CredentialError::malformed_token_response(error));
    }

    let parsed: TokenResponse = serde_json::from_value(value)
        .map_err(|e| CredentialError::malformed_token_response(e.to_string()))?;
    Ok(parsed.into_token(previous_refresh, now_ms))
}
