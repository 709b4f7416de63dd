//! Resource proxies: path construction and CRUD verbs.
//!
//! A [`ResourceProxy`] is created from path segments and at most one trailing
//! set of [`Flags`]:
//!
//! ```text
//! <base>/v<version>/<segment>/<segment>...[?<flags>]
//! ```
//!
//! `get` extends the query with pagination (`p`, `pp`) and one `filter`
//! parameter per [`Filter`], after any flags. Metadata attached with `meta`
//! is copied onto the result of every call made through the proxy.
//!
//! # Example
//!
//! ```no_run
//! use zetkin_client::{Client, Filter};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new()?;
//! let people = client
//!     .resource(&["orgs".into(), 1.into(), "people".into()])?
//!     .meta("view", "list");
//!
//! let filters = [Filter::new("city", "==", "Malmö")];
//! let result = people.get(Some(2), Some(50), Some(&filters)).await?;
//! println!("{} -> {}", result.http_status, result.data);
//! # Ok(())
//! # }
//! ```

mod error;

pub use error::ArgumentError;

use std::fmt;

use reqwest::Method;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::client::Client;
use crate::config::ClientConfig;
use crate::executor::{RequestError, ResourceRequest, ResourceResult};

/// Value of a query flag.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagValue {
    /// `true` renders as a bare flag name, `false` as `name=false`.
    Bool(bool),
    Text(String),
    Integer(i64),
    Float(f64),
}

impl FlagValue {
    /// Converts a JSON scalar. Returns `None` for null, arrays and objects.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float)),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Text(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for FlagValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for FlagValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for FlagValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Ordered query flags appended to a resource path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Flags(Vec<(String, FlagValue)>);

impl Flags {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a bare flag (`?name`).
    #[must_use]
    pub fn flag(self, name: impl Into<String>) -> Self {
        self.set(name, true)
    }

    /// Adds or replaces a flag, keeping its original position on replace.
    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<FlagValue>) -> Self {
        let name = name.into();
        let value = value.into();
        if let Some(entry) = self.0.iter_mut().find(|(existing, _)| *existing == name) {
            entry.1 = value;
        } else {
            self.0.push((name, value));
        }
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builds flags from a JSON object of scalars.
    ///
    /// # Errors
    ///
    /// Returns [`ArgumentError::InvalidPathParts`] when a value is not a scalar.
    pub fn from_json(object: &Map<String, Value>) -> Result<Self, ArgumentError> {
        object.iter().try_fold(Self::new(), |flags, (name, value)| {
            let value = FlagValue::from_json(value).ok_or_else(|| {
                ArgumentError::invalid_path(format!("flag `{name}` must be a scalar"))
            })?;
            Ok(flags.set(name.clone(), value))
        })
    }

    /// Renders `name` / `name=value` pairs joined by `&`, URL-escaped.
    #[must_use]
    pub fn to_query(&self) -> String {
        self.0
            .iter()
            .map(|(name, value)| match value {
                FlagValue::Bool(true) => urlencoding::encode(name).into_owned(),
                other => format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(&other.to_string())
                ),
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// One argument to [`Client::resource`].
#[derive(Debug, Clone, PartialEq)]
pub enum PathPart {
    Segment(String),
    Flags(Flags),
}

impl PathPart {
    /// Converts a dynamic path argument: strings and numbers become
    /// segments, objects become flags.
    ///
    /// # Errors
    ///
    /// Returns [`ArgumentError::InvalidPathParts`] for null, booleans, arrays
    /// and objects with non-scalar values.
    pub fn from_json(value: &Value) -> Result<Self, ArgumentError> {
        match value {
            Value::String(s) => Ok(Self::Segment(s.clone())),
            Value::Number(n) => Ok(Self::Segment(n.to_string())),
            Value::Object(object) => Flags::from_json(object).map(Self::Flags),
            other => Err(ArgumentError::invalid_path(format!(
                "unsupported path part {other}"
            ))),
        }
    }
}

impl From<&str> for PathPart {
    fn from(value: &str) -> Self {
        Self::Segment(value.to_string())
    }
}

impl From<String> for PathPart {
    fn from(value: String) -> Self {
        Self::Segment(value)
    }
}

impl From<i64> for PathPart {
    fn from(value: i64) -> Self {
        Self::Segment(value.to_string())
    }
}

impl From<i32> for PathPart {
    fn from(value: i32) -> Self {
        Self::Segment(value.to_string())
    }
}

impl From<u64> for PathPart {
    fn from(value: u64) -> Self {
        Self::Segment(value.to_string())
    }
}

impl From<u32> for PathPart {
    fn from(value: u32) -> Self {
        Self::Segment(value.to_string())
    }
}

impl From<Flags> for PathPart {
    fn from(value: Flags) -> Self {
        Self::Flags(value)
    }
}

/// One `[field, operator, value]` filter for `get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub field: String,
    pub operator: String,
    pub value: String,
}

impl Filter {
    #[must_use]
    pub fn new(
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl fmt::Display,
    ) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value: value.to_string(),
        }
    }

    /// Parses a dynamic filter list. `None` and `null` mean no filters.
    ///
    /// # Errors
    ///
    /// Returns [`ArgumentError::InvalidFilters`] unless the value is an array
    /// of three-element arrays of scalars.
    pub fn from_json(filters: Option<&Value>) -> Result<Vec<Self>, ArgumentError> {
        let entries = match filters {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(entries)) => entries,
            Some(_) => return Err(ArgumentError::invalid_filters("expected an array")),
        };

        entries
            .iter()
            .enumerate()
            .map(|(index, entry)| match entry.as_array().map(Vec::as_slice) {
                Some([field, operator, value]) => {
                    match (scalar_text(field), scalar_text(operator), scalar_text(value)) {
                        (Some(field), Some(operator), Some(value)) => Ok(Self {
                            field,
                            operator,
                            value,
                        }),
                        _ => Err(ArgumentError::invalid_filters(format!(
                            "entry {index} contains a non-scalar element"
                        ))),
                    }
                }
                Some(other) => Err(ArgumentError::invalid_filters(format!(
                    "entry {index} has {} elements",
                    other.len()
                ))),
                None => Err(ArgumentError::invalid_filters(format!(
                    "entry {index} is not an array"
                ))),
            })
            .collect()
    }

    fn to_query(&self) -> String {
        let expression = format!("{}{}{}", self.field, self.operator, self.value);
        format!("filter={}", urlencoding::encode(&expression))
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Builds `<base>/v<version>/<segments>[?<flags>]`.
///
/// # Errors
///
/// Returns [`ArgumentError::InvalidPathParts`] when flags are repeated or not
/// the last part.
pub fn build_path(config: &ClientConfig, parts: &[PathPart]) -> Result<String, ArgumentError> {
    let mut segments = Vec::with_capacity(parts.len());
    let mut flags: Option<&Flags> = None;

    for (index, part) in parts.iter().enumerate() {
        match part {
            PathPart::Segment(segment) => segments.push(segment.as_str()),
            PathPart::Flags(_) if flags.is_some() => {
                return Err(ArgumentError::invalid_path("only one flags object is allowed"));
            }
            PathPart::Flags(_) if index + 1 != parts.len() => {
                return Err(ArgumentError::invalid_path("flags must be the last path part"));
            }
            PathPart::Flags(part_flags) => flags = Some(part_flags),
        }
    }

    let mut joined = segments.join("/");
    if !joined.starts_with('/') {
        joined.insert(0, '/');
    }

    let mut path = format!("{}/v{}{joined}", config.base, config.version);
    if let Some(flags) = flags.filter(|flags| !flags.is_empty()) {
        path.push('?');
        path.push_str(&flags.to_query());
    }
    Ok(path)
}

/// Appends pagination and filter parameters to `path`.
///
/// `pp` is only emitted together with `p`.
#[must_use]
pub fn with_query(
    path: &str,
    page: Option<u32>,
    per_page: Option<u32>,
    filters: &[Filter],
) -> String {
    let mut params = Vec::new();
    if let Some(page) = page {
        params.push(format!("p={page}"));
        if let Some(per_page) = per_page {
            params.push(format!("pp={per_page}"));
        }
    }
    params.extend(filters.iter().map(Filter::to_query));

    if params.is_empty() {
        return path.to_string();
    }
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{path}{separator}{}", params.join("&"))
}

/// Handle for issuing requests against one resource path.
#[derive(Debug, Clone)]
pub struct ResourceProxy {
    client: Client,
    path: String,
    meta: Map<String, Value>,
}

impl ResourceProxy {
    pub(crate) fn new(client: Client, path: String) -> Self {
        Self {
            client,
            path,
            meta: Map::new(),
        }
    }

    /// The full request path, without pagination or filters.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Metadata accumulated so far.
    #[must_use]
    pub fn meta_data(&self) -> &Map<String, Value> {
        &self.meta
    }

    /// Attaches one metadata entry.
    #[must_use]
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Merges every entry of a JSON object into the metadata.
    ///
    /// # Errors
    ///
    /// Returns [`ArgumentError::InvalidMetaSignature`] for anything but an
    /// object.
    pub fn meta_object(mut self, object: Value) -> Result<Self, ArgumentError> {
        let Value::Object(entries) = object else {
            return Err(ArgumentError::invalid_meta(
                "single argument must be an object",
            ));
        };
        self.meta.extend(entries);
        Ok(self)
    }

    /// Applies a dynamic argument list: `(key, value)` or `(object)`.
    ///
    /// # Errors
    ///
    /// Returns [`ArgumentError::InvalidMetaSignature`] for zero or more than
    /// two arguments, a single non-object argument, or a non-scalar key.
    pub fn meta_args(self, args: &[Value]) -> Result<Self, ArgumentError> {
        match args {
            [] => Err(ArgumentError::invalid_meta("no arguments")),
            [object] => self.meta_object(object.clone()),
            [key, value] => {
                let key = match key {
                    Value::String(key) => key.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => return Err(ArgumentError::invalid_meta("key must be a string")),
                };
                Ok(self.meta(key, value.clone()))
            }
            more => Err(ArgumentError::invalid_meta(format!(
                "expected 1 or 2 arguments, got {}",
                more.len()
            ))),
        }
    }

    /// Issues a GET with optional pagination and filters.
    ///
    /// # Errors
    ///
    /// See [`Client::execute`].
    pub async fn get(
        &self,
        page: Option<u32>,
        per_page: Option<u32>,
        filters: Option<&[Filter]>,
    ) -> Result<ResourceResult, RequestError> {
        let path = with_query(&self.path, page, per_page, filters.unwrap_or_default());
        self.send(ResourceRequest::new(Method::GET, path)).await
    }

    /// Issues a GET with a dynamic filter list, validated before sending.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Argument`] for malformed filters, otherwise
    /// see [`Client::execute`].
    pub async fn get_json(
        &self,
        page: Option<u32>,
        per_page: Option<u32>,
        filters: Option<&Value>,
    ) -> Result<ResourceResult, RequestError> {
        let filters = Filter::from_json(filters)?;
        self.get(page, per_page, Some(&filters)).await
    }

    /// Issues a POST with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Argument`] when the body cannot be encoded,
    /// otherwise see [`Client::execute`].
    pub async fn post<T: Serialize + ?Sized>(
        &self,
        body: &T,
    ) -> Result<ResourceResult, RequestError> {
        self.send_with_body(Method::POST, body).await
    }

    /// Issues a PATCH with a JSON body.
    ///
    /// # Errors
    ///
    /// Same as [`ResourceProxy::post`].
    pub async fn patch<T: Serialize + ?Sized>(
        &self,
        body: &T,
    ) -> Result<ResourceResult, RequestError> {
        self.send_with_body(Method::PATCH, body).await
    }

    /// Issues a PUT with a JSON body.
    ///
    /// # Errors
    ///
    /// Same as [`ResourceProxy::post`].
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        body: &T,
    ) -> Result<ResourceResult, RequestError> {
        self.send_with_body(Method::PUT, body).await
    }

    /// Issues a DELETE.
    ///
    /// # Errors
    ///
    /// See [`Client::execute`].
    pub async fn del(&self) -> Result<ResourceResult, RequestError> {
        self.send(ResourceRequest::new(Method::DELETE, self.path.clone()))
            .await
    }

    async fn send_with_body<T: Serialize + ?Sized>(
        &self,
        method: Method,
        body: &T,
    ) -> Result<ResourceResult, RequestError> {
        let body = serde_json::to_value(body).map_err(|e| ArgumentError::InvalidBody {
            reason: e.to_string(),
        })?;
        self.send(ResourceRequest::new(method, self.path.clone()).with_body(body))
            .await
    }

    async fn send(&self, request: ResourceRequest) -> Result<ResourceResult, RequestError> {
        debug!(path = %request.path, meta_keys = self.meta.len(), "resource call");
        self.client
            .execute(&request.with_meta(self.meta.clone()))
            .await
    }
}
