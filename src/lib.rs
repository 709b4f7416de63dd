//! Zetkin API Client Library
//!
//! This library issues authenticated CRUD-style requests against the Zetkin
//! resource API. It signs requests with the configured credential, detects
//! authentication failures and repairs the credential where it can (ticket
//! reissue, clock correction, token refresh) before surfacing a failure.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`client`] - Client instances, configuration and credential operations
//! - [`config`] - Validated connection and OAuth settings
//! - [`credential`] - Credential variants, MAC signing and OAuth tokens
//! - [`executor`] - Sign/send/repair state machine with bounded retries
//! - [`resource`] - Resource paths, flags, pagination and filters
//! - [`transport`] - The HTTP transport capability and its reqwest backend

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod credential;
pub mod executor;
pub mod resource;
pub mod transport;
mod user_agent;

// Re-export commonly used types
pub use client::Client;
pub use config::{ClientConfig, ConfigError, ConfigOptions};
pub use credential::{
    Credential, CredentialError, OAuthToken, RepairAction, SessionToken, Ticket, TicketPair,
    TokenType,
};
pub use executor::{
    MAX_ANONYMOUS_RETRIES, MAX_CLOCK_CORRECTIONS, MAX_REFRESHES, MAX_REISSUES, RequestError,
    RequestExecutor, ResourceRequest, ResourceResult,
};
pub use reqwest::Method;
pub use resource::{ArgumentError, Filter, FlagValue, Flags, PathPart, ResourceProxy};
pub use transport::{
    Endpoint, HttpTransport, Transport, TransportError, TransportRequest, TransportResponse,
};
