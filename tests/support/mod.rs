//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod scripted;
pub mod socket_guard;

use std::sync::Arc;

use wiremock::MockServer;

use zetkin_client::{Client, ClientConfig, ConfigOptions, HttpTransport};

/// Builds a client that talks plain HTTP to the mock server.
pub fn client_for(mock_server: &MockServer) -> Client {
    let address = mock_server.address();
    let mut config = ClientConfig::default();
    config.configure(
        ConfigOptions::new()
            .host(address.ip().to_string())
            .port(address.port())
            .ssl(false),
    );
    let transport = HttpTransport::with_timeouts(5, 5).unwrap();
    Client::with_config(config, Arc::new(transport))
}

/// Installs a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
