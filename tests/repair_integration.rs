//! Integration tests for the credential repair state machine.
//!
//! These drive a [`Client`] over a scripted in-memory transport so every
//! request in a logical call can be counted and inspected.

use std::sync::Arc;

use serde_json::{Value, json};

use zetkin_client::credential::hawk;
use zetkin_client::{
    Client, ConfigError, ConfigOptions, Credential, MAX_CLOCK_CORRECTIONS, OAuthToken,
    RequestError, Ticket, TransportError,
};
mod support;
use support::init_tracing;
use support::scripted::ScriptedTransport;

fn client_over(transport: &Arc<ScriptedTransport>) -> Client {
    Client::with_transport(Arc::clone(transport) as Arc<dyn zetkin_client::Transport>)
}

fn user_ticket(id: &str) -> Ticket {
    Ticket::app_credentials(id, format!("{id}-key"))
}

fn authorization(transport: &ScriptedTransport, index: usize) -> Option<String> {
    transport.requests()[index]
        .header("authorization")
        .map(str::to_string)
}

async fn get_orgs(client: &Client) -> Result<zetkin_client::ResourceResult, RequestError> {
    client
        .resource(&["orgs".into()])
        .unwrap()
        .get(None, None, None)
        .await
}

// ==================== Ticket Reissue ====================

#[tokio::test]
async fn test_expired_ticket_is_reissued_exactly_once() {
    init_tracing();
    let transport = ScriptedTransport::new();
    transport
        .respond(401, json!({ "expired": true }))
        .respond(200, json!({ "id": "user-2", "key": "user-2-key" }))
        .respond(401, json!({ "expired": true }));

    let client = client_over(&transport);
    client.set_ticket(user_ticket("user-1"));

    let error = get_orgs(&client).await.unwrap_err();

    assert_eq!(error.http_status(), Some(401));
    assert_eq!(transport.paths(), vec!["/v1/orgs", "/oz/reissue", "/v1/orgs"]);
    assert_eq!(client.ticket().unwrap().id, "user-2");
}

#[tokio::test]
async fn test_second_call_reissues_without_reauthentication() {
    let transport = ScriptedTransport::new();
    transport
        // first call succeeds with the original ticket
        .respond(200, json!({ "data": [] }))
        // second call finds it expired and recovers on its own
        .respond(401, json!({ "expired": true }))
        .respond(200, json!({ "id": "user-2", "key": "user-2-key" }))
        .respond(200, json!({ "data": ["org"] }));

    let client = client_over(&transport);
    client.set_ticket(user_ticket("user-1"));

    get_orgs(&client).await.unwrap();
    let result = get_orgs(&client).await.unwrap();

    assert_eq!(result.data, json!({ "data": ["org"] }));
    assert!(authorization(&transport, 0).unwrap().contains("id=\"user-1\""));
    assert!(authorization(&transport, 3).unwrap().contains("id=\"user-2\""));
    assert_eq!(transport.remaining(), 0);
}

#[tokio::test]
async fn test_reissue_with_invalid_ticket_payload_is_credential_error() {
    let transport = ScriptedTransport::new();
    transport
        .respond(401, json!({ "expired": true }))
        .respond(200, json!({ "unexpected": "shape" }));

    let client = client_over(&transport);
    client.set_ticket(user_ticket("user-1"));

    let error = get_orgs(&client).await.unwrap_err();
    assert!(matches!(error, RequestError::Credential(_)), "got: {error:?}");
    assert_eq!(client.ticket().unwrap().id, "user-1");
}

// ==================== Clock Correction ====================

#[tokio::test]
async fn test_clock_correction_bounded_at_three() {
    let transport = ScriptedTransport::new();
    let ticket = user_ticket("user-1");
    let server_ts = zetkin_client::credential::now_millis() / 1000 + 600;
    let tsm = hawk::timestamp_mac(&ticket, server_ts).unwrap();
    let stale = json!({
        "message": "Stale timestamp",
        "attributes": { "ts": server_ts, "tsm": tsm },
    });
    for _ in 0..=MAX_CLOCK_CORRECTIONS {
        transport.respond(401, stale.clone());
    }

    let client = client_over(&transport);
    client.set_ticket(ticket);

    let error = get_orgs(&client).await.unwrap_err();

    assert_eq!(transport.requests().len(), 4, "one attempt plus three corrections");
    assert_eq!(error.result().unwrap().data, stale);
}

#[tokio::test]
async fn test_clock_correction_then_success() {
    let transport = ScriptedTransport::new();
    let server_ts = zetkin_client::credential::now_millis() / 1000 - 900;
    transport
        .respond(
            401,
            json!({ "message": "Stale timestamp", "attributes": { "ts": server_ts } }),
        )
        .respond(200, json!({ "data": [] }));

    let client = client_over(&transport);
    client.set_ticket(user_ticket("user-1"));

    let result = get_orgs(&client).await.unwrap();
    assert_eq!(result.http_status, 200);

    let retried = authorization(&transport, 1).unwrap();
    let signed_near_server_time = [server_ts, server_ts + 1]
        .iter()
        .any(|ts| retried.contains(&format!("ts=\"{ts}\"")));
    assert!(signed_near_server_time, "got: {retried}");
}

#[tokio::test]
async fn test_other_ticket_401_surfaced_verbatim() {
    let transport = ScriptedTransport::new();
    transport.respond(401, json!({ "message": "Bad mac" }));

    let client = client_over(&transport);
    client.set_ticket(user_ticket("user-1"));

    let error = get_orgs(&client).await.unwrap_err();
    assert_eq!(error.result().unwrap().data, json!({ "message": "Bad mac" }));
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn test_clock_corrections_after_reissue_surface_original_401() {
    let transport = ScriptedTransport::new();
    let reissued = user_ticket("user-2");
    let server_ts = zetkin_client::credential::now_millis() / 1000 + 600;
    let stale = json!({
        "message": "Stale timestamp",
        "attributes": { "ts": server_ts, "tsm": hawk::timestamp_mac(&reissued, server_ts).unwrap() },
    });
    transport
        .respond(401, json!({ "expired": true }))
        .respond(200, json!({ "id": "user-2", "key": "user-2-key" }));
    for _ in 0..=MAX_CLOCK_CORRECTIONS {
        transport.respond(401, stale.clone());
    }

    let client = client_over(&transport);
    client.set_ticket(user_ticket("user-1"));

    let error = get_orgs(&client).await.unwrap_err();

    assert_eq!(
        transport.paths(),
        vec!["/v1/orgs", "/oz/reissue", "/v1/orgs", "/v1/orgs", "/v1/orgs", "/v1/orgs"]
    );
    let result = error.result().unwrap();
    assert_eq!(result.http_status, 401);
    assert_eq!(result.data, json!({ "expired": true }));
}

// ==================== OAuth ====================

fn oauth_client(transport: &Arc<ScriptedTransport>) -> Client {
    let client = client_over(transport);
    client.configure(ConfigOptions::new().client_id("abc123"));
    client
        .set_token(
            &OAuthToken {
                refresh_token: Some("r1".to_string()),
                ..OAuthToken::bearer("a1")
            }
            .encode(),
        )
        .unwrap();
    client
}

#[tokio::test]
async fn test_oauth_refresh_failure_falls_back_to_anonymous_then_original_401() {
    let transport = ScriptedTransport::new();
    let original = json!({ "error": "invalid_token", "attempt": "first" });
    transport
        .respond(401, original.clone())
        .respond(400, json!({ "error": "invalid_grant" }))
        .respond(401, json!({ "error": "unauthorized", "attempt": "anonymous" }));

    let client = oauth_client(&transport);
    let error = get_orgs(&client).await.unwrap_err();

    let result = error.result().unwrap();
    assert_eq!(result.http_status, 401);
    assert_eq!(result.data, original, "the original failure is surfaced");

    assert_eq!(
        transport.paths(),
        vec!["/v1/orgs", "/oauth/token/", "/v1/orgs"]
    );
    assert_eq!(authorization(&transport, 0).as_deref(), Some("Bearer a1"));
    assert!(authorization(&transport, 2).is_none(), "anonymous retry is unsigned");
}

#[tokio::test]
async fn test_oauth_anonymous_retry_success_is_returned() {
    let transport = ScriptedTransport::new();
    transport
        .respond(401, json!({ "error": "insufficient_scope" }))
        .respond(200, json!({ "public": true }));

    let client = oauth_client(&transport);
    let result = get_orgs(&client).await.unwrap();

    assert_eq!(result.data, json!({ "public": true }));
    assert_eq!(transport.paths(), vec!["/v1/orgs", "/v1/orgs"]);
}

#[tokio::test]
async fn test_oauth_refresh_success_is_visible_to_later_calls() {
    let transport = ScriptedTransport::new();
    transport
        .respond(401, json!({ "error": "expired_token" }))
        .respond(
            200,
            json!({ "access_token": "a2", "token_type": "bearer", "refresh_token": "r2" }),
        )
        .respond(200, json!({ "data": 1 }))
        .respond(200, json!({ "data": 2 }));

    let client = oauth_client(&transport);
    get_orgs(&client).await.unwrap();
    get_orgs(&client).await.unwrap();

    assert_eq!(authorization(&transport, 2).as_deref(), Some("Bearer a2"));
    assert_eq!(authorization(&transport, 3).as_deref(), Some("Bearer a2"));

    let data = client.token_data().unwrap().unwrap();
    assert_eq!(data["refresh"], json!("r2"));
}

#[tokio::test]
async fn test_refreshed_token_rejected_is_not_retried_unsigned() {
    let transport = ScriptedTransport::new();
    let original = json!({ "error": "invalid_token" });
    transport
        .respond(401, original.clone())
        .respond(200, json!({ "access_token": "a2", "token_type": "bearer" }))
        .respond(401, json!({ "error": "invalid_token" }))
        .respond(401, json!({ "error": "unauthorized" }));

    let client = oauth_client(&transport);
    let error = get_orgs(&client).await.unwrap_err();

    assert_eq!(
        transport.paths(),
        vec!["/v1/orgs", "/oauth/token/", "/v1/orgs"]
    );
    assert_eq!(authorization(&transport, 2).as_deref(), Some("Bearer a2"));
    assert_eq!(transport.remaining(), 1);
    assert_eq!(error.result().unwrap().data, original);
}

// ==================== Terminal Failures ====================

#[tokio::test]
async fn test_transport_error_is_never_retried() {
    let transport = ScriptedTransport::new();
    transport.fail(TransportError::timeout("http://api.zetk.in/v1/orgs"));

    let client = client_over(&transport);
    client.set_ticket(user_ticket("user-1"));

    let error = get_orgs(&client).await.unwrap_err();
    assert!(error.is_transport(), "got: {error:?}");
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn test_server_error_is_surfaced_without_repair() {
    let transport = ScriptedTransport::new();
    transport.respond(503, json!({ "error": "maintenance" }));

    let client = oauth_client(&transport);
    let error = get_orgs(&client).await.unwrap_err();

    assert_eq!(error.http_status(), Some(503));
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn test_empty_credential_401_is_terminal() {
    let transport = ScriptedTransport::new();
    transport.respond(401, json!({ "expired": true }));

    let client = client_over(&transport);
    assert_eq!(*client.credential(), Credential::Empty);

    let error = get_orgs(&client).await.unwrap_err();
    assert_eq!(error.http_status(), Some(401));
    assert_eq!(transport.requests().len(), 1);
}

// ==================== Configuration ====================

#[tokio::test]
async fn test_unknown_config_key_rejected_and_config_unchanged() {
    let transport = ScriptedTransport::new();
    transport.respond(200, Value::Null);

    let client = client_over(&transport);
    let before = client.config();

    let error = client
        .configure_json(Some(&json!({ "host": "other.example", "foo": "bar" })))
        .unwrap_err();

    assert_eq!(error, ConfigError::unknown_option("foo"));
    assert_eq!(client.config(), before);

    get_orgs(&client).await.unwrap();
    assert_eq!(transport.requests()[0].endpoint.host, "api.zetk.in");
}
