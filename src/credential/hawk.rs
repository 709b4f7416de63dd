//! MAC-based request signing for ticket credentials.
//!
//! Each request carries an `Authorization: Hawk ...` header with a MAC over a
//! normalized string built from the timestamp, a random nonce, the method, the
//! request URI, host and port. The ticket key never leaves the client.
//!
//! ```text
//! hawk.1.header\n
//! <ts>\n
//! <nonce>\n
//! <METHOD>\n
//! <path?query>\n
//! <host>\n
//! <port>\n
//! <payload hash>\n
//! <ext>\n
//! [<app>\n<dlg>\n]
//! ```
//!
//! Servers reject requests whose timestamp is too far from their own clock and
//! answer with their current time plus a MAC over it (`tsm`), which
//! [`verify_timestamp`] checks before the client trusts it for clock
//! correction.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use rand::Rng;
use rand::distributions::Alphanumeric;
use sha2::Sha256;

use super::CredentialError;
use super::ticket::Ticket;

/// Protocol version embedded in every normalized string.
const HEADER_VERSION: &str = "1";

/// Length of the random per-request nonce.
const NONCE_LENGTH: usize = 6;

/// Request attributes covered by the MAC.
#[derive(Debug, Clone)]
pub struct Artifacts<'a> {
    /// Seconds since the epoch, clock offset applied.
    pub ts: i64,
    pub nonce: &'a str,
    pub method: &'a str,
    /// Path including the query string.
    pub resource: &'a str,
    pub host: &'a str,
    pub port: u16,
    pub hash: Option<&'a str>,
    pub ext: Option<&'a str>,
    pub app: Option<&'a str>,
    pub dlg: Option<&'a str>,
}

/// Builds the normalized string the MAC is computed over.
#[must_use]
pub fn normalized_string(kind: &str, artifacts: &Artifacts<'_>) -> String {
    let mut normalized = format!(
        "hawk.{HEADER_VERSION}.{kind}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n",
        artifacts.ts,
        artifacts.nonce,
        artifacts.method.to_ascii_uppercase(),
        artifacts.resource,
        artifacts.host.to_ascii_lowercase(),
        artifacts.port,
        artifacts.hash.unwrap_or_default(),
    );

    if let Some(ext) = artifacts.ext {
        normalized.push_str(&ext.replace('\\', "\\\\").replace('\n', "\\n"));
    }
    normalized.push('\n');

    if let Some(app) = artifacts.app {
        normalized.push_str(app);
        normalized.push('\n');
        normalized.push_str(artifacts.dlg.unwrap_or_default());
        normalized.push('\n');
    }

    normalized
}

/// Computes the base64 MAC of `input` with the ticket's key and algorithm.
///
/// # Errors
///
/// Returns [`CredentialError::UnsupportedAlgorithm`] for anything but
/// `sha256`, or [`CredentialError::InvalidKey`] if the key is unusable.
pub fn calculate_mac(ticket: &Ticket, input: &str) -> Result<String, CredentialError> {
    let mac = keyed_mac(ticket)?.chain_update(input.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

fn keyed_mac(ticket: &Ticket) -> Result<Hmac<Sha256>, CredentialError> {
    if !ticket.algorithm.eq_ignore_ascii_case("sha256") {
        return Err(CredentialError::UnsupportedAlgorithm {
            algorithm: ticket.algorithm.clone(),
        });
    }
    Hmac::<Sha256>::new_from_slice(ticket.key.as_bytes()).map_err(|_| {
        CredentialError::InvalidKey {
            id: ticket.id.clone(),
        }
    })
}

/// Builds the `Authorization` header value for one request.
///
/// # Errors
///
/// Propagates MAC computation errors from [`calculate_mac`].
pub fn header(ticket: &Ticket, artifacts: &Artifacts<'_>) -> Result<String, CredentialError> {
    let mac = calculate_mac(ticket, &normalized_string("header", artifacts))?;

    let mut header = format!(
        "Hawk id=\"{}\", ts=\"{}\", nonce=\"{}\"",
        ticket.id, artifacts.ts, artifacts.nonce
    );
    if let Some(hash) = artifacts.hash {
        header.push_str(&format!(", hash=\"{hash}\""));
    }
    if let Some(ext) = artifacts.ext {
        let escaped = ext.replace('\\', "\\\\").replace('"', "\\\"");
        header.push_str(&format!(", ext=\"{escaped}\""));
    }
    header.push_str(&format!(", mac=\"{mac}\""));

    if let Some(app) = artifacts.app {
        header.push_str(&format!(", app=\"{app}\""));
        if let Some(dlg) = artifacts.dlg {
            header.push_str(&format!(", dlg=\"{dlg}\""));
        }
    }

    Ok(header)
}

/// Computes the MAC a server attaches to its timestamp.
///
/// # Errors
///
/// Propagates MAC computation errors from [`calculate_mac`].
pub fn timestamp_mac(ticket: &Ticket, ts: i64) -> Result<String, CredentialError> {
    calculate_mac(ticket, &format!("hawk.{HEADER_VERSION}.ts\n{ts}\n"))
}

/// Checks a server timestamp MAC in constant time.
#[must_use]
pub fn verify_timestamp(ticket: &Ticket, ts: i64, tsm: &str) -> bool {
    let Ok(provided) = STANDARD.decode(tsm) else {
        return false;
    };
    let Ok(mac) = keyed_mac(ticket) else {
        return false;
    };
    mac.chain_update(format!("hawk.{HEADER_VERSION}.ts\n{ts}\n").as_bytes())
        .verify_slice(&provided)
        .is_ok()
}

/// Generates a random alphanumeric nonce.
#[must_use]
pub fn generate_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LENGTH)
        .map(char::from)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_ticket() -> Ticket {
        Ticket::app_credentials("dh37fgj492je", "werxhqb98rpaxn39848xrunpaw3489ruxnpa98w4rxn")
    }

    fn artifacts<'a>() -> Artifacts<'a> {
        Artifacts {
            ts: 1_353_832_234,
            nonce: "j4h3g2",
            method: "get",
            resource: "/resource/1?b=1&a=2",
            host: "Example.com",
            port: 8000,
            hash: None,
            ext: None,
            app: None,
            dlg: None,
        }
    }

    #[test]
    fn test_normalized_string_layout() {
        let normalized = normalized_string("header", &artifacts());
        assert_eq!(
            normalized,
            "hawk.1.header\n1353832234\nj4h3g2\nGET\n/resource/1?b=1&a=2\nexample.com\n8000\n\n\n"
        );
    }

    #[test]
    fn test_normalized_string_appends_app_and_dlg() {
        let mut with_app = artifacts();
        with_app.app = Some("app-1");
        let normalized = normalized_string("header", &with_app);
        assert!(normalized.ends_with("\n\napp-1\n\n"), "got: {normalized:?}");

        with_app.dlg = Some("dlg-1");
        let normalized = normalized_string("header", &with_app);
        assert!(normalized.ends_with("app-1\ndlg-1\n"), "got: {normalized:?}");
    }

    #[test]
    fn test_normalized_string_escapes_ext() {
        let mut with_ext = artifacts();
        with_ext.ext = Some("line\nbreak");
        let normalized = normalized_string("header", &with_ext);
        assert!(normalized.contains("line\\nbreak\n"), "got: {normalized:?}");
    }

    #[test]
    fn test_mac_matches_independent_hmac() {
        let ticket = test_ticket();
        let normalized = normalized_string("header", &artifacts());

        let mut expected = Hmac::<Sha256>::new_from_slice(ticket.key.as_bytes()).unwrap();
        expected.update(normalized.as_bytes());
        let expected = STANDARD.encode(expected.finalize().into_bytes());

        assert_eq!(calculate_mac(&ticket, &normalized).unwrap(), expected);
    }

    #[test]
    fn test_header_format() {
        let ticket = test_ticket();
        let value = header(&ticket, &artifacts()).unwrap();

        assert!(value.starts_with("Hawk id=\"dh37fgj492je\", ts=\"1353832234\", nonce=\"j4h3g2\", mac=\""));
        assert!(!value.contains("app="));
        assert!(!value.contains(&ticket.key), "key must never appear in the header");
    }

    #[test]
    fn test_header_includes_app_and_dlg() {
        let ticket = test_ticket();
        let mut with_app = artifacts();
        with_app.app = Some("app-1");
        with_app.dlg = Some("dlg-1");

        let value = header(&ticket, &with_app).unwrap();
        assert!(value.ends_with(", app=\"app-1\", dlg=\"dlg-1\""), "got: {value}");
    }

    #[test]
    fn test_unsupported_algorithm() {
        let mut ticket = test_ticket();
        ticket.algorithm = "md5".to_string();
        let error = calculate_mac(&ticket, "input").unwrap_err();
        assert_eq!(
            error,
            CredentialError::UnsupportedAlgorithm {
                algorithm: "md5".to_string()
            }
        );
    }

    #[test]
    fn test_timestamp_mac_verifies() {
        let ticket = test_ticket();
        let tsm = timestamp_mac(&ticket, 1_700_000_000).unwrap();

        assert!(verify_timestamp(&ticket, 1_700_000_000, &tsm));
        assert!(!verify_timestamp(&ticket, 1_700_000_001, &tsm));
        assert!(!verify_timestamp(&ticket, 1_700_000_000, "not base64!"));
    }

    #[test]
    fn test_nonce_shape() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), NONCE_LENGTH);
        assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
