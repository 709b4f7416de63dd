//! User-Agent string sent with API traffic.

const PROJECT_UA_URL: &str = "https://github.com/zetkin/zetkin-client-rs";

/// Default User-Agent for API requests.
#[must_use]
pub(crate) fn default_client_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("zetkin-client/{version} (+{PROJECT_UA_URL})")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_contains_version_and_url() {
        let ua = default_client_user_agent();
        assert!(ua.contains(PROJECT_UA_URL));
        let version = ua
            .strip_prefix("zetkin-client/")
            .and_then(|s| s.split(' ').next())
            .unwrap();
        assert_eq!(version, env!("CARGO_PKG_VERSION"));
    }
}
