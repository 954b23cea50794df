//! Default User-Agent for crawl traffic.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/history-refresh";

/// Default User-Agent for page fetches (identifies the tool).
#[must_use]
pub(crate) fn default_crawl_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("history-refresh/{version} (+{PROJECT_UA_URL})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_crawl_user_agent_has_version_and_url() {
        let ua = default_crawl_user_agent();
        assert!(ua.contains(PROJECT_UA_URL), "UA must contain project URL: {ua}");
        assert_eq!(
            ua.strip_prefix("history-refresh/")
                .and_then(|s| s.split(' ').next()),
            Some(env!("CARGO_PKG_VERSION")),
        );
    }
}
