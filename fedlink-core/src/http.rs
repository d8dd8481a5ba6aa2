//! Shared HTTP client construction.

use std::time::Duration;
use url::Url;

/// User agent sent on every request; GitHub rejects requests without one.
pub const USER_AGENT: &str = concat!("fedlink/", env!("CARGO_PKG_VERSION"));

/// Default transport timeout for provider calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a reqwest client with the fedlink user agent and a transport timeout.
pub fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to build configured HTTP client ({}), using defaults", e);
            reqwest::Client::new()
        })
}

/// Append `path` to `base`, keeping any path prefix on the base URL.
///
/// `Url::join` would drop the last segment of a base without a trailing slash,
/// which breaks API roots such as `https://ghe.example.com/api/v3`.
pub fn endpoint(base: &Url, path: &str) -> String {
    format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_keeps_prefix() {
        let base = Url::parse("https://ghe.example.com/api/v3").unwrap();
        assert_eq!(
            endpoint(&base, "/repos/a/b"),
            "https://ghe.example.com/api/v3/repos/a/b"
        );
    }

    #[test]
    fn test_endpoint_root() {
        let base = Url::parse("https://api.github.com").unwrap();
        assert_eq!(endpoint(&base, "repos/a/b"), "https://api.github.com/repos/a/b");
    }
}
