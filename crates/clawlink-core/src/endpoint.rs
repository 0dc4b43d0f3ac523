//! Gateway endpoint normalization.

use url::Url;

use crate::error::EndpointError;

/// Where and how to reach a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GatewayEndpoint {
    /// Gateway URL as configured (any of ws, wss, http, https, or a bare host)
    pub url: String,
    /// Bearer token, with or without a `Bearer ` prefix
    pub token: String,
    /// Optional shared password
    pub password: Option<String>,
}

impl GatewayEndpoint {
    /// Endpoint with a URL and token and no password.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self { url: url.into(), token: token.into(), password: None }
    }

    /// Token as sent on the wire.
    pub fn bare_token(&self) -> String {
        normalize_token(&self.token)
    }

    /// URL the socket should open.
    pub fn socket_url(&self) -> Result<Url, EndpointError> {
        socket_url(&self.url, &self.token)
    }
}

/// Strip surrounding whitespace and a leading `Bearer ` (any case).
pub fn normalize_token(token: &str) -> String {
    let trimmed = token.trim();
    let stripped = match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => &trimmed[7..],
        _ => trimmed,
    };
    stripped.trim().to_string()
}

/// Normalize a gateway URL and attach the token query parameter.
///
/// `http` becomes `ws`, `https` becomes `wss`, and a URL with no scheme gets
/// `ws`. An empty token (after normalization) adds no parameter.
///
/// # Errors
///
/// - `EndpointError::Empty` for a blank URL
/// - `EndpointError::UnsupportedScheme` for anything but ws, wss, http, https
/// - `EndpointError::Parse` if the result is not a valid URL
pub fn socket_url(raw: &str, token: &str) -> Result<Url, EndpointError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(EndpointError::Empty);
    }

    let normalized = match raw.split_once("://") {
        Some((scheme, rest)) => {
            let scheme = match scheme.to_ascii_lowercase().as_str() {
                "ws" | "http" => "ws",
                "wss" | "https" => "wss",
                _ => return Err(EndpointError::UnsupportedScheme(scheme.to_string())),
            };
            format!("{scheme}://{rest}")
        },
        None => format!("ws://{raw}"),
    };

    let mut url = Url::parse(&normalized).map_err(|e| EndpointError::Parse(e.to_string()))?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(EndpointError::Parse(format!("no host in {raw}")));
    }

    let token = normalize_token(token);
    if !token.is_empty() {
        url.query_pairs_mut().append_pair("token", &token);
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemes_are_normalized() {
        assert_eq!(socket_url("http://gw:18789", "").unwrap().as_str(), "ws://gw:18789/");
        assert_eq!(socket_url("https://gw.example", "").unwrap().as_str(), "wss://gw.example/");
        assert_eq!(socket_url("wss://gw.example/ws", "").unwrap().as_str(), "wss://gw.example/ws");
        assert_eq!(socket_url("  gw:18789  ", "").unwrap().as_str(), "ws://gw:18789/");
    }

    #[test]
    fn token_is_stripped_and_encoded() {
        let url = socket_url("ws://gw", "  Bearer a b&c ").unwrap();
        let pairs: Vec<_> = url.query_pairs().collect();

        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, "token");
        assert_eq!(pairs[0].1, "a b&c");
        assert!(!url.as_str().contains(' '));
    }

    #[test]
    fn existing_query_is_kept() {
        let url = socket_url("ws://gw/?v=1", "t").unwrap();
        assert_eq!(url.query(), Some("v=1&token=t"));
    }

    #[test]
    fn bearer_prefix_case_insensitive() {
        assert_eq!(normalize_token("bearer abc"), "abc");
        assert_eq!(normalize_token("BEARER   abc  "), "abc");
        assert_eq!(normalize_token("abc"), "abc");
        assert_eq!(normalize_token("Bearerabc"), "Bearerabc");
        assert_eq!(normalize_token("   "), "");
    }

    #[test]
    fn rejects_bad_urls() {
        assert_eq!(socket_url("   ", "t"), Err(EndpointError::Empty));
        assert_eq!(
            socket_url("ftp://gw", "t"),
            Err(EndpointError::UnsupportedScheme("ftp".to_string()))
        );
        assert!(matches!(socket_url("ws://", "t"), Err(EndpointError::Parse(_))));
    }
}
