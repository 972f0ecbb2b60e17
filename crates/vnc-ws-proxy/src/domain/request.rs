//! Metadata of an inbound WebSocket upgrade request.
//!
//! The WebSocket server captures these fields while it performs the HTTP
//! upgrade and hands them to the address resolver.  Nothing here refers to a
//! live socket; the struct is plain data.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use url::form_urlencoded;

/// What the resolver knows about one inbound connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionRequest {
    /// Remote address of the browser, when known.
    pub peer_addr: Option<SocketAddr>,

    /// Request path, e.g. `/ws`.
    pub path: String,

    /// Raw query string without the leading `?`, e.g. `token=abc`.
    pub query: Option<String>,

    /// Request headers keyed by lower-cased name.
    pub headers: BTreeMap<String, String>,
}

impl ConnectionRequest {
    /// Builds a request from a request URI such as `/ws?token=abc`.
    pub fn from_uri(peer_addr: Option<SocketAddr>, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (uri.to_string(), None),
        };
        Self {
            peer_addr,
            path,
            query,
            headers: BTreeMap::new(),
        }
    }

    /// Returns the first non-empty value of query parameter `name`.
    ///
    /// `+` and `%XX` escapes are decoded.
    ///
    /// # Example
    ///
    /// ```rust
    /// use vnc_ws_proxy::domain::ConnectionRequest;
    ///
    /// let req = ConnectionRequest::from_uri(None, "/ws?token=desk%2D1");
    /// assert_eq!(req.query_param("token").as_deref(), Some("desk-1"));
    /// ```
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        form_urlencoded::parse(query.as_bytes())
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
            .find(|value| !value.is_empty())
    }

    /// Returns a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_uri_splits_path_and_query() {
        // Arrange / Act
        let req = ConnectionRequest::from_uri(None, "/ws?token=abc&x=1");

        // Assert
        assert_eq!(req.path, "/ws");
        assert_eq!(req.query.as_deref(), Some("token=abc&x=1"));
    }

    #[test]
    fn test_from_uri_without_query() {
        let req = ConnectionRequest::from_uri(None, "/ws");
        assert_eq!(req.path, "/ws");
        assert!(req.query.is_none());
    }

    #[test]
    fn test_query_param_finds_value() {
        let req = ConnectionRequest::from_uri(None, "/ws?a=1&token=desk-1");
        assert_eq!(req.query_param("token").as_deref(), Some("desk-1"));
    }

    #[test]
    fn test_query_param_skips_empty_values() {
        // The first `token=` is empty; the second one wins.
        let req = ConnectionRequest::from_uri(None, "/ws?token=&token=second");
        assert_eq!(req.query_param("token").as_deref(), Some("second"));
    }

    #[test]
    fn test_query_param_missing_returns_none() {
        let req = ConnectionRequest::from_uri(None, "/ws?other=1");
        assert!(req.query_param("token").is_none());
    }

    #[test]
    fn test_query_param_key_without_value_is_none() {
        let req = ConnectionRequest::from_uri(None, "/ws?token");
        assert!(req.query_param("token").is_none());
    }

    #[test]
    fn test_query_param_decodes_escapes() {
        let req = ConnectionRequest::from_uri(None, "/ws?token=a%20b+c");
        assert_eq!(req.query_param("token").as_deref(), Some("a b c"));
    }

    #[test]
    fn test_query_param_keeps_invalid_escape() {
        let req = ConnectionRequest::from_uri(None, "/ws?token=100%zz&other=50%");
        assert_eq!(req.query_param("token").as_deref(), Some("100%zz"));
        assert_eq!(req.query_param("other").as_deref(), Some("50%"));
    }

    #[test]
    fn test_query_param_matches_encoded_key() {
        let req = ConnectionRequest::from_uri(None, "/ws?to%6Ben=desk-2");
        assert_eq!(req.query_param("token").as_deref(), Some("desk-2"));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        // Arrange
        let mut req = ConnectionRequest::default();
        req.headers.insert("x-forwarded-for".into(), "10.0.0.9".into());

        // Act / Assert
        assert_eq!(req.header("X-Forwarded-For"), Some("10.0.0.9"));
    }
}
