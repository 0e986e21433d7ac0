//! Dispatch Request - the ingress view of an inbound request
//!
//! The ingress layer flattens whatever HTTP machinery it uses into this
//! struct before asking the dispatcher for a decision. The match engine
//! only ever reads requests through these accessors.

use bytes::Bytes;
use http::{HeaderMap, Method};

/// An inbound request as seen by the match engine.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    method: Method,
    /// Request URI including the query string, e.g. `/search?q=cat`
    uri: String,
    host: String,
    remote_ip: String,
    headers: HeaderMap,
    body: Bytes,
}

impl DispatchRequest {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            host: String::new(),
            remote_ip: String::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_remote_ip(mut self, ip: impl Into<String>) -> Self {
        self.remote_ip = ip.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (name.parse::<http::HeaderName>(), value.parse()) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Full request URI including the query string.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn remote_ip(&self) -> &str {
        &self.remote_ip
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// URI path without the query string.
    pub fn path(&self) -> &str {
        match self.uri.split_once('?') {
            Some((path, _)) => path,
            None => &self.uri,
        }
    }

    /// URL-decoded query parameter.
    pub fn query_value(&self, name: &str) -> Option<String> {
        let query = self.uri.split_once('?').map(|(_, q)| q)?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// URL-decoded value from a form-encoded body.
    pub fn form_value(&self, name: &str) -> Option<String> {
        url::form_urlencoded::parse(&self.body)
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    pub fn header_value(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    /// Value of a cookie from the `Cookie` header.
    pub fn cookie_value(&self, name: &str) -> Option<String> {
        let header = self.header_value("cookie")?;
        for pair in header.split(';') {
            if let Some((k, v)) = pair.trim().split_once('=') {
                if k == name {
                    return Some(v.to_string());
                }
            }
        }
        None
    }

    /// The `index`-th path segment, skipping the leading slash.
    pub fn path_value(&self, index: usize) -> Option<String> {
        let path = self.path().strip_prefix('/').unwrap_or(self.path());
        path.split('/').nth(index).map(|s| s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_strips_query() {
        let req = DispatchRequest::new(Method::GET, "/search?q=cat");
        assert_eq!(req.path(), "/search");
        assert_eq!(req.uri(), "/search?q=cat");
    }

    #[test]
    fn test_query_value_decodes() {
        let req = DispatchRequest::new(Method::GET, "/search?q=a%20b&lang=en");
        assert_eq!(req.query_value("q").as_deref(), Some("a b"));
        assert_eq!(req.query_value("lang").as_deref(), Some("en"));
        assert_eq!(req.query_value("missing"), None);
    }

    #[test]
    fn test_form_value() {
        let req =
            DispatchRequest::new(Method::POST, "/submit").with_body("user=alice&tier=gold");
        assert_eq!(req.form_value("user").as_deref(), Some("alice"));
        assert_eq!(req.form_value("tier").as_deref(), Some("gold"));
    }

    #[test]
    fn test_header_and_cookie() {
        let req = DispatchRequest::new(Method::GET, "/")
            .with_header("x-tenant", "gold")
            .with_header("cookie", "session=abc123; theme=dark");

        assert_eq!(req.header_value("x-tenant").as_deref(), Some("gold"));
        assert_eq!(req.cookie_value("session").as_deref(), Some("abc123"));
        assert_eq!(req.cookie_value("theme").as_deref(), Some("dark"));
        assert_eq!(req.cookie_value("missing"), None);
    }

    #[test]
    fn test_path_value_segments() {
        let req = DispatchRequest::new(Method::GET, "/users/42/orders?x=1");
        assert_eq!(req.path_value(0).as_deref(), Some("users"));
        assert_eq!(req.path_value(1).as_deref(), Some("42"));
        assert_eq!(req.path_value(2).as_deref(), Some("orders"));
        assert_eq!(req.path_value(3), None);
    }
}
