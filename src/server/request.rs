//! Buffered request view handed to route handlers

use bytes::Bytes;
use hyper::header::{HeaderMap, AUTHORIZATION, USER_AGENT};
use hyper::{Method, Request};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::audit::RequestContext;
use crate::types::{GrievanceError, Result};

/// A request whose body has already been read and size-checked
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Socket peer, or the forwarded client when the peer is a trusted proxy
    pub client_ip: String,
}

impl ApiRequest {
    pub fn new(req: Request<Bytes>, remote: SocketAddr, trusted_proxies: &[IpAddr]) -> Self {
        let (parts, body) = req.into_parts();
        let client_ip = client_ip(&parts.headers, remote, trusted_proxies);
        let query = parts.uri.query().map(parse_query).unwrap_or_default();

        Self {
            method: parts.method,
            path: parts.uri.path().to_string(),
            query,
            headers: parts.headers,
            body,
            client_ip,
        }
    }

    /// Non-empty path segments
    pub fn segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn authorization(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
    }

    /// Request attributes recorded in audit entries
    pub fn context(&self) -> RequestContext {
        RequestContext {
            ip_address: Some(self.client_ip.clone()),
            user_agent: self
                .headers
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            device_id: self.header("x-device-id").map(str::to_string),
            session_id: self.header("x-session-id").map(str::to_string),
            department_id: None,
        }
    }

    /// Decode the JSON body
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.is_empty() {
            return Err(GrievanceError::Validation("Request body is required".into()));
        }
        serde_json::from_slice(&self.body)
            .map_err(|e| GrievanceError::Validation(format!("Invalid JSON: {}", e)))
    }

    /// Decode the JSON body, treating an empty body as `T::default()`
    pub fn json_or_default<T: DeserializeOwned + Default>(&self) -> Result<T> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }
        self.json()
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Parse an optional query parameter
    pub fn query_parse<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.query_param(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
                GrievanceError::Validation(format!("Invalid value for '{}': {}", key, raw))
            }),
        }
    }
}

/// Parse a query string; later duplicates win
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(k), decode(v))
        })
        .collect()
}

fn decode(s: &str) -> String {
    let s = s.replace('+', " ");
    match urlencoding::decode(&s) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => s.clone(),
    }
}

/// Client address used for the general rate limit and audit entries.
/// Forwarding headers count only when the peer is a trusted proxy.
pub fn client_ip(headers: &HeaderMap, remote: SocketAddr, trusted_proxies: &[IpAddr]) -> String {
    if !trusted_proxies.contains(&remote.ip()) {
        return remote.ip().to_string();
    }

    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
        })
        .map(str::to_string)
        .unwrap_or_else(|| remote.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> SocketAddr {
        "192.0.2.10:51000".parse().unwrap()
    }

    #[test]
    fn test_query_parsing() {
        let q = parse_query("status=in_progress&page=2&address=MG%20Road&x=a+b&empty=");
        assert_eq!(q["status"], "in_progress");
        assert_eq!(q["page"], "2");
        assert_eq!(q["address"], "MG Road");
        assert_eq!(q["x"], "a b");
        assert_eq!(q["empty"], "");
    }

    #[test]
    fn test_client_ip_behind_trusted_proxy() {
        let trusted = [remote().ip()];
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, remote(), &trusted), "192.0.2.10");

        headers.insert("x-real-ip", "198.51.100.4".parse().unwrap());
        assert_eq!(client_ip(&headers, remote(), &trusted), "198.51.100.4");

        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, remote(), &trusted), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_ignores_headers_from_untrusted_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "198.51.100.4".parse().unwrap());
        headers.insert("x-forwarded-for", "203.0.113.7".parse().unwrap());
        assert_eq!(client_ip(&headers, remote(), &[]), "192.0.2.10");

        let other_proxy: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(client_ip(&headers, remote(), &[other_proxy]), "192.0.2.10");
    }

    #[test]
    fn test_request_view() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("/complaints/COMP-1/history?limit=5")
            .header("user-agent", "curl/8")
            .body(Bytes::new())
            .unwrap();
        let req = ApiRequest::new(req, remote(), &[]);
        assert_eq!(req.segments(), vec!["complaints", "COMP-1", "history"]);
        assert_eq!(req.query_parse::<u64>("limit").unwrap(), Some(5));
        assert!(req.query_parse::<u64>("page").unwrap().is_none());
        assert_eq!(req.context().user_agent.as_deref(), Some("curl/8"));
        assert!(req.json::<serde_json::Value>().is_err());
        assert!(req.json_or_default::<HashMap<String, String>>().unwrap().is_empty());
    }
}
