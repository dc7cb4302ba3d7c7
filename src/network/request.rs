//! Outgoing request and response types

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// HTTP request to be made on behalf of a dependency
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub params: HashMap<String, String>,
    pub json: Option<serde_json::Value>,
    /// Bearer token for the Authorization header
    pub bearer: Option<String>,
    /// Send HTML accept headers instead of JSON ones
    pub accept_html: bool,
    /// Overrides the client-wide timeout
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self::with_method(url, HttpMethod::Get)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::with_method(url, HttpMethod::Post)
    }

    fn with_method(url: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            url: url.into(),
            method,
            headers: HashMap::new(),
            params: HashMap::new(),
            json: None,
            bearer: None,
            accept_html: false,
            timeout: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.json = Some(body);
        self
    }

    pub fn bearer(mut self, token: Option<&str>) -> Self {
        self.bearer = token.map(str::to_string);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn html(mut self) -> Self {
        self.accept_html = true;
        self
    }
}

/// HTTP response as seen by a dependency
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub text: String,
    /// Final URL after redirects
    pub url: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx response into a classified error
    pub fn error_for_status(self, dependency: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::from_status(dependency, self.status, &self.text))
        }
    }

    /// Parse the body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self, dependency: &str) -> Result<T> {
        serde_json::from_str(&self.text)
            .map_err(|e| Error::malformed(dependency, format!("invalid JSON body: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, text: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            text: text.to_string(),
            url: "http://localhost".to_string(),
        }
    }

    #[test]
    fn test_error_for_status() {
        assert!(response(200, "{}").error_for_status("Index").is_ok());
        assert!(response(502, "")
            .error_for_status("Index")
            .unwrap_err()
            .is_transient());
        assert!(!response(400, "")
            .error_for_status("Index")
            .unwrap_err()
            .is_transient());
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let err = response(200, "not json")
            .json::<serde_json::Value>("Planner")
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Permanent {
                kind: crate::error::PermanentKind::Malformed,
                ..
            }
        ));
    }

    #[test]
    fn test_request_builder() {
        let request = HttpRequest::post("http://localhost/search")
            .header("api-key", "k")
            .bearer(Some("t"))
            .json(serde_json::json!({"search": "q"}));
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.bearer.as_deref(), Some("t"));
        assert!(request.json.is_some());
    }
}
