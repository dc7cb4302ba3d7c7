//! HTTP client shared by every remote dependency

use super::headers::{accept_html, accept_json, user_agent};
use super::request::{HttpMethod, HttpRequest, HttpResponse};
use crate::config::{duration_secs, OutgoingSettings};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use reqwest::{Client, Response};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// HTTP client wrapper with orchestrator-specific configuration.
///
/// Cloning is cheap; clones share one connection pool.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    default_timeout: Duration,
    user_agent: String,
}

impl HttpClient {
    /// Create a new HTTP client with default settings
    pub fn new() -> Result<Self> {
        Self::with_settings(&OutgoingSettings::default())
    }

    /// Create a new HTTP client with custom settings
    pub fn with_settings(settings: &OutgoingSettings) -> Result<Self> {
        let timeout = duration_secs(settings.request_timeout, 0.1);
        let mut builder = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(settings.pool_maxsize)
            .gzip(true)
            .brotli(true);

        if !settings.verify_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(ref proxy_url) = settings.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| Error::Config(format!("invalid proxy {}: {}", proxy_url, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            default_timeout: timeout,
            user_agent: user_agent(),
        })
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Execute a request on behalf of `dependency`.
    ///
    /// Transport failures are classified into the error taxonomy; non-2xx
    /// statuses are returned as-is for the caller to inspect. The request is
    /// abandoned as soon as `ctx` is cancelled.
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        dependency: &str,
        request: HttpRequest,
    ) -> Result<HttpResponse> {
        let mut req_builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };

        let accept = if request.accept_html {
            accept_html()
        } else {
            accept_json()
        };
        req_builder = req_builder
            .header("User-Agent", &self.user_agent)
            .header("Accept", accept)
            .header("X-Correlation-Id", ctx.correlation_id().as_str());

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key, value);
        }

        if !request.params.is_empty() {
            req_builder = req_builder.query(&request.params);
        }

        if let Some(ref token) = request.bearer {
            req_builder = req_builder.bearer_auth(token);
        }

        if let Some(ref body) = request.json {
            req_builder = req_builder.json(body);
        }

        if let Some(timeout) = request.timeout {
            req_builder = req_builder.timeout(timeout);
        }

        debug!(dependency, url = %request.url, "outgoing request");

        ctx.guard(async {
            let response = req_builder
                .send()
                .await
                .map_err(|e| Error::from_reqwest(dependency, &e))?;
            Self::parse_response(dependency, response).await
        })
        .await
    }

    /// Execute and fail on any non-2xx status
    pub async fn execute_ok(
        &self,
        ctx: &RequestContext,
        dependency: &str,
        request: HttpRequest,
    ) -> Result<HttpResponse> {
        self.execute(ctx, dependency, request)
            .await?
            .error_for_status(dependency)
    }

    async fn parse_response(dependency: &str, response: Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let url = response.url().to_string();

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.to_string(), v.to_string());
            }
        }

        let text = response
            .text()
            .await
            .map_err(|e| Error::from_reqwest(dependency, &e))?;

        Ok(HttpResponse {
            status,
            headers,
            text,
            url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_client_creation() {
        assert!(HttpClient::new().is_ok());
    }

    #[tokio::test]
    async fn test_execute_sends_correlation_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "cbr"))
            .and(header("X-Correlation-Id", "corr-42"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let ctx = RequestContext::get_or_create(Some("corr-42"));
        let response = client
            .execute(
                &ctx,
                "Web",
                HttpRequest::get(format!("{}/search", server.uri())).param("q", "cbr"),
            )
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.text, "ok");
    }

    #[tokio::test]
    async fn test_execute_ok_classifies_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let err = client
            .execute_ok(&RequestContext::new(), "Index", HttpRequest::get(server.uri()))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let client = HttpClient::new().unwrap();
        let err = client
            .execute(
                &RequestContext::new(),
                "Index",
                HttpRequest::get("http://127.0.0.1:9/unreachable"),
            )
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_cancelled_request_is_abandoned() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let ctx = RequestContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = client
            .execute(&ctx, "Web", HttpRequest::get(server.uri()))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
