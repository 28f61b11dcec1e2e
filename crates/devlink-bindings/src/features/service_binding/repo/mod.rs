use async_trait::async_trait;
use bytes::Bytes;
use devlink_core::{CoreError, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::Client;

/// Headers that describe one hop rather than the request itself.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "content-length",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl BindingRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Replaces every value of `name` with `value`.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.remove_header(name);
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        let position = self
            .headers
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))?;
        let (_, value) = self.headers.remove(position);
        self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        Some(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl BindingResponse {
    /// Plain-text response produced locally instead of by the target.
    pub fn diagnostic(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![(
                "content-type".to_string(),
                "text/plain; charset=utf-8".to_string(),
            )],
            body: Bytes::from(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Outbound leg of a binding call
#[async_trait]
pub trait BindingTransport: Send + Sync {
    async fn dispatch(&self, request: BindingRequest) -> Result<BindingResponse>;
}

/// Sends binding calls with reqwest. No timeout is imposed; callers cancel
/// by dropping the future.
#[derive(Clone)]
pub struct ReqwestBindingTransport {
    client: Client,
}

impl ReqwestBindingTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .redirect(Policy::none())
            .build()
            .map_err(|e| CoreError::RegistryUnavailable(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BindingTransport for ReqwestBindingTransport {
    async fn dispatch(&self, request: BindingRequest) -> Result<BindingResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|e| {
            CoreError::InvalidRecord(format!("invalid HTTP method {:?}: {e}", request.method))
        })?;

        let mut headers = HeaderMap::new();
        for (key, value) in &request.headers {
            if HOP_BY_HOP.iter().any(|hop| key.eq_ignore_ascii_case(hop)) {
                continue;
            }
            let key = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                CoreError::InvalidRecord(format!("invalid header name '{key}': {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                CoreError::InvalidRecord(format!("invalid header value for '{key}': {e}"))
            })?;
            headers.append(key, value);
        }

        let response = self
            .client
            .request(method, &request.url)
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| CoreError::UpstreamReset(format!("{}: {e}", request.url)))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| CoreError::UpstreamReset(format!("failed to read response body: {e}")))?;

        Ok(BindingResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transport_rejects_invalid_http_method_before_send() {
        let transport = ReqwestBindingTransport::new().unwrap();
        let request = BindingRequest::new("BAD METHOD", "http://127.0.0.1:1/");

        let err = transport.dispatch(request).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidRecord(_)));
    }

    #[tokio::test]
    async fn test_transport_connection_refused_is_upstream_reset() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = ReqwestBindingTransport::new().unwrap();
        let err = transport
            .dispatch(BindingRequest::get(format!("http://{addr}/")))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UpstreamReset(_)));
    }

    #[test]
    fn test_request_header_helpers_are_case_insensitive() {
        let mut request = BindingRequest::get("http://localhost/")
            .with_header("X-Trace", "a")
            .with_header("x-trace", "b");

        assert_eq!(request.header("X-TRACE"), Some("a"));
        request.set_header("x-trace", "c");
        assert_eq!(request.headers, vec![("x-trace".to_string(), "c".to_string())]);
        assert_eq!(request.remove_header("X-Trace"), Some("c".to_string()));
        assert!(request.header("x-trace").is_none());
    }

    #[test]
    fn test_diagnostic_response_is_plain_text() {
        let response = BindingResponse::diagnostic(503, "billing is not running");
        assert!(!response.is_success());
        assert_eq!(response.header("Content-Type"), Some("text/plain; charset=utf-8"));
        assert_eq!(response.text(), "billing is not running");
    }
}
