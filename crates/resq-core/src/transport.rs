//! HTTP transport seam.
//!
//! The core never talks to the network directly; it calls a [`Transport`].
//! [`CurlTransport`] is the default implementation (libcurl, run on the
//! blocking pool), also used by the CLI's connectivity probe.

use std::str;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::retry::RequestError;

/// Longest response body kept on an HTTP error, for logs and classification.
const ERROR_BODY_LIMIT: usize = 512;

/// Where and how a payload is sent. Stored with queued operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub method: String,
    pub url: String,
    /// Extra request headers as `(name, value)` pairs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
}

/// Invalid endpoint description.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("unsupported URL scheme {0}; expected http or https")]
    UnsupportedScheme(String),
    #[error("invalid HTTP method {0:?}")]
    InvalidMethod(String),
}

impl EndpointDescriptor {
    /// Validate and normalise a method + URL pair.
    pub fn new(method: &str, url: &str) -> Result<Self, EndpointError> {
        let method = method.trim().to_ascii_uppercase();
        if method.is_empty() || !method.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(EndpointError::InvalidMethod(method));
        }
        let parsed = url::Url::parse(url).map_err(|source| EndpointError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(EndpointError::UnsupportedScheme(parsed.scheme().to_string()));
        }
        Ok(Self {
            method,
            url: parsed.into(),
            headers: Vec::new(),
        })
    }

    pub fn post(url: &str) -> Result<Self, EndpointError> {
        Self::new("POST", url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Successful (2xx) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Sends one request. Implementations report failures as [`RequestError`] so
/// the classifier can inspect them; they must not retry on their own.
#[async_trait]
pub trait Transport: Send + Sync {
    /// `idempotency_key` is forwarded so the server can drop duplicate
    /// deliveries of a replayed operation.
    async fn send(
        &self,
        endpoint: &EndpointDescriptor,
        payload: &[u8],
        idempotency_key: Option<&str>,
    ) -> Result<Response, RequestError>;
}

/// libcurl-backed transport.
#[derive(Debug, Clone)]
pub struct CurlTransport {
    pub connect_timeout: Duration,
    pub timeout: Duration,
}

impl Default for CurlTransport {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            timeout: Duration::from_secs(30),
        }
    }
}

impl CurlTransport {
    /// Blocking send. Call from `spawn_blocking` if used from async code.
    fn perform(
        &self,
        endpoint: &EndpointDescriptor,
        payload: &[u8],
        idempotency_key: Option<&str>,
    ) -> Result<Response, RequestError> {
        let mut body: Vec<u8> = Vec::new();

        let mut easy = curl::easy::Easy::new();
        easy.url(&endpoint.url)?;
        easy.custom_request(&endpoint.method)?;
        easy.follow_location(true)?;
        easy.connect_timeout(self.connect_timeout)?;
        easy.timeout(self.timeout)?;
        if endpoint.method != "GET" && endpoint.method != "HEAD" {
            easy.post_fields_copy(payload)?;
        }
        if endpoint.method == "HEAD" {
            easy.nobody(true)?;
        }

        let mut list = curl::easy::List::new();
        for (k, v) in &endpoint.headers {
            list.append(&format!("{}: {}", k.trim(), v.trim()))?;
        }
        if let Some(id) = idempotency_key {
            list.append(&format!("Idempotency-Key: {id}"))?;
        }
        easy.http_headers(list)?;

        {
            let mut transfer = easy.transfer();
            transfer.write_function(|data| {
                body.extend_from_slice(data);
                Ok(data.len())
            })?;
            transfer.perform()?;
        }

        let code = easy.response_code()? as u16;
        if !(200..300).contains(&code) {
            let text = String::from_utf8_lossy(&body[..body.len().min(ERROR_BODY_LIMIT)]).into_owned();
            return Err(RequestError::Http {
                status: code,
                body: (!text.is_empty()).then_some(text),
            });
        }
        Ok(Response { status: code, body })
    }

    /// HEAD `url` and report whether anything answered. Any HTTP status counts
    /// as reachable; only transport failures mean offline.
    pub async fn probe(&self, url: &str) -> bool {
        let endpoint = match EndpointDescriptor::new("HEAD", url) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(url, "invalid probe URL: {}", e);
                return false;
            }
        };
        match self.send(&endpoint, &[], None).await {
            Ok(_) | Err(RequestError::Http { .. }) => true,
            Err(e) => {
                tracing::debug!(url, error = %e, "connectivity probe failed");
                false
            }
        }
    }
}

#[async_trait]
impl Transport for CurlTransport {
    async fn send(
        &self,
        endpoint: &EndpointDescriptor,
        payload: &[u8],
        idempotency_key: Option<&str>,
    ) -> Result<Response, RequestError> {
        let this = self.clone();
        let endpoint = endpoint.clone();
        let payload = payload.to_vec();
        let idempotency_key = idempotency_key.map(str::to_owned);
        tokio::task::spawn_blocking(move || {
            this.perform(&endpoint, &payload, idempotency_key.as_deref())
        })
        .await
        .map_err(|e| RequestError::transport(format!("transport task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_normalises_method() {
        let e = EndpointDescriptor::new(" post ", "https://meals.example.com/expenses/add").unwrap();
        assert_eq!(e.method, "POST");
        assert_eq!(e.url, "https://meals.example.com/expenses/add");
    }

    #[test]
    fn endpoint_rejects_bad_input() {
        assert!(matches!(
            EndpointDescriptor::new("POST", "ftp://example.com/x"),
            Err(EndpointError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            EndpointDescriptor::new("PO ST", "https://example.com/x"),
            Err(EndpointError::InvalidMethod(_))
        ));
        assert!(matches!(
            EndpointDescriptor::new("POST", "::"),
            Err(EndpointError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn endpoint_json_omits_empty_headers() {
        let e = EndpointDescriptor::post("https://example.com/x").unwrap();
        let json = serde_json::to_value(&e).unwrap();
        assert!(json.get("headers").is_none());
        let with = e.with_header("X-Csrf", "abc");
        let json = serde_json::to_value(&with).unwrap();
        assert_eq!(json["headers"][0][0], "X-Csrf");
    }

    #[tokio::test]
    async fn probe_of_unreachable_port_is_offline() {
        let t = CurlTransport {
            connect_timeout: Duration::from_secs(1),
            timeout: Duration::from_secs(2),
        };
        // Port 9 (discard) on localhost is closed on any sane test host.
        assert!(!t.probe("http://127.0.0.1:9/").await);
    }
}
