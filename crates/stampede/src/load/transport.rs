//! Transport abstraction and reqwest-backed HTTP implementation

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use url::Url;

use super::scenario::HttpMethod;
use crate::config::LoadTestConfig;

/// Redirect hops followed when `follow_redirects` is set
const MAX_REDIRECTS: usize = 10;

/// Transport-level failure (connection refused, timeout, bad URL...)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self(err.to_string())
    }
}

/// Fully interpolated request
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    /// Header names are stored lowercase
    pub headers: BTreeMap<String, String>,
    /// Body decoded as UTF-8, invalid sequences replaced
    pub body: String,
    /// Body length in bytes as received on the wire
    pub bytes: u64,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        Self {
            status,
            headers: BTreeMap::new(),
            bytes: body.len() as u64,
            body,
        }
    }

    /// Response from a raw body; the byte count is taken before decoding
    pub fn from_bytes(status: u16, raw: &[u8]) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: String::from_utf8_lossy(raw).into_owned(),
            bytes: raw.len() as u64,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn byte_len(&self) -> u64 {
        self.bytes
    }
}

/// Sends one request and returns the response
///
/// Implementations must be shareable across virtual users; the load
/// engine never opens sockets itself.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// HTTP transport over a pooled `reqwest::Client`
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Option<Url>,
}

impl ReqwestTransport {
    /// Build from the load configuration: timeout, redirects, TLS
    /// verification, user agent and base URL
    pub fn from_config(config: &LoadTestConfig) -> Result<Self, TransportError> {
        let redirect = if config.follow_redirects {
            Policy::limited(MAX_REDIRECTS)
        } else {
            Policy::none()
        };

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(redirect)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .user_agent(config.user_agent.clone())
            .build()?;

        let base_url = if config.base_url.is_empty() {
            None
        } else {
            Some(
                Url::parse(&config.base_url)
                    .map_err(|e| TransportError(format!("invalid base_url: {e}")))?,
            )
        };

        Ok(Self { client, base_url })
    }

    /// Resolve a step URL; paths starting with `/` are joined to the base URL
    pub fn resolve(&self, url: &str) -> Result<Url, TransportError> {
        match (&self.base_url, url.starts_with('/')) {
            (Some(base), true) => base
                .join(url)
                .map_err(|e| TransportError(format!("invalid url {url}: {e}"))),
            _ => Url::parse(url).map_err(|e| TransportError(format!("invalid url {url}: {e}"))),
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let url = self.resolve(&request.url)?;
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| TransportError(e.to_string()))?;

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let raw = response.bytes().await?;

        let mut parsed = TransportResponse::from_bytes(status, &raw);
        parsed.headers = headers;
        Ok(parsed)
    }
}
