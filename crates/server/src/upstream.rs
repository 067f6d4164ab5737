//! The upstream registry capability and its HTTP implementation.

use async_trait::async_trait;
use axum::http::{HeaderMap, Method, StatusCode, header};
use bytes::Bytes;
use larder_core::config::UpstreamConfig;
use larder_core::{PackageDocument, VersionRecord};
use serde::de::DeserializeOwned;

/// Errors talking to the upstream registry.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("not found upstream: {url}")]
    NotFound { url: String },

    #[error("upstream returned {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed upstream payload from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("invalid upstream URL: {0}")]
    InvalidUrl(String),
}

impl UpstreamError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, UpstreamError::NotFound { .. })
    }
}

/// A request forwarded verbatim to the upstream registry.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Path plus query string, starting with `/`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The upstream's answer to a [`ProxyRequest`].
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The authoritative registry.
#[async_trait]
pub trait UpstreamRegistry: Send + Sync + 'static {
    /// Fetch the full metadata document of a package.
    async fn get_document(&self, name: &str) -> Result<PackageDocument, UpstreamError>;

    /// Fetch a single version record from an absolute URL (`dist.info`).
    async fn get_version_info(&self, url: &str) -> Result<VersionRecord, UpstreamError>;

    /// Download a tarball from an absolute URL.
    async fn get_tarball(&self, url: &str) -> Result<Bytes, UpstreamError>;

    /// Forward a request unchanged and hand back whatever upstream answers.
    async fn proxy(&self, request: ProxyRequest) -> Result<ProxyResponse, UpstreamError>;
}

/// Copy `headers`, dropping the ones that describe a single connection
/// rather than the message.
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let hop_by_hop = [
        header::CONNECTION,
        header::HOST,
        header::CONTENT_LENGTH,
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
    ];
    let mut out = headers.clone();
    for name in hop_by_hop {
        out.remove(name);
    }
    out.remove("keep-alive");
    out
}

/// URL path segment for a package name. The scope separator is encoded so
/// scoped names stay one segment, as registries expect.
pub fn encode_package_name(name: &str) -> String {
    name.replacen('/', "%2f", 1)
}

/// [`UpstreamRegistry`] over HTTP.
#[derive(Clone)]
pub struct HttpUpstream {
    http: reqwest::Client,
    registry_url: String,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let registry_url = config.registry_url.trim_end_matches('/').to_string();
        reqwest::Url::parse(&registry_url)
            .map_err(|e| UpstreamError::InvalidUrl(format!("{registry_url}: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self { http, registry_url })
    }

    pub fn registry_url(&self) -> &str {
        &self.registry_url
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, UpstreamError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(UpstreamError::NotFound {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(UpstreamError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?)
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, UpstreamError> {
        let body = self.fetch(url).await?;
        serde_json::from_slice(&body).map_err(|e| UpstreamError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl UpstreamRegistry for HttpUpstream {
    async fn get_document(&self, name: &str) -> Result<PackageDocument, UpstreamError> {
        let url = format!("{}/{}", self.registry_url, encode_package_name(name));
        let mut doc: PackageDocument = self.fetch_json(&url).await?;
        if doc.name.is_empty() {
            doc.name = name.to_string();
        }
        tracing::debug!(package = %name, versions = doc.versions.len(), "fetched document upstream");
        Ok(doc)
    }

    async fn get_version_info(&self, url: &str) -> Result<VersionRecord, UpstreamError> {
        self.fetch_json(url).await
    }

    async fn get_tarball(&self, url: &str) -> Result<Bytes, UpstreamError> {
        let data = self.fetch(url).await?;
        tracing::debug!(url = %url, size = data.len(), "downloaded tarball");
        Ok(data)
    }

    async fn proxy(&self, request: ProxyRequest) -> Result<ProxyResponse, UpstreamError> {
        let url = format!("{}{}", self.registry_url, request.path_and_query);
        let response = self
            .http
            .request(request.method, &url)
            .headers(forwardable_headers(&request.headers))
            .body(request.body)
            .send()
            .await?;

        let status = response.status();
        let headers = forwardable_headers(response.headers());
        let body = response.bytes().await?;
        Ok(ProxyResponse {
            status,
            headers,
            body,
        })
    }
}
