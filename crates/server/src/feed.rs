//! The upstream change feed the secondary mirror replicates from.
//!
//! The feed speaks the CouchDB replication dialect: `GET /` reports the
//! database's `update_seq`, and `GET /_changes` long-polls for changes after a
//! given sequence.

use crate::upstream::UpstreamError;
use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use larder_core::Sequence;
use larder_core::config::UpstreamConfig;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Summary of the upstream database.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedInfo {
    pub update_seq: Sequence,
}

/// One entry of the change feed.
#[derive(Debug, Clone, Deserialize)]
pub struct Change {
    pub id: String,
    pub seq: Sequence,
    #[serde(default)]
    pub deleted: bool,
    /// Full document when requested with `include_docs`.
    #[serde(default)]
    pub doc: Option<Value>,
}

/// A page of changes and the sequence to resume from.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeBatch {
    #[serde(default)]
    pub results: Vec<Change>,
    pub last_seq: Sequence,
}

/// A source of document changes.
#[async_trait]
pub trait ChangeFeed: Send + Sync + 'static {
    /// Identifies this feed in the replica's checkpoint table.
    fn source(&self) -> &str;

    /// Current state of the upstream database.
    async fn info(&self) -> Result<FeedInfo, UpstreamError>;

    /// Up to `limit` changes after `since`, waiting at most `timeout` for the
    /// first one.
    async fn changes(
        &self,
        since: &Sequence,
        limit: u32,
        timeout: Duration,
    ) -> Result<ChangeBatch, UpstreamError>;
}

/// [`ChangeFeed`] over HTTP.
pub struct HttpChangeFeed {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpChangeFeed {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let base_url = config.replicate_url.trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url)
            .map_err(|e| UpstreamError::InvalidUrl(format!("{base_url}: {e}")))?;

        // Per-request timeouts below; long polls outlive the normal one.
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            http,
            base_url,
            request_timeout: config.request_timeout(),
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<Bytes, UpstreamError> {
        let response = request.send().await?;
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
}

fn decode<T: serde::de::DeserializeOwned>(url: &str, body: &[u8]) -> Result<T, UpstreamError> {
    serde_json::from_slice(body).map_err(|e| UpstreamError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl ChangeFeed for HttpChangeFeed {
    fn source(&self) -> &str {
        &self.base_url
    }

    async fn info(&self) -> Result<FeedInfo, UpstreamError> {
        let url = format!("{}/", self.base_url);
        let body = self
            .send(self.http.get(&url).timeout(self.request_timeout), &url)
            .await?;
        decode(&url, &body)
    }

    async fn changes(
        &self,
        since: &Sequence,
        limit: u32,
        timeout: Duration,
    ) -> Result<ChangeBatch, UpstreamError> {
        let url = format!("{}/_changes", self.base_url);
        let request = self
            .http
            .get(&url)
            .query(&[
                ("feed", "longpoll".to_string()),
                ("include_docs", "true".to_string()),
                ("since", since.to_string()),
                ("limit", limit.to_string()),
                ("timeout", timeout.as_millis().to_string()),
            ])
            .timeout(timeout + self.request_timeout);
        let body = self.send(request, &url).await?;
        decode(&url, &body)
    }
}
