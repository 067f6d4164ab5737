//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:5080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Base URL clients reach this cache at. Written into every rewritten
    /// tarball and version-info URL.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// `Cache-Control` max-age on single-version responses.
    #[serde(default = "default_metadata_max_age_secs")]
    pub metadata_max_age_secs: u64,
}

impl ServerConfig {
    /// Public base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.public_url.trim_end_matches('/')
    }
}

fn default_bind() -> String {
    "127.0.0.1:5080".to_string()
}

fn default_public_url() -> String {
    "http://127.0.0.1:5080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metadata_max_age_secs() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_url: default_public_url(),
            metrics_enabled: default_metrics_enabled(),
            metadata_max_age_secs: default_metadata_max_age_secs(),
        }
    }
}

/// Upstream registry configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Authoritative registry, used for direct document fetches and the
    /// passthrough proxy.
    #[serde(default = "default_registry_url")]
    pub registry_url: String,
    /// Change-feed source the secondary mirror replicates from.
    #[serde(default = "default_replicate_url")]
    pub replicate_url: String,
    /// Timeout applied to every upstream request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_registry_url() -> String {
    "https://registry.npmjs.org".to_string()
}

fn default_replicate_url() -> String {
    "https://replicate.npmjs.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_user_agent() -> String {
    format!("larder/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            registry_url: default_registry_url(),
            replicate_url: default_replicate_url(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

/// On-disk layout. Everything lives under one directory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
}

impl StorageConfig {
    /// Root of the tarball blob store.
    pub fn binary_path(&self) -> PathBuf {
        self.directory.join("binarydb")
    }

    /// Database file of the local mirror.
    pub fn local_mirror_path(&self) -> PathBuf {
        self.directory.join("local.db")
    }

    /// Database file of the secondary (replicated) mirror.
    pub fn replica_mirror_path(&self) -> PathBuf {
        self.directory.join("replica.db")
    }
}

fn default_directory() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
        }
    }
}

/// Secondary mirror replication configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicationConfig {
    #[serde(default = "default_replication_enabled")]
    pub enabled: bool,
    /// Changes requested per feed poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// First retry delay after a failed handshake.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Multiplier applied to the delay on every consecutive failure.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Pause before the live stream resumes after a stream error.
    #[serde(default = "default_stream_retry_ms")]
    pub stream_retry_ms: u64,
    /// Long-poll timeout on the change feed.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl ReplicationConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn stream_retry(&self) -> Duration {
        Duration::from_millis(self.stream_retry_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

fn default_replication_enabled() -> bool {
    true
}

fn default_batch_size() -> u32 {
    200
}

fn default_base_backoff_ms() -> u64 {
    1000
}

fn default_backoff_factor() -> f64 {
    1.1
}

fn default_stream_retry_ms() -> u64 {
    5000
}

fn default_poll_timeout_secs() -> u64 {
    30
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            enabled: default_replication_enabled(),
            batch_size: default_batch_size(),
            base_backoff_ms: default_base_backoff_ms(),
            backoff_factor: default_backoff_factor(),
            stream_retry_ms: default_stream_retry_ms(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
}

impl AppConfig {
    /// Create a test configuration rooted at `directory`.
    ///
    /// **For testing only.** Replication is disabled and the public URL is a
    /// fixed loopback address.
    pub fn for_testing(directory: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            storage: StorageConfig {
                directory: directory.into(),
            },
            replication: ReplicationConfig {
                enabled: false,
                ..ReplicationConfig::default()
            },
        }
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        check_url("server.public_url", &self.server.public_url)?;
        check_url("upstream.registry_url", &self.upstream.registry_url)?;
        if self.replication.enabled {
            check_url("upstream.replicate_url", &self.upstream.replicate_url)?;
        }
        if self.upstream.request_timeout_secs == 0 {
            return Err("upstream.request_timeout_secs cannot be 0".to_string());
        }
        if self.replication.batch_size == 0 {
            return Err("replication.batch_size cannot be 0".to_string());
        }
        let factor = self.replication.backoff_factor;
        if factor.is_nan() || factor <= 1.0 {
            return Err(format!(
                "replication.backoff_factor must be greater than 1.0, got {factor}"
            ));
        }
        if self.replication.base_backoff_ms == 0 {
            return Err("replication.base_backoff_ms cannot be 0".to_string());
        }
        Ok(())
    }
}

fn check_url(field: &str, url: &str) -> Result<(), String> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"));
    match rest {
        Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(()),
        _ => Err(format!("{field} must be an absolute http(s) URL, got {url:?}")),
    }
}
