//! Tarball cache: verified reads, coalesced fetch-on-miss, download counts.

use crate::coalesce::{Role, SingleFlight};
use crate::metrics;
use crate::upstream::UpstreamRegistry;
use bytes::Bytes;
use larder_core::{Dist, PackageDocument, Shasum, TarballKey};
use larder_metadata::{DocumentStore, MetadataError};
use larder_storage::ObjectStore;
use std::sync::Arc;

/// Content type of every tarball response.
pub const TARBALL_CONTENT_TYPE: &str = "application/octet-stream";

/// Optimistic-update attempts for the download counter.
const COUNTER_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TarballError {
    #[error("version {version} of {package} not found")]
    VersionNotFound { package: String, version: String },

    #[error("tarball {key} unavailable: {reason}")]
    Unavailable { key: String, reason: String },
}

impl TarballError {
    fn unavailable(key: &TarballKey, reason: impl Into<String>) -> Self {
        TarballError::Unavailable {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Where a served tarball came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from the binary store after a successful integrity check.
    Hit,
    /// Not in the store; fetched from upstream.
    Miss,
    /// In the store but failed the integrity check; fetched again.
    Corrupt,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
            CacheOutcome::Corrupt => "corrupt",
        }
    }
}

/// A tarball ready to serve.
#[derive(Debug, Clone)]
pub struct Tarball {
    pub key: TarballKey,
    pub data: Bytes,
    pub outcome: CacheOutcome,
}

impl Tarball {
    pub fn content_type(&self) -> &'static str {
        TARBALL_CONTENT_TYPE
    }
}

type FetchResult = Result<Bytes, TarballError>;

/// Owns every write to the binary store.
pub struct TarballCache {
    store: Arc<dyn ObjectStore>,
    upstream: Arc<dyn UpstreamRegistry>,
    local: Arc<dyn DocumentStore>,
    flights: SingleFlight<TarballKey, FetchResult>,
}

impl TarballCache {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        upstream: Arc<dyn UpstreamRegistry>,
        local: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            store,
            upstream,
            local,
            flights: SingleFlight::new(),
        }
    }

    /// Serve `version` of `doc`, from the store when it holds a verified copy
    /// and from upstream otherwise.
    #[tracing::instrument(skip_all, fields(package = %doc.name, version = %version))]
    pub async fn get_tarball(
        &self,
        doc: &PackageDocument,
        version: &str,
    ) -> Result<Tarball, TarballError> {
        let record = doc
            .versions
            .get(version)
            .ok_or_else(|| TarballError::VersionNotFound {
                package: doc.name.clone(),
                version: version.to_string(),
            })?;
        let key = TarballKey::new(&doc.name, version).map_err(|e| TarballError::Unavailable {
            key: format!("{}-{version}", doc.name),
            reason: e.to_string(),
        })?;
        let expected = expected_shasum(&key, &record.dist);

        let outcome = match read_verified(self.store.as_ref(), &key, expected.as_ref()).await {
            Lookup::Verified(data) => {
                tracing::debug!(cache = "hit", key = %key, "tarball served from store");
                metrics::record_tarball(CacheOutcome::Hit.as_str());
                return Ok(Tarball {
                    key,
                    data,
                    outcome: CacheOutcome::Hit,
                });
            }
            Lookup::Absent => CacheOutcome::Miss,
            Lookup::Corrupt => CacheOutcome::Corrupt,
        };
        tracing::debug!(cache = outcome.as_str(), key = %key, "tarball not servable from store");
        metrics::record_tarball(outcome.as_str());

        let fetch = {
            let store = self.store.clone();
            let upstream = self.upstream.clone();
            let key = key.clone();
            let dist = record.dist.clone();
            move || fetch_and_store(store, upstream, key, dist, expected)
        };
        let (result, role) = self.flights.run(key.clone(), fetch).await;
        if role == Role::Follower {
            metrics::TARBALL_COALESCED.inc();
        }

        let data = result.unwrap_or_else(|| Err(TarballError::unavailable(&key, "fetch aborted")))?;
        Ok(Tarball { key, data, outcome })
    }

    /// Bump the `downloads` counter of `version` in the local mirror's copy
    /// of `package`.
    pub async fn record_download(&self, package: &str, version: &str) -> Result<u64, MetadataError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut doc = self.local.get(package).await?;
            let record = doc
                .versions
                .get_mut(version)
                .ok_or_else(|| MetadataError::NotFound(format!("{package}@{version}")))?;
            record.downloads += 1;
            let downloads = record.downloads;

            match self.local.put(&doc).await {
                Ok(_) => return Ok(downloads),
                Err(e) if e.is_conflict() && attempt < COUNTER_ATTEMPTS => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Fire-and-forget [`record_download`](Self::record_download). Failures
    /// are logged and counted, never surfaced.
    pub fn spawn_record_download(self: &Arc<Self>, package: String, version: String) {
        let cache = self.clone();
        tokio::spawn(async move {
            if let Err(e) = cache.record_download(&package, &version).await {
                metrics::DOWNLOAD_COUNTER_FAILURES.inc();
                tracing::warn!(package = %package, version = %version, error = %e, "failed to update download counter");
            }
        });
    }

    /// Number of tarballs held in the binary store.
    pub async fn count(&self) -> Result<usize, larder_storage::StorageError> {
        Ok(self.store.list("").await?.len())
    }
}

fn expected_shasum(key: &TarballKey, dist: &Dist) -> Option<Shasum> {
    match Shasum::from_hex(&dist.shasum) {
        Ok(sum) => Some(sum),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "version record has no usable shasum, integrity unchecked");
            None
        }
    }
}

enum Lookup {
    Verified(Bytes),
    Absent,
    Corrupt,
}

async fn read_verified(store: &dyn ObjectStore, key: &TarballKey, expected: Option<&Shasum>) -> Lookup {
    match store.get(key.as_str()).await {
        Ok(data) => match expected {
            Some(sum) if !sum.verify(&data) => {
                tracing::warn!(key = %key, expected = %sum, "stored tarball failed integrity check");
                Lookup::Corrupt
            }
            _ => Lookup::Verified(data),
        },
        Err(e) if e.is_not_found() => Lookup::Absent,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "tarball store read failed");
            Lookup::Absent
        }
    }
}

/// The single in-flight fetch for `key`.
async fn fetch_and_store(
    store: Arc<dyn ObjectStore>,
    upstream: Arc<dyn UpstreamRegistry>,
    key: TarballKey,
    dist: Dist,
    expected: Option<Shasum>,
) -> FetchResult {
    // A flight that finished between our miss and joining may have filled it.
    if let Lookup::Verified(data) = read_verified(store.as_ref(), &key, expected.as_ref()).await {
        return Ok(data);
    }

    let location = tarball_location(upstream.as_ref(), &key, &dist).await;
    if location.is_empty() {
        return Err(TarballError::unavailable(&key, "version record has no tarball location"));
    }

    let data = upstream
        .get_tarball(&location)
        .await
        .map_err(|e| TarballError::unavailable(&key, e.to_string()))?;

    if let Some(sum) = &expected
        && !sum.verify(&data)
    {
        tracing::error!(key = %key, url = %location, expected = %sum, "downloaded tarball failed integrity check");
        return Err(TarballError::unavailable(&key, "downloaded tarball failed integrity check"));
    }

    metrics::TARBALL_BYTES_FETCHED.inc_by(data.len() as u64);
    if let Err(e) = store.put(key.as_str(), data.clone()).await {
        tracing::warn!(key = %key, error = %e, "failed to store fetched tarball");
    } else {
        tracing::debug!(key = %key, size = data.len(), "tarball stored");
    }
    Ok(data)
}

/// `dist.info`, when present, names an authoritative record whose
/// `dist.tarball` wins over the local one.
async fn tarball_location(upstream: &dyn UpstreamRegistry, key: &TarballKey, dist: &Dist) -> String {
    if let Some(info) = &dist.info {
        match upstream.get_version_info(info).await {
            Ok(record) if !record.dist.tarball.is_empty() => return record.dist.tarball,
            Ok(_) => tracing::warn!(key = %key, url = %info, "version info has no tarball location"),
            Err(e) => tracing::warn!(key = %key, url = %info, error = %e, "version info lookup failed"),
        }
    }
    dist.tarball.clone()
}
