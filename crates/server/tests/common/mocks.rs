//! In-process stand-ins for the upstream registry, the change feed and the
//! document mirrors.

use async_trait::async_trait;
use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use larder_core::{PackageDocument, Sequence, VersionRecord};
use larder_metadata::{
    CheckpointRepo, CollectionInfo, DocumentRepo, DocumentStore, MetadataError, MetadataResult,
};
use larder_server::feed::{Change, ChangeBatch, ChangeFeed, FeedInfo};
use larder_server::upstream::{ProxyRequest, ProxyResponse, UpstreamError, UpstreamRegistry};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::fixtures::{tarball_bytes, upstream_tarball_url};

/// Upstream registry serving canned documents and tarballs, counting calls.
#[derive(Default)]
#[allow(dead_code)]
pub struct MockUpstream {
    documents: Mutex<HashMap<String, PackageDocument>>,
    version_infos: Mutex<HashMap<String, VersionRecord>>,
    tarballs: Mutex<HashMap<String, Bytes>>,
    tarball_delay: Mutex<Option<Duration>>,
    document_calls: AtomicUsize,
    tarball_calls: AtomicUsize,
    tarball_urls: Mutex<Vec<String>>,
    proxied: Mutex<Vec<ProxyRequest>>,
}

#[allow(dead_code)]
impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `doc` and a matching tarball for each of its versions.
    pub fn add_package(&self, doc: PackageDocument) {
        for version in doc.versions.keys() {
            self.set_tarball(
                &upstream_tarball_url(&doc.name, version),
                tarball_bytes(&doc.name, version),
            );
        }
        self.add_document(doc);
    }

    /// Serve `doc` without any tarballs.
    pub fn add_document(&self, doc: PackageDocument) {
        self.documents
            .lock()
            .unwrap()
            .insert(doc.name.clone(), doc);
    }

    pub fn set_tarball(&self, url: &str, data: Bytes) {
        self.tarballs.lock().unwrap().insert(url.to_string(), data);
    }

    pub fn set_version_info(&self, url: &str, record: VersionRecord) {
        self.version_infos
            .lock()
            .unwrap()
            .insert(url.to_string(), record);
    }

    /// Make every tarball download take `delay`.
    pub fn set_tarball_delay(&self, delay: Duration) {
        *self.tarball_delay.lock().unwrap() = Some(delay);
    }

    pub fn document_calls(&self) -> usize {
        self.document_calls.load(Ordering::SeqCst)
    }

    pub fn tarball_calls(&self) -> usize {
        self.tarball_calls.load(Ordering::SeqCst)
    }

    /// URLs tarballs were downloaded from, in order.
    pub fn tarball_urls(&self) -> Vec<String> {
        self.tarball_urls.lock().unwrap().clone()
    }

    pub fn proxied(&self) -> Vec<ProxyRequest> {
        self.proxied.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpstreamRegistry for MockUpstream {
    async fn get_document(&self, name: &str) -> Result<PackageDocument, UpstreamError> {
        self.document_calls.fetch_add(1, Ordering::SeqCst);
        self.documents
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| UpstreamError::NotFound {
                url: format!("mock://registry/{name}"),
            })
    }

    async fn get_version_info(&self, url: &str) -> Result<VersionRecord, UpstreamError> {
        self.version_infos
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| UpstreamError::NotFound {
                url: url.to_string(),
            })
    }

    async fn get_tarball(&self, url: &str) -> Result<Bytes, UpstreamError> {
        self.tarball_calls.fetch_add(1, Ordering::SeqCst);
        self.tarball_urls.lock().unwrap().push(url.to_string());
        let delay = *self.tarball_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.tarballs
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| UpstreamError::NotFound {
                url: url.to_string(),
            })
    }

    async fn proxy(&self, request: ProxyRequest) -> Result<ProxyResponse, UpstreamError> {
        let status = if request.method == Method::PUT {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        };
        let body = json!({
            "method": request.method.as_str(),
            "path": request.path_and_query,
            "body_len": request.body.len(),
        });
        self.proxied.lock().unwrap().push(request);

        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("x-upstream", "mock".parse().unwrap());
        Ok(ProxyResponse {
            status,
            headers,
            body: Bytes::from(serde_json::to_vec(&body).unwrap()),
        })
    }
}

/// Document mirror held in memory. Revisions look like `{generation}-{label}`.
#[allow(dead_code)]
pub struct MemoryDocumentStore {
    label: String,
    docs: Mutex<HashMap<String, (u64, PackageDocument)>>,
    checkpoints: Mutex<HashMap<String, Sequence>>,
    update_seq: AtomicU64,
    gets: AtomicUsize,
    fail_puts: AtomicBool,
    rejected: Mutex<HashSet<String>>,
}

#[allow(dead_code)]
impl MemoryDocumentStore {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            docs: Mutex::new(HashMap::new()),
            checkpoints: Mutex::new(HashMap::new()),
            update_seq: AtomicU64::new(0),
            gets: AtomicUsize::new(0),
            fail_puts: AtomicBool::new(false),
            rejected: Mutex::new(HashSet::new()),
        }
    }

    /// Number of `get` calls so far.
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Make every subsequent `put` fail.
    pub fn fail_puts(&self) {
        self.fail_puts.store(true, Ordering::SeqCst);
    }

    /// Make `put` fail for one document until [`Self::accept_puts`].
    pub fn reject_puts_for(&self, name: &str) {
        self.rejected.lock().unwrap().insert(name.to_string());
    }

    /// Undo every injected `put` failure.
    pub fn accept_puts(&self) {
        self.fail_puts.store(false, Ordering::SeqCst);
        self.rejected.lock().unwrap().clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.docs.lock().unwrap().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.docs.lock().unwrap().len()
    }

    fn revision(&self, generation: u64) -> String {
        format!("{generation}-{}", self.label)
    }
}

#[async_trait]
impl DocumentRepo for MemoryDocumentStore {
    async fn get(&self, name: &str) -> MetadataResult<PackageDocument> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let docs = self.docs.lock().unwrap();
        let (generation, doc) = docs
            .get(name)
            .ok_or_else(|| MetadataError::NotFound(name.to_string()))?;
        let mut doc = doc.clone();
        doc.revision = Some(self.revision(*generation));
        Ok(doc)
    }

    async fn put(&self, doc: &PackageDocument) -> MetadataResult<String> {
        if self.fail_puts.load(Ordering::SeqCst)
            || self.rejected.lock().unwrap().contains(&doc.name)
        {
            return Err(MetadataError::Internal("injected put failure".to_string()));
        }

        let mut docs = self.docs.lock().unwrap();
        let current = docs.get(&doc.name).map(|(generation, _)| *generation);
        if let Some(expected) = &doc.revision {
            let current_rev = current.map(|g| self.revision(g)).unwrap_or_default();
            if *expected != current_rev {
                return Err(MetadataError::Conflict {
                    name: doc.name.clone(),
                    expected: expected.clone(),
                    current: current_rev,
                });
            }
        }

        let generation = current.unwrap_or(0) + 1;
        docs.insert(
            doc.name.clone(),
            (generation, doc.clone().without_revision()),
        );
        self.update_seq.fetch_add(1, Ordering::SeqCst);
        Ok(self.revision(generation))
    }

    async fn delete(&self, name: &str) -> MetadataResult<bool> {
        let removed = self.docs.lock().unwrap().remove(name).is_some();
        if removed {
            self.update_seq.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }

    async fn info(&self) -> MetadataResult<CollectionInfo> {
        Ok(CollectionInfo {
            name: self.label.clone(),
            doc_count: self.docs.lock().unwrap().len() as u64,
            update_seq: self.update_seq.load(Ordering::SeqCst),
        })
    }
}

#[async_trait]
impl CheckpointRepo for MemoryDocumentStore {
    async fn checkpoint(&self, source: &str) -> MetadataResult<Option<Sequence>> {
        Ok(self.checkpoints.lock().unwrap().get(source).cloned())
    }

    async fn set_checkpoint(&self, source: &str, seq: &Sequence) -> MetadataResult<()> {
        self.checkpoints
            .lock()
            .unwrap()
            .insert(source.to_string(), seq.clone());
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn migrate(&self) -> MetadataResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        Ok(())
    }

    async fn close(&self) {}
}

/// Source name the scripted feed reports.
pub const FEED_SOURCE: &str = "mock://feed";

/// Change feed replaying scripted answers.
///
/// `info` answers from its script and fails once it runs dry. `changes`
/// answers from its script and, once it runs dry, behaves like an idle long
/// poll: it waits out the timeout and returns an empty batch.
#[derive(Default)]
#[allow(dead_code)]
pub struct ScriptedFeed {
    info_script: Mutex<VecDeque<Result<u64, u16>>>,
    change_script: Mutex<VecDeque<Result<ChangeBatch, u16>>>,
    info_calls: Mutex<Vec<Instant>>,
    change_calls: Mutex<Vec<Sequence>>,
}

#[allow(dead_code)]
impl ScriptedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `count` failed handshakes.
    pub fn fail_info(&self, count: usize) {
        let mut script = self.info_script.lock().unwrap();
        for _ in 0..count {
            script.push_back(Err(503));
        }
    }

    /// Queue a successful handshake reporting `update_seq`.
    pub fn succeed_info(&self, update_seq: u64) {
        self.info_script.lock().unwrap().push_back(Ok(update_seq));
    }

    pub fn push_batch(&self, batch: ChangeBatch) {
        self.change_script.lock().unwrap().push_back(Ok(batch));
    }

    pub fn push_stream_error(&self) {
        self.change_script.lock().unwrap().push_back(Err(502));
    }

    /// When each `info` call happened.
    pub fn info_calls(&self) -> Vec<Instant> {
        self.info_calls.lock().unwrap().clone()
    }

    /// The `since` of each `changes` call.
    pub fn change_calls(&self) -> Vec<Sequence> {
        self.change_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangeFeed for ScriptedFeed {
    fn source(&self) -> &str {
        FEED_SOURCE
    }

    async fn info(&self) -> Result<FeedInfo, UpstreamError> {
        self.info_calls.lock().unwrap().push(Instant::now());
        let next = self
            .info_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(503));
        match next {
            Ok(update_seq) => Ok(FeedInfo {
                update_seq: Sequence::from(update_seq),
            }),
            Err(status) => Err(UpstreamError::Status {
                url: format!("{FEED_SOURCE}/"),
                status,
            }),
        }
    }

    async fn changes(
        &self,
        since: &Sequence,
        _limit: u32,
        timeout: Duration,
    ) -> Result<ChangeBatch, UpstreamError> {
        self.change_calls.lock().unwrap().push(since.clone());
        let next = self.change_script.lock().unwrap().pop_front();
        match next {
            Some(Ok(batch)) => Ok(batch),
            Some(Err(status)) => Err(UpstreamError::Status {
                url: format!("{FEED_SOURCE}/_changes"),
                status,
            }),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(ChangeBatch {
                    results: Vec::new(),
                    last_seq: since.clone(),
                })
            }
        }
    }
}

/// A change carrying `doc` as the feed would send it.
#[allow(dead_code)]
pub fn doc_change(seq: u64, doc: &PackageDocument) -> Change {
    let mut value = serde_json::to_value(doc).unwrap();
    value["_id"] = json!(doc.name);
    value["_rev"] = json!(format!("{seq}-upstream"));
    Change {
        id: doc.name.clone(),
        seq: Sequence::from(seq),
        deleted: false,
        doc: Some(value),
    }
}

/// A deletion of `id`.
#[allow(dead_code)]
pub fn deleted_change(seq: u64, id: &str) -> Change {
    Change {
        id: id.to_string(),
        seq: Sequence::from(seq),
        deleted: true,
        doc: None,
    }
}

/// A batch of `changes` ending at the last one's sequence.
#[allow(dead_code)]
pub fn batch(changes: Vec<Change>) -> ChangeBatch {
    let last_seq = changes
        .last()
        .map(|c| c.seq.clone())
        .unwrap_or_else(Sequence::zero);
    ChangeBatch {
        results: changes,
        last_seq,
    }
}
