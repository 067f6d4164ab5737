//! Server test utilities.

use super::mocks::MockUpstream;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use larder_core::config::AppConfig;
use larder_metadata::DocumentStore;
use larder_server::{AppState, create_router};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub upstream: Arc<MockUpstream>,
    pub local: Arc<dyn DocumentStore>,
    pub replica: Arc<dyn DocumentStore>,
    _temp_dir: TempDir,
}

/// A buffered response.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: bytes::Bytes,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("response body is not JSON")
    }
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server over on-disk stores in a temp directory and a
    /// mock upstream.
    pub async fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let config = AppConfig::for_testing(temp_dir.path());

        let storage = larder_storage::from_config(&config.storage)
            .await
            .expect("Failed to create storage backend");
        let mirrors = larder_metadata::open_mirrors(&config.storage)
            .await
            .expect("Failed to open mirrors");
        let upstream = Arc::new(MockUpstream::new());

        let state = AppState::new(
            config,
            storage,
            mirrors.local.clone(),
            mirrors.replica.clone(),
            upstream.clone(),
        );
        let router = create_router(state.clone());

        Self {
            router,
            state,
            upstream,
            local: mirrors.local,
            replica: mirrors.replica,
            _temp_dir: temp_dir,
        }
    }

    /// Send a request through the router.
    pub async fn request(&self, method: &str, uri: &str, body: Body) -> TestResponse {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(body)
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request("GET", uri, Body::empty()).await
    }

    /// Base URL documents are rewritten to.
    pub fn base_url(&self) -> String {
        self.state.base_url().to_string()
    }
}
