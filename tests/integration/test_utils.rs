//! Test utilities for integration tests.
//!
//! Provides a scanner double that counts reconstructions and can fail chosen
//! frames, an algorithm engine whose release can fail, and a small harness
//! around the router.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use scan_relay::engine::{
    AlgorithmDescriptor, AlgorithmEngine, BuiltinAlgorithms, CaptureDevice, FileProjectStore,
    RawFrame, Reconstructor, SimulatedReconstructor, SimulatedScanner, StandardMeshCodec,
};
use scan_relay::error::EngineError;
use scan_relay::model::{InterchangeMesh, Model};
use scan_relay::server::{create_router, RouterConfig};
use scan_relay::session::{ScannerSession, SessionEngines};

// =============================================================================
// Scanner Double
// =============================================================================

/// Simulated scanner that counts reconstructions and fails selected frames.
pub struct TestScanner {
    inner: SimulatedScanner,
    failing_sequences: HashSet<u64>,
    reconstructions: Arc<AtomicUsize>,
}

impl TestScanner {
    pub fn new() -> Self {
        Self {
            inner: SimulatedScanner::with_grid_size(8),
            failing_sequences: HashSet::new(),
            reconstructions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Frames with these sequence numbers (0-based capture order) fail to reconstruct.
    pub fn failing(mut self, sequences: &[u64]) -> Self {
        self.failing_sequences = sequences.iter().copied().collect();
        self
    }

    pub fn reconstructions(&self) -> usize {
        self.reconstructions.load(Ordering::SeqCst)
    }

    pub fn frames_captured(&self) -> u64 {
        self.inner.frames_captured()
    }
}

struct TestReconstructor {
    inner: SimulatedReconstructor,
    failing_sequences: HashSet<u64>,
    reconstructions: Arc<AtomicUsize>,
}

#[async_trait]
impl Reconstructor for TestReconstructor {
    async fn reconstruct(&self, frame: &RawFrame) -> Result<InterchangeMesh, EngineError> {
        self.reconstructions.fetch_add(1, Ordering::SeqCst);
        if self.failing_sequences.contains(&frame.sequence) {
            return Err(EngineError::Reconstruction(format!(
                "frame {} has too few valid samples",
                frame.sequence
            )));
        }
        self.inner.reconstruct(frame).await
    }
}

#[async_trait]
impl CaptureDevice for TestScanner {
    fn name(&self) -> &str {
        "test scanner"
    }

    async fn capture(&self, with_texture: bool) -> Result<RawFrame, EngineError> {
        self.inner.capture(with_texture).await
    }

    fn create_reconstructor(&self) -> Result<Box<dyn Reconstructor>, EngineError> {
        Ok(Box::new(TestReconstructor {
            inner: SimulatedReconstructor::new(1.0),
            failing_sequences: self.failing_sequences.clone(),
            reconstructions: Arc::clone(&self.reconstructions),
        }))
    }
}

// =============================================================================
// Algorithm Engine Double
// =============================================================================

/// Built-in algorithms, except that releasing a model with exactly
/// `failing_scan_count` scans fails.
pub struct FailingReleaseAlgorithms {
    inner: BuiltinAlgorithms,
    failing_scan_count: usize,
}

impl FailingReleaseAlgorithms {
    pub fn new(failing_scan_count: usize) -> Self {
        Self {
            inner: BuiltinAlgorithms::new(),
            failing_scan_count,
        }
    }
}

#[async_trait]
impl AlgorithmEngine for FailingReleaseAlgorithms {
    fn initialize(&self, algorithm: &str, model: &Model) -> Result<Value, EngineError> {
        self.inner.initialize(algorithm, model)
    }

    async fn run(&self, model: &mut Model, algorithm: &AlgorithmDescriptor) -> Result<(), EngineError> {
        self.inner.run(model, algorithm).await
    }

    async fn release_model(&self, model: &Model) -> Result<(), EngineError> {
        if model.scans.len() == self.failing_scan_count {
            Err(EngineError::Release("engine refused to release model".into()))
        } else {
            Ok(())
        }
    }
}

// =============================================================================
// Test Harness
// =============================================================================

/// Router plus the session and scanner behind it.
pub struct TestApp {
    pub router: Router,
    pub session: Arc<ScannerSession>,
    pub scanner: Option<Arc<TestScanner>>,
    pub save_dir: TempDir,
}

pub struct TestAppBuilder {
    scanner: Option<TestScanner>,
    algorithms: Option<Arc<dyn AlgorithmEngine>>,
    with_save_path: bool,
}

impl TestAppBuilder {
    pub fn scanner(mut self, scanner: TestScanner) -> Self {
        self.scanner = Some(scanner);
        self
    }

    pub fn without_device(mut self) -> Self {
        self.scanner = None;
        self
    }

    pub fn algorithms(mut self, engine: impl AlgorithmEngine + 'static) -> Self {
        self.algorithms = Some(Arc::new(engine));
        self
    }

    pub fn without_save_path(mut self) -> Self {
        self.with_save_path = false;
        self
    }

    pub async fn build(self) -> TestApp {
        let scanner = self.scanner.map(Arc::new);
        let device = scanner
            .clone()
            .map(|s| s as Arc<dyn CaptureDevice>);

        let engines = SessionEngines {
            codec: Arc::new(StandardMeshCodec::new()),
            store: Arc::new(FileProjectStore::new()),
            algorithms: self
                .algorithms
                .unwrap_or_else(|| Arc::new(BuiltinAlgorithms::new())),
        };

        let session = Arc::new(ScannerSession::new(device, engines).unwrap());
        let save_dir = tempfile::tempdir().unwrap();
        if self.with_save_path {
            session
                .set_save_path(Some(save_dir.path().to_path_buf()))
                .await
                .unwrap();
        }

        let router = create_router(
            Arc::clone(&session),
            RouterConfig::new().with_tracing(false),
        );

        TestApp {
            router,
            session,
            scanner,
            save_dir,
        }
    }
}

/// Raw response parts.
pub struct TestResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

impl TestApp {
    pub fn builder() -> TestAppBuilder {
        TestAppBuilder {
            scanner: Some(TestScanner::new()),
            algorithms: None,
            with_save_path: true,
        }
    }

    /// App with a plain test scanner and a temporary save path.
    pub async fn new() -> Self {
        Self::builder().build().await
    }

    pub fn scanner(&self) -> &TestScanner {
        self.scanner.as_deref().unwrap()
    }

    pub async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> TestResponse {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .map(|v| v.to_str().unwrap().to_string());
        let body = response.into_body().collect().await.unwrap().to_bytes();

        TestResponse {
            status,
            content_type,
            body,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send("GET", uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> TestResponse {
        self.send("POST", uri, Some(body)).await
    }

    pub async fn post_empty(&self, uri: &str) -> TestResponse {
        self.send("POST", uri, None).await
    }

    pub async fn delete(&self, uri: &str) -> TestResponse {
        self.send("DELETE", uri, None).await
    }

    /// Create a deferred capture and return its handle.
    pub async fn capture_deferred(&self) -> i64 {
        let response = self.post_empty("/deferred-captures").await;
        assert_eq!(response.status, StatusCode::CREATED);
        response.json()["handle"].as_i64().unwrap()
    }

    /// Advance an operation until done, returning every status.
    pub async fn drive(&self, operation_id: i64) -> Vec<Value> {
        let mut statuses = Vec::new();
        loop {
            let response = self
                .post_empty(&format!("/operations/{}/next", operation_id))
                .await;
            assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
            let advance = response.json();
            statuses.push(advance["status"].clone());
            if advance["done"].as_bool().unwrap() {
                return statuses;
            }
        }
    }
}

/// Read the triangle count from a binary STL body.
pub fn stl_triangle_count(stl: &[u8]) -> u32 {
    u32::from_le_bytes([stl[80], stl[81], stl[82], stl[83]])
}
