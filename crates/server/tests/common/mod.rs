//! Common test utilities for API testing with scripted stages.
//!
//! This module provides a test fixture that builds the router in-process over
//! a temporary SQLite store and scripted pipelines, so tests exercise the full
//! HTTP surface without external programs.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use reelforge_core::{
    config::DatabaseConfig, testing::ScriptedStage, Config, JobQueueManager, JobStatus, JobStore,
    PipelineRegistry, PipelineStage, ProgressBroadcaster, RetryConfig, SqliteJobStore,
};

/// Re-export fixtures for test convenience
pub use reelforge_core::testing::fixtures;

/// Test fixture for API testing.
///
/// Registers two pipelines:
/// - `video`: `script` then `render`, which reports progress and produces `/out/video.mp4`
/// - `stuck`: a single stage that blocks until canceled
///
/// Jobs are not picked up automatically; tests run them with [`TestFixture::run_job`]
/// or start a worker pool on [`TestFixture::manager`].
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_job_submission() {
///     let fixture = TestFixture::new();
///
///     let response = fixture.post("/api/v1/jobs", json!({
///         "pipeline": "video",
///         "input": { "topic": "tides" }
///     })).await;
///
///     assert_eq!(response.status, 202);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Queue manager behind the router
    pub manager: Arc<JobQueueManager>,
    pub script: Arc<ScriptedStage>,
    pub render: Arc<ScriptedStage>,
    pub stuck: Arc<ScriptedStage>,
    /// Temporary directory for the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Raw text response, for event streams
#[derive(Debug)]
pub struct TextResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: String,
}

impl TestFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let config = Config {
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            ..Default::default()
        };

        let script = Arc::new(ScriptedStage::succeeding("script").with_weight(20));
        let render = Arc::new(
            ScriptedStage::succeeding("render")
                .with_weight(80)
                .with_progress(vec![50.0])
                .with_artifact("/out/video.mp4"),
        );
        let stuck = Arc::new(ScriptedStage::hanging("wait"));

        let registry = PipelineRegistry::new()
            .with_pipeline(
                "video",
                vec![
                    Arc::clone(&script) as Arc<dyn PipelineStage>,
                    Arc::clone(&render) as Arc<dyn PipelineStage>,
                ],
            )
            .with_pipeline("stuck", vec![Arc::clone(&stuck) as Arc<dyn PipelineStage>]);

        let store: Arc<dyn JobStore> =
            Arc::new(SqliteJobStore::new(&db_path).expect("Failed to create job store"));
        let manager = Arc::new(JobQueueManager::new(
            store,
            registry,
            RetryConfig::immediate(),
            ProgressBroadcaster::default(),
        ));

        let state = Arc::new(reelforge_server::state::AppState::new(
            config,
            Arc::clone(&manager),
        ));
        let router = reelforge_server::api::create_router(state);

        Self {
            router,
            manager,
            script,
            render,
            stuck,
            temp_dir,
        }
    }

    /// Submit a job through the API and return its id.
    pub async fn submit(&self, pipeline: &str) -> String {
        let response = self
            .post(
                "/api/v1/jobs",
                serde_json::json!({ "pipeline": pipeline, "input": {} }),
            )
            .await;
        assert_eq!(response.status, StatusCode::ACCEPTED, "{:?}", response.body);
        response.body["id"]
            .as_str()
            .expect("submission returns an id")
            .to_string()
    }

    /// Run a queued job to its next stored status.
    pub async fn run_job(&self, id: &str) -> JobStatus {
        self.manager
            .process_job(id)
            .await
            .expect("process job")
            .expect("job was queued")
            .status
    }

    /// Run a job in the background.
    pub fn spawn_job(&self, id: &str) -> tokio::task::JoinHandle<JobStatus> {
        let manager = Arc::clone(&self.manager);
        let id = id.to_string();
        tokio::spawn(async move {
            manager
                .process_job(&id)
                .await
                .expect("process job")
                .expect("job was queued")
                .status
        })
    }

    pub async fn wait_for_status(&self, id: &str, status: JobStatus) {
        fixtures::wait_for_status(&self.manager, id, status, Duration::from_secs(5)).await;
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Send a GET request and read the whole body as text.
    ///
    /// For event streams this returns once the stream ends.
    pub async fn get_text(&self, path: &str) -> TextResponse {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        TextResponse {
            status,
            content_type,
            body: String::from_utf8_lossy(&body_bytes).to_string(),
        }
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// One parsed server-sent event.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event: String,
    pub data: Value,
}

/// Parse an event stream body, skipping comments and keep-alives.
pub fn parse_sse(body: &str) -> Vec<SseEvent> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = String::new();
            for line in block.lines() {
                if let Some(name) = line.strip_prefix("event:") {
                    event = Some(name.trim().to_string());
                } else if let Some(chunk) = line.strip_prefix("data:") {
                    data.push_str(chunk.trim_start());
                }
            }
            let event = event?;
            let data = serde_json::from_str(&data).ok()?;
            Some(SseEvent { event, data })
        })
        .collect()
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}

/// Helper to assert a JSON path equals expected value.
#[macro_export]
macro_rules! assert_json_path {
    ($json:expr, $path:expr, $expected:expr) => {
        let actual = &$json[$path];
        assert_eq!(
            actual, &$expected,
            "Path '{}' expected {:?}, got {:?}",
            $path, $expected, actual
        );
    };
}
