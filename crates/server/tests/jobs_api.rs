//! Job API integration tests.
//!
//! These tests drive the router in-process:
//! - submission, lookup and listing
//! - cancel, pause and resume over HTTP
//! - server-sent event streams for live and finished jobs
//! - health, pipelines, status and metrics endpoints

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use common::{parse_sse, TestFixture};
use reelforge_core::{JobStatus, QueueConfig, WorkerPool};

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Submission and lookup
// ============================================================================

#[tokio::test]
async fn test_submit_and_get_job() {
    let fixture = TestFixture::new();

    let response = fixture
        .post(
            "/api/v1/jobs",
            json!({ "pipeline": "video", "input": { "topic": "tides" }, "priority": 5 }),
        )
        .await;
    assert_status!(response, StatusCode::ACCEPTED);
    assert_json_path!(response.body, "status", json!("queued"));
    let id = response.body["id"].as_str().unwrap().to_string();

    let response = fixture.get(&format!("/api/v1/jobs/{}", id)).await;
    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "id", json!(id));
    assert_json_path!(response.body, "pipeline", json!("video"));
    assert_json_path!(response.body, "priority", json!(5));
    assert_json_path!(response.body, "percent", json!(0));
    assert_eq!(response.body["input"]["topic"], "tides");
    assert!(response.body["output_path"].is_null());
}

#[tokio::test]
async fn test_submit_unknown_pipeline() {
    let fixture = TestFixture::new();

    let response = fixture
        .post("/api/v1/jobs", json!({ "pipeline": "podcast" }))
        .await;

    assert_status!(response, StatusCode::BAD_REQUEST);
    assert!(response.body["error"].as_str().unwrap().contains("podcast"));

    let list = fixture.get("/api/v1/jobs").await;
    assert_json_path!(list.body, "total", json!(0));
}

#[tokio::test]
async fn test_submit_malformed_body() {
    let fixture = TestFixture::new();

    let response = fixture.post_raw("/api/v1/jobs", "{not json").await;
    assert!(response.status.is_client_error());

    let response = fixture.post("/api/v1/jobs", json!({ "input": {} })).await;
    assert!(response.status.is_client_error());
}

#[tokio::test]
async fn test_get_unknown_job() {
    let fixture = TestFixture::new();

    let response = fixture.get("/api/v1/jobs/does-not-exist").await;

    assert_status!(response, StatusCode::NOT_FOUND);
    assert!(response.body["error"].is_string());
}

#[tokio::test]
async fn test_completed_job_has_output_path() {
    let fixture = TestFixture::new();
    let id = fixture.submit("video").await;

    assert_eq!(fixture.run_job(&id).await, JobStatus::Completed);

    let response = fixture.get(&format!("/api/v1/jobs/{}", id)).await;
    assert_json_path!(response.body, "status", json!("completed"));
    assert_json_path!(response.body, "percent", json!(100));
    assert_json_path!(response.body, "output_path", json!("/out/video.mp4"));
    assert!(response.body["error"].is_null());
    assert!(response.body["finished_at"].is_string());
}

#[tokio::test]
async fn test_list_jobs_with_filters() {
    let fixture = TestFixture::new();
    let done = fixture.submit("video").await;
    fixture.submit("video").await;
    fixture.submit("stuck").await;
    fixture.run_job(&done).await;

    let response = fixture.get("/api/v1/jobs").await;
    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "total", json!(3));

    let response = fixture.get("/api/v1/jobs?status=queued").await;
    assert_json_path!(response.body, "total", json!(2));

    let response = fixture.get("/api/v1/jobs?status=completed").await;
    assert_json_path!(response.body, "total", json!(1));
    assert_eq!(response.body["jobs"][0]["id"], json!(done));

    let response = fixture.get("/api/v1/jobs?pipeline=stuck").await;
    assert_json_path!(response.body, "total", json!(1));

    let response = fixture.get("/api/v1/jobs?limit=1&offset=1").await;
    assert_eq!(response.body["jobs"].as_array().unwrap().len(), 1);
    assert_json_path!(response.body, "limit", json!(1));
    assert_json_path!(response.body, "offset", json!(1));

    let response = fixture.get("/api/v1/jobs?limit=50000").await;
    assert_json_path!(response.body, "limit", json!(1000));
}

#[tokio::test]
async fn test_list_jobs_rejects_unknown_status() {
    let fixture = TestFixture::new();

    let response = fixture.get("/api/v1/jobs?status=exploded").await;

    assert_status!(response, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Cancel, pause, resume
// ============================================================================

#[tokio::test]
async fn test_cancel_queued_job() {
    let fixture = TestFixture::new();
    let id = fixture.submit("video").await;

    let response = fixture.delete(&format!("/api/v1/jobs/{}", id)).await;
    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "status", json!("canceled"));
    assert!(response.body["error"].is_null());

    // Already finished
    let response = fixture.delete(&format!("/api/v1/jobs/{}", id)).await;
    assert_status!(response, StatusCode::CONFLICT);

    let response = fixture.delete("/api/v1/jobs/does-not-exist").await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_running_job() {
    let fixture = TestFixture::new();
    let id = fixture.submit("stuck").await;
    let handle = fixture.spawn_job(&id);
    tokio::time::timeout(WAIT, fixture.stuck.entered())
        .await
        .unwrap();

    let response = fixture.delete(&format!("/api/v1/jobs/{}", id)).await;
    assert_status!(response, StatusCode::ACCEPTED);
    assert_json_path!(response.body, "requested", json!("cancel"));

    let status = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert_eq!(status, JobStatus::Canceled);

    let response = fixture.get(&format!("/api/v1/jobs/{}", id)).await;
    assert_json_path!(response.body, "status", json!("canceled"));
    assert!(response.body["error"].is_null());
}

#[tokio::test]
async fn test_pause_and_resume() {
    let fixture = TestFixture::new();
    let id = fixture.submit("video").await;

    let response = fixture.post_empty(&format!("/api/v1/jobs/{}/pause", id)).await;
    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "status", json!("paused"));

    // Already paused
    let response = fixture.post_empty(&format!("/api/v1/jobs/{}/pause", id)).await;
    assert_status!(response, StatusCode::CONFLICT);

    let response = fixture.post_empty(&format!("/api/v1/jobs/{}/resume", id)).await;
    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "status", json!("queued"));

    // Only paused jobs can be resumed
    let response = fixture.post_empty(&format!("/api/v1/jobs/{}/resume", id)).await;
    assert_status!(response, StatusCode::CONFLICT);

    assert_eq!(fixture.run_job(&id).await, JobStatus::Completed);
}

#[tokio::test]
async fn test_pause_running_job() {
    let fixture = TestFixture::new();
    let id = fixture.submit("stuck").await;
    let handle = fixture.spawn_job(&id);
    tokio::time::timeout(WAIT, fixture.stuck.entered())
        .await
        .unwrap();

    let response = fixture.post_empty(&format!("/api/v1/jobs/{}/pause", id)).await;
    assert_status!(response, StatusCode::ACCEPTED);
    assert_json_path!(response.body, "requested", json!("pause"));

    let status = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert_eq!(status, JobStatus::Paused);
}

// ============================================================================
// Event streams
// ============================================================================

#[tokio::test]
async fn test_events_for_finished_job() {
    let fixture = TestFixture::new();
    let id = fixture.submit("video").await;
    fixture.run_job(&id).await;

    let response = tokio::time::timeout(
        WAIT,
        fixture.get_text(&format!("/api/v1/jobs/{}/events", id)),
    )
    .await
    .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert!(response
        .content_type
        .unwrap_or_default()
        .starts_with("text/event-stream"));

    let events = parse_sse(&response.body);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "terminal");
    assert_eq!(events[0].data["status"], "completed");
    assert_eq!(events[0].data["output_path"], "/out/video.mp4");
}

#[tokio::test]
async fn test_events_for_unknown_job() {
    let fixture = TestFixture::new();

    let response = fixture.get("/api/v1/jobs/does-not-exist/events").await;

    assert_status!(response, StatusCode::NOT_FOUND);
    assert_eq!(fixture.manager.broadcaster().tracked_jobs(), 0);
}

#[tokio::test]
async fn test_events_stream_live_progress() {
    let fixture = Arc::new(TestFixture::new());
    let id = fixture.submit("video").await;

    let stream = {
        let fixture = Arc::clone(&fixture);
        let path = format!("/api/v1/jobs/{}/events", id);
        tokio::spawn(async move { fixture.get_text(&path).await })
    };

    // Wait for the stream to subscribe before running the job
    let deadline = tokio::time::Instant::now() + WAIT;
    while fixture.manager.broadcaster().subscriber_count(&id) == 0 {
        assert!(tokio::time::Instant::now() < deadline, "stream never subscribed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(fixture.run_job(&id).await, JobStatus::Completed);

    let response = tokio::time::timeout(WAIT, stream).await.unwrap().unwrap();
    let events = parse_sse(&response.body);

    assert!(events.len() > 2);
    assert_eq!(events[0].event, "status");
    assert_eq!(events[0].data["status"], "running");

    let percents: Vec<u64> = events
        .iter()
        .map(|e| e.data["percent"].as_u64().unwrap())
        .collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{:?}", percents);
    // script done (20), render half way (20 + 40)
    assert!(percents.contains(&20));
    assert!(percents.contains(&60));

    let last = events.last().unwrap();
    assert_eq!(last.event, "terminal");
    assert_eq!(last.data["status"], "completed");
    assert_eq!(last.data["percent"], 100);
    assert_eq!(events.iter().filter(|e| e.event == "terminal").count(), 1);

    assert_eq!(fixture.manager.broadcaster().tracked_jobs(), 0);
}

// ============================================================================
// Service endpoints
// ============================================================================

#[tokio::test]
async fn test_health() {
    let fixture = TestFixture::new();

    let response = fixture.get("/api/v1/health").await;

    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "status", json!("ok"));
}

#[tokio::test]
async fn test_list_pipelines() {
    let fixture = TestFixture::new();

    let response = fixture.get("/api/v1/pipelines").await;

    assert_status!(response, StatusCode::OK);
    let pipelines = response.body["pipelines"].as_array().unwrap();
    assert_eq!(pipelines.len(), 2);

    let video = pipelines.iter().find(|p| p["name"] == "video").unwrap();
    let stages: Vec<&str> = video["stages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(stages, vec!["script", "render"]);
    assert_eq!(video["stages"][1]["weight"], 80);
}

#[tokio::test]
async fn test_queue_status() {
    let fixture = TestFixture::new();
    let paused = fixture.submit("video").await;
    fixture.submit("video").await;
    fixture.post_empty(&format!("/api/v1/jobs/{}/pause", paused)).await;

    let response = fixture.get("/api/v1/status").await;

    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "queued", json!(1));
    assert_json_path!(response.body, "paused", json!(1));
    assert_json_path!(response.body, "running", json!(0));
    assert_json_path!(response.body, "workers", json!(QueueConfig::default().workers));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new();
    let id = fixture.submit("video").await;
    fixture.run_job(&id).await;
    fixture.get("/api/v1/health").await;

    let response = fixture.get_text("/metrics").await;

    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.contains("reelforge_http_requests_total"));
    assert!(response.body.contains("reelforge_jobs_by_status"));
    assert!(response.body.contains("reelforge_jobs_submitted_total"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_pool_runs_submitted_jobs() {
    let fixture = TestFixture::new();
    let pool = WorkerPool::new(
        Arc::clone(&fixture.manager),
        QueueConfig {
            workers: 2,
            poll_interval_ms: 20,
        },
    );
    pool.start();

    let ids = vec![
        fixture.submit("video").await,
        fixture.submit("video").await,
        fixture.submit("video").await,
    ];
    for id in &ids {
        fixture.wait_for_status(id, JobStatus::Completed).await;
    }
    pool.stop().await;

    let response = fixture.get("/api/v1/jobs?status=completed").await;
    assert_json_path!(response.body, "total", json!(3));
    assert_eq!(fixture.render.calls(), 3);
    assert_eq!(fixture.script.calls(), 3);
}
