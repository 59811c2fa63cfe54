use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use reelforge_core::{queue::PipelineInfo, QueueStatus};

use super::jobs::{error_response, ErrorResponse};
use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
pub struct PipelinesResponse {
    pub pipelines: Vec<PipelineInfo>,
}

/// List registered pipelines and their stages
pub async fn list_pipelines(State(state): State<Arc<AppState>>) -> Json<PipelinesResponse> {
    Json(PipelinesResponse {
        pipelines: state.manager().registry().describe(),
    })
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub workers: usize,
    #[serde(flatten)]
    pub queue: QueueStatus,
}

/// Queue activity snapshot
pub async fn queue_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, (StatusCode, Json<ErrorResponse>)> {
    let queue = state.manager().status().map_err(error_response)?;
    Ok(Json(StatusResponse {
        workers: state.config().queue.workers,
        queue,
    }))
}

/// Prometheus scrape endpoint
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
