//! Server-sent event stream of one job's progress.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive},
        Sse,
    },
};
use futures::{Stream, StreamExt};
use reelforge_core::JobEvent;
use tracing::{debug, warn};

use super::jobs::{error_response, ApiError};
use crate::metrics::{SSE_EVENTS_SENT, SSE_STREAMS_ACTIVE, SSE_STREAMS_TOTAL};
use crate::state::AppState;

/// Tracks one open stream; dropping it means the client is gone or the job ended.
struct StreamGuard {
    job_id: String,
}

impl StreamGuard {
    fn open(job_id: &str) -> Self {
        SSE_STREAMS_ACTIVE.inc();
        SSE_STREAMS_TOTAL.inc();
        debug!(job_id = %job_id, "Event stream opened");
        Self {
            job_id: job_id.to_string(),
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        SSE_STREAMS_ACTIVE.dec();
        debug!(job_id = %self.job_id, "Event stream closed");
    }
}

fn to_sse(event: &JobEvent) -> Event {
    let sse = Event::default().event(event.name());
    match serde_json::to_string(event) {
        Ok(data) => sse.data(data),
        Err(e) => {
            warn!(job_id = %event.job_id(), "Failed to serialize job event: {}", e);
            sse.comment("unserializable event")
        }
    }
}

/// Stream a job's events until its terminal event.
///
/// A job that already finished yields its terminal event and closes.
pub async fn job_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let subscription = state.manager().subscribe(&id).map_err(error_response)?;
    let guard = StreamGuard::open(&id);

    let stream = subscription.map(move |event| {
        let _open = &guard;
        SSE_EVENTS_SENT.with_label_values(&[event.name()]).inc();
        Ok(to_sse(&event))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
