//! Server-Sent Events for catalog changes

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use tracing::info;

/// GET /events - SSE stream of catalog events
///
/// Streams every `GopherEvent` (reports ingested, images created or
/// missing, merges, tag changes) with a heartbeat every 15 seconds.
pub async fn event_stream(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to catalog events");
    gopher_common::sse::create_event_sse_stream("gopher-burrow", &state.event_bus)
}
