//! Server-Sent Events subscription
//!
//! `GET /v1/events` opens a long-lived stream. The first frame is always a
//! `Snapshot` of current state; every later frame is a `SyncEvent` named by
//! its type, or a keepalive comment from the broadcaster.

use axum::{
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use fleetsync_core::SubscriberId;
use fleetsync_events::{EventBroadcaster, StreamFrame};
use futures_util::stream::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;

use crate::{coordinator::Coordinator, error::ApiResult, state::AppState};

/// Removes the subscriber as soon as the HTTP stream is dropped, instead of
/// waiting for the next failed write to notice.
struct SubscriberGuard {
    broadcaster: EventBroadcaster,
    id: SubscriberId,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.id);
    }
}

fn to_sse(frame: StreamFrame) -> Event {
    match frame {
        StreamFrame::Event(event) => match serde_json::to_string(event.as_ref()) {
            Ok(data) => Event::default().event(event.event_type()).data(data),
            Err(e) => {
                tracing::error!(error = %e, event_type = event.event_type(), "Failed to encode event");
                Event::default().comment("encode-error")
            }
        },
        StreamFrame::Keepalive => Event::default().comment("keepalive"),
    }
}

/// GET /v1/events - Subscribe to state-change events
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/events",
    tag = "Events",
    responses(
        (status = 200, description = "text/event-stream of SyncEvent frames, starting with a Snapshot"),
    ),
))]
pub async fn subscribe(
    State(coordinator): State<Arc<Coordinator>>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let subscription = coordinator.subscribe()?;
    let guard = SubscriberGuard {
        broadcaster: coordinator.broadcaster().clone(),
        id: subscription.id,
    };
    tracing::debug!(subscriber_id = %subscription.id, "SSE stream opened");

    // Frames are pulled only as fast as the connection accepts them, which
    // is what the broadcaster's staleness check observes.
    let stream = subscription.map(move |frame| {
        let _held = &guard;
        Ok(to_sse(frame))
    });

    Ok(Sse::new(stream))
}

pub fn create_router(state: AppState) -> Router {
    Router::new().route("/", get(subscribe)).with_state(state)
}
