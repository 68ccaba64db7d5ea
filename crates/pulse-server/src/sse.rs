//! `GET /events`: one SSE stream per viewer.
//!
//! The stream yields the `retry:` hint first. When it is polled again the
//! hint has been handed to the transport, so the session turns `Open` and
//! starts receiving broadcasts. A drained session flushes its queue and then
//! ends the stream. Dropping the stream (client gone, shutdown deadline hit)
//! unregisters and closes the session.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use metrics::counter;
use pulse_telemetry::names;
use tracing::info;

use crate::registry::ClientRegistry;
use crate::server::AppState;
use crate::session::ViewerSession;

/// Unregisters and closes its session on every exit path.
struct SessionGuard {
    session: Arc<ViewerSession>,
    registry: Arc<ClientRegistry>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let _ = self.session.begin_close();
        let _ = self.registry.unregister(self.session.id());
        self.session.close();
        info!(
            session_id = %self.session.id(),
            delivered = self.session.delivered(),
            dropped = self.session.dropped(),
            "viewer disconnected"
        );
    }
}

pub(crate) async fn events_handler(State(state): State<AppState>) -> Response {
    let settings = &state.settings;
    let session = Arc::new(ViewerSession::new(
        settings.session_queue_capacity,
        settings.stall_timeout(),
    ));

    if state.registry.register(Arc::clone(&session)).is_err() {
        return (StatusCode::SERVICE_UNAVAILABLE, "relay is shutting down").into_response();
    }
    counter!(names::VIEWER_CONNECTIONS_TOTAL).increment(1);
    info!(session_id = %session.id(), "viewer connected");

    let guard = SessionGuard {
        session,
        registry: Arc::clone(&state.registry),
    };
    let keep_alive = KeepAlive::new().interval(settings.keep_alive()).text("keep-alive");

    Sse::new(session_stream(guard, settings.retry_hint()))
        .keep_alive(keep_alive)
        .into_response()
}

fn session_stream(
    guard: SessionGuard,
    retry_hint: Duration,
) -> impl Stream<Item = Result<SseEvent, Infallible>> + Send + 'static {
    futures::stream::unfold((guard, false), move |(guard, handshake_sent)| async move {
        if !handshake_sent {
            let hint = SseEvent::default().retry(retry_hint);
            return Some((Ok(hint), (guard, true)));
        }

        let _ = guard.session.mark_open();
        let frame = guard.session.outbox().recv().await?;
        Some((Ok(SseEvent::default().data(&*frame)), (guard, true)))
    })
}
