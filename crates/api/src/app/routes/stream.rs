//! Live job status over Server-Sent Events.
//!
//! One stream per provider correlation id. Each bus event is forwarded as a
//! `data:` frame carrying the JSON status payload; the stream ends after the
//! first terminal event, and the bus subscription is released as soon as the
//! forwarding task exits (terminal event or client disconnect).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Path},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::get,
    Router,
};
use tokio::sync::mpsc::unbounded_channel;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use songforge_events::subscribe_channel;

use crate::app::services::AppServices;

pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub fn router() -> Router {
    Router::new().route("/:correlation_id", get(stream_status))
}

/// GET /stream/:correlation_id
pub async fn stream_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(correlation_id): Path<String>,
) -> Sse<UnboundedReceiverStream<Result<SseEvent, Infallible>>> {
    // Subscribe before the response is returned so no event published after
    // the client connected can be missed.
    let (subscription, mut events) = subscribe_channel(services.bus.as_ref(), &correlation_id);
    let (tx, rx) = unbounded_channel::<Result<SseEvent, Infallible>>();

    tokio::spawn(async move {
        let _subscription = subscription;
        loop {
            tokio::select! {
                _ = tx.closed() => {
                    debug!(correlation_id = %correlation_id, "status stream client disconnected");
                    break;
                }
                next = events.recv() => {
                    let Some(event) = next else { break };
                    let terminal = event.is_terminal();
                    let frame = match SseEvent::default().json_data(&event) {
                        Ok(frame) => frame,
                        Err(_) => continue,
                    };
                    if tx.send(Ok(frame)).is_err() || terminal {
                        break;
                    }
                }
            }
        }
        debug!(correlation_id = %correlation_id, "status stream closed");
    });

    Sse::new(UnboundedReceiverStream::new(rx)).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}
