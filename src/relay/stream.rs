//! Server side of the `/api/events` stream.
//!
//! Each connection owns a broadcaster [`Subscription`] that forwards events
//! into a bounded channel. The subscription lives inside the stream, so a
//! client disconnect drops the stream and unsubscribes exactly once. A client
//! that falls [`FEED_CAPACITY`] events behind is cut off: its stream ends after
//! the buffered events and the client is expected to reconnect.

use std::convert::Infallible;
use std::sync::Mutex;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::broadcaster::EventBroadcaster;
use super::models::RelayEvent;

pub const KEEP_ALIVE_TEXT: &str = "keep-alive";

/// Events buffered per connection before a slow client is dropped.
pub const FEED_CAPACITY: usize = 256;

/// Subscribe and return the connection's event sequence, starting with a
/// `connected` frame. The subscription is taken before this returns, so no
/// mutation after the call can be missed.
pub fn open_feed(
    broadcaster: &EventBroadcaster,
) -> impl Stream<Item = RelayEvent> + Send + use<> {
    let (tx, mut rx) = mpsc::channel::<RelayEvent>(FEED_CAPACITY);
    let sender = Mutex::new(Some(tx));
    let subscription = broadcaster.subscribe(move |event| {
        let mut sender = sender
            .lock()
            .map_err(|_| anyhow::anyhow!("stream sender poisoned"))?;
        let Some(tx) = sender.as_ref() else {
            anyhow::bail!("stream already cut off");
        };
        match tx.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                // Dropping the sender ends the stream once the buffer drains.
                *sender = None;
                anyhow::bail!("stream client fell {} events behind", FEED_CAPACITY)
            }
            Err(TrySendError::Closed(_)) => anyhow::bail!("stream receiver closed"),
        }
    });
    debug!(subscriber = subscription.id(), "event stream opened");

    async_stream::stream! {
        let _subscription = subscription;
        yield RelayEvent::Connected;
        while let Some(event) = rx.recv().await {
            yield event;
        }
    }
}

/// Serialize one event as an SSE `data:` frame.
pub fn to_sse_event(event: &RelayEvent) -> Option<Event> {
    match Event::default().json_data(event) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(error = %e, "failed to encode stream event");
            None
        }
    }
}

pub fn sse_response(
    broadcaster: &EventBroadcaster,
    keep_alive: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + use<>> {
    let frames = open_feed(broadcaster).filter_map(|event| async move { to_sse_event(&event).map(Ok) });
    Sse::new(frames).keep_alive(KeepAlive::new().interval(keep_alive).text(KEEP_ALIVE_TEXT))
}
