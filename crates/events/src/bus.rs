//! Keyed publish/subscribe abstraction (mechanics only).
//!
//! The bus distributes job status updates to whoever is watching a given
//! correlation id, typically a server-sent-events response held open by an
//! HTTP handler.
//!
//! ## Delivery guarantees
//!
//! - **Best-effort**: a publish with no subscribers is a no-op, not an error.
//! - **Process-local**: subscribers attached to another process never see the
//!   event. Clients must keep a polling fallback (`GET /jobs/{id}`).
//! - **No persistence**: the job store is the source of truth; the bus only
//!   shortens the time until a watching client learns about a change.
//!
//! ## Lifecycle
//!
//! A bus is created once at process start and shared (`Arc`) with every
//! component that publishes or subscribes. Subscribers own the returned
//! [`Unsubscribe`] handle and must release it when their consumer goes away;
//! dropping the handle releases the subscription as well.

use std::sync::Arc;

use tokio::sync::mpsc;

/// Subscriber callback.
pub type Handler<M> = Box<dyn Fn(&M) + Send + Sync + 'static>;

/// Domain-agnostic keyed event bus.
///
/// Implementations must be safe to share across threads and must never hold
/// an internal lock while invoking handlers.
pub trait EventBus<M>: Send + Sync {
    /// Deliver `message` to every current subscriber of `key`.
    ///
    /// Returns the number of handlers invoked.
    fn publish(&self, key: &str, message: M) -> usize;

    /// Register `handler` for `key`.
    fn subscribe(&self, key: &str, handler: Handler<M>) -> Unsubscribe;

    /// Number of live subscriptions for `key`.
    fn subscriber_count(&self, key: &str) -> usize;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    fn publish(&self, key: &str, message: M) -> usize {
        (**self).publish(key, message)
    }

    fn subscribe(&self, key: &str, handler: Handler<M>) -> Unsubscribe {
        (**self).subscribe(key, handler)
    }

    fn subscriber_count(&self, key: &str) -> usize {
        (**self).subscriber_count(key)
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Calling [`Unsubscribe::unsubscribe`] (or dropping the handle) removes the
/// handler. Removing twice is harmless.
#[must_use = "dropping the handle immediately removes the subscription"]
pub struct Unsubscribe {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Unsubscribe {
    pub fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A handle that owns no subscription (e.g. the bus was already shut down).
    pub fn noop() -> Self {
        Self { release: None }
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl core::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// Bridge a subscription into an async channel.
///
/// Used by streaming handlers: the receiver feeds the response body and the
/// returned [`Unsubscribe`] is dropped together with the stream.
pub fn subscribe_channel<M, B>(bus: &B, key: &str) -> (Unsubscribe, mpsc::UnboundedReceiver<M>)
where
    M: Clone + Send + 'static,
    B: EventBus<M> + ?Sized,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let unsubscribe = bus.subscribe(
        key,
        Box::new(move |message: &M| {
            // Receiver gone means the stream is closing; the handle will be dropped with it.
            let _ = tx.send(message.clone());
        }),
    );
    (unsubscribe, rx)
}
