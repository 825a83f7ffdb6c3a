//! Update snapshots and subscriber plumbing
//!
//! Every committed evaluation publishes an [`Update`]: the instance id,
//! the committed `data`, the active paths, and the computed values.
//! Subscribers registered with [`Statechart::on_update`] are called after
//! each update that performed at least one (non-quiet) action or
//! transition. [`Statechart::updates`] exposes the same notifications as
//! a [`Stream`] for async consumers.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::machine::{Callback, Statechart};

/// A published snapshot of the instance
///
/// `data` is shared, not copied: the handle stays valid after later
/// commits, which replace the instance's `Arc` rather than mutating the
/// value behind it.
#[derive(Clone, Debug, Serialize)]
pub struct Update {
    /// Instance id (`#<design id>` or `#state_<n>`)
    pub id: String,
    /// Committed user data
    #[serde(serialize_with = "serialize_shared")]
    pub data: Arc<Value>,
    /// Active state paths, depth-first
    pub active: Vec<String>,
    /// Computed values
    pub values: serde_json::Map<String, Value>,
}

fn serialize_shared<S: Serializer>(data: &Arc<Value>, serializer: S) -> Result<S::Ok, S::Error> {
    data.as_ref().serialize(serializer)
}

/// Handle for a registered subscriber
///
/// Dropping the handle does **not** unsubscribe; call
/// [`cancel`](Self::cancel). The subscription dies with the instance
/// either way.
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<HashMap<u64, Callback>>>,
}

impl Subscription {
    /// Remove the subscriber
    pub fn cancel(self) {
        self.remove();
    }

    pub(crate) fn remove(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().remove(&self.id);
        }
    }
}

/// Stream of updates; unsubscribes when dropped
pub struct UpdateStream {
    rx: UnboundedReceiverStream<Update>,
    subscription: Option<Subscription>,
}

impl Stream for UpdateStream {
    type Item = Update;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

impl Drop for UpdateStream {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.remove();
        }
    }
}

impl Statechart {
    /// Register a callback invoked after each notification-worthy update
    ///
    /// Quiet actions and transitions commit state but do not trigger
    /// callbacks. The callback runs outside the engine lock, so it may
    /// freely use the instance's read surface.
    pub fn on_update(&self, callback: impl Fn(&Update) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().insert(id, Arc::new(callback));
        Subscription { id, registry: Arc::downgrade(&self.inner.subscribers) }
    }

    /// Invoke a callback once, synchronously, with the current snapshot
    pub fn get_update(&self, callback: impl FnOnce(&Update)) {
        let update = self.inner.snapshot.read().clone();
        callback(&update);
    }

    /// Notifications as an async stream
    ///
    /// Backed by an unbounded channel: a slow consumer buffers rather
    /// than blocking the engine. Dropping the stream unsubscribes.
    pub fn updates(&self) -> UpdateStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.on_update(move |update| {
            let _ = tx.send(update.clone());
        });
        UpdateStream {
            rx: UnboundedReceiverStream::new(rx),
            subscription: Some(subscription),
        }
    }
}
