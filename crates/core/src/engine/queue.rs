//! Per-cycle bounded work queue.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::HandlerError;

/// Deferred processing of one item by a freshly built handler.
pub(crate) type ProcessFn =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<(), HandlerError>> + Send>;

/// A fetched item that has not yet been bound to its handler name.
pub(crate) struct PendingItem {
    pub id: String,
    pub run: ProcessFn,
}

/// A work item bound to its owning handler for delivery through the queue.
pub struct Envelope {
    handler: Arc<str>,
    item_id: String,
    run: ProcessFn,
}

impl Envelope {
    pub(crate) fn new(handler: Arc<str>, item: PendingItem) -> Self {
        Self {
            handler,
            item_id: item.id,
            run: item.run,
        }
    }

    pub fn handler(&self) -> &str {
        &self.handler
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    /// Split into identity and the processing future.
    pub(crate) fn into_parts(
        self,
        cancel: CancellationToken,
    ) -> (Arc<str>, String, BoxFuture<'static, Result<(), HandlerError>>) {
        let future = (self.run)(cancel);
        (self.handler, self.item_id, future)
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("handler", &self.handler)
            .field("item_id", &self.item_id)
            .finish_non_exhaustive()
    }
}

/// The single writer side of a cycle queue.
pub(crate) struct QueueWriter {
    tx: mpsc::Sender<Envelope>,
}

/// The reader side of a cycle queue.
pub(crate) struct QueueReader {
    rx: mpsc::Receiver<Envelope>,
}

/// Why an envelope could not be enqueued.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum EnqueueError {
    Cancelled,
    Closed,
}

/// Create a queue that blocks writers once `capacity` envelopes are waiting.
pub(crate) fn bounded(capacity: usize) -> (QueueWriter, QueueReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (QueueWriter { tx }, QueueReader { rx })
}

impl QueueWriter {
    /// Enqueue, waiting for space unless cancelled first.
    pub async fn send(
        &self,
        envelope: Envelope,
        cancel: &CancellationToken,
    ) -> Result<(), EnqueueError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EnqueueError::Cancelled),
            sent = self.tx.send(envelope) => sent.map_err(|_| EnqueueError::Closed),
        }
    }

    /// Close the queue for writing.
    pub fn close(self) {
        drop(self.tx);
    }
}

impl QueueReader {
    /// Next envelope, or `None` once the writer closed and the queue drained.
    pub async fn next(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }
}
