//! Per-topic delivery task and its owning handle.
//!
//! Every active subscription runs one background task that reads payloads
//! from the transport's bounded feed channel, decodes them, and invokes the
//! caller-supplied handler. The [`SubscriptionHandle`] owns the task's stop
//! signal; retiring the handle stops the task promptly without aborting an
//! in-flight handler invocation.

use crate::codec;
use bytes::Bytes;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Caller-supplied message handler for one topic.
pub(crate) type MessageHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Owns the delivery task for one topic subscription.
///
/// Held by the subscription registry. Dropping the handle (or calling
/// [`retire`](Self::retire)) signals the task to stop; the task exits after
/// finishing any handler invocation already in progress.
pub(crate) struct SubscriptionHandle {
    topic: String,
    /// Signal the delivery task to stop. `None` once consumed by `retire()`.
    stop_tx: Option<oneshot::Sender<()>>,
    /// Handle to the delivery task.
    _task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Spawn the delivery task for `topic` and return its owning handle.
    ///
    /// `feed_rx` is the receiving half of the transport's bounded per-topic
    /// feed; the transport keeps the sending half and drops it when the
    /// subscription detaches or the connection dies.
    pub(crate) fn spawn(
        topic: String,
        feed_rx: mpsc::Receiver<Bytes>,
        handler: MessageHandler,
    ) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(delivery_loop(topic.clone(), feed_rx, handler, stop_rx));
        Self {
            topic,
            stop_tx: Some(stop_tx),
            _task: task,
        }
    }

    /// Topic this handle's delivery task serves.
    pub(crate) fn topic(&self) -> &str {
        &self.topic
    }

    /// Stop the delivery task.
    ///
    /// Messages still queued in the feed are discarded; an in-flight handler
    /// invocation completes before the task exits.
    pub(crate) fn retire(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        log::debug!("[skiff-link] retired subscription for topic '{}'", self.topic);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Read payloads from the feed and hand them to the handler until stopped.
///
/// The stop signal wins over pending payloads (biased select), so retiring a
/// subscription discards anything still queued. A closed feed means the
/// transport dropped the sending half; the task exits on its own.
async fn delivery_loop(
    topic: String,
    mut feed_rx: mpsc::Receiver<Bytes>,
    handler: MessageHandler,
    mut stop_rx: oneshot::Receiver<()>,
) {
    log::debug!("[skiff-link] delivery task started for topic '{}'", topic);

    loop {
        tokio::select! {
            biased;

            _ = &mut stop_rx => {
                log::debug!("[skiff-link] delivery task for topic '{}' stopped", topic);
                break;
            }

            payload = feed_rx.recv() => {
                match payload {
                    Some(payload) => deliver(&topic, &payload, &handler),
                    None => {
                        log::debug!(
                            "[skiff-link] feed closed for topic '{}', delivery task exiting",
                            topic
                        );
                        break;
                    }
                }
            }
        }
    }
}

/// Decode one payload and invoke the handler, isolating failures to this
/// message: decode errors and handler panics are logged and skipped.
fn deliver(topic: &str, payload: &[u8], handler: &MessageHandler) {
    let text = match codec::decode(payload) {
        Ok(text) => text,
        Err(e) => {
            log::warn!(
                "[skiff-link] dropping undecodable message on topic '{}': {}",
                topic,
                e
            );
            return;
        },
    };

    // The handler is caller code; a panic must not take down the delivery
    // loop.
    if let Err(panic_info) = catch_unwind(AssertUnwindSafe(|| handler(text))) {
        let msg = panic_info
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| panic_info.downcast_ref::<&str>().copied())
            .unwrap_or("unknown panic");
        log::error!(
            "[skiff-link] handler for topic '{}' panicked: {}",
            topic,
            msg
        );
    }
}
