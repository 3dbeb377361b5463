//! # Delivery Completion
//!
//! Every message handed to the [`Producer`](crate::clients::Producer) resolves
//! exactly once. The caller picks how to observe it per call: await the
//! [`DeliveryFuture`] returned by `send`, or pass a callback to `send_with`.

use crate::broker::DeliveryReceipt;
use crate::clients::DeliveryError;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::error;

/// Result delivered to a message's completion.
pub type DeliveryResult = Result<DeliveryReceipt, DeliveryError>;

/// Callback form of a completion. Runs on the producer's dispatch task.
pub type DeliveryCallback = Box<dyn FnOnce(DeliveryResult) + Send + 'static>;

enum Slot {
    Future(oneshot::Sender<DeliveryResult>),
    Callback(DeliveryCallback),
}

impl Slot {
    fn resolve(self, result: DeliveryResult) {
        match self {
            Slot::Future(sender) => {
                // The caller may have dropped the future; that is fine.
                let _ = sender.send(result);
            }
            Slot::Callback(callback) => {
                if catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
                    error!("Delivery callback panicked");
                }
            }
        }
    }
}

/// The completion slot carried next to each outbound message.
///
/// A slot dropped before [`complete`](Self::complete) resolves with
/// [`DeliveryError::Dropped`], so abandoned messages still report once.
pub(crate) struct Completion(Option<Slot>);

impl Completion {
    pub(crate) fn future(sender: oneshot::Sender<DeliveryResult>) -> Self {
        Self(Some(Slot::Future(sender)))
    }

    pub(crate) fn callback(callback: DeliveryCallback) -> Self {
        Self(Some(Slot::Callback(callback)))
    }

    /// Resolves the slot. Consumes it, so a message cannot resolve twice.
    pub(crate) fn complete(mut self, result: DeliveryResult) {
        if let Some(slot) = self.0.take() {
            slot.resolve(result);
        }
    }

    /// Discards the slot without resolving it. For messages that never
    /// entered the queue; their caller already got the error.
    pub(crate) fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(slot) = self.0.take() {
            slot.resolve(Err(DeliveryError::Dropped));
        }
    }
}

/// Resolves with the broker's receipt or the reason delivery failed.
///
/// Dropping the future does not cancel the send; the message is still
/// delivered and counted by `flush`.
#[derive(Debug)]
pub struct DeliveryFuture {
    receiver: oneshot::Receiver<DeliveryResult>,
}

impl DeliveryFuture {
    pub(crate) fn new(receiver: oneshot::Receiver<DeliveryResult>) -> Self {
        Self { receiver }
    }
}

impl Future for DeliveryFuture {
    type Output = DeliveryResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(DeliveryError::Dropped)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn receipt() -> DeliveryReceipt {
        DeliveryReceipt {
            topic: "orders".into(),
            partition: 0,
            offset: 3,
        }
    }

    #[tokio::test]
    async fn test_future_completion() {
        let (tx, rx) = oneshot::channel();
        Completion::future(tx).complete(Ok(receipt()));
        assert_eq!(DeliveryFuture::new(rx).await, Ok(receipt()));
    }

    #[tokio::test]
    async fn test_dropped_slot_reports_dropped() {
        let (tx, rx) = oneshot::channel::<DeliveryResult>();
        drop(tx);
        assert_eq!(DeliveryFuture::new(rx).await, Err(DeliveryError::Dropped));
    }

    #[test]
    fn test_callback_completion_and_panic_isolation() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let completion = Completion::callback(Box::new(move |r| sink.lock().unwrap().push(r)));
        completion.complete(Ok(receipt()));
        assert_eq!(seen.lock().unwrap().len(), 1);

        // A panicking callback is contained.
        let panicking = Completion::callback(Box::new(|_| panic!("boom")));
        panicking.complete(Err(DeliveryError::Dropped));
    }

    #[test]
    fn test_abandoned_callback_reports_dropped_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        drop(Completion::callback(Box::new(move |r| sink.lock().unwrap().push(r))));
        assert_eq!(*seen.lock().unwrap(), vec![Err(DeliveryError::Dropped)]);

        let sink = seen.clone();
        Completion::callback(Box::new(move |r| sink.lock().unwrap().push(r))).disarm();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_future_reports_dropped() {
        let (tx, rx) = oneshot::channel();
        drop(Completion::future(tx));
        assert_eq!(DeliveryFuture::new(rx).await, Err(DeliveryError::Dropped));
    }
}
