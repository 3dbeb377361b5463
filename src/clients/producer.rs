//! # Producer
//!
//! `send` encodes an order and pushes it onto a bounded outbound queue; a
//! dispatch task drains the queue in order, calls the broker and resolves the
//! message's completion. The in-flight count covers everything between enqueue
//! and completion, which is what [`Producer::flush`] waits on.
//!
//! ```rust
//! use order_stream::broker::BrokerActor;
//! use order_stream::clients::Producer;
//! use order_stream::config::{BrokerConfig, ProducerConfig};
//! use order_stream::model::Order;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (broker, client) = BrokerActor::new(BrokerConfig::default());
//!     tokio::spawn(broker.run());
//!
//!     let producer = Producer::new(client, ProducerConfig::default()).unwrap();
//!     let order = Order::create("david", "chicken burger", 5).unwrap();
//!     let delivery = producer.send("orders", &order).await.unwrap();
//!
//!     assert_eq!(producer.flush(Duration::from_secs(1)).await, 0);
//!     let receipt = delivery.await.unwrap();
//!     assert_eq!((receipt.partition, receipt.offset), (0, 0));
//! }
//! ```

use crate::broker::{BrokerClient, DeliveryReceipt};
use crate::clients::delivery::{Completion, DeliveryFuture};
use crate::clients::{DeliveryError, ProducerError};
use crate::config::ProducerConfig;
use crate::model::Order;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

struct Outbound {
    topic: String,
    value: Vec<u8>,
    order_id: String,
    completion: Completion,
}

/// Asynchronous order producer.
///
/// Dropping a producer detaches the dispatch task: queued messages are still
/// delivered, but nothing waits for them. Call [`close`](Self::close) or
/// [`flush`](Self::flush) first.
pub struct Producer {
    sender: mpsc::Sender<Outbound>,
    in_flight: Arc<watch::Sender<usize>>,
    config: ProducerConfig,
    dispatcher: JoinHandle<()>,
}

impl Producer {
    /// Starts the dispatch task. Must be called inside a tokio runtime.
    pub fn new(broker: BrokerClient, config: ProducerConfig) -> Result<Self, ProducerError> {
        config.validate()?;
        let (sender, receiver) = mpsc::channel(config.buffer_capacity);
        let in_flight = Arc::new(watch::channel(0usize).0);
        let dispatcher = tokio::spawn(dispatch(
            broker,
            receiver,
            in_flight.clone(),
            config.delivery_timeout,
        ));
        info!(buffer = config.buffer_capacity, "Producer started");
        Ok(Self {
            sender,
            in_flight,
            config,
            dispatcher,
        })
    }

    /// Enqueues `order` for `topic` and returns a future for its delivery.
    ///
    /// Returns once the message is queued, not when the broker acknowledges
    /// it. Waits up to `enqueue_timeout` for buffer space.
    #[instrument(skip(self, order), fields(order_id = %order.order_id()))]
    pub async fn send(&self, topic: &str, order: &Order) -> Result<DeliveryFuture, ProducerError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(topic, order, Completion::future(tx)).await?;
        Ok(DeliveryFuture::new(rx))
    }

    /// Like [`send`](Self::send), but hands the outcome to `callback`.
    ///
    /// The callback runs on the dispatch task. A panic inside it is logged and
    /// does not affect other messages.
    #[instrument(skip(self, order, callback), fields(order_id = %order.order_id()))]
    pub async fn send_with<F>(
        &self,
        topic: &str,
        order: &Order,
        callback: F,
    ) -> Result<(), ProducerError>
    where
        F: FnOnce(Result<DeliveryReceipt, DeliveryError>) + Send + 'static,
    {
        self.enqueue(topic, order, Completion::callback(Box::new(callback)))
            .await
    }

    async fn enqueue(
        &self,
        topic: &str,
        order: &Order,
        completion: Completion,
    ) -> Result<(), ProducerError> {
        let value = match encode_for(topic, order) {
            Ok(value) => value,
            Err(e) => {
                completion.disarm();
                return Err(e);
            }
        };
        let message = Outbound {
            topic: topic.to_string(),
            value,
            order_id: order.order_id().to_string(),
            completion,
        };

        // Counted before the queue sees it, so flush cannot miss it.
        self.in_flight.send_modify(|n| *n += 1);
        match self
            .sender
            .send_timeout(message, self.config.enqueue_timeout)
            .await
        {
            Ok(()) => {
                debug!(topic, "Enqueued");
                Ok(())
            }
            Err(e) => {
                self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
                let error = match &e {
                    SendTimeoutError::Timeout(_) => {
                        warn!(topic, "Outbound buffer full");
                        ProducerError::QueueFull(self.config.enqueue_timeout)
                    }
                    SendTimeoutError::Closed(_) => ProducerError::Closed,
                };
                // Never queued: the caller sees the error instead.
                e.into_inner().completion.disarm();
                Err(error)
            }
        }
    }

    /// Number of messages enqueued but not yet resolved.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Waits until every enqueued message has resolved, or `timeout` elapses.
    ///
    /// Returns how many messages are still unresolved; 0 means drained.
    #[instrument(skip(self))]
    pub async fn flush(&self, timeout: Duration) -> usize {
        let mut rx = self.in_flight.subscribe();
        // Err here means the timeout elapsed. The sender lives in self, so
        // wait_for itself cannot fail.
        let _ = tokio::time::timeout(timeout, rx.wait_for(|n| *n == 0)).await;
        let remaining = *rx.borrow();
        if remaining > 0 {
            warn!(remaining, "Flush timed out");
        } else {
            debug!("Flushed");
        }
        remaining
    }

    /// Flushes, then stops the dispatch task. Returns the unresolved count.
    ///
    /// Messages still pending when the timeout elapses are abandoned. Their
    /// futures and callbacks resolve with [`DeliveryError::Dropped`] before
    /// `close` returns.
    pub async fn close(self, timeout: Duration) -> usize {
        let remaining = self.flush(timeout).await;
        drop(self.sender);
        if remaining > 0 {
            warn!(remaining, "Closing producer with undelivered messages");
            self.dispatcher.abort();
        }
        // After an abort this returns once the task, its queue and every
        // pending completion have been dropped.
        let _ = self.dispatcher.await;
        info!("Producer closed");
        remaining
    }
}

fn encode_for(topic: &str, order: &Order) -> Result<Vec<u8>, ProducerError> {
    if topic.trim().is_empty() {
        return Err(ProducerError::InvalidTopic);
    }
    Ok(order.encode()?)
}

async fn dispatch(
    broker: BrokerClient,
    mut receiver: mpsc::Receiver<Outbound>,
    in_flight: Arc<watch::Sender<usize>>,
    delivery_timeout: Duration,
) {
    while let Some(message) = receiver.recv().await {
        let Outbound {
            topic,
            value,
            order_id,
            completion,
        } = message;

        let accept = broker.accept(topic.as_str(), value);
        let result = match tokio::time::timeout(delivery_timeout, accept).await {
            Ok(Ok(receipt)) => {
                debug!(
                    %order_id,
                    topic = %receipt.topic,
                    partition = receipt.partition,
                    offset = receipt.offset,
                    "Delivered"
                );
                Ok(receipt)
            }
            Ok(Err(e)) => {
                warn!(%order_id, %topic, error = %e, "Delivery failed");
                Err(DeliveryError::Broker(e))
            }
            Err(_) => {
                warn!(%order_id, %topic, "Delivery timed out");
                Err(DeliveryError::TimedOut(delivery_timeout))
            }
        };

        completion.complete(result);
        in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
    debug!("Dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockBroker;
    use crate::broker::{BrokerActor, BrokerError};
    use crate::config::BrokerConfig;
    use std::sync::Mutex;

    fn order() -> Order {
        Order::create("david", "chicken burger", 5).unwrap()
    }

    fn receipt(offset: u64) -> DeliveryReceipt {
        DeliveryReceipt {
            topic: "orders".into(),
            partition: 0,
            offset,
        }
    }

    #[tokio::test]
    async fn test_send_resolves_with_receipt() {
        let mock = MockBroker::new();
        mock.expect_accept().return_ok(receipt(0));
        let producer = Producer::new(mock.client(), ProducerConfig::default()).unwrap();

        let delivery = producer.send("orders", &order()).await.unwrap();
        assert_eq!(delivery.await, Ok(receipt(0)));
        assert_eq!(producer.close(Duration::from_secs(1)).await, 0);
        mock.verify();
    }

    #[tokio::test]
    async fn test_rejection_reaches_callback() {
        let mock = MockBroker::new();
        mock.expect_accept()
            .return_err(BrokerError::Rejected("disk full".into()));
        let producer = Producer::new(mock.client(), ProducerConfig::default()).unwrap();

        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        producer
            .send_with("orders", &order(), move |r| *sink.lock().unwrap() = Some(r))
            .await
            .unwrap();

        assert_eq!(producer.flush(Duration::from_secs(1)).await, 0);
        assert_eq!(
            seen.lock().unwrap().clone(),
            Some(Err(DeliveryError::Broker(BrokerError::Rejected(
                "disk full".into()
            ))))
        );
    }

    #[tokio::test]
    async fn test_invalid_topic_is_rejected_before_enqueue() {
        let mock = MockBroker::new();
        let producer = Producer::new(mock.client(), ProducerConfig::default()).unwrap();
        let result = producer.send("  ", &order()).await;
        assert!(matches!(result, Err(ProducerError::InvalidTopic)));
        assert_eq!(producer.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_flush_reports_pending_when_broker_is_slow() {
        // Nothing answers this channel, so deliveries hang until the timeout.
        let (sender, _receiver) = mpsc::channel(8);
        let producer = Producer::new(
            BrokerClient::new(sender),
            ProducerConfig {
                delivery_timeout: Duration::from_millis(300),
                ..ProducerConfig::default()
            },
        )
        .unwrap();

        let delivery = producer.send("orders", &order()).await.unwrap();
        assert_eq!(producer.flush(Duration::from_millis(20)).await, 1);

        assert_eq!(
            delivery.await,
            Err(DeliveryError::TimedOut(Duration::from_millis(300)))
        );
        assert_eq!(producer.flush(Duration::from_millis(20)).await, 0);
    }

    #[tokio::test]
    async fn test_close_resolves_abandoned_callbacks() {
        let (sender, _receiver) = mpsc::channel(8);
        let producer = Producer::new(
            BrokerClient::new(sender),
            ProducerConfig {
                delivery_timeout: Duration::from_secs(5),
                ..ProducerConfig::default()
            },
        )
        .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..3 {
            let sink = seen.clone();
            producer
                .send_with("orders", &order(), move |r| sink.lock().unwrap().push(r))
                .await
                .unwrap();
        }
        let delivery = producer.send("orders", &order()).await.unwrap();

        // One message is at the broker, the rest still queued.
        assert_eq!(producer.close(Duration::from_millis(50)).await, 4);
        assert_eq!(*seen.lock().unwrap(), vec![Err(DeliveryError::Dropped); 3]);
        assert_eq!(delivery.await, Err(DeliveryError::Dropped));
    }

    #[tokio::test]
    async fn test_rejected_enqueue_does_not_run_callback() {
        let mock = MockBroker::new();
        let producer = Producer::new(mock.client(), ProducerConfig::default()).unwrap();
        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();

        let result = producer
            .send_with(" ", &order(), move |_| *flag.lock().unwrap() = true)
            .await;
        assert!(matches!(result, Err(ProducerError::InvalidTopic)));
        assert!(!*called.lock().unwrap());
    }

    #[tokio::test]
    async fn test_full_buffer_fails_with_queue_full() {
        let (sender, _receiver) = mpsc::channel(8);
        let producer = Producer::new(
            BrokerClient::new(sender),
            ProducerConfig {
                buffer_capacity: 1,
                enqueue_timeout: Duration::from_millis(20),
                delivery_timeout: Duration::from_secs(5),
            },
        )
        .unwrap();

        // First message moves to the dispatcher, second fills the buffer.
        let _first = producer.send("orders", &order()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _second = producer.send("orders", &order()).await.unwrap();

        let third = producer.send("orders", &order()).await;
        assert!(matches!(third, Err(ProducerError::QueueFull(_))));
        assert_eq!(producer.in_flight(), 2);
    }

    #[tokio::test]
    async fn test_offsets_follow_send_order() {
        let (broker, client) = BrokerActor::new(BrokerConfig::default());
        tokio::spawn(broker.run());
        let producer = Producer::new(client, ProducerConfig::default()).unwrap();

        let mut deliveries = Vec::new();
        for _ in 0..5 {
            deliveries.push(producer.send("orders", &order()).await.unwrap());
        }
        assert_eq!(producer.flush(Duration::from_secs(1)).await, 0);

        let mut offsets = Vec::new();
        for delivery in deliveries {
            offsets.push(delivery.await.unwrap().offset);
        }
        assert_eq!(offsets, vec![0, 1, 2, 3, 4]);
    }
}
