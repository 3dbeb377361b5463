use crate::broker::{BrokerActor, BrokerClient, DeliveryReceipt};
use crate::clients::{
    Consumer, ConsumerError, DeliveryError, OrderHandler, Producer, ProducerError, RunStats,
};
use crate::config::{BrokerConfig, ConfigError, ConsumerConfig, ProducerConfig};
use crate::lifecycle::Shutdown;
use crate::model::Order;
use thiserror::Error;
use tracing::{error, info, warn};

/// Failure of one of the runnable units.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Producer(#[from] ProducerError),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("{0} message(s) still undelivered at exit")]
    Undelivered(usize),

    #[error(transparent)]
    Consumer(#[from] ConsumerError),
}

/// Runs an in-process broker and hands out clients connected to it.
///
/// `OrderPipeline` is responsible for:
/// - **Lifecycle Management**: starting the broker task and stopping it
/// - **Dependency Wiring**: every producer and consumer it builds talks to the same broker
///
/// # Example
///
/// ```rust
/// use order_stream::config::{BrokerConfig, ProducerConfig};
/// use order_stream::lifecycle::OrderPipeline;
/// use order_stream::model::Order;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let pipeline = OrderPipeline::new(BrokerConfig::default()).unwrap();
///     let producer = pipeline.producer(ProducerConfig::default()).unwrap();
///
///     let order = Order::create("david", "chicken burger", 5).unwrap();
///     let delivery = producer.send("orders", &order).await.unwrap();
///     assert_eq!(producer.close(Duration::from_secs(1)).await, 0);
///     assert_eq!(delivery.await.unwrap().offset, 0);
///
///     pipeline.shutdown().await.unwrap();
/// }
/// ```
pub struct OrderPipeline {
    broker: BrokerClient,
    handle: tokio::task::JoinHandle<()>,
}

impl OrderPipeline {
    /// Validates `config` and spawns the broker. Must be called inside a runtime.
    pub fn new(config: BrokerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (actor, broker) = BrokerActor::new(config);
        let handle = tokio::spawn(actor.run());
        Ok(Self { broker, handle })
    }

    pub fn broker(&self) -> BrokerClient {
        self.broker.clone()
    }

    pub fn producer(&self, config: ProducerConfig) -> Result<Producer, ProducerError> {
        Producer::new(self.broker(), config)
    }

    pub fn consumer(&self, config: ConsumerConfig) -> Result<Consumer, ConsumerError> {
        Consumer::new(self.broker(), config)
    }

    /// Stops the broker and waits for its task.
    ///
    /// Clients still holding a [`BrokerClient`] see
    /// [`BrokerError::Unavailable`](crate::broker::BrokerError::Unavailable) afterwards.
    ///
    /// # Returns
    ///
    /// - `Ok(())` if the broker stopped cleanly
    /// - `Err(String)` if the broker task panicked
    pub async fn shutdown(self) -> Result<(), String> {
        info!("Shutting down pipeline...");
        if let Err(e) = self.broker.shutdown().await {
            // Already gone; the join below tells us how it ended.
            warn!(error = %e, "Broker was not running");
        }
        if let Err(e) = self.handle.await {
            error!("Broker task failed: {:?}", e);
            return Err(format!("Broker task failed: {:?}", e));
        }
        info!("Pipeline shutdown complete.");
        Ok(())
    }
}

/// Producer unit: sends one order, drains and exits.
///
/// The close is bounded by `delivery_timeout`. Anything still pending then
/// is reported as [`RunError::Undelivered`].
pub async fn run_producer(
    broker: BrokerClient,
    config: ProducerConfig,
    topic: &str,
    order: &Order,
) -> Result<DeliveryReceipt, RunError> {
    let flush_timeout = config.delivery_timeout;
    let producer = Producer::new(broker, config)?;
    let delivery = producer.send(topic, order).await?;

    let remaining = producer.close(flush_timeout).await;
    if remaining > 0 {
        return Err(RunError::Undelivered(remaining));
    }
    let receipt = delivery.await?;
    info!(
        order_id = %order.order_id(),
        topic = %receipt.topic,
        partition = receipt.partition,
        offset = receipt.offset,
        "Order delivered"
    );
    Ok(receipt)
}

/// Consumer unit: subscribes to `topics` and processes orders until
/// `shutdown` fires. The consumer is closed on every exit path.
pub async fn run_consumer<H>(
    broker: BrokerClient,
    config: ConsumerConfig,
    topics: &[&str],
    handler: &mut H,
    shutdown: &Shutdown,
) -> Result<RunStats, RunError>
where
    H: OrderHandler + ?Sized,
{
    let mut consumer = Consumer::new(broker, config)?;
    let outcome = match consumer.subscribe(topics).await {
        Ok(()) => consumer.run(handler, shutdown).await,
        Err(e) => Err(e),
    };
    let closed = consumer.close().await;
    let stats = outcome?;
    closed?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerError;
    use crate::lifecycle::shutdown;

    #[tokio::test]
    async fn test_pipeline_shutdown_stops_broker() {
        let pipeline = OrderPipeline::new(BrokerConfig::default()).unwrap();
        let broker = pipeline.broker();
        pipeline.shutdown().await.unwrap();
        assert_eq!(
            broker.accept("orders", vec![1]).await,
            Err(BrokerError::Unavailable)
        );
    }

    #[tokio::test]
    async fn test_invalid_broker_config_is_rejected() {
        let result = OrderPipeline::new(BrokerConfig {
            default_partitions: 0,
            ..BrokerConfig::default()
        });
        assert!(matches!(result, Err(ConfigError::Zero { .. })));
    }

    #[tokio::test]
    async fn test_run_consumer_rejects_empty_subscription() {
        let pipeline = OrderPipeline::new(BrokerConfig::default()).unwrap();
        let (_trigger, signal) = shutdown::channel();
        let mut handler = crate::clients::LoggingHandler::default();

        let result = run_consumer(
            pipeline.broker(),
            ConsumerConfig::for_group("g"),
            &[],
            &mut handler,
            &signal,
        )
        .await;
        assert!(matches!(
            result,
            Err(RunError::Consumer(ConsumerError::NoTopics))
        ));
    }
}
