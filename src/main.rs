//! Demo: runs the producer and consumer units against the in-process broker.
//!
//! The producer sends one order and exits; the consumer keeps processing
//! until Ctrl-C.

use order_stream::clients::LoggingHandler;
use order_stream::config::{BrokerConfig, ConsumerConfig, OffsetReset, ProducerConfig};
use order_stream::lifecycle::{
    self, on_ctrl_c, run_consumer, run_producer, setup_tracing, OrderPipeline,
};
use order_stream::model::Order;
use tracing::{error, info, Instrument};

const TOPIC: &str = "orders";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_tracing();
    info!("Starting order stream demo");

    let pipeline = OrderPipeline::new(BrokerConfig::default())?;
    let (trigger, shutdown) = lifecycle::shutdown::channel();
    let _ctrl_c = on_ctrl_c(trigger);

    // Earliest, so the consumer sees the order even if it joins after the send.
    let consumer_config = ConsumerConfig {
        offset_reset: OffsetReset::Earliest,
        ..ConsumerConfig::default()
    };
    let consumer_broker = pipeline.broker();
    let consumer = tokio::spawn(
        async move {
            let mut handler = LoggingHandler::default();
            run_consumer(
                consumer_broker,
                consumer_config,
                &[TOPIC],
                &mut handler,
                &shutdown,
            )
            .await
        }
        .instrument(tracing::info_span!("consumer")),
    );

    let order = Order::create("david", "chicken burger", 5)?;
    let produced = run_producer(pipeline.broker(), ProducerConfig::default(), TOPIC, &order)
        .instrument(tracing::info_span!("producer"))
        .await;
    match produced {
        Ok(receipt) => info!(
            partition = receipt.partition,
            offset = receipt.offset,
            "Producer finished"
        ),
        Err(e) => error!(error = %e, "Producer failed"),
    }

    info!("Consuming until Ctrl-C");
    match consumer.await? {
        Ok(stats) => info!(?stats, "Consumer finished"),
        Err(e) => error!(error = %e, "Consumer failed"),
    }

    pipeline.shutdown().await?;
    info!("Demo completed");
    Ok(())
}
