use crate::broker::ConsumerRecord;
use crate::model::Order;
use async_trait::async_trait;
use tracing::info;

/// Error type returned by handlers. Any error will do; the consumer only logs it.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processing step applied by [`Consumer::run`](crate::clients::Consumer::run)
/// to every decoded order.
///
/// A returned error is logged and the loop moves on to the next record.
#[async_trait]
pub trait OrderHandler: Send {
    async fn handle(&mut self, order: Order, record: &ConsumerRecord) -> Result<(), HandlerError>;
}

/// Logs each order at `info` and counts them.
#[derive(Debug, Default)]
pub struct LoggingHandler {
    pub handled: u64,
}

#[async_trait]
impl OrderHandler for LoggingHandler {
    async fn handle(&mut self, order: Order, record: &ConsumerRecord) -> Result<(), HandlerError> {
        self.handled += 1;
        info!(
            order_id = %order.order_id(),
            user = order.user(),
            item = order.item(),
            quantity = order.quantity(),
            partition = record.partition,
            offset = record.offset,
            "Order received"
        );
        Ok(())
    }
}
