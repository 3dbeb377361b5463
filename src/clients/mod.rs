//! Producer and consumer clients for order messages.

pub mod consumer;
pub mod delivery;
pub mod error;
pub mod handler;
mod offsets;
pub mod producer;

pub use crate::broker::ConsumerRecord;
pub use consumer::{Consumer, ConsumerState, RunStats};
pub use delivery::{DeliveryCallback, DeliveryFuture, DeliveryResult};
pub use error::{ConsumerError, DeliveryError, ProducerError};
pub use handler::{HandlerError, LoggingHandler, OrderHandler};
pub use producer::Producer;
