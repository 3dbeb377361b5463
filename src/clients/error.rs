//! Error types for the producer and consumer clients.

use crate::broker::BrokerError;
use crate::clients::ConsumerState;
use crate::config::ConfigError;
use crate::model::EncodeError;
use std::time::Duration;
use thiserror::Error;

/// Outcome of a failed delivery, reported through the message's completion.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Broker refused delivery: {0}")]
    Broker(#[from] BrokerError),

    #[error("No acknowledgment within {0:?}")]
    TimedOut(Duration),

    /// The producer was torn down before the message was dispatched.
    #[error("Message dropped before delivery")]
    Dropped,
}

/// Errors returned synchronously by [`Producer::send`](crate::clients::Producer::send).
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("Topic name must not be empty")]
    InvalidTopic,

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("Outbound buffer still full after {0:?}")]
    QueueFull(Duration),

    #[error("Producer is closed")]
    Closed,

    #[error("Invalid producer configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Errors returned by [`Consumer`](crate::clients::Consumer) operations.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Consumer is closed")]
    Closed,

    #[error("Cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ConsumerState,
    },

    #[error("Subscription must name at least one topic")]
    NoTopics,

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Invalid consumer configuration: {0}")]
    Config(#[from] ConfigError),
}
