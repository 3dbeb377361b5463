//! # Broker Errors
//!
//! Errors returned by the broker contract, plus the per-record error a
//! broker may attach to a [`ConsumerRecord`](crate::broker::ConsumerRecord).

use crate::broker::MemberId;
use thiserror::Error;

/// Errors that can occur when talking to the broker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker's request channel is closed.
    #[error("Broker unavailable")]
    Unavailable,

    /// The broker dropped the response channel without answering.
    #[error("Broker dropped response channel")]
    NoResponse,

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Invalid topic name: {0:?}")]
    InvalidTopic(String),

    #[error("Message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: usize, max: usize },

    /// The member is not (or no longer) part of the group.
    #[error("Unknown group member: {0}")]
    UnknownMember(MemberId),

    #[error("Rejected by broker: {0}")]
    Rejected(String),
}

/// Error attached to a single record instead of user data.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("Subscribed topic does not exist: {0}")]
    UnknownTopic(String),

    #[error("Broker reported: {0}")]
    Broker(String),
}
