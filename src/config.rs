//! Client and broker configuration types.
//!
//! Every struct has sensible defaults and derives serde so a host binary can
//! load it from whatever format it likes. Loading itself is not done here.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("group_id must not be empty")]
    EmptyGroupId,
}

/// Where a consumer starts reading a partition that has no committed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    /// Start from the first record in the partition.
    Earliest,
    /// Start after the last record currently in the partition.
    #[default]
    Latest,
}

/// Configuration for the [`Producer`](crate::clients::Producer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Capacity of the outbound buffer of not-yet-dispatched messages
    pub buffer_capacity: usize,

    /// How long `send` may wait for buffer space before giving up
    pub enqueue_timeout: Duration,

    /// Upper bound on a single broker acknowledgment
    pub delivery_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1024,
            enqueue_timeout: Duration::from_secs(1),
            delivery_timeout: Duration::from_secs(30),
        }
    }
}

impl ProducerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("buffer_capacity", self.buffer_capacity as u128)?;
        non_zero("delivery_timeout", self.delivery_timeout.as_nanos())?;
        Ok(())
    }
}

/// Configuration for the [`Consumer`](crate::clients::Consumer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Consumer group identity, fixed for the lifetime of the consumer
    pub group_id: String,

    /// Start position for partitions without a committed offset
    pub offset_reset: OffsetReset,

    /// Run the periodic commit task
    pub enable_auto_commit: bool,

    /// Period of the commit task
    pub auto_commit_interval: Duration,

    /// Timeout passed to `poll` by the consumer loop
    pub poll_timeout: Duration,

    /// Upper bound on one handler invocation
    pub handler_timeout: Duration,

    /// Pause before returning an empty poll after a broker failure
    pub retry_backoff: Duration,

    /// Commit stored offsets one last time when closing
    pub commit_on_close: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: "order-consumers".to_string(),
            offset_reset: OffsetReset::default(),
            enable_auto_commit: true,
            auto_commit_interval: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(1),
            handler_timeout: Duration::from_secs(10),
            retry_backoff: Duration::from_millis(100),
            commit_on_close: true,
        }
    }
}

impl ConsumerConfig {
    /// Default configuration for the given group.
    pub fn for_group(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group_id.trim().is_empty() {
            return Err(ConfigError::EmptyGroupId);
        }
        if self.enable_auto_commit {
            non_zero("auto_commit_interval", self.auto_commit_interval.as_nanos())?;
        }
        non_zero("poll_timeout", self.poll_timeout.as_nanos())?;
        non_zero("handler_timeout", self.handler_timeout.as_nanos())?;
        Ok(())
    }
}

/// Configuration for the in-process [`BrokerActor`](crate::broker::BrokerActor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Partition count for auto-created topics
    pub default_partitions: u32,

    /// Members whose last fetch is older than this are evicted
    pub session_timeout: Duration,

    /// Largest accepted record value
    pub max_message_bytes: usize,

    /// Create unknown topics on first use
    pub auto_create_topics: bool,

    /// Capacity of the broker's request channel
    pub channel_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_partitions: 1,
            session_timeout: Duration::from_secs(45),
            max_message_bytes: 1024 * 1024,
            auto_create_topics: true,
            channel_capacity: 256,
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("default_partitions", self.default_partitions as u128)?;
        non_zero("session_timeout", self.session_timeout.as_nanos())?;
        non_zero("max_message_bytes", self.max_message_bytes as u128)?;
        non_zero("channel_capacity", self.channel_capacity as u128)?;
        Ok(())
    }
}

fn non_zero(field: &'static str, value: u128) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::Zero { field })
    } else {
        Ok(())
    }
}
