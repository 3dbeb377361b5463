//! Values exchanged with the broker: receipts, records, assignments.

use crate::broker::RecordError;
use std::fmt::Display;
use tokio::sync::watch;

/// A single partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: u32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl Display for TopicPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// Broker confirmation that a message was appended to a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

/// One record handed to a consumer.
///
/// When `error` is set the record does not carry user data: `payload` must not
/// be decoded and the offset is not a real log position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerRecord {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub payload: Vec<u8>,
    pub error: Option<RecordError>,
}

impl ConsumerRecord {
    pub fn new(topic: impl Into<String>, partition: u32, offset: u64, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            payload,
            error: None,
        }
    }

    /// A record that only reports an error for `topic`/`partition`.
    pub fn failed(topic: impl Into<String>, partition: u32, error: RecordError) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset: 0,
            payload: Vec::new(),
            error: Some(error),
        }
    }

    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

/// Broker-issued identity of one group member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(pub u64);

impl Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "member-{}", self.0)
    }
}

/// The partitions a member owns for one generation of its group.
///
/// Generation 0 means "nothing assigned yet".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    pub generation: u64,
    pub partitions: Vec<TopicPartition>,
}

/// What a consumer receives after joining a group.
///
/// Assignments arrive later on `assignment`; `appends` ticks whenever any
/// partition grows, so an idle consumer can wait instead of re-fetching.
#[derive(Debug)]
pub struct Membership {
    pub member_id: MemberId,
    pub assignment: watch::Receiver<Assignment>,
    pub appends: watch::Receiver<u64>,
}
