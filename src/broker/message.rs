//! # Broker Contract Messages
//!
//! The broker is an external collaborator. Clients never touch its storage;
//! they send a [`BrokerRequest`] over a channel and wait for the answer on a
//! oneshot. Anything that drains a `Receiver<BrokerRequest>` and answers these
//! requests can stand in as the broker: the in-process
//! [`BrokerActor`](crate::broker::BrokerActor), the
//! [`MockBroker`](crate::broker::mock::MockBroker), or an adapter to a real
//! cluster.

use crate::broker::{
    BrokerError, ConsumerRecord, DeliveryReceipt, MemberId, Membership, TopicPartition,
};
use crate::config::OffsetReset;
use tokio::sync::oneshot;

/// One-shot response channel used by the broker.
pub type Response<T> = oneshot::Sender<Result<T, BrokerError>>;

/// Requests understood by the broker.
///
/// | Variant | Contract operation |
/// |---------|--------------------|
/// | `Accept` | `accept(topic, value) -> {partition, offset}` |
/// | `Join` | `subscribe(group, topics) -> assignment` (assignment is pushed later) |
/// | `Resolve` | start offsets for newly assigned partitions |
/// | `Fetch` | `poll(group, ..) -> record \| empty` |
/// | `Commit` | `commit(group, topic, partition, offset)` for a batch |
/// | `Leave` | release group membership |
#[derive(Debug)]
pub enum BrokerRequest {
    Accept {
        topic: String,
        value: Vec<u8>,
        respond_to: Response<DeliveryReceipt>,
    },
    Join {
        group: String,
        topics: Vec<String>,
        respond_to: Response<Membership>,
    },
    Resolve {
        group: String,
        partitions: Vec<TopicPartition>,
        reset: OffsetReset,
        respond_to: Response<Vec<(TopicPartition, u64)>>,
    },
    Fetch {
        group: String,
        member: MemberId,
        positions: Vec<(TopicPartition, u64)>,
        respond_to: Response<Option<ConsumerRecord>>,
    },
    Commit {
        group: String,
        offsets: Vec<(TopicPartition, u64)>,
        respond_to: Response<()>,
    },
    Leave {
        group: String,
        member: MemberId,
        respond_to: Response<()>,
    },
    /// Stop the broker loop even if clients are still alive.
    Shutdown,
}
