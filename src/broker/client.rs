//! # Broker Client
//!
//! Typed async wrapper around the broker request channel.

use crate::broker::{
    BrokerError, BrokerRequest, ConsumerRecord, DeliveryReceipt, MemberId, Membership,
    TopicPartition,
};
use crate::config::OffsetReset;
use tokio::sync::{mpsc, oneshot};

/// A cheap, cloneable handle for talking to a broker.
///
/// Every method sends one [`BrokerRequest`] and awaits its oneshot reply. A
/// closed request channel maps to [`BrokerError::Unavailable`], a dropped reply
/// channel to [`BrokerError::NoResponse`].
#[derive(Clone, Debug)]
pub struct BrokerClient {
    sender: mpsc::Sender<BrokerRequest>,
}

impl BrokerClient {
    pub fn new(sender: mpsc::Sender<BrokerRequest>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, BrokerError>>) -> BrokerRequest,
    ) -> Result<T, BrokerError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| BrokerError::Unavailable)?;
        response.await.map_err(|_| BrokerError::NoResponse)?
    }

    pub async fn accept(
        &self,
        topic: impl Into<String>,
        value: Vec<u8>,
    ) -> Result<DeliveryReceipt, BrokerError> {
        let topic = topic.into();
        self.request(|respond_to| BrokerRequest::Accept {
            topic,
            value,
            respond_to,
        })
        .await
    }

    pub async fn join(
        &self,
        group: impl Into<String>,
        topics: Vec<String>,
    ) -> Result<Membership, BrokerError> {
        let group = group.into();
        self.request(|respond_to| BrokerRequest::Join {
            group,
            topics,
            respond_to,
        })
        .await
    }

    pub async fn resolve(
        &self,
        group: impl Into<String>,
        partitions: Vec<TopicPartition>,
        reset: OffsetReset,
    ) -> Result<Vec<(TopicPartition, u64)>, BrokerError> {
        let group = group.into();
        self.request(|respond_to| BrokerRequest::Resolve {
            group,
            partitions,
            reset,
            respond_to,
        })
        .await
    }

    pub async fn fetch(
        &self,
        group: impl Into<String>,
        member: MemberId,
        positions: Vec<(TopicPartition, u64)>,
    ) -> Result<Option<ConsumerRecord>, BrokerError> {
        let group = group.into();
        self.request(|respond_to| BrokerRequest::Fetch {
            group,
            member,
            positions,
            respond_to,
        })
        .await
    }

    pub async fn commit(
        &self,
        group: impl Into<String>,
        offsets: Vec<(TopicPartition, u64)>,
    ) -> Result<(), BrokerError> {
        let group = group.into();
        self.request(|respond_to| BrokerRequest::Commit {
            group,
            offsets,
            respond_to,
        })
        .await
    }

    pub async fn leave(
        &self,
        group: impl Into<String>,
        member: MemberId,
    ) -> Result<(), BrokerError> {
        let group = group.into();
        self.request(|respond_to| BrokerRequest::Leave {
            group,
            member,
            respond_to,
        })
        .await
    }

    /// Asks the broker loop to stop. Pending and later requests fail with
    /// [`BrokerError::Unavailable`] or [`BrokerError::NoResponse`].
    pub async fn shutdown(&self) -> Result<(), BrokerError> {
        self.sender
            .send(BrokerRequest::Shutdown)
            .await
            .map_err(|_| BrokerError::Unavailable)
    }
}
