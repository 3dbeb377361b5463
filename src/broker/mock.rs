//! # Mock Broker
//!
//! `MockBroker` answers the broker contract from a script instead of a log.
//! It is the tool for failure scenarios that are awkward to produce with the
//! in-process broker: rejected sends, broker outages, records that carry
//! errors, assignments that arrive late.
//!
//! | Request | Behaviour |
//! |---------|-----------|
//! | `Accept` | pops the next [`expect_accept`](MockBroker::expect_accept) result, otherwise rejects |
//! | `Fetch` | pops the next [`expect_fetch`](MockBroker::expect_fetch) result, otherwise empty |
//! | `Join` | succeeds; assigns [`assign_on_join`](MockBroker::assign_on_join) partitions if set |
//! | `Resolve` | every partition starts at offset 0 |
//! | `Commit` / `Leave` | succeed and are recorded for assertions |
//!
//! ```rust
//! use order_stream::broker::mock::MockBroker;
//! use order_stream::broker::{BrokerError, DeliveryReceipt};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mock = MockBroker::new();
//!     mock.expect_accept().return_err(BrokerError::Rejected("disk full".into()));
//!
//!     let result = mock.client().accept("orders", b"{}".to_vec()).await;
//!     assert!(matches!(result, Err(BrokerError::Rejected(_))));
//!     mock.verify();
//! }
//! ```

use crate::broker::{
    Assignment, BrokerClient, BrokerError, BrokerRequest, ConsumerRecord, DeliveryReceipt,
    MemberId, Membership, TopicPartition,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};

#[derive(Default)]
struct MockState {
    accepts: VecDeque<Result<DeliveryReceipt, BrokerError>>,
    fetches: VecDeque<Result<Option<ConsumerRecord>, BrokerError>>,
    join_partitions: Option<Vec<TopicPartition>>,
    assignment: Option<watch::Sender<Assignment>>,
    generation: u64,
    next_member: u64,
    joins: Vec<Vec<String>>,
    commits: Vec<(TopicPartition, u64)>,
    left: Vec<MemberId>,
}

/// A scripted broker for tests.
pub struct MockBroker {
    client: BrokerClient,
    state: Arc<Mutex<MockState>>,
    appends: Arc<watch::Sender<u64>>,
    _handle: tokio::task::JoinHandle<()>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockBroker {
    /// Creates a mock with no expectations. Must be called inside a runtime.
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::channel::<BrokerRequest>(100);
        let state = Arc::new(Mutex::new(MockState::default()));
        let appends = Arc::new(watch::channel(0u64).0);

        let task_state = state.clone();
        let task_appends = appends.clone();
        let handle = tokio::spawn(async move {
            while let Some(request) = receiver.recv().await {
                let mut state = lock(&task_state);
                match request {
                    BrokerRequest::Accept { respond_to, .. } => {
                        let response = state.accepts.pop_front().unwrap_or_else(|| {
                            Err(BrokerError::Rejected("no accept expectation".to_string()))
                        });
                        let _ = respond_to.send(response);
                    }
                    BrokerRequest::Fetch { respond_to, .. } => {
                        let response = state.fetches.pop_front().unwrap_or(Ok(None));
                        let _ = respond_to.send(response);
                    }
                    BrokerRequest::Join {
                        topics, respond_to, ..
                    } => {
                        state.next_member += 1;
                        let member_id = MemberId(state.next_member);
                        state.joins.push(topics);
                        let (tx, rx) = watch::channel(Assignment::default());
                        if let Some(partitions) = state.join_partitions.clone() {
                            state.generation += 1;
                            tx.send_replace(Assignment {
                                generation: state.generation,
                                partitions,
                            });
                        }
                        state.assignment = Some(tx);
                        let _ = respond_to.send(Ok(Membership {
                            member_id,
                            assignment: rx,
                            appends: task_appends.subscribe(),
                        }));
                    }
                    BrokerRequest::Resolve {
                        partitions,
                        respond_to,
                        ..
                    } => {
                        let positions = partitions.into_iter().map(|tp| (tp, 0)).collect();
                        let _ = respond_to.send(Ok(positions));
                    }
                    BrokerRequest::Commit {
                        offsets,
                        respond_to,
                        ..
                    } => {
                        state.commits.extend(offsets);
                        let _ = respond_to.send(Ok(()));
                    }
                    BrokerRequest::Leave {
                        member, respond_to, ..
                    } => {
                        state.left.push(member);
                        let _ = respond_to.send(Ok(()));
                    }
                    BrokerRequest::Shutdown => break,
                }
            }
        });

        Self {
            client: BrokerClient::new(sender),
            state,
            appends,
            _handle: handle,
        }
    }

    /// Returns a client wired to this mock.
    pub fn client(&self) -> BrokerClient {
        self.client.clone()
    }

    /// Expects an `accept` call.
    pub fn expect_accept(&self) -> AcceptExpectationBuilder {
        AcceptExpectationBuilder {
            state: self.state.clone(),
        }
    }

    /// Expects a `fetch` call. Waiting consumers are woken when the
    /// expectation is registered.
    pub fn expect_fetch(&self) -> FetchExpectationBuilder {
        FetchExpectationBuilder {
            state: self.state.clone(),
            appends: self.appends.clone(),
        }
    }

    /// Partitions handed to every member as soon as it joins.
    pub fn assign_on_join(&self, partitions: Vec<TopicPartition>) {
        lock(&self.state).join_partitions = Some(partitions);
    }

    /// Pushes a new assignment to the most recently joined member.
    pub fn assign(&self, partitions: Vec<TopicPartition>) {
        let mut state = lock(&self.state);
        state.generation += 1;
        let generation = state.generation;
        if let Some(tx) = &state.assignment {
            tx.send_replace(Assignment {
                generation,
                partitions,
            });
        }
    }

    /// Drops the assignment channel of the most recently joined member, as the
    /// broker does when it evicts a member.
    pub fn evict(&self) {
        lock(&self.state).assignment = None;
    }

    /// Offsets committed so far, in arrival order.
    pub fn commits(&self) -> Vec<(TopicPartition, u64)> {
        lock(&self.state).commits.clone()
    }

    /// Members that left the group.
    pub fn left(&self) -> Vec<MemberId> {
        lock(&self.state).left.clone()
    }

    /// Subscriptions received, one entry per join.
    pub fn joins(&self) -> Vec<Vec<String>> {
        lock(&self.state).joins.clone()
    }

    /// Panics if scripted accept or fetch results were not consumed.
    pub fn verify(&self) {
        let state = lock(&self.state);
        if !state.accepts.is_empty() || !state.fetches.is_empty() {
            panic!(
                "Not all expectations were met. {} accept(s) and {} fetch(es) remaining",
                state.accepts.len(),
                state.fetches.len()
            );
        }
    }
}

/// Builder for `accept` expectations.
pub struct AcceptExpectationBuilder {
    state: Arc<Mutex<MockState>>,
}

impl AcceptExpectationBuilder {
    pub fn return_ok(self, receipt: DeliveryReceipt) {
        lock(&self.state).accepts.push_back(Ok(receipt));
    }

    pub fn return_err(self, error: BrokerError) {
        lock(&self.state).accepts.push_back(Err(error));
    }
}

/// Builder for `fetch` expectations.
pub struct FetchExpectationBuilder {
    state: Arc<Mutex<MockState>>,
    appends: Arc<watch::Sender<u64>>,
}

impl FetchExpectationBuilder {
    pub fn return_record(self, record: ConsumerRecord) {
        self.push(Ok(Some(record)));
    }

    pub fn return_empty(self) {
        self.push(Ok(None));
    }

    pub fn return_err(self, error: BrokerError) {
        self.push(Err(error));
    }

    fn push(self, response: Result<Option<ConsumerRecord>, BrokerError>) {
        lock(&self.state).fetches.push_back(response);
        self.appends.send_modify(|n| *n = n.wrapping_add(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_accepts_in_order() {
        let mock = MockBroker::new();
        mock.expect_accept().return_ok(DeliveryReceipt {
            topic: "orders".into(),
            partition: 0,
            offset: 7,
        });
        mock.expect_accept().return_err(BrokerError::Unavailable);

        let client = mock.client();
        let first = client.accept("orders", vec![]).await.unwrap();
        assert_eq!(first.offset, 7);
        let second = client.accept("orders", vec![]).await;
        assert_eq!(second, Err(BrokerError::Unavailable));
        mock.verify();
    }

    #[tokio::test]
    async fn test_join_and_late_assignment() {
        let mock = MockBroker::new();
        let client = mock.client();
        let mut membership = client.join("g", vec!["orders".into()]).await.unwrap();
        assert!(membership.assignment.borrow().partitions.is_empty());

        mock.assign(vec![TopicPartition::new("orders", 0)]);
        membership.assignment.changed().await.unwrap();
        assert_eq!(membership.assignment.borrow().generation, 1);
        assert_eq!(mock.joins(), vec![vec!["orders".to_string()]]);
    }
}
