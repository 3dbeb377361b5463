//! # Consumer
//!
//! A group member that polls its assigned partitions one record at a time.
//!
//! ## States
//!
//! ```text
//! Unsubscribed --subscribe--> Subscribing --assignment--> Assigned --fetch--> Polling
//!                                  ^                                             |
//!                                  +------------ session lost -------------------+
//!
//! any open state --close--> ShuttingDown --> Closed
//! ```
//!
//! ## Offsets
//!
//! A record returned by [`Consumer::poll`] is stored as `offset + 1` when the
//! next poll begins, or when the consumer closes. Stored offsets are committed
//! by the auto-commit task, by [`Consumer::commit`], before a partition is
//! revoked, and on close. Records carrying an error are never stored. The
//! result is at-least-once delivery: a crash between processing and commit
//! replays the record.

use crate::broker::{
    Assignment, BrokerClient, BrokerError, ConsumerRecord, MemberId, Membership, TopicPartition,
};
use crate::clients::handler::OrderHandler;
use crate::clients::offsets::{AutoCommitter, OffsetTracker};
use crate::clients::ConsumerError;
use crate::config::ConsumerConfig;
use crate::lifecycle::Shutdown;
use crate::model::Order;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Lifecycle of a [`Consumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Unsubscribed,
    /// Joined the group, waiting for an assignment.
    Subscribing,
    /// Assignment received, nothing fetched yet.
    Assigned,
    Polling,
    ShuttingDown,
    /// Terminal.
    Closed,
}

/// Counters returned by [`Consumer::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub processed: u64,
    pub decode_failures: u64,
    pub record_errors: u64,
    /// Handler errors and handler timeouts.
    pub handler_failures: u64,
}

/// Order consumer bound to one group.
pub struct Consumer {
    broker: BrokerClient,
    config: ConsumerConfig,
    state: ConsumerState,
    topics: Vec<String>,
    membership: Option<Membership>,
    generation: u64,
    assignment: Vec<TopicPartition>,
    positions: BTreeMap<TopicPartition, u64>,
    offsets: OffsetTracker,
    committer: Option<AutoCommitter>,
}

impl Consumer {
    pub fn new(broker: BrokerClient, config: ConsumerConfig) -> Result<Self, ConsumerError> {
        config.validate()?;
        Ok(Self {
            broker,
            config,
            state: ConsumerState::Unsubscribed,
            topics: Vec::new(),
            membership: None,
            generation: 0,
            assignment: Vec::new(),
            positions: BTreeMap::new(),
            offsets: OffsetTracker::new(),
            committer: None,
        })
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Partitions owned in the current generation.
    pub fn assignment(&self) -> &[TopicPartition] {
        &self.assignment
    }

    pub fn member_id(&self) -> Option<MemberId> {
        self.membership.as_ref().map(|m| m.member_id)
    }

    pub fn group_id(&self) -> &str {
        &self.config.group_id
    }

    /// Joins the group for `topics`. Partitions are assigned asynchronously
    /// and picked up by [`poll`](Self::poll).
    #[instrument(skip(self), fields(group = %self.config.group_id))]
    pub async fn subscribe(&mut self, topics: &[&str]) -> Result<(), ConsumerError> {
        self.expect_state("subscribe", &[ConsumerState::Unsubscribed])?;
        if topics.is_empty() {
            return Err(ConsumerError::NoTopics);
        }
        self.topics = topics.iter().map(|t| t.to_string()).collect();

        if let Err(e) = self.join().await {
            self.topics.clear();
            self.state = ConsumerState::Unsubscribed;
            return Err(e.into());
        }

        if self.config.enable_auto_commit {
            self.committer = Some(AutoCommitter::spawn(
                self.broker.clone(),
                self.config.group_id.clone(),
                self.config.auto_commit_interval,
                self.offsets.subscribe(),
            ));
        }
        Ok(())
    }

    /// Returns the next record within `timeout`, or `None`.
    ///
    /// Stores the offset of the previously returned record, applies any
    /// assignment change, then fetches. Broker failures are logged and turn
    /// into `None` after `retry_backoff`.
    #[instrument(level = "debug", skip(self), fields(group = %self.config.group_id))]
    pub async fn poll(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<ConsumerRecord>, ConsumerError> {
        self.expect_state(
            "poll",
            &[
                ConsumerState::Subscribing,
                ConsumerState::Assigned,
                ConsumerState::Polling,
            ],
        )?;
        self.offsets.store_returned();

        let deadline = Instant::now() + timeout;
        match tokio::time::timeout_at(deadline, self.poll_until_record()).await {
            Ok(record) => Ok(record),
            Err(_) => Ok(None),
        }
    }

    async fn poll_until_record(&mut self) -> Option<ConsumerRecord> {
        let mut rejoined = false;
        loop {
            if let Err(e) = self.sync_membership(&mut rejoined).await {
                warn!(error = %e, "Broker unavailable");
                tokio::time::sleep(self.config.retry_backoff).await;
                return None;
            }

            if matches!(self.state, ConsumerState::Assigned | ConsumerState::Polling) {
                match self.fetch().await {
                    Ok(Some(record)) => return Some(record),
                    Ok(None) => {}
                    Err(BrokerError::UnknownMember(member)) if !rejoined => {
                        warn!(%member, "Session expired, rejoining group");
                        self.drop_membership();
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "Fetch failed");
                        tokio::time::sleep(self.config.retry_backoff).await;
                        return None;
                    }
                }
            }

            if !self.wait_for_activity().await {
                return None;
            }
        }
    }

    /// Rejoins if the membership was lost and applies a new assignment.
    async fn sync_membership(&mut self, rejoined: &mut bool) -> Result<(), BrokerError> {
        if let Some(membership) = &self.membership {
            if membership.assignment.has_changed().is_err() {
                warn!(member = %membership.member_id, "Removed from group, rejoining");
                self.drop_membership();
            }
        }
        if self.membership.is_none() {
            if *rejoined {
                return Ok(());
            }
            *rejoined = true;
            self.join().await?;
        }

        let Some(membership) = self.membership.as_mut() else {
            return Ok(());
        };
        let latest = membership.assignment.borrow_and_update().clone();
        if latest.generation > 0 && latest.generation != self.generation {
            self.apply_assignment(latest).await?;
        }
        Ok(())
    }

    async fn join(&mut self) -> Result<(), BrokerError> {
        self.state = ConsumerState::Subscribing;
        let membership = self
            .broker
            .join(self.config.group_id.as_str(), self.topics.clone())
            .await?;
        info!(member = %membership.member_id, topics = ?self.topics, "Joined group");
        self.membership = Some(membership);
        Ok(())
    }

    /// Forgets the membership and everything tied to it. Stored offsets are
    /// discarded: the partitions already belong to someone else.
    fn drop_membership(&mut self) {
        self.membership = None;
        self.generation = 0;
        self.assignment.clear();
        self.positions.clear();
        self.offsets.clear();
        self.state = ConsumerState::Subscribing;
    }

    /// Commits and drops revoked partitions, then resolves start positions
    /// for new ones. Safe to retry after a failure.
    async fn apply_assignment(&mut self, next: Assignment) -> Result<(), BrokerError> {
        let group = self.config.group_id.clone();
        let revoked: Vec<TopicPartition> = self
            .assignment
            .iter()
            .filter(|tp| !next.partitions.contains(tp))
            .cloned()
            .collect();

        let offsets = self.offsets.take(&revoked);
        if !offsets.is_empty() {
            if let Err(e) = self.broker.commit(group.as_str(), offsets).await {
                warn!(error = %e, "Commit of revoked partitions failed");
            }
        }
        for tp in &revoked {
            self.positions.remove(tp);
        }

        let added: Vec<TopicPartition> = next
            .partitions
            .iter()
            .filter(|tp| !self.positions.contains_key(*tp))
            .cloned()
            .collect();
        if !added.is_empty() {
            let starts = self
                .broker
                .resolve(group.as_str(), added, self.config.offset_reset)
                .await?;
            for (tp, offset) in starts {
                debug!(%tp, offset, "Start position");
                self.positions.insert(tp, offset);
            }
        }

        info!(
            generation = next.generation,
            partitions = ?next.partitions,
            revoked = revoked.len(),
            "Assignment applied"
        );
        self.generation = next.generation;
        self.assignment = next.partitions;
        if self.state == ConsumerState::Subscribing {
            self.state = ConsumerState::Assigned;
        }
        Ok(())
    }

    async fn fetch(&mut self) -> Result<Option<ConsumerRecord>, BrokerError> {
        let Some(member) = self.member_id() else {
            return Ok(None);
        };
        let positions = self
            .positions
            .iter()
            .map(|(tp, offset)| (tp.clone(), *offset))
            .collect();
        let fetched = self
            .broker
            .fetch(self.config.group_id.as_str(), member, positions)
            .await?;
        self.state = ConsumerState::Polling;

        let Some(record) = fetched else {
            return Ok(None);
        };
        if record.error.is_none() {
            let tp = record.topic_partition();
            if let Some(position) = self.positions.get_mut(&tp) {
                *position = record.offset + 1;
                self.offsets.mark_returned(tp, record.offset);
            }
        }
        debug!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            "Fetched"
        );
        Ok(Some(record))
    }

    /// Waits for new data or an assignment change. `false` means give up.
    async fn wait_for_activity(&mut self) -> bool {
        let backoff = self.config.retry_backoff;
        let Some(membership) = self.membership.as_mut() else {
            tokio::time::sleep(backoff).await;
            return false;
        };
        tokio::select! {
            appended = membership.appends.changed() => {
                if appended.is_err() {
                    warn!("Broker stopped publishing appends");
                    tokio::time::sleep(backoff).await;
                    return false;
                }
                true
            }
            // A closed channel is picked up by sync_membership.
            _ = membership.assignment.changed() => true,
        }
    }

    /// Processes records with `handler` until `shutdown` fires.
    ///
    /// The signal is checked before every poll, so the loop exits within one
    /// `poll_timeout` plus at most one `handler_timeout`. Does not close the
    /// consumer.
    #[instrument(skip(self, handler, shutdown), fields(group = %self.config.group_id))]
    pub async fn run<H>(
        &mut self,
        handler: &mut H,
        shutdown: &Shutdown,
    ) -> Result<RunStats, ConsumerError>
    where
        H: OrderHandler + ?Sized,
    {
        let mut stats = RunStats::default();
        info!("Consumer loop started");

        while !shutdown.is_triggered() {
            let Some(record) = self.poll(self.config.poll_timeout).await? else {
                continue;
            };

            if let Some(error) = &record.error {
                warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    %error,
                    "Skipping failed record"
                );
                stats.record_errors += 1;
                continue;
            }

            let order = match Order::decode(&record.payload) {
                Ok(order) => order,
                Err(e) => {
                    warn!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "Skipping undecodable record"
                    );
                    stats.decode_failures += 1;
                    continue;
                }
            };

            let order_id = order.order_id().clone();
            let handled = handler.handle(order, &record);
            match tokio::time::timeout(self.config.handler_timeout, handled).await {
                Ok(Ok(())) => stats.processed += 1,
                Ok(Err(e)) => {
                    warn!(%order_id, offset = record.offset, error = %e, "Handler failed");
                    stats.handler_failures += 1;
                }
                Err(_) => {
                    warn!(
                        %order_id,
                        offset = record.offset,
                        timeout_ms = self.config.handler_timeout.as_millis() as u64,
                        "Handler timed out"
                    );
                    stats.handler_failures += 1;
                }
            }
        }

        info!(?stats, "Consumer loop stopped");
        Ok(stats)
    }

    /// Commits the stored offsets now.
    #[instrument(skip(self), fields(group = %self.config.group_id))]
    pub async fn commit(&mut self) -> Result<(), ConsumerError> {
        self.expect_state(
            "commit",
            &[
                ConsumerState::Subscribing,
                ConsumerState::Assigned,
                ConsumerState::Polling,
            ],
        )?;
        let offsets = self.offsets.stored();
        if offsets.is_empty() {
            return Ok(());
        }
        debug!(?offsets, "Committing");
        self.broker
            .commit(self.config.group_id.as_str(), offsets)
            .await?;
        Ok(())
    }

    /// Stops the commit task, commits a last time if configured and leaves
    /// the group. Failures in these steps are logged; the consumer always
    /// ends `Closed`.
    #[instrument(skip(self), fields(group = %self.config.group_id))]
    pub async fn close(&mut self) -> Result<(), ConsumerError> {
        if self.state == ConsumerState::Closed {
            return Err(ConsumerError::Closed);
        }
        self.state = ConsumerState::ShuttingDown;
        self.offsets.store_returned();

        if let Some(committer) = self.committer.take() {
            committer.stop().await;
        }

        if let Some(membership) = self.membership.take() {
            let group = self.config.group_id.as_str();
            let offsets = self.offsets.stored();
            if self.config.commit_on_close && !offsets.is_empty() {
                match self.broker.commit(group, offsets).await {
                    Ok(()) => debug!("Final commit done"),
                    Err(e) => warn!(error = %e, "Final commit failed"),
                }
            }
            if let Err(e) = self.broker.leave(group, membership.member_id).await {
                warn!(member = %membership.member_id, error = %e, "Leave failed");
            }
        }

        self.assignment.clear();
        self.positions.clear();
        self.state = ConsumerState::Closed;
        info!("Consumer closed");
        Ok(())
    }

    fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[ConsumerState],
    ) -> Result<(), ConsumerError> {
        if self.state == ConsumerState::Closed {
            return Err(ConsumerError::Closed);
        }
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ConsumerError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockBroker;
    use crate::broker::RecordError;

    const SHORT: Duration = Duration::from_millis(100);

    fn tp() -> TopicPartition {
        TopicPartition::new("orders", 0)
    }

    fn config() -> ConsumerConfig {
        ConsumerConfig {
            enable_auto_commit: false,
            retry_backoff: Duration::from_millis(10),
            ..ConsumerConfig::for_group("g")
        }
    }

    #[tokio::test]
    async fn test_state_checks() {
        let mock = MockBroker::new();
        let mut consumer = Consumer::new(mock.client(), config()).unwrap();
        assert_eq!(consumer.state(), ConsumerState::Unsubscribed);

        assert!(matches!(
            consumer.poll(SHORT).await,
            Err(ConsumerError::InvalidState { operation: "poll", .. })
        ));
        assert!(matches!(consumer.subscribe(&[]).await, Err(ConsumerError::NoTopics)));

        consumer.subscribe(&["orders"]).await.unwrap();
        assert_eq!(consumer.state(), ConsumerState::Subscribing);
        assert!(matches!(
            consumer.subscribe(&["orders"]).await,
            Err(ConsumerError::InvalidState { operation: "subscribe", .. })
        ));
    }

    #[tokio::test]
    async fn test_late_assignment_moves_to_polling() {
        let mock = MockBroker::new();
        let mut consumer = Consumer::new(mock.client(), config()).unwrap();
        consumer.subscribe(&["orders"]).await.unwrap();

        assert!(consumer.poll(Duration::from_millis(30)).await.unwrap().is_none());
        assert_eq!(consumer.state(), ConsumerState::Subscribing);

        mock.assign(vec![tp()]);
        assert!(consumer.poll(SHORT).await.unwrap().is_none());
        assert_eq!(consumer.state(), ConsumerState::Polling);
        assert_eq!(consumer.assignment(), &[tp()]);
    }

    #[tokio::test]
    async fn test_offset_stored_on_next_poll_and_committed_on_close() {
        let mock = MockBroker::new();
        mock.assign_on_join(vec![tp()]);
        mock.expect_fetch()
            .return_record(ConsumerRecord::new("orders", 0, 4, b"x".to_vec()));

        let mut consumer = Consumer::new(mock.client(), config()).unwrap();
        consumer.subscribe(&["orders"]).await.unwrap();
        let record = consumer.poll(SHORT).await.unwrap().unwrap();
        assert_eq!(record.offset, 4);

        // Not stored until the next poll begins.
        consumer.commit().await.unwrap();
        assert!(mock.commits().is_empty());

        consumer.poll(Duration::from_millis(20)).await.unwrap();
        consumer.commit().await.unwrap();
        assert_eq!(mock.commits(), vec![(tp(), 5)]);

        let member = consumer.member_id().unwrap();
        consumer.close().await.unwrap();
        assert_eq!(mock.left(), vec![member]);
        assert_eq!(consumer.state(), ConsumerState::Closed);
    }

    #[tokio::test]
    async fn test_failed_records_are_not_stored() {
        let mock = MockBroker::new();
        mock.assign_on_join(vec![tp()]);
        mock.expect_fetch().return_record(ConsumerRecord::failed(
            "orders",
            0,
            RecordError::Broker("corrupt".into()),
        ));

        let mut consumer = Consumer::new(mock.client(), config()).unwrap();
        consumer.subscribe(&["orders"]).await.unwrap();
        let record = consumer.poll(SHORT).await.unwrap().unwrap();
        assert!(record.error.is_some());

        consumer.close().await.unwrap();
        assert!(mock.commits().is_empty());
    }

    #[tokio::test]
    async fn test_broker_error_becomes_empty_poll() {
        let mock = MockBroker::new();
        mock.assign_on_join(vec![tp()]);
        mock.expect_fetch().return_err(BrokerError::Unavailable);

        let mut consumer = Consumer::new(mock.client(), config()).unwrap();
        consumer.subscribe(&["orders"]).await.unwrap();
        assert!(consumer.poll(SHORT).await.unwrap().is_none());
        mock.verify();
    }

    #[tokio::test]
    async fn test_rejoins_after_eviction() {
        let mock = MockBroker::new();
        mock.assign_on_join(vec![tp()]);
        let mut consumer = Consumer::new(mock.client(), config()).unwrap();
        consumer.subscribe(&["orders"]).await.unwrap();
        consumer.poll(Duration::from_millis(20)).await.unwrap();
        let first = consumer.member_id().unwrap();

        mock.evict();
        consumer.poll(Duration::from_millis(20)).await.unwrap();
        assert_eq!(mock.joins().len(), 2);
        assert_ne!(consumer.member_id(), Some(first));
        assert_eq!(consumer.assignment(), &[tp()]);
    }

    #[tokio::test]
    async fn test_unknown_member_triggers_single_rejoin() {
        let mock = MockBroker::new();
        mock.assign_on_join(vec![tp()]);
        mock.expect_fetch()
            .return_err(BrokerError::UnknownMember(MemberId(1)));

        let mut consumer = Consumer::new(mock.client(), config()).unwrap();
        consumer.subscribe(&["orders"]).await.unwrap();
        assert!(consumer.poll(SHORT).await.unwrap().is_none());
        assert_eq!(mock.joins().len(), 2);
    }

    #[tokio::test]
    async fn test_closed_is_terminal() {
        let mock = MockBroker::new();
        let mut consumer = Consumer::new(mock.client(), config()).unwrap();
        consumer.subscribe(&["orders"]).await.unwrap();
        consumer.close().await.unwrap();

        assert!(matches!(consumer.poll(SHORT).await, Err(ConsumerError::Closed)));
        assert!(matches!(consumer.commit().await, Err(ConsumerError::Closed)));
        assert!(matches!(consumer.subscribe(&["orders"]).await, Err(ConsumerError::Closed)));
        assert!(matches!(consumer.close().await, Err(ConsumerError::Closed)));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mock = MockBroker::new();
        let result = Consumer::new(mock.client(), ConsumerConfig::for_group(" "));
        assert!(matches!(result, Err(ConsumerError::Config(_))));
    }
}
