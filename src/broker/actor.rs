//! # In-Process Broker
//!
//! `BrokerActor` is a small broker that honours the [`BrokerRequest`] contract
//! so the clients can run end to end without an external cluster. It owns all
//! broker state and processes requests one at a time, so its maps need no
//! locking.
//!
//! What it keeps:
//! - an append-only log per partition, offsets starting at 0;
//! - per group: its members, their subscriptions and current assignment;
//! - committed offsets per (group, topic, partition).
//!
//! What it does not do: persistence, retention, replication.

use crate::broker::{
    Assignment, BrokerClient, BrokerError, BrokerRequest, ConsumerRecord, DeliveryReceipt,
    MemberId, Membership, RecordError, TopicPartition,
};
use crate::config::{BrokerConfig, OffsetReset};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const MAX_TOPIC_LEN: usize = 249;

struct TopicLog {
    partitions: Vec<Vec<Vec<u8>>>,
    next_partition: usize,
}

impl TopicLog {
    fn new(partitions: u32) -> Self {
        Self {
            partitions: (0..partitions.max(1)).map(|_| Vec::new()).collect(),
            next_partition: 0,
        }
    }

    fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }
}

struct Member {
    topics: Vec<String>,
    assignment: watch::Sender<Assignment>,
    last_seen: Instant,
    pending_errors: VecDeque<ConsumerRecord>,
    /// Where the next fetch starts scanning its positions.
    next_start: usize,
}

impl Member {
    fn owns(&self, tp: &TopicPartition) -> bool {
        self.assignment.borrow().partitions.contains(tp)
    }
}

#[derive(Default)]
struct Group {
    members: BTreeMap<MemberId, Member>,
    generation: u64,
}

/// The broker "server": owns the logs and group state.
///
/// # Usage
///
/// ```rust
/// use order_stream::broker::BrokerActor;
/// use order_stream::config::BrokerConfig;
///
/// #[tokio::main]
/// async fn main() {
///     let (actor, client) = BrokerActor::new(BrokerConfig::default());
///     let handle = tokio::spawn(actor.run());
///
///     let receipt = client.accept("orders", b"{}".to_vec()).await.unwrap();
///     assert_eq!((receipt.partition, receipt.offset), (0, 0));
///
///     client.shutdown().await.unwrap();
///     handle.await.unwrap();
/// }
/// ```
pub struct BrokerActor {
    receiver: mpsc::Receiver<BrokerRequest>,
    config: BrokerConfig,
    topics: HashMap<String, TopicLog>,
    groups: HashMap<String, Group>,
    committed: HashMap<(String, TopicPartition), u64>,
    appends: watch::Sender<u64>,
    next_member: u64,
}

impl BrokerActor {
    /// Creates the broker and a client for it. The broker does nothing until
    /// [`run`](Self::run) is spawned.
    pub fn new(config: BrokerConfig) -> (Self, BrokerClient) {
        let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));
        let (appends, _) = watch::channel(0);
        let actor = Self {
            receiver,
            config,
            topics: HashMap::new(),
            groups: HashMap::new(),
            committed: HashMap::new(),
            appends,
            next_member: 1,
        };
        (actor, BrokerClient::new(sender))
    }

    /// Runs the request loop until every client is dropped or a
    /// [`BrokerRequest::Shutdown`] arrives.
    ///
    /// Between requests the loop evicts members that have not fetched within
    /// the session timeout.
    pub async fn run(mut self) {
        info!(
            partitions = self.config.default_partitions,
            session_timeout_ms = self.config.session_timeout.as_millis() as u64,
            "Broker started"
        );
        let period = (self.config.session_timeout / 2).max(Duration::from_millis(1));
        let mut sweep = tokio::time::interval(period);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = self.receiver.recv() => match msg {
                    Some(BrokerRequest::Shutdown) | None => break,
                    Some(request) => self.handle(request),
                },
                _ = sweep.tick() => self.evict_expired(),
            }
        }

        info!(topics = self.topics.len(), groups = self.groups.len(), "Broker shutdown");
    }

    fn handle(&mut self, request: BrokerRequest) {
        match request {
            BrokerRequest::Accept {
                topic,
                value,
                respond_to,
            } => {
                let result = self.accept(topic, value);
                match &result {
                    Ok(r) => debug!(
                        topic = %r.topic,
                        partition = r.partition,
                        offset = r.offset,
                        "Accepted"
                    ),
                    Err(e) => warn!(error = %e, "Accept failed"),
                }
                let _ = respond_to.send(result);
            }
            BrokerRequest::Join {
                group,
                topics,
                respond_to,
            } => {
                let _ = respond_to.send(self.join(group, topics));
            }
            BrokerRequest::Resolve {
                group,
                partitions,
                reset,
                respond_to,
            } => {
                let _ = respond_to.send(Ok(self.resolve(&group, partitions, reset)));
            }
            BrokerRequest::Fetch {
                group,
                member,
                positions,
                respond_to,
            } => {
                let _ = respond_to.send(self.fetch(&group, member, positions));
            }
            BrokerRequest::Commit {
                group,
                offsets,
                respond_to,
            } => {
                // Committed positions never move backwards.
                for (tp, offset) in offsets {
                    let stored = self.committed.entry((group.clone(), tp.clone())).or_insert(0);
                    if offset >= *stored {
                        debug!(%group, %tp, offset, "Committed");
                        *stored = offset;
                    } else {
                        debug!(%group, %tp, offset, current = *stored, "Ignored stale commit");
                    }
                }
                let _ = respond_to.send(Ok(()));
            }
            BrokerRequest::Leave {
                group,
                member,
                respond_to,
            } => {
                let _ = respond_to.send(self.leave(&group, member));
            }
            BrokerRequest::Shutdown => {}
        }
    }

    fn accept(
        &mut self,
        topic: String,
        value: Vec<u8>,
    ) -> Result<DeliveryReceipt, BrokerError> {
        validate_topic(&topic)?;
        if value.len() > self.config.max_message_bytes {
            return Err(BrokerError::MessageTooLarge {
                size: value.len(),
                max: self.config.max_message_bytes,
            });
        }
        if !self.topics.contains_key(&topic) {
            if !self.config.auto_create_topics {
                return Err(BrokerError::UnknownTopic(topic));
            }
            self.create_topic(&topic);
        }
        let log = self
            .topics
            .get_mut(&topic)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.clone()))?;

        let partition = log.next_partition % log.partitions.len();
        log.next_partition = log.next_partition.wrapping_add(1);
        let records = &mut log.partitions[partition];
        let offset = records.len() as u64;
        records.push(value);

        self.appends.send_modify(|n| *n = n.wrapping_add(1));
        Ok(DeliveryReceipt {
            topic,
            partition: partition as u32,
            offset,
        })
    }

    fn join(&mut self, group: String, topics: Vec<String>) -> Result<Membership, BrokerError> {
        if topics.is_empty() {
            return Err(BrokerError::Rejected("empty subscription".to_string()));
        }
        for topic in &topics {
            validate_topic(topic)?;
        }

        let mut pending_errors = VecDeque::new();
        for topic in &topics {
            if self.topics.contains_key(topic) {
                continue;
            }
            if self.config.auto_create_topics {
                self.create_topic(topic);
            } else {
                pending_errors.push_back(ConsumerRecord::failed(
                    topic.clone(),
                    0,
                    RecordError::UnknownTopic(topic.clone()),
                ));
            }
        }

        let member_id = MemberId(self.next_member);
        self.next_member += 1;
        let (assignment_tx, assignment_rx) = watch::channel(Assignment::default());
        self.groups.entry(group.clone()).or_default().members.insert(
            member_id,
            Member {
                topics,
                assignment: assignment_tx,
                last_seen: Instant::now(),
                pending_errors,
                next_start: 0,
            },
        );
        info!(%group, member = %member_id, "Member joined");
        self.rebalance(&group);

        Ok(Membership {
            member_id,
            assignment: assignment_rx,
            appends: self.appends.subscribe(),
        })
    }

    fn resolve(
        &self,
        group: &str,
        partitions: Vec<TopicPartition>,
        reset: OffsetReset,
    ) -> Vec<(TopicPartition, u64)> {
        partitions
            .into_iter()
            .map(|tp| {
                let offset = match self.committed.get(&(group.to_string(), tp.clone())) {
                    Some(committed) => *committed,
                    None => match reset {
                        OffsetReset::Earliest => 0,
                        OffsetReset::Latest => self.log_end(&tp),
                    },
                };
                (tp, offset)
            })
            .collect()
    }

    fn fetch(
        &mut self,
        group: &str,
        member_id: MemberId,
        positions: Vec<(TopicPartition, u64)>,
    ) -> Result<Option<ConsumerRecord>, BrokerError> {
        let member = self
            .groups
            .get_mut(group)
            .and_then(|g| g.members.get_mut(&member_id))
            .ok_or(BrokerError::UnknownMember(member_id))?;
        member.last_seen = Instant::now();

        if let Some(failed) = member.pending_errors.pop_front() {
            return Ok(Some(failed));
        }

        // Scanning resumes after the partition served last.
        let count = positions.len();
        for step in 0..count {
            let index = (member.next_start + step) % count;
            let (tp, position) = &positions[index];
            if !member.owns(tp) {
                continue;
            }
            let Some(records) = self
                .topics
                .get(&tp.topic)
                .and_then(|log| log.partitions.get(tp.partition as usize))
            else {
                continue;
            };
            if let Some(payload) = records.get(*position as usize) {
                member.next_start = index + 1;
                return Ok(Some(ConsumerRecord::new(
                    tp.topic.clone(),
                    tp.partition,
                    *position,
                    payload.clone(),
                )));
            }
        }
        Ok(None)
    }

    fn leave(&mut self, group: &str, member_id: MemberId) -> Result<(), BrokerError> {
        let removed = self
            .groups
            .get_mut(group)
            .and_then(|g| g.members.remove(&member_id));
        if removed.is_none() {
            return Err(BrokerError::UnknownMember(member_id));
        }
        info!(%group, member = %member_id, "Member left");
        self.rebalance(group);
        Ok(())
    }

    fn evict_expired(&mut self) {
        let now = Instant::now();
        let timeout = self.config.session_timeout;
        let mut affected = Vec::new();
        for (name, group) in &mut self.groups {
            let before = group.members.len();
            group.members.retain(|id, member| {
                let alive = now.duration_since(member.last_seen) < timeout;
                if !alive {
                    warn!(group = %name, member = %id, "Session expired, evicting member");
                }
                alive
            });
            if group.members.len() != before {
                affected.push(name.clone());
            }
        }
        for group in affected {
            self.rebalance(&group);
        }
    }

    fn create_topic(&mut self, topic: &str) {
        let partitions = self.config.default_partitions;
        self.topics
            .insert(topic.to_string(), TopicLog::new(partitions));
        info!(topic, partitions, "Topic created");

        let subscribed: Vec<String> = self
            .groups
            .iter()
            .filter(|(_, g)| g.members.values().any(|m| m.topics.iter().any(|t| t == topic)))
            .map(|(name, _)| name.clone())
            .collect();
        for group in subscribed {
            self.rebalance(&group);
        }
    }

    fn log_end(&self, tp: &TopicPartition) -> u64 {
        self.topics
            .get(&tp.topic)
            .and_then(|log| log.partitions.get(tp.partition as usize))
            .map(|records| records.len() as u64)
            .unwrap_or(0)
    }

    /// Recomputes the assignment of every member of `group` and pushes it.
    ///
    /// Partitions of each topic go round-robin to the members subscribed to
    /// that topic, in member-id order.
    fn rebalance(&mut self, group_name: &str) {
        let Some(group) = self.groups.get_mut(group_name) else {
            return;
        };
        if group.members.is_empty() {
            self.groups.remove(group_name);
            return;
        }
        group.generation += 1;

        let topics: BTreeSet<&String> =
            group.members.values().flat_map(|m| &m.topics).collect();
        let mut owned: BTreeMap<MemberId, Vec<TopicPartition>> =
            group.members.keys().map(|id| (*id, Vec::new())).collect();

        for topic in topics {
            let Some(log) = self.topics.get(topic) else {
                continue;
            };
            let subscribers: Vec<MemberId> = group
                .members
                .iter()
                .filter(|(_, m)| m.topics.contains(topic))
                .map(|(id, _)| *id)
                .collect();
            for partition in 0..log.partition_count() {
                let owner = subscribers[partition as usize % subscribers.len()];
                if let Some(list) = owned.get_mut(&owner) {
                    list.push(TopicPartition::new(topic.clone(), partition));
                }
            }
        }

        for (id, member) in &group.members {
            let partitions = owned.remove(id).unwrap_or_default();
            debug!(
                group = group_name,
                member = %id,
                generation = group.generation,
                ?partitions,
                "Assigned"
            );
            member.assignment.send_replace(Assignment {
                generation: group.generation,
                partitions,
            });
        }
        info!(
            group = group_name,
            generation = group.generation,
            members = group.members.len(),
            "Rebalanced"
        );
    }
}

fn validate_topic(topic: &str) -> Result<(), BrokerError> {
    let legal = !topic.is_empty()
        && topic.len() <= MAX_TOPIC_LEN
        && topic
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if legal {
        Ok(())
    } else {
        Err(BrokerError::InvalidTopic(topic.to_string()))
    }
}
